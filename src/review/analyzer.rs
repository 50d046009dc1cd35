//! The analyzer pipeline: normalize → dedupe → filter → route → block.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AutoPrError;
use crate::review::{
    normalize_finding, Finding, FindingKind, Issue, ReviewerStream, RoutingTable, Severity,
    SourceMappings, REVIEW_SCHEMA_VERSION,
};

/// A (severity, kind) pair whose presence blocks the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule {
    pub severity: Severity,
    pub kind: FindingKind,
}

/// Analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Findings strictly below this severity are dropped
    pub severity_threshold: Severity,
    /// Findings strictly below this confidence are dropped
    pub min_confidence: f64,
    /// Presence of any of these pairs blocks the merge
    pub block_set: Vec<BlockRule>,
    pub routing: RoutingTable,
    pub mappings: SourceMappings,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::Low,
            min_confidence: 0.0,
            block_set: vec![
                BlockRule {
                    severity: Severity::Critical,
                    kind: FindingKind::Security,
                },
                BlockRule {
                    severity: Severity::High,
                    kind: FindingKind::Typing,
                },
            ],
            routing: RoutingTable::builtin(),
            mappings: SourceMappings::builtin(),
        }
    }
}

/// Result of one analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Findings that survived dedupe + filtering
    pub findings: Vec<Finding>,
    /// Routed issues, one per (finding, sink)
    pub issues: Vec<Issue>,
    /// Findings no routing rule matched (APR-070 recorded, finding kept)
    pub unrouted: Vec<String>,
    /// Whether merge-block conditions are met
    pub merge_block: bool,
    /// Human-readable reasons for the block decision
    pub block_reasons: Vec<String>,
    pub schema_version: u32,
}

/// PR-review analyzer: merges N reviewer streams into one issue list.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline over the reviewer streams.
    pub fn analyze(&self, run_id: &str, streams: &[ReviewerStream]) -> AnalysisReport {
        let normalized = self.normalize(streams);
        let deduped = self.dedupe(normalized);
        let filtered = self.filter(deduped);
        let (issues, unrouted) = self.route(run_id, &filtered);
        let (merge_block, block_reasons) = self.block_decision(&filtered);

        AnalysisReport {
            findings: filtered,
            issues,
            unrouted,
            merge_block,
            block_reasons,
            schema_version: REVIEW_SCHEMA_VERSION,
        }
    }

    fn normalize(&self, streams: &[ReviewerStream]) -> Vec<Finding> {
        streams
            .iter()
            .flat_map(|stream| {
                stream
                    .findings
                    .iter()
                    .map(|raw| normalize_finding(&self.config.mappings, raw))
            })
            .collect()
    }

    /// Collapse findings with identical (kind, file, line, title-hash);
    /// keep the highest severity and confidence, merge tags.
    fn dedupe(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let mut by_key: FxHashMap<String, Finding> = FxHashMap::default();
        let mut order: Vec<String> = Vec::new();

        for finding in findings {
            let key = finding.dedup_key();
            match by_key.get_mut(&key) {
                None => {
                    order.push(key.clone());
                    by_key.insert(key, finding);
                }
                Some(existing) => {
                    if finding.severity > existing.severity {
                        existing.severity = finding.severity;
                        existing.body = finding.body.clone();
                        existing.source = finding.source.clone();
                        if finding.suggested_fix.is_some() {
                            existing.suggested_fix = finding.suggested_fix.clone();
                        }
                    }
                    existing.confidence = existing.confidence.max(finding.confidence);
                    for tag in finding.tags {
                        if !existing.tags.contains(&tag) {
                            existing.tags.push(tag);
                        }
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|key| by_key.remove(&key))
            .collect()
    }

    fn filter(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let before = findings.len();
        let kept: Vec<Finding> = findings
            .into_iter()
            .filter(|f| {
                f.severity >= self.config.severity_threshold
                    && f.confidence >= self.config.min_confidence
            })
            .collect();
        debug!(kept = kept.len(), dropped = before - kept.len(), "filtered findings");
        kept
    }

    fn route(&self, run_id: &str, findings: &[Finding]) -> (Vec<Issue>, Vec<String>) {
        let mut issues = Vec::new();
        let mut unrouted = Vec::new();

        for finding in findings {
            let sinks = self.config.routing.route(finding);
            if sinks.is_empty() {
                let err = AutoPrError::UnroutedFinding {
                    finding_id: finding.id.clone(),
                    kind: finding.kind.as_str().to_string(),
                    severity: finding.severity.as_str().to_string(),
                };
                warn!(code = err.code(), "{}", err);
                unrouted.push(finding.id.clone());
                continue;
            }
            for sink in sinks {
                issues.push(Issue {
                    sink,
                    sink_ref: None,
                    assignees: Vec::new(),
                    labels: vec![finding.kind.as_str().to_string()],
                    priority: finding.severity.priority(),
                    body_md: render_issue_body(finding),
                    correlates_to: finding.id.clone(),
                    idempotency_key: Issue::idempotency_key_for(run_id, &finding.id, sink),
                    schema_version: REVIEW_SCHEMA_VERSION,
                });
            }
        }
        (issues, unrouted)
    }

    fn block_decision(&self, findings: &[Finding]) -> (bool, Vec<String>) {
        let mut reasons = Vec::new();
        for finding in findings {
            for rule in &self.config.block_set {
                if finding.severity == rule.severity && finding.kind == rule.kind {
                    reasons.push(format!(
                        "{}|{} at {}:{}",
                        rule.severity.as_str(),
                        rule.kind.as_str(),
                        finding.file,
                        finding.line
                    ));
                }
            }
        }
        (!reasons.is_empty(), reasons)
    }
}

fn render_issue_body(finding: &Finding) -> String {
    let mut body = format!(
        "### {}\n\n`{}:{}` - severity **{}**, confidence {:.2}\n",
        finding.title,
        finding.file,
        finding.line,
        finding.severity.as_str(),
        finding.confidence
    );
    if !finding.body.is_empty() {
        body.push('\n');
        body.push_str(&finding.body);
        body.push('\n');
    }
    if let Some(ref fix) = finding.suggested_fix {
        body.push_str("\n**Suggested fix**\n\n```\n");
        body.push_str(fix);
        body.push_str("\n```\n");
    }
    if !finding.tags.is_empty() {
        body.push_str(&format!("\n_tags: {}_\n", finding.tags.join(", ")));
    }
    body
}
