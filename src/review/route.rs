//! Declarative routing of findings to sinks.
//!
//! A routing table is an ordered list of rules; the first rule whose
//! predicate matches decides the sinks. A finding that matches no rule is
//! recorded as unrouted (APR-070); the table should normally end with a
//! catch-all.

use serde::{Deserialize, Serialize};

use crate::review::{Finding, FindingKind, Severity, Sink};

/// One routing rule: predicate over kind/severity/tags → sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Match only these kinds (empty = any)
    #[serde(default)]
    pub kinds: Vec<FindingKind>,
    /// Match only findings at or above this severity
    #[serde(default)]
    pub min_severity: Option<Severity>,
    /// Match if the finding carries any of these tags (empty = any)
    #[serde(default)]
    pub tags_any: Vec<String>,
    /// Sinks to route matching findings to
    pub sinks: Vec<Sink>,
}

impl RouteRule {
    pub fn matches(&self, finding: &Finding) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&finding.kind) {
            return false;
        }
        if let Some(min) = self.min_severity {
            if finding.severity < min {
                return false;
            }
        }
        if !self.tags_any.is_empty()
            && !self.tags_any.iter().any(|t| finding.tags.contains(t))
        {
            return false;
        }
        true
    }
}

/// Ordered rule table; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTable {
    pub rules: Vec<RouteRule>,
}

impl RoutingTable {
    /// Default table: security escalates to chat, high+ goes to the
    /// tracker, everything else that survived filtering lands in the
    /// tracker too.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                RouteRule {
                    kinds: vec![FindingKind::Security],
                    min_severity: Some(Severity::High),
                    tags_any: vec![],
                    sinks: vec![Sink::Tracker, Sink::Chat],
                },
                RouteRule {
                    kinds: vec![],
                    min_severity: Some(Severity::High),
                    tags_any: vec![],
                    sinks: vec![Sink::Tracker],
                },
                // Catch-all
                RouteRule {
                    kinds: vec![],
                    min_severity: None,
                    tags_any: vec![],
                    sinks: vec![Sink::Tracker],
                },
            ],
        }
    }

    /// Sinks for a finding; empty when no rule matches.
    pub fn route(&self, finding: &Finding) -> Vec<Sink> {
        for rule in &self.rules {
            if rule.matches(finding) {
                return rule.sinks.clone();
            }
        }
        Vec::new()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::REVIEW_SCHEMA_VERSION;

    fn finding(kind: FindingKind, severity: Severity, tags: Vec<String>) -> Finding {
        Finding {
            id: "f1".into(),
            source: "test".into(),
            kind,
            severity,
            file: "x.ts".into(),
            line: 1,
            title: "t".into(),
            body: String::new(),
            suggested_fix: None,
            confidence: 1.0,
            tags,
            schema_version: REVIEW_SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_critical_security_routes_to_tracker_and_chat() {
        let table = RoutingTable::builtin();
        let sinks = table.route(&finding(FindingKind::Security, Severity::Critical, vec![]));
        assert_eq!(sinks, vec![Sink::Tracker, Sink::Chat]);
    }

    #[test]
    fn test_medium_style_hits_catch_all() {
        let table = RoutingTable::builtin();
        let sinks = table.route(&finding(FindingKind::Style, Severity::Medium, vec![]));
        assert_eq!(sinks, vec![Sink::Tracker]);
    }

    #[test]
    fn test_high_bug_routes_to_tracker_only() {
        let table = RoutingTable::builtin();
        let sinks = table.route(&finding(FindingKind::Bug, Severity::High, vec![]));
        assert_eq!(sinks, vec![Sink::Tracker]);
    }

    #[test]
    fn test_low_security_does_not_escalate_to_chat() {
        let table = RoutingTable::builtin();
        let sinks = table.route(&finding(FindingKind::Security, Severity::Low, vec![]));
        assert_eq!(sinks, vec![Sink::Tracker]);
    }

    #[test]
    fn test_empty_table_routes_nowhere() {
        let table = RoutingTable { rules: vec![] };
        assert!(table
            .route(&finding(FindingKind::Bug, Severity::High, vec![]))
            .is_empty());
    }

    #[test]
    fn test_tag_predicate() {
        let table = RoutingTable {
            rules: vec![RouteRule {
                kinds: vec![],
                min_severity: None,
                tags_any: vec!["hotfix".into()],
                sinks: vec![Sink::Chat],
            }],
        };
        assert!(table
            .route(&finding(FindingKind::Bug, Severity::Low, vec![]))
            .is_empty());
        assert_eq!(
            table.route(&finding(FindingKind::Bug, Severity::Low, vec!["hotfix".into()])),
            vec![Sink::Chat]
        );
    }
}
