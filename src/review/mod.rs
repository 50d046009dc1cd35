//! PR-Review Analyzer
//!
//! Merges findings from N upstream reviewer streams into one canonical
//! issue list: normalize → dedupe → filter → route → merge-block decision.
//!
//! The Finding and Issue schemas are the public contract to external
//! consumers; they carry a `schema_version` and evolve additively only
//! (fields may be added, never removed or retyped).

pub mod analyzer;
pub mod normalize;
pub mod route;

pub use analyzer::{AnalysisReport, Analyzer, AnalyzerConfig, BlockRule};
pub use normalize::{normalize_finding, SourceMappings};
pub use route::{RouteRule, RoutingTable};

use serde::{Deserialize, Serialize};

use crate::util::canon::hex_sha256;

/// Current schema version for the Finding/Issue wire contract.
pub const REVIEW_SCHEMA_VERSION: u32 = 1;

/// Closed set of finding categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Security,
    Bug,
    Style,
    Typing,
    Performance,
    Doc,
    Test,
    /// Unknown upstream categories map here, never to a guess
    Other,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Bug => "bug",
            Self::Style => "style",
            Self::Typing => "typing",
            Self::Performance => "performance",
            Self::Doc => "doc",
            Self::Test => "test",
            Self::Other => "other",
        }
    }
}

/// Closed severity scale, ordered Low < Medium < High < Critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Issue priority 1..4 (1 = most urgent).
    pub fn priority(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" | "blocker" => Some(Self::Critical),
            "high" | "error" | "major" => Some(Self::High),
            "medium" | "warning" | "minor" => Some(Self::Medium),
            "low" | "info" | "note" | "nitpick" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A raw finding as reported by an upstream reviewer, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    /// Reviewer origin (e.g. "coderabbit", "semgrep", "human")
    pub source: String,
    pub kind: String,
    pub severity: String,
    pub file: String,
    pub line: u32,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_confidence() -> f64 {
    1.0
}

/// One reviewer's stream of raw findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerStream {
    pub source: String,
    pub findings: Vec<RawFinding>,
}

/// A normalized, canonical finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Stable id: hash of (kind, file, line, title-hash)
    pub id: String,
    pub source: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub file: String,
    pub line: u32,
    pub title: String,
    pub body: String,
    pub suggested_fix: Option<String>,
    /// Clamped to [0, 1]
    pub confidence: f64,
    pub tags: Vec<String>,
    pub schema_version: u32,
}

impl Finding {
    /// Dedup key: identical (kind, file, line, title-hash) findings collapse.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind.as_str(),
            self.file,
            self.line,
            title_hash(&self.title)
        )
    }
}

/// Hash of a normalized title (case/whitespace-insensitive).
pub fn title_hash(title: &str) -> String {
    let normalized = title.trim().to_lowercase();
    hex_sha256(normalized.as_bytes())[..16].to_string()
}

/// Compute a finding's stable id.
pub fn finding_id(kind: FindingKind, file: &str, line: u32, title: &str) -> String {
    hex_sha256(
        format!("{}|{}|{}|{}", kind.as_str(), file, line, title_hash(title)).as_bytes(),
    )[..16]
        .to_string()
}

/// Closed set of issue sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sink {
    Tracker,
    VcsIssue,
    Chat,
    Email,
}

impl Sink {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracker => "tracker",
            Self::VcsIssue => "vcs_issue",
            Self::Chat => "chat",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tracker" => Some(Self::Tracker),
            "vcs_issue" => Some(Self::VcsIssue),
            "chat" => Some(Self::Chat),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// The canonical routed form of a Finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub sink: Sink,
    /// Sink-assigned reference once created (ticket id, message ts, ...)
    pub sink_ref: Option<String>,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    /// 1 (urgent) .. 4 (low)
    pub priority: u8,
    pub body_md: String,
    /// Finding id this issue was routed from
    pub correlates_to: String,
    /// `sha256(run_id + finding_id + sink)`, stable across retries
    pub idempotency_key: String,
    pub schema_version: u32,
}

impl Issue {
    /// Idempotency key preventing duplicate tracker rows on retry.
    pub fn idempotency_key_for(run_id: &str, finding_id: &str, sink: Sink) -> String {
        hex_sha256(format!("{}{}{}", run_id, finding_id, sink.as_str()).as_bytes())
    }
}
