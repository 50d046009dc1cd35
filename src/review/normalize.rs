//! Per-source normalization of raw reviewer findings.
//!
//! Each reviewer names kinds and severities its own way; a per-source
//! mapping table translates them into the closed sets. Unknown kinds map to
//! `Other`, unknown severities default to `Low`, confidence is clamped to
//! [0, 1]. Normalization never drops a finding.

use std::collections::HashMap;

use crate::review::{finding_id, Finding, FindingKind, RawFinding, Severity, REVIEW_SCHEMA_VERSION};

/// Per-source kind/severity vocabularies.
#[derive(Debug, Clone, Default)]
pub struct SourceMapping {
    /// Source-specific kind names → canonical kinds
    pub kinds: HashMap<String, FindingKind>,
    /// Source-specific severity names → canonical severities
    pub severities: HashMap<String, Severity>,
}

/// All known source mappings plus the shared fallback vocabulary.
#[derive(Debug, Clone)]
pub struct SourceMappings {
    sources: HashMap<String, SourceMapping>,
}

impl SourceMappings {
    /// Built-in vocabularies for the reviewers the orchestrator ships with.
    pub fn builtin() -> Self {
        let mut sources = HashMap::new();

        // Static analyzers report rule classes
        let mut semgrep = SourceMapping::default();
        semgrep.kinds.insert("vuln".into(), FindingKind::Security);
        semgrep.kinds.insert("correctness".into(), FindingKind::Bug);
        semgrep.kinds.insert("best-practice".into(), FindingKind::Style);
        sources.insert("semgrep".to_string(), semgrep);

        // AI reviewers use looser language
        let mut coderabbit = SourceMapping::default();
        coderabbit.kinds.insert("nitpick".into(), FindingKind::Style);
        coderabbit.kinds.insert("refactor".into(), FindingKind::Style);
        coderabbit
            .kinds
            .insert("potential-bug".into(), FindingKind::Bug);
        coderabbit
            .severities
            .insert("suggestion".into(), Severity::Low);
        sources.insert("coderabbit".to_string(), coderabbit);

        let mut mypy = SourceMapping::default();
        mypy.kinds.insert("type-error".into(), FindingKind::Typing);
        mypy.kinds.insert("annotation".into(), FindingKind::Typing);
        sources.insert("mypy".to_string(), mypy);

        Self { sources }
    }

    /// Register or replace the mapping for one source.
    pub fn insert(&mut self, source: &str, mapping: SourceMapping) {
        self.sources.insert(source.to_string(), mapping);
    }

    fn map_kind(&self, source: &str, kind: &str) -> FindingKind {
        let key = kind.to_ascii_lowercase();
        if let Some(mapping) = self.sources.get(source) {
            if let Some(k) = mapping.kinds.get(&key) {
                return *k;
            }
        }
        // Shared vocabulary
        match key.as_str() {
            "security" => FindingKind::Security,
            "bug" => FindingKind::Bug,
            "style" | "lint" | "format" => FindingKind::Style,
            "typing" | "types" => FindingKind::Typing,
            "performance" | "perf" => FindingKind::Performance,
            "doc" | "docs" | "documentation" => FindingKind::Doc,
            "test" | "tests" | "coverage" => FindingKind::Test,
            _ => FindingKind::Other,
        }
    }

    fn map_severity(&self, source: &str, severity: &str) -> Severity {
        let key = severity.to_ascii_lowercase();
        if let Some(mapping) = self.sources.get(source) {
            if let Some(s) = mapping.severities.get(&key) {
                return *s;
            }
        }
        // Unknown severities default to Low, never to a guess upward
        Severity::parse(&key).unwrap_or(Severity::Low)
    }
}

impl Default for SourceMappings {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Normalize one raw finding into the canonical form.
pub fn normalize_finding(mappings: &SourceMappings, raw: &RawFinding) -> Finding {
    let kind = mappings.map_kind(&raw.source, &raw.kind);
    let severity = mappings.map_severity(&raw.source, &raw.severity);

    Finding {
        id: finding_id(kind, &raw.file, raw.line, &raw.title),
        source: raw.source.clone(),
        kind,
        severity,
        file: raw.file.clone(),
        line: raw.line,
        title: raw.title.clone(),
        body: raw.body.clone(),
        suggested_fix: raw.suggested_fix.clone(),
        confidence: raw.confidence.clamp(0.0, 1.0),
        tags: raw.tags.clone(),
        schema_version: REVIEW_SCHEMA_VERSION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(source: &str, kind: &str, severity: &str) -> RawFinding {
        RawFinding {
            source: source.to_string(),
            kind: kind.to_string(),
            severity: severity.to_string(),
            file: "src/auth.go".to_string(),
            line: 42,
            title: "hardcoded credential".to_string(),
            body: String::new(),
            suggested_fix: None,
            confidence: 0.9,
            tags: vec![],
        }
    }

    #[test]
    fn test_shared_vocabulary() {
        let mappings = SourceMappings::builtin();
        let f = normalize_finding(&mappings, &raw("human", "security", "critical"));
        assert_eq!(f.kind, FindingKind::Security);
        assert_eq!(f.severity, Severity::Critical);
    }

    #[test]
    fn test_source_specific_kind_wins() {
        let mappings = SourceMappings::builtin();
        let f = normalize_finding(&mappings, &raw("coderabbit", "nitpick", "suggestion"));
        assert_eq!(f.kind, FindingKind::Style);
        assert_eq!(f.severity, Severity::Low);
    }

    #[test]
    fn test_unknown_kind_maps_to_other() {
        let mappings = SourceMappings::builtin();
        let f = normalize_finding(&mappings, &raw("human", "vibes", "high"));
        assert_eq!(f.kind, FindingKind::Other);
    }

    #[test]
    fn test_unknown_severity_defaults_low() {
        let mappings = SourceMappings::builtin();
        let f = normalize_finding(&mappings, &raw("human", "bug", "catastrophic"));
        assert_eq!(f.severity, Severity::Low);
    }

    #[test]
    fn test_confidence_clamped() {
        let mappings = SourceMappings::builtin();
        let mut r = raw("human", "bug", "high");
        r.confidence = 1.7;
        assert!((normalize_finding(&mappings, &r).confidence - 1.0).abs() < f64::EPSILON);
        r.confidence = -0.3;
        assert!(normalize_finding(&mappings, &r).confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_mypy_type_errors() {
        let mappings = SourceMappings::builtin();
        let f = normalize_finding(&mappings, &raw("mypy", "type-error", "error"));
        assert_eq!(f.kind, FindingKind::Typing);
        assert_eq!(f.severity, Severity::High);
    }
}
