//! Hybrid-workflow hints for known platform combinations.
//!
//! The table is fixed: a detected pair that appears here names the
//! enhancement pipeline the combination should trigger. Order matters only
//! within the table; the pair itself is unordered.

/// Known (platform, platform) → pipeline combinations.
const HYBRID_TABLE: &[(&str, &str, &str)] = &[
    ("figma-make", "lovable", "design-to-code_workflow"),
    ("figma-make", "bolt", "design-to-code_workflow"),
    ("figma-make", "v0", "design-to-code_workflow"),
    ("lovable", "replit", "prototype-to-ide_workflow"),
    ("lovable", "cursor", "prototype-to-ide_workflow"),
    ("lovable", "windsurf", "prototype-to-ide_workflow"),
    ("bolt", "replit", "prototype-to-ide_workflow"),
    ("bolt", "cursor", "prototype-to-ide_workflow"),
    ("v0", "replit", "prototype-to-ide_workflow"),
    ("v0", "cursor", "prototype-to-ide_workflow"),
];

/// Hint for the first known pair among the detected platforms, if any.
pub fn hybrid_hint(detected: &[&str]) -> Option<&'static str> {
    for (a, b, hint) in HYBRID_TABLE {
        let has_a = detected.contains(a);
        let has_b = detected.contains(b);
        if has_a && has_b {
            return Some(hint);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_to_ide_pair() {
        assert_eq!(
            hybrid_hint(&["lovable", "replit"]),
            Some("prototype-to-ide_workflow")
        );
        // Unordered
        assert_eq!(
            hybrid_hint(&["replit", "lovable"]),
            Some("prototype-to-ide_workflow")
        );
    }

    #[test]
    fn test_design_to_code_pair() {
        assert_eq!(
            hybrid_hint(&["figma-make", "v0"]),
            Some("design-to-code_workflow")
        );
    }

    #[test]
    fn test_unknown_combination_has_no_hint() {
        assert_eq!(hybrid_hint(&["cursor", "windsurf"]), None);
        assert_eq!(hybrid_hint(&["lovable"]), None);
        assert_eq!(hybrid_hint(&[]), None);
    }

    #[test]
    fn test_table_priority_order() {
        // A triple detection picks the first table entry that matches
        assert_eq!(
            hybrid_hint(&["figma-make", "lovable", "replit"]),
            Some("design-to-code_workflow")
        );
    }
}
