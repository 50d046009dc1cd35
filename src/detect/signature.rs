//! Platform signatures: declaration, validation, compilation.
//!
//! File and folder patterns are globs, anchored with a leading `**/` when
//! unanchored. Dep, commit and content patterns are literal substrings
//! unless prefixed `re:`, in which case they compile to regexes at load.

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AutoPrError, Result};

/// Canonical channel weight table. Must sum to ≤ 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub files: f64,
    pub deps: f64,
    pub folders: f64,
    pub commits: f64,
    pub content: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            files: 0.40,
            deps: 0.30,
            folders: 0.15,
            commits: 0.10,
            content: 0.05,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.files + self.deps + self.folders + self.commits + self.content
    }
}

/// Per-signature channel weight overrides; unset channels use the canonical
/// table. This replaces the parallel weight tables of older designs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightOverrides {
    pub files: Option<f64>,
    pub deps: Option<f64>,
    pub folders: Option<f64>,
    pub commits: Option<f64>,
    pub content: Option<f64>,
}

impl WeightOverrides {
    pub fn resolve(&self, base: Weights) -> Weights {
        Weights {
            files: self.files.unwrap_or(base.files),
            deps: self.deps.unwrap_or(base.deps),
            folders: self.folders.unwrap_or(base.folders),
            commits: self.commits.unwrap_or(base.commits),
            content: self.content.unwrap_or(base.content),
        }
    }
}

/// Hits are capped at the channel's saturation so one channel cannot
/// dominate. Saturation 1 means "any hit earns the full channel weight".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSaturation {
    pub files: u32,
    pub deps: u32,
    pub folders: u32,
    pub commits: u32,
    pub content: u32,
}

impl Default for ChannelSaturation {
    fn default() -> Self {
        Self {
            files: 1,
            deps: 1,
            folders: 1,
            commits: 1,
            content: 1,
        }
    }
}

/// Declarative platform signature, as loaded from YAML or built in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSignature {
    pub platform_id: String,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub dep_patterns: Vec<String>,
    #[serde(default)]
    pub folder_patterns: Vec<String>,
    #[serde(default)]
    pub commit_patterns: Vec<String>,
    #[serde(default)]
    pub content_patterns: Vec<String>,
    #[serde(default)]
    pub weights: WeightOverrides,
    #[serde(default)]
    pub saturation: ChannelSaturation,
    #[serde(default)]
    pub priority: i32,
}

/// A text pattern: literal substring or `re:`-prefixed regex.
#[derive(Debug, Clone)]
pub enum TextPattern {
    Literal(String),
    Regex(Regex),
}

impl TextPattern {
    fn compile(platform_id: &str, pattern: &str) -> Result<Self> {
        if let Some(expr) = pattern.strip_prefix("re:") {
            let regex = Regex::new(expr).map_err(|e| AutoPrError::InvalidPattern {
                platform_id: platform_id.to_string(),
                pattern: pattern.to_string(),
                details: e.to_string(),
            })?;
            Ok(Self::Regex(regex))
        } else {
            Ok(Self::Literal(pattern.to_lowercase()))
        }
    }

    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            Self::Literal(needle) => haystack.to_lowercase().contains(needle),
            Self::Regex(regex) => regex.is_match(haystack),
        }
    }
}

/// Signature with all patterns compiled at load time.
#[derive(Debug)]
pub struct CompiledSignature {
    pub platform_id: String,
    pub file_globs: Vec<GlobMatcher>,
    pub dep_patterns: Vec<TextPattern>,
    pub folder_globs: Vec<GlobMatcher>,
    pub commit_patterns: Vec<TextPattern>,
    pub content_patterns: Vec<TextPattern>,
    pub weights: Weights,
    pub saturation: ChannelSaturation,
    pub priority: i32,
}

/// Anchor a glob: a pattern without a leading `/` or `**/` is made
/// repo-wide with `**/`.
fn anchor_glob(pattern: &str) -> String {
    if pattern.starts_with("**/") || pattern.starts_with('/') {
        pattern.trim_start_matches('/').to_string()
    } else {
        format!("**/{}", pattern)
    }
}

fn compile_globs(platform_id: &str, patterns: &[String]) -> Result<Vec<GlobMatcher>> {
    patterns
        .iter()
        .map(|pattern| {
            GlobBuilder::new(&anchor_glob(pattern))
                .literal_separator(false)
                .build()
                .map(|g| g.compile_matcher())
                .map_err(|e| AutoPrError::InvalidPattern {
                    platform_id: platform_id.to_string(),
                    pattern: pattern.clone(),
                    details: e.to_string(),
                })
        })
        .collect()
}

fn compile_texts(platform_id: &str, patterns: &[String]) -> Result<Vec<TextPattern>> {
    patterns
        .iter()
        .map(|p| TextPattern::compile(platform_id, p))
        .collect()
}

impl CompiledSignature {
    pub fn compile(sig: &PlatformSignature, base: Weights) -> Result<Self> {
        let weights = sig.weights.resolve(base);
        let sum = weights.sum();
        if sum > 1.0 + 1e-9 {
            return Err(AutoPrError::InvalidWeights {
                platform_id: sig.platform_id.clone(),
                sum,
            });
        }
        Ok(Self {
            platform_id: sig.platform_id.clone(),
            file_globs: compile_globs(&sig.platform_id, &sig.file_patterns)?,
            dep_patterns: compile_texts(&sig.platform_id, &sig.dep_patterns)?,
            folder_globs: compile_globs(&sig.platform_id, &sig.folder_patterns)?,
            commit_patterns: compile_texts(&sig.platform_id, &sig.commit_patterns)?,
            content_patterns: compile_texts(&sig.platform_id, &sig.content_patterns)?,
            weights,
            saturation: sig.saturation,
            priority: sig.priority,
        })
    }
}

/// A compiled, immutable set of signatures.
pub struct SignatureSet {
    signatures: Vec<CompiledSignature>,
}

impl SignatureSet {
    /// Compile declarations against the canonical weight table.
    pub fn compile(declarations: Vec<PlatformSignature>) -> Result<Self> {
        let base = Weights::default();
        let signatures = declarations
            .iter()
            .map(|sig| CompiledSignature::compile(sig, base))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { signatures })
    }

    /// Load declarations from a YAML document (a list of signatures).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let declarations: Vec<PlatformSignature> = serde_yaml::from_str(yaml)?;
        Self::compile(declarations)
    }

    pub fn signatures(&self) -> &[CompiledSignature] {
        &self.signatures
    }
}

/// The signature library the detector ships with.
pub fn builtin_signatures() -> Vec<PlatformSignature> {
    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    vec![
        PlatformSignature {
            platform_id: "lovable".into(),
            file_patterns: strings(&["lovable.config.js", "lovable.config.ts"]),
            dep_patterns: strings(&["@lovable/", "lovable-tagger"]),
            folder_patterns: strings(&[".lovable"]),
            commit_patterns: strings(&["lovable"]),
            content_patterns: strings(&["lovable"]),
            // Dependencies are the strongest lovable signal; config files
            // are rare in generated projects, so files/folders are demoted
            // to keep the table sum within 1.0
            weights: WeightOverrides {
                files: Some(0.10),
                deps: Some(0.40),
                folders: Some(0.05),
                ..Default::default()
            },
            saturation: ChannelSaturation::default(),
            priority: 10,
        },
        PlatformSignature {
            platform_id: "replit".into(),
            file_patterns: strings(&[".replit", "replit.nix"]),
            dep_patterns: vec![],
            folder_patterns: vec![],
            commit_patterns: strings(&["replit"]),
            content_patterns: strings(&["replit"]),
            // The .replit file is close to definitive; no dep channel exists
            weights: WeightOverrides {
                files: Some(0.45),
                deps: Some(0.0),
                ..Default::default()
            },
            saturation: ChannelSaturation::default(),
            priority: 5,
        },
        PlatformSignature {
            platform_id: "bolt".into(),
            file_patterns: strings(&[".bolt/config.json"]),
            dep_patterns: vec![],
            folder_patterns: strings(&[".bolt"]),
            commit_patterns: strings(&["bolt.new", "bolt:"]),
            content_patterns: strings(&["bolt.new"]),
            weights: WeightOverrides::default(),
            saturation: ChannelSaturation::default(),
            priority: 5,
        },
        PlatformSignature {
            platform_id: "v0".into(),
            file_patterns: strings(&["v0.config.json", "components.json"]),
            dep_patterns: strings(&["@v0/", "shadcn"]),
            folder_patterns: vec![],
            commit_patterns: strings(&["v0.dev"]),
            content_patterns: strings(&["v0.dev"]),
            weights: WeightOverrides::default(),
            saturation: ChannelSaturation::default(),
            priority: 4,
        },
        PlatformSignature {
            platform_id: "cursor".into(),
            file_patterns: strings(&[".cursorrules", ".cursor/rules/**"]),
            dep_patterns: vec![],
            folder_patterns: strings(&[".cursor"]),
            commit_patterns: strings(&["cursor"]),
            content_patterns: vec![],
            weights: WeightOverrides::default(),
            saturation: ChannelSaturation::default(),
            priority: 3,
        },
        PlatformSignature {
            platform_id: "windsurf".into(),
            file_patterns: strings(&[".windsurfrules"]),
            dep_patterns: vec![],
            folder_patterns: strings(&[".windsurf"]),
            commit_patterns: strings(&["windsurf"]),
            content_patterns: vec![],
            weights: WeightOverrides::default(),
            saturation: ChannelSaturation::default(),
            priority: 3,
        },
        PlatformSignature {
            platform_id: "figma-make".into(),
            file_patterns: strings(&["figma.config.json"]),
            dep_patterns: strings(&["figma-api", "@figma/"]),
            folder_patterns: vec![],
            commit_patterns: strings(&["figma"]),
            content_patterns: strings(&["figma.com/file"]),
            weights: WeightOverrides::default(),
            saturation: ChannelSaturation::default(),
            priority: 4,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_weight_table() {
        let w = Weights::default();
        assert!((w.files - 0.40).abs() < f64::EPSILON);
        assert!((w.deps - 0.30).abs() < f64::EPSILON);
        assert!((w.folders - 0.15).abs() < f64::EPSILON);
        assert!((w.commits - 0.10).abs() < f64::EPSILON);
        assert!((w.content - 0.05).abs() < f64::EPSILON);
        assert!(w.sum() <= 1.0 + 1e-9);
    }

    #[test]
    fn test_overrides_merge_over_base() {
        let overrides = WeightOverrides {
            deps: Some(0.40),
            ..Default::default()
        };
        let merged = overrides.resolve(Weights::default());
        assert!((merged.deps - 0.40).abs() < f64::EPSILON);
        assert!((merged.files - 0.40).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weights_over_one_rejected() {
        let sig = PlatformSignature {
            platform_id: "bad".into(),
            file_patterns: vec![],
            dep_patterns: vec![],
            folder_patterns: vec![],
            commit_patterns: vec![],
            content_patterns: vec![],
            weights: WeightOverrides {
                files: Some(0.9),
                deps: Some(0.9),
                ..Default::default()
            },
            saturation: ChannelSaturation::default(),
            priority: 0,
        };
        let err = CompiledSignature::compile(&sig, Weights::default()).unwrap_err();
        assert_eq!(err.code(), "APR-081");
    }

    #[test]
    fn test_unanchored_glob_gains_prefix() {
        assert_eq!(anchor_glob(".replit"), "**/.replit");
        assert_eq!(anchor_glob("**/package.json"), "**/package.json");
        assert_eq!(anchor_glob("/top-level.txt"), "top-level.txt");
    }

    #[test]
    fn test_text_pattern_literal_case_insensitive() {
        let p = TextPattern::compile("x", "Lovable").unwrap();
        assert!(p.matches("chore: lovable init"));
        assert!(!p.matches("chore: init"));
    }

    #[test]
    fn test_text_pattern_regex() {
        let p = TextPattern::compile("x", "re:^feat(\\(.+\\))?:").unwrap();
        assert!(p.matches("feat(ui): add button"));
        assert!(!p.matches("fix: typo"));
    }

    #[test]
    fn test_bad_regex_rejected_at_load() {
        let err = TextPattern::compile("x", "re:(unclosed").unwrap_err();
        assert_eq!(err.code(), "APR-080");
    }

    #[test]
    fn test_builtin_signatures_compile() {
        let set = SignatureSet::compile(builtin_signatures()).unwrap();
        assert!(set.signatures().len() >= 5);
    }

    #[test]
    fn test_yaml_signature_roundtrip() {
        let yaml = r#"
- platform_id: myplatform
  file_patterns: ["myplatform.toml"]
  dep_patterns: ["myplatform-sdk"]
  priority: 2
"#;
        let set = SignatureSet::from_yaml(yaml).unwrap();
        assert_eq!(set.signatures().len(), 1);
        assert_eq!(set.signatures()[0].platform_id, "myplatform");
    }
}
