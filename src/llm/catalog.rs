//! Model catalog and content-complexity heuristics.

use serde::{Deserialize, Serialize};

use super::TaskKind;

/// One routable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    /// Family used for prompt-cache keying (responses are interchangeable
    /// within a family)
    pub family: String,
    /// Task kinds this model advertises
    pub tasks: Vec<TaskKind>,
    /// USD per 1k input tokens
    pub cost_per_1k_in: f64,
    /// USD per 1k output tokens
    pub cost_per_1k_out: f64,
    /// Complexity the model is sized for, [0, 1]
    pub complexity_tier: f64,
}

impl ModelSpec {
    /// 1.0 if the model advertises the task, else 0.5.
    pub fn capability_fit(&self, task: TaskKind) -> f64 {
        if self.tasks.contains(&task) {
            1.0
        } else {
            0.5
        }
    }

    /// Estimated cost for a prompt, assuming output roughly half the input.
    pub fn estimate_cost(&self, prompt: &str) -> f64 {
        let tokens_in = estimate_tokens(prompt) as f64;
        let tokens_out = tokens_in / 2.0;
        (tokens_in / 1000.0) * self.cost_per_1k_in + (tokens_out / 1000.0) * self.cost_per_1k_out
    }

    /// Actual cost from reported token counts.
    pub fn actual_cost(&self, tokens_in: u32, tokens_out: u32) -> f64 {
        (tokens_in as f64 / 1000.0) * self.cost_per_1k_in
            + (tokens_out as f64 / 1000.0) * self.cost_per_1k_out
    }
}

/// Rough token estimate (4 chars per token).
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4).max(1) as u32
}

/// The model catalog the router selects from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Generic three-tier default catalog; deployments override via config.
    pub fn builtin() -> Self {
        let all = vec![
            TaskKind::Summarize,
            TaskKind::Analyze,
            TaskKind::Generate,
            TaskKind::Classify,
        ];
        Self {
            models: vec![
                ModelSpec {
                    id: "small-fast".into(),
                    family: "small".into(),
                    tasks: vec![TaskKind::Summarize, TaskKind::Classify],
                    cost_per_1k_in: 0.0002,
                    cost_per_1k_out: 0.0008,
                    complexity_tier: 0.2,
                },
                ModelSpec {
                    id: "medium-balanced".into(),
                    family: "medium".into(),
                    tasks: all.clone(),
                    cost_per_1k_in: 0.003,
                    cost_per_1k_out: 0.015,
                    complexity_tier: 0.5,
                },
                ModelSpec {
                    id: "large-capable".into(),
                    family: "large".into(),
                    tasks: all,
                    cost_per_1k_in: 0.015,
                    cost_per_1k_out: 0.075,
                    complexity_tier: 0.9,
                },
            ],
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Content complexity in [0, 1]: prompt length, code density, task kind.
pub fn complexity_score(prompt: &str, task: TaskKind) -> f64 {
    let length_factor = (prompt.len() as f64 / 4000.0).min(1.0);

    let lines: Vec<&str> = prompt.lines().collect();
    let code_lines = lines
        .iter()
        .filter(|l| {
            let t = l.trim();
            t.contains('{')
                || t.contains('}')
                || t.contains(';')
                || t.contains("=>")
                || t.starts_with("def ")
                || t.starts_with("fn ")
                || t.starts_with("class ")
        })
        .count();
    let code_density = if lines.is_empty() {
        0.0
    } else {
        code_lines as f64 / lines.len() as f64
    };

    let task_factor = match task {
        TaskKind::Classify => 0.1,
        TaskKind::Summarize => 0.3,
        TaskKind::Analyze => 0.6,
        TaskKind::Generate => 0.8,
    };

    (0.4 * length_factor + 0.3 * code_density + 0.3 * task_factor).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_fit_binary() {
        let catalog = ModelCatalog::builtin();
        let small = catalog.get("small-fast").unwrap();
        assert!((small.capability_fit(TaskKind::Summarize) - 1.0).abs() < f64::EPSILON);
        assert!((small.capability_fit(TaskKind::Generate) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cost_estimate_scales_with_prompt() {
        let catalog = ModelCatalog::builtin();
        let large = catalog.get("large-capable").unwrap();
        let short = large.estimate_cost("short prompt");
        let long = large.estimate_cost(&"x".repeat(40_000));
        assert!(long > short * 100.0);
    }

    #[test]
    fn test_actual_cost_from_tokens() {
        let catalog = ModelCatalog::builtin();
        let medium = catalog.get("medium-balanced").unwrap();
        let cost = medium.actual_cost(1000, 1000);
        assert!((cost - 0.018).abs() < 1e-9);
    }

    #[test]
    fn test_complexity_classify_is_low() {
        let c = complexity_score("spam or not?", TaskKind::Classify);
        assert!(c < 0.2, "got {}", c);
    }

    #[test]
    fn test_complexity_code_generation_is_high() {
        let prompt = "fn main() {\n    let x = 1;\n    println!(\"{}\", x);\n}\nrewrite this";
        let c = complexity_score(prompt, TaskKind::Generate);
        assert!(c > 0.4, "got {}", c);
    }

    #[test]
    fn test_complexity_bounded() {
        let huge = "{};".repeat(100_000);
        let c = complexity_score(&huge, TaskKind::Generate);
        assert!((0.0..=1.0).contains(&c));
    }
}
