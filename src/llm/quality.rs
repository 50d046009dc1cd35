//! Response quality scoring.
//!
//! Heuristic score over completeness, accuracy, relevance and actionability
//! (weighted 0.3/0.3/0.2/0.2). Responses below the configured threshold are
//! not written to the prompt cache, so a bad answer is never replayed.

/// Quality score in [0, 1] for a response to a prompt.
pub fn quality_score(prompt: &str, response: &str) -> f64 {
    let completeness = completeness(response);
    let accuracy = accuracy_heuristic(response);
    let relevance = relevance(prompt, response);
    let actionability = actionability(response);

    (0.3 * completeness + 0.3 * accuracy + 0.2 * relevance + 0.2 * actionability).clamp(0.0, 1.0)
}

/// Long enough to say something, and not cut off mid-sentence.
fn completeness(response: &str) -> f64 {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let length = (trimmed.len() as f64 / 200.0).min(1.0);
    let terminated = trimmed
        .chars()
        .last()
        .map(|c| matches!(c, '.' | '!' | '?' | '`' | ')' | '}' | ']'))
        .unwrap_or(false);
    if terminated {
        0.5 + 0.5 * length
    } else {
        0.5 * length
    }
}

/// Penalize refusal boilerplate and unbalanced code fences.
fn accuracy_heuristic(response: &str) -> f64 {
    let lower = response.to_lowercase();
    let mut score: f64 = 1.0;
    for marker in ["as an ai", "i cannot", "i can't", "i am unable", "i apologize"] {
        if lower.contains(marker) {
            score -= 0.4;
            break;
        }
    }
    if response.matches("```").count() % 2 != 0 {
        score -= 0.3;
    }
    score.max(0.0)
}

/// Token overlap between prompt and response (case-insensitive, words ≥ 4).
fn relevance(prompt: &str, response: &str) -> f64 {
    let words = |text: &str| -> std::collections::HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 4)
            .map(str::to_string)
            .collect()
    };
    let prompt_words = words(prompt);
    if prompt_words.is_empty() {
        return 0.5;
    }
    let response_words = words(response);
    let overlap = prompt_words.intersection(&response_words).count();
    ((overlap as f64 / prompt_words.len() as f64) * 2.0).min(1.0)
}

/// Code blocks, bullets or imperative phrasing make output usable.
fn actionability(response: &str) -> f64 {
    let mut score: f64 = 0.0;
    if response.contains("```") {
        score += 0.5;
    }
    if response.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("- ") || t.starts_with("* ") || t.starts_with("1.")
    }) {
        score += 0.3;
    }
    let lower = response.to_lowercase();
    for verb in ["replace", "add ", "remove ", "change ", "use ", "fix "] {
        if lower.contains(verb) {
            score += 0.2;
            break;
        }
    }
    score.min(1.0)
}
