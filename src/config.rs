//! AutoPR Configuration Module
//!
//! Manages persistent configuration for tunables and adapter credentials.
//! Config is stored in `$AUTOPR_CONFIG_DIR/config.toml` (falling back to the
//! platform config directory).
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`AUTOPR_*`, adapter credential vars)
//! 2. Config file (`config.toml`)
//! 3. Compiled-in defaults (`util::constants`)
//!
//! The numeric values here are defaults, not semantics: dedup windows,
//! budgets and rate limits may all be tuned per deployment.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AutoPrError, Result};
use crate::util::constants;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoPrConfig {
    /// Ingress tunables
    pub ingress: IngressConfig,
    /// Engine tunables
    pub engine: EngineConfig,
    /// Resilience defaults applied to every outbound endpoint
    pub resilience: ResilienceConfig,
    /// LLM budgets (USD)
    pub budgets: BudgetConfig,
    /// Review analyzer thresholds
    pub review: ReviewConfig,
    /// State directory override (else `AUTOPR_STATE_DIR`, else `.autopr`)
    pub state_dir: Option<String>,
    /// Shared webhook secrets, keyed by event source name
    pub sources: std::collections::BTreeMap<String, SourceConfig>,
}

impl Default for AutoPrConfig {
    fn default() -> Self {
        Self {
            ingress: IngressConfig::default(),
            engine: EngineConfig::default(),
            resilience: ResilienceConfig::default(),
            budgets: BudgetConfig::default(),
            review: ReviewConfig::default(),
            state_dir: None,
            sources: Default::default(),
        }
    }
}

/// Per-source ingress credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// HMAC shared secret, or the name of the env var holding it when
    /// prefixed with `env:`
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngressConfig {
    /// Seconds identical dedup keys collapse to one run
    pub dedup_window_secs: u64,
    /// Bounded run-queue capacity
    pub queue_capacity: usize,
    /// Retry-After seconds advertised on backpressure
    pub retry_after_secs: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: constants::DEDUP_WINDOW.as_secs(),
            queue_capacity: constants::QUEUE_CAPACITY,
            retry_after_secs: constants::QUEUE_RETRY_AFTER.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock deadline for a whole run, seconds
    pub run_deadline_secs: u64,
    /// Default per-step timeout, seconds
    pub step_timeout_secs: u64,
    /// Independent steps running concurrently within one run
    pub intra_run_parallelism: usize,
    /// Worker pool size
    pub workers: usize,
    /// Seconds a run waits for the per-PR lock before PrBusy
    pub pr_lock_wait_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_deadline_secs: constants::RUN_DEADLINE.as_secs(),
            step_timeout_secs: constants::STEP_TIMEOUT.as_secs(),
            intra_run_parallelism: constants::INTRA_RUN_PARALLELISM,
            workers: constants::WORKER_COUNT,
            pr_lock_wait_secs: constants::PR_LOCK_WAIT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive failures before a breaker opens
    pub fail_max: u32,
    /// Seconds an open breaker waits before probing (half-open)
    pub reset_after_secs: u64,
    /// Retry attempt cap (including the initial attempt)
    pub max_attempts: u32,
    /// Total elapsed retry budget, seconds
    pub max_elapsed_secs: u64,
    /// Token bucket capacity per (service, identifier)
    pub bucket_capacity: u32,
    /// Token refill rate per second
    pub refill_per_sec: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            fail_max: 5,
            reset_after_secs: 60,
            max_attempts: 3,
            max_elapsed_secs: 30,
            bucket_capacity: 20,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Per-run LLM spend cap, USD
    pub per_run_usd: f64,
    /// Daily LLM spend cap, USD
    pub daily_usd: f64,
    /// Monthly LLM spend cap, USD
    pub monthly_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_run_usd: 0.50,
            daily_usd: 10.0,
            monthly_usd: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Findings below this severity are dropped (critical|high|medium|low)
    pub severity_threshold: String,
    /// Findings below this confidence are dropped
    pub min_confidence: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            severity_threshold: "low".to_string(),
            min_confidence: 0.0,
        }
    }
}

impl AutoPrConfig {
    /// Get the config directory path
    ///
    /// `AUTOPR_CONFIG_DIR` wins; else `~/.config/autopr/` on Unix.
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("AUTOPR_CONFIG_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autopr")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| AutoPrError::Config {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| AutoPrError::Config {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Save configuration to file, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir();
        let path = Self::config_path();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| AutoPrError::Config {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| AutoPrError::Config {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| AutoPrError::Config {
            reason: format!("Failed to write config file: {}", e),
        })?;

        Ok(())
    }

    /// Effective state directory: config override, else `AUTOPR_STATE_DIR`,
    /// else `.autopr` in the working directory.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AUTOPR_STATE_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        PathBuf::from(".autopr")
    }

    /// Resolve a source's webhook secret, following `env:` indirection.
    pub fn source_secret(&self, source: &str) -> Option<String> {
        let cfg = self.sources.get(source)?;
        if let Some(var) = cfg.secret.strip_prefix("env:") {
            std::env::var(var).ok().filter(|v| !v.is_empty())
        } else {
            Some(cfg.secret.clone())
        }
    }
}

/// Mask a secret for display
///
/// Shows first N chars + asterisks, e.g. "whsec_***"
pub fn mask_secret(secret: &str, visible_chars: usize) -> String {
    if secret.is_empty() {
        return String::new();
    }

    let visible = secret.len().min(visible_chars);
    format!("{}***", &secret[..visible])
}
