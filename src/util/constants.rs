//! Centralized constants for orchestrator runtime configuration
//!
//! All timeout and limit values in one place for easy tuning. Most have a
//! matching override in `AutoPrConfig`; these are the compiled-in defaults.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
// Run / step timing
// ═══════════════════════════════════════════════════════════════

/// Wall-clock deadline for a whole run
pub const RUN_DEADLINE: Duration = Duration::from_secs(600); // 10 minutes

/// Default per-step timeout when the workflow does not set one
pub const STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for synchronous CPU work inside a step before it must be offloaded
pub const CPU_BUDGET_PER_STEP: Duration = Duration::from_millis(250);

/// How long a run waits for the per-PR lock before failing with PrBusy
pub const PR_LOCK_WAIT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════
// Ingress
// ═══════════════════════════════════════════════════════════════

/// Window during which identical dedup keys collapse to one run
pub const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Bounded run-queue capacity before the ingress returns 503
pub const QUEUE_CAPACITY: usize = 256;

/// Retry-After advertised when the queue is full
pub const QUEUE_RETRY_AFTER: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════════════════════════
// Concurrency
// ═══════════════════════════════════════════════════════════════

/// Independent steps running concurrently within one run
pub const INTRA_RUN_PARALLELISM: usize = 4;

/// Worker pool size pulling WorkItems off the queue
pub const WORKER_COUNT: usize = 4;

// ═══════════════════════════════════════════════════════════════
// Detection
// ═══════════════════════════════════════════════════════════════

/// Confidence at or above which a platform counts as detected
pub const DETECT_THRESHOLD: f64 = 0.30;

// ═══════════════════════════════════════════════════════════════
// Caching
// ═══════════════════════════════════════════════════════════════

/// Default TTL for cache namespaces that do not configure one
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default per-namespace byte budget
pub const CACHE_BYTE_BUDGET: u64 = 64 * 1024 * 1024; // 64 MiB
