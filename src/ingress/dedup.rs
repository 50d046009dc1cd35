//! In-memory dedup set with TTL.
//!
//! At-most-one enqueue per dedup key per window; replayed events inside the
//! window are answered with the original run id. Expired entries are purged
//! lazily on access.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct DedupEntry {
    run_id: String,
    inserted: Instant,
}

/// TTL-bounded dedup window keyed by `WorkItem::dedup_key`.
#[derive(Debug)]
pub struct DedupWindow {
    entries: DashMap<String, DedupEntry>,
    ttl: Duration,
}

impl DedupWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Return the run id already recorded for this key, if it is still
    /// inside the window. Expired entries are removed.
    pub fn check(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.inserted.elapsed() < self.ttl {
                return Some(entry.run_id.clone());
            }
        }
        self.entries
            .remove_if(key, |_, e| e.inserted.elapsed() >= self.ttl);
        None
    }

    /// Record a fresh key → run id mapping. Also sweeps expired entries so
    /// the map stays bounded under sustained traffic.
    pub fn record(&self, key: String, run_id: String) {
        self.entries.retain(|_, e| e.inserted.elapsed() < self.ttl);
        self.entries.insert(
            key,
            DedupEntry {
                run_id,
                inserted: Instant::now(),
            },
        );
    }

    /// Number of live (possibly expired-but-unswept) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_key_is_absent() {
        let window = DedupWindow::new(Duration::from_secs(60));
        assert!(window.check("k1").is_none());
    }

    #[test]
    fn test_recorded_key_found_within_window() {
        let window = DedupWindow::new(Duration::from_secs(60));
        window.record("k1".into(), "run-1".into());
        assert_eq!(window.check("k1").as_deref(), Some("run-1"));
    }

    #[test]
    fn test_expired_key_is_absent() {
        let window = DedupWindow::new(Duration::from_millis(10));
        window.record("k1".into(), "run-1".into());
        std::thread::sleep(Duration::from_millis(20));
        assert!(window.check("k1").is_none());
    }

    #[test]
    fn test_record_sweeps_expired_entries() {
        let window = DedupWindow::new(Duration::from_millis(10));
        window.record("k1".into(), "run-1".into());
        window.record("k2".into(), "run-2".into());
        std::thread::sleep(Duration::from_millis(20));
        window.record("k3".into(), "run-3".into());
        assert_eq!(window.len(), 1);
    }
}
