//! Content-addressed cache for expensive action outputs
//!
//! Namespaced K/V with per-namespace TTL and byte budgets. Keys hash the
//! canonical inputs together with the namespace's schema version, so a
//! schema bump implicitly invalidates old entries. Reads go through
//! [`Cache::get_or_compute`], which coalesces concurrent identical keys to
//! one in-flight execution (per-key `tokio::sync::OnceCell`).
//!
//! Writes are best-effort: a failed write never fails the call. Eviction is
//! LRU by last read; an entry with an active single-flight cell is never
//! evicted. An optional disk root persists entries as
//! `<root>/<namespace>/<shard>/<key>` with tmp-file + atomic rename.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::Result;
use crate::util::canon::content_key;
use crate::util::constants;

/// Per-namespace tuning.
#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    pub ttl: Duration,
    pub byte_budget: u64,
    /// Bumping this invalidates every key in the namespace.
    pub schema_version: u32,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            ttl: constants::CACHE_TTL,
            byte_budget: constants::CACHE_BYTE_BUDGET,
            schema_version: 1,
        }
    }
}

/// Serialized entry header for disk persistence.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    written_at_epoch_ms: u64,
    schema_version: u32,
    value: Value,
}

struct StoredEntry {
    value: Arc<Value>,
    written_at_epoch_ms: u64,
    last_read_epoch_ms: AtomicU64,
    size_bytes: u64,
}

struct Namespace {
    name: String,
    config: NamespaceConfig,
    entries: DashMap<String, StoredEntry>,
    bytes: AtomicU64,
    /// Single-flight cells per key; present only while a computation is in
    /// flight (or just completed and not yet swept).
    flights: DashMap<String, Arc<OnceCell<Arc<Value>>>>,
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Namespace {
    fn new(name: String, config: NamespaceConfig) -> Self {
        Self {
            name,
            config,
            entries: DashMap::new(),
            bytes: AtomicU64::new(0),
            flights: DashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Arc<Value>> {
        let now = epoch_ms();
        let ttl_ms = self.config.ttl.as_millis() as u64;
        if let Some(entry) = self.entries.get(key) {
            if now.saturating_sub(entry.written_at_epoch_ms) < ttl_ms {
                entry.last_read_epoch_ms.store(now, Ordering::Relaxed);
                return Some(Arc::clone(&entry.value));
            }
        }
        // Expired: drop it so the byte accounting stays honest
        if let Some((_, old)) = self
            .entries
            .remove_if(key, |_, e| now.saturating_sub(e.written_at_epoch_ms) >= ttl_ms)
        {
            self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        None
    }

    fn put(&self, key: String, value: Arc<Value>) {
        let size = value.to_string().len() as u64;
        let now = epoch_ms();
        let entry = StoredEntry {
            value,
            written_at_epoch_ms: now,
            last_read_epoch_ms: AtomicU64::new(now),
            size_bytes: size,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.bytes.fetch_add(size, Ordering::Relaxed);
        self.evict_to_budget();
    }

    /// Evict least-recently-read entries until under the byte budget.
    /// Entries with an active flight cell are skipped.
    fn evict_to_budget(&self) {
        while self.bytes.load(Ordering::Relaxed) > self.config.byte_budget {
            let victim = self
                .entries
                .iter()
                .filter(|e| !self.flights.contains_key(e.key()))
                .min_by_key(|e| e.last_read_epoch_ms.load(Ordering::Relaxed))
                .map(|e| e.key().clone());

            let Some(key) = victim else { break };
            if let Some((_, old)) = self.entries.remove(&key) {
                self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
                debug!(namespace = %self.name, key = %key, "evicted cache entry");
            } else {
                break;
            }
        }
    }

    fn purge_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if let Some((_, old)) = self.entries.remove(&key) {
                self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
                removed += 1;
            }
        }
        removed
    }
}

/// Process-wide namespaced cache shared by all runs.
pub struct Cache {
    namespaces: DashMap<String, Arc<Namespace>>,
    configs: DashMap<String, NamespaceConfig>,
    disk_root: Option<PathBuf>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            configs: DashMap::new(),
            disk_root: None,
        }
    }

    /// Persist entries under `<root>/<namespace>/<shard>/<key>`.
    pub fn with_disk_root(mut self, root: PathBuf) -> Self {
        self.disk_root = Some(root);
        self
    }

    /// Configure a namespace before first use.
    pub fn configure_namespace(&self, name: &str, config: NamespaceConfig) {
        self.configs.insert(name.to_string(), config);
    }

    /// Bump a namespace's schema version, invalidating all existing keys.
    pub fn bump_schema_version(&self, name: &str) {
        let mut config = self
            .configs
            .get(name)
            .map(|c| c.clone())
            .unwrap_or_default();
        config.schema_version += 1;
        self.configs.insert(name.to_string(), config.clone());
        // Replace the live namespace; readers holding the old Arc drain out
        self.namespaces.insert(
            name.to_string(),
            Arc::new(Namespace::new(name.to_string(), config)),
        );
    }

    fn namespace(&self, name: &str) -> Arc<Namespace> {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .configs
                    .get(name)
                    .map(|c| c.clone())
                    .unwrap_or_default();
                Arc::new(Namespace::new(name.to_string(), config))
            })
            .clone()
    }

    /// Schema version currently active for a namespace.
    pub fn schema_version(&self, name: &str) -> u32 {
        self.namespace(name).config.schema_version
    }

    /// The content-addressed key this cache would use for the inputs.
    pub fn key_for(&self, namespace: &str, inputs: &Value) -> String {
        let ns = self.namespace(namespace);
        content_key(namespace, ns.config.schema_version, inputs)
    }

    /// Direct lookup (memory, then disk).
    pub fn get(&self, namespace: &str, inputs: &Value) -> Option<Arc<Value>> {
        let ns = self.namespace(namespace);
        let key = content_key(namespace, ns.config.schema_version, inputs);
        if let Some(v) = ns.get(&key) {
            return Some(v);
        }
        self.disk_get(&ns, &key)
    }

    /// Direct best-effort write.
    pub fn put(&self, namespace: &str, inputs: &Value, value: Value) {
        let ns = self.namespace(namespace);
        let key = content_key(namespace, ns.config.schema_version, inputs);
        let value = Arc::new(value);
        ns.put(key.clone(), Arc::clone(&value));
        self.disk_put(&ns, &key, &value);
    }

    /// Read-through with single-flight coalescing.
    ///
    /// Returns `(value, cache_hit)`; joiners of an in-flight computation
    /// count as hits. The computation result is written best-effort; a
    /// failed computation caches nothing and later callers retry.
    pub async fn get_or_compute<F, Fut>(
        &self,
        namespace: &str,
        inputs: &Value,
        compute: F,
    ) -> Result<(Arc<Value>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let ns = self.namespace(namespace);
        let key = content_key(namespace, ns.config.schema_version, inputs);

        if let Some(v) = ns.get(&key) {
            return Ok((v, true));
        }
        if let Some(v) = self.disk_get(&ns, &key) {
            return Ok((v, true));
        }

        let cell = ns
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut ran = false;
        let result = cell
            .get_or_try_init(|| {
                ran = true;
                async { compute().await.map(Arc::new) }
            })
            .await
            .cloned();

        match result {
            Ok(value) => {
                if ran {
                    ns.put(key.clone(), Arc::clone(&value));
                    self.disk_put(&ns, &key, &value);
                }
                ns.flights.remove(&key);
                Ok((value, !ran))
            }
            Err(e) => {
                ns.flights.remove(&key);
                Err(e)
            }
        }
    }

    /// Purge entries whose key starts with `prefix` in one namespace.
    pub fn purge_prefix(&self, namespace: &str, prefix: &str) -> usize {
        self.namespace(namespace).purge_prefix(prefix)
    }

    /// Bytes currently held by a namespace.
    pub fn namespace_bytes(&self, namespace: &str) -> u64 {
        self.namespace(namespace).bytes.load(Ordering::Relaxed)
    }

    fn disk_path(&self, ns: &Namespace, key: &str) -> Option<PathBuf> {
        let root = self.disk_root.as_ref()?;
        let shard = &key[..2.min(key.len())];
        Some(root.join(&ns.name).join(shard).join(key))
    }

    fn disk_get(&self, ns: &Arc<Namespace>, key: &str) -> Option<Arc<Value>> {
        let path = self.disk_path(ns, key)?;
        let bytes = std::fs::read(&path).ok()?;
        let entry: DiskEntry = serde_json::from_slice(&bytes).ok()?;
        if entry.schema_version != ns.config.schema_version {
            return None;
        }
        let ttl_ms = ns.config.ttl.as_millis() as u64;
        if epoch_ms().saturating_sub(entry.written_at_epoch_ms) >= ttl_ms {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        let value = Arc::new(entry.value);
        ns.put(key.to_string(), Arc::clone(&value));
        Some(value)
    }

    fn disk_put(&self, ns: &Arc<Namespace>, key: &str, value: &Arc<Value>) {
        let Some(path) = self.disk_path(ns, key) else {
            return;
        };
        let entry = DiskEntry {
            written_at_epoch_ms: epoch_ms(),
            schema_version: ns.config.schema_version,
            value: (**value).clone(),
        };
        // Best-effort: log and carry on; a cache write must never fail the call
        if let Err(e) = write_atomic(&path, &entry) {
            warn!(namespace = %ns.name, key = %key, "cache disk write failed: {}", e);
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Crash-safe write: serialize to a temp file in the same directory, then
/// atomically rename into place.
fn write_atomic(path: &std::path::Path, entry: &DiskEntry) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("no parent dir"))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("entry")
    ));
    let bytes = serde_json::to_vec(entry).map_err(std::io::Error::other)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
