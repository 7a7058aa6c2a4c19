// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`BackingStore`] for tests, demos and single-process setups.
//!
//! Expiry is lazy: an expired entry is dropped the next time it is touched.
//! SCAN walks a sorted key snapshot taken on cursor 0, so deleting keys
//! mid-scan never makes it skip others. The cursor packs the snapshot id
//! and an offset. A scan abandoned before its last page keeps its snapshot
//! until it goes stale ([`SCAN_SNAPSHOT_TTL`]) or is pushed out by newer
//! scans past [`MAX_OPEN_SCANS`]; continuing it after that ends the scan.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::traits::{BackingStore, BatchOp, KeyMetadata, NodeInfo, ScanPage, ServerStats, StorageError, WriteBatch};

/// Snapshots of unfinished scans older than this are dropped.
pub const SCAN_SNAPSHOT_TTL: Duration = Duration::from_secs(300);

/// Unfinished scans kept at once; the oldest goes first.
pub const MAX_OPEN_SCANS: usize = 64;

#[derive(Debug)]
struct ScanSnapshot {
    keys: Vec<String>,
    started: Instant,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    created_at_ms: u64,
    last_access_ms: u64,
    access_count: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct InMemoryStore {
    data: DashMap<String, Entry>,
    nodes: RwLock<Vec<NodeInfo>>,
    batches_executed: AtomicU64,
    closed: AtomicBool,
    /// Key snapshots of in-progress scans, by scan id
    scans: Mutex<HashMap<u64, ScanSnapshot>>,
    next_scan: AtomicU64,
    scan_ttl: Duration,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_nodes(vec![NodeInfo {
            id: "memory-0".to_string(),
            address: "memory".to_string(),
            weight: 1,
            healthy: true,
        }])
    }

    /// A store reporting the given cluster membership.
    #[must_use]
    pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
        Self {
            data: DashMap::new(),
            nodes: RwLock::new(nodes),
            batches_executed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            scans: Mutex::new(HashMap::new()),
            next_scan: AtomicU64::new(1),
            scan_ttl: SCAN_SNAPSHOT_TTL,
        }
    }

    /// Override how long an unfinished scan keeps its snapshot.
    #[must_use]
    pub fn with_scan_ttl(mut self, ttl: Duration) -> Self {
        self.scan_ttl = ttl;
        self
    }

    /// Scans started but not yet run to their last page.
    #[must_use]
    pub fn open_scans(&self) -> usize {
        self.scans.lock().len()
    }

    /// Replace the reported topology.
    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.write() = nodes;
    }

    /// Flip one node's health flag. Returns false if the node is unknown.
    pub fn set_node_health(&self, id: &str, healthy: bool) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.healthy = healthy;
                true
            }
            None => false,
        }
    }

    /// Get current entry count, expired entries included until touched
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw stored bytes, bypassing expiry bookkeeping.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.live(key, Instant::now(), false)
    }

    /// Number of [`BackingStore::exec_batch`] calls served.
    #[must_use]
    pub fn batches_executed(&self) -> u64 {
        self.batches_executed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Value of a live entry. `touch` counts the read as an access.
    fn live(&self, key: &str, now: Instant, touch: bool) -> Option<Vec<u8>> {
        let expired = match self.data.get_mut(key) {
            None => return None,
            Some(mut entry) if !entry.is_expired(now) => {
                if touch {
                    entry.access_count += 1;
                    entry.last_access_ms = crate::unix_millis();
                }
                return Some(entry.value.clone());
            }
            Some(_) => true,
        };
        if expired {
            self.data.remove_if(key, |_, e| e.is_expired(now));
        }
        None
    }

    fn put(&self, key: &str, value: &[u8], ttl: Duration) {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        let now_ms = crate::unix_millis();
        self.data.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
                created_at_ms: now_ms,
                last_access_ms: now_ms,
                access_count: 0,
            },
        );
    }

    fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data.remove(key).is_some_and(|(_, e)| !e.is_expired(now))
    }

    fn set_expiry(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.data.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.live(key, Instant::now(), true))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        self.put(key, value, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StorageError> {
        Ok(keys.iter().filter(|k| self.remove(k)).count() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.live(key, Instant::now(), false).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        Ok(self.set_expiry(key, ttl))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let now = Instant::now();
        Ok(self
            .data
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StorageError> {
        let now = Instant::now();
        let (id, offset) = if cursor == 0 {
            let mut keys: Vec<String> = self
                .data
                .iter()
                .filter(|e| !e.value().is_expired(now) && glob_match(pattern, e.key()))
                .map(|e| e.key().clone())
                .collect();
            keys.sort_unstable();
            let id = self.next_scan.fetch_add(1, Ordering::Relaxed);
            let mut scans = self.scans.lock();
            evict_scans(&mut scans, now, self.scan_ttl);
            scans.insert(id, ScanSnapshot { keys, started: now });
            (id, 0)
        } else {
            (cursor >> 32, (cursor & 0xFFFF_FFFF) as usize)
        };

        let mut scans = self.scans.lock();
        let Some(snapshot) = scans.get(&id).map(|s| &s.keys) else {
            return Ok(ScanPage::default());
        };
        let start = offset.min(snapshot.len());
        let end = start.saturating_add(count.max(1)).min(snapshot.len());
        // Keys deleted since the snapshot was taken are skipped
        let keys: Vec<String> = snapshot[start..end]
            .iter()
            .filter(|k| self.data.get(k.as_str()).is_some_and(|e| !e.is_expired(now)))
            .cloned()
            .collect();

        let next = if end >= snapshot.len() {
            scans.remove(&id);
            0
        } else {
            (id << 32) | end as u64
        };
        Ok(ScanPage { keys, cursor: next })
    }

    async fn exec_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value, ttl } => self.put(&key, &value, ttl),
                BatchOp::Del { key } => {
                    self.remove(&key);
                }
                BatchOp::Expire { key, ttl } => {
                    self.set_expiry(&key, ttl);
                }
            }
        }
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::Unavailable("store closed".into()));
        }
        Ok(())
    }

    async fn cluster_topology(&self) -> Result<Vec<NodeInfo>, StorageError> {
        Ok(self.nodes.read().clone())
    }

    async fn server_stats(&self) -> Result<ServerStats, StorageError> {
        let used: usize = self.data.iter().map(|e| e.key().len() + e.value().value.len()).sum();
        Ok(ServerStats {
            memory_used_bytes: Some(used as u64),
            evicted_keys: Some(0),
            connections: 1,
        })
    }

    async fn key_metadata(&self, key: &str) -> Result<Option<KeyMetadata>, StorageError> {
        let now = Instant::now();
        Ok(self.data.get(key).filter(|e| !e.is_expired(now)).map(|e| KeyMetadata {
            created_at_ms: Some(e.created_at_ms),
            last_access_ms: Some(e.last_access_ms),
            access_count: Some(e.access_count),
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Drop stale snapshots, then the oldest ones until a new scan fits.
fn evict_scans(scans: &mut HashMap<u64, ScanSnapshot>, now: Instant, ttl: Duration) {
    scans.retain(|_, snapshot| now.duration_since(snapshot.started) < ttl);
    while scans.len() >= MAX_OPEN_SCANS {
        let Some(oldest) = scans.iter().min_by_key(|(id, s)| (s.started, **id)).map(|(id, _)| *id) else {
            break;
        };
        scans.remove(&oldest);
    }
}

/// Redis-style glob: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Backtrack point for the most recent `*`
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    } else if t[ti] == '[' {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Match `c` against the class starting at `p[start] == '['`.
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] { (p[i], p[i + 2]) } else { (p[i + 2], p[i]) };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }
    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
