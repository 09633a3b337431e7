//! The two-level sharded prefix-cache index.
//!
//! Level 1 maps `(model, adapter)` to a `ModelContext`; level 2, inside
//! each context, maps a block hash to the set of pods holding that block.
//! Both levels are backed by `DashMap`, whose internal shard table already
//! gives us "N power-of-two shards, per-shard lock, shard picked from the
//! low bits of the key's hash" for free — callers never see the shard
//! index directly.

use crate::error::{Result, SyncError};
use crate::hashing::chunk_and_hash_chain;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity for a pod: `namespace/name`.
pub type PodKey = Arc<str>;

/// Level-1 key: a model name plus its (optional) LoRA adapter id.
///
/// Adapter id defaults to `-1`, which the wire contract overloads to mean
/// both "no adapter" and "malformed adapter label" (§9 open question 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    /// Model name.
    pub model: Arc<str>,
    /// Adapter id, or `-1` for none/unknown.
    pub adapter: i64,
}

impl ModelKey {
    /// Build a model key.
    pub fn new(model: impl Into<Arc<str>>, adapter: i64) -> Self {
        Self {
            model: model.into(),
            adapter,
        }
    }
}

/// A single cached prefix block.
pub struct PrefixBlock {
    /// The engine-assigned hash of this block.
    pub hash: u64,
    /// Hash of the block's parent, if any. Set once at creation; never
    /// overwritten afterward ("first writer wins", §4.4).
    pub parent_hash: Option<u64>,
    pod_set: RwLock<HashSet<PodKey>>,
    last_access: AtomicU64,
}

impl PrefixBlock {
    fn new(hash: u64, parent_hash: Option<u64>, tick: u64) -> Self {
        Self {
            hash,
            parent_hash,
            pod_set: RwLock::new(HashSet::new()),
            last_access: AtomicU64::new(tick),
        }
    }

    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Whether `pod` currently holds this block.
    #[must_use]
    pub fn holds(&self, pod: &str) -> bool {
        self.pod_set.read().contains(pod)
    }

    /// Number of pods currently holding this block.
    #[must_use]
    pub fn pod_count(&self) -> usize {
        self.pod_set.read().len()
    }
}

/// Root of the prefix index for one `(model, adapter)` pair.
pub struct ModelContext {
    key: ModelKey,
    blocks: DashMap<u64, PrefixBlock>,
    last_access: AtomicU64,
}

impl ModelContext {
    fn new(key: ModelKey, shard_amount: usize, tick: u64) -> Self {
        Self {
            key,
            blocks: DashMap::with_shard_amount(shard_amount),
            last_access: AtomicU64::new(tick),
        }
    }

    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    /// Number of blocks currently tracked in this context.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The `(model, adapter)` identity of this context.
    #[must_use]
    pub fn key(&self) -> &ModelKey {
        &self.key
    }
}

/// The result of a `match_prefix` query.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrefixMatch {
    /// Pod key -> percentage (0-100) of the matched chain it holds.
    pub matches: HashMap<PodKey, u8>,
    /// The full chain of hit hashes (length `L`, the number of index hits
    /// before the first miss).
    pub prefix_hashes: Vec<u64>,
}

/// The two-level sharded prefix-cache index.
pub struct PrefixIndex {
    contexts: DashMap<ModelKey, Arc<ModelContext>>,
    level2_shards: usize,
    clock: AtomicU64,
}

impl Default for PrefixIndex {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

impl PrefixIndex {
    /// Create an index with the given level-1 and level-2 shard counts.
    /// Both should be powers of two; `DashMap` rounds up otherwise.
    #[must_use]
    pub fn new(level1_shards: usize, level2_shards: usize) -> Self {
        Self {
            contexts: DashMap::with_shard_amount(level1_shards.max(1)),
            level2_shards: level2_shards.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn context(&self, model: &str, adapter: i64) -> Arc<ModelContext> {
        let key = ModelKey::new(model, adapter);
        let tick = self.tick();
        self.contexts
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ModelContext::new(key, self.level2_shards, tick)))
            .clone()
    }

    /// Number of model contexts currently tracked.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// `ProcessBlockStored`: record that `pod_key` now holds each of
    /// `block_hashes`, in order, chained off `parent_block_hash` for the
    /// first hash and off the previous hash for the rest.
    pub fn process_block_stored(
        &self,
        model: &str,
        adapter: i64,
        pod_key: &str,
        block_hashes: &[u64],
        parent_block_hash: Option<u64>,
    ) -> Result<()> {
        let ctx = self.context(model, adapter);
        let tick = self.tick();
        ctx.touch(tick);

        let mut parent = parent_block_hash;
        for &hash in block_hashes {
            let entry = ctx
                .blocks
                .entry(hash)
                .or_insert_with(|| PrefixBlock::new(hash, parent, tick));
            entry.pod_set.write().insert(Arc::from(pod_key));
            entry.touch(tick);
            parent = Some(hash);
        }
        Ok(())
    }

    /// `ProcessBlockRemoved`: drop `pod_key` from each listed block's pod
    /// set; delete blocks that become empty. Children are not cascaded.
    pub fn process_block_removed(
        &self,
        model: &str,
        adapter: i64,
        pod_key: &str,
        hashes: &[u64],
    ) -> Result<()> {
        let ctx = self.context(model, adapter);
        for &hash in hashes {
            let empty = if let Some(block) = ctx.blocks.get(&hash) {
                block.pod_set.write().remove(pod_key);
                block.pod_set.read().is_empty()
            } else {
                false
            };
            if empty {
                ctx.blocks.remove(&hash);
            }
        }
        Ok(())
    }

    /// `ProcessAllCleared`: drop `pod_key` from every block in the
    /// context; delete blocks whose set becomes empty.
    pub fn process_all_cleared(&self, model: &str, adapter: i64, pod_key: &str) -> Result<()> {
        let ctx = self.context(model, adapter);
        let mut to_remove = Vec::new();
        for entry in ctx.blocks.iter() {
            let empty = {
                let mut set = entry.pod_set.write();
                set.remove(pod_key);
                set.is_empty()
            };
            if empty {
                to_remove.push(*entry.key());
            }
        }
        for hash in to_remove {
            ctx.blocks.remove(&hash);
        }
        Ok(())
    }

    /// `AddPrefix`: proactively associate `pod_key` with already-computed
    /// hashes (e.g. a routing decision made before the pod's own event
    /// confirms it). Blocks created here carry no parent-hash information.
    pub fn add_prefix(&self, model: &str, adapter: i64, pod_key: &str, hashes: &[u64]) -> Result<()> {
        if hashes.is_empty() {
            return Err(SyncError::dispatch("add_prefix called with no hashes"));
        }
        let ctx = self.context(model, adapter);
        let tick = self.tick();
        for &hash in hashes {
            let entry = ctx
                .blocks
                .entry(hash)
                .or_insert_with(|| PrefixBlock::new(hash, None, tick));
            entry.pod_set.write().insert(Arc::from(pod_key));
            entry.touch(tick);
        }
        Ok(())
    }

    /// `GetPrefixHashes`: the chain of block hashes for `tokens`, without
    /// probing the index. Deterministic for a fixed block size.
    #[must_use]
    pub fn get_prefix_hashes(tokens: &[i32], block_size: usize) -> Vec<u64> {
        chunk_and_hash_chain(tokens, block_size)
    }

    /// `MatchPrefix`: walk the hash chain for `tokens`, stopping at the
    /// first block the index has never seen; for every ready pod present
    /// in at least one of the hit blocks, compute the percentage of hit
    /// blocks it holds.
    #[must_use]
    pub fn match_prefix(
        &self,
        model: &str,
        adapter: i64,
        tokens: &[i32],
        ready_pods: &HashSet<PodKey>,
        block_size: usize,
    ) -> PrefixMatch {
        let ctx = self.context(model, adapter);
        let chain = chunk_and_hash_chain(tokens, block_size);
        let tick = self.tick();

        let mut hit_hashes = Vec::new();
        let mut per_pod_hits: HashMap<PodKey, u32> = HashMap::new();

        for hash in chain {
            let Some(block) = ctx.blocks.get(&hash) else {
                break;
            };
            block.touch(tick);
            for pod in block.pod_set.read().iter() {
                if ready_pods.contains(pod) {
                    *per_pod_hits.entry(pod.clone()).or_insert(0) += 1;
                }
            }
            hit_hashes.push(hash);
        }

        let l = hit_hashes.len() as u32;
        let matches = if l == 0 {
            HashMap::new()
        } else {
            per_pod_hits
                .into_iter()
                .map(|(pod, hits)| (pod, ((100 * hits) / l) as u8))
                .collect()
        };

        PrefixMatch {
            matches,
            prefix_hashes: hit_hashes,
        }
    }

    /// Periodic eviction sweep (§4.4). Evicts least-recently-accessed
    /// blocks per context down to `max_prefixes_per_context`, then
    /// least-recently-accessed contexts down to `max_contexts`.
    pub fn sweep(&self, max_contexts: usize, max_prefixes_per_context: usize) {
        for entry in self.contexts.iter() {
            let ctx = entry.value();
            let over = ctx.blocks.len().saturating_sub(max_prefixes_per_context);
            if over == 0 {
                continue;
            }
            let mut by_age: Vec<(u64, u64)> = ctx
                .blocks
                .iter()
                .map(|b| (b.last_access(), *b.key()))
                .collect();
            by_age.sort_unstable_by_key(|(age, _)| *age);
            for (_, hash) in by_age.into_iter().take(over) {
                ctx.blocks.remove(&hash);
            }
        }

        while self.contexts.len() > max_contexts {
            let oldest = self
                .contexts
                .iter()
                .min_by_key(|e| e.value().last_access.load(Ordering::Relaxed))
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.contexts.remove(&key);
                }
                None => break,
            }
        }
    }
}
