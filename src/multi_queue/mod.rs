//! The multi-queue: a cache of filter readers organized by unit count.
//!
//! ```text
//!            MRU                      LRU
//! queues[0]  (readers with 0 units resident)
//! queues[1]  ┌───┐    ┌───┐    ┌───┐
//!            │ T7│───►│ T2│───►│ T9│   <- cold candidates scanned
//! queues[2]  └───┘    └───┘    └───┘      from the LRU end
//!   ...
//! queues[N]  (readers with all units resident)
//! ```
//!
//! A reader lives in the queue matching its resident unit count. Every probe
//! moves its node to the MRU end and may trigger an *adjustment*: when the
//! projected disk I/O of evicting one unit from each of a set of cold readers
//! and loading one more unit into the probed (hot) reader beats the status
//! quo, the units move. Hot tables sink toward the high queues, cold tables
//! drain toward `queues[0]`.

pub mod single_queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::file::RandomAccessFile;
use crate::filter_block::FilterBlockReader;
use crate::internal_key::{parse_internal_key, SequenceNumber};

use single_queue::{NodeArena, SingleQueue};

/// Ticket for a registered reader. Stale handles (after `erase`) resolve to
/// nothing; operations on them are no-ops or conservative answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHandle {
    index: usize,
    generation: u64,
}

/// Best-effort sink for adjustment events. Install with
/// [`MultiQueue::set_logger`]; without one, only `tracing` output is emitted.
pub trait QueueLogger: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards queue events to the global `tracing` subscriber.
pub struct TracingLogger;

impl QueueLogger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "ashbloom::multi_queue", "{message}");
    }
}

/// The surface the table layer programs against. [`MultiQueue`] is the real
/// implementation; [`InlineCache`] keeps readers inline with no adjustment
/// for engines that run with the queue disabled.
pub trait FilterCache: Send + Sync {
    fn insert(&self, key: &[u8], reader: Arc<FilterBlockReader>) -> CacheHandle;
    fn lookup(&self, key: &[u8]) -> Option<CacheHandle>;
    fn value(&self, handle: CacheHandle) -> Option<Arc<FilterBlockReader>>;
    fn update_handle(&self, handle: CacheHandle, internal_key: &[u8]);
    fn key_may_match(&self, handle: CacheHandle, block_offset: u64, key: &[u8]) -> bool;
    fn release(&self, handle: CacheHandle);
    fn erase(&self, key: &[u8]);
    fn total_charge(&self) -> usize;
    fn set_logger(&self, logger: Arc<dyn QueueLogger>);
    fn go_back_to_init(&self, handle: CacheHandle, file: Arc<dyn RandomAccessFile>)
        -> Result<()>;
}

struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    adjustments: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            adjustments: AtomicU64::new(0),
        }
    }
}

struct Inner {
    arena: NodeArena,
    /// One LRU list per possible unit count, `0..=max_units`.
    queues: Vec<SingleQueue>,
    index: HashMap<Vec<u8>, usize>,
    /// Bytes of resident filter units across registered readers.
    usage: usize,
    logger: Option<Arc<dyn QueueLogger>>,
}

impl Inner {
    fn resolve(&self, handle: CacheHandle) -> Option<usize> {
        self.arena
            .is_live(handle.index, handle.generation)
            .then_some(handle.index)
    }

    fn reader(&self, node: usize) -> Arc<FilterBlockReader> {
        Arc::clone(self.arena.node(node).reader.as_ref().expect("user node"))
    }

    fn handle_for(&self, node: usize) -> CacheHandle {
        CacheHandle {
            index: node,
            generation: self.arena.node(node).generation,
        }
    }

    /// Move a node into the queue for its new unit count, at the MRU end.
    fn rehome(&mut self, node: usize, to: usize) {
        let from = self.arena.node(node).queue;
        self.queues[from].remove(&mut self.arena, node);
        self.queues[to].push_mru(&mut self.arena, node);
    }

    fn unlink_and_release(&mut self, node: usize) {
        let queue = self.arena.node(node).queue;
        self.queues[queue].remove(&mut self.arena, node);
        self.arena.release(node);
    }
}

/// The adaptive filter cache. One mutex guards the queues, the key index and
/// the usage counter; reader-internal state has its own lock, always taken
/// after this one.
pub struct MultiQueue {
    max_units: usize,
    inner: Mutex<Inner>,
    stats: Stats,
}

impl MultiQueue {
    pub fn new(config: &FilterConfig) -> Self {
        let max_units = config.all_units as usize;
        let mut arena = NodeArena::new();
        let queues = (0..=max_units)
            .map(|i| SingleQueue::new(&mut arena, i))
            .collect();

        Self {
            max_units,
            inner: Mutex::new(Inner {
                arena,
                queues,
                index: HashMap::new(),
                usage: 0,
                logger: None,
            }),
            stats: Stats::new(),
        }
    }

    /// Register a reader. It lands in the queue matching its resident unit
    /// count, at the MRU end. A reader already registered under `key` is
    /// erased first.
    pub fn insert(&self, key: &[u8], reader: Arc<FilterBlockReader>) -> CacheHandle {
        // Waits for the initial background load; must happen before the
        // queue lock is taken.
        let resident = reader.filter_units_number();
        let charge = reader.size();

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if let Some(old) = inner.index.remove(key) {
            let old_charge = inner.reader(old).size();
            inner.usage = inner.usage.saturating_sub(old_charge);
            inner.unlink_and_release(old);
        }

        let node = inner.arena.alloc(key.to_vec(), Some(reader));
        inner.queues[resident.min(self.max_units)].push_mru(&mut inner.arena, node);
        inner.index.insert(key.to_vec(), node);
        inner.usage += charge;
        inner.handle_for(node)
    }

    /// O(1) index probe; no list movement.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheHandle> {
        let guard = self.inner.lock().unwrap();
        match guard.index.get(key) {
            Some(&node) => {
                self.stats.hits.fetch_add(1, Ordering::SeqCst);
                Some(guard.handle_for(node))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    pub fn value(&self, handle: CacheHandle) -> Option<Arc<FilterBlockReader>> {
        let guard = self.inner.lock().unwrap();
        guard.resolve(handle).map(|node| guard.reader(node))
    }

    /// Record an access: move the node to its queue's MRU end, advance the
    /// reader's hotness clock, and consider an adjustment.
    pub fn update_handle(&self, handle: CacheHandle, internal_key: &[u8]) {
        let sequence = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let node = match inner.resolve(handle) {
                Some(node) => node,
                None => return,
            };
            let queue = inner.arena.node(node).queue;
            inner.queues[queue].move_to_mru(&mut inner.arena, node);

            match parse_internal_key(internal_key) {
                Some(parsed) => {
                    inner.reader(node).update_state(parsed.sequence);
                    Some(parsed.sequence)
                }
                None => None,
            }
        };

        if let Some(sequence) = sequence {
            self.adjust(handle, sequence);
        }
    }

    /// The per-lookup fast path: `update_handle` followed by the reader's
    /// probe. A stale handle answers a conservative `true`.
    pub fn key_may_match(&self, handle: CacheHandle, block_offset: u64, key: &[u8]) -> bool {
        self.update_handle(handle, key);
        match self.value(handle) {
            Some(reader) => reader.key_may_match(block_offset, key),
            None => true,
        }
    }

    /// Best-effort drain of every resident unit; the node is re-homed into
    /// `queues[0]`. Never fails.
    pub fn release(&self, handle: CacheHandle) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let node = match inner.resolve(handle) {
            Some(node) => node,
            None => return,
        };

        let reader = inner.reader(node);
        let before = reader.size();
        while reader.evict_filter().is_ok() {}
        inner.usage = inner.usage.saturating_sub(before - reader.size());
        inner.rehome(node, 0);
    }

    /// Drop the registration under `key` and destroy its reader. Idempotent.
    pub fn erase(&self, key: &[u8]) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(node) = inner.index.remove(key) {
            let charge = inner.reader(node).size();
            inner.usage = inner.usage.saturating_sub(charge);
            inner.unlink_and_release(node);
        }
    }

    /// An estimate of the bytes of filter units held in memory across all
    /// registered readers. Exact at rest; adjustments in flight may skew it
    /// by a unit until they finish.
    pub fn total_charge(&self) -> usize {
        self.inner.lock().unwrap().usage
    }

    pub fn set_logger(&self, logger: Arc<dyn QueueLogger>) {
        self.inner.lock().unwrap().logger = Some(logger);
    }

    /// Successful adjustments so far.
    pub fn adjustment_count(&self) -> u64 {
        self.stats.adjustments.load(Ordering::SeqCst)
    }

    /// Lookup hits and misses.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.hits.load(Ordering::SeqCst),
            self.stats.misses.load(Ordering::SeqCst),
        )
    }

    /// Drive a reader back to its freshly-opened shape against a new file
    /// and re-home its node accordingly.
    pub fn go_back_to_init(
        &self,
        handle: CacheHandle,
        file: Arc<dyn RandomAccessFile>,
    ) -> Result<()> {
        let reader = {
            let guard = self.inner.lock().unwrap();
            match guard.resolve(handle) {
                Some(node) => guard.reader(node),
                None => {
                    return Err(Error::InvalidState(
                        "handle does not resolve to a registered reader".to_string(),
                    ))
                }
            }
        };

        let old_charge = reader.size();
        // File reads happen without the queue lock.
        let result = reader.go_back_to_init(file);

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(node) = inner.resolve(handle) {
            inner.usage = inner.usage.saturating_sub(old_charge) + reader.size();
            let to = reader.filter_units_number().min(self.max_units);
            inner.rehome(node, to);
        }
        result
    }

    /// Try to shift one unit of memory toward the freshly-touched handle.
    ///
    /// Victims are cold readers found from the LRU end of the fullest queues
    /// first. The move only happens when the projected I/O strictly drops.
    /// The queue lock is dropped around every unit load/evict; each victim is
    /// revalidated after the lock is retaken.
    fn adjust(&self, hot: CacheHandle, now: SequenceNumber) {
        let (hot_reader, victims) = {
            let guard = self.inner.lock().unwrap();
            let inner = &*guard;
            let hot_node = match inner.resolve(hot) {
                Some(node) => node,
                None => return,
            };
            let hot_reader = inner.reader(hot_node);
            if !hot_reader.can_be_loaded() {
                return;
            }

            let mut cold = Vec::new();
            let mut budget = hot_reader.unit_size() as i64;
            for queue in (1..=self.max_units).rev() {
                if budget <= 0 {
                    break;
                }
                budget = inner.queues[queue].find_cold(&inner.arena, budget, now, &mut cold);
            }
            if budget > 0 {
                // Not enough cold memory anywhere.
                return;
            }

            let mut original = 0.0;
            let mut adjusted = 0.0;
            for &node in &cold {
                let reader = inner.reader(node);
                if !reader.can_be_evicted() {
                    return;
                }
                original += reader.ios();
                adjusted += reader.evict_ios();
            }
            original += hot_reader.ios();
            adjusted += hot_reader.load_ios();
            if adjusted >= original {
                return;
            }

            let victims: Vec<(CacheHandle, Arc<FilterBlockReader>)> = cold
                .iter()
                .map(|&node| (inner.handle_for(node), inner.reader(node)))
                .collect();
            (hot_reader, victims)
        };

        self.stats.adjustments.fetch_add(1, Ordering::SeqCst);
        let victim_count = victims.len();

        for (victim, reader) in victims {
            let registered = {
                let guard = self.inner.lock().unwrap();
                guard.resolve(victim).is_some()
            };
            if !registered || !reader.can_be_evicted() {
                self.abort_adjustment("adjustment victim became unevictable");
                return;
            }

            if let Err(error) = reader.evict_filter() {
                self.abort_adjustment(&format!("adjustment eviction failed: {error}"));
                return;
            }

            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            if let Some(node) = inner.resolve(victim) {
                // Home by the observed unit count: a racing release or second
                // adjustment may have moved more units than we did.
                let to = reader.filter_units_number().min(self.max_units);
                inner.rehome(node, to);
                inner.usage = inner.usage.saturating_sub(reader.unit_size());
            }
        }

        if let Err(error) = hot_reader.load_filter() {
            // The evictions stand; usage already reflects them.
            self.abort_adjustment(&format!("adjustment load failed: {error}"));
            return;
        }

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(node) = inner.resolve(hot) {
            let to = hot_reader.filter_units_number().min(self.max_units);
            inner.rehome(node, to);
            inner.usage += hot_reader.unit_size();
        }
        if let Some(logger) = &inner.logger {
            logger.log(&format!(
                "adjustment: evicted one unit from {victim_count} cold reader(s), loaded one hot unit"
            ));
        }
    }

    fn abort_adjustment(&self, reason: &str) {
        self.stats.adjustments.fetch_sub(1, Ordering::SeqCst);
        tracing::warn!(target: "ashbloom::multi_queue", "{reason}");
        let guard = self.inner.lock().unwrap();
        if let Some(logger) = &guard.logger {
            logger.log(reason);
        }
    }

    /// Verify the cross-structure invariants. Test-only; takes the lock.
    #[cfg(test)]
    fn check_invariants(&self) {
        let guard = self.inner.lock().unwrap();
        let inner = &*guard;

        let mut seen = 0;
        let mut expected_usage = 0;
        for (count, queue) in inner.queues.iter().enumerate() {
            for node in queue.nodes(&inner.arena) {
                let entry = inner.arena.node(node);
                assert_eq!(entry.queue, count, "node homed in the wrong queue");
                let reader = entry.reader.as_ref().expect("sentinels never listed");
                assert_eq!(
                    reader.filter_units_number(),
                    count,
                    "resident unit count disagrees with queue index"
                );
                assert_eq!(inner.index.get(&entry.key), Some(&node), "index out of sync");
                expected_usage += reader.size();
                seen += 1;
            }
        }
        assert_eq!(seen, inner.index.len(), "index holds stale entries");
        assert_eq!(inner.usage, expected_usage, "usage accounting drifted");
    }
}

impl FilterCache for MultiQueue {
    fn insert(&self, key: &[u8], reader: Arc<FilterBlockReader>) -> CacheHandle {
        MultiQueue::insert(self, key, reader)
    }

    fn lookup(&self, key: &[u8]) -> Option<CacheHandle> {
        MultiQueue::lookup(self, key)
    }

    fn value(&self, handle: CacheHandle) -> Option<Arc<FilterBlockReader>> {
        MultiQueue::value(self, handle)
    }

    fn update_handle(&self, handle: CacheHandle, internal_key: &[u8]) {
        MultiQueue::update_handle(self, handle, internal_key)
    }

    fn key_may_match(&self, handle: CacheHandle, block_offset: u64, key: &[u8]) -> bool {
        MultiQueue::key_may_match(self, handle, block_offset, key)
    }

    fn release(&self, handle: CacheHandle) {
        MultiQueue::release(self, handle)
    }

    fn erase(&self, key: &[u8]) {
        MultiQueue::erase(self, key)
    }

    fn total_charge(&self) -> usize {
        MultiQueue::total_charge(self)
    }

    fn set_logger(&self, logger: Arc<dyn QueueLogger>) {
        MultiQueue::set_logger(self, logger)
    }

    fn go_back_to_init(
        &self,
        handle: CacheHandle,
        file: Arc<dyn RandomAccessFile>,
    ) -> Result<()> {
        MultiQueue::go_back_to_init(self, handle, file)
    }
}

/// Null-object cache for engines that run with the multi-queue disabled:
/// readers stay inline with identical probe semantics, but there is no LRU
/// bookkeeping and no adjustment.
pub struct InlineCache {
    inner: Mutex<InlineInner>,
}

struct InlineInner {
    entries: Vec<Option<(Vec<u8>, Arc<FilterBlockReader>, u64)>>,
    index: HashMap<Vec<u8>, usize>,
    free: Vec<usize>,
    next_generation: u64,
}

impl InlineCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InlineInner {
                entries: Vec::new(),
                index: HashMap::new(),
                free: Vec::new(),
                next_generation: 1,
            }),
        }
    }
}

impl Default for InlineCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InlineInner {
    fn resolve(&self, handle: CacheHandle) -> Option<&Arc<FilterBlockReader>> {
        match self.entries.get(handle.index) {
            Some(Some((_, reader, generation))) if *generation == handle.generation => {
                Some(reader)
            }
            _ => None,
        }
    }
}

impl FilterCache for InlineCache {
    fn insert(&self, key: &[u8], reader: Arc<FilterBlockReader>) -> CacheHandle {
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.index.remove(key) {
            inner.entries[old] = None;
            inner.free.push(old);
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let entry = Some((key.to_vec(), reader, generation));
        let index = match inner.free.pop() {
            Some(index) => {
                inner.entries[index] = entry;
                index
            }
            None => {
                inner.entries.push(entry);
                inner.entries.len() - 1
            }
        };
        inner.index.insert(key.to_vec(), index);
        CacheHandle { index, generation }
    }

    fn lookup(&self, key: &[u8]) -> Option<CacheHandle> {
        let inner = self.inner.lock().unwrap();
        let &index = inner.index.get(key)?;
        let (_, _, generation) = inner.entries[index].as_ref()?;
        Some(CacheHandle {
            index,
            generation: *generation,
        })
    }

    fn value(&self, handle: CacheHandle) -> Option<Arc<FilterBlockReader>> {
        self.inner.lock().unwrap().resolve(handle).cloned()
    }

    fn update_handle(&self, handle: CacheHandle, internal_key: &[u8]) {
        if let (Some(reader), Some(parsed)) =
            (self.value(handle), parse_internal_key(internal_key))
        {
            reader.update_state(parsed.sequence);
        }
    }

    fn key_may_match(&self, handle: CacheHandle, block_offset: u64, key: &[u8]) -> bool {
        match self.value(handle) {
            Some(reader) => reader.key_may_match(block_offset, key),
            None => true,
        }
    }

    fn release(&self, handle: CacheHandle) {
        if let Some(reader) = self.value(handle) {
            while reader.evict_filter().is_ok() {}
        }
    }

    fn erase(&self, key: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(index) = inner.index.remove(key) {
            inner.entries[index] = None;
            inner.free.push(index);
        }
    }

    fn total_charge(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .flatten()
            .map(|(_, reader, _)| reader.size())
            .sum()
    }

    fn set_logger(&self, _logger: Arc<dyn QueueLogger>) {}

    fn go_back_to_init(
        &self,
        handle: CacheHandle,
        file: Arc<dyn RandomAccessFile>,
    ) -> Result<()> {
        match self.value(handle) {
            Some(reader) => reader.go_back_to_init(file),
            None => Err(Error::InvalidState(
                "handle does not resolve to a registered reader".to_string(),
            )),
        }
    }
}
