use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use byteorder::{ByteOrder, LittleEndian};

use super::HEADER_TAIL_SIZE;
use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::file::{verify_unit, RandomAccessFile, BLOCK_TRAILER_SIZE};
use crate::internal_key::{parse_internal_key, SequenceNumber};
use crate::loader::LoadScheduler;
use crate::policy::FilterPolicy;

/// Lifecycle of the initial background load.
///
/// Only `Ready` permits load/evict. `Corrupt` is terminal: every probe
/// answers a conservative `true` and the engine falls back to reading the
/// data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Pending,
    Ready,
    Corrupt,
}

struct ReaderState {
    file: Arc<dyn RandomAccessFile>,
    /// Resident unit bitmaps, always the prefix `[0, k)` of the on-disk
    /// sequence. Loading and evicting both happen at the high end, so a probe
    /// is a plain loop over this vector.
    units: Vec<Vec<u8>>,
    init: InitState,
}

/// Reads one table's multi-unit filter block, paging units in and out of
/// memory at runtime.
///
/// Construction parses the header and schedules the initial unit load on the
/// shared background worker; the first probe waits for that job. All probes
/// update the reader's hotness clock, which the multi-queue consults when
/// choosing adjustment victims.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,

    /// Start of each data block's region within one unit.
    offsets: Vec<u32>,
    disk_offset: u64,
    unit_size: u32,
    init_units: u32,
    all_units: u32,
    base_lg: u8,
    lifetime: u64,

    /// Sequence number of the most recent probe. Read without the state lock
    /// by coldness checks under the multi-queue lock.
    access_time: AtomicU64,
    sequence: AtomicU64,

    state: Mutex<ReaderState>,
    init_signal: Condvar,
}

impl FilterBlockReader {
    /// Parse `contents` (the meta-index header emitted by the builder) and
    /// schedule the initial unit load.
    pub fn open(
        policy: Arc<dyn FilterPolicy>,
        contents: &[u8],
        file: Arc<dyn RandomAccessFile>,
        config: &FilterConfig,
        scheduler: &LoadScheduler,
    ) -> Result<Arc<Self>> {
        let n = contents.len();
        if n < HEADER_TAIL_SIZE {
            return crate::errcorrupt!("filter meta block too short: {n} bytes");
        }
        if (n - HEADER_TAIL_SIZE) % 4 != 0 {
            return crate::errcorrupt!("filter offset array is not a multiple of four bytes");
        }

        let base_lg = contents[n - 1];
        let all_units = LittleEndian::read_u32(&contents[n - 5..]);
        let init_units = LittleEndian::read_u32(&contents[n - 9..]);
        let unit_size = LittleEndian::read_u32(&contents[n - 13..]);
        let disk_offset = LittleEndian::read_u64(&contents[n - 21..]);

        if all_units == 0 || init_units > all_units {
            return crate::errcorrupt!(
                "bad unit counts in filter meta block: init {init_units}, all {all_units}"
            );
        }

        let num_blocks = (n - HEADER_TAIL_SIZE) / 4;
        let offsets = (0..num_blocks)
            .map(|i| LittleEndian::read_u32(&contents[i * 4..]))
            .collect();

        let reader = Arc::new(Self {
            policy,
            offsets,
            disk_offset,
            unit_size,
            init_units,
            all_units,
            base_lg,
            lifetime: config.lifetime,
            access_time: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            state: Mutex::new(ReaderState {
                file,
                units: Vec::new(),
                init: if init_units == 0 {
                    InitState::Ready
                } else {
                    InitState::Pending
                },
            }),
            init_signal: Condvar::new(),
        });

        if init_units > 0 {
            let job = Arc::clone(&reader);
            scheduler.schedule(move || job.run_init());
        }
        Ok(reader)
    }

    /// Probe the filter region of the data block at `block_offset`.
    ///
    /// Internal keys also advance the hotness clock. Any resident unit that
    /// rejects the key rules it out; with no resident units, or whenever the
    /// region cannot be located, the answer is a conservative `true`. An
    /// empty region matches no keys.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        if let Some(parsed) = parse_internal_key(key) {
            self.update_state(parsed.sequence);
        }

        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.offsets.len() {
            return true;
        }

        let state = self.wait_ready(self.state.lock().unwrap());
        if state.init == InitState::Corrupt {
            return true;
        }

        let start = self.offsets[index] as usize;
        let end = if index + 1 == self.offsets.len() {
            self.unit_size as usize
        } else {
            self.offsets[index + 1] as usize
        };

        if start == end {
            return false;
        }
        if start > end || end > self.unit_size as usize {
            return true;
        }

        for (unit_index, unit) in state.units.iter().enumerate() {
            if !self
                .policy
                .key_may_match(key, &unit[start..end], unit_index as u32)
            {
                return false;
            }
        }
        true
    }

    /// Bring the next unit into memory, verifying its checksum.
    pub fn load_filter(&self) -> Result<()> {
        let mut state = self.wait_ready(self.state.lock().unwrap());
        if state.init == InitState::Corrupt {
            return Err(Error::InvalidState("filter reader is corrupt".to_string()));
        }
        self.load_unit_locked(&mut state)
    }

    /// Drop the highest resident unit.
    pub fn evict_filter(&self) -> Result<()> {
        let mut state = self.wait_ready(self.state.lock().unwrap());
        if state.init == InitState::Corrupt {
            return Err(Error::InvalidState("filter reader is corrupt".to_string()));
        }
        if state.units.pop().is_none() {
            return Err(Error::InvalidState(
                "no filter unit is resident".to_string(),
            ));
        }
        Ok(())
    }

    /// Record the sequence number of an access. Pure observer; the caller
    /// decides whether an adjustment should follow.
    pub fn update_state(&self, sequence: SequenceNumber) {
        self.access_time.store(sequence, Ordering::Relaxed);
        self.sequence.store(sequence, Ordering::Relaxed);
    }

    pub fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    /// A reader is cold once `lifetime` sequence ticks have passed without an
    /// access. Lock-free, so the multi-queue can scan LRU lists cheaply.
    pub fn is_cold(&self, now: SequenceNumber) -> bool {
        now >= self.sequence.load(Ordering::Relaxed).saturating_add(self.lifetime)
    }

    /// Number of units currently resident. Waits for the initial load.
    pub fn filter_units_number(&self) -> usize {
        self.wait_ready(self.state.lock().unwrap()).units.len()
    }

    /// Memory charge of this reader in bytes.
    pub fn size(&self) -> usize {
        self.filter_units_number() * self.unit_size as usize
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size as usize
    }

    pub fn init_units(&self) -> u32 {
        self.init_units
    }

    pub fn all_units(&self) -> u32 {
        self.all_units
    }

    pub fn can_be_loaded(&self) -> bool {
        let state = self.wait_ready(self.state.lock().unwrap());
        state.init == InitState::Ready && (state.units.len() as u32) < self.all_units
    }

    pub fn can_be_evicted(&self) -> bool {
        let state = self.wait_ready(self.state.lock().unwrap());
        state.init == InitState::Ready && !state.units.is_empty()
    }

    /// Projected disk reads drawn through this filter under its current unit
    /// count: `fpr^k * access_time`.
    pub fn ios(&self) -> f64 {
        self.projected_ios(0)
    }

    /// Projected disk reads if one more unit were resident.
    pub fn load_ios(&self) -> f64 {
        self.projected_ios(1)
    }

    /// Projected disk reads if one unit were given up.
    pub fn evict_ios(&self) -> f64 {
        self.projected_ios(-1)
    }

    fn projected_ios(&self, delta: i64) -> f64 {
        let resident = self.filter_units_number() as i64;
        let units = (resident + delta).max(0) as i32;
        let fpr = self.policy.false_positive_rate().powi(units);
        fpr * self.access_time.load(Ordering::Relaxed) as f64
    }

    /// Reset to the freshly-opened shape against a new file handle: evict
    /// everything, re-point the file, reload `init_units` units.
    pub fn go_back_to_init(&self, file: Arc<dyn RandomAccessFile>) -> Result<()> {
        let mut state = self.wait_ready(self.state.lock().unwrap());
        if state.init == InitState::Corrupt {
            return Err(Error::InvalidState("filter reader is corrupt".to_string()));
        }
        state.units.clear();
        state.file = file;
        for _ in 0..self.init_units {
            self.load_unit_locked(&mut state)?;
        }
        Ok(())
    }

    /// Background job: load the initial units, then wake waiting probes.
    fn run_init(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.init, InitState::Pending);

        let mut outcome = InitState::Ready;
        for _ in 0..self.init_units {
            if let Err(error) = self.load_unit_locked(&mut state) {
                tracing::warn!(%error, "background filter load failed; probes fall back to data blocks");
                state.units.clear();
                outcome = InitState::Corrupt;
                break;
            }
        }
        state.init = outcome;
        drop(state);
        self.init_signal.notify_all();
    }

    fn load_unit_locked(&self, state: &mut ReaderState) -> Result<()> {
        let index = state.units.len() as u32;
        if index >= self.all_units {
            return Err(Error::InvalidState(
                "all filter units are resident".to_string(),
            ));
        }

        let stride = self.unit_size as u64 + BLOCK_TRAILER_SIZE as u64;
        let offset = self.disk_offset + stride * index as u64;
        let bitmap_len = self.unit_size as usize;

        let mut buf = vec![0u8; bitmap_len + BLOCK_TRAILER_SIZE];
        state.file.read_at(offset, &mut buf)?;
        verify_unit(&buf[..bitmap_len], &buf[bitmap_len..])?;
        buf.truncate(bitmap_len);
        state.units.push(buf);
        Ok(())
    }

    fn wait_ready<'a>(&self, mut guard: MutexGuard<'a, ReaderState>) -> MutexGuard<'a, ReaderState> {
        while guard.init == InitState::Pending {
            guard = self.init_signal.wait(guard).unwrap();
        }
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::filter_block::FilterBlockBuilder;
    use crate::internal_key::{encode_internal_key, ValueKind};
    use crate::policy::InternalFilterPolicy;
    use crate::testutil::{persist, test_config, TestHashFilter};

    fn open_reader(
        policy: Arc<dyn FilterPolicy>,
        header: &[u8],
        file: crate::file::MemFile,
        config: &FilterConfig,
        scheduler: &LoadScheduler,
    ) -> Arc<FilterBlockReader> {
        FilterBlockReader::open(policy, header, Arc::new(file), config, scheduler)
            .expect("header should parse")
    }

    #[test]
    fn test_empty_builder_reader() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let builder = FilterBlockBuilder::new(policy.clone(), &config);
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        // No offset array: every probe is out of range and conservative.
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(100_000, b"foo"));
    }

    #[test]
    fn test_single_chunk() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(100);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        builder.add_key(b"box");
        builder.start_block(200);
        builder.add_key(b"box");
        builder.start_block(300);
        builder.add_key(b"hello");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        assert!(reader.key_may_match(100, b"foo"));
        assert!(reader.key_may_match(100, b"bar"));
        assert!(reader.key_may_match(100, b"box"));
        assert!(reader.key_may_match(100, b"hello"));
        assert!(reader.key_may_match(100, b"foo"));
        assert!(!reader.key_may_match(100, b"missing"));
        assert!(!reader.key_may_match(100, b"other"));
    }

    #[test]
    fn test_multi_chunk() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);

        // First region.
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.start_block(2000);
        builder.add_key(b"bar");

        // Second region.
        builder.start_block(3100);
        builder.add_key(b"box");

        // Third region is empty.

        // Last region.
        builder.start_block(9000);
        builder.add_key(b"box");
        builder.add_key(b"hello");

        let (header, file) = persist(builder);
        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        // First region.
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(2000, b"bar"));
        assert!(!reader.key_may_match(0, b"box"));
        assert!(!reader.key_may_match(0, b"hello"));

        // Second region.
        assert!(reader.key_may_match(3100, b"box"));
        assert!(!reader.key_may_match(3100, b"foo"));
        assert!(!reader.key_may_match(3100, b"bar"));
        assert!(!reader.key_may_match(3100, b"hello"));

        // Third region matches nothing.
        assert!(!reader.key_may_match(4100, b"foo"));
        assert!(!reader.key_may_match(4100, b"bar"));
        assert!(!reader.key_may_match(4100, b"box"));
        assert!(!reader.key_may_match(4100, b"hello"));

        // Last region.
        assert!(reader.key_may_match(9000, b"box"));
        assert!(reader.key_may_match(9000, b"hello"));
        assert!(!reader.key_may_match(9000, b"foo"));
        assert!(!reader.key_may_match(9000, b"bar"));
    }

    #[test]
    fn test_load_and_evict_lifecycle() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.start_block(2000);
        builder.add_key(b"bar");
        builder.start_block(3100);
        builder.add_key(b"box");
        builder.start_block(9000);
        builder.add_key(b"box");
        builder.add_key(b"hello");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        assert_eq!(reader.filter_units_number(), 1);
        assert!(reader.evict_filter().is_ok());
        assert_eq!(reader.filter_units_number(), 0);
        assert!(reader.evict_filter().is_err());

        for expected in 1..=4 {
            assert!(reader.load_filter().is_ok());
            assert_eq!(reader.filter_units_number(), expected);
        }
        assert!(reader.load_filter().is_err());
    }

    #[test]
    fn test_load_evict_round_trip_preserves_probes() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config().init_units(2);
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);
        let initial = reader.filter_units_number();
        let size = reader.size();

        reader.load_filter().expect("load");
        reader.load_filter().expect("load");
        reader.evict_filter().expect("evict");
        reader.evict_filter().expect("evict");

        assert_eq!(reader.filter_units_number(), initial);
        assert_eq!(reader.size(), size);
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(0, b"bar"));
        assert!(!reader.key_may_match(0, b"missing"));
    }

    #[test]
    fn test_no_false_negatives_at_any_unit_count() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.start_block(3100);
        builder.add_key(b"box");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        // Walk through every legal resident count.
        while reader.can_be_loaded() {
            assert!(reader.key_may_match(0, b"foo"));
            assert!(reader.key_may_match(3100, b"box"));
            reader.load_filter().expect("load");
        }
        while reader.filter_units_number() > 1 {
            reader.evict_filter().expect("evict");
            assert!(reader.key_may_match(0, b"foo"));
            assert!(reader.key_may_match(3100, b"box"));
        }
    }

    #[test]
    fn test_hotness_tracking() {
        let policy: Arc<dyn FilterPolicy> =
            Arc::new(InternalFilterPolicy::new(TestHashFilter));
        let config = test_config().lifetime(30_000);
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(&encode_internal_key(b"foo", 1, ValueKind::Value));
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        for sn in 1..30_000u64 {
            let probe = encode_internal_key(b"foo", sn, ValueKind::Value);
            assert!(reader.key_may_match(0, &probe));
            assert_eq!(reader.access_time(), sn);

            // The reader goes cold exactly one lifetime after its last access.
            assert!(!reader.is_cold(30_000 + sn - 1));
            assert!(reader.is_cold(30_000 + sn));
        }
    }

    #[test]
    fn test_coldness_is_monotone_at_default_lifetime() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        reader.update_state(500);
        assert!(!reader.is_cold(500));
        assert!(!reader.is_cold(10_499));
        assert!(reader.is_cold(10_500));
        for now in [10_500u64, 20_000, u64::MAX] {
            assert!(reader.is_cold(now));
        }

        // A fresh access resets the horizon.
        reader.update_state(20_000);
        assert!(!reader.is_cold(20_000));
        assert!(reader.is_cold(30_000));
    }

    #[test]
    fn test_size_tracks_resident_units() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(100);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        builder.add_key(b"box");
        builder.start_block(200);
        builder.add_key(b"box");
        builder.start_block(300);
        builder.add_key(b"hello");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);
        let unit_size = reader.unit_size();
        assert_eq!(unit_size, 20);

        while reader.evict_filter().is_ok() {}
        assert_eq!(reader.filter_units_number(), 0);
        assert_eq!(reader.size(), 0);

        let mut resident = 1;
        while reader.load_filter().is_ok() {
            assert_eq!(reader.filter_units_number(), resident);
            assert_eq!(reader.size(), unit_size * resident);
            resident += 1;
        }
        assert_eq!(resident - 1, 4);
    }

    #[test]
    fn test_checksum_mismatch_fails_load() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");

        let mut writer = crate::file::FilterWriter::new(Vec::new());
        let handle = writer.write_units(builder.units()).expect("write units");
        let header = builder.finish(&handle);

        // Corrupt the second unit's bitmap; the first stays intact.
        let mut bytes = writer.into_inner();
        let stride = handle.size as usize + BLOCK_TRAILER_SIZE;
        bytes[stride] ^= 0xff;
        let file = crate::file::MemFile::new(bytes);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        assert_eq!(reader.filter_units_number(), 1);
        let before = reader.filter_units_number();
        assert!(matches!(reader.load_filter(), Err(Error::Corruption(_))));
        assert_eq!(reader.filter_units_number(), before);

        // The intact unit keeps answering.
        assert!(reader.key_may_match(0, b"foo"));
    }

    #[test]
    fn test_failed_background_init_is_conservative() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");

        let mut writer = crate::file::FilterWriter::new(Vec::new());
        let handle = writer.write_units(builder.units()).expect("write units");
        let header = builder.finish(&handle);

        // Drop the file contents entirely: the init read must fail.
        let file = crate::file::MemFile::new(Vec::new());
        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(0, b"missing"));
        assert_eq!(reader.filter_units_number(), 0);
        assert_eq!(reader.size(), 0);
        assert!(!reader.can_be_loaded());
        assert!(!reader.can_be_evicted());
        assert!(reader.load_filter().is_err());
        assert!(reader.evict_filter().is_err());
    }

    #[test]
    fn test_short_header_is_corruption() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let scheduler = LoadScheduler::new();
        let result = FilterBlockReader::open(
            policy,
            &[0u8; 7],
            Arc::new(crate::file::MemFile::new(Vec::new())),
            &test_config(),
            &scheduler,
        );
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_go_back_to_init() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config();
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");
        let (header, file) = persist(builder);

        // Keep a second handle onto the same bytes for the reopen.
        let mut writer = crate::file::FilterWriter::new(Vec::new());
        let mut builder2 = FilterBlockBuilder::new(policy.clone(), &config);
        builder2.start_block(0);
        builder2.add_key(b"foo");
        writer.write_units(builder2.units()).expect("write units");
        let replacement = crate::file::MemFile::new(writer.into_inner());

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        reader.load_filter().expect("load");
        reader.load_filter().expect("load");
        assert_eq!(reader.filter_units_number(), 3);

        reader
            .go_back_to_init(Arc::new(replacement))
            .expect("reopen");
        assert_eq!(reader.filter_units_number() as u32, reader.init_units());
        assert!(reader.key_may_match(0, b"foo"));
    }

    #[test]
    fn test_concurrent_probes_during_init() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(TestHashFilter);
        let config = test_config().init_units(2);
        let mut builder = FilterBlockBuilder::new(policy.clone(), &config);
        builder.start_block(0);
        builder.add_key(b"foo");
        let (header, file) = persist(builder);

        let scheduler = LoadScheduler::new();
        let reader = open_reader(policy, &header, file, &config, &scheduler);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reader = Arc::clone(&reader);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    assert!(reader.key_may_match(0, b"foo"));
                    assert!(!reader.key_may_match(0, b"missing"));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("probe thread panicked");
        }
        assert_eq!(reader.filter_units_number(), 2);
    }
}
