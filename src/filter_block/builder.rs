use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::config::FilterConfig;
use crate::file::BlockHandle;
use crate::policy::FilterPolicy;

/// Builds the filter units and header for one table.
///
/// The sequence of calls must match the regexp `(start_block add_key*)*`,
/// followed by [`FilterBlockBuilder::units`] (persist the returned bitmaps,
/// obtaining a [`BlockHandle`]) and finally [`FilterBlockBuilder::finish`].
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    all_units: u32,
    init_units: u32,
    base_lg: u8,

    /// Flattened key contents plus the start index of each key.
    keys: Vec<u8>,
    key_starts: Vec<usize>,

    /// Start of each data block's filter region within one unit. All units
    /// share this array because they grow in lockstep.
    filter_offsets: Vec<u32>,

    units: Vec<Vec<u8>>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>, config: &FilterConfig) -> Self {
        Self {
            policy,
            all_units: config.all_units,
            init_units: config.init_units,
            base_lg: config.base_lg,
            keys: Vec::new(),
            key_starts: Vec::new(),
            filter_offsets: Vec::new(),
            units: vec![Vec::new(); config.all_units as usize],
        }
    }

    /// Open the filter region for the data block starting at `block_offset`.
    /// Offsets must be presented in increasing order.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset >> self.base_lg;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        // Data blocks can be sparser than the stripe size; pad with filter
        // generations so region indices keep matching at read time.
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    /// Add a key to the current data block's region.
    pub fn add_key(&mut self, key: &[u8]) {
        self.key_starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    /// Flush any buffered keys and return the finished unit bitmaps, ready
    /// for the persister.
    pub fn units(&mut self) -> &[Vec<u8>] {
        self.flush_pending();
        &self.units
    }

    /// Emit the header once the persister has written the units and returned
    /// their handle.
    pub fn finish(mut self, handle: &BlockHandle) -> Vec<u8> {
        self.flush_pending();

        let mut result = Vec::with_capacity(self.filter_offsets.len() * 4 + 21);
        for offset in &self.filter_offsets {
            result.write_u32::<LittleEndian>(*offset).unwrap();
        }
        result.write_u64::<LittleEndian>(handle.offset).unwrap();
        result.write_u32::<LittleEndian>(handle.size).unwrap();
        result.write_u32::<LittleEndian>(self.init_units).unwrap();
        result.write_u32::<LittleEndian>(self.all_units).unwrap();
        result.push(self.base_lg);
        result
    }

    fn flush_pending(&mut self) {
        if !self.key_starts.is_empty() {
            self.generate_filter();
            // Close the last region so its extent is recoverable.
            self.filter_offsets.push(self.units[0].len() as u32);
        }
    }

    fn generate_filter(&mut self) {
        let num_keys = self.key_starts.len();
        self.filter_offsets.push(self.units[0].len() as u32);
        if num_keys == 0 {
            // Empty region; nothing appended to any unit.
            return;
        }

        self.key_starts.push(self.keys.len());
        let key_list: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.key_starts[i]..self.key_starts[i + 1]])
            .collect();

        for (unit_index, unit) in self.units.iter_mut().enumerate() {
            self.policy
                .create_filter(&key_list, unit, unit_index as u32);
        }

        self.keys.clear();
        self.key_starts.clear();
    }
}
