//! Shared test fixtures: a deterministic filter policy and an in-memory
//! persister for filter blocks.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::FilterConfig;
use crate::file::{FilterWriter, MemFile};
use crate::filter_block::FilterBlockBuilder;
use crate::policy::FilterPolicy;

/// The configuration the bit-literal tests are pinned against.
pub(crate) fn test_config() -> FilterConfig {
    FilterConfig::default().all_units(4).init_units(1)
}

/// Emits one four-byte hash per key, seeded by the unit index, so tests can
/// predict bitmap sizes exactly and still observe unit independence.
pub(crate) struct TestHashFilter;

fn test_hash(key: &[u8], unit_index: u32) -> u32 {
    twox_hash::xxh3::hash64_with_seed(key, unit_index as u64) as u32
}

impl FilterPolicy for TestHashFilter {
    fn name(&self) -> &str {
        "TestHashFilter"
    }

    fn false_positive_rate(&self) -> f64 {
        0.1
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>, unit_index: u32) {
        for key in keys {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, test_hash(key, unit_index));
            dst.extend_from_slice(&buf);
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8], unit_index: u32) -> bool {
        let h = test_hash(key, unit_index);
        filter
            .chunks_exact(4)
            .any(|chunk| LittleEndian::read_u32(chunk) == h)
    }
}

/// Write the builder's units to an in-memory file and emit the header, the
/// way a table builder would persist a filter block.
pub(crate) fn persist(mut builder: FilterBlockBuilder) -> (Vec<u8>, MemFile) {
    let mut writer = FilterWriter::new(Vec::new());
    let handle = writer
        .write_units(builder.units())
        .expect("filter units should persist");
    let header = builder.finish(&handle);
    (header, MemFile::new(writer.into_inner()))
}
