//! Table-side glue for the filter cache.
//!
//! A table owns exactly one filter block. On open it registers a reader with
//! the cache under a policy-and-table tagged key; every point lookup consults
//! [`TableFilter::key_may_match`] before touching the data block; dropping
//! the table erases the registration unless it was released for a later
//! reopen.

use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::config::FilterConfig;
use crate::error::Result;
use crate::file::RandomAccessFile;
use crate::filter_block::FilterBlockReader;
use crate::loader::LoadScheduler;
use crate::multi_queue::{CacheHandle, FilterCache};
use crate::policy::FilterPolicy;

/// Cache key for one table's filter block: `"filter." + policy name + table
/// id`. The id suffix keeps two tables under the same policy apart.
pub fn filter_block_key(policy_name: &str, table_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(7 + policy_name.len() + 8);
    key.extend_from_slice(b"filter.");
    key.extend_from_slice(policy_name.as_bytes());
    key.write_u64::<LittleEndian>(table_id).unwrap();
    key
}

/// One table's connection to the filter cache.
pub struct TableFilter {
    cache: Arc<dyn FilterCache>,
    key: Vec<u8>,
    handle: CacheHandle,
    erase_on_drop: bool,
}

impl TableFilter {
    /// Register this table's filter block with the cache.
    ///
    /// If an entry for the table survived an earlier [`TableFilter::release`]
    /// it is revived against the new file handle instead of re-parsing the
    /// header.
    pub fn open(
        cache: Arc<dyn FilterCache>,
        table_id: u64,
        policy: Arc<dyn FilterPolicy>,
        header: &[u8],
        file: Arc<dyn RandomAccessFile>,
        config: &FilterConfig,
        scheduler: &LoadScheduler,
    ) -> Result<Self> {
        let key = filter_block_key(policy.name(), table_id);

        if let Some(handle) = cache.lookup(&key) {
            cache.go_back_to_init(handle, file)?;
            return Ok(Self {
                cache,
                key,
                handle,
                erase_on_drop: true,
            });
        }

        let reader = FilterBlockReader::open(policy, header, file, config, scheduler)?;
        let handle = cache.insert(&key, reader);
        Ok(Self {
            cache,
            key,
            handle,
            erase_on_drop: true,
        })
    }

    /// The per-lookup fast path. `internal_key` also advances the hotness
    /// clock and may trigger an adjustment.
    pub fn key_may_match(&self, block_offset: u64, internal_key: &[u8]) -> bool {
        self.cache.key_may_match(self.handle, block_offset, internal_key)
    }

    pub fn handle(&self) -> CacheHandle {
        self.handle
    }

    pub fn cache_key(&self) -> &[u8] {
        &self.key
    }

    /// Re-point the reader at a fresh file handle after the table file was
    /// re-linked, restoring the freshly-opened unit count.
    pub fn relink(&self, file: Arc<dyn RandomAccessFile>) -> Result<()> {
        self.cache.go_back_to_init(self.handle, file)
    }

    /// Give up the table's resident units but keep its cache entry for a
    /// later reopen. Consumes the handle without erasing the registration.
    pub fn release(mut self) {
        self.cache.release(self.handle);
        self.erase_on_drop = false;
    }
}

impl Drop for TableFilter {
    fn drop(&mut self) {
        if self.erase_on_drop {
            self.cache.erase(&self.key);
        }
    }
}
