//! Adaptive multi-unit Bloom-filter cache for LSM-tree storage engines.
//!
//! Every on-disk table carries several independent filter bitmaps ("units")
//! over the same keys. Only some units are held in memory; the
//! [`MultiQueue`](multi_queue::MultiQueue) watches access hotness and shifts
//! unit residency between tables, so hot tables filter lookups with more
//! bits (fewer wasted data-block reads) while cold tables give memory back.
//!
//! ```text
//!  point lookup
//!       │
//!       ▼
//!  MultiQueue ──── adjustment: evict cold units, load a hot one
//!       │
//!       ▼
//!  FilterBlockReader ──── pages units in/out of the table file
//!       │
//!       ▼
//!  FilterPolicy ──── per-unit bitmap build & probe
//! ```

pub mod config;
pub mod error;
pub mod file;
pub mod filter_block;
pub mod internal_key;
pub mod loader;
pub mod multi_queue;
pub mod policy;
pub mod table;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::FilterConfig;
pub use error::{Error, Result};
pub use file::{BlockHandle, FilterWriter, MemFile, RandomAccessFile};
pub use filter_block::{FilterBlockBuilder, FilterBlockReader};
pub use loader::LoadScheduler;
pub use multi_queue::{CacheHandle, FilterCache, InlineCache, MultiQueue, QueueLogger, TracingLogger};
pub use policy::{BloomFilterPolicy, FilterPolicy, InternalFilterPolicy};
pub use table::{filter_block_key, TableFilter};
