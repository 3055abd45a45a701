//! Multi-unit filter blocks.
//!
//! A filter block collects the Bloom filters for every data block of one
//! table. Unlike a classic single-bitmap block it holds `all_units`
//! independent bitmaps over the same keys, only some of which are in memory
//! at any moment; the rest stay on disk until the multi-queue decides the
//! table is hot enough to deserve them.
//!
//! ## Layout
//!
//! Unit bitmaps live in the table file, each followed by a checksum trailer:
//!
//! ```text
//! +--------------------------+
//! | Unit 0 bitmap | trailer  |  <- disk_offset
//! +--------------------------+
//! | Unit 1 bitmap | trailer  |  <- disk_offset + (unit_size + 5)
//! +--------------------------+
//! | ...                      |
//! +--------------------------+
//! | Unit N-1 bitmap | trailer|
//! +--------------------------+
//! ```
//!
//! The header stored in the table's meta index is everything a reader needs
//! to page units in and out:
//!
//! ```text
//! +-----------------------------------------+
//! | offsets: u32 LE per data block          |
//! +-----------------------------------------+
//! | disk_offset: u64 LE                     |
//! | unit_size:   u32 LE                     |
//! | init_units:  u32 LE                     |
//! | all_units:   u32 LE                     |
//! | base_lg:     u8                         |
//! +-----------------------------------------+
//! ```
//!
//! Every unit shares the one offset array: a data block at file offset `o`
//! owns the bitmap range `offsets[o >> base_lg] .. offsets[o >> base_lg + 1]`
//! within each unit.

pub mod builder;
pub mod reader;

pub use builder::FilterBlockBuilder;
pub use reader::FilterBlockReader;

/// Fixed bytes after the offset array: u64 + three u32 + one u8.
pub(crate) const HEADER_TAIL_SIZE: usize = 21;
