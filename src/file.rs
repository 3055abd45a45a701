//! File access for filter units.
//!
//! Filter units live in the table file as raw bitmaps, each followed by a
//! 5-byte trailer (a compression tag plus a masked CRC-32). Readers pull
//! single units back in with positional reads, so the only file capability
//! the crate needs is [`RandomAccessFile`].

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Error, Result};

/// One compression tag byte plus a 4-byte masked checksum.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Filter units are never compressed.
const NO_COMPRESSION: u8 = 0;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Checksums of checksums degrade; rotate and add a constant so a stored CRC
/// is never mistaken for the CRC of its own bytes.
const MASK_DELTA: u32 = 0xa282_ead8;

fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

/// Location of the first filter unit within the table file, plus the shared
/// per-unit bitmap size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u32,
}

/// Positional reads against a read-only, shared backing file.
pub trait RandomAccessFile: Send + Sync {
    /// Fill `buf` from `offset`. Short reads are errors.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

#[cfg(unix)]
impl RandomAccessFile for std::fs::File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        FileExt::read_exact_at(self, buf, offset).map_err(Error::from)
    }
}

#[cfg(windows)]
impl RandomAccessFile for std::fs::File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::windows::fs::FileExt;
        let mut pos = offset;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.seek_read(&mut buf[filled..], pos)?;
            if n == 0 {
                return Err(Error::IO("read past end of file".to_string()));
            }
            filled += n;
            pos += n as u64;
        }
        Ok(())
    }
}

/// An in-memory [`RandomAccessFile`], used by tests and by embedders that
/// keep filter regions in a buffer.
pub struct MemFile {
    data: Vec<u8>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl RandomAccessFile for MemFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start.checked_add(buf.len());
        match end {
            Some(end) if end <= self.data.len() => {
                buf.copy_from_slice(&self.data[start..end]);
                Ok(())
            }
            _ => Err(Error::IO("read past end of file".to_string())),
        }
    }
}

/// Appends checksummed filter units to a sink and hands back the handle the
/// filter-block header records.
///
/// Layout per unit: `[bitmap][type: u8][masked crc32: u32 LE]`, so the
/// on-disk stride between units is `unit_size + BLOCK_TRAILER_SIZE`.
pub struct FilterWriter<W> {
    sink: W,
    offset: u64,
}

impl<W: Write> FilterWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, offset: 0 }
    }

    /// Write every unit bitmap with its trailer. All units must share one
    /// size; the returned handle records where unit 0 starts and how large
    /// one bitmap is.
    pub fn write_units(&mut self, units: &[Vec<u8>]) -> Result<BlockHandle> {
        let unit_size = match units.first() {
            Some(unit) => unit.len(),
            None => {
                return Err(Error::InvalidState(
                    "a filter block must contain at least one unit".to_string(),
                ))
            }
        };

        let handle = BlockHandle {
            offset: self.offset,
            size: unit_size as u32,
        };

        for unit in units {
            if unit.len() != unit_size {
                return Err(Error::InvalidState(format!(
                    "filter units differ in size: {} vs {}",
                    unit.len(),
                    unit_size
                )));
            }
            self.sink.write_all(unit)?;
            self.sink.write_all(&unit_trailer(unit))?;
            self.offset += (unit.len() + BLOCK_TRAILER_SIZE) as u64;
        }

        Ok(handle)
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Trailer for a unit bitmap: compression tag, then the masked CRC covering
/// the bitmap and the tag.
pub(crate) fn unit_trailer(unit: &[u8]) -> [u8; BLOCK_TRAILER_SIZE] {
    let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
    trailer[0] = NO_COMPRESSION;

    let mut digest = CASTAGNOLI.digest();
    digest.update(unit);
    digest.update(&trailer[..1]);
    LittleEndian::write_u32(&mut trailer[1..], mask_crc(digest.finalize()));
    trailer
}

/// Verify a unit bitmap against its trailer.
pub(crate) fn verify_unit(unit: &[u8], trailer: &[u8]) -> Result<()> {
    if trailer.len() != BLOCK_TRAILER_SIZE {
        return Err(Error::Corruption("filter unit trailer truncated".to_string()));
    }
    let mut digest = CASTAGNOLI.digest();
    digest.update(unit);
    digest.update(&trailer[..1]);
    let actual = digest.finalize();
    let expected = unmask_crc(LittleEndian::read_u32(&trailer[1..]));
    if actual != expected {
        return Err(Error::Corruption(format!(
            "filter unit checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
        )));
    }
    Ok(())
}
