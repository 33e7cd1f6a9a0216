use std::io::{Read, Seek, SeekFrom};

use crate::error::{MacFsError, Result};
use crate::volume::Extent;

/// Random-access reader over a raw device or disk image, offset-shifted so
/// that callers address bytes relative to the start of one volume.
///
/// Geometry (allocation block size and the byte position of allocation
/// block 0) is attached once the volume header has been parsed; until then
/// only `read_at` is usable.
pub struct BlockDevice<R> {
    reader: R,
    start_offset: u64,
    /// Offset of allocation block 0, relative to `start_offset`.
    /// HFS places it at drAlBlSt * 512; HFS+ at 0.
    block_zero_offset: u64,
    alloc_block_size: u32,
}

impl<R: Read + Seek> BlockDevice<R> {
    pub fn new(reader: R, start_offset: u64) -> Self {
        BlockDevice {
            reader,
            start_offset,
            block_zero_offset: 0,
            alloc_block_size: 0,
        }
    }

    /// Attach volume geometry. `block_zero_offset` is relative to the
    /// volume start.
    pub fn set_geometry(&mut self, alloc_block_size: u32, block_zero_offset: u64) {
        self.alloc_block_size = alloc_block_size;
        self.block_zero_offset = block_zero_offset;
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn alloc_block_size(&self) -> u32 {
        self.alloc_block_size
    }

    /// Read `len` bytes at a byte offset relative to the volume start.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.reader
            .seek(SeekFrom::Start(self.start_offset + offset))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read `count` whole allocation blocks starting at `first_block`.
    pub fn read_blocks(&mut self, first_block: u32, count: u32) -> Result<Vec<u8>> {
        let offset =
            self.block_zero_offset + first_block as u64 * self.alloc_block_size as u64;
        let len = count as u64 * self.alloc_block_size as u64;
        self.read_at(offset, len as usize)
    }

    /// Synthesize a contiguous byte range of a fork from its extent list.
    ///
    /// `first_byte` is a logical offset within the fork; the extents must
    /// cover `first_byte + length` bytes or the call fails with
    /// `OutOfRange` before any I/O happens.
    pub fn read_extent_range(
        &mut self,
        extents: &[Extent],
        first_byte: u64,
        length: usize,
    ) -> Result<Vec<u8>> {
        let block_size = self.alloc_block_size as u64;
        let available: u64 = extents.iter().map(|e| e.block_count as u64).sum::<u64>() * block_size;
        if first_byte + length as u64 > available {
            return Err(MacFsError::OutOfRange {
                offset: first_byte,
                length,
                available,
            });
        }

        let mut out = Vec::with_capacity(length);
        let mut logical = 0u64; // start of the current extent within the fork
        let mut pos = first_byte;
        let end = first_byte + length as u64;

        for ext in extents {
            let ext_len = ext.block_count as u64 * block_size;
            if pos < logical + ext_len && pos < end {
                let within = pos - logical;
                let take = (ext_len - within).min(end - pos);
                let offset = self.block_zero_offset
                    + ext.start_block as u64 * block_size
                    + within;
                let chunk = self.read_at(offset, take as usize)?;
                out.extend_from_slice(&chunk);
                pos += take;
            }
            logical += ext_len;
            if pos >= end {
                break;
            }
        }

        Ok(out)
    }
}
