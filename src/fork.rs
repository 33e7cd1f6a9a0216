//! Logical fork I/O: a contiguous byte view over scattered allocation
//! blocks, with on-demand lookups in the extents overflow B-tree for
//! forks whose inline extent record does not cover every block.

use byteorder::{BigEndian, ByteOrder};
use std::io::{Read, Seek};

use crate::btree::{BTreeFile, KeyCompare, KeyOrder};
use crate::device::BlockDevice;
use crate::error::{MacFsError, Result};
use crate::volume::{Extent, ForkData, VolumeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkType {
    Data,
    Resource,
}

impl ForkType {
    pub fn as_byte(self) -> u8 {
        match self {
            ForkType::Data => 0x00,
            ForkType::Resource => 0xFF,
        }
    }
}

impl std::fmt::Display for ForkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForkType::Data => write!(f, "data"),
            ForkType::Resource => write!(f, "resource"),
        }
    }
}

/// Decode an extents-overflow key (length prefix already stripped):
/// `(forkType, fileID, startBlock)`.
fn parse_extent_key(key: &[u8], kind: VolumeKind) -> Option<(u8, u32, u32)> {
    match kind {
        VolumeKind::Hfs => {
            if key.len() < 7 {
                return None;
            }
            Some((
                key[0],
                BigEndian::read_u32(&key[1..5]),
                BigEndian::read_u16(&key[5..7]) as u32,
            ))
        }
        VolumeKind::HfsPlus => {
            if key.len() < 10 {
                return None;
            }
            Some((
                key[0],
                BigEndian::read_u32(&key[2..6]),
                BigEndian::read_u32(&key[6..10]),
            ))
        }
    }
}

/// Bounded quarry for the extents overflow tree, ordered
/// lexicographically on `(forkType, fileID, startBlock)`.
pub struct ExtentQuarry {
    pub fork_type: ForkType,
    pub cnid: u32,
    pub start_block: u32,
    pub kind: VolumeKind,
}

impl ExtentQuarry {
    /// True when a candidate key belongs to the same fork as the quarry.
    pub fn same_fork(&self, candidate_key: &[u8]) -> bool {
        matches!(
            parse_extent_key(candidate_key, self.kind),
            Some((f, c, _)) if f == self.fork_type.as_byte() && c == self.cnid
        )
    }
}

impl KeyCompare for ExtentQuarry {
    fn compare(&self, candidate_key: &[u8]) -> KeyOrder {
        let Some((fork, cnid, start)) = parse_extent_key(candidate_key, self.kind) else {
            return KeyOrder::Incomparable;
        };
        let quarry = (self.fork_type.as_byte(), self.cnid, self.start_block);
        match quarry.cmp(&(fork, cnid, start)) {
            std::cmp::Ordering::Less => KeyOrder::Lesser,
            std::cmp::Ordering::Equal => KeyOrder::Equal,
            std::cmp::Ordering::Greater => KeyOrder::Greater,
        }
    }
}

/// Parse the extent record payload of an overflow leaf record.
fn parse_overflow_payload(payload: &[u8], kind: VolumeKind) -> Vec<Extent> {
    match kind {
        VolumeKind::Hfs if payload.len() >= 12 => crate::volume::parse_hfs_extent_record(payload),
        VolumeKind::HfsPlus if payload.len() >= 64 => {
            crate::volume::parse_hfsplus_extent_record(payload)
        }
        _ => Vec::new(),
    }
}

/// A materialized view of one fork: the complete extent list (inline plus
/// overflow) and the logical length. Reads within a single extent are one
/// underlying device I/O; locating the extent for an offset is a binary
/// search.
#[derive(Debug)]
pub struct ForkReader {
    extents: Vec<Extent>,
    /// Block offset of each extent's start within the fork; parallel to
    /// `extents`.
    starts: Vec<u64>,
    logical_size: u64,
}

impl ForkReader {
    /// Build from the inline extent record only. Suitable for the extents
    /// overflow file itself, whose header extents are authoritative.
    pub fn from_inline(fork: &ForkData) -> Result<ForkReader> {
        Ok(Self::assemble(
            fork.extents.iter().copied().filter(|e| !e.is_empty()).collect(),
            fork.logical_size,
        ))
    }

    /// Build the complete extent list for a fork, consulting the extents
    /// overflow tree for blocks beyond the inline record.
    pub fn materialize(
        fork: &ForkData,
        cnid: u32,
        fork_type: ForkType,
        kind: VolumeKind,
        overflow: Option<&mut BTreeFile>,
    ) -> Result<ForkReader> {
        let mut extents: Vec<Extent> = fork
            .extents
            .iter()
            .copied()
            .filter(|e| !e.is_empty())
            .collect();
        let mut covered: u32 = extents.iter().map(|e| e.block_count).sum();

        if covered < fork.total_blocks {
            let tree = overflow.ok_or(MacFsError::ShortFork {
                cnid,
                covered,
                total: fork.total_blocks,
            })?;
            Self::fetch_overflow(tree, cnid, fork_type, kind, fork.total_blocks, &mut extents, &mut covered)?;
        }

        if covered < fork.total_blocks {
            return Err(MacFsError::ShortFork {
                cnid,
                covered,
                total: fork.total_blocks,
            });
        }
        Ok(Self::assemble(extents, fork.logical_size))
    }

    fn fetch_overflow(
        tree: &mut BTreeFile,
        cnid: u32,
        fork_type: ForkType,
        kind: VolumeKind,
        total: u32,
        extents: &mut Vec<Extent>,
        covered: &mut u32,
    ) -> Result<()> {
        let quarry = ExtentQuarry {
            fork_type,
            cnid,
            start_block: *covered,
            kind,
        };
        let Some(hit) = tree.search(&quarry)? else {
            return Ok(());
        };

        let mut pos = Some((hit.node, hit.record));
        while *covered < total {
            let Some((node_index, record)) = pos else { break };
            let node = tree.node(node_index)?;
            let key = node.record_key(record)?;
            if !quarry.same_fork(key) {
                break;
            }
            let Some((_, _, key_start)) = parse_extent_key(key, kind) else {
                break;
            };
            if key_start != *covered {
                // A gap in overflow coverage; the fork cannot be mapped.
                break;
            }
            for ext in parse_overflow_payload(node.record_payload(record)?, kind) {
                if ext.is_empty() {
                    continue;
                }
                *covered += ext.block_count;
                extents.push(ext);
            }
            pos = tree.step_forward(node_index, record)?;
        }
        Ok(())
    }

    fn assemble(extents: Vec<Extent>, logical_size: u64) -> ForkReader {
        // Cumulative block offsets, so locating an extent is a binary search.
        let mut starts = Vec::with_capacity(extents.len());
        let mut acc = 0u64;
        for e in &extents {
            starts.push(acc);
            acc += e.block_count as u64;
        }
        ForkReader {
            extents,
            starts,
            logical_size,
        }
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Read `length` bytes at logical fork `offset`. Reads past the
    /// logical size fail with `OutOfRange`.
    pub fn read<R: Read + Seek>(
        &self,
        device: &mut BlockDevice<R>,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>> {
        if offset + length as u64 > self.logical_size {
            return Err(MacFsError::OutOfRange {
                offset,
                length,
                available: self.logical_size,
            });
        }
        let block_size = device.alloc_block_size() as u64;
        let mut out = Vec::with_capacity(length);
        let mut pos = offset;
        let end = offset + length as u64;

        while pos < end {
            // Binary search for the extent containing `pos`.
            let block = pos / block_size;
            let idx = self.starts.partition_point(|&s| s <= block) - 1;
            let ext = &self.extents[idx];
            let within = pos - self.starts[idx] * block_size;
            let ext_bytes = ext.block_count as u64 * block_size;
            let take = (ext_bytes - within).min(end - pos);
            let chunk = device.read_extent_range(std::slice::from_ref(ext), within, take as usize)?;
            out.extend_from_slice(&chunk);
            pos += take;
        }
        Ok(out)
    }

    /// Read the whole logical fork.
    pub fn read_all<R: Read + Seek>(&self, device: &mut BlockDevice<R>) -> Result<Vec<u8>> {
        self.read(device, 0, self.logical_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::testutil::{build_header_node, build_node};
    use std::io::Cursor;

    const NS: usize = 512;

    fn device(blocks: u32, block_size: u32) -> BlockDevice<Cursor<Vec<u8>>> {
        let mut data = vec![0u8; (blocks * block_size) as usize];
        // Stamp each block with its own number for addressing checks.
        for b in 0..blocks {
            data[(b * block_size) as usize] = b as u8;
        }
        let mut dev = BlockDevice::new(Cursor::new(data), 0);
        dev.set_geometry(block_size, 0);
        dev
    }

    fn hfsplus_overflow_key(fork: u8, cnid: u32, start: u32) -> Vec<u8> {
        let mut key = vec![0u8; 12];
        BigEndian::write_u16(&mut key[0..2], 10);
        key[2] = fork;
        BigEndian::write_u32(&mut key[4..8], cnid);
        BigEndian::write_u32(&mut key[8..12], start);
        key
    }

    fn overflow_record(fork: u8, cnid: u32, start: u32, extents: &[(u32, u32)]) -> Vec<u8> {
        let mut rec = hfsplus_overflow_key(fork, cnid, start);
        let mut payload = vec![0u8; 64];
        for (i, (s, c)) in extents.iter().enumerate() {
            BigEndian::write_u32(&mut payload[i * 8..i * 8 + 4], *s);
            BigEndian::write_u32(&mut payload[i * 8 + 4..i * 8 + 8], *c);
        }
        rec.extend_from_slice(&payload);
        rec
    }

    fn overflow_tree(records: &[Vec<u8>]) -> BTreeFile {
        let mut data = Vec::new();
        data.extend(build_header_node(NS, 1, 1, records.len() as u32, 1, 1, 2, 0));
        data.extend(build_node(NS, -1, 1, 0, 0, records));
        BTreeFile::new(data, VolumeKind::HfsPlus).unwrap()
    }

    fn fork(logical: u64, total: u32, inline: &[(u32, u32)]) -> ForkData {
        ForkData {
            logical_size: logical,
            clump_size: 0,
            total_blocks: total,
            extents: inline
                .iter()
                .map(|&(s, c)| Extent { start_block: s, block_count: c })
                .collect(),
        }
    }

    #[test]
    fn test_inline_only() {
        let f = fork(100, 4, &[(10, 4)]);
        let r = ForkReader::materialize(&f, 30, ForkType::Data, VolumeKind::HfsPlus, None).unwrap();
        assert_eq!(r.extents().len(), 1);
    }

    #[test]
    fn test_overflow_completes_coverage() {
        // Inline extents cover 100 of 250 blocks; the overflow tree holds
        // the rest in two records.
        let f = fork(250 * 16, 250, &[(0, 60), (80, 40)]);
        let mut tree = overflow_tree(&[
            overflow_record(0x00, 7, 100, &[(200, 100)]),
            overflow_record(0x00, 7, 200, &[(320, 50)]),
        ]);
        let r =
            ForkReader::materialize(&f, 7, ForkType::Data, VolumeKind::HfsPlus, Some(&mut tree))
                .unwrap();
        assert_eq!(r.extents().len(), 4);
        let covered: u32 = r.extents().iter().map(|e| e.block_count).sum();
        assert_eq!(covered, 250);

        // Reading the final byte works; one past the logical end fails.
        let mut dev = device(512, 16);
        let last = r.read(&mut dev, 250 * 16 - 1, 1).unwrap();
        assert_eq!(last.len(), 1);
        let err = r.read(&mut dev, 250 * 16, 1).unwrap_err();
        assert!(matches!(err, MacFsError::OutOfRange { .. }));
    }

    #[test]
    fn test_overflow_ignores_other_forks() {
        let f = fork(0, 20, &[(0, 10)]);
        // Resource-fork record for the same CNID must not satisfy a
        // data-fork lookup.
        let mut tree = overflow_tree(&[overflow_record(0xFF, 7, 10, &[(50, 10)])]);
        let err =
            ForkReader::materialize(&f, 7, ForkType::Data, VolumeKind::HfsPlus, Some(&mut tree))
                .unwrap_err();
        assert!(matches!(err, MacFsError::ShortFork { covered: 10, total: 20, .. }));
    }

    #[test]
    fn test_overflow_gap_is_short_fork() {
        let f = fork(0, 20, &[(0, 10)]);
        // Overflow starts at block 12, leaving 10..12 unmapped.
        let mut tree = overflow_tree(&[overflow_record(0x00, 7, 12, &[(50, 8)])]);
        let err =
            ForkReader::materialize(&f, 7, ForkType::Data, VolumeKind::HfsPlus, Some(&mut tree))
                .unwrap_err();
        assert!(matches!(err, MacFsError::ShortFork { .. }));
    }

    #[test]
    fn test_missing_overflow_tree_is_short_fork() {
        let f = fork(0, 20, &[(0, 10)]);
        let err = ForkReader::materialize(&f, 9, ForkType::Data, VolumeKind::HfsPlus, None)
            .unwrap_err();
        assert!(matches!(err, MacFsError::ShortFork { cnid: 9, covered: 10, total: 20 }));
    }

    #[test]
    fn test_read_crosses_extent_boundary() {
        // Fork = blocks 3,4 then block 1; block size 16.
        let f = fork(48, 3, &[(3, 2), (1, 1)]);
        let r = ForkReader::materialize(&f, 5, ForkType::Data, VolumeKind::HfsPlus, None).unwrap();
        let mut dev = device(8, 16);
        let got = r.read(&mut dev, 16, 32).unwrap();
        assert_eq!(got.len(), 32);
        // Byte 16 of the fork is the first byte of physical block 4;
        // byte 32 is the first byte of physical block 1.
        assert_eq!(got[0], 4);
        assert_eq!(got[16], 1);
    }

    #[test]
    fn test_extent_quarry_ordering() {
        let q = ExtentQuarry {
            fork_type: ForkType::Data,
            cnid: 7,
            start_block: 100,
            kind: VolumeKind::HfsPlus,
        };
        let before = hfsplus_overflow_key(0x00, 7, 50);
        let exact = hfsplus_overflow_key(0x00, 7, 100);
        let after = hfsplus_overflow_key(0x00, 8, 0);
        assert_eq!(q.compare(&before[2..]), KeyOrder::Greater);
        assert_eq!(q.compare(&exact[2..]), KeyOrder::Equal);
        assert_eq!(q.compare(&after[2..]), KeyOrder::Lesser);
        assert_eq!(q.compare(&[0u8; 3]), KeyOrder::Incomparable);
    }
}
