//! Volume discovery: scan a device for HFS / HFS+ signatures at the
//! standard header location, inside Apple Partition Map partitions, and
//! inside HFS wrappers with an embedded HFS+ area. Detection is
//! non-fatal; an unrecognized candidate simply yields nothing.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};
use std::io::{Read, Seek, SeekFrom};

use crate::error::Result;
use crate::volume::{Mdb, VolumeKind, HFSX_SIGNATURE, HFS_PLUS_SIGNATURE, HFS_SIGNATURE};

const DDR_SIGNATURE: u16 = 0x4552; // 'ER'
const APM_ENTRY_SIGNATURE: u16 = 0x504D; // 'PM'

/// One detected volume: byte offset and length on the device, and which
/// filesystem lives there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLocation {
    pub offset: u64,
    pub length: u64,
    pub kind: VolumeKind,
}

/// A partition found in an Apple Partition Map.
#[derive(Debug, Clone)]
struct ApmPartition {
    start: u64,
    length: u64,
    partition_type: String,
}

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn parse_c_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Parse the Apple Partition Map, if one is present. Absence or damage
/// is not an error; candidates simply shrink to the bare-volume case.
fn scan_apm<R: Read + Seek>(reader: &mut R) -> Vec<ApmPartition> {
    let Ok(ddr) = read_at(reader, 0, 512) else {
        return Vec::new();
    };
    if BigEndian::read_u16(&ddr[0..2]) != DDR_SIGNATURE {
        return Vec::new();
    }
    let block_size = BigEndian::read_u16(&ddr[2..4]) as u64;
    if block_size == 0 {
        return Vec::new();
    }

    let mut partitions = Vec::new();
    let mut map_entries = 1u32;
    let mut index = 0u32;
    while index < map_entries && index < 128 {
        let Ok(entry) = read_at(reader, (1 + index as u64) * block_size, 512) else {
            break;
        };
        if BigEndian::read_u16(&entry[0..2]) != APM_ENTRY_SIGNATURE {
            break;
        }
        if index == 0 {
            map_entries = BigEndian::read_u32(&entry[4..8]);
        }
        let start_block = BigEndian::read_u32(&entry[8..12]) as u64;
        let block_count = BigEndian::read_u32(&entry[12..16]) as u64;
        let partition_type = parse_c_string(&entry[48..80]);
        debug!(
            "APM entry {index}: {partition_type} at block {start_block} ({block_count} blocks)"
        );
        partitions.push(ApmPartition {
            start: start_block * block_size,
            length: block_count * block_size,
            partition_type,
        });
        index += 1;
    }
    partitions
}

/// Probe a candidate volume start: examine the signature at
/// `start + 1024` and emit zero, one, or (for an HFS wrapper with an
/// embedded HFS+ area) two locations.
fn probe_volume_start<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    out: &mut Vec<VolumeLocation>,
) {
    let Ok(header) = read_at(reader, start + 1024, Mdb::SIZE) else {
        return;
    };
    match BigEndian::read_u16(&header[0..2]) {
        HFS_PLUS_SIGNATURE | HFSX_SIGNATURE => {
            let block_size = BigEndian::read_u32(&header[40..44]) as u64;
            let total_blocks = BigEndian::read_u32(&header[44..48]) as u64;
            out.push(VolumeLocation {
                offset: start,
                length: total_blocks * block_size,
                kind: VolumeKind::HfsPlus,
            });
        }
        HFS_SIGNATURE => {
            let Ok(mdb) = Mdb::parse(&header) else {
                debug!("HFS signature at {start} but MDB failed to parse");
                return;
            };
            let length = mdb.alloc_block_start as u64 * 512
                + mdb.total_blocks as u64 * mdb.alloc_block_size as u64;
            out.push(VolumeLocation {
                offset: start,
                length,
                kind: VolumeKind::Hfs,
            });
            if mdb.has_embedded_hfs_plus() {
                debug!(
                    "HFS wrapper at {start} embeds HFS+ at +{}",
                    mdb.embedded_offset()
                );
                out.push(VolumeLocation {
                    offset: start + mdb.embedded_offset(),
                    length: mdb.embedded_length(),
                    kind: VolumeKind::HfsPlus,
                });
            }
        }
        _ => {}
    }
}

/// Scan the device for volumes. Returns every location found, in probe
/// order: the standard location first, then APM partitions.
pub fn probe<R: Read + Seek>(reader: &mut R) -> Result<Vec<VolumeLocation>> {
    let mut found = Vec::new();

    probe_volume_start(reader, 0, &mut found);

    // A signature in the first sector means the image was carved without
    // its boot blocks; block addressing cannot be recovered from here.
    if found.is_empty() {
        if let Ok(first) = read_at(reader, 0, 2) {
            let sig = BigEndian::read_u16(&first[0..2]);
            if sig == HFS_SIGNATURE || sig == HFS_PLUS_SIGNATURE || sig == HFSX_SIGNATURE {
                warn!("volume header found at offset 0; image is missing its first 1024 bytes");
            }
        }
    }

    for partition in scan_apm(reader) {
        if partition.start == 0 {
            continue;
        }
        let before = found.len();
        probe_volume_start(reader, partition.start, &mut found);
        if found.len() == before && partition.partition_type.contains("Apple_HFS") {
            debug!(
                "APM partition '{}' at {} carried no recognizable volume",
                partition.partition_type, partition.start
            );
        }
    }

    // The same volume can surface both as the bare device and through an
    // APM entry; keep the first sighting.
    let mut seen = std::collections::HashSet::new();
    found.retain(|loc| seen.insert(loc.offset));

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hfs_image(embedded: bool) -> Vec<u8> {
        let mut img = vec![0u8; 64 * 1024];
        let mdb = &mut img[1024..1024 + 162];
        BigEndian::write_u16(&mut mdb[0..2], HFS_SIGNATURE);
        BigEndian::write_u16(&mut mdb[18..20], 100); // total blocks
        BigEndian::write_u32(&mut mdb[20..24], 512); // alloc size
        BigEndian::write_u16(&mut mdb[28..30], 16); // drAlBlSt
        mdb[36] = 3;
        mdb[37..40].copy_from_slice(b"Vol");
        if embedded {
            BigEndian::write_u16(&mut mdb[124..126], HFS_PLUS_SIGNATURE);
            BigEndian::write_u16(&mut mdb[126..128], 4); // embed start block
            BigEndian::write_u16(&mut mdb[128..130], 90); // embed blocks
        }
        img
    }

    #[test]
    fn test_probe_bare_hfs() {
        let mut cursor = Cursor::new(hfs_image(false));
        let found = probe(&mut cursor).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, VolumeKind::Hfs);
        assert_eq!(found[0].offset, 0);
        assert_eq!(found[0].length, 16 * 512 + 100 * 512);
    }

    #[test]
    fn test_probe_wrapper_emits_both() {
        let mut cursor = Cursor::new(hfs_image(true));
        let found = probe(&mut cursor).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, VolumeKind::Hfs);
        assert_eq!(found[1].kind, VolumeKind::HfsPlus);
        // drAlBlSt * 512 + embed_start * alloc_size
        assert_eq!(found[1].offset, 16 * 512 + 4 * 512);
        assert_eq!(found[1].length, 90 * 512);
    }

    #[test]
    fn test_probe_hfsplus() {
        let mut img = vec![0u8; 64 * 1024];
        let vh = &mut img[1024..1536];
        BigEndian::write_u16(&mut vh[0..2], HFS_PLUS_SIGNATURE);
        BigEndian::write_u16(&mut vh[2..4], 4);
        BigEndian::write_u32(&mut vh[40..44], 4096);
        BigEndian::write_u32(&mut vh[44..48], 16);
        let mut cursor = Cursor::new(img);
        let found = probe(&mut cursor).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, VolumeKind::HfsPlus);
        assert_eq!(found[0].length, 16 * 4096);
    }

    #[test]
    fn test_probe_apm_partition() {
        let mut img = vec![0u8; 256 * 1024];
        // DDR at block 0
        BigEndian::write_u16(&mut img[0..2], DDR_SIGNATURE);
        BigEndian::write_u16(&mut img[2..4], 512);
        // One map entry at block 1: HFS partition at block 100
        {
            let entry = &mut img[512..1024];
            BigEndian::write_u16(&mut entry[0..2], APM_ENTRY_SIGNATURE);
            BigEndian::write_u32(&mut entry[4..8], 1);
            BigEndian::write_u32(&mut entry[8..12], 100);
            BigEndian::write_u32(&mut entry[12..16], 300);
            entry[48..57].copy_from_slice(b"Apple_HFS");
        }
        // Volume header inside the partition
        {
            let base = 100 * 512 + 1024;
            let vh = &mut img[base..base + 512];
            BigEndian::write_u16(&mut vh[0..2], HFS_PLUS_SIGNATURE);
            BigEndian::write_u16(&mut vh[2..4], 4);
            BigEndian::write_u32(&mut vh[40..44], 512);
            BigEndian::write_u32(&mut vh[44..48], 290);
        }
        let mut cursor = Cursor::new(img);
        let found = probe(&mut cursor).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 100 * 512);
        assert_eq!(found[0].kind, VolumeKind::HfsPlus);
    }

    #[test]
    fn test_probe_unknown_is_empty_not_error() {
        let mut cursor = Cursor::new(vec![0u8; 8192]);
        assert!(probe(&mut cursor).unwrap().is_empty());
    }
}
