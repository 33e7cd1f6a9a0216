//! Rehydration of catalog items to the host filesystem.
//!
//! Classic Mac files carry two forks plus Finder type/creator codes that
//! host filesystems cannot represent directly. Supported renditions:
//! AppleDouble (`._name` sidecar, macOS native), MacBinary III (single
//! `.bin` wrapper), a bare `.rsrc` sidecar, or data fork only.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::catalog::DehydratedItem;
use crate::error::Result;
use crate::fork::ForkType;
use crate::volume::Volume;

/// How to carry the resource fork and Finder metadata on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkMode {
    /// AppleDouble format: `._name` sidecar files (macOS native)
    AppleDouble,
    /// MacBinary III: single `.bin` file containing both forks
    MacBinary,
    /// Separate `.rsrc` sidecar files
    SeparateRsrc,
    /// Skip resource forks entirely
    DataOnly,
}

impl std::str::FromStr for ForkMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "appledouble" => Ok(ForkMode::AppleDouble),
            "macbinary" => Ok(ForkMode::MacBinary),
            "rsrc" => Ok(ForkMode::SeparateRsrc),
            "data-only" => Ok(ForkMode::DataOnly),
            other => Err(format!(
                "unknown fork mode '{other}' (expected appledouble, macbinary, rsrc, or data-only)"
            )),
        }
    }
}

/// Build an AppleDouble (version 2) sidecar: Finder info entry carrying
/// the type/creator codes plus the resource fork data.
pub fn build_appledouble(type_code: &[u8; 4], creator_code: &[u8; 4], rsrc_data: &[u8]) -> Vec<u8> {
    // 26-byte header, two 12-byte entry descriptors, 32 bytes of Finder
    // info, then the fork data.
    let finder_offset: u32 = 26 + 2 * 12;
    let finder_len: u32 = 32;
    let rsrc_offset: u32 = finder_offset + finder_len;

    let total = rsrc_offset as usize + rsrc_data.len();
    let mut buf = vec![0u8; total];

    BigEndian::write_u32(&mut buf[0..4], 0x0005_1607); // magic
    BigEndian::write_u32(&mut buf[4..8], 0x0002_0000); // version 2
    BigEndian::write_u16(&mut buf[24..26], 2); // entry count

    // Entry 1: Finder Info (id 9)
    BigEndian::write_u32(&mut buf[26..30], 9);
    BigEndian::write_u32(&mut buf[30..34], finder_offset);
    BigEndian::write_u32(&mut buf[34..38], finder_len);

    // Entry 2: Resource Fork (id 2)
    BigEndian::write_u32(&mut buf[38..42], 2);
    BigEndian::write_u32(&mut buf[42..46], rsrc_offset);
    BigEndian::write_u32(&mut buf[46..50], rsrc_data.len() as u32);

    let fi = finder_offset as usize;
    buf[fi..fi + 4].copy_from_slice(type_code);
    buf[fi + 4..fi + 8].copy_from_slice(creator_code);

    buf[rsrc_offset as usize..].copy_from_slice(rsrc_data);
    buf
}

/// Build a MacBinary III file: 128-byte header, then each fork padded to
/// a 128-byte boundary.
pub fn build_macbinary(
    filename: &str,
    type_code: &[u8; 4],
    creator_code: &[u8; 4],
    data_fork: &[u8],
    rsrc_data: &[u8],
) -> Vec<u8> {
    let data_padded = pad_to_128(data_fork.len());
    let rsrc_padded = pad_to_128(rsrc_data.len());
    let mut buf = vec![0u8; 128 + data_padded + rsrc_padded];

    let name_bytes = filename.as_bytes();
    let name_len = name_bytes.len().min(63);
    buf[1] = name_len as u8;
    buf[2..2 + name_len].copy_from_slice(&name_bytes[..name_len]);

    buf[65..69].copy_from_slice(type_code);
    buf[69..73].copy_from_slice(creator_code);

    BigEndian::write_u32(&mut buf[83..87], data_fork.len() as u32);
    BigEndian::write_u32(&mut buf[87..91], rsrc_data.len() as u32);

    buf[122] = 130; // written by MacBinary III
    buf[123] = 129; // readable by MacBinary II

    let crc = macbinary_crc16(&buf[0..124]);
    BigEndian::write_u16(&mut buf[124..126], crc);

    buf[128..128 + data_fork.len()].copy_from_slice(data_fork);
    let rsrc_start = 128 + data_padded;
    buf[rsrc_start..rsrc_start + rsrc_data.len()].copy_from_slice(rsrc_data);
    buf
}

/// Replace characters the host filesystem cannot carry.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '\0' => '_',
            '<' | '>' | '"' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect()
}

fn pad_to_128(len: usize) -> usize {
    (len + 127) & !127
}

/// CRC-16 used by MacBinary (CRC-CCITT, polynomial 0x1021).
fn macbinary_crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Read both forks of a file item and write it under `out_dir` in the
/// requested rendition. Returns the host paths written.
pub fn write_item<R: Read + Seek>(
    volume: &mut Volume<R>,
    item: &DehydratedItem,
    out_dir: &Path,
    mode: ForkMode,
) -> Result<Vec<PathBuf>> {
    let name = sanitize_filename(&item.name);
    let type_code = item.type_code.unwrap_or(*b"????");
    let creator_code = item.creator_code.unwrap_or(*b"????");

    let data = match &item.data_fork {
        Some(fork) => volume.read_fork(fork, item.cnid, ForkType::Data)?,
        None => Vec::new(),
    };
    let rsrc = match &item.resource_fork {
        Some(fork) if fork.logical_size > 0 && mode != ForkMode::DataOnly => {
            volume.read_fork(fork, item.cnid, ForkType::Resource)?
        }
        _ => Vec::new(),
    };
    debug!(
        "extracting CNID {}: {} data bytes, {} resource bytes",
        item.cnid,
        data.len(),
        rsrc.len()
    );

    std::fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    match mode {
        ForkMode::MacBinary => {
            let path = out_dir.join(format!("{name}.bin"));
            std::fs::write(
                &path,
                build_macbinary(&name, &type_code, &creator_code, &data, &rsrc),
            )?;
            written.push(path);
        }
        ForkMode::AppleDouble => {
            let data_path = out_dir.join(&name);
            std::fs::write(&data_path, &data)?;
            written.push(data_path);
            let sidecar = out_dir.join(format!("._{name}"));
            std::fs::write(&sidecar, build_appledouble(&type_code, &creator_code, &rsrc))?;
            written.push(sidecar);
        }
        ForkMode::SeparateRsrc => {
            let data_path = out_dir.join(&name);
            std::fs::write(&data_path, &data)?;
            written.push(data_path);
            if !rsrc.is_empty() {
                let rsrc_path = out_dir.join(format!("{name}.rsrc"));
                std::fs::write(&rsrc_path, &rsrc)?;
                written.push(rsrc_path);
            }
        }
        ForkMode::DataOnly => {
            let data_path = out_dir.join(&name);
            std::fs::write(&data_path, &data)?;
            written.push(data_path);
        }
    }

    for path in &written {
        info!("wrote {}", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("hello:world"), "hello_world");
        assert_eq!(sanitize_filename("file/name"), "file_name");
        assert_eq!(sanitize_filename("normal.txt"), "normal.txt");
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
    }

    #[test]
    fn test_appledouble_layout() {
        let ad = build_appledouble(b"TEXT", b"ttxt", &[0xDE, 0xAD]);
        assert_eq!(BigEndian::read_u32(&ad[0..4]), 0x0005_1607);
        assert_eq!(BigEndian::read_u32(&ad[4..8]), 0x0002_0000);
        assert_eq!(BigEndian::read_u16(&ad[24..26]), 2);
        let fi = BigEndian::read_u32(&ad[30..34]) as usize;
        assert_eq!(&ad[fi..fi + 4], b"TEXT");
        assert_eq!(&ad[fi + 4..fi + 8], b"ttxt");
        let rsrc_offset = BigEndian::read_u32(&ad[42..46]) as usize;
        let rsrc_len = BigEndian::read_u32(&ad[46..50]) as usize;
        assert_eq!(rsrc_len, 2);
        assert_eq!(&ad[rsrc_offset..rsrc_offset + 2], &[0xDE, 0xAD]);
    }

    #[test]
    fn test_macbinary_layout() {
        let mb = build_macbinary("test.txt", b"TEXT", b"ttxt", b"hello", &[1, 2, 3]);
        assert_eq!(mb[1], 8);
        assert_eq!(&mb[2..10], b"test.txt");
        assert_eq!(&mb[65..69], b"TEXT");
        assert_eq!(&mb[69..73], b"ttxt");
        assert_eq!(BigEndian::read_u32(&mb[83..87]), 5);
        assert_eq!(BigEndian::read_u32(&mb[87..91]), 3);
        assert_eq!(mb[122], 130);
        assert_eq!(&mb[128..133], b"hello");
        // Resource fork begins after the data fork's 128-byte padding.
        assert_eq!(&mb[256..259], &[1, 2, 3]);
    }

    #[test]
    fn test_macbinary_crc() {
        assert_eq!(macbinary_crc16(&[0u8; 124]), 0);
    }

    #[test]
    fn test_pad_to_128() {
        assert_eq!(pad_to_128(0), 0);
        assert_eq!(pad_to_128(1), 128);
        assert_eq!(pad_to_128(128), 128);
        assert_eq!(pad_to_128(129), 256);
    }

    #[test]
    fn test_fork_mode_parse() {
        assert_eq!("appledouble".parse::<ForkMode>().unwrap(), ForkMode::AppleDouble);
        assert_eq!("macbinary".parse::<ForkMode>().unwrap(), ForkMode::MacBinary);
        assert_eq!("rsrc".parse::<ForkMode>().unwrap(), ForkMode::SeparateRsrc);
        assert_eq!("data-only".parse::<ForkMode>().unwrap(), ForkMode::DataOnly);
        assert!("zip".parse::<ForkMode>().is_err());
    }
}
