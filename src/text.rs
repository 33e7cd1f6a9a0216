//! Name and timestamp decoding for classic Mac volumes.
//!
//! HFS stores names as MacRoman Pascal strings; HFS+ stores them as
//! UTF-16BE, fully decomposed in canonical order (TN1150 "HFS Plus
//! Names"). Decoding MacRoman therefore emits the decomposed spelling,
//! so the output is usable both for display and for building lookup
//! keys against HFS+ catalogs.

use std::collections::HashMap;
use std::sync::OnceLock;

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{MacFsError, Result};

/// Seconds between the Mac epoch (1904-01-01) and the Unix epoch.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// MacRoman bytes 0x80-0xFF. Each entry carries the decomposed spelling
/// (what decoding emits) and the precomposed equivalent accepted when
/// encoding operator-supplied names back to MacRoman.
static MAC_ROMAN_TABLE: [(&str, char); 128] = [
    ("A\u{0308}", '\u{00C4}'),
    ("A\u{030A}", '\u{00C5}'),
    ("C\u{0327}", '\u{00C7}'),
    ("E\u{0301}", '\u{00C9}'),
    ("N\u{0303}", '\u{00D1}'),
    ("O\u{0308}", '\u{00D6}'),
    ("U\u{0308}", '\u{00DC}'),
    ("a\u{0301}", '\u{00E1}'),
    ("a\u{0300}", '\u{00E0}'),
    ("a\u{0302}", '\u{00E2}'),
    ("a\u{0308}", '\u{00E4}'),
    ("a\u{0303}", '\u{00E3}'),
    ("a\u{030A}", '\u{00E5}'),
    ("c\u{0327}", '\u{00E7}'),
    ("e\u{0301}", '\u{00E9}'),
    ("e\u{0300}", '\u{00E8}'),
    ("e\u{0302}", '\u{00EA}'),
    ("e\u{0308}", '\u{00EB}'),
    ("i\u{0301}", '\u{00ED}'),
    ("i\u{0300}", '\u{00EC}'),
    ("i\u{0302}", '\u{00EE}'),
    ("i\u{0308}", '\u{00EF}'),
    ("n\u{0303}", '\u{00F1}'),
    ("o\u{0301}", '\u{00F3}'),
    ("o\u{0300}", '\u{00F2}'),
    ("o\u{0302}", '\u{00F4}'),
    ("o\u{0308}", '\u{00F6}'),
    ("o\u{0303}", '\u{00F5}'),
    ("u\u{0301}", '\u{00FA}'),
    ("u\u{0300}", '\u{00F9}'),
    ("u\u{0302}", '\u{00FB}'),
    ("u\u{0308}", '\u{00FC}'),
    ("\u{2020}", '\u{2020}'),
    ("\u{00B0}", '\u{00B0}'),
    ("\u{00A2}", '\u{00A2}'),
    ("\u{00A3}", '\u{00A3}'),
    ("\u{00A7}", '\u{00A7}'),
    ("\u{2022}", '\u{2022}'),
    ("\u{00B6}", '\u{00B6}'),
    ("\u{00DF}", '\u{00DF}'),
    ("\u{00AE}", '\u{00AE}'),
    ("\u{00A9}", '\u{00A9}'),
    ("\u{2122}", '\u{2122}'),
    ("\u{00B4}", '\u{00B4}'),
    ("\u{00A8}", '\u{00A8}'),
    ("=\u{0338}", '\u{2260}'),
    ("\u{00C6}", '\u{00C6}'),
    ("\u{00D8}", '\u{00D8}'),
    ("\u{221E}", '\u{221E}'),
    ("\u{00B1}", '\u{00B1}'),
    ("\u{2264}", '\u{2264}'),
    ("\u{2265}", '\u{2265}'),
    ("\u{00A5}", '\u{00A5}'),
    ("\u{00B5}", '\u{00B5}'),
    ("\u{2202}", '\u{2202}'),
    ("\u{2211}", '\u{2211}'),
    ("\u{220F}", '\u{220F}'),
    ("\u{03C0}", '\u{03C0}'),
    ("\u{222B}", '\u{222B}'),
    ("\u{00AA}", '\u{00AA}'),
    ("\u{00BA}", '\u{00BA}'),
    ("\u{03A9}", '\u{03A9}'),
    ("\u{00E6}", '\u{00E6}'),
    ("\u{00F8}", '\u{00F8}'),
    ("\u{00BF}", '\u{00BF}'),
    ("\u{00A1}", '\u{00A1}'),
    ("\u{00AC}", '\u{00AC}'),
    ("\u{221A}", '\u{221A}'),
    ("\u{0192}", '\u{0192}'),
    ("\u{2248}", '\u{2248}'),
    ("\u{2206}", '\u{2206}'),
    ("\u{00AB}", '\u{00AB}'),
    ("\u{00BB}", '\u{00BB}'),
    ("\u{2026}", '\u{2026}'),
    ("\u{00A0}", '\u{00A0}'),
    ("A\u{0300}", '\u{00C0}'),
    ("A\u{0303}", '\u{00C3}'),
    ("O\u{0303}", '\u{00D5}'),
    ("\u{0152}", '\u{0152}'),
    ("\u{0153}", '\u{0153}'),
    ("\u{2013}", '\u{2013}'),
    ("\u{2014}", '\u{2014}'),
    ("\u{201C}", '\u{201C}'),
    ("\u{201D}", '\u{201D}'),
    ("\u{2018}", '\u{2018}'),
    ("\u{2019}", '\u{2019}'),
    ("\u{00F7}", '\u{00F7}'),
    ("\u{25CA}", '\u{25CA}'),
    ("y\u{0308}", '\u{00FF}'),
    ("Y\u{0308}", '\u{0178}'),
    ("\u{2044}", '\u{2044}'),
    ("\u{20AC}", '\u{20AC}'),
    ("\u{2039}", '\u{2039}'),
    ("\u{203A}", '\u{203A}'),
    ("\u{FB01}", '\u{FB01}'),
    ("\u{FB02}", '\u{FB02}'),
    ("\u{2021}", '\u{2021}'),
    ("\u{00B7}", '\u{00B7}'),
    ("\u{201A}", '\u{201A}'),
    ("\u{201E}", '\u{201E}'),
    ("\u{2030}", '\u{2030}'),
    ("A\u{0302}", '\u{00C2}'),
    ("E\u{0302}", '\u{00CA}'),
    ("A\u{0301}", '\u{00C1}'),
    ("E\u{0308}", '\u{00CB}'),
    ("E\u{0300}", '\u{00C8}'),
    ("I\u{0301}", '\u{00CD}'),
    ("I\u{0302}", '\u{00CE}'),
    ("I\u{0308}", '\u{00CF}'),
    ("I\u{0300}", '\u{00CC}'),
    ("O\u{0301}", '\u{00D3}'),
    ("O\u{0302}", '\u{00D4}'),
    ("\u{F8FF}", '\u{F8FF}'),
    ("O\u{0300}", '\u{00D2}'),
    ("U\u{0301}", '\u{00DA}'),
    ("U\u{0302}", '\u{00DB}'),
    ("U\u{0300}", '\u{00D9}'),
    ("\u{0131}", '\u{0131}'),
    ("\u{02C6}", '\u{02C6}'),
    ("\u{02DC}", '\u{02DC}'),
    ("\u{00AF}", '\u{00AF}'),
    ("\u{02D8}", '\u{02D8}'),
    ("\u{02D9}", '\u{02D9}'),
    ("\u{02DA}", '\u{02DA}'),
    ("\u{00B8}", '\u{00B8}'),
    ("\u{02DD}", '\u{02DD}'),
    ("\u{02DB}", '\u{02DB}'),
    ("\u{02C7}", '\u{02C7}'),
];

/// Decode raw MacRoman bytes (no length prefix) to a decomposed string.
pub fn macroman_to_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        if b < 0x80 {
            out.push(b as char);
        } else {
            out.push_str(MAC_ROMAN_TABLE[(b - 0x80) as usize].0);
        }
    }
    out
}

/// Decode a length-prefixed MacRoman Pascal string.
pub fn pascal_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Err(MacFsError::OutputTooSmall { needed: 1, have: 0 });
    }
    let len = bytes[0] as usize;
    if 1 + len > bytes.len() {
        return Err(MacFsError::OutputTooSmall {
            needed: 1 + len,
            have: bytes.len(),
        });
    }
    Ok(macroman_to_string(&bytes[1..1 + len]))
}

/// Decode MacRoman bytes into a caller-supplied UTF-16 buffer, returning
/// the number of code units written. Decomposition can emit up to two
/// units per input byte; callers size `out` as `2 * bytes.len()` or more.
/// A too-small buffer fails with `OutputTooSmall` rather than truncating.
pub fn macroman_to_utf16(bytes: &[u8], out: &mut [u16]) -> Result<usize> {
    let mut n = 0;
    for &b in bytes {
        let s: &str = if b < 0x80 {
            n = push_unit(out, n, b as u16)?;
            continue;
        } else {
            MAC_ROMAN_TABLE[(b - 0x80) as usize].0
        };
        for unit in s.encode_utf16() {
            n = push_unit(out, n, unit)?;
        }
    }
    Ok(n)
}

fn push_unit(out: &mut [u16], n: usize, unit: u16) -> Result<usize> {
    if n >= out.len() {
        return Err(MacFsError::OutputTooSmall {
            needed: n + 1,
            have: out.len(),
        });
    }
    out[n] = unit;
    Ok(n + 1)
}

fn reverse_table() -> &'static HashMap<String, u8> {
    static MAP: OnceLock<HashMap<String, u8>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for (i, (decomposed, precomposed)) in MAC_ROMAN_TABLE.iter().enumerate() {
            let byte = 0x80 + i as u8;
            m.insert((*decomposed).to_string(), byte);
            m.insert(precomposed.to_string(), byte);
        }
        m
    })
}

/// Re-encode a Unicode name as MacRoman, accepting both decomposed and
/// precomposed spellings. Returns `None` when a character has no MacRoman
/// equivalent (such a name cannot exist on an HFS volume).
pub fn string_to_macroman(s: &str) -> Option<Vec<u8>> {
    let map = reverse_table();
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        // Greedy: a base letter plus combining mark is one MacRoman byte.
        if i + 1 < chars.len() {
            let pair: String = chars[i..i + 2].iter().collect();
            if let Some(&b) = map.get(&pair) {
                out.push(b);
                i += 2;
                continue;
            }
        }
        let single = chars[i].to_string();
        if let Some(&b) = map.get(&single) {
            out.push(b);
        } else if (chars[i] as u32) < 0x80 {
            out.push(chars[i] as u8);
        } else {
            return None;
        }
        i += 1;
    }
    Some(out)
}

/// Swap UTF-16BE bytes to host-order code units.
pub fn utf16be_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(BigEndian::read_u16)
        .collect()
}

pub fn utf16_to_string(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

/// Decode an HFSUniStr255 (u16 count + UTF-16BE units). Returns the code
/// units and the total encoded length in bytes.
pub fn unistr255(bytes: &[u8]) -> Result<(Vec<u16>, usize)> {
    if bytes.len() < 2 {
        return Err(MacFsError::OutputTooSmall {
            needed: 2,
            have: bytes.len(),
        });
    }
    let count = BigEndian::read_u16(&bytes[0..2]) as usize;
    let end = 2 + count * 2;
    if end > bytes.len() {
        return Err(MacFsError::OutputTooSmall {
            needed: end,
            have: bytes.len(),
        });
    }
    Ok((utf16be_units(&bytes[2..end]), end))
}

/// Case-fold one code unit per the HFS+ catalog ordering
/// (FastUnicodeCompare, TN1150). `None` means the unit is ignored.
fn fold_unit(u: u16) -> Option<u16> {
    let folded = match u {
        0x0000 => return None,
        0x0041..=0x005A => u + 0x20,
        0x00C0..=0x00D6 | 0x00D8..=0x00DE => u + 0x20,
        0x0100..=0x012E | 0x0132..=0x0136 | 0x014A..=0x0176 if u % 2 == 0 => u + 1,
        0x0139..=0x0147 | 0x0179..=0x017D if u % 2 == 1 => u + 1,
        0x0178 => 0x00FF,
        0x0391..=0x03A9 if u != 0x03A2 => u + 0x20,
        0x0410..=0x042F => u + 0x20,
        0x0400..=0x040F => u + 0x50,
        _ => u,
    };
    Some(folded)
}

/// Order two HFS+ names the way the catalog B-tree does: case-folded,
/// ignorable units skipped.
pub fn hfsplus_name_order(a: &[u16], b: &[u16]) -> std::cmp::Ordering {
    let mut ai = a.iter().filter_map(|&u| fold_unit(u));
    let mut bi = b.iter().filter_map(|&u| fold_unit(u));
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

/// Case-insensitive name equality shared by both volume kinds.
pub fn names_match(a: &[u16], b: &[u16]) -> bool {
    hfsplus_name_order(a, b) == std::cmp::Ordering::Equal
}

/// Convert a Mac timestamp (seconds since 1904-01-01) to UTC. Zero means
/// unset and maps to `None`.
pub fn mac_timestamp(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs as i64 - MAC_EPOCH_OFFSET, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        assert_eq!(macroman_to_string(b"Hello World"), "Hello World");
    }

    #[test]
    fn test_decode_is_decomposed() {
        // 0x8E is MacRoman e-acute; decoding emits e + combining acute.
        let got = macroman_to_string(&[0x43, 0x61, 0x66, 0x8E]);
        assert_eq!(got, "Caf\u{0065}\u{0301}");
    }

    #[test]
    fn test_pascal_decode() {
        let got = pascal_to_string(&[0x04, 0x43, 0x61, 0x66, 0x8E]).unwrap();
        let units: Vec<u16> = got.encode_utf16().collect();
        assert_eq!(units, [0x0043, 0x0061, 0x0066, 0x0065, 0x0301]);
    }

    #[test]
    fn test_pascal_length_beyond_buffer() {
        assert!(pascal_to_string(&[0x05, b'a']).is_err());
    }

    #[test]
    fn test_roundtrip_every_byte() {
        for b in 0u8..=0xFF {
            let decoded = macroman_to_string(&[b]);
            let encoded = string_to_macroman(&decoded)
                .unwrap_or_else(|| panic!("byte 0x{b:02X} did not re-encode"));
            assert_eq!(encoded, [b], "byte 0x{b:02X} round-trip");
        }
    }

    #[test]
    fn test_encode_accepts_precomposed() {
        assert_eq!(string_to_macroman("Caf\u{00E9}").unwrap(), b"\x43\x61\x66\x8E");
        assert_eq!(string_to_macroman("\u{00C4}").unwrap(), [0x80]);
    }

    #[test]
    fn test_encode_rejects_unmappable() {
        assert!(string_to_macroman("\u{4E2D}").is_none());
    }

    #[test]
    fn test_utf16_buffer_too_small() {
        let mut buf = [0u16; 3];
        let err = macroman_to_utf16(&[0x8E, 0x8E], &mut buf).unwrap_err();
        assert!(matches!(err, MacFsError::OutputTooSmall { .. }));
        // 2x sizing always suffices.
        let mut buf = [0u16; 4];
        assert_eq!(macroman_to_utf16(&[0x8E, 0x8E], &mut buf).unwrap(), 4);
    }

    #[test]
    fn test_utf16be_decode() {
        let data = [0x00, 0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F];
        assert_eq!(utf16_to_string(&utf16be_units(&data)), "Hello");
    }

    #[test]
    fn test_unistr255() {
        let data = [0x00, 0x02, 0x00, 0x48, 0x00, 0x69, 0xAA, 0xBB];
        let (units, len) = unistr255(&data).unwrap();
        assert_eq!(utf16_to_string(&units), "Hi");
        assert_eq!(len, 6);
    }

    #[test]
    fn test_name_order_case_folds() {
        let a: Vec<u16> = "readme".encode_utf16().collect();
        let b: Vec<u16> = "README".encode_utf16().collect();
        assert_eq!(hfsplus_name_order(&a, &b), std::cmp::Ordering::Equal);

        let c: Vec<u16> = "alpha".encode_utf16().collect();
        let d: Vec<u16> = "Beta".encode_utf16().collect();
        assert_eq!(hfsplus_name_order(&c, &d), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_name_order_ignores_nul() {
        let a: Vec<u16> = vec![0x0061, 0x0000, 0x0062];
        let b: Vec<u16> = vec![0x0061, 0x0062];
        assert!(names_match(&a, &b));
    }

    #[test]
    fn test_mac_timestamp() {
        assert!(mac_timestamp(0).is_none());
        // 1904-01-01 00:00:01
        let dt = mac_timestamp(1).unwrap();
        assert_eq!(dt.timestamp(), 1 - 2_082_844_800);
        // 2^31 lands in 1972.
        let dt = mac_timestamp(0x8000_0000).unwrap();
        assert_eq!(dt.format("%Y").to_string(), "1972");
    }
}
