//! Catalog B-tree semantics: keys, typed records, directory enumeration,
//! and thread-record path reconstruction, for both HFS (MacRoman Pascal
//! names, Inside Macintosh: Files §2) and HFS+ (UTF-16BE names, TN1150).

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};

use crate::btree::{BTreeFile, KeyCompare, KeyOrder, Walk};
use crate::error::{MacFsError, Result};
use crate::text;
use crate::volume::{
    parse_hfs_extent_record, ForkData, VolumeKind, CNID_ROOT_FOLDER, CNID_ROOT_PARENT,
};

// HFS record types: one byte, followed by a reserved byte.
pub const HFS_REC_FOLDER: u8 = 1;
pub const HFS_REC_FILE: u8 = 2;
pub const HFS_REC_FOLDER_THREAD: u8 = 3;
pub const HFS_REC_FILE_THREAD: u8 = 4;

// HFS+ record types: one big-endian u16.
pub const HFSPLUS_REC_FOLDER: u16 = 1;
pub const HFSPLUS_REC_FILE: u16 = 2;
pub const HFSPLUS_REC_FOLDER_THREAD: u16 = 3;
pub const HFSPLUS_REC_FILE_THREAD: u16 = 4;

/// A catalog key: parent CNID plus node name, held as host-order UTF-16
/// code units (MacRoman names are decoded on parse).
#[derive(Debug, Clone)]
pub struct CatalogKey {
    pub parent_id: u32,
    pub name: Vec<u16>,
}

impl CatalogKey {
    pub fn name_string(&self) -> String {
        text::utf16_to_string(&self.name)
    }
}

/// Parse a catalog key (length prefix already stripped by the node
/// layer). Returns `None` on malformed bytes; callers escalate that to
/// `CorruptNode` with the node number in hand.
pub fn parse_catalog_key(key: &[u8], kind: VolumeKind) -> Option<CatalogKey> {
    match kind {
        VolumeKind::Hfs => {
            // ckrResrv1, ckrParID, ckrCName.
            if key.len() < 6 {
                return None;
            }
            let parent_id = BigEndian::read_u32(&key[1..5]);
            let name_len = key[5] as usize;
            if 6 + name_len > key.len() {
                return None;
            }
            let mut units = vec![0u16; name_len * 2];
            let n = text::macroman_to_utf16(&key[6..6 + name_len], &mut units).ok()?;
            units.truncate(n);
            Some(CatalogKey {
                parent_id,
                name: units,
            })
        }
        VolumeKind::HfsPlus => {
            if key.len() < 6 {
                return None;
            }
            let parent_id = BigEndian::read_u32(&key[0..4]);
            let count = BigEndian::read_u16(&key[4..6]) as usize;
            if 6 + count * 2 > key.len() {
                return None;
            }
            Some(CatalogKey {
                parent_id,
                name: text::utf16be_units(&key[6..6 + count * 2]),
            })
        }
    }
}

/// BSD permissions attached to HFS+ records.
#[derive(Debug, Clone, Copy)]
pub struct BsdInfo {
    pub owner_id: u32,
    pub group_id: u32,
    pub file_mode: u16,
}

#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub id: u32,
    pub flags: u16,
    pub valence: u32,
    pub create_date: u32,
    pub modify_date: u32,
    pub bsd: Option<BsdInfo>,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: u32,
    pub type_code: [u8; 4],
    pub creator_code: [u8; 4],
    pub create_date: u32,
    pub modify_date: u32,
    pub bsd: Option<BsdInfo>,
    pub data_fork: ForkData,
    pub resource_fork: ForkData,
}

#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub parent_id: u32,
    pub name: Vec<u16>,
}

#[derive(Debug, Clone)]
pub enum CatalogRecord {
    Folder(FolderRecord),
    File(FileRecord),
    FolderThread(ThreadRecord),
    FileThread(ThreadRecord),
}

impl CatalogRecord {
    pub fn type_name(&self) -> &'static str {
        match self {
            CatalogRecord::Folder(_) => "folder",
            CatalogRecord::File(_) => "file",
            CatalogRecord::FolderThread(_) => "folder-thread",
            CatalogRecord::FileThread(_) => "file-thread",
        }
    }
}

fn parse_bsd(data: &[u8]) -> BsdInfo {
    BsdInfo {
        owner_id: BigEndian::read_u32(&data[0..4]),
        group_id: BigEndian::read_u32(&data[4..8]),
        file_mode: BigEndian::read_u16(&data[10..12]),
    }
}

/// HFS fork descriptor from a catalog file record: logical length,
/// physical length, and the first extent record.
fn hfs_fork(logical: u32, physical: u32, extent_record: &[u8], alloc_block_size: u32) -> ForkData {
    ForkData {
        logical_size: logical as u64,
        clump_size: 0,
        total_blocks: physical / alloc_block_size.max(1),
        extents: parse_hfs_extent_record(extent_record),
    }
}

fn parse_hfs_record(payload: &[u8], alloc_block_size: u32) -> Option<CatalogRecord> {
    if payload.len() < 2 {
        return None;
    }
    match payload[0] {
        HFS_REC_FOLDER if payload.len() >= 70 => Some(CatalogRecord::Folder(FolderRecord {
            flags: BigEndian::read_u16(&payload[2..4]),
            valence: BigEndian::read_u16(&payload[4..6]) as u32,
            id: BigEndian::read_u32(&payload[6..10]),
            create_date: BigEndian::read_u32(&payload[10..14]),
            modify_date: BigEndian::read_u32(&payload[14..18]),
            bsd: None,
        })),
        HFS_REC_FILE if payload.len() >= 102 => {
            let mut type_code = [0u8; 4];
            let mut creator_code = [0u8; 4];
            type_code.copy_from_slice(&payload[4..8]);
            creator_code.copy_from_slice(&payload[8..12]);
            Some(CatalogRecord::File(FileRecord {
                type_code,
                creator_code,
                id: BigEndian::read_u32(&payload[20..24]),
                data_fork: hfs_fork(
                    BigEndian::read_u32(&payload[26..30]),
                    BigEndian::read_u32(&payload[30..34]),
                    &payload[74..86],
                    alloc_block_size,
                ),
                resource_fork: hfs_fork(
                    BigEndian::read_u32(&payload[36..40]),
                    BigEndian::read_u32(&payload[40..44]),
                    &payload[86..98],
                    alloc_block_size,
                ),
                create_date: BigEndian::read_u32(&payload[44..48]),
                modify_date: BigEndian::read_u32(&payload[48..52]),
                bsd: None,
            }))
        }
        t @ (HFS_REC_FOLDER_THREAD | HFS_REC_FILE_THREAD) if payload.len() >= 15 => {
            let parent_id = BigEndian::read_u32(&payload[10..14]);
            let name_len = payload[14] as usize;
            if 15 + name_len > payload.len() {
                return None;
            }
            let mut units = vec![0u16; name_len * 2];
            let n = text::macroman_to_utf16(&payload[15..15 + name_len], &mut units).ok()?;
            units.truncate(n);
            let thread = ThreadRecord {
                parent_id,
                name: units,
            };
            Some(if t == HFS_REC_FOLDER_THREAD {
                CatalogRecord::FolderThread(thread)
            } else {
                CatalogRecord::FileThread(thread)
            })
        }
        _ => None,
    }
}

fn parse_hfsplus_record(payload: &[u8]) -> Option<CatalogRecord> {
    if payload.len() < 2 {
        return None;
    }
    match BigEndian::read_u16(&payload[0..2]) {
        HFSPLUS_REC_FOLDER if payload.len() >= 88 => Some(CatalogRecord::Folder(FolderRecord {
            flags: BigEndian::read_u16(&payload[2..4]),
            valence: BigEndian::read_u32(&payload[4..8]),
            id: BigEndian::read_u32(&payload[8..12]),
            create_date: BigEndian::read_u32(&payload[12..16]),
            modify_date: BigEndian::read_u32(&payload[16..20]),
            bsd: Some(parse_bsd(&payload[32..48])),
        })),
        HFSPLUS_REC_FILE if payload.len() >= 248 => {
            let mut type_code = [0u8; 4];
            let mut creator_code = [0u8; 4];
            type_code.copy_from_slice(&payload[48..52]);
            creator_code.copy_from_slice(&payload[52..56]);
            Some(CatalogRecord::File(FileRecord {
                id: BigEndian::read_u32(&payload[8..12]),
                create_date: BigEndian::read_u32(&payload[12..16]),
                modify_date: BigEndian::read_u32(&payload[16..20]),
                bsd: Some(parse_bsd(&payload[32..48])),
                type_code,
                creator_code,
                data_fork: ForkData::parse_hfsplus(&payload[88..168]),
                resource_fork: ForkData::parse_hfsplus(&payload[168..248]),
            }))
        }
        t @ (HFSPLUS_REC_FOLDER_THREAD | HFSPLUS_REC_FILE_THREAD) if payload.len() >= 8 => {
            let parent_id = BigEndian::read_u32(&payload[4..8]);
            let (name, _) = text::unistr255(&payload[8..]).ok()?;
            let thread = ThreadRecord { parent_id, name };
            Some(if t == HFSPLUS_REC_FOLDER_THREAD {
                CatalogRecord::FolderThread(thread)
            } else {
                CatalogRecord::FileThread(thread)
            })
        }
        _ => None,
    }
}

/// Typed dispatch over a catalog leaf payload.
pub fn parse_record(
    payload: &[u8],
    kind: VolumeKind,
    alloc_block_size: u32,
) -> Option<CatalogRecord> {
    match kind {
        VolumeKind::Hfs => parse_hfs_record(payload, alloc_block_size),
        VolumeKind::HfsPlus => parse_hfsplus_record(payload),
    }
}

/// The logical view of a catalog entry, materialized when a leaf record
/// is visited. Holds value-typed copies only.
#[derive(Debug, Clone)]
pub struct DehydratedItem {
    pub cnid: u32,
    pub parent_id: u32,
    pub name: String,
    pub is_folder: bool,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub type_code: Option<[u8; 4]>,
    pub creator_code: Option<[u8; 4]>,
    pub bsd: Option<BsdInfo>,
    pub valence: u32,
    pub data_fork: Option<ForkData>,
    pub resource_fork: Option<ForkData>,
}

impl DehydratedItem {
    /// Build from a key/record pair; thread records yield `None`.
    pub fn from_record(key: &CatalogKey, record: &CatalogRecord) -> Option<DehydratedItem> {
        match record {
            CatalogRecord::Folder(f) => Some(DehydratedItem {
                cnid: f.id,
                parent_id: key.parent_id,
                name: key.name_string(),
                is_folder: true,
                created: text::mac_timestamp(f.create_date),
                modified: text::mac_timestamp(f.modify_date),
                type_code: None,
                creator_code: None,
                bsd: f.bsd,
                valence: f.valence,
                data_fork: None,
                resource_fork: None,
            }),
            CatalogRecord::File(f) => Some(DehydratedItem {
                cnid: f.id,
                parent_id: key.parent_id,
                name: key.name_string(),
                is_folder: false,
                created: text::mac_timestamp(f.create_date),
                modified: text::mac_timestamp(f.modify_date),
                type_code: Some(f.type_code),
                creator_code: Some(f.creator_code),
                bsd: f.bsd,
                valence: 0,
                data_fork: Some(f.data_fork.clone()),
                resource_fork: Some(f.resource_fork.clone()),
            }),
            _ => None,
        }
    }
}

/// Convert an operator-supplied name to the decomposed code units the
/// catalog stores. Names that round-trip through MacRoman pick up the
/// HFS+ decomposition on the way.
pub fn name_units(name: &str) -> Vec<u16> {
    if let Some(bytes) = text::string_to_macroman(name) {
        let mut units = vec![0u16; bytes.len() * 2];
        if let Ok(n) = text::macroman_to_utf16(&bytes, &mut units) {
            units.truncate(n);
            return units;
        }
    }
    name.encode_utf16().collect()
}

/// Search key for the catalog tree, ordered the way the volume's own
/// tree is ordered: MacRoman byte order for HFS, case-folded
/// FastUnicodeCompare for HFS+.
pub struct CatalogQuarry {
    parent_id: u32,
    kind: VolumeKind,
    /// Decomposed units, used for HFS+ ordering.
    units: Vec<u16>,
    /// MacRoman bytes, used for HFS ordering.
    macroman: Vec<u8>,
}

impl CatalogQuarry {
    /// The `(parent, empty-name)` quarry that lands on a thread record
    /// (or the start of the parent's record window).
    pub fn thread(parent_id: u32, kind: VolumeKind) -> CatalogQuarry {
        CatalogQuarry {
            parent_id,
            kind,
            units: Vec::new(),
            macroman: Vec::new(),
        }
    }

    /// A named quarry. Returns `None` for an HFS volume when the name has
    /// no MacRoman spelling (no byte-exact match can exist).
    pub fn named(parent_id: u32, name: &str, kind: VolumeKind) -> Option<CatalogQuarry> {
        let macroman = match kind {
            VolumeKind::Hfs => text::string_to_macroman(name)?,
            VolumeKind::HfsPlus => Vec::new(),
        };
        Some(CatalogQuarry {
            parent_id,
            kind,
            units: name_units(name),
            macroman,
        })
    }
}

impl KeyCompare for CatalogQuarry {
    fn compare(&self, candidate_key: &[u8]) -> KeyOrder {
        let order = |o: std::cmp::Ordering| match o {
            std::cmp::Ordering::Less => KeyOrder::Lesser,
            std::cmp::Ordering::Equal => KeyOrder::Equal,
            std::cmp::Ordering::Greater => KeyOrder::Greater,
        };
        match self.kind {
            VolumeKind::Hfs => {
                if candidate_key.len() < 6 {
                    return KeyOrder::Incomparable;
                }
                let parent = BigEndian::read_u32(&candidate_key[1..5]);
                if self.parent_id != parent {
                    return order(self.parent_id.cmp(&parent));
                }
                let name_len = candidate_key[5] as usize;
                if 6 + name_len > candidate_key.len() {
                    return KeyOrder::Incomparable;
                }
                order(
                    self.macroman
                        .as_slice()
                        .cmp(&candidate_key[6..6 + name_len]),
                )
            }
            VolumeKind::HfsPlus => {
                if candidate_key.len() < 6 {
                    return KeyOrder::Incomparable;
                }
                let parent = BigEndian::read_u32(&candidate_key[0..4]);
                if self.parent_id != parent {
                    return order(self.parent_id.cmp(&parent));
                }
                let count = BigEndian::read_u16(&candidate_key[4..6]) as usize;
                if 6 + count * 2 > candidate_key.len() {
                    return KeyOrder::Incomparable;
                }
                let candidate = text::utf16be_units(&candidate_key[6..6 + count * 2]);
                order(text::hfsplus_name_order(&self.units, &candidate))
            }
        }
    }
}

/// Enumerate the children of `parent` in catalog key order, dispatching
/// each materialized item to the visitor until it stops or the key window
/// ends.
pub fn for_each_child(
    tree: &mut BTreeFile,
    kind: VolumeKind,
    alloc_block_size: u32,
    parent: u32,
    visit: &mut dyn FnMut(&DehydratedItem) -> Walk,
) -> Result<()> {
    let quarry = CatalogQuarry::thread(parent, kind);
    let Some(hit) = tree.search(&quarry)? else {
        return Ok(());
    };

    let mut pos = Some((hit.node, hit.record));
    while let Some((node_index, record)) = pos {
        let node = tree.node(node_index)?;
        let (key_bytes, payload) = node.split_record(record)?;
        let key = parse_catalog_key(key_bytes, kind)
            .ok_or_else(|| MacFsError::corrupt_node(node_index, "malformed catalog key"))?;
        if key.parent_id != parent {
            break;
        }
        let record_parsed = parse_record(payload, kind, alloc_block_size)
            .ok_or_else(|| MacFsError::corrupt_node(node_index, "malformed catalog record"))?;
        if let Some(item) = DehydratedItem::from_record(&key, &record_parsed) {
            if visit(&item) == Walk::Stop {
                return Ok(());
            }
        }
        pos = tree.step_forward(node_index, record)?;
    }
    Ok(())
}

/// Collect the children of `parent`.
pub fn children(
    tree: &mut BTreeFile,
    kind: VolumeKind,
    alloc_block_size: u32,
    parent: u32,
) -> Result<Vec<DehydratedItem>> {
    let mut out = Vec::new();
    for_each_child(tree, kind, alloc_block_size, parent, &mut |item| {
        out.push(item.clone());
        Walk::Continue
    })?;
    Ok(out)
}

/// Look up one child of `parent` by name. Descent uses the volume's
/// native key order; when that finds nothing, a case-insensitive scan of
/// the parent's record window runs as a fallback.
pub fn lookup(
    tree: &mut BTreeFile,
    kind: VolumeKind,
    alloc_block_size: u32,
    parent: u32,
    name: &str,
) -> Result<Option<DehydratedItem>> {
    if let Some(quarry) = CatalogQuarry::named(parent, name, kind) {
        if let Some(hit) = tree.search(&quarry)? {
            if hit.exact {
                let node = tree.node(hit.node)?;
                let (key_bytes, payload) = node.split_record(hit.record)?;
                let key = parse_catalog_key(key_bytes, kind)
                    .ok_or_else(|| MacFsError::corrupt_node(hit.node, "malformed catalog key"))?;
                let record = parse_record(payload, kind, alloc_block_size)
                    .ok_or_else(|| MacFsError::corrupt_node(hit.node, "malformed catalog record"))?;
                return Ok(DehydratedItem::from_record(&key, &record));
            }
        }
    }

    // Leaf-level case-insensitive match.
    let wanted = name_units(name);
    let mut found = None;
    for_each_child(tree, kind, alloc_block_size, parent, &mut |item| {
        let candidate: Vec<u16> = item.name.encode_utf16().collect();
        if text::names_match(&candidate, &wanted) {
            found = Some(item.clone());
            Walk::Stop
        } else {
            Walk::Continue
        }
    })?;
    Ok(found)
}

/// Fetch the thread record of `cnid`, keyed `(cnid, empty-name)`.
pub fn thread_of(tree: &mut BTreeFile, kind: VolumeKind, cnid: u32) -> Result<Option<ThreadRecord>> {
    let quarry = CatalogQuarry::thread(cnid, kind);
    let Some(hit) = tree.search(&quarry)? else {
        return Ok(None);
    };
    if !hit.exact {
        return Ok(None);
    }
    let node = tree.node(hit.node)?;
    let payload = node.record_payload(hit.record)?;
    match parse_record(payload, kind, 1) {
        Some(CatalogRecord::FolderThread(t)) | Some(CatalogRecord::FileThread(t)) => Ok(Some(t)),
        _ => Ok(None),
    }
}

/// The volume name, as recorded in the root folder's thread record.
pub fn root_folder_name(tree: &mut BTreeFile, kind: VolumeKind) -> Result<String> {
    match thread_of(tree, kind, CNID_ROOT_FOLDER)? {
        Some(thread) => Ok(text::utf16_to_string(&thread.name)),
        None => Err(MacFsError::BrokenChain(CNID_ROOT_FOLDER)),
    }
}

/// Reconstruct the colon-separated path of an item by following thread
/// records upward until the root. `BrokenChain` when a required thread is
/// absent.
pub fn path_of(
    tree: &mut BTreeFile,
    kind: VolumeKind,
    parent_id: u32,
    leaf_name: &str,
) -> Result<String> {
    let mut components = vec![leaf_name.to_string()];
    let mut current = parent_id;
    let mut hops = 0u32;
    while current != CNID_ROOT_PARENT {
        hops += 1;
        if hops > 1024 {
            return Err(MacFsError::BrokenChain(current));
        }
        let thread = thread_of(tree, kind, current)?.ok_or(MacFsError::BrokenChain(current))?;
        components.push(text::utf16_to_string(&thread.name));
        current = thread.parent_id;
    }
    components.reverse();
    Ok(components.join(":"))
}

/// Resolve path components (volume-root relative) to an item.
pub fn resolve(
    tree: &mut BTreeFile,
    kind: VolumeKind,
    alloc_block_size: u32,
    components: &[String],
) -> Result<DehydratedItem> {
    let mut parent = CNID_ROOT_FOLDER;
    let mut item = None;
    for (i, component) in components.iter().enumerate() {
        let found = lookup(tree, kind, alloc_block_size, parent, component)?
            .ok_or_else(|| MacFsError::NotFound(components[..=i].join(":")))?;
        if i + 1 < components.len() {
            if !found.is_folder {
                return Err(MacFsError::NotFound(components.join(":")));
            }
            parent = found.cnid;
        }
        item = Some(found);
    }
    item.ok_or_else(|| MacFsError::NotFound(String::new()))
}

/// Scan every leaf record for the first file whose name matches
/// case-insensitively. Used for bare-name extraction quarries.
pub fn find_file_by_name(
    tree: &mut BTreeFile,
    kind: VolumeKind,
    alloc_block_size: u32,
    name: &str,
) -> Result<Option<DehydratedItem>> {
    let wanted = name_units(name);
    let mut found: Option<DehydratedItem> = None;
    let mut walk_error: Option<MacFsError> = None;

    tree.walk_leaves(&mut |node| {
        for i in 0..node.record_count() {
            let Ok((key_bytes, payload)) = node.split_record(i) else {
                walk_error = Some(MacFsError::corrupt_node(node.index, "bad record bounds"));
                return Walk::Stop;
            };
            let Some(key) = parse_catalog_key(key_bytes, kind) else {
                continue;
            };
            if !text::names_match(&key.name, &wanted) {
                continue;
            }
            if let Some(record @ CatalogRecord::File(_)) =
                parse_record(payload, kind, alloc_block_size)
            {
                found = DehydratedItem::from_record(&key, &record);
                return Walk::Stop;
            }
        }
        Walk::Continue
    })?;

    match walk_error {
        Some(e) => Err(e),
        None => Ok(found),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// HFS+ catalog key: u16 length, parent, HFSUniStr255 name.
    pub fn hfsplus_key(parent: u32, name: &str) -> Vec<u8> {
        let units: Vec<u16> = super::name_units(name);
        let key_len = 6 + units.len() * 2;
        let mut key = Vec::with_capacity(2 + key_len);
        key.extend_from_slice(&(key_len as u16).to_be_bytes());
        key.extend_from_slice(&parent.to_be_bytes());
        key.extend_from_slice(&(units.len() as u16).to_be_bytes());
        for u in units {
            key.extend_from_slice(&u.to_be_bytes());
        }
        key
    }

    pub fn hfsplus_folder_record(parent: u32, name: &str, id: u32, valence: u32) -> Vec<u8> {
        let mut rec = hfsplus_key(parent, name);
        let mut payload = vec![0u8; 88];
        BigEndian::write_u16(&mut payload[0..2], HFSPLUS_REC_FOLDER);
        BigEndian::write_u32(&mut payload[4..8], valence);
        BigEndian::write_u32(&mut payload[8..12], id);
        BigEndian::write_u32(&mut payload[12..16], 0x8000_0000); // create date
        rec.extend_from_slice(&payload);
        rec
    }

    pub fn hfsplus_file_record(
        parent: u32,
        name: &str,
        id: u32,
        data_size: u64,
        data_blocks: u32,
        data_extents: &[(u32, u32)],
    ) -> Vec<u8> {
        let mut rec = hfsplus_key(parent, name);
        let mut payload = vec![0u8; 248];
        BigEndian::write_u16(&mut payload[0..2], HFSPLUS_REC_FILE);
        BigEndian::write_u32(&mut payload[8..12], id);
        payload[48..52].copy_from_slice(b"TEXT");
        payload[52..56].copy_from_slice(b"ttxt");
        BigEndian::write_u64(&mut payload[88..96], data_size);
        BigEndian::write_u32(&mut payload[100..104], data_blocks);
        for (i, (s, c)) in data_extents.iter().enumerate().take(8) {
            BigEndian::write_u32(&mut payload[104 + i * 8..108 + i * 8], *s);
            BigEndian::write_u32(&mut payload[108 + i * 8..112 + i * 8], *c);
        }
        rec.extend_from_slice(&payload);
        rec
    }

    pub fn hfsplus_thread_record(cnid: u32, parent: u32, name: &str, folder: bool) -> Vec<u8> {
        let mut rec = hfsplus_key(cnid, "");
        let units: Vec<u16> = super::name_units(name);
        let mut payload = vec![0u8; 8 + 2 + units.len() * 2];
        BigEndian::write_u16(
            &mut payload[0..2],
            if folder {
                HFSPLUS_REC_FOLDER_THREAD
            } else {
                HFSPLUS_REC_FILE_THREAD
            },
        );
        BigEndian::write_u32(&mut payload[4..8], parent);
        BigEndian::write_u16(&mut payload[8..10], units.len() as u16);
        for (i, u) in units.iter().enumerate() {
            payload[10 + i * 2..12 + i * 2].copy_from_slice(&u.to_be_bytes());
        }
        rec.extend_from_slice(&payload);
        rec
    }
}
