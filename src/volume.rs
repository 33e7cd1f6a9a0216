use byteorder::{BigEndian, ByteOrder};
use log::warn;
use std::io::{Read, Seek};

use crate::btree::BTreeFile;
use crate::catalog;
use crate::device::BlockDevice;
use crate::error::{MacFsError, Result};
use crate::fork::{ForkReader, ForkType};
use crate::text;

pub const HFS_SIGNATURE: u16 = 0x4244; // 'BD'
pub const HFS_PLUS_SIGNATURE: u16 = 0x482B; // 'H+'
pub const HFSX_SIGNATURE: u16 = 0x4858; // 'HX'

/// Reserved Catalog Node IDs.
pub const CNID_ROOT_PARENT: u32 = 1;
pub const CNID_ROOT_FOLDER: u32 = 2;
pub const CNID_EXTENTS_FILE: u32 = 3;
pub const CNID_CATALOG_FILE: u32 = 4;
pub const CNID_BAD_BLOCKS_FILE: u32 = 5;
pub const CNID_ALLOCATION_FILE: u32 = 6;
pub const CNID_STARTUP_FILE: u32 = 7;
pub const CNID_ATTRIBUTES_FILE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    Hfs,
    HfsPlus,
}

impl std::fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeKind::Hfs => write!(f, "HFS"),
            VolumeKind::HfsPlus => write!(f, "HFS+"),
        }
    }
}

/// A contiguous run of allocation blocks. HFS extents are 16-bit on disk
/// and widen on parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub start_block: u32,
    pub block_count: u32,
}

impl Extent {
    pub fn parse_hfs(data: &[u8]) -> Self {
        Extent {
            start_block: BigEndian::read_u16(&data[0..2]) as u32,
            block_count: BigEndian::read_u16(&data[2..4]) as u32,
        }
    }

    pub fn parse_hfsplus(data: &[u8]) -> Self {
        Extent {
            start_block: BigEndian::read_u32(&data[0..4]),
            block_count: BigEndian::read_u32(&data[4..8]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }
}

/// Parse an HFS extent record (three 16-bit extents, 12 bytes).
pub fn parse_hfs_extent_record(data: &[u8]) -> Vec<Extent> {
    (0..3)
        .map(|i| Extent::parse_hfs(&data[i * 4..i * 4 + 4]))
        .collect()
}

/// Parse an HFS+ extent record (eight 32-bit extents, 64 bytes).
pub fn parse_hfsplus_extent_record(data: &[u8]) -> Vec<Extent> {
    (0..8)
        .map(|i| Extent::parse_hfsplus(&data[i * 8..i * 8 + 8]))
        .collect()
}

/// Fork descriptor: logical size plus the inline extent record.
#[derive(Debug, Clone, Default)]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,
    pub extents: Vec<Extent>,
}

impl ForkData {
    /// HFS+ HFSPlusForkData, 80 bytes.
    pub fn parse_hfsplus(data: &[u8]) -> Self {
        ForkData {
            logical_size: BigEndian::read_u64(&data[0..8]),
            clump_size: BigEndian::read_u32(&data[8..12]),
            total_blocks: BigEndian::read_u32(&data[12..16]),
            extents: parse_hfsplus_extent_record(&data[16..80]),
        }
    }

    /// HFS forks carry a byte size and a three-extent record; the block
    /// count is derived from the allocation block size.
    pub fn from_hfs(size: u32, clump_size: u32, extent_record: &[u8], alloc_block_size: u32) -> Self {
        ForkData {
            logical_size: size as u64,
            clump_size,
            total_blocks: size.div_ceil(alloc_block_size),
            extents: parse_hfs_extent_record(extent_record),
        }
    }

    pub fn inline_blocks(&self) -> u32 {
        self.extents.iter().map(|e| e.block_count).sum()
    }

    pub fn physical_size(&self, alloc_block_size: u32) -> u64 {
        self.total_blocks as u64 * alloc_block_size as u64
    }
}

/// HFS Master Directory Block, 162 bytes at volume offset 1024.
/// Field layout per Inside Macintosh: Files.
#[derive(Debug, Clone)]
pub struct Mdb {
    pub signature: u16,
    pub create_date: u32,
    pub modify_date: u32,
    pub attributes: u16,
    pub root_file_count: u16,
    /// First block of the volume bitmap, in 512-byte sectors from the
    /// volume start (drVBMSt).
    pub bitmap_start: u16,
    pub total_blocks: u16,
    pub alloc_block_size: u32,
    pub clump_size: u32,
    /// First allocation block, in 512-byte sectors from the volume start
    /// (drAlBlSt).
    pub alloc_block_start: u16,
    pub next_cnid: u32,
    pub free_blocks: u16,
    pub volume_name: String,
    pub backup_date: u32,
    pub write_count: u32,
    pub root_dir_count: u16,
    pub file_count: u32,
    pub folder_count: u32,
    pub embedded_signature: u16,
    pub embedded_start_block: u16,
    pub embedded_block_count: u16,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
}

impl Mdb {
    pub const SIZE: usize = 162;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(MacFsError::UnsupportedVersion(format!(
                "MDB too short: {} bytes",
                data.len()
            )));
        }
        let sig = BigEndian::read_u16(&data[0..2]);
        if sig != HFS_SIGNATURE {
            return Err(MacFsError::UnknownVolume);
        }

        let alloc_block_size = BigEndian::read_u32(&data[20..24]);
        if alloc_block_size == 0 || alloc_block_size % 512 != 0 {
            return Err(MacFsError::UnsupportedVersion(format!(
                "bad allocation block size {alloc_block_size}"
            )));
        }

        Ok(Mdb {
            signature: sig,
            create_date: BigEndian::read_u32(&data[2..6]),
            modify_date: BigEndian::read_u32(&data[6..10]),
            attributes: BigEndian::read_u16(&data[10..12]),
            root_file_count: BigEndian::read_u16(&data[12..14]),
            bitmap_start: BigEndian::read_u16(&data[14..16]),
            total_blocks: BigEndian::read_u16(&data[18..20]),
            alloc_block_size,
            clump_size: BigEndian::read_u32(&data[24..28]),
            alloc_block_start: BigEndian::read_u16(&data[28..30]),
            next_cnid: BigEndian::read_u32(&data[30..34]),
            free_blocks: BigEndian::read_u16(&data[34..36]),
            volume_name: text::pascal_to_string(&data[36..64])?,
            backup_date: BigEndian::read_u32(&data[64..68]),
            write_count: BigEndian::read_u32(&data[70..74]),
            root_dir_count: BigEndian::read_u16(&data[82..84]),
            file_count: BigEndian::read_u32(&data[84..88]),
            folder_count: BigEndian::read_u32(&data[88..92]),
            embedded_signature: BigEndian::read_u16(&data[124..126]),
            embedded_start_block: BigEndian::read_u16(&data[126..128]),
            embedded_block_count: BigEndian::read_u16(&data[128..130]),
            extents_file: ForkData::from_hfs(
                BigEndian::read_u32(&data[130..134]),
                BigEndian::read_u32(&data[74..78]),
                &data[134..146],
                alloc_block_size,
            ),
            catalog_file: ForkData::from_hfs(
                BigEndian::read_u32(&data[146..150]),
                BigEndian::read_u32(&data[78..82]),
                &data[150..162],
                alloc_block_size,
            ),
        })
    }

    /// True if this MDB wraps an embedded HFS+ volume.
    pub fn has_embedded_hfs_plus(&self) -> bool {
        self.embedded_signature == HFS_PLUS_SIGNATURE || self.embedded_signature == HFSX_SIGNATURE
    }

    /// Byte offset of the embedded HFS+ volume, relative to the HFS
    /// volume start.
    pub fn embedded_offset(&self) -> u64 {
        self.alloc_block_start as u64 * 512
            + self.embedded_start_block as u64 * self.alloc_block_size as u64
    }

    pub fn embedded_length(&self) -> u64 {
        self.embedded_block_count as u64 * self.alloc_block_size as u64
    }
}

/// HFS+ Volume Header, 512 bytes at volume offset 1024 (TN1150).
#[derive(Debug, Clone)]
pub struct VolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,
    pub create_date: u32,
    pub modify_date: u32,
    pub backup_date: u32,
    pub checked_date: u32,
    pub file_count: u32,
    pub folder_count: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub next_allocation: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_catalog_id: u32,
    pub write_count: u32,
    pub encodings_bitmap: u64,
    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl VolumeHeader {
    pub const SIZE: usize = 512;

    /// Attribute bit: volume has a journal (tolerated, not replayed).
    pub const ATTR_JOURNALED: u32 = 1 << 13;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(MacFsError::UnsupportedVersion(format!(
                "volume header too short: {} bytes",
                data.len()
            )));
        }
        let sig = BigEndian::read_u16(&data[0..2]);
        if sig != HFS_PLUS_SIGNATURE && sig != HFSX_SIGNATURE {
            return Err(MacFsError::UnknownVolume);
        }
        let version = BigEndian::read_u16(&data[2..4]);
        if version != 4 && version != 5 {
            return Err(MacFsError::UnsupportedVersion(format!(
                "HFS+ version {version}"
            )));
        }
        let block_size = BigEndian::read_u32(&data[40..44]);
        if block_size < 512 || !block_size.is_power_of_two() {
            return Err(MacFsError::UnsupportedVersion(format!(
                "bad allocation block size {block_size}"
            )));
        }

        Ok(VolumeHeader {
            signature: sig,
            version,
            attributes: BigEndian::read_u32(&data[4..8]),
            last_mounted_version: BigEndian::read_u32(&data[8..12]),
            journal_info_block: BigEndian::read_u32(&data[12..16]),
            create_date: BigEndian::read_u32(&data[16..20]),
            modify_date: BigEndian::read_u32(&data[20..24]),
            backup_date: BigEndian::read_u32(&data[24..28]),
            checked_date: BigEndian::read_u32(&data[28..32]),
            file_count: BigEndian::read_u32(&data[32..36]),
            folder_count: BigEndian::read_u32(&data[36..40]),
            block_size,
            total_blocks: BigEndian::read_u32(&data[44..48]),
            free_blocks: BigEndian::read_u32(&data[48..52]),
            next_allocation: BigEndian::read_u32(&data[52..56]),
            rsrc_clump_size: BigEndian::read_u32(&data[56..60]),
            data_clump_size: BigEndian::read_u32(&data[60..64]),
            next_catalog_id: BigEndian::read_u32(&data[64..68]),
            write_count: BigEndian::read_u32(&data[68..72]),
            encodings_bitmap: BigEndian::read_u64(&data[72..80]),
            allocation_file: ForkData::parse_hfsplus(&data[112..192]),
            extents_file: ForkData::parse_hfsplus(&data[192..272]),
            catalog_file: ForkData::parse_hfsplus(&data[272..352]),
            attributes_file: ForkData::parse_hfsplus(&data[352..432]),
            startup_file: ForkData::parse_hfsplus(&data[432..512]),
        })
    }

    pub fn is_hfsx(&self) -> bool {
        self.signature == HFSX_SIGNATURE
    }

    pub fn is_journaled(&self) -> bool {
        self.attributes & Self::ATTR_JOURNALED != 0
    }
}

/// Parsed header of either volume kind.
#[derive(Debug, Clone)]
pub enum VolumeMeta {
    Hfs(Mdb),
    HfsPlus(VolumeHeader),
}

impl VolumeMeta {
    pub fn alloc_block_size(&self) -> u32 {
        match self {
            VolumeMeta::Hfs(mdb) => mdb.alloc_block_size,
            VolumeMeta::HfsPlus(vh) => vh.block_size,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        match self {
            VolumeMeta::Hfs(mdb) => mdb.total_blocks as u32,
            VolumeMeta::HfsPlus(vh) => vh.total_blocks,
        }
    }

    pub fn free_blocks(&self) -> u32 {
        match self {
            VolumeMeta::Hfs(mdb) => mdb.free_blocks as u32,
            VolumeMeta::HfsPlus(vh) => vh.free_blocks,
        }
    }

    pub fn file_count(&self) -> u32 {
        match self {
            VolumeMeta::Hfs(mdb) => mdb.file_count,
            VolumeMeta::HfsPlus(vh) => vh.file_count,
        }
    }

    pub fn folder_count(&self) -> u32 {
        match self {
            VolumeMeta::Hfs(mdb) => mdb.folder_count,
            VolumeMeta::HfsPlus(vh) => vh.folder_count,
        }
    }

    pub fn catalog_file(&self) -> &ForkData {
        match self {
            VolumeMeta::Hfs(mdb) => &mdb.catalog_file,
            VolumeMeta::HfsPlus(vh) => &vh.catalog_file,
        }
    }

    pub fn extents_file(&self) -> &ForkData {
        match self {
            VolumeMeta::Hfs(mdb) => &mdb.extents_file,
            VolumeMeta::HfsPlus(vh) => &vh.extents_file,
        }
    }
}

/// An opened volume: parsed header, loaded system B-trees, allocation
/// bitmap, and the device handle for fork reads.
pub struct Volume<R> {
    pub kind: VolumeKind,
    pub device: BlockDevice<R>,
    pub meta: VolumeMeta,
    pub extents_tree: BTreeFile,
    pub catalog: BTreeFile,
    pub bitmap: Vec<u8>,
    pub name: String,
}

impl<R: Read + Seek> Volume<R> {
    /// Open the volume whose header lives at `device` offset 1024.
    pub fn open(mut device: BlockDevice<R>) -> Result<Self> {
        let header = device.read_at(1024, VolumeHeader::SIZE)?;
        let sig = BigEndian::read_u16(&header[0..2]);
        match sig {
            HFS_SIGNATURE => Self::open_hfs(device, &header),
            HFS_PLUS_SIGNATURE | HFSX_SIGNATURE => Self::open_hfsplus(device, &header),
            _ => Err(MacFsError::UnknownVolume),
        }
    }

    fn open_hfs(mut device: BlockDevice<R>, header: &[u8]) -> Result<Self> {
        let mdb = Mdb::parse(header)?;
        device.set_geometry(mdb.alloc_block_size, mdb.alloc_block_start as u64 * 512);

        // The extents overflow file never overflows itself; its MDB
        // extents are authoritative.
        let extents_data =
            ForkReader::from_inline(&mdb.extents_file)?.read_all(&mut device)?;
        let mut extents_tree = BTreeFile::new(extents_data, VolumeKind::Hfs)?;

        let catalog_reader = ForkReader::materialize(
            &mdb.catalog_file,
            CNID_CATALOG_FILE,
            ForkType::Data,
            VolumeKind::Hfs,
            Some(&mut extents_tree),
        )?;
        let catalog_data = catalog_reader.read_all(&mut device)?;
        let catalog = BTreeFile::new(catalog_data, VolumeKind::Hfs)?;

        let bitmap_len = (mdb.total_blocks as usize).div_ceil(8);
        let bitmap = device.read_at(mdb.bitmap_start as u64 * 512, bitmap_len)?;

        let name = mdb.volume_name.clone();
        let volume = Volume {
            kind: VolumeKind::Hfs,
            device,
            meta: VolumeMeta::Hfs(mdb),
            extents_tree,
            catalog,
            bitmap,
            name,
        };
        volume.check_free_blocks();
        Ok(volume)
    }

    fn open_hfsplus(mut device: BlockDevice<R>, header: &[u8]) -> Result<Self> {
        let vh = VolumeHeader::parse(header)?;
        device.set_geometry(vh.block_size, 0);

        let extents_data =
            ForkReader::from_inline(&vh.extents_file)?.read_all(&mut device)?;
        let mut extents_tree = BTreeFile::new(extents_data, VolumeKind::HfsPlus)?;

        let catalog_reader = ForkReader::materialize(
            &vh.catalog_file,
            CNID_CATALOG_FILE,
            ForkType::Data,
            VolumeKind::HfsPlus,
            Some(&mut extents_tree),
        )?;
        let catalog_data = catalog_reader.read_all(&mut device)?;
        let mut catalog = BTreeFile::new(catalog_data, VolumeKind::HfsPlus)?;

        let bitmap_reader = ForkReader::materialize(
            &vh.allocation_file,
            CNID_ALLOCATION_FILE,
            ForkType::Data,
            VolumeKind::HfsPlus,
            Some(&mut extents_tree),
        )?;
        let bitmap = bitmap_reader.read_all(&mut device)?;

        // HFS+ keeps the volume name only in the root folder's thread record.
        let name = catalog::root_folder_name(&mut catalog, VolumeKind::HfsPlus)
            .unwrap_or_default();

        let volume = Volume {
            kind: VolumeKind::HfsPlus,
            device,
            meta: VolumeMeta::HfsPlus(vh),
            extents_tree,
            catalog,
            bitmap,
            name,
        };
        volume.check_free_blocks();
        Ok(volume)
    }

    /// Count free allocation blocks: a block is free iff its bitmap bit
    /// is zero (MSB-first within each byte).
    pub fn bitmap_free_count(&self) -> u32 {
        let total = self.meta.total_blocks();
        let mut free = 0;
        for block in 0..total {
            let byte = (block / 8) as usize;
            let bit = 7 - (block % 8);
            if byte >= self.bitmap.len() || (self.bitmap[byte] >> bit) & 1 == 0 {
                free += 1;
            }
        }
        free
    }

    /// Cross-check the header's free-block count against the bitmap.
    /// Divergence is diagnostic only.
    pub fn check_free_blocks(&self) {
        let counted = self.bitmap_free_count();
        let declared = self.meta.free_blocks();
        if counted != declared {
            warn!(
                "volume '{}': header claims {declared} free blocks, bitmap has {counted} zero bits",
                self.name
            );
        }
    }

    /// Read a whole fork, resolving overflow extents as needed.
    pub fn read_fork(&mut self, fork: &ForkData, cnid: u32, fork_type: ForkType) -> Result<Vec<u8>> {
        let reader = ForkReader::materialize(
            fork,
            cnid,
            fork_type,
            self.kind,
            Some(&mut self.extents_tree),
        )?;
        reader.read_all(&mut self.device)
    }

    /// Read `length` bytes of a fork starting at `offset`.
    pub fn read_fork_range(
        &mut self,
        fork: &ForkData,
        cnid: u32,
        fork_type: ForkType,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>> {
        let reader = ForkReader::materialize(
            fork,
            cnid,
            fork_type,
            self.kind,
            Some(&mut self.extents_tree),
        )?;
        reader.read(&mut self.device, offset, length)
    }

    pub fn total_size(&self) -> u64 {
        self.meta.total_blocks() as u64 * self.meta.alloc_block_size() as u64
    }
}
