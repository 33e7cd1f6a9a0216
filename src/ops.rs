//! Operator-facing actions: analyze, list, extract. Everything here is a
//! thin presenter over the volume, B-tree, and catalog layers.

use anyhow::{Context, Result};
use log::warn;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::btree::{NodeKind, Walk};
use crate::catalog::{self, DehydratedItem};
use crate::device::BlockDevice;
use crate::error::MacFsError;
use crate::extract::{self, ForkMode};
use crate::fork::{ForkReader, ForkType};
use crate::hfspath::{self, HfsPath};
use crate::probe::{self, VolumeLocation};
use crate::text;
use crate::volume::{Volume, VolumeMeta, CNID_ROOT_FOLDER};

pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn fourcc(code: &[u8; 4]) -> String {
    code.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}

fn probe_device(path: &Path) -> Result<Vec<VolumeLocation>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let found = probe::probe(&mut reader)?;
    if found.is_empty() {
        return Err(MacFsError::UnknownVolume.into());
    }
    Ok(found)
}

fn open_volume(path: &Path, location: &VolumeLocation) -> Result<Volume<BufReader<File>>> {
    let file = File::open(path)?;
    let device = BlockDevice::new(BufReader::new(file), location.offset);
    Ok(Volume::open(device)?)
}

/// Structural dump: header geometry, B-tree shape, every catalog record,
/// and the non-fatal integrity cross-checks.
pub fn analyze(path: &Path) -> Result<()> {
    for location in probe_device(path)? {
        let mut volume = match open_volume(path, &location) {
            Ok(v) => v,
            Err(e) => {
                warn!("volume at offset {} failed to open: {e}", location.offset);
                continue;
            }
        };
        println!(
            "== {} volume '{}' at offset {} ({}) ==",
            volume.kind,
            volume.name,
            location.offset,
            format_size(location.length)
        );
        print_header(&volume.meta);
        print_tree_shape("catalog", &volume.catalog.header);
        print_tree_shape("extents overflow", &volume.extents_tree.header);

        // Cross-check: header free count vs zero bits in the bitmap.
        let counted = volume.bitmap_free_count();
        let declared = volume.meta.free_blocks();
        if counted == declared {
            println!("free blocks: {declared} (bitmap agrees)");
        } else {
            println!("free blocks: header {declared}, bitmap {counted} (MISMATCH)");
        }

        // Cross-check: catalog node-usage map vs header node accounting.
        let in_use = volume.catalog.header.total_nodes - volume.catalog.header.free_nodes;
        match volume.catalog.mapped_node_count() {
            Ok(mapped) if mapped == in_use => {}
            Ok(mapped) => warn!("catalog map marks {mapped} nodes in use, header says {in_use}"),
            Err(e) => warn!("catalog node map unreadable: {e}"),
        }

        analyze_catalog(&mut volume)?;
        println!();
    }
    Ok(())
}

fn print_header(meta: &VolumeMeta) {
    match meta {
        VolumeMeta::Hfs(mdb) => {
            println!(
                "allocation blocks: {} x {} (first at sector {})",
                mdb.total_blocks, mdb.alloc_block_size, mdb.alloc_block_start
            );
            println!(
                "files: {}, folders: {}, next CNID: {}",
                mdb.file_count, mdb.folder_count, mdb.next_cnid
            );
            if let Some(created) = text::mac_timestamp(mdb.create_date) {
                println!("created: {created}");
            }
        }
        VolumeMeta::HfsPlus(vh) => {
            println!(
                "allocation blocks: {} x {} ({} free)",
                vh.total_blocks, vh.block_size, vh.free_blocks
            );
            println!(
                "files: {}, folders: {}, next CNID: {}",
                vh.file_count, vh.folder_count, vh.next_catalog_id
            );
            println!(
                "clump sizes: data {}, resource {}",
                vh.data_clump_size, vh.rsrc_clump_size
            );
            if vh.is_journaled() {
                println!("journaled (journal not replayed)");
            }
            if let Some(created) = text::mac_timestamp(vh.create_date) {
                println!("created: {created}");
            }
        }
    }
}

fn print_tree_shape(label: &str, header: &crate::btree::BTreeHeaderRecord) {
    println!(
        "{label} B-tree: depth {}, root node {}, {} leaf records, {} nodes ({} free), node size {}",
        header.tree_depth,
        header.root_node,
        header.leaf_records,
        header.total_nodes,
        header.free_nodes,
        header.node_size
    );
}

fn analyze_catalog(volume: &mut Volume<BufReader<File>>) -> Result<()> {
    // Shape pass: count nodes per kind, breadth-first.
    let mut leaves = 0u32;
    let mut index_nodes = 0u32;
    volume.catalog.walk_breadth_first(&mut |node| {
        match node.desc.kind {
            NodeKind::Leaf => leaves += 1,
            NodeKind::Index => index_nodes += 1,
            _ => {}
        }
        Walk::Continue
    })?;
    println!("catalog shape: {index_nodes} index nodes, {leaves} leaf nodes");

    // Record pass: one line per record, collecting file forks for the
    // coverage check afterwards.
    let kind = volume.kind;
    let alloc = volume.meta.alloc_block_size();
    let mut files: Vec<(u32, String, crate::volume::ForkData, ForkType)> = Vec::new();
    let mut bad: Option<MacFsError> = None;

    volume.catalog.walk_leaves(&mut |node| {
        for i in 0..node.record_count() {
            let Ok((key_bytes, payload)) = node.split_record(i) else {
                bad = Some(MacFsError::corrupt_node(node.index, "bad record bounds"));
                return Walk::Stop;
            };
            let Some(key) = catalog::parse_catalog_key(key_bytes, kind) else {
                warn!("node {} record {i}: unparseable key", node.index);
                continue;
            };
            let Some(record) = catalog::parse_record(payload, kind, alloc) else {
                warn!("node {} record {i}: unparseable record", node.index);
                continue;
            };
            let name = key.name_string();
            match &record {
                catalog::CatalogRecord::Folder(f) => println!(
                    "  [{}:{}] {}:'{}' folder cnid={} valence={}",
                    node.index, i, key.parent_id, name, f.id, f.valence
                ),
                catalog::CatalogRecord::File(f) => {
                    println!(
                        "  [{}:{}] {}:'{}' file cnid={} {}/{} data={} rsrc={}",
                        node.index,
                        i,
                        key.parent_id,
                        name,
                        f.id,
                        fourcc(&f.type_code),
                        fourcc(&f.creator_code),
                        format_size(f.data_fork.logical_size),
                        format_size(f.resource_fork.logical_size)
                    );
                    if f.data_fork.logical_size > f.data_fork.physical_size(alloc) {
                        warn!(
                            "file '{name}' (cnid {}): data fork logical {} exceeds physical {}",
                            f.id,
                            f.data_fork.logical_size,
                            f.data_fork.physical_size(alloc)
                        );
                    }
                    files.push((f.id, name.clone(), f.data_fork.clone(), ForkType::Data));
                    if f.resource_fork.total_blocks > 0 {
                        files.push((f.id, name, f.resource_fork.clone(), ForkType::Resource));
                    }
                }
                catalog::CatalogRecord::FolderThread(t) | catalog::CatalogRecord::FileThread(t) => {
                    println!(
                        "  [{}:{}] {}:'' {} -> parent={} name='{}'",
                        node.index,
                        i,
                        key.parent_id,
                        record.type_name(),
                        t.parent_id,
                        text::utf16_to_string(&t.name)
                    )
                }
            }
        }
        Walk::Continue
    })?;
    if let Some(e) = bad {
        return Err(e.into());
    }

    // Coverage pass: every fork's extent chain (inline + overflow) must
    // account for its block count. A short fork is a per-file warning,
    // not an abort.
    for (cnid, name, fork, fork_type) in files {
        match ForkReader::materialize(&fork, cnid, fork_type, kind, Some(&mut volume.extents_tree))
        {
            Ok(_) => {}
            Err(e) => warn!("{fork_type} fork of '{name}' (cnid {cnid}): {e}"),
        }
    }
    Ok(())
}

/// Pretty-print the directory hierarchy of every volume on the device.
pub fn list(path: &Path) -> Result<()> {
    for location in probe_device(path)? {
        let mut volume = match open_volume(path, &location) {
            Ok(v) => v,
            Err(e) => {
                warn!("volume at offset {} failed to open: {e}", location.offset);
                continue;
            }
        };
        println!("{}: [{}]", volume.name, volume.kind);
        list_folder(&mut volume, CNID_ROOT_FOLDER, 1)?;
    }
    Ok(())
}

fn list_folder(volume: &mut Volume<BufReader<File>>, parent: u32, depth: usize) -> Result<()> {
    let kind = volume.kind;
    let alloc = volume.meta.alloc_block_size();
    let items = catalog::children(&mut volume.catalog, kind, alloc, parent)?;
    for item in items {
        let indent = "  ".repeat(depth);
        if item.is_folder {
            println!("{indent}{}:", item.name);
            list_folder(volume, item.cnid, depth + 1)?;
        } else {
            let size = item
                .data_fork
                .as_ref()
                .map(|f| f.logical_size)
                .unwrap_or(0);
            let codes = match (&item.type_code, &item.creator_code) {
                (Some(t), Some(c)) => format!(" {}/{}", fourcc(t), fourcc(c)),
                _ => String::new(),
            };
            println!("{indent}{} ({}){codes}", item.name, format_size(size));
        }
    }
    Ok(())
}

/// Locate `query` (a bare name or a TN1041 colon path) and rehydrate the
/// matching file's forks under `out_dir`.
pub fn extract(path: &Path, query: &str, out_dir: &Path, mode: ForkMode) -> Result<()> {
    let locations = probe_device(path)?;
    for location in &locations {
        let mut volume = match open_volume(path, location) {
            Ok(v) => v,
            Err(e) => {
                warn!("volume at offset {} failed to open: {e}", location.offset);
                continue;
            }
        };
        match find_in_volume(&mut volume, query)? {
            Some(item) => {
                let written = extract::write_item(&mut volume, &item, out_dir, mode)?;
                for p in written {
                    println!("{}", p.display());
                }
                return Ok(());
            }
            None => continue,
        }
    }
    Err(MacFsError::NotFound(query.to_string()).into())
}

fn find_in_volume(
    volume: &mut Volume<BufReader<File>>,
    query: &str,
) -> Result<Option<DehydratedItem>> {
    let kind = volume.kind;
    let alloc = volume.meta.alloc_block_size();

    if HfsPath::is_bare_name(query) {
        return Ok(catalog::find_file_by_name(
            &mut volume.catalog,
            kind,
            alloc,
            query,
        )?);
    }

    let parsed = hfspath::parse(query)?;
    let components: &[String] = if parsed.relative {
        &parsed.components
    } else {
        // An absolute path names the volume first; skip it if it matches
        // this volume, otherwise the quarry belongs elsewhere.
        let Some((head, rest)) = parsed.components.split_first() else {
            return Ok(None);
        };
        let head_units = catalog::name_units(head);
        let vol_units: Vec<u16> = volume.name.encode_utf16().collect();
        if !text::names_match(&head_units, &vol_units) {
            return Ok(None);
        }
        rest
    };

    if components.is_empty() {
        return Ok(None);
    }
    match catalog::resolve(&mut volume.catalog, kind, alloc, components) {
        Ok(item) if !item.is_folder => Ok(Some(item)),
        Ok(_) => Ok(None),
        Err(MacFsError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_fourcc_printable() {
        assert_eq!(fourcc(b"TEXT"), "TEXT");
        assert_eq!(fourcc(&[0, b'A', 0xFF, b' ']), ".A. ");
    }
}
