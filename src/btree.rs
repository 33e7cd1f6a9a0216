//! HFS / HFS+ B-tree files (Inside Macintosh: Files §4, TN1150).
//!
//! A B-tree file is a fork whose content is a sequence of fixed-size
//! nodes. Node 0 is always the header node; index nodes map lowest keys
//! to child node numbers; leaf nodes hold the keyed records. Record
//! payloads grow forward from the 14-byte node descriptor while the
//! record offset table grows backward from the node end.

use byteorder::{BigEndian, ByteOrder};
use std::rc::Rc;

use crate::error::{MacFsError, Result};
use crate::volume::VolumeKind;

pub const NODE_DESCRIPTOR_SIZE: usize = 14;

const MIN_NODE_SIZE: usize = 512;
const MAX_NODE_SIZE: usize = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Index,
    Header,
    Map,
}

impl NodeKind {
    fn from_raw(v: i8) -> Option<Self> {
        match v {
            -1 => Some(NodeKind::Leaf),
            0 => Some(NodeKind::Index),
            1 => Some(NodeKind::Header),
            2 => Some(NodeKind::Map),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Leaf => "leaf",
            NodeKind::Index => "index",
            NodeKind::Header => "header",
            NodeKind::Map => "map",
        };
        write!(f, "{s}")
    }
}

/// The 14-byte descriptor at the start of every node.
#[derive(Debug, Clone, Copy)]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: NodeKind,
    pub height: u8,
    pub num_records: u16,
}

impl NodeDescriptor {
    fn parse(index: u32, data: &[u8]) -> Result<Self> {
        if data.len() < NODE_DESCRIPTOR_SIZE {
            return Err(MacFsError::corrupt_node(index, "node shorter than descriptor"));
        }
        let kind = NodeKind::from_raw(data[8] as i8).ok_or_else(|| {
            MacFsError::corrupt_node(index, format!("unknown node kind {}", data[8] as i8))
        })?;
        Ok(NodeDescriptor {
            forward_link: BigEndian::read_u32(&data[0..4]),
            backward_link: BigEndian::read_u32(&data[4..8]),
            kind,
            height: data[9],
            num_records: BigEndian::read_u16(&data[10..12]),
        })
    }
}

/// BTHeaderRec: the first record of node 0.
#[derive(Debug, Clone)]
pub struct BTreeHeaderRecord {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
}

impl BTreeHeaderRecord {
    pub const SIZE: usize = 106;

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(MacFsError::corrupt_node(0, "header record truncated"));
        }
        Ok(BTreeHeaderRecord {
            tree_depth: BigEndian::read_u16(&data[0..2]),
            root_node: BigEndian::read_u32(&data[2..6]),
            leaf_records: BigEndian::read_u32(&data[6..10]),
            first_leaf_node: BigEndian::read_u32(&data[10..14]),
            last_leaf_node: BigEndian::read_u32(&data[14..18]),
            node_size: BigEndian::read_u16(&data[18..20]),
            max_key_length: BigEndian::read_u16(&data[20..22]),
            total_nodes: BigEndian::read_u32(&data[22..26]),
            free_nodes: BigEndian::read_u32(&data[26..30]),
            clump_size: BigEndian::read_u32(&data[32..36]),
            btree_type: data[36],
            key_compare_type: data[37],
            attributes: BigEndian::read_u32(&data[38..42]),
        })
    }
}

/// One parsed node. Cheap to share: the tree hands out `Rc<Node>` handles
/// from its cache.
pub struct Node {
    pub index: u32,
    pub desc: NodeDescriptor,
    wide_keys: bool,
    data: Vec<u8>,
    /// Record boundaries, ascending; entry `num_records` is the
    /// free-space sentinel.
    offsets: Vec<u16>,
}

impl Node {
    fn parse(index: u32, data: Vec<u8>, wide_keys: bool) -> Result<Node> {
        let desc = NodeDescriptor::parse(index, &data)?;
        let node_size = data.len();
        let n = desc.num_records as usize;
        let table_size = 2 * (n + 1);
        if NODE_DESCRIPTOR_SIZE + table_size > node_size {
            return Err(MacFsError::corrupt_node(index, "offset table overlaps descriptor"));
        }

        let mut offsets = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let pos = node_size - 2 * (i + 1);
            offsets.push(BigEndian::read_u16(&data[pos..pos + 2]));
        }
        // The stored table descends from the node end; logically the
        // boundaries must strictly ascend and stay inside the payload area.
        for (i, pair) in offsets.windows(2).enumerate() {
            if pair[0] >= pair[1] {
                return Err(MacFsError::corrupt_node(
                    index,
                    format!("record offsets not ascending at record {i}"),
                ));
            }
        }
        if n > 0 {
            if (offsets[0] as usize) < NODE_DESCRIPTOR_SIZE {
                return Err(MacFsError::corrupt_node(index, "first record inside descriptor"));
            }
            if offsets[n] as usize > node_size - table_size {
                return Err(MacFsError::corrupt_node(index, "records overlap offset table"));
            }
        }

        Ok(Node {
            index,
            desc,
            wide_keys,
            data,
            offsets,
        })
    }

    pub fn record_count(&self) -> usize {
        self.desc.num_records as usize
    }

    /// Raw bytes of record `i` (key length prefix included).
    pub fn record(&self, i: usize) -> Result<&[u8]> {
        if i >= self.record_count() {
            return Err(MacFsError::corrupt_node(
                self.index,
                format!("record {i} out of {}", self.record_count()),
            ));
        }
        Ok(&self.data[self.offsets[i] as usize..self.offsets[i + 1] as usize])
    }

    /// Key bytes of record `i`, without the length prefix.
    pub fn record_key(&self, i: usize) -> Result<&[u8]> {
        let (key, _) = self.split_record(i)?;
        Ok(key)
    }

    /// Payload bytes of record `i` (after the key and its pad byte).
    pub fn record_payload(&self, i: usize) -> Result<&[u8]> {
        let (_, payload) = self.split_record(i)?;
        Ok(payload)
    }

    /// Split record `i` into key and payload.
    pub fn split_record(&self, i: usize) -> Result<(&[u8], &[u8])> {
        let rec = self.record(i)?;
        let (key_len, prefix) = if self.wide_keys {
            if rec.len() < 2 {
                return Err(MacFsError::corrupt_node(self.index, "record shorter than key length"));
            }
            (BigEndian::read_u16(&rec[0..2]) as usize, 2)
        } else {
            if rec.is_empty() {
                return Err(MacFsError::corrupt_node(self.index, "empty record"));
            }
            (rec[0] as usize, 1)
        };
        let key_end = prefix + key_len;
        if key_end > rec.len() {
            return Err(MacFsError::corrupt_node(
                self.index,
                format!("key of {key_len} bytes exceeds record of {}", rec.len()),
            ));
        }
        // The payload starts at the next even offset after the key.
        let payload_start = key_end + (key_end & 1);
        let payload_start = payload_start.min(rec.len());
        Ok((&rec[prefix..key_end], &rec[payload_start..]))
    }

    /// Child node number of index record `i`.
    pub fn child_pointer(&self, i: usize) -> Result<u32> {
        let payload = self.record_payload(i)?;
        if payload.len() < 4 {
            return Err(MacFsError::corrupt_node(self.index, "index record payload too short"));
        }
        Ok(BigEndian::read_u32(&payload[0..4]))
    }
}

/// Quarry position relative to a candidate key: "the thing being searched
/// for is `Greater` than the key just examined".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    Lesser,
    Equal,
    Greater,
    Incomparable,
}

/// A search key bound to whatever state it needs (text decoder, volume
/// kind) to order itself against raw candidate keys.
pub trait KeyCompare {
    fn compare(&self, candidate_key: &[u8]) -> KeyOrder;
}

/// Position of a descent result: the first leaf record that is >= the
/// quarry, with `exact` set when the comparison was `Equal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafHit {
    pub node: u32,
    pub record: usize,
    pub exact: bool,
}

/// Visitor verdict for traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

/// A fully-loaded B-tree file. Owns the fork's bytes; nodes are parsed on
/// first access and cached by node number.
pub struct BTreeFile {
    data: Vec<u8>,
    pub header: BTreeHeaderRecord,
    node_size: usize,
    wide_keys: bool,
    cache: Vec<Option<Rc<Node>>>,
}

impl BTreeFile {
    pub fn new(data: Vec<u8>, kind: VolumeKind) -> Result<Self> {
        if data.len() < MIN_NODE_SIZE {
            return Err(MacFsError::corrupt_node(0, "tree smaller than one node"));
        }
        // nodeSize sits at a fixed place in the header record of node 0.
        let node_size = BigEndian::read_u16(&data[NODE_DESCRIPTOR_SIZE + 18..NODE_DESCRIPTOR_SIZE + 20])
            as usize;
        if !(MIN_NODE_SIZE..=MAX_NODE_SIZE).contains(&node_size)
            || !node_size.is_power_of_two()
            || data.len() < node_size
        {
            return Err(MacFsError::corrupt_node(0, format!("bad node size {node_size}")));
        }

        let wide_keys = kind == VolumeKind::HfsPlus;
        let header_node = Node::parse(0, data[..node_size].to_vec(), wide_keys)?;
        if header_node.desc.kind != NodeKind::Header {
            return Err(MacFsError::corrupt_node(0, "node 0 is not a header node"));
        }
        if header_node.record_count() < 3 {
            return Err(MacFsError::corrupt_node(0, "header node missing records"));
        }
        let header = BTreeHeaderRecord::parse(header_node.record(0)?)?;

        let mut cache: Vec<Option<Rc<Node>>> = vec![None; header.total_nodes as usize];
        if !cache.is_empty() {
            cache[0] = Some(Rc::new(header_node));
        }

        Ok(BTreeFile {
            data,
            header,
            node_size,
            wide_keys,
            cache,
        })
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    pub fn total_nodes(&self) -> u32 {
        self.header.total_nodes
    }

    /// Fetch node `index`, parsing and caching it on first access.
    /// Population is idempotent: repeated calls return the same handle.
    pub fn node(&mut self, index: u32) -> Result<Rc<Node>> {
        let total = self.header.total_nodes;
        if index >= total {
            return Err(MacFsError::InvalidNodeIndex { index, total });
        }
        if let Some(node) = &self.cache[index as usize] {
            return Ok(Rc::clone(node));
        }
        let start = index as usize * self.node_size;
        let end = start + self.node_size;
        if end > self.data.len() {
            return Err(MacFsError::InvalidNodeIndex { index, total });
        }
        let node = Rc::new(Node::parse(
            index,
            self.data[start..end].to_vec(),
            self.wide_keys,
        )?);
        self.cache[index as usize] = Some(Rc::clone(&node));
        Ok(node)
    }

    /// The node-usage map carried in the header node's third record.
    pub fn header_map(&mut self) -> Result<Vec<u8>> {
        let node = self.node(0)?;
        Ok(node.record(2)?.to_vec())
    }

    /// Count of nodes marked in use by the header map (continuation map
    /// nodes, rare in practice, are not followed).
    pub fn mapped_node_count(&mut self) -> Result<u32> {
        let map = self.header_map()?;
        let total = self.header.total_nodes;
        let mut used = 0;
        for bit in 0..total.min(map.len() as u32 * 8) {
            let byte = (bit / 8) as usize;
            let shift = 7 - (bit % 8);
            if (map[byte] >> shift) & 1 == 1 {
                used += 1;
            }
        }
        Ok(used)
    }

    /// Comparator-driven descent from the root.
    ///
    /// Lands on the first leaf record that is >= the quarry (stepping to
    /// the forward sibling when the quarry exceeds every record in a
    /// leaf). Returns `None` when the quarry is greater than every key in
    /// the tree, or the tree is empty.
    pub fn search(&mut self, cmp: &dyn KeyCompare) -> Result<Option<LeafHit>> {
        if self.header.root_node == 0 {
            return Ok(None);
        }
        let mut current = self.header.root_node;
        let mut steps = 0u64;

        loop {
            steps += 1;
            if steps > self.header.total_nodes as u64 * 2 {
                return Err(MacFsError::corrupt_node(current, "descent cycle"));
            }
            let node = self.node(current)?;
            match node.desc.kind {
                NodeKind::Index => {
                    // Rightmost pointer record whose key is <= the quarry;
                    // default to the first when every key is greater.
                    let n = node.record_count();
                    let mut chosen = None;
                    for i in 0..n {
                        match cmp.compare(node.record_key(i)?) {
                            KeyOrder::Greater | KeyOrder::Equal => chosen = Some(i),
                            KeyOrder::Lesser => break,
                            KeyOrder::Incomparable => {
                                return Err(MacFsError::corrupt_node(current, "incomparable index key"))
                            }
                        }
                    }
                    // Keys in an index node are the lowest key of each
                    // child subtree; when the quarry is past the last key
                    // the right edge may continue in the sibling.
                    if chosen == Some(n.saturating_sub(1)) && node.desc.forward_link != 0 {
                        let sibling = self.node(node.desc.forward_link)?;
                        if sibling.record_count() > 0
                            && matches!(
                                cmp.compare(sibling.record_key(0)?),
                                KeyOrder::Greater | KeyOrder::Equal
                            )
                        {
                            current = node.desc.forward_link;
                            continue;
                        }
                    }
                    current = node.child_pointer(chosen.unwrap_or(0))?;
                }
                NodeKind::Leaf => {
                    // Binary search for the first record that is >= the
                    // quarry (first non-Greater comparison).
                    let n = node.record_count();
                    let mut lo = 0;
                    let mut hi = n;
                    while lo < hi {
                        let mid = (lo + hi) / 2;
                        match cmp.compare(node.record_key(mid)?) {
                            KeyOrder::Greater => lo = mid + 1,
                            KeyOrder::Equal | KeyOrder::Lesser => hi = mid,
                            KeyOrder::Incomparable => {
                                return Err(MacFsError::corrupt_node(current, "incomparable leaf key"))
                            }
                        }
                    }
                    if lo < n {
                        let exact = cmp.compare(node.record_key(lo)?) == KeyOrder::Equal;
                        return Ok(Some(LeafHit {
                            node: current,
                            record: lo,
                            exact,
                        }));
                    }
                    // Quarry is greater than every record here.
                    if node.desc.forward_link == 0 {
                        return Ok(None);
                    }
                    current = node.desc.forward_link;
                }
                other => {
                    return Err(MacFsError::corrupt_node(
                        current,
                        format!("descent reached {other} node"),
                    ))
                }
            }
        }
    }

    /// Step one record forward from a leaf position, crossing sibling
    /// links. Returns `None` at the end of the leaf chain.
    pub fn step_forward(&mut self, node: u32, record: usize) -> Result<Option<(u32, usize)>> {
        let n = self.node(node)?;
        if record + 1 < n.record_count() {
            return Ok(Some((node, record + 1)));
        }
        let mut next = n.desc.forward_link;
        let mut steps = 0u64;
        while next != 0 {
            steps += 1;
            if steps > self.header.total_nodes as u64 {
                return Err(MacFsError::corrupt_node(next, "leaf chain cycle"));
            }
            let nn = self.node(next)?;
            if nn.record_count() > 0 {
                return Ok(Some((next, 0)));
            }
            next = nn.desc.forward_link;
        }
        Ok(None)
    }

    /// Visit nodes breadth-first: every node at height h before any at
    /// height h-1, siblings in key order. Callers that need cycle
    /// detection de-duplicate by node number; the walk itself is bounded
    /// by the total node count.
    pub fn walk_breadth_first(&mut self, visit: &mut dyn FnMut(&Node) -> Walk) -> Result<()> {
        if self.header.root_node == 0 {
            return Ok(());
        }
        let mut level = vec![self.header.root_node];
        let mut emitted = 0u64;
        while !level.is_empty() {
            let mut next_level = Vec::new();
            for &index in &level {
                emitted += 1;
                if emitted > self.header.total_nodes as u64 {
                    return Err(MacFsError::corrupt_node(index, "breadth-first walk exceeded node count"));
                }
                let node = self.node(index)?;
                if visit(&node) == Walk::Stop {
                    return Ok(());
                }
                if node.desc.kind == NodeKind::Index {
                    for i in 0..node.record_count() {
                        next_level.push(node.child_pointer(i)?);
                    }
                }
            }
            level = next_level;
        }
        Ok(())
    }

    /// Visit every leaf via firstLeafNode + forward links.
    pub fn walk_leaves(&mut self, visit: &mut dyn FnMut(&Node) -> Walk) -> Result<()> {
        let mut index = self.header.first_leaf_node;
        let mut steps = 0u64;
        while index != 0 {
            steps += 1;
            if steps > self.header.total_nodes as u64 {
                return Err(MacFsError::corrupt_node(index, "leaf chain cycle"));
            }
            let node = self.node(index)?;
            if node.desc.kind != NodeKind::Leaf {
                return Err(MacFsError::corrupt_node(
                    index,
                    format!("leaf chain reached {} node", node.desc.kind),
                ));
            }
            if visit(&node) == Walk::Stop {
                return Ok(());
            }
            index = node.desc.forward_link;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Assemble a node image: records packed from offset 14, offset table
    /// grown backward from the end.
    pub fn build_node(
        node_size: usize,
        kind: i8,
        height: u8,
        flink: u32,
        blink: u32,
        records: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut node = vec![0u8; node_size];
        BigEndian::write_u32(&mut node[0..4], flink);
        BigEndian::write_u32(&mut node[4..8], blink);
        node[8] = kind as u8;
        node[9] = height;
        BigEndian::write_u16(&mut node[10..12], records.len() as u16);

        let mut pos = NODE_DESCRIPTOR_SIZE;
        for (i, rec) in records.iter().enumerate() {
            node[pos..pos + rec.len()].copy_from_slice(rec);
            let table_pos = node_size - 2 * (i + 1);
            BigEndian::write_u16(&mut node[table_pos..table_pos + 2], pos as u16);
            pos += rec.len();
        }
        let sentinel_pos = node_size - 2 * (records.len() + 1);
        BigEndian::write_u16(&mut node[sentinel_pos..sentinel_pos + 2], pos as u16);
        node
    }

    /// A header node for a tree description.
    #[allow(clippy::too_many_arguments)]
    pub fn build_header_node(
        node_size: usize,
        tree_depth: u16,
        root: u32,
        leaf_records: u32,
        first_leaf: u32,
        last_leaf: u32,
        total_nodes: u32,
        free_nodes: u32,
    ) -> Vec<u8> {
        let mut header = vec![0u8; BTreeHeaderRecord::SIZE];
        BigEndian::write_u16(&mut header[0..2], tree_depth);
        BigEndian::write_u32(&mut header[2..6], root);
        BigEndian::write_u32(&mut header[6..10], leaf_records);
        BigEndian::write_u32(&mut header[10..14], first_leaf);
        BigEndian::write_u32(&mut header[14..18], last_leaf);
        BigEndian::write_u16(&mut header[18..20], node_size as u16);
        BigEndian::write_u32(&mut header[22..26], total_nodes);
        BigEndian::write_u32(&mut header[26..30], free_nodes);

        let user_data = vec![0u8; 128];
        // Map record fills the remaining node space.
        let map_len = node_size - NODE_DESCRIPTOR_SIZE - BTreeHeaderRecord::SIZE - 128 - 8;
        let mut map = vec![0u8; map_len];
        for bit in 0..total_nodes as usize {
            if bit / 8 < map.len() {
                map[bit / 8] |= 1 << (7 - bit % 8);
            }
        }
        build_node(node_size, 1, 0, 0, 0, &[header, user_data, map])
    }
}
