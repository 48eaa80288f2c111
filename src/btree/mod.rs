//! B-tree layer: generic key-ordered descent over page-backed trees.
//!
//! Both global trees share one page shape: a branch page holds key/child
//! pairs sorted ascending, a leaf page holds key/value entries sorted
//! ascending, and keys are unique per tree. The engine is generic over the
//! leaf entry; each instantiation says how to decode one entry from raw
//! bytes and which page type tags its pages.
//!
//! Descent policy: in a branch, follow the greatest entry whose key is at
//! or below the target; at a leaf, only an exact match succeeds.

use crate::error::{PstError, Result};
use crate::page::{Page, PageKind};
use crate::types::{le_u16, le_u32, BlockId, Bref, Format, NodeId};
use std::fmt;

/// One leaf entry of a page-backed B-tree.
///
/// The associated constants and decoders give the engine everything it
/// needs to interpret a page for this tree.
pub(crate) trait BTreeEntry: Clone {
    type Key: Copy + Ord + fmt::Display;

    /// Page type tag carried by this tree's pages
    const PAGE_KIND: PageKind;

    /// Size of one leaf entry for the variant
    fn entry_size(format: Format) -> usize;

    /// Decode one leaf entry from exactly `entry_size` bytes
    fn decode(format: Format, bytes: &[u8]) -> Self;

    /// Decode a branch key from the variant's wide field
    fn decode_key(format: Format, bytes: &[u8]) -> Self::Key;

    fn key(&self) -> Self::Key;

    /// The lookup-failure error for this tree's key space
    fn not_found(key: Self::Key) -> PstError;
}

/// A branch entry: a key and the page holding everything at or above it
#[derive(Debug, Clone, Copy)]
pub(crate) struct BranchEntry<K> {
    pub key: K,
    pub child: Bref,
}

/// A decoded B-tree page
pub(crate) enum BTreePage<E: BTreeEntry> {
    Leaf(Vec<E>),
    Branch {
        level: u8,
        entries: Vec<BranchEntry<E::Key>>,
    },
}

/// Interpret a validated page as a page of this tree.
///
/// The page-type check is structural and always enforced; it is what keeps
/// a node-tree reference from silently decoding block-tree bytes.
pub(crate) fn decode_btree_page<E: BTreeEntry>(
    format: Format,
    page: &Page,
) -> Result<BTreePage<E>> {
    if page.page_type() != E::PAGE_KIND as u8 {
        return Err(PstError::unexpected_page(format!(
            "page type {:#x} is not {:?}",
            page.page_type(),
            E::PAGE_KIND
        )));
    }

    let count = page.entry_count();
    if page.level() == 0 {
        if page.entry_size() != E::entry_size(format) {
            return Err(PstError::corrupt(format!(
                "leaf entry size {} does not match the tree's {}",
                page.entry_size(),
                E::entry_size(format)
            )));
        }
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            entries.push(E::decode(format, page.entry(i)));
        }
        Ok(BTreePage::Leaf(entries))
    } else {
        if page.entry_size() != format.branch_entry_size() {
            return Err(PstError::corrupt(format!(
                "branch entry size {} does not match the variant's {}",
                page.entry_size(),
                format.branch_entry_size()
            )));
        }
        let wide = format.bid_size();
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let bytes = page.entry(i);
            entries.push(BranchEntry {
                key: E::decode_key(format, bytes),
                child: Bref {
                    bid: BlockId::new(format.read_wide(bytes, wide)),
                    ib: format.read_wide(bytes, 2 * wide),
                },
            });
        }
        Ok(BTreePage::Branch {
            level: page.level(),
            entries,
        })
    }
}

/// Exact lookup, descending through branch pages fetched by `read_child`
pub(crate) fn lookup<E, F>(page: &BTreePage<E>, key: E::Key, read_child: &mut F) -> Result<E>
where
    E: BTreeEntry,
    F: FnMut(Bref) -> Result<BTreePage<E>>,
{
    match page {
        BTreePage::Leaf(entries) => match entries.binary_search_by(|e| e.key().cmp(&key)) {
            Ok(i) => Ok(entries[i].clone()),
            Err(_) => Err(E::not_found(key)),
        },
        BTreePage::Branch { entries, .. } => {
            let idx = entries.partition_point(|e| e.key <= key);
            if idx == 0 {
                return Err(E::not_found(key));
            }
            let child = read_child(entries[idx - 1].child)?;
            lookup(&child, key, read_child)
        }
    }
}

/// Collect every leaf entry in key order
pub(crate) fn walk<E, F>(page: &BTreePage<E>, read_child: &mut F, out: &mut Vec<E>) -> Result<()>
where
    E: BTreeEntry,
    F: FnMut(Bref) -> Result<BTreePage<E>>,
{
    match page {
        BTreePage::Leaf(entries) => {
            out.extend(entries.iter().cloned());
            Ok(())
        }
        BTreePage::Branch { entries, .. } => {
            for entry in entries {
                let child = read_child(entry.child)?;
                walk(&child, read_child, out)?;
            }
            Ok(())
        }
    }
}

/// Node B-tree leaf entry: where a logical node keeps its data stream and
/// sub-node tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    /// Id of the node
    pub id: NodeId,
    /// Root of the node's data stream, `BlockId::NONE` for an empty stream
    pub data: BlockId,
    /// Root of the node's sub-node tree, `BlockId::NONE` when it has none
    pub sub: BlockId,
    /// Id of the node's parent in the store hierarchy
    pub parent: NodeId,
}

impl BTreeEntry for NodeEntry {
    type Key = NodeId;

    const PAGE_KIND: PageKind = PageKind::Nbt;

    fn entry_size(format: Format) -> usize {
        format.nbt_leaf_entry_size()
    }

    fn decode(format: Format, bytes: &[u8]) -> Self {
        let wide = format.bid_size();
        // The id field is stored at the variant's width; only the low 32
        // bits are significant.
        Self {
            id: NodeId::new(le_u32(bytes, 0)),
            data: BlockId::new(format.read_wide(bytes, wide)),
            sub: BlockId::new(format.read_wide(bytes, 2 * wide)),
            parent: NodeId::new(le_u32(bytes, 3 * wide)),
        }
    }

    fn decode_key(format: Format, bytes: &[u8]) -> NodeId {
        let _ = format;
        NodeId::new(le_u32(bytes, 0))
    }

    fn key(&self) -> NodeId {
        self.id
    }

    fn not_found(key: NodeId) -> PstError {
        PstError::NodeNotFound(key)
    }
}

/// Block B-tree leaf entry: where a block lives and how big it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Id of the block
    pub id: BlockId,
    /// Absolute file offset of the block's payload
    pub address: u64,
    /// Payload size in bytes
    pub size: u16,
    /// Reference count recorded by the writer
    pub ref_count: u16,
}

impl BlockEntry {
    /// The zeroed sentinel returned for a lookup of block id 0
    pub(crate) fn empty() -> Self {
        Self {
            id: BlockId::NONE,
            address: 0,
            size: 0,
            ref_count: 0,
        }
    }
}

impl BTreeEntry for BlockEntry {
    type Key = BlockId;

    const PAGE_KIND: PageKind = PageKind::Bbt;

    fn entry_size(format: Format) -> usize {
        format.bbt_leaf_entry_size()
    }

    fn decode(format: Format, bytes: &[u8]) -> Self {
        let wide = format.bid_size();
        Self {
            id: BlockId::new(format.read_wide(bytes, 0)),
            address: format.read_wide(bytes, wide),
            size: le_u16(bytes, 2 * wide),
            ref_count: le_u16(bytes, 2 * wide + 2),
        }
    }

    fn decode_key(format: Format, bytes: &[u8]) -> BlockId {
        BlockId::new(format.read_wide(bytes, 0))
    }

    fn key(&self) -> BlockId {
        self.id
    }

    fn not_found(key: BlockId) -> PstError {
        PstError::BlockNotFound(key)
    }
}
