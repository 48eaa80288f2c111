//! Sub-node blocks: per-node trees mapping nested node ids.
//!
//! A node may carry children that are not registered in the global node
//! B-tree; they are reached through the node's sub-node tree instead. The
//! tree's pages are blocks: a leaf block lists `{nid, data bid, sub bid}`
//! entries, a branch block lists `{nid key, child block bid}` pairs. Both
//! are sorted ascending by id, and lookup uses the same floor-descent as
//! the global trees.

use crate::error::{PstError, Result};
use crate::types::{le_u16, le_u32, BlockId, Format, NodeId};
use crate::Db;

/// A sub-node of some owning node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnodeEntry {
    /// Id of the sub-node
    pub id: NodeId,
    /// Root of the sub-node's data stream
    pub data: BlockId,
    /// Root of the sub-node's own sub-node tree; sub-nodes nest
    pub sub: BlockId,
}

/// A branch entry pointing at a child sub-node block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnodeBranchEntry {
    /// Smallest id reachable below the child
    pub key: NodeId,
    /// Id of the child sub-node block
    pub block: BlockId,
}

/// One block of a sub-node tree
#[derive(Debug, Clone)]
pub enum SubnodeBlock {
    Leaf(Vec<SubnodeEntry>),
    Branch(Vec<SubnodeBranchEntry>),
}

impl SubnodeBlock {
    /// Decode the payload of an internal block already known to carry the
    /// sub-node type byte
    pub(crate) fn decode(format: Format, payload: &[u8], bid: BlockId) -> Result<Self> {
        let level = payload[1];
        let count = le_u16(payload, 2) as usize;
        let header = format.subnode_header_size();
        let wide = format.bid_size();

        let entry_size = if level == 0 {
            format.subnode_leaf_entry_size()
        } else {
            format.subnode_branch_entry_size()
        };
        if header + count * entry_size > payload.len() {
            return Err(PstError::corrupt(format!(
                "sub-node block {bid} claims {count} entries beyond its payload"
            )));
        }

        if level == 0 {
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let at = header + i * entry_size;
                // The id field is stored at the variant's width; only the
                // low 32 bits are significant.
                entries.push(SubnodeEntry {
                    id: NodeId::new(le_u32(payload, at)),
                    data: BlockId::new(format.read_wide(payload, at + wide)),
                    sub: BlockId::new(format.read_wide(payload, at + 2 * wide)),
                });
            }
            Ok(SubnodeBlock::Leaf(entries))
        } else {
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let at = header + i * entry_size;
                entries.push(SubnodeBranchEntry {
                    key: NodeId::new(le_u32(payload, at)),
                    block: BlockId::new(format.read_wide(payload, at + wide)),
                });
            }
            Ok(SubnodeBlock::Branch(entries))
        }
    }
}

/// Resolve a sub-node id against the tree rooted at `root`.
///
/// `root` 0 is the empty tree: every lookup misses.
pub(crate) fn subnode_lookup(db: &Db, root: BlockId, id: NodeId) -> Result<SubnodeEntry> {
    let mut bid = root;
    loop {
        if bid.is_none() {
            return Err(PstError::NodeNotFound(id));
        }
        match db.subnode_block(bid)? {
            SubnodeBlock::Leaf(entries) => {
                return match entries.binary_search_by(|e| e.id.cmp(&id)) {
                    Ok(i) => Ok(entries[i]),
                    Err(_) => Err(PstError::NodeNotFound(id)),
                };
            }
            SubnodeBlock::Branch(entries) => {
                let idx = entries.partition_point(|e| e.key <= id);
                if idx == 0 {
                    return Err(PstError::NodeNotFound(id));
                }
                bid = entries[idx - 1].block;
            }
        }
    }
}
