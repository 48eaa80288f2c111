//! Logical nodes: a byte stream plus a map of sub-nodes.
//!
//! A node is what the node B-tree hands out: a data stream rooted at one
//! block and, optionally, a tree of nested sub-nodes. The stream root is
//! decoded lazily on first use and cached; cloning a node aliases that
//! cache, while [`Node::reopen`] starts over with independent decode
//! state.

use crate::block::{subnode_lookup, DataBlock};
use crate::btree::NodeEntry;
use crate::error::Result;
use crate::types::{BlockId, NodeId};
use crate::Db;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// A logical node resolved from the node B-tree or a sub-node tree.
///
/// Cloning is cheap and yields an alias: both handles share the database
/// and the lazily built stream root.
#[derive(Clone)]
pub struct Node {
    db: Arc<Db>,
    entry: NodeEntry,
    caches: Arc<NodeCaches>,
}

#[derive(Default)]
struct NodeCaches {
    data: OnceCell<DataBlock>,
}

impl Node {
    pub(crate) fn new(db: Arc<Db>, entry: NodeEntry) -> Self {
        Self {
            db,
            entry,
            caches: Arc::new(NodeCaches::default()),
        }
    }

    /// Id of this node
    pub fn id(&self) -> NodeId {
        self.entry.id
    }

    /// Id of this node's parent. For a sub-node this is the owning node.
    pub fn parent_id(&self) -> NodeId {
        self.entry.parent
    }

    /// Root block of the data stream
    pub fn data_bid(&self) -> BlockId {
        self.entry.data
    }

    /// Root block of the sub-node tree
    pub fn sub_bid(&self) -> BlockId {
        self.entry.sub
    }

    pub(crate) fn db(&self) -> &Arc<Db> {
        &self.db
    }

    fn data_root(&self) -> Result<&DataBlock> {
        self.caches
            .data
            .get_or_try_init(|| self.db.data_block(self.entry.data))
    }

    /// Size of the node's byte stream
    pub fn size(&self) -> Result<u64> {
        Ok(self.data_root()?.total_size())
    }

    /// Fill `dst` from the stream starting at `offset`
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<()> {
        self.data_root()?.read_at(&self.db, dst, offset)
    }

    /// Read the whole stream into an owned buffer
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size()? as usize];
        self.read_at(&mut buf, 0)?;
        Ok(buf)
    }

    /// Number of pages (external blocks) backing the stream
    pub fn page_count(&self) -> Result<usize> {
        self.data_root()?.page_count(&self.db)
    }

    /// Payload of page `index` of the stream
    pub fn read_page(&self, index: usize) -> Result<Vec<u8>> {
        self.data_root()?.read_page(&self.db, index)
    }

    /// Resolve a sub-node id against this node's sub-node tree.
    ///
    /// The returned node is a full citizen: it has its own stream and may
    /// itself carry sub-nodes.
    pub fn lookup(&self, id: NodeId) -> Result<Node> {
        let sub = subnode_lookup(&self.db, self.entry.sub, id)?;
        Ok(Node::new(
            self.db.clone(),
            NodeEntry {
                id: sub.id,
                data: sub.data,
                sub: sub.sub,
                parent: self.entry.id,
            },
        ))
    }

    /// A handle with independent decode state, re-reading the stream root
    /// on next use instead of sharing this node's cache
    pub fn reopen(&self) -> Node {
        Node::new(self.db.clone(), self.entry)
    }
}
