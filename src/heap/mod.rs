//! Heap-on-node: variable-length allocations laid over a node's stream.
//!
//! The heap divides the node's byte stream along its data-tree pages; each
//! page carries its own allocations and a map of their offsets. Page 0
//! opens with the heap header:
//!
//! ```text
//! Offset  Size  Description
//! 0       2     Offset of the page's allocation map
//! 2       1     Heap signature, 0xEC
//! 3       1     Client signature: who this heap serves (0xBC = property
//!               context, 0x7C = table context)
//! 4       4     Heapnode id of the user root allocation
//! 8       4     Fill-level bytes, ignored on read
//! ```
//!
//! Later pages carry only the 2-byte map offset (bitmap pages add fill
//! bytes the reader never needs to touch). The allocation map itself is
//! `{count u16, free u16, offsets [u16; count+1]}`; allocation *i*
//! (1-based, as heap ids count them) spans `offsets[i-1]..offsets[i]`.

pub mod bth;
pub mod propbag;

pub use bth::{BthKey, BthTree, BthValue};
pub use propbag::{PropEntry, PropertyBag};

use crate::error::{PstError, Result};
use crate::node::Node;
use crate::types::{le_u16, le_u32, HeapId, Validation, HEAP_SIGNATURE};

/// A heap laid over one node's byte stream.
///
/// Cloning aliases the underlying node.
#[derive(Clone)]
pub struct Heap {
    node: Node,
    client_sig: u8,
    root: u32,
}

impl Heap {
    /// Interpret a node's stream as a heap
    pub fn open(node: Node) -> Result<Self> {
        let page0 = node.read_page(0)?;
        if page0.len() < 12 {
            return Err(PstError::corrupt("heap header truncated"));
        }

        if node.db().validation >= Validation::Weak && page0[2] != HEAP_SIGNATURE {
            return Err(PstError::SigMismatch {
                context: "heap signature",
                computed: HEAP_SIGNATURE as u32,
                stored: page0[2] as u32,
            });
        }

        Ok(Self {
            client_sig: page0[3],
            root: le_u32(&page0, 4),
            node,
        })
    }

    /// Open a heap and require a particular client signature
    pub fn open_expecting(node: Node, client_sig: u8) -> Result<Self> {
        let heap = Self::open(node)?;
        if heap.node.db().validation >= Validation::Weak && heap.client_sig != client_sig {
            return Err(PstError::SigMismatch {
                context: "heap client signature",
                computed: client_sig as u32,
                stored: heap.client_sig as u32,
            });
        }
        Ok(heap)
    }

    /// The node this heap is laid over
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The consumer tag stamped into the heap header
    pub fn client_signature(&self) -> u8 {
        self.client_sig
    }

    /// Raw heapnode id of the user root allocation
    pub fn root_id(&self) -> u32 {
        self.root
    }

    /// Read one allocation into an owned buffer
    pub fn read(&self, id: HeapId) -> Result<Vec<u8>> {
        if id.id_type() != 0 {
            return Err(PstError::corrupt(format!(
                "heapnode id {id} is not an in-heap allocation"
            )));
        }
        let index = id.index();
        if index == 0 {
            return Err(PstError::corrupt(format!("heap id {id} has index 0")));
        }

        let page = self.node.read_page(id.page())?;
        if page.len() < 2 {
            return Err(PstError::corrupt("heap page truncated"));
        }

        let map = le_u16(&page, 0) as usize;
        if map + 4 > page.len() {
            return Err(PstError::corrupt("heap allocation map out of bounds"));
        }
        let count = le_u16(&page, map) as usize;
        if index > count {
            return Err(PstError::corrupt(format!(
                "heap id {id} addresses allocation {index} of {count}"
            )));
        }
        let offsets = map + 4;
        if offsets + (count + 1) * 2 > page.len() {
            return Err(PstError::corrupt("heap allocation map truncated"));
        }

        let start = le_u16(&page, offsets + (index - 1) * 2) as usize;
        let end = le_u16(&page, offsets + index * 2) as usize;
        if start > end || end > page.len() {
            return Err(PstError::corrupt(format!(
                "heap allocation {index} has bounds {start}..{end}"
            )));
        }

        Ok(page[start..end].to_vec())
    }

    /// Open the B-tree rooted at an allocation of this heap
    pub fn open_bth<K: BthKey, V: BthValue>(&self, id: HeapId) -> Result<BthTree<K, V>> {
        BthTree::open(self.clone(), id)
    }
}
