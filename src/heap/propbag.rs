//! Property bags: typed property access over a property-context heap.
//!
//! A property context is a B-tree-on-heap keyed by 16-bit property ids.
//! Each leaf value is six bytes: the property's type word and a 32-bit
//! field that either holds the value itself (types of up to four bytes)
//! or names where the value lives. Eight-byte and variable-width values
//! are always out of line: the field is then a heapnode id resolving
//! either to an in-heap allocation or, for values too large for the heap,
//! to a sub-node of the owning node.

use crate::error::{PstError, Result};
use crate::heap::bth::{BthKey, BthTree, BthValue};
use crate::heap::Heap;
use crate::node::Node;
use crate::types::{is_subnode_id, le_u16, le_u32, HeapId, NodeId, PropId, HEAP_SIG_PC};

/// Well-known property type words
pub mod prop_type {
    /// 16-bit integer
    pub const SHORT: u16 = 0x0002;
    /// 32-bit integer
    pub const LONG: u16 = 0x0003;
    /// Boolean, stored as one byte
    pub const BOOLEAN: u16 = 0x000B;
    /// 64-bit integer
    pub const LONGLONG: u16 = 0x0014;
    /// UTF-16 string bytes
    pub const UNICODE: u16 = 0x001F;
    /// 64-bit timestamp
    pub const SYSTIME: u16 = 0x0040;
    /// Raw bytes
    pub const BINARY: u16 = 0x0102;
}

/// One property-context record: the type word and the inline-or-reference
/// field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropEntry {
    /// The property's type word
    pub prop_type: u16,
    /// Inline value for narrow fixed-width types, heapnode id otherwise
    pub raw: u32,
}

impl BthKey for PropId {
    const SIZE: usize = 2;

    fn decode(bytes: &[u8]) -> Self {
        PropId::new(le_u16(bytes, 0))
    }

    fn not_found(self) -> PstError {
        PstError::PropNotFound(self)
    }
}

impl BthValue for PropEntry {
    const SIZE: usize = 6;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            prop_type: le_u16(bytes, 0),
            raw: le_u32(bytes, 2),
        }
    }
}

/// Property access over one node's property context
pub struct PropertyBag {
    bth: BthTree<PropId, PropEntry>,
}

impl PropertyBag {
    /// Open the property context of a node
    pub fn open(node: Node) -> Result<Self> {
        let heap = Heap::open_expecting(node, HEAP_SIG_PC)?;
        Self::from_heap(heap)
    }

    /// Open a property context over an already opened heap.
    ///
    /// The heap must carry the property-context client signature.
    pub fn from_heap(heap: Heap) -> Result<Self> {
        if heap.node().db().validation >= crate::types::Validation::Weak
            && heap.client_signature() != HEAP_SIG_PC
        {
            return Err(PstError::SigMismatch {
                context: "heap client signature",
                computed: HEAP_SIG_PC as u32,
                stored: heap.client_signature() as u32,
            });
        }
        let root = heap.root_id();
        let bth = heap.open_bth(HeapId::from_raw(root))?;
        Ok(Self { bth })
    }

    /// The node whose properties these are
    pub fn node(&self) -> &Node {
        self.bth.node()
    }

    /// Every property id present, in ascending order
    pub fn prop_list(&self) -> Result<Vec<PropId>> {
        Ok(self.bth.entries()?.into_iter().map(|(id, _)| id).collect())
    }

    /// The type word stored for a property
    pub fn prop_type(&self, id: PropId) -> Result<u16> {
        Ok(self.bth.lookup(id)?.prop_type)
    }

    /// Whether a property is present at all
    pub fn prop_exists(&self, id: PropId) -> Result<bool> {
        match self.bth.lookup(id) {
            Ok(_) => Ok(true),
            Err(PstError::PropNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A one-byte value stored inline
    pub fn value_u8(&self, id: PropId) -> Result<u8> {
        Ok(self.bth.lookup(id)?.raw as u8)
    }

    /// A two-byte value stored inline
    pub fn value_u16(&self, id: PropId) -> Result<u16> {
        Ok(self.bth.lookup(id)?.raw as u16)
    }

    /// A four-byte value stored inline
    pub fn value_u32(&self, id: PropId) -> Result<u32> {
        Ok(self.bth.lookup(id)?.raw)
    }

    /// An eight-byte value, always stored out of line
    pub fn value_u64(&self, id: PropId) -> Result<u64> {
        let bytes = self.value_bytes(id)?;
        if bytes.len() < 8 {
            return Err(PstError::corrupt(format!(
                "property {id} holds {} bytes, 8 expected",
                bytes.len()
            )));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Ok(u64::from_le_bytes(raw))
    }

    /// A variable-width value: empty for a zero reference, the sub-node's
    /// whole stream when the reference names a sub-node, the heap
    /// allocation otherwise
    pub fn value_bytes(&self, id: PropId) -> Result<Vec<u8>> {
        let raw = self.bth.lookup(id)?.raw;
        if raw == 0 {
            return Ok(Vec::new());
        }
        if is_subnode_id(raw) {
            let sub = self.node().lookup(NodeId::new(raw))?;
            return sub.read_all();
        }
        self.bth.heap().read(HeapId::from_raw(raw))
    }
}
