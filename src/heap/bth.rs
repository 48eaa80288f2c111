//! B-tree-on-heap: a B-tree whose pages are heap allocations.
//!
//! The header allocation fixes the record geometry:
//!
//! ```text
//! Offset  Size  Description
//! 0       1     Type byte, 0xB5
//! 1       1     Key size in bytes
//! 2       1     Value size in bytes (leaf records)
//! 3       1     Number of branch levels above the leaves
//! 4       4     Heap id of the root record array, 0 for an empty tree
//! ```
//!
//! Every level is a packed array of fixed-size records sorted ascending by
//! key: branch records pair a key with the child array's heap id, leaf
//! records pair a key with the value bytes.

use crate::error::{PstError, Result};
use crate::heap::Heap;
use crate::node::Node;
use crate::types::{le_u32, HeapId, BTH_SIGNATURE};
use std::marker::PhantomData;

/// A fixed-width key of a B-tree-on-heap
pub trait BthKey: Copy + Ord {
    const SIZE: usize;

    /// Decode a key from exactly `SIZE` bytes
    fn decode(bytes: &[u8]) -> Self;

    /// The lookup-failure error for this key space
    fn not_found(self) -> PstError;
}

/// A fixed-width leaf value of a B-tree-on-heap
pub trait BthValue: Clone {
    const SIZE: usize;

    /// Decode a value from exactly `SIZE` bytes
    fn decode(bytes: &[u8]) -> Self;
}

/// A decoded B-tree-on-heap, generic over its record geometry
pub struct BthTree<K, V> {
    heap: Heap,
    levels: u8,
    root: u32,
    _records: PhantomData<(K, V)>,
}

impl<K: BthKey, V: BthValue> BthTree<K, V> {
    /// Decode the header allocation at `id` and take it as this tree's
    /// root
    pub(crate) fn open(heap: Heap, id: HeapId) -> Result<Self> {
        let header = heap.read(id)?;
        if header.len() < 8 {
            return Err(PstError::corrupt("bth header truncated"));
        }
        if header[0] != BTH_SIGNATURE {
            return Err(PstError::SigMismatch {
                context: "bth header signature",
                computed: BTH_SIGNATURE as u32,
                stored: header[0] as u32,
            });
        }
        if header[1] as usize != K::SIZE || header[2] as usize != V::SIZE {
            return Err(PstError::corrupt(format!(
                "bth records are {}+{} bytes, expected {}+{}",
                header[1],
                header[2],
                K::SIZE,
                V::SIZE
            )));
        }

        Ok(Self {
            levels: header[3],
            root: le_u32(&header, 4),
            heap,
            _records: PhantomData,
        })
    }

    /// Number of branch levels above the leaves
    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// The heap the tree's records live in
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The node the heap is laid over
    pub fn node(&self) -> &Node {
        self.heap.node()
    }

    /// Exact-match lookup
    pub fn lookup(&self, key: K) -> Result<V> {
        if self.root == 0 {
            return Err(key.not_found());
        }

        let mut id = self.root;
        let mut level = self.levels;
        loop {
            let records = self.heap.read(HeapId::from_raw(id))?;
            if level == 0 {
                let stride = K::SIZE + V::SIZE;
                let count = records.len() / stride;
                let found = binary_search_records::<K>(&records, stride, count, key);
                return match found {
                    Some(i) => Ok(V::decode(&records[i * stride + K::SIZE..(i + 1) * stride])),
                    None => Err(key.not_found()),
                };
            }

            let stride = K::SIZE + 4;
            let count = records.len() / stride;
            // Floor descent: the greatest record whose key is <= the target
            let mut idx = 0;
            while idx < count && K::decode(&records[idx * stride..idx * stride + K::SIZE]) <= key {
                idx += 1;
            }
            if idx == 0 {
                return Err(key.not_found());
            }
            id = le_u32(&records, (idx - 1) * stride + K::SIZE);
            level -= 1;
        }
    }

    /// Every `(key, value)` pair in key order
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        if self.root != 0 {
            self.walk(self.root, self.levels, &mut out)?;
        }
        Ok(out)
    }

    fn walk(&self, id: u32, level: u8, out: &mut Vec<(K, V)>) -> Result<()> {
        let records = self.heap.read(HeapId::from_raw(id))?;
        if level == 0 {
            let stride = K::SIZE + V::SIZE;
            for chunk in records.chunks_exact(stride) {
                out.push((K::decode(&chunk[..K::SIZE]), V::decode(&chunk[K::SIZE..])));
            }
        } else {
            let stride = K::SIZE + 4;
            for chunk in records.chunks_exact(stride) {
                self.walk(le_u32(chunk, K::SIZE), level - 1, out)?;
            }
        }
        Ok(())
    }
}

fn binary_search_records<K: BthKey>(
    records: &[u8],
    stride: usize,
    count: usize,
    key: K,
) -> Option<usize> {
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let mid_key = K::decode(&records[mid * stride..mid * stride + K::SIZE]);
        match mid_key.cmp(&key) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Some(mid),
        }
    }
    None
}
