//! # pstore
//!
//! A read-only storage layer for PST-style personal store databases.
//!
//! A store file is a self-contained archive holding a forest of logically
//! addressable nodes. The reader navigates the on-disk stack layer by
//! layer:
//!
//! - **Header** (`storage`): variant selection and the B-tree roots
//! - **Pages** (`page`): fixed 512-byte extents with validated trailers
//! - **B-trees** (`btree`): the node index and the block index
//! - **Blocks** (`block`): raw payloads, stream indirection, sub-node maps
//! - **Nodes** (`node`): a byte stream composed with a sub-node tree
//! - **Heap / properties** (`heap`): in-stream allocations, the B-tree
//!   laid over them, and typed property bags
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pstore::{PstFile, NodeId, PropId, PropertyBag};
//!
//! let pst = pstore::open("mail.pst")?;
//! let node = pst.lookup_node(NodeId::new(0x21))?;
//! let bag = PropertyBag::open(node)?;
//! for id in bag.prop_list()? {
//!     println!("{id}: type {:#06x}", bag.prop_type(id)?);
//! }
//! ```

pub mod crypt;
pub mod error;
pub mod heap;
pub mod node;
pub mod types;

mod block;
mod btree;
mod page;
mod storage;
#[cfg(test)]
mod testutil;

pub use block::{Block, DataBlock, ExtendedBlock, SubnodeBlock, SubnodeBranchEntry, SubnodeEntry};
pub use btree::{BlockEntry, NodeEntry};
pub use error::{PstError, Result};
pub use heap::{BthKey, BthTree, BthValue, Heap, PropEntry, PropertyBag};
pub use node::Node;
pub use types::{BlockId, Bref, CryptMethod, Format, HeapId, NodeId, PropId, Validation};

use btree::{BTreeEntry, BTreePage};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use storage::{header_size, FileReader, Header};

/// Reader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// How much of the file's self-description to verify
    pub validation: Validation,
}

impl Config {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validation level
    pub fn validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }
}

/// Shared decode state behind every handle derived from one open file
pub(crate) struct Db {
    pub(crate) file: FileReader,
    pub(crate) format: Format,
    pub(crate) validation: Validation,
    pub(crate) header: RwLock<Header>,
    nbt_root: OnceCell<BTreePage<NodeEntry>>,
    bbt_root: OnceCell<BTreePage<BlockEntry>>,
}

impl Db {
    fn open_variant(path: &Path, format: Format, validation: Validation) -> Result<Self> {
        let file = FileReader::open(path)?;
        let size = header_size(format);
        if file.len() < size as u64 {
            return Err(PstError::corrupt("file too small for a header"));
        }
        let mut buf = vec![0u8; size];
        file.read_exact_at(&mut buf, 0)?;
        let header = Header::read(format, &buf, validation)?;

        Ok(Self {
            file,
            format,
            validation,
            header: RwLock::new(header),
            nbt_root: OnceCell::new(),
            bbt_root: OnceCell::new(),
        })
    }

    pub(crate) fn eof(&self) -> u64 {
        self.header.read().file_eof
    }

    pub(crate) fn crypt_method(&self) -> CryptMethod {
        self.header.read().crypt_method
    }

    fn read_bt_page<E: BTreeEntry>(&self, pi: Bref) -> Result<BTreePage<E>> {
        let page = page::read_page(&self.file, self.format, self.validation, self.eof(), pi)?;
        btree::decode_btree_page(self.format, &page)
    }

    fn nbt_root(&self) -> Result<&BTreePage<NodeEntry>> {
        self.nbt_root
            .get_or_try_init(|| self.read_bt_page(self.header.read().nbt_root))
    }

    fn bbt_root(&self) -> Result<&BTreePage<BlockEntry>> {
        self.bbt_root
            .get_or_try_init(|| self.read_bt_page(self.header.read().bbt_root))
    }

    pub(crate) fn lookup_node_info(&self, id: NodeId) -> Result<NodeEntry> {
        btree::lookup(self.nbt_root()?, id, &mut |pi| self.read_bt_page(pi))
    }

    /// Block id 0 is the "empty" sentinel and resolves to a zeroed entry
    /// without touching the block B-tree
    pub(crate) fn lookup_block_info(&self, id: BlockId) -> Result<BlockEntry> {
        if id.is_none() {
            return Ok(BlockEntry::empty());
        }
        btree::lookup(self.bbt_root()?, id, &mut |pi| self.read_bt_page(pi))
    }
}

/// An open store file.
///
/// Cloning is cheap; clones share the underlying file handle and the
/// memoised B-tree roots.
#[derive(Clone)]
pub struct PstFile {
    pub(crate) db: Arc<Db>,
}

/// Summary of an open file
#[derive(Debug, Clone)]
pub struct PstStats {
    /// The on-disk variant
    pub format: Format,
    /// Header version word
    pub version: u16,
    /// Obfuscation applied to external blocks
    pub crypt_method: CryptMethod,
    /// Logical end-of-file offset from the header
    pub file_size: u64,
}

/// Open a store file, trying the small variant first and falling back to
/// the large one when the version word says otherwise
pub fn open(path: impl AsRef<Path>) -> Result<PstFile> {
    open_with_config(path, Config::default())
}

/// Open a store file with explicit configuration.
///
/// Only `InvalidFormat` triggers the variant retry; any other failure of
/// the first attempt surfaces unchanged.
pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<PstFile> {
    let path = path.as_ref();
    match Db::open_variant(path, Format::Ansi, config.validation) {
        Ok(db) => Ok(PstFile { db: Arc::new(db) }),
        Err(PstError::InvalidFormat { .. }) => {
            let db = Db::open_variant(path, Format::Unicode, config.validation)?;
            Ok(PstFile { db: Arc::new(db) })
        }
        Err(e) => Err(e),
    }
}

/// Open a file that must be the small (Ansi) variant
pub fn open_ansi(path: impl AsRef<Path>) -> Result<PstFile> {
    let db = Db::open_variant(path.as_ref(), Format::Ansi, Validation::default())?;
    Ok(PstFile { db: Arc::new(db) })
}

/// Open a file that must be the large (Unicode) variant
pub fn open_unicode(path: impl AsRef<Path>) -> Result<PstFile> {
    let db = Db::open_variant(path.as_ref(), Format::Unicode, Validation::default())?;
    Ok(PstFile { db: Arc::new(db) })
}

impl PstFile {
    /// Open a store file; see the crate-level [`open`]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        crate::open(path)
    }

    /// The variant this file was opened as
    pub fn format(&self) -> Format {
        self.db.format
    }

    /// The obfuscation method declared by the header
    pub fn crypt_method(&self) -> CryptMethod {
        self.db.crypt_method()
    }

    /// Resolve a node id to a live node
    pub fn lookup_node(&self, id: NodeId) -> Result<Node> {
        let entry = self.db.lookup_node_info(id)?;
        Ok(Node::new(self.db.clone(), entry))
    }

    /// Resolve a node id to its raw index entry
    pub fn lookup_node_info(&self, id: NodeId) -> Result<NodeEntry> {
        self.db.lookup_node_info(id)
    }

    /// Resolve a block id to its raw index entry
    pub fn block_info(&self, id: BlockId) -> Result<BlockEntry> {
        self.db.lookup_block_info(id)
    }

    /// Every node index entry, in id order
    pub fn nodes(&self) -> Result<Vec<NodeEntry>> {
        let mut out = Vec::new();
        btree::walk(self.db.nbt_root()?, &mut |pi| self.db.read_bt_page(pi), &mut out)?;
        Ok(out)
    }

    /// Every block index entry, in id order
    pub fn blocks(&self) -> Result<Vec<BlockEntry>> {
        let mut out = Vec::new();
        btree::walk(self.db.bbt_root()?, &mut |pi| self.db.read_bt_page(pi), &mut out)?;
        Ok(out)
    }

    /// Read a block whose shape is not known up front; data blocks win,
    /// sub-node blocks are the fallback
    pub fn read_block(&self, id: BlockId) -> Result<Block> {
        let bi = self.db.lookup_block_info(id)?;
        self.db.read_block(&bi)
    }

    /// Summary of the open file
    pub fn stats(&self) -> PstStats {
        let header = self.db.header.read();
        PstStats {
            format: self.db.format,
            version: header.version,
            crypt_method: header.crypt_method,
            file_size: header.file_eof,
        }
    }

    /// Trace a node lookup through the node B-tree, page by page
    pub fn debug_lookup_node(&self, id: NodeId) -> Result<Vec<String>> {
        let mut trace = Vec::new();
        let root = self.db.header.read().nbt_root;
        trace.push(format!("Searching for node {id}"));
        trace.push(format!("Root page {} at {:#x}", root.bid, root.ib));

        let mut page = self.db.read_bt_page::<NodeEntry>(root)?;
        loop {
            let next = match &page {
                BTreePage::Leaf(entries) => {
                    trace.push(format!("  Leaf page with {} entries", entries.len()));
                    match entries.binary_search_by(|e| e.id.cmp(&id)) {
                        Ok(i) => {
                            let entry = &entries[i];
                            trace.push(format!(
                                "  FOUND at index {i}: data {} sub {} parent {}",
                                entry.data, entry.sub, entry.parent
                            ));
                        }
                        Err(_) => trace.push("  NOT FOUND in leaf".to_string()),
                    }
                    return Ok(trace);
                }
                BTreePage::Branch { level, entries } => {
                    trace.push(format!(
                        "  Branch page, level {level}, {} entries",
                        entries.len()
                    ));
                    let idx = entries.partition_point(|e| e.key <= id);
                    if idx == 0 {
                        trace.push("  target below the first separator".to_string());
                        return Ok(trace);
                    }
                    let child = entries[idx - 1].child;
                    trace.push(format!(
                        "  -> descending to page {} at {:#x}",
                        child.bid, child.ib
                    ));
                    child
                }
            };
            page = self.db.read_bt_page::<NodeEntry>(next)?;
        }
    }

    /// Hand out the next block id, flag bit set per `is_internal`
    #[cfg(feature = "write")]
    pub fn alloc_bid(&self, is_internal: bool) -> BlockId {
        self.db.alloc_bid(is_internal)
    }
}
