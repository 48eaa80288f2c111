//! Block layer: variable-sized extents addressed through the block B-tree.
//!
//! A block is a payload of up to `external_max_size` bytes, padded so that
//! payload plus trailer ends on a 64-byte boundary, with the trailer at
//! the very end of the padded extent. External blocks (flag bit clear)
//! carry raw, possibly obfuscated, data; internal blocks carry structure
//! and are told apart by the type byte leading their payload: extended
//! blocks stitch a logical stream out of child blocks, sub-node blocks
//! map nested node ids.
//!
//! Data and sub-node blocks share the trailer layout, so a caller that
//! only holds a block id cannot tell them apart up front. `read_block`
//! first tries the data interpretation and falls back to the sub-node one
//! when the type byte says otherwise; that specific error is the
//! dispatch mechanism, not a failure.

mod data;
mod subnode;

pub use data::{DataBlock, ExtendedBlock};
pub use subnode::{SubnodeBlock, SubnodeBranchEntry, SubnodeEntry};

pub(crate) use subnode::subnode_lookup;

use crate::btree::BlockEntry;
use crate::crypt::{self, compute_crc, compute_signature};
use crate::error::{PstError, Result};
use crate::types::{le_u16, le_u32, BlockId, CryptMethod, Format, Validation, BLOCK_ALIGN, MAX_BLOCK_DISK_SIZE};
use crate::Db;

/// Type byte of an extended (stream indirection) block
pub(crate) const BTYPE_EXTENDED: u8 = 0x01;
/// Type byte of a sub-node block
pub(crate) const BTYPE_SUBNODE: u8 = 0x02;

/// On-disk extent of a block with the given payload size
pub(crate) fn align_disk(format: Format, size: u16) -> usize {
    let total = size as usize + format.block_trailer_size();
    total.div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN
}

/// Decoded block trailer
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockTrailer {
    pub cb: u16,
    pub signature: u16,
    pub crc: u32,
    pub bid: BlockId,
}

impl BlockTrailer {
    pub(crate) fn read(format: Format, extent: &[u8]) -> Self {
        let t = extent.len() - format.block_trailer_size();
        match format {
            Format::Ansi => Self {
                cb: le_u16(extent, t),
                signature: le_u16(extent, t + 2),
                bid: BlockId::new(le_u32(extent, t + 4) as u64),
                crc: le_u32(extent, t + 8),
            },
            Format::Unicode => Self {
                cb: le_u16(extent, t),
                signature: le_u16(extent, t + 2),
                crc: le_u32(extent, t + 4),
                bid: BlockId::new(format.read_wide(extent, t + 8)),
            },
        }
    }
}

/// Any block reachable from the block B-tree
#[derive(Debug)]
pub enum Block {
    /// An external or extended block backing a node's byte stream
    Data(DataBlock),
    /// A leaf or branch of a sub-node tree
    Subnode(SubnodeBlock),
}

impl Db {
    /// Read a block's padded extent and verify its trailer against the
    /// block B-tree entry that led here
    pub(crate) fn read_block_data(&self, bi: &BlockEntry) -> Result<Vec<u8>> {
        let aligned = align_disk(self.format, bi.size);

        if self.validation >= Validation::Weak {
            if aligned > MAX_BLOCK_DISK_SIZE {
                return Err(PstError::unexpected_block(format!(
                    "block {} claims a nonsensical size of {} bytes",
                    bi.id, bi.size
                )));
            }
            if bi.address + aligned as u64 > self.eof() {
                return Err(PstError::unexpected_block(format!(
                    "block {} at {:#x} lies past the end of file",
                    bi.id, bi.address
                )));
            }
        }

        let mut extent = vec![0u8; aligned];
        self.file.read_exact_at(&mut extent, bi.address)?;

        let trailer = BlockTrailer::read(self.format, &extent);

        if self.validation >= Validation::Weak {
            if trailer.bid != bi.id {
                return Err(PstError::unexpected_block(format!(
                    "block at {:#x} names id {}, expected {}",
                    bi.address, trailer.bid, bi.id
                )));
            }
            if trailer.cb != bi.size {
                return Err(PstError::unexpected_block(format!(
                    "block {} stores {} payload bytes, index says {}",
                    bi.id, trailer.cb, bi.size
                )));
            }
            let computed = compute_signature(bi.id.raw(), bi.address);
            if computed != trailer.signature {
                return Err(PstError::SigMismatch {
                    context: "block signature",
                    computed: computed as u32,
                    stored: trailer.signature as u32,
                });
            }
        }

        if self.validation >= Validation::Full {
            let computed = compute_crc(&extent[..bi.size as usize]);
            if computed != trailer.crc {
                return Err(PstError::CrcFail {
                    context: "block crc",
                    computed,
                    stored: trailer.crc,
                });
            }
        }

        Ok(extent)
    }

    /// Read an external block's payload, de-obfuscated per the header
    pub(crate) fn read_external_block(&self, bi: &BlockEntry) -> Result<Vec<u8>> {
        if bi.id.is_none() {
            return Ok(Vec::new());
        }
        if bi.id.is_internal() {
            return Err(PstError::unexpected_block(format!(
                "block {} is internal, external expected",
                bi.id
            )));
        }

        let mut data = self.read_block_data(bi)?;
        data.truncate(bi.size as usize);

        match self.crypt_method() {
            CryptMethod::None => {}
            CryptMethod::Permute => crypt::permute(&mut data, false),
            CryptMethod::Cyclic => crypt::cyclic(&mut data, crypt::cyclic_key(bi.id)),
        }

        Ok(data)
    }

    /// Read a block backing a data stream: external payload or extended
    /// indirection.
    ///
    /// The type-byte check always runs; `read_block` relies on the
    /// `UnexpectedBlock` it raises to fall back to the sub-node shape.
    pub(crate) fn read_data_block(&self, bi: &BlockEntry) -> Result<DataBlock> {
        if bi.id.is_external() {
            return Ok(DataBlock::External(self.read_external_block(bi)?));
        }

        let extent = self.read_block_data(bi)?;
        let payload = &extent[..bi.size as usize];
        if payload.len() < 8 {
            return Err(PstError::corrupt(format!(
                "internal block {} is too short for a header",
                bi.id
            )));
        }
        if payload[0] != BTYPE_EXTENDED {
            return Err(PstError::unexpected_block(format!(
                "block {} has type {:#x}, extended expected",
                bi.id, payload[0]
            )));
        }

        Ok(DataBlock::Extended(ExtendedBlock::decode(
            self.format, payload,
        )?))
    }

    /// Read a sub-node tree block. Block id 0 is the empty tree sentinel
    /// and decodes to a leaf with no entries.
    pub(crate) fn read_subnode_block(&self, bi: &BlockEntry) -> Result<SubnodeBlock> {
        if bi.id.is_none() {
            return Ok(SubnodeBlock::Leaf(Vec::new()));
        }

        let extent = self.read_block_data(bi)?;
        let payload = &extent[..bi.size as usize];
        if payload.len() < self.format.subnode_header_size() {
            return Err(PstError::corrupt(format!(
                "sub-node block {} is too short for a header",
                bi.id
            )));
        }
        if payload[0] != BTYPE_SUBNODE {
            return Err(PstError::unexpected_block(format!(
                "block {} has type {:#x}, sub-node expected",
                bi.id, payload[0]
            )));
        }

        SubnodeBlock::decode(self.format, payload, bi.id)
    }

    /// Read a block whose shape is unknown: try the data interpretation
    /// first and fall back to sub-node when the type byte disagrees
    pub(crate) fn read_block(&self, bi: &BlockEntry) -> Result<Block> {
        match self.read_data_block(bi) {
            Ok(block) => Ok(Block::Data(block)),
            Err(PstError::UnexpectedBlock(_)) => {
                Ok(Block::Subnode(self.read_subnode_block(bi)?))
            }
            Err(e) => Err(e),
        }
    }

    /// Look up a block id and read it as a data block
    pub(crate) fn data_block(&self, bid: BlockId) -> Result<DataBlock> {
        let bi = self.lookup_block_info(bid)?;
        self.read_data_block(&bi)
    }

    /// Look up a block id and read it as a sub-node block
    pub(crate) fn subnode_block(&self, bid: BlockId) -> Result<SubnodeBlock> {
        let bi = self.lookup_block_info(bid)?;
        self.read_subnode_block(&bi)
    }

    /// Hand out the next block id and advance the header's counter. The
    /// flag bit is set for internal allocations and cleared for external
    /// ones.
    #[cfg(feature = "write")]
    pub(crate) fn alloc_bid(&self, is_internal: bool) -> BlockId {
        use crate::types::BLOCK_ID_INCREMENT;

        let mut header = self.header.write();
        let bid = header.next_bid;
        header.next_bid += BLOCK_ID_INCREMENT;
        BlockId::new(if is_internal {
            bid | BlockId::INTERNAL_BIT
        } else {
            bid & !BlockId::INTERNAL_BIT
        })
    }
}
