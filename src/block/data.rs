//! Data blocks: the byte-stream side of the block layer.
//!
//! A node's stream is rooted at a single block. Small streams live in one
//! external block; larger ones are stitched together by an extended block
//! whose header is followed by child block ids:
//!
//! ```text
//! Offset  Size  Description
//! 0       1     Type byte, 0x01
//! 1       1     Level: 1 = children are external, 2 = children are level 1
//! 2       2     Child count
//! 4       4     Total logical stream size in bytes
//! 8       ...   Child block ids at the variant's width
//! ```
//!
//! Every child except the last is full for its level, which is what makes
//! offset arithmetic a pair of divisions rather than a search.

use crate::error::{PstError, Result};
use crate::types::{le_u16, le_u32, BlockId, Format};
use crate::Db;

/// The root (or any interior point) of a node's data stream
#[derive(Debug, Clone)]
pub enum DataBlock {
    /// Raw payload bytes, already de-obfuscated
    External(Vec<u8>),
    /// Indirection over child blocks
    Extended(ExtendedBlock),
}

/// Decoded extended block
#[derive(Debug, Clone)]
pub struct ExtendedBlock {
    /// 1 when children are external blocks, 2 when they are level-1
    /// extended blocks
    pub level: u8,
    /// Logical size of the whole stream below this block
    pub total_size: u64,
    /// Child block ids, in stream order
    pub children: Vec<BlockId>,
}

impl ExtendedBlock {
    /// Decode the payload of an internal block already known to carry the
    /// extended type byte
    pub(crate) fn decode(format: Format, payload: &[u8]) -> Result<Self> {
        let level = payload[1];
        if !(1..=2).contains(&level) {
            return Err(PstError::unexpected_block(format!(
                "extended block level {level} out of range"
            )));
        }

        let count = le_u16(payload, 2) as usize;
        let total_size = le_u32(payload, 4) as u64;

        let wide = format.bid_size();
        if 8 + count * wide > payload.len() {
            return Err(PstError::corrupt(format!(
                "extended block claims {count} children beyond its payload"
            )));
        }

        let mut children = Vec::with_capacity(count);
        for i in 0..count {
            children.push(BlockId::new(format.read_wide(payload, 8 + i * wide)));
        }

        Ok(Self {
            level,
            total_size,
            children,
        })
    }

    /// Logical size every child but the last must have
    fn child_span(&self, format: Format) -> u64 {
        if self.level == 1 {
            format.external_max_size() as u64
        } else {
            format.extended_max_size()
        }
    }

    /// Data-tree pages per child
    fn pages_per_child(&self, format: Format) -> usize {
        if self.level == 1 {
            1
        } else {
            format.extended_max_count()
        }
    }
}

impl DataBlock {
    /// Logical size of the stream below this block
    pub fn total_size(&self) -> u64 {
        match self {
            DataBlock::External(data) => data.len() as u64,
            DataBlock::Extended(ext) => ext.total_size,
        }
    }

    /// Fill `dst` from the stream starting at `offset`
    pub(crate) fn read_at(&self, db: &Db, dst: &mut [u8], offset: u64) -> Result<()> {
        let size = self.total_size();
        if offset + dst.len() as u64 > size {
            return Err(PstError::OutOfRange {
                offset,
                len: dst.len(),
                size,
            });
        }

        match self {
            DataBlock::External(data) => {
                let start = offset as usize;
                dst.copy_from_slice(&data[start..start + dst.len()]);
                Ok(())
            }
            DataBlock::Extended(ext) => {
                let span = ext.child_span(db.format);
                let mut pos = offset;
                let mut filled = 0usize;
                while filled < dst.len() {
                    let child_index = (pos / span) as usize;
                    let child_offset = pos % span;
                    let child_bid = *ext.children.get(child_index).ok_or_else(|| {
                        PstError::corrupt("extended block shorter than its total size")
                    })?;
                    let chunk = ((span - child_offset) as usize).min(dst.len() - filled);
                    let child = db.data_block(child_bid)?;
                    child.read_at(db, &mut dst[filled..filled + chunk], child_offset)?;
                    filled += chunk;
                    pos += chunk as u64;
                }
                Ok(())
            }
        }
    }

    /// Number of data-tree pages (external blocks) backing the stream
    pub(crate) fn page_count(&self, db: &Db) -> Result<usize> {
        match self {
            DataBlock::External(_) => Ok(1),
            DataBlock::Extended(ext) => {
                if ext.level == 1 {
                    Ok(ext.children.len())
                } else {
                    match ext.children.split_last() {
                        None => Ok(0),
                        Some((last, full)) => {
                            let tail = db.data_block(*last)?.page_count(db)?;
                            Ok(full.len() * ext.pages_per_child(db.format) + tail)
                        }
                    }
                }
            }
        }
    }

    /// Fetch the payload of page `index` of the stream
    pub(crate) fn read_page(&self, db: &Db, index: usize) -> Result<Vec<u8>> {
        match self {
            DataBlock::External(data) => {
                if index != 0 {
                    return Err(PstError::corrupt(format!(
                        "data stream page {index} out of range"
                    )));
                }
                Ok(data.clone())
            }
            DataBlock::Extended(ext) => {
                let per_child = ext.pages_per_child(db.format);
                let child_index = index / per_child;
                let child_bid = *ext.children.get(child_index).ok_or_else(|| {
                    PstError::corrupt(format!("data stream page {index} out of range"))
                })?;
                let child = db.data_block(child_bid)?;
                match (&child, ext.level) {
                    (DataBlock::External(data), 1) => Ok(data.clone()),
                    (DataBlock::Extended(_), 2) => child.read_page(db, index % per_child),
                    _ => Err(PstError::unexpected_block(format!(
                        "extended block child {child_bid} does not match its level"
                    ))),
                }
            }
        }
    }
}
