//! Page layer: fixed 512-byte pages holding B-tree contents.
//!
//! A page is a fixed extent at a 512-aligned offset past the first map
//! page. The tail of the page is a trailer naming the page's id, its type
//! (repeated as a cheap consistency check), a signature derived from the
//! id and offset, and a CRC over the data area. Just before the trailer
//! sit four metadata bytes: entry count, maximum entry count, entry size,
//! and level (0 for a leaf).
//!
//! Layout, Unicode variant:
//!
//! ```text
//! Offset  Size  Description
//! 0       488   Entry area (entry_count * entry_size significant bytes)
//! 488     1     Entry count
//! 489     1     Maximum entry count
//! 490     1     Entry size
//! 491     1     Level (0 = leaf)
//! 492     4     Padding
//! 496     16    Trailer: type, type repeat, signature u16, crc u32, bid u64
//! ```
//!
//! The Ansi variant has a 496-byte entry area, no padding word, and a
//! 12-byte trailer with the bid (u32) ahead of the crc.

use crate::crypt::{compute_crc, compute_signature};
use crate::error::{PstError, Result};
use crate::storage::FileReader;
use crate::types::{le_u16, le_u32, BlockId, Bref, Format, Validation, FIRST_PAGE_OFFSET, PAGE_SIZE};

/// Discriminates the two B-tree page types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageKind {
    /// Block B-tree page
    Bbt = 0x80,
    /// Node B-tree page
    Nbt = 0x81,
}

/// Decoded page trailer
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageTrailer {
    pub page_type: u8,
    pub page_type_repeat: u8,
    pub signature: u16,
    pub crc: u32,
    pub bid: BlockId,
}

impl PageTrailer {
    fn read(format: Format, page: &[u8]) -> Self {
        let t = PAGE_SIZE - format.page_trailer_size();
        match format {
            Format::Ansi => Self {
                page_type: page[t],
                page_type_repeat: page[t + 1],
                signature: le_u16(page, t + 2),
                bid: BlockId::new(le_u32(page, t + 4) as u64),
                crc: le_u32(page, t + 8),
            },
            Format::Unicode => Self {
                page_type: page[t],
                page_type_repeat: page[t + 1],
                signature: le_u16(page, t + 2),
                crc: le_u32(page, t + 4),
                bid: BlockId::new(format.read_wide(page, t + 8)),
            },
        }
    }
}

/// A validated page, ready for entry decoding
pub(crate) struct Page {
    buf: [u8; PAGE_SIZE],
    format: Format,
    trailer: PageTrailer,
}

impl Page {
    pub fn page_type(&self) -> u8 {
        self.trailer.page_type
    }

    pub fn level(&self) -> u8 {
        self.buf[self.format.page_entry_area() + 3]
    }

    pub fn entry_count(&self) -> usize {
        self.buf[self.format.page_entry_area()] as usize
    }

    pub fn entry_size(&self) -> usize {
        self.buf[self.format.page_entry_area() + 2] as usize
    }

    /// Raw bytes of entry `index`
    pub fn entry(&self, index: usize) -> &[u8] {
        let size = self.entry_size();
        &self.buf[index * size..(index + 1) * size]
    }
}

/// Read one page and verify its trailer against the reference that led
/// here. Location checks and the signature run at `Weak`; the CRC over the
/// data area runs at `Full`. The type-repeat check is structural and runs
/// whenever the trailer is inspected at all.
pub(crate) fn read_page(
    file: &FileReader,
    format: Format,
    validation: Validation,
    eof: u64,
    pi: Bref,
) -> Result<Page> {
    if validation >= Validation::Weak {
        if pi.ib + PAGE_SIZE as u64 > eof {
            return Err(PstError::unexpected_page(format!(
                "page {} at {:#x} lies past the end of file",
                pi.bid, pi.ib
            )));
        }
        if pi.ib < FIRST_PAGE_OFFSET || (pi.ib - FIRST_PAGE_OFFSET) % PAGE_SIZE as u64 != 0 {
            return Err(PstError::unexpected_page(format!(
                "page {} at {:#x} is not sector aligned",
                pi.bid, pi.ib
            )));
        }
    }

    let mut buf = [0u8; PAGE_SIZE];
    file.read_exact_at(&mut buf, pi.ib)?;

    let trailer = PageTrailer::read(format, &buf);

    if validation >= Validation::Full {
        let computed = compute_crc(&buf[..format.page_data_size()]);
        if computed != trailer.crc {
            return Err(PstError::CrcFail {
                context: "page crc",
                computed,
                stored: trailer.crc,
            });
        }
    }

    if trailer.page_type != trailer.page_type_repeat {
        return Err(PstError::corrupt(format!(
            "page type {:#x} does not match its repeat {:#x}",
            trailer.page_type, trailer.page_type_repeat
        )));
    }

    if validation >= Validation::Weak {
        if trailer.bid != pi.bid {
            return Err(PstError::unexpected_page(format!(
                "page at {:#x} names id {}, expected {}",
                pi.ib, trailer.bid, pi.bid
            )));
        }
        let computed = compute_signature(pi.bid.raw(), pi.ib);
        if computed != trailer.signature {
            return Err(PstError::SigMismatch {
                context: "page signature",
                computed: computed as u32,
                stored: trailer.signature as u32,
            });
        }
    }

    let page = Page {
        buf,
        format,
        trailer,
    };

    let count = page.entry_count();
    let size = page.entry_size();
    if size == 0 || count * size > format.page_entry_area() {
        return Err(PstError::corrupt(format!(
            "page {} claims {count} entries of {size} bytes",
            pi.bid
        )));
    }

    Ok(page)
}
