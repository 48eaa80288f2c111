//! Fixed file header.
//!
//! The header occupies the start of the file and fixes everything the
//! reader needs to bootstrap: the variant (via the version word), the
//! obfuscation method, the roots of the two global B-trees, the logical
//! end of file, and the next block id the writer would hand out.
//!
//! Shared prologue (both variants, little-endian):
//!
//! ```text
//! Offset  Size  Description
//! 0x000   4     Magic bytes 21 42 44 4E ("!BDN")
//! 0x004   4     Partial CRC, covering the 471 bytes from offset 8
//! 0x008   2     Client magic 0x4D53
//! 0x00A   2     Version word; < 23 selects Ansi, >= 23 Unicode
//! ```
//!
//! Ansi continues with a 32-bit next-block-id at 0x018, the root record at
//! 0x0A4 (32-bit fields, 8-byte B-tree references), and the obfuscation
//! byte at 0x1CD; total size 512. Unicode keeps the root record at 0x0B4
//! (64-bit fields, 16-byte references), the obfuscation byte at 0x201, a
//! 64-bit next-block-id at 0x204, and at 0x20C a full CRC covering the 516
//! bytes from offset 8; total size 564.

use crate::crypt::compute_crc;
use crate::error::{PstError, Result};
use crate::types::{le_u16, le_u32, BlockId, Bref, CryptMethod, Format, Validation, FORMAT_UNICODE_MIN};

pub(crate) const MAGIC: [u8; 4] = [0x21, 0x42, 0x44, 0x4E];
pub(crate) const MAGIC_CLIENT: u16 = 0x4D53;

pub(crate) const ANSI_HEADER_SIZE: usize = 512;
pub(crate) const UNICODE_HEADER_SIZE: usize = 564;

/// Byte range covered by the partial CRC in both variants
const CRC_PARTIAL_RANGE: (usize, usize) = (8, 8 + 471);
/// Byte range covered by the Unicode full CRC
const CRC_FULL_RANGE: (usize, usize) = (8, 8 + 516);

const ANSI_NEXT_BID: usize = 0x18;
const ANSI_ROOT: usize = 0xA4;
const ANSI_CRYPT: usize = 0x1CD;

const UNICODE_ROOT: usize = 0xB4;
const UNICODE_CRYPT: usize = 0x201;
const UNICODE_NEXT_BID: usize = 0x204;
const UNICODE_CRC_FULL: usize = 0x20C;

/// Size of the header for a variant
pub(crate) fn header_size(format: Format) -> usize {
    match format {
        Format::Ansi => ANSI_HEADER_SIZE,
        Format::Unicode => UNICODE_HEADER_SIZE,
    }
}

/// Decoded header fields the reader keeps around
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub version: u16,
    pub crypt_method: CryptMethod,
    pub file_eof: u64,
    pub nbt_root: Bref,
    pub bbt_root: Bref,
    pub next_bid: u64,
}

impl Header {
    /// Parse and validate a header for the given variant.
    ///
    /// The version check always runs and raises `InvalidFormat` on a
    /// variant mismatch; `open` depends on that error to retry the other
    /// variant. CRC verification is gated by the validation level.
    pub fn read(format: Format, bytes: &[u8], validation: Validation) -> Result<Self> {
        if bytes.len() < header_size(format) {
            return Err(PstError::corrupt("header truncated"));
        }

        if bytes[0..4] != MAGIC {
            return Err(PstError::corrupt("bad magic bytes"));
        }
        if le_u16(bytes, 8) != MAGIC_CLIENT {
            return Err(PstError::corrupt("bad client magic"));
        }

        let version = le_u16(bytes, 0x0A);
        match format {
            Format::Ansi if version >= FORMAT_UNICODE_MIN => {
                return Err(PstError::InvalidFormat {
                    version,
                    expected: format,
                });
            }
            Format::Unicode if version < FORMAT_UNICODE_MIN => {
                return Err(PstError::InvalidFormat {
                    version,
                    expected: format,
                });
            }
            _ => {}
        }

        if validation >= Validation::Weak {
            let stored = le_u32(bytes, 4);
            let computed = compute_crc(&bytes[CRC_PARTIAL_RANGE.0..CRC_PARTIAL_RANGE.1]);
            if computed != stored {
                return Err(PstError::CrcFail {
                    context: "header partial crc",
                    computed,
                    stored,
                });
            }

            if format == Format::Unicode {
                let stored = le_u32(bytes, UNICODE_CRC_FULL);
                let computed = compute_crc(&bytes[CRC_FULL_RANGE.0..CRC_FULL_RANGE.1]);
                if computed != stored {
                    return Err(PstError::CrcFail {
                        context: "header full crc",
                        computed,
                        stored,
                    });
                }
            }
        }

        let (root, crypt_byte, next_bid) = match format {
            Format::Ansi => (
                ANSI_ROOT,
                bytes[ANSI_CRYPT],
                le_u32(bytes, ANSI_NEXT_BID) as u64,
            ),
            Format::Unicode => (
                UNICODE_ROOT,
                bytes[UNICODE_CRYPT],
                format.read_wide(bytes, UNICODE_NEXT_BID),
            ),
        };

        let crypt_method = CryptMethod::from_byte(crypt_byte)
            .ok_or_else(|| PstError::corrupt(format!("unknown crypt method {crypt_byte}")))?;

        // Root record: dwReserved, ibFileEof, ibAMapLast, cbAMapFree,
        // cbPMapFree, then the two B-tree references.
        let wide = format.bid_size();
        let file_eof = format.read_wide(bytes, root + 4);
        let bref_base = root + 4 + 4 * wide;
        let nbt_root = Bref {
            bid: BlockId::new(format.read_wide(bytes, bref_base)),
            ib: format.read_wide(bytes, bref_base + wide),
        };
        let bbt_root = Bref {
            bid: BlockId::new(format.read_wide(bytes, bref_base + 2 * wide)),
            ib: format.read_wide(bytes, bref_base + 3 * wide),
        };

        Ok(Self {
            version,
            crypt_method,
            file_eof,
            nbt_root,
            bbt_root,
            next_bid,
        })
    }
}
