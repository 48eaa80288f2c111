//! Byte-level obfuscation codecs, checksums, and trailer signatures.
//!
//! External block payloads may be stored obfuscated; the header selects one
//! of two reversible transforms. `permute` pushes every byte through a
//! fixed substitution table. `cyclic` is keyed by the block id and folds
//! each byte through the tables between rotating key bytes; applying it a
//! second time with the same key restores the original bytes.
//!
//! Both codecs operate in place on exactly the payload bytes, never on the
//! trailer, and checksums are computed over the payload as stored, before
//! any de-obfuscation.

use crate::types::BlockId;

/// Seed for the table schedule; the decode table is the inverse of the
/// encode permutation and the mix table pairs bytes off the same
/// permutation, so the three stay mutually consistent.
const TABLE_KEY: [u8; 24] = *b"personal store obfuscate";

const fn substitution_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    let mut j = 0usize;
    let mut i = 0usize;
    while i < 256 {
        j = (j + table[i] as usize + TABLE_KEY[i % TABLE_KEY.len()] as usize) & 0xFF;
        let tmp = table[i];
        table[i] = table[j];
        table[j] = tmp;
        i += 1;
    }
    table
}

const fn invert(table: &[u8; 256]) -> [u8; 256] {
    let mut inverse = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inverse[table[i] as usize] = i as u8;
        i += 1;
    }
    inverse
}

/// Fixed-point-free involution: bytes adjacent in the encode permutation
/// map to each other.
const fn pair_off(perm: &[u8; 256]) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 128 {
        let a = perm[2 * i] as usize;
        let b = perm[2 * i + 1] as usize;
        table[a] = b as u8;
        table[b] = a as u8;
        i += 1;
    }
    table
}

const ENCODE_TABLE: [u8; 256] = substitution_table();
const DECODE_TABLE: [u8; 256] = invert(&ENCODE_TABLE);
const MIX_TABLE: [u8; 256] = pair_off(&ENCODE_TABLE);

/// Apply the substitution codec in place.
///
/// `encode` selects the direction: `true` maps plain bytes to stored
/// bytes, `false` reverses it.
pub fn permute(data: &mut [u8], encode: bool) {
    let table = if encode { &ENCODE_TABLE } else { &DECODE_TABLE };
    for b in data.iter_mut() {
        *b = table[*b as usize];
    }
}

/// Apply the keyed codec in place.
///
/// The transform is an involution: encoding and decoding are the same
/// operation. The key is the low 32 bits of the owning block's id.
pub fn cyclic(data: &mut [u8], key: u32) {
    let mut w = (key ^ (key >> 16)) as u16;
    for b in data.iter_mut() {
        let lo = w as u8;
        let hi = (w >> 8) as u8;
        let mut x = *b;
        x = x.wrapping_add(lo);
        x = ENCODE_TABLE[x as usize];
        x = x.wrapping_add(hi);
        x = MIX_TABLE[x as usize];
        x = x.wrapping_sub(hi);
        x = DECODE_TABLE[x as usize];
        x = x.wrapping_sub(lo);
        *b = x;
        w = w.wrapping_add(1);
    }
}

/// The cyclic codec key for a block
pub fn cyclic_key(bid: BlockId) -> u32 {
    bid.raw() as u32
}

/// Container CRC: the reflected CRC-32 polynomial with a zero initial
/// register and no final complement, as the format stores it.
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(u32::MAX);
    hasher.update(data);
    !hasher.finalize()
}

/// Trailer signature: a 16-bit fold of the block id and its file offset.
/// Used as a cheap tamper check on page and block trailers.
pub fn compute_signature(bid: u64, address: u64) -> u16 {
    let folded = (bid ^ address) as u32;
    ((folded >> 16) as u16) ^ (folded as u16)
}
