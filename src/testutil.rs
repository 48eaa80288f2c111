//! Synthetic store files for tests.
//!
//! The fixture builder is the write side the library itself does not
//! ship: it lays out blocks, builds the two B-trees over them, and stamps
//! a header with valid CRCs, so every test exercises the reader against a
//! complete file rather than hand-fed buffers.

use crate::block::align_disk;
use crate::btree::{BlockEntry, NodeEntry};
use crate::crypt::{compute_crc, compute_signature, cyclic, permute};
use crate::page::PageKind;
use crate::storage::header_size;
use crate::types::{
    BlockId, Bref, CryptMethod, Format, NodeId, BLOCK_ALIGN, FIRST_PAGE_OFFSET, HEAP_SIGNATURE,
    PAGE_SIZE,
};
use std::path::Path;

pub(crate) struct Fixture {
    format: Format,
    crypt: CryptMethod,
    buf: Vec<u8>,
    nbt: Vec<NodeEntry>,
    bbt: Vec<BlockEntry>,
    next_page_bid: u64,
    leaf_capacity: Option<usize>,
    finalized: bool,
}

impl Fixture {
    pub fn new(format: Format, crypt: CryptMethod) -> Self {
        Self {
            format,
            crypt,
            buf: vec![0u8; FIRST_PAGE_OFFSET as usize],
            nbt: Vec::new(),
            bbt: Vec::new(),
            next_page_bid: 0x1000,
            leaf_capacity: None,
            finalized: false,
        }
    }

    /// Cap leaf pages at `n` entries to force branch pages with few keys
    pub fn set_leaf_capacity(&mut self, n: usize) {
        self.leaf_capacity = Some(n);
    }

    /// Register a node in the node B-tree
    pub fn add_node(&mut self, nid: u32, data: u64, sub: u64, parent: u32) {
        self.nbt.push(NodeEntry {
            id: NodeId::new(nid),
            data: BlockId::new(data),
            sub: BlockId::new(sub),
            parent: NodeId::new(parent),
        });
    }

    /// Write an external block, obfuscating the payload per the fixture's
    /// crypt method
    pub fn add_external(&mut self, bid: u64, data: &[u8]) {
        let mut stored = data.to_vec();
        match self.crypt {
            CryptMethod::None => {}
            CryptMethod::Permute => permute(&mut stored, true),
            CryptMethod::Cyclic => cyclic(&mut stored, bid as u32),
        }
        self.add_block(bid, &stored);
    }

    /// Write an extended block over the given child block ids
    pub fn add_extended(&mut self, bid: u64, level: u8, total: u32, children: &[u64]) {
        let mut payload = Vec::with_capacity(8 + children.len() * self.format.bid_size());
        payload.push(0x01);
        payload.push(level);
        payload.extend_from_slice(&(children.len() as u16).to_le_bytes());
        payload.extend_from_slice(&total.to_le_bytes());
        for &child in children {
            self.push_wide(&mut payload, child);
        }
        self.add_block(bid, &payload);
    }

    /// Write a sub-node leaf block; entries are `(nid, data bid, sub bid)`
    /// and must be sorted by nid
    pub fn add_subnode_leaf(&mut self, bid: u64, entries: &[(u32, u64, u64)]) {
        let mut payload = self.subnode_block_header(0, entries.len());
        for &(nid, data, sub) in entries {
            self.push_wide(&mut payload, nid as u64);
            self.push_wide(&mut payload, data);
            self.push_wide(&mut payload, sub);
        }
        self.add_block(bid, &payload);
    }

    /// Write a sub-node branch block; entries are `(nid key, child bid)`
    /// and must be sorted by key
    pub fn add_subnode_branch(&mut self, bid: u64, entries: &[(u32, u64)]) {
        let mut payload = self.subnode_block_header(1, entries.len());
        for &(key, block) in entries {
            self.push_wide(&mut payload, key as u64);
            self.push_wide(&mut payload, block);
        }
        self.add_block(bid, &payload);
    }

    fn subnode_block_header(&self, level: u8, count: usize) -> Vec<u8> {
        let mut payload = vec![0x02, level];
        payload.extend_from_slice(&(count as u16).to_le_bytes());
        if self.format == Format::Unicode {
            payload.extend_from_slice(&[0u8; 4]);
        }
        payload
    }

    /// Write a block extent with a valid trailer and register it in the
    /// block B-tree
    fn add_block(&mut self, bid: u64, stored: &[u8]) {
        let address = self.align_buf(BLOCK_ALIGN);
        let aligned = align_disk(self.format, stored.len() as u16);
        let mut extent = vec![0u8; aligned];
        extent[..stored.len()].copy_from_slice(stored);

        let t = aligned - self.format.block_trailer_size();
        extent[t..t + 2].copy_from_slice(&(stored.len() as u16).to_le_bytes());
        let sig = compute_signature(bid, address);
        extent[t + 2..t + 4].copy_from_slice(&sig.to_le_bytes());
        let crc = compute_crc(stored);
        match self.format {
            Format::Ansi => {
                extent[t + 4..t + 8].copy_from_slice(&(bid as u32).to_le_bytes());
                extent[t + 8..t + 12].copy_from_slice(&crc.to_le_bytes());
            }
            Format::Unicode => {
                extent[t + 4..t + 8].copy_from_slice(&crc.to_le_bytes());
                extent[t + 8..t + 16].copy_from_slice(&bid.to_le_bytes());
            }
        }

        self.buf.extend_from_slice(&extent);
        self.bbt.push(BlockEntry {
            id: BlockId::new(bid),
            address,
            size: stored.len() as u16,
            ref_count: 1,
        });
    }

    /// Write one B-tree page and return its reference
    pub fn write_page(
        &mut self,
        kind: PageKind,
        bid: u64,
        level: u8,
        entries: Vec<Vec<u8>>,
        entry_size: usize,
    ) -> Bref {
        let address = self.align_buf(PAGE_SIZE);
        let mut page = [0u8; PAGE_SIZE];

        let mut at = 0;
        for entry in &entries {
            assert_eq!(entry.len(), entry_size);
            page[at..at + entry_size].copy_from_slice(entry);
            at += entry_size;
        }

        let meta = self.format.page_entry_area();
        page[meta] = entries.len() as u8;
        page[meta + 1] = (meta / entry_size) as u8;
        page[meta + 2] = entry_size as u8;
        page[meta + 3] = level;

        let t = self.format.page_data_size();
        page[t] = kind as u8;
        page[t + 1] = kind as u8;
        let sig = compute_signature(bid, address);
        page[t + 2..t + 4].copy_from_slice(&sig.to_le_bytes());
        let crc = compute_crc(&page[..t]);
        match self.format {
            Format::Ansi => {
                page[t + 4..t + 8].copy_from_slice(&(bid as u32).to_le_bytes());
                page[t + 8..t + 12].copy_from_slice(&crc.to_le_bytes());
            }
            Format::Unicode => {
                page[t + 4..t + 8].copy_from_slice(&crc.to_le_bytes());
                page[t + 8..t + 16].copy_from_slice(&bid.to_le_bytes());
            }
        }

        self.buf.extend_from_slice(&page);
        Bref {
            bid: BlockId::new(bid),
            ib: address,
        }
    }

    fn fresh_page_bid(&mut self) -> u64 {
        let bid = self.next_page_bid;
        self.next_page_bid += 4;
        bid
    }

    /// Write the leaf pages (and one branch level if they overflow) of a
    /// tree and return its root reference
    fn build_tree(
        &mut self,
        kind: PageKind,
        entries: Vec<Vec<u8>>,
        keys: Vec<u64>,
        entry_size: usize,
    ) -> Bref {
        let capacity = self
            .leaf_capacity
            .unwrap_or(self.format.page_entry_area() / entry_size);

        if entries.len() <= capacity {
            let bid = self.fresh_page_bid();
            return self.write_page(kind, bid, 0, entries, entry_size);
        }

        let mut children = Vec::new();
        let chunks: Vec<Vec<Vec<u8>>> = entries.chunks(capacity).map(|c| c.to_vec()).collect();
        for (chunk, key_chunk) in chunks.into_iter().zip(keys.chunks(capacity)) {
            let bid = self.fresh_page_bid();
            let bref = self.write_page(kind, bid, 0, chunk, entry_size);
            children.push((key_chunk[0], bref));
        }

        let branch_size = self.format.branch_entry_size();
        assert!(children.len() <= self.format.page_entry_area() / branch_size);
        let encoded: Vec<Vec<u8>> = children
            .iter()
            .map(|&(key, bref)| {
                let mut entry = Vec::with_capacity(branch_size);
                self.push_wide(&mut entry, key);
                self.push_wide(&mut entry, bref.bid.raw());
                self.push_wide(&mut entry, bref.ib);
                entry
            })
            .collect();
        let bid = self.fresh_page_bid();
        self.write_page(kind, bid, 1, encoded, branch_size)
    }

    fn encode_nbt_entries(&self) -> (Vec<Vec<u8>>, Vec<u64>) {
        let wide = self.format.bid_size();
        let mut entries = Vec::with_capacity(self.nbt.len());
        let mut keys = Vec::with_capacity(self.nbt.len());
        for node in &self.nbt {
            let mut bytes = vec![0u8; self.format.nbt_leaf_entry_size()];
            bytes[..4].copy_from_slice(&node.id.raw().to_le_bytes());
            write_wide(self.format, &mut bytes, wide, node.data.raw());
            write_wide(self.format, &mut bytes, 2 * wide, node.sub.raw());
            bytes[3 * wide..3 * wide + 4].copy_from_slice(&node.parent.raw().to_le_bytes());
            entries.push(bytes);
            keys.push(node.id.raw() as u64);
        }
        (entries, keys)
    }

    fn encode_bbt_entries(&self) -> (Vec<Vec<u8>>, Vec<u64>) {
        let wide = self.format.bid_size();
        let mut entries = Vec::with_capacity(self.bbt.len());
        let mut keys = Vec::with_capacity(self.bbt.len());
        for block in &self.bbt {
            let mut bytes = vec![0u8; self.format.bbt_leaf_entry_size()];
            write_wide(self.format, &mut bytes, 0, block.id.raw());
            write_wide(self.format, &mut bytes, wide, block.address);
            bytes[2 * wide..2 * wide + 2].copy_from_slice(&block.size.to_le_bytes());
            bytes[2 * wide + 2..2 * wide + 4].copy_from_slice(&block.ref_count.to_le_bytes());
            entries.push(bytes);
            keys.push(block.id.raw());
        }
        (entries, keys)
    }

    /// Build both trees and stamp the header. Idempotent; runs once.
    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        self.nbt.sort_by_key(|e| e.id);
        self.bbt.sort_by_key(|e| e.id);

        let (entries, keys) = self.encode_nbt_entries();
        let nbt_root = self.build_tree(PageKind::Nbt, entries, keys, self.format.nbt_leaf_entry_size());
        let (entries, keys) = self.encode_bbt_entries();
        let bbt_root = self.build_tree(PageKind::Bbt, entries, keys, self.format.bbt_leaf_entry_size());

        let eof = self.buf.len() as u64;
        let header = encode_header(self.format, self.crypt, nbt_root, bbt_root, eof, 0x400);
        self.buf[..header.len()].copy_from_slice(&header);
    }

    /// Final length of the file image
    pub fn eof(&mut self) -> u64 {
        self.finalize();
        self.buf.len() as u64
    }

    /// The complete file image
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.finalize();
        self.buf
    }

    /// Write the file image to disk
    pub fn write_to(self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.into_bytes())
    }

    fn align_buf(&mut self, align: usize) -> u64 {
        let rem = self.buf.len() % align;
        if rem != 0 {
            self.buf.resize(self.buf.len() + align - rem, 0);
        }
        self.buf.len() as u64
    }

    fn push_wide(&self, out: &mut Vec<u8>, value: u64) {
        match self.format {
            Format::Ansi => out.extend_from_slice(&(value as u32).to_le_bytes()),
            Format::Unicode => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
}

fn write_wide(format: Format, buf: &mut [u8], offset: usize, value: u64) {
    match format {
        Format::Ansi => buf[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes()),
        Format::Unicode => buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes()),
    }
}

/// Encode a header with valid CRCs for either variant
pub(crate) fn encode_header(
    format: Format,
    crypt: CryptMethod,
    nbt_root: Bref,
    bbt_root: Bref,
    eof: u64,
    next_bid: u64,
) -> Vec<u8> {
    let mut bytes = vec![0u8; header_size(format)];

    bytes[0..4].copy_from_slice(&[0x21, 0x42, 0x44, 0x4E]);
    bytes[8..10].copy_from_slice(&0x4D53u16.to_le_bytes());
    let version: u16 = match format {
        Format::Ansi => 15,
        Format::Unicode => 23,
    };
    bytes[0x0A..0x0C].copy_from_slice(&version.to_le_bytes());
    bytes[0x0C..0x0E].copy_from_slice(&19u16.to_le_bytes());
    bytes[0x0E] = 0x01;
    bytes[0x0F] = 0x01;

    let wide = format.bid_size();
    let (root, crypt_at, sentinel_at) = match format {
        Format::Ansi => (0xA4, 0x1CD, 0x1CC),
        Format::Unicode => (0xB4, 0x201, 0x200),
    };

    write_wide(format, &mut bytes, root + 4, eof);
    let bref = root + 4 + 4 * wide;
    write_wide(format, &mut bytes, bref, nbt_root.bid.raw());
    write_wide(format, &mut bytes, bref + wide, nbt_root.ib);
    write_wide(format, &mut bytes, bref + 2 * wide, bbt_root.bid.raw());
    write_wide(format, &mut bytes, bref + 3 * wide, bbt_root.ib);

    bytes[sentinel_at] = 0x80;
    bytes[crypt_at] = crypt.to_byte();
    match format {
        Format::Ansi => {
            bytes[0x18..0x1C].copy_from_slice(&(next_bid as u32).to_le_bytes())
        }
        Format::Unicode => bytes[0x204..0x20C].copy_from_slice(&next_bid.to_le_bytes()),
    }

    let partial = compute_crc(&bytes[8..8 + 471]);
    bytes[4..8].copy_from_slice(&partial.to_le_bytes());
    if format == Format::Unicode {
        let full = compute_crc(&bytes[8..8 + 516]);
        bytes[0x20C..0x210].copy_from_slice(&full.to_le_bytes());
    }

    bytes
}

/// Build a heap page image: optional first-page header, allocations,
/// `pad` filler bytes, then the allocation map
pub(crate) fn heap_page_with(
    first: Option<(u8, u32)>,
    allocs: &[&[u8]],
    pad: usize,
) -> Vec<u8> {
    let mut page = Vec::new();
    match first {
        Some((client_sig, root)) => {
            page.extend_from_slice(&[0, 0]);
            page.push(HEAP_SIGNATURE);
            page.push(client_sig);
            page.extend_from_slice(&root.to_le_bytes());
            page.extend_from_slice(&[0u8; 4]);
        }
        None => page.extend_from_slice(&[0, 0]),
    }

    let mut offsets = Vec::with_capacity(allocs.len() + 1);
    offsets.push(page.len() as u16);
    for alloc in allocs {
        page.extend_from_slice(alloc);
        offsets.push(page.len() as u16);
    }
    page.resize(page.len() + pad, 0);

    let map = page.len() as u16;
    page[0..2].copy_from_slice(&map.to_le_bytes());
    page.extend_from_slice(&(allocs.len() as u16).to_le_bytes());
    page.extend_from_slice(&0u16.to_le_bytes());
    for offset in offsets {
        page.extend_from_slice(&offset.to_le_bytes());
    }
    page
}

/// First heap page: header with client signature and root, then allocations
pub(crate) fn heap_page_first(client_sig: u8, root: u32, allocs: &[&[u8]]) -> Vec<u8> {
    heap_page_with(Some((client_sig, root)), allocs, 0)
}

/// Follow-on heap page: just the map offset, then allocations
pub(crate) fn heap_page(allocs: &[&[u8]]) -> Vec<u8> {
    heap_page_with(None, allocs, 0)
}

/// Encode a B-tree-on-heap header allocation
pub(crate) fn bth_header(key_size: u8, value_size: u8, levels: u8, root: u32) -> Vec<u8> {
    let mut bytes = vec![crate::types::BTH_SIGNATURE, key_size, value_size, levels];
    bytes.extend_from_slice(&root.to_le_bytes());
    bytes
}

/// Encode a property-context leaf record array; records are
/// `(prop id, prop type, value-or-reference)` sorted by prop id
pub(crate) fn pc_records(records: &[(u16, u16, u32)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(records.len() * 8);
    for &(id, prop_type, value) in records {
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(&prop_type.to_le_bytes());
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
