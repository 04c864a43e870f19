//! Types shared between the backing-file driver, the layered implementation
//! and the tests.
//!
//! The on-disk format is fixed and little-endian throughout: a 4-byte
//! [`SuperBlock`] at offset 0, followed by `nblocks` frames of
//! `block_size + 5` bytes, each frame a 5-byte [`BlockHeader`] and
//! `block_size` payload bytes. Directory regions hold a sequence of 5-byte
//! [`Entry`] records terminated by the first NULL entry; metadata regions
//! hold a [`FileMeta`] or [`DirMeta`] record. All records are encoded with
//! `bincode`, whose fixed-width little-endian integer encoding matches the
//! format byte for byte; the record sizes are computed once at runtime into
//! the `*_SIZE` statics below.

use super::error_given;
use super::error_given::APIError;
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};

/// Sentinel block index meaning "no such block". Doubles as the upper bound
/// on addressable blocks, so a device holds at most 65535 of them.
pub const INVALID_BLOCK: u16 = 0xFFFF;

/// Index of the block that starts the root directory's content region.
/// It is claimed when the file system is created and stays in use for the
/// lifetime of the backing file.
pub const ROOT_REGION: u16 = 0;

/// Number of slots in the open-file descriptor table.
pub const DESCRIPTOR_TABLE_SIZE: usize = 256;

/// Maximum length of a single file or directory name, in bytes.
/// Names are stored behind a one-byte length prefix.
pub const MAX_NAME_LEN: usize = 255;

/// Open flag: create the file if the path does not resolve.
pub const O_CREATE: u8 = 0b0001;
/// Open flag: fail if the path already resolves to a file.
pub const O_EXCL: u8 = 0b0010;
/// Open flag: release the file's contents after opening it.
pub const O_TRUNC: u8 = 0b0100;
/// Open flag: start the descriptor's cursor at the end of the file.
pub const O_APPEND: u8 = 0b1000;

/// Origin for [`FileSupport::seek`](../fs/trait.FileSupport.html#tymethod.seek).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// Offset is relative to the start of the file.
    Set,
    /// Offset is relative to the descriptor's current cursor.
    Cur,
    /// Offset is relative to the file's length.
    End,
}

/// Returns true iff `name` can be stored as a directory or file name:
/// non-empty, at most [`MAX_NAME_LEN`] bytes, and free of the path
/// separator and NUL.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && !name.contains('/') && !name.contains('\0')
}

/// Buffer abstraction, representing some bytes on the heap.
/// Backs the [`Block`] type and supports offset-addressed reads and writes
/// as well as (de)serialization of records at a given offset.
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    /// Contents of the buffer. A boxed slice, as buffers never change size
    /// while in use.
    contents: Box<[u8]>,
}

impl Buffer {
    /// Create a new buffer around the given `data`.
    pub fn new(data: Box<[u8]>) -> Buffer {
        Buffer { contents: data }
    }

    /// Create an all-zero buffer of length `len`.
    pub fn new_zero(len: u64) -> Buffer {
        Buffer {
            contents: vec![0; len as usize].into_boxed_slice(),
        }
    }

    /// Size of the buffer contents in bytes.
    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    /// Returns true iff the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Return a reference to the buffer contents.
    pub fn contents_as_ref(&self) -> &[u8] {
        &self.contents
    }

    /// Fill `data` with the bytes starting at `offset`.
    /// Errors if the requested range falls outside the buffer.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error_given::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::BlockInput(
                "Trying to read beyond the bounds of the buffer",
            ));
        }

        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        c.read_exact(data).map_err(|e| e.into())
    }

    /// Overwrite the bytes starting at `offset` with `data`.
    /// Errors if the written range falls outside the buffer.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error_given::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::BlockInput(
                "Trying to write beyond the bounds of the buffer",
            ));
        }

        let mut c = Cursor::new(&mut self.contents[..]);
        c.seek(SeekFrom::Start(offset))?;
        c.write_all(data).map_err(|e| e.into())
    }

    /// Decode a record of type `S` from the bytes starting at `offset`.
    pub fn deserialize_from<S>(&self, offset: u64) -> error_given::Result<S>
    where
        S: DeserializeOwned,
    {
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        Ok(bincode::deserialize_from(c)?)
    }

    /// Encode the record `stru` into the buffer at `offset`.
    /// Goes through `write_data` so an oversized record is rejected instead
    /// of growing the buffer.
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> error_given::Result<()>
    where
        S: Serialize,
    {
        let stru_bin = bincode::serialize(stru)?;
        self.write_data(&stru_bin, offset)
    }
}

/// One frame of the backing file: a block header followed by the payload.
/// The unit the [`Device`](../controller/struct.Device.html) reads and
/// writes; the block engine edits frames in place and writes them back.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    /// Index of this block within the backing file's block array.
    pub block_no: u16,
    /// Frame contents (header and payload). All accessors delegate here.
    buf: Buffer,
}

impl Block {
    /// Create a block for index `block_no` around the given frame bytes.
    pub fn new(block_no: u16, data: Box<[u8]>) -> Block {
        Block {
            block_no,
            buf: Buffer::new(data),
        }
    }

    /// Create an all-zero block of frame length `len` for index `block_no`.
    pub fn new_zero(block_no: u16, len: u64) -> Block {
        Block {
            block_no,
            buf: Buffer::new_zero(len),
        }
    }

    /// Size of the frame in bytes (header plus payload).
    pub fn len(&self) -> u64 {
        self.buf.len()
    }

    /// Returns true iff the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Return a reference to the frame bytes.
    pub fn contents_as_ref(&self) -> &[u8] {
        self.buf.contents_as_ref()
    }

    /// Fill `data` with the frame bytes starting at `offset`.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error_given::Result<()> {
        self.buf.read_data(data, offset)
    }

    /// Overwrite the frame bytes starting at `offset` with `data`.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error_given::Result<()> {
        self.buf.write_data(data, offset)
    }

    /// Decode a record of type `S` from the frame bytes starting at `offset`.
    pub fn deserialize_from<S>(&self, offset: u64) -> error_given::Result<S>
    where
        S: DeserializeOwned,
    {
        self.buf.deserialize_from(offset)
    }

    /// Encode the record `stru` into the frame at `offset`.
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> error_given::Result<()>
    where
        S: Serialize,
    {
        self.buf.serialize_into(stru, offset)
    }
}

/// The file system metadata stored in the 4-byte disk header at offset 0.
/// Also the configuration value handed to `mkfs`; `Default` carries the
/// stock geometry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Payload bytes per block. Each block occupies `block_size + 5` bytes
    /// on disk, the 5 being its header.
    pub block_size: u16,
    /// Total number of blocks in the backing file.
    pub nblocks: u16,
}

impl Default for SuperBlock {
    fn default() -> SuperBlock {
        SuperBlock {
            block_size: 10,
            nblocks: 128,
        }
    }
}

lazy_static! {
    /// Size of the serialized [`SuperBlock`] in bytes; the payload of block 0
    /// starts at this offset plus the header size.
    pub static ref SUPERBLOCK_SIZE: u64 =
        bincode::serialize(&SuperBlock::default()).unwrap().len() as u64;
}

/// The 5-byte header in front of every block's payload. Free blocks carry
/// `(0, INVALID, INVALID)`; in-use blocks chain into a doubly-linked list
/// whose head has `prev = INVALID` and whose tail has `next = INVALID`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// 1 when the block belongs to a region chain, 0 when it is free.
    pub in_use: u8,
    /// Index of the previous block in the chain, or [`INVALID_BLOCK`].
    pub prev: u16,
    /// Index of the next block in the chain, or [`INVALID_BLOCK`].
    pub next: u16,
}

impl BlockHeader {
    /// Header of a free block.
    pub fn free() -> BlockHeader {
        BlockHeader {
            in_use: 0,
            prev: INVALID_BLOCK,
            next: INVALID_BLOCK,
        }
    }

    /// Header of a freshly allocated chain tail following `prev`.
    /// Pass [`INVALID_BLOCK`] to start a new region.
    pub fn linked(prev: u16) -> BlockHeader {
        BlockHeader {
            in_use: 1,
            prev,
            next: INVALID_BLOCK,
        }
    }

    /// Returns true iff the block belongs to a region chain.
    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }
}

lazy_static! {
    /// Size of the serialized [`BlockHeader`] in bytes; block payloads start
    /// at this offset within their frame.
    pub static ref BLOCK_HEADER_SIZE: u64 =
        bincode::serialize(&BlockHeader::default()).unwrap().len() as u64;
}

/// Discriminants of the `kind` byte of a directory [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// End marker: no entry has ever occupied this slot, nor any later one.
    Null,
    /// Tombstone: a previously occupied slot, reusable for insertion.
    Unused,
    /// The entry names a file.
    File,
    /// The entry names a directory.
    Dir,
}

impl EntryKind {
    /// The on-disk `kind` byte for this entry kind.
    pub fn as_u8(self) -> u8 {
        match self {
            EntryKind::Null => 0,
            EntryKind::Unused => 1,
            EntryKind::File => 2,
            EntryKind::Dir => 3,
        }
    }
}

/// A 5-byte directory entry, laid end-to-end inside a directory's content
/// region. The entry list terminates at the first [`EntryKind::Null`] entry.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Entry kind byte; see [`EntryKind`].
    pub kind: u8,
    /// Head block of the child's metadata region.
    pub metadata_region: u16,
    /// Head block of the child's content region.
    pub content_region: u16,
}

impl Entry {
    /// Create an entry of the given kind referencing the two region heads.
    pub fn new(kind: EntryKind, metadata_region: u16, content_region: u16) -> Entry {
        Entry {
            kind: kind.as_u8(),
            metadata_region,
            content_region,
        }
    }

    /// Interpret the kind byte. Bytes outside the known discriminants read
    /// as [`EntryKind::Null`], which terminates any entry scan.
    pub fn kind(&self) -> EntryKind {
        match self.kind {
            1 => EntryKind::Unused,
            2 => EntryKind::File,
            3 => EntryKind::Dir,
            _ => EntryKind::Null,
        }
    }
}

lazy_static! {
    /// Size of a serialized directory [`Entry`] in bytes.
    pub static ref ENTRY_SIZE: u64 =
        bincode::serialize(&Entry::default()).unwrap().len() as u64;
    /// Size of the serialized length field of a [`FileMeta`] record; the
    /// name length prefix follows at this offset in the metadata region.
    pub static ref FILE_LENGTH_SIZE: u64 = bincode::serialize(&0u64).unwrap().len() as u64;
}

/// The record at the start of a file's metadata region: the file length as
/// a `u64`, then the name behind a one-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Current length of the file contents in bytes.
    pub length: u64,
    /// Name of the file within its parent directory.
    pub name: String,
}

impl FileMeta {
    /// Encode the record into the bytes written at offset 0 of the
    /// metadata region. Errors if the name does not fit the length prefix.
    pub fn encode(&self) -> error_given::Result<Vec<u8>> {
        if !valid_name(&self.name) {
            return Err(APIError::BlockInput("Invalid name in file metadata"));
        }
        let mut out = bincode::serialize(&self.length)?;
        out.push(self.name.len() as u8);
        out.extend_from_slice(self.name.as_bytes());
        Ok(out)
    }
}

/// The record at the start of a directory's metadata region: the name
/// behind a one-byte length prefix. Written once at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirMeta {
    /// Name of the directory within its parent.
    pub name: String,
}

impl DirMeta {
    /// Encode the record into the bytes written at offset 0 of the
    /// metadata region. Errors if the name does not fit the length prefix.
    pub fn encode(&self) -> error_given::Result<Vec<u8>> {
        if !valid_name(&self.name) {
            return Err(APIError::BlockInput("Invalid name in directory metadata"));
        }
        let mut out = vec![self.name.len() as u8];
        out.extend_from_slice(self.name.as_bytes());
        Ok(out)
    }
}
