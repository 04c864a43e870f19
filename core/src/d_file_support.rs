//! The file layer and the public API.
//!
//! [`FileLayerFS`] adds open files on top of the namespace: a fixed table
//! of descriptors, each holding the file's two region heads, its length and
//! an independent cursor. Underneath there is only the one shared region
//! cursor, so the layer tracks which descriptor last used it: I/O on a
//! different descriptor re-seats the cursor at that file's content region
//! and seeks to the descriptor's saved position, and every operation that
//! moves the cursor elsewhere (namespace changes, metadata rewrites, seeks)
//! invalidates the tracking so the next I/O re-seats.
//!
//! Unlinking a path does not invalidate descriptors that are already open
//! for it; the caller owns that hazard.

use chainfs_api::controller::Device;
use chainfs_api::error_given::APIError;
use chainfs_api::fs::{
    BlockSupport, DirectorySupport, FileSupport, FileSysSupport, RegionSupport,
};
use chainfs_api::types::{
    valid_name, Block, BlockHeader, Entry, EntryKind, FileMeta, SeekWhence, SuperBlock,
    DESCRIPTOR_TABLE_SIZE, FILE_LENGTH_SIZE, O_APPEND, O_CREATE, O_EXCL, O_TRUNC,
};
use std::path::Path;
use tracing::trace;

use super::c_dirs_support::DirLayerFS;
use super::error_fs::{DirLayerError, FileLayerError};

/// The file system type this module exports.
pub type FSName = FileLayerFS;

/// An open file: its regions, cached length, and cursor.
#[derive(Debug, Clone, Copy)]
struct Descriptor {
    content_region: u16,
    metadata_region: u16,
    length: u64,
    cursor: u64,
}

/// Full file system view of a mounted image.
#[derive(Debug)]
pub struct FileLayerFS {
    /// The encapsulated directory layer.
    inner: DirLayerFS,
    /// Fixed-size descriptor table; `open` hands out the lowest free slot.
    descriptors: Vec<Option<Descriptor>>,
    /// The descriptor the shared region cursor is currently positioned for.
    last_used: Option<usize>,
}

impl FileLayerFS {
    fn fresh_table() -> Vec<Option<Descriptor>> {
        vec![None; DESCRIPTOR_TABLE_SIZE]
    }

    fn descriptor(&self, fd: usize) -> Result<Descriptor, FileLayerError> {
        self.descriptors
            .get(fd)
            .copied()
            .flatten()
            .ok_or(FileLayerError::InvalidDescriptor(fd))
    }

    /// Position the shared cursor for `fd` unless it is already there.
    fn ensure_seated(&mut self, fd: usize, desc: &Descriptor) -> Result<(), FileLayerError> {
        if self.last_used == Some(fd) {
            return Ok(());
        }
        self.inner.r_seat(desc.content_region)?;
        if desc.cursor > 0 {
            self.inner.r_seek(desc.cursor as i64)?;
        }
        self.last_used = Some(fd);
        Ok(())
    }

    /// Read the length field of the file metadata record.
    fn read_length(&mut self, metadata_region: u16) -> Result<u64, FileLayerError> {
        self.inner.r_seat(metadata_region)?;
        let mut raw = vec![0; *FILE_LENGTH_SIZE as usize];
        if self.inner.r_read(&mut raw)? < *FILE_LENGTH_SIZE {
            return Err(DirLayerError::DirLayerOp(
                "Metadata region ends before the file length",
            )
            .into());
        }
        Ok(bincode::deserialize(&raw)
            .map_err(|e| DirLayerError::from(APIError::from(e)))?)
    }

    /// Rewrite the length field of the file metadata record. Moves the
    /// shared cursor off the content chain, so the last-used descriptor is
    /// invalidated here.
    fn write_length(&mut self, metadata_region: u16, length: u64) -> Result<(), FileLayerError> {
        self.last_used = None;
        self.inner.r_seat(metadata_region)?;
        let raw =
            bincode::serialize(&length).map_err(|e| DirLayerError::from(APIError::from(e)))?;
        if self.inner.r_write(&raw)? < raw.len() as u64 {
            return Err(DirLayerError::DirLayerOp("Failed to rewrite the file length").into());
        }
        Ok(())
    }
}

impl FileSysSupport for FileLayerFS {
    type Error = FileLayerError;

    fn sb_valid(sb: &SuperBlock) -> bool {
        DirLayerFS::sb_valid(sb)
    }

    fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, Self::Error> {
        Ok(FileLayerFS {
            inner: DirLayerFS::mkfs(path, sb)?,
            descriptors: Self::fresh_table(),
            last_used: None,
        })
    }

    fn mountfs(dev: Device) -> Result<Self, Self::Error> {
        Ok(FileLayerFS {
            inner: DirLayerFS::mountfs(dev)?,
            descriptors: Self::fresh_table(),
            last_used: None,
        })
    }

    fn unmountfs(self) -> Device {
        self.inner.unmountfs()
    }
}

impl BlockSupport for FileLayerFS {
    fn b_get(&self, i: u16) -> Result<Block, Self::Error> {
        Ok(self.inner.b_get(i)?)
    }

    fn b_put(&mut self, b: &Block) -> Result<(), Self::Error> {
        Ok(self.inner.b_put(b)?)
    }

    fn bh_get(&self, i: u16) -> Result<BlockHeader, Self::Error> {
        Ok(self.inner.bh_get(i)?)
    }

    fn bh_put(&mut self, i: u16, bh: &BlockHeader) -> Result<(), Self::Error> {
        Ok(self.inner.bh_put(i, bh)?)
    }

    fn b_alloc(&mut self, prev: u16) -> Result<u16, Self::Error> {
        Ok(self.inner.b_alloc(prev)?)
    }

    fn b_free(&mut self, i: u16) -> Result<(), Self::Error> {
        Ok(self.inner.b_free(i)?)
    }

    fn b_inuse_count(&self) -> u16 {
        self.inner.b_inuse_count()
    }

    fn sup_get(&self) -> Result<SuperBlock, Self::Error> {
        Ok(self.inner.sup_get()?)
    }
}

impl RegionSupport for FileLayerFS {
    fn r_alloc(&mut self) -> Result<u16, Self::Error> {
        Ok(self.inner.r_alloc()?)
    }

    fn r_free(&mut self, head: u16) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.r_free(head)?)
    }

    fn r_trunc(&mut self, head: u16) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.r_trunc(head)?)
    }

    fn r_seat(&mut self, head: u16) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.r_seat(head)?)
    }

    fn r_read(&mut self, buf: &mut [u8]) -> Result<u64, Self::Error> {
        self.last_used = None;
        Ok(self.inner.r_read(buf)?)
    }

    fn r_write(&mut self, buf: &[u8]) -> Result<u64, Self::Error> {
        self.last_used = None;
        Ok(self.inner.r_write(buf)?)
    }

    fn r_seek(&mut self, offset: i64) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.r_seek(offset)?)
    }

    fn r_tell(&self) -> Result<u64, Self::Error> {
        Ok(self.inner.r_tell()?)
    }
}

impl DirectorySupport for FileLayerFS {
    fn navigate(&mut self, path: &str) -> Result<(u16, String), Self::Error> {
        self.last_used = None;
        Ok(self.inner.navigate(path)?)
    }

    fn dir_lookup(
        &mut self,
        dir: u16,
        name: &str,
        kind: EntryKind,
    ) -> Result<Option<(Entry, u64)>, Self::Error> {
        self.last_used = None;
        Ok(self.inner.dir_lookup(dir, name, kind)?)
    }

    fn dir_insert(&mut self, dir: u16, entry: &Entry) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.dir_insert(dir, entry)?)
    }

    fn dir_create(
        &mut self,
        parent: u16,
        kind: EntryKind,
        meta: &[u8],
    ) -> Result<Entry, Self::Error> {
        self.last_used = None;
        Ok(self.inner.dir_create(parent, kind, meta)?)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.mkdir(path)?)
    }

    fn rmdir(&mut self, path: &str) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.rmdir(path)?)
    }

    fn unlink(&mut self, path: &str) -> Result<(), Self::Error> {
        self.last_used = None;
        Ok(self.inner.unlink(path)?)
    }
}

impl FileSupport for FileLayerFS {
    fn open(&mut self, path: &str, flags: u8) -> Result<usize, Self::Error> {
        self.last_used = None;
        // reserve the slot up front, so a full table cannot strand a
        // freshly created file
        let slot = match self.descriptors.iter().position(|d| d.is_none()) {
            Some(s) => s,
            None => return Err(FileLayerError::DescriptorTableFull),
        };

        let (parent, name) = self.inner.navigate(path)?;
        let desc = match self.inner.dir_lookup(parent, &name, EntryKind::File)? {
            Some((entry, _)) => {
                if flags & O_EXCL != 0 {
                    return Err(FileLayerError::AlreadyExists(path.to_string()));
                }
                let mut length = self.read_length(entry.metadata_region)?;
                if flags & O_TRUNC != 0 {
                    // keep the head block, so the directory entry's region
                    // reference stays valid
                    self.inner.r_trunc(entry.content_region)?;
                    if length > 0 {
                        self.write_length(entry.metadata_region, 0)?;
                        length = 0;
                    }
                }
                let cursor = if flags & O_APPEND != 0 { length } else { 0 };
                Descriptor {
                    content_region: entry.content_region,
                    metadata_region: entry.metadata_region,
                    length,
                    cursor,
                }
            }
            None => {
                if flags & O_CREATE == 0 {
                    return Err(FileLayerError::NotFound(path.to_string()));
                }
                if !valid_name(&name) {
                    return Err(DirLayerError::InvalidName("Invalid file name").into());
                }
                let meta = FileMeta { length: 0, name }
                    .encode()
                    .map_err(DirLayerError::from)?;
                let entry = self.inner.dir_create(parent, EntryKind::File, &meta)?;
                Descriptor {
                    content_region: entry.content_region,
                    metadata_region: entry.metadata_region,
                    length: 0,
                    cursor: 0,
                }
            }
        };
        self.descriptors[slot] = Some(desc);
        trace!("open {} -> fd {}", path, slot);
        Ok(slot)
    }

    fn close(&mut self, fd: usize) {
        if fd < self.descriptors.len() && self.descriptors[fd].is_some() {
            self.descriptors[fd] = None;
            if self.last_used == Some(fd) {
                self.last_used = None;
            }
            trace!("close fd {}", fd);
        }
    }

    fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<u64, Self::Error> {
        let mut desc = self.descriptor(fd)?;
        let want = (buf.len() as u64).min(desc.length - desc.cursor);
        if want == 0 {
            return Ok(0);
        }
        self.ensure_seated(fd, &desc)?;
        let got = self.inner.r_read(&mut buf[..want as usize])?;
        desc.cursor += got;
        self.descriptors[fd] = Some(desc);
        Ok(got)
    }

    fn write(&mut self, fd: usize, buf: &[u8]) -> Result<u64, Self::Error> {
        let mut desc = self.descriptor(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.ensure_seated(fd, &desc)?;
        let done = self.inner.r_write(buf)?;
        desc.cursor += done;
        let grew = desc.cursor > desc.length;
        if grew {
            desc.length = desc.cursor;
        }
        self.descriptors[fd] = Some(desc);
        if grew {
            self.write_length(desc.metadata_region, desc.length)?;
        }
        Ok(done)
    }

    fn seek(&mut self, fd: usize, offset: i64, whence: SeekWhence) -> Result<u64, Self::Error> {
        let mut desc = self.descriptor(fd)?;
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => desc.cursor as i64,
            SeekWhence::End => desc.length as i64,
        };
        let target = base.saturating_add(offset);
        desc.cursor = target.clamp(0, desc.length as i64) as u64;
        self.descriptors[fd] = Some(desc);
        // the saved region cursor no longer matches this descriptor
        if self.last_used == Some(fd) {
            self.last_used = None;
        }
        Ok(desc.cursor)
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/d_test.rs"]
mod tests;
