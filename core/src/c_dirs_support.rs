//! The directory layer.
//!
//! [`DirLayerFS`] encodes the namespace inside regions: a directory's
//! content region holds 5-byte entries laid end to end and terminated by
//! the first NULL entry, and every entry points at the child's metadata and
//! content regions. Removal never shifts entries; a removed slot becomes an
//! UNUSED tombstone that later insertions reuse in place.
//!
//! Paths resolve from the root region downward. Directory-naming paths
//! conventionally end in `/`; normalization strips it, so the final
//! component is always the residual and everything before it names parent
//! directories.

use chainfs_api::controller::Device;
use chainfs_api::error_given::APIError;
use chainfs_api::fs::{BlockSupport, DirectorySupport, FileSysSupport, RegionSupport};
use chainfs_api::types::{
    valid_name, Block, BlockHeader, DirMeta, Entry, EntryKind, SuperBlock, ENTRY_SIZE,
    FILE_LENGTH_SIZE, INVALID_BLOCK, ROOT_REGION,
};
use relative_path::{Component, RelativePath};
use std::path::Path;
use tracing::debug;

use super::b_region_support::RegionLayerFS;
use super::error_fs::DirLayerError;

/// The file system type this module exports.
pub type FSName = DirLayerFS;

/// Namespace view of a mounted image.
#[derive(Debug)]
pub struct DirLayerFS {
    /// The encapsulated region layer.
    inner: RegionLayerFS,
}

impl DirLayerFS {
    /// Read the entry at byte offset `off` of the directory region `dir`.
    /// Returns `None` when the region ends before a whole entry, which an
    /// entry scan treats like a NULL terminator.
    fn entry_at(&mut self, dir: u16, off: u64) -> Result<Option<Entry>, DirLayerError> {
        self.inner.r_seat(dir)?;
        if off > 0 {
            self.inner.r_seek(off as i64)?;
        }
        let mut raw = vec![0; *ENTRY_SIZE as usize];
        if self.inner.r_read(&mut raw)? < *ENTRY_SIZE {
            return Ok(None);
        }
        Ok(Some(bincode::deserialize(&raw).map_err(APIError::from)?))
    }

    /// Read the name stored in the metadata region behind `entry`. File
    /// metadata carries the length field in front of the name.
    fn stored_name(&mut self, entry: &Entry) -> Result<String, DirLayerError> {
        self.inner.r_seat(entry.metadata_region)?;
        if entry.kind() == EntryKind::File {
            self.inner.r_seek(*FILE_LENGTH_SIZE as i64)?;
        }
        let mut len = [0u8; 1];
        if self.inner.r_read(&mut len)? < 1 {
            return Err(DirLayerError::DirLayerOp(
                "Metadata region ends before the name length",
            ));
        }
        let mut name = vec![0; len[0] as usize];
        if self.inner.r_read(&mut name)? < name.len() as u64 {
            return Err(DirLayerError::DirLayerOp(
                "Metadata region ends before the name",
            ));
        }
        String::from_utf8(name)
            .map_err(|_| DirLayerError::InvalidName("Stored name is not valid UTF-8"))
    }

    /// True iff the directory region `dir` holds no live file or
    /// subdirectory entry (tombstones do not count).
    fn dir_is_empty(&mut self, dir: u16) -> Result<bool, DirLayerError> {
        let mut off = 0;
        loop {
            match self.entry_at(dir, off)? {
                None => return Ok(true),
                Some(e) => match e.kind() {
                    EntryKind::Null => return Ok(true),
                    EntryKind::Unused => {}
                    EntryKind::File | EntryKind::Dir => return Ok(false),
                },
            }
            off += *ENTRY_SIZE;
        }
    }

    /// Turn the slot at byte offset `off` of `dir` into a tombstone.
    fn remove_slot(&mut self, dir: u16, off: u64) -> Result<(), DirLayerError> {
        self.inner.r_seat(dir)?;
        if off > 0 {
            self.inner.r_seek(off as i64)?;
        }
        if self.inner.r_write(&[EntryKind::Unused.as_u8()])? < 1 {
            return Err(DirLayerError::DirLayerOp(
                "Failed to overwrite a directory entry slot",
            ));
        }
        Ok(())
    }

    /// Write the encoded metadata record at offset 0 of `region`.
    fn write_meta_record(&mut self, region: u16, meta: &[u8]) -> Result<(), DirLayerError> {
        self.inner.r_seat(region)?;
        if self.inner.r_write(meta)? < meta.len() as u64 {
            return Err(DirLayerError::DirLayerOp(
                "Ran out of blocks while writing a metadata record",
            ));
        }
        Ok(())
    }

    /// Remove the child named by `name`/`kind` from the directory region
    /// `parent`: tombstone its slot and free both of its regions.
    fn remove_child(
        &mut self,
        parent: u16,
        name: &str,
        kind: EntryKind,
        path: &str,
    ) -> Result<(), DirLayerError> {
        let (entry, off) = self
            .dir_lookup(parent, name, kind)?
            .ok_or_else(|| DirLayerError::PathNotFound(path.to_string()))?;
        if kind == EntryKind::Dir && !self.dir_is_empty(entry.content_region)? {
            return Err(DirLayerError::DirectoryNotEmpty(path.to_string()));
        }
        self.remove_slot(parent, off)?;
        self.inner.r_free(entry.metadata_region)?;
        self.inner.r_free(entry.content_region)?;
        Ok(())
    }
}

impl FileSysSupport for DirLayerFS {
    type Error = DirLayerError;

    fn sb_valid(sb: &SuperBlock) -> bool {
        RegionLayerFS::sb_valid(sb)
    }

    fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, Self::Error> {
        let mut fs = DirLayerFS {
            inner: RegionLayerFS::mkfs(path, sb)?,
        };
        // claim the root directory region; on a fresh image the first-fit
        // allocator hands out block 0
        let root = fs.inner.r_alloc()?;
        if root != ROOT_REGION {
            return Err(DirLayerError::DirLayerOp(
                "Root region did not land on block 0",
            ));
        }
        debug!("created root directory region");
        Ok(fs)
    }

    fn mountfs(dev: Device) -> Result<Self, Self::Error> {
        let fs = DirLayerFS {
            inner: RegionLayerFS::mountfs(dev)?,
        };
        let root = fs.inner.bh_get(ROOT_REGION)?;
        if !root.is_in_use() || root.prev != INVALID_BLOCK {
            return Err(DirLayerError::DirLayerOp(
                "Image has no root directory region",
            ));
        }
        Ok(fs)
    }

    fn unmountfs(self) -> Device {
        self.inner.unmountfs()
    }
}

impl BlockSupport for DirLayerFS {
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

impl RegionSupport for DirLayerFS {
    fn r_alloc(&mut self) -> Result<u16, Self::Error> {
        Ok(self.inner.r_alloc()?)
    }

    fn r_free(&mut self, head: u16) -> Result<(), Self::Error> {
        Ok(self.inner.r_free(head)?)
    }

    fn r_trunc(&mut self, head: u16) -> Result<(), Self::Error> {
        Ok(self.inner.r_trunc(head)?)
    }

    fn r_seat(&mut self, head: u16) -> Result<(), Self::Error> {
        Ok(self.inner.r_seat(head)?)
    }

    fn r_read(&mut self, buf: &mut [u8]) -> Result<u64, Self::Error> {
        Ok(self.inner.r_read(buf)?)
    }

    fn r_write(&mut self, buf: &[u8]) -> Result<u64, Self::Error> {
        Ok(self.inner.r_write(buf)?)
    }

    fn r_seek(&mut self, offset: i64) -> Result<(), Self::Error> {
        Ok(self.inner.r_seek(offset)?)
    }

    fn r_tell(&self) -> Result<u64, Self::Error> {
        Ok(self.inner.r_tell()?)
    }
}

impl DirectorySupport for DirLayerFS {
    fn navigate(&mut self, path: &str) -> Result<(u16, String), Self::Error> {
        let rp = RelativePath::new(path);
        let residual = rp
            .file_name()
            .ok_or_else(|| DirLayerError::PathNotFound(path.to_string()))?;
        let mut dir = ROOT_REGION;
        if let Some(parent) = rp.parent() {
            for comp in parent.components() {
                match comp {
                    Component::Normal(name) => {
                        let hit = self.dir_lookup(dir, name, EntryKind::Dir)?;
                        dir = hit
                            .ok_or_else(|| DirLayerError::PathNotFound(path.to_string()))?
                            .0
                            .content_region;
                    }
                    _ => {
                        return Err(DirLayerError::InvalidName(
                            "'.' and '..' are not supported in paths",
                        ))
                    }
                }
            }
        }
        Ok((dir, residual.to_string()))
    }

    fn dir_lookup(
        &mut self,
        dir: u16,
        name: &str,
        kind: EntryKind,
    ) -> Result<Option<(Entry, u64)>, Self::Error> {
        let mut off = 0;
        loop {
            let e = match self.entry_at(dir, off)? {
                Some(e) => e,
                None => return Ok(None),
            };
            match e.kind() {
                EntryKind::Null => return Ok(None),
                k if k == kind => {
                    if self.stored_name(&e)? == name {
                        return Ok(Some((e, off)));
                    }
                }
                _ => {}
            }
            off += *ENTRY_SIZE;
        }
    }

    fn dir_insert(&mut self, dir: u16, entry: &Entry) -> Result<(), Self::Error> {
        // find the first NULL or tombstone slot; a short read means the
        // entry list has outgrown the region and the write extends it
        let mut off = 0;
        loop {
            let slot_free = match self.entry_at(dir, off)? {
                None => true,
                Some(e) => matches!(e.kind(), EntryKind::Null | EntryKind::Unused),
            };
            if slot_free {
                break;
            }
            off += *ENTRY_SIZE;
        }
        self.inner.r_seat(dir)?;
        if off > 0 {
            self.inner.r_seek(off as i64)?;
        }
        let raw = bincode::serialize(entry).map_err(APIError::from)?;
        let written = self.inner.r_write(&raw)?;
        if written < raw.len() as u64 {
            if written > 0 {
                // the kind byte is already down; restore the terminator
                self.inner.r_seat(dir)?;
                self.inner.r_seek(off as i64)?;
                self.inner.r_write(&[EntryKind::Null.as_u8()])?;
            }
            return Err(DirLayerError::DirLayerOp(
                "Ran out of blocks while writing a directory entry",
            ));
        }
        Ok(())
    }

    fn dir_create(
        &mut self,
        parent: u16,
        kind: EntryKind,
        meta: &[u8],
    ) -> Result<Entry, Self::Error> {
        // content first: a file reuses the lowest freed block for its data
        let content = self.inner.r_alloc()?;
        let metadata = match self.inner.r_alloc() {
            Ok(m) => m,
            Err(e) => {
                let _ = self.inner.r_free(content);
                return Err(e.into());
            }
        };
        let entry = Entry::new(kind, metadata, content);
        let commit = self
            .write_meta_record(metadata, meta)
            .and_then(|_| self.dir_insert(parent, &entry));
        if let Err(e) = commit {
            let _ = self.inner.r_free(metadata);
            let _ = self.inner.r_free(content);
            return Err(e);
        }
        Ok(entry)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), Self::Error> {
        let (parent, name) = self.navigate(path)?;
        if !valid_name(&name) {
            return Err(DirLayerError::InvalidName("Invalid directory name"));
        }
        let meta = DirMeta { name }.encode()?;
        self.dir_create(parent, EntryKind::Dir, &meta)?;
        debug!("mkdir {}", path);
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), Self::Error> {
        let (parent, name) = self.navigate(path)?;
        self.remove_child(parent, &name, EntryKind::Dir, path)?;
        debug!("rmdir {}", path);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<(), Self::Error> {
        let (parent, name) = self.navigate(path)?;
        self.remove_child(parent, &name, EntryKind::File, path)?;
        debug!("unlink {}", path);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/c_test.rs"]
mod tests;
