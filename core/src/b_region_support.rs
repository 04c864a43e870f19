//! The region layer.
//!
//! A region is a variable-length byte stream stored as a doubly-linked
//! chain of blocks and identified by the index of its head block.
//! [`RegionLayerFS`] wraps the block engine and adds the single shared
//! cursor that presents the seated region as a contiguous stream: reads
//! and seeks follow the chain links transparently, and writes extend the
//! chain when they run off the tail.
//!
//! The cursor is one resource for the whole file system. Whoever seats it
//! owns it until the next seat; the file layer builds its descriptor
//! invalidation protocol on exactly this property.

use chainfs_api::controller::Device;
use chainfs_api::fs::{BlockSupport, FileSysSupport, RegionSupport};
use chainfs_api::types::{
    Block, BlockHeader, SuperBlock, BLOCK_HEADER_SIZE, INVALID_BLOCK,
};
use std::path::Path;
use tracing::debug;

use super::a_block_support::BlockLayerFS;
use super::error_fs::{BlockLayerError, RegionLayerError};

/// The file system type this module exports.
pub type FSName = RegionLayerFS;

/// The cursor state: the block it currently sits in, that block's cached
/// header, and its position both inside the block and inside the region.
/// `pos_in_block` may rest at `block_size`, one past the block's last byte;
/// the next read or write moves into the following block first, allocating
/// it if the chain ends here. This is what makes a write that exactly fills
/// the tail leave the chain unextended.
#[derive(Debug, Clone, Copy)]
struct RegionCursor {
    head: u16,
    block: u16,
    header: BlockHeader,
    pos_in_block: u64,
    pos_in_region: u64,
}

/// Region-level view of a mounted image.
#[derive(Debug)]
pub struct RegionLayerFS {
    /// The encapsulated block layer.
    inner: BlockLayerFS,
    /// Payload bytes per block, cached from the superblock.
    block_size: u64,
    /// The shared cursor, if a region is seated.
    cursor: Option<RegionCursor>,
}

impl RegionLayerFS {
    /// Free the chain starting at `start` (which need not be a head).
    fn free_from(&mut self, start: u16) -> Result<(), RegionLayerError> {
        let mut cur = start;
        loop {
            let h = self.inner.bh_get(cur)?;
            self.inner.b_free(cur)?;
            if h.next == INVALID_BLOCK {
                return Ok(());
            }
            cur = h.next;
        }
    }

    /// Drop the cursor if it is seated on the region headed at `head`.
    fn unseat_if_on(&mut self, head: u16) {
        if let Some(c) = self.cursor {
            if c.head == head {
                self.cursor = None;
            }
        }
    }

    /// Fetch the header of `head` and check that it can start a region.
    fn head_header(&self, head: u16) -> Result<BlockHeader, RegionLayerError> {
        let header = self.inner.bh_get(head)?;
        if !header.is_in_use() {
            return Err(RegionLayerError::RegionLayerInput(
                "Block is free and cannot head a region",
            ));
        }
        if header.prev != INVALID_BLOCK {
            return Err(RegionLayerError::RegionLayerInput(
                "Block is not the head of its chain",
            ));
        }
        Ok(header)
    }
}

impl FileSysSupport for RegionLayerFS {
    type Error = RegionLayerError;

    fn sb_valid(sb: &SuperBlock) -> bool {
        BlockLayerFS::sb_valid(sb)
    }

    fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, Self::Error> {
        let inner = BlockLayerFS::mkfs(path, sb)?;
        Ok(RegionLayerFS {
            inner,
            block_size: sb.block_size as u64,
            cursor: None,
        })
    }

    fn mountfs(dev: Device) -> Result<Self, Self::Error> {
        let block_size = dev.block_size as u64;
        let inner = BlockLayerFS::mountfs(dev)?;
        Ok(RegionLayerFS {
            inner,
            block_size,
            cursor: None,
        })
    }

    fn unmountfs(self) -> Device {
        self.inner.unmountfs()
    }
}

impl BlockSupport for RegionLayerFS {
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

impl RegionSupport for RegionLayerFS {
    fn r_alloc(&mut self) -> Result<u16, Self::Error> {
        Ok(self.inner.b_alloc(INVALID_BLOCK)?)
    }

    fn r_free(&mut self, head: u16) -> Result<(), Self::Error> {
        self.head_header(head)?;
        self.free_from(head)?;
        self.unseat_if_on(head);
        debug!("freed region {}", head);
        Ok(())
    }

    fn r_trunc(&mut self, head: u16) -> Result<(), Self::Error> {
        let header = self.head_header(head)?;
        if header.next != INVALID_BLOCK {
            self.free_from(header.next)?;
            self.inner.bh_put(head, &BlockHeader::linked(INVALID_BLOCK))?;
        }
        self.unseat_if_on(head);
        Ok(())
    }

    fn r_seat(&mut self, head: u16) -> Result<(), Self::Error> {
        let header = self.head_header(head)?;
        self.cursor = Some(RegionCursor {
            head,
            block: head,
            header,
            pos_in_block: 0,
            pos_in_region: 0,
        });
        Ok(())
    }

    fn r_read(&mut self, buf: &mut [u8]) -> Result<u64, Self::Error> {
        let mut cur = self.cursor.ok_or(RegionLayerError::NoActiveRegion)?;
        let bs = self.block_size;
        let mut done: u64 = 0;
        while done < buf.len() as u64 {
            if cur.pos_in_block == bs {
                if cur.header.next == INVALID_BLOCK {
                    break; // tail reached: short read
                }
                cur.block = cur.header.next;
                cur.header = self.inner.bh_get(cur.block)?;
                cur.pos_in_block = 0;
            }
            let n = (bs - cur.pos_in_block).min(buf.len() as u64 - done);
            let b = self.inner.b_get(cur.block)?;
            b.read_data(
                &mut buf[done as usize..(done + n) as usize],
                *BLOCK_HEADER_SIZE + cur.pos_in_block,
            )
            .map_err(BlockLayerError::from)?;
            cur.pos_in_block += n;
            cur.pos_in_region += n;
            done += n;
        }
        self.cursor = Some(cur);
        Ok(done)
    }

    fn r_write(&mut self, buf: &[u8]) -> Result<u64, Self::Error> {
        let mut cur = self.cursor.ok_or(RegionLayerError::NoActiveRegion)?;
        let bs = self.block_size;
        let mut done: u64 = 0;
        while done < buf.len() as u64 {
            if cur.pos_in_block == bs {
                if cur.header.next == INVALID_BLOCK {
                    // extend the chain behind the current tail
                    match self.inner.b_alloc(cur.block) {
                        Ok(fresh) => {
                            cur.header.next = fresh;
                            self.inner.bh_put(cur.block, &cur.header)?;
                        }
                        Err(BlockLayerError::DeviceFull) => break, // short write
                        Err(e) => return Err(e.into()),
                    }
                }
                cur.block = cur.header.next;
                cur.header = self.inner.bh_get(cur.block)?;
                cur.pos_in_block = 0;
            }
            let n = (bs - cur.pos_in_block).min(buf.len() as u64 - done);
            let mut b = self.inner.b_get(cur.block)?;
            b.write_data(
                &buf[done as usize..(done + n) as usize],
                *BLOCK_HEADER_SIZE + cur.pos_in_block,
            )
            .map_err(BlockLayerError::from)?;
            self.inner.b_put(&b)?;
            cur.pos_in_block += n;
            cur.pos_in_region += n;
            done += n;
        }
        self.cursor = Some(cur);
        Ok(done)
    }

    fn r_seek(&mut self, offset: i64) -> Result<(), Self::Error> {
        let mut cur = self.cursor.ok_or(RegionLayerError::NoActiveRegion)?;
        let bs = self.block_size;
        if offset >= 0 {
            let mut left = offset as u64;
            loop {
                let avail = bs - cur.pos_in_block;
                if left < avail {
                    cur.pos_in_block += left;
                    cur.pos_in_region += left;
                    break;
                }
                if cur.header.next == INVALID_BLOCK {
                    // clamp one past the tail's last byte
                    cur.pos_in_block = bs;
                    cur.pos_in_region += avail;
                    break;
                }
                left -= avail;
                cur.pos_in_region += avail;
                cur.block = cur.header.next;
                cur.header = self.inner.bh_get(cur.block)?;
                cur.pos_in_block = 0;
            }
        } else {
            let mut left = offset.unsigned_abs();
            loop {
                if left <= cur.pos_in_block {
                    cur.pos_in_block -= left;
                    cur.pos_in_region -= left;
                    break;
                }
                if cur.header.prev == INVALID_BLOCK {
                    // clamp at the start of the region
                    cur.pos_in_region -= cur.pos_in_block;
                    cur.pos_in_block = 0;
                    break;
                }
                // land on the last byte of the previous block
                left -= cur.pos_in_block + 1;
                cur.pos_in_region -= cur.pos_in_block + 1;
                cur.block = cur.header.prev;
                cur.header = self.inner.bh_get(cur.block)?;
                cur.pos_in_block = bs - 1;
            }
        }
        self.cursor = Some(cur);
        Ok(())
    }

    fn r_tell(&self) -> Result<u64, Self::Error> {
        Ok(self
            .cursor
            .ok_or(RegionLayerError::NoActiveRegion)?
            .pos_in_region)
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/b_test.rs"]
mod tests;
