//! The block engine.
//!
//! [`BlockLayerFS`] wraps the backing-file [`Device`] and deals in whole
//! blocks: frame and header I/O, first-fit allocation and freeing. It also
//! keeps an in-memory free map (one bit per block) so allocation does not
//! rescan the headers on disk; the map is rebuilt from the headers when an
//! existing image is mounted.
//!
//! This layer knows nothing about chains beyond writing the `prev` link it
//! is handed: regions are the next layer's business.

use bit_field::BitField;
use chainfs_api::controller::Device;
use chainfs_api::fs::{BlockSupport, FileSysSupport};
use chainfs_api::types::{Block, BlockHeader, SuperBlock, INVALID_BLOCK};
use std::path::Path;
use tracing::{debug, warn};

use super::error_fs::BlockLayerError;

/// The file system type this module exports.
pub type FSName = BlockLayerFS;

/// Block-level view of a mounted image.
#[derive(Debug)]
pub struct BlockLayerFS {
    /// The encapsulated device.
    device: Device,
    /// One bit per block; set when the block is in use.
    free_map: Vec<u8>,
    /// Number of bits set in `free_map`.
    inuse: u16,
}

impl BlockLayerFS {
    fn map_get(&self, i: u16) -> bool {
        self.free_map[(i / 8) as usize].get_bit((i % 8) as usize)
    }

    fn map_set(&mut self, i: u16, in_use: bool) {
        self.free_map[(i / 8) as usize].set_bit((i % 8) as usize, in_use);
    }

    fn empty_map(nblocks: u16) -> Vec<u8> {
        vec![0; (nblocks as usize + 7) / 8]
    }
}

impl FileSysSupport for BlockLayerFS {
    type Error = BlockLayerError;

    fn sb_valid(sb: &SuperBlock) -> bool {
        // nblocks stays strictly below the sentinel so every block index
        // is addressable
        sb.block_size > 0 && sb.nblocks > 0 && sb.nblocks < INVALID_BLOCK
    }

    fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, Self::Error> {
        if !Self::sb_valid(sb) {
            return Err(BlockLayerError::BlockLayerInput(
                "Superblock geometry is not valid",
            ));
        }
        let mut device = Device::new(path, sb.block_size, sb.nblocks)?;

        // A zeroed frame is not a valid free block (free links are the
        // INVALID sentinel), so format every header explicitly.
        let frame = device.frame_size();
        for i in 0..sb.nblocks {
            let mut b = Block::new_zero(i, frame);
            b.serialize_into(&BlockHeader::free(), 0)?;
            device.write_block(&b)?;
        }
        debug!(
            "formatted {} blocks of {} payload bytes",
            sb.nblocks, sb.block_size
        );

        Ok(BlockLayerFS {
            device,
            free_map: Self::empty_map(sb.nblocks),
            inuse: 0,
        })
    }

    fn mountfs(dev: Device) -> Result<Self, Self::Error> {
        let sb = dev.superblock();
        if !Self::sb_valid(&sb) {
            return Err(BlockLayerError::BlockLayerInput(
                "Device geometry is not a valid superblock",
            ));
        }
        let mut fs = BlockLayerFS {
            device: dev,
            free_map: Self::empty_map(sb.nblocks),
            inuse: 0,
        };
        for i in 0..sb.nblocks {
            if fs.bh_get(i)?.is_in_use() {
                fs.map_set(i, true);
                fs.inuse += 1;
            }
        }
        debug!("mounted image with {} of {} blocks in use", fs.inuse, sb.nblocks);
        Ok(fs)
    }

    fn unmountfs(self) -> Device {
        self.device
    }
}

impl BlockSupport for BlockLayerFS {
    fn b_get(&self, i: u16) -> Result<Block, Self::Error> {
        Ok(self.device.read_block(i)?)
    }

    fn b_put(&mut self, b: &Block) -> Result<(), Self::Error> {
        Ok(self.device.write_block(b)?)
    }

    fn bh_get(&self, i: u16) -> Result<BlockHeader, Self::Error> {
        Ok(self.b_get(i)?.deserialize_from::<BlockHeader>(0)?)
    }

    fn bh_put(&mut self, i: u16, bh: &BlockHeader) -> Result<(), Self::Error> {
        // read-modify-write so the payload bytes stay untouched
        let mut b = self.b_get(i)?;
        b.serialize_into(bh, 0)?;
        self.b_put(&b)
    }

    fn b_alloc(&mut self, prev: u16) -> Result<u16, Self::Error> {
        let nblocks = self.device.nblocks;
        let i = match (0..nblocks).find(|&i| !self.map_get(i)) {
            Some(i) => i,
            None => {
                warn!("device full: all {} blocks are in use", nblocks);
                return Err(BlockLayerError::DeviceFull);
            }
        };
        // fresh frame: linked header, zeroed payload
        let mut b = Block::new_zero(i, self.device.frame_size());
        b.serialize_into(&BlockHeader::linked(prev), 0)?;
        self.b_put(&b)?;
        self.map_set(i, true);
        self.inuse += 1;
        Ok(i)
    }

    fn b_free(&mut self, i: u16) -> Result<(), Self::Error> {
        if i >= self.device.nblocks {
            return Err(BlockLayerError::BlockLayerInput("Block index out of bounds"));
        }
        if !self.map_get(i) {
            return Err(BlockLayerError::BlockLayerInput("Block is already free"));
        }
        self.bh_put(i, &BlockHeader::free())?;
        self.map_set(i, false);
        self.inuse -= 1;
        Ok(())
    }

    fn b_inuse_count(&self) -> u16 {
        self.inuse
    }

    fn sup_get(&self) -> Result<SuperBlock, Self::Error> {
        Ok(self.device.superblock())
    }
}


#[cfg(test)]
#[path = "../../api/fs-tests/a_test.rs"]
mod tests;
