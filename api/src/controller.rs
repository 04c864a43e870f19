//! The backing-file driver.
//!
//! One ordinary host file holds the entire virtual file system; this module
//! is the only code that touches it. The file is memory mapped into a
//! [`Device`], which hands out whole block frames (header plus payload) by
//! index. The layout is fixed: the 4-byte disk header at offset 0, then
//! `nblocks` frames of `block_size + 5` bytes each.
//!
//! No provision is made to lock the backing file against other processes;
//! at most one device may be open per image at a time.

use super::error_given;
use super::error_given::APIError;
use super::types::{Block, SuperBlock, BLOCK_HEADER_SIZE, SUPERBLOCK_SIZE};
use memmap::MmapMut;
use std::{
    fs::{remove_file, OpenOptions},
    path::{Path, PathBuf},
};

/// Handle to the backing file: its geometry and the writable memory map the
/// read and write operations act on.
#[derive(Debug)]
pub struct Device {
    /// Payload bytes per block, as recorded in the disk header.
    pub block_size: u16,
    /// Total number of blocks, as recorded in the disk header.
    pub nblocks: u16,
    /// Path of the backing file.
    path: PathBuf,
    /// Memory-mapped contents of the backing file.
    contents: MmapMut,
}

impl Drop for Device {
    /// Persist outstanding writes when the device goes out of scope, unless
    /// the backing file has already been removed out from under us.
    fn drop(&mut self) {
        if self.path.exists() {
            self.contents.flush().unwrap();
        }
    }
}

/// Total size in bytes of a backing file with the given geometry.
fn device_size_of(sb: &SuperBlock) -> u64 {
    *SUPERBLOCK_SIZE + sb.nblocks as u64 * (sb.block_size as u64 + *BLOCK_HEADER_SIZE)
}

impl Device {
    /// Create a *new* backing file at `path` with the given geometry and
    /// write the disk header into it. Every other byte starts out zero.
    /// Errors if a file already exists at `path`.
    pub fn new<P: AsRef<Path>>(
        path: P,
        block_size: u16,
        nblocks: u16,
    ) -> error_given::Result<Device> {
        let path_buf = path.as_ref().to_path_buf();
        if path_buf.exists() {
            return Err(APIError::ControllerInput(
                "Tried to create a pre-existing backing file",
            ));
        }

        let sb = SuperBlock { block_size, nblocks };
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path_buf)?;
        f.set_len(device_size_of(&sb))?; // extended with zeroes

        let mut contents = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
        let header = bincode::serialize(&sb)?;
        contents[..header.len()].copy_from_slice(&header);

        Ok(Device {
            block_size,
            nblocks,
            path: path_buf,
            contents,
        })
    }

    /// Load an *existing* backing file. The disk header is authoritative:
    /// the geometry is read back from it, and the file length must match
    /// the size it implies. Errors if `path` does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> error_given::Result<Device> {
        let path_buf = path.as_ref().to_path_buf();
        if !path_buf.exists() {
            return Err(APIError::ControllerInput(
                "Tried to load a non-existing backing file",
            ));
        }

        let f = OpenOptions::new().read(true).write(true).open(&path_buf)?;
        let contents = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
        if (contents.len() as u64) < *SUPERBLOCK_SIZE {
            return Err(APIError::ControllerInput(
                "Backing file too short to hold a disk header",
            ));
        }
        let sb: SuperBlock = bincode::deserialize(&contents[..*SUPERBLOCK_SIZE as usize])?;
        if contents.len() as u64 != device_size_of(&sb) {
            return Err(APIError::ControllerInput(
                "Backing file size does not match its disk header",
            ));
        }

        Ok(Device {
            block_size: sb.block_size,
            nblocks: sb.nblocks,
            path: path_buf,
            contents,
        })
    }

    /// End the lifetime of this device and remove the file backing it.
    /// Panics if removing the file fails.
    pub fn destruct(self) {
        remove_file(&self.path).unwrap();
    }

    /// The geometry recorded in the disk header.
    pub fn superblock(&self) -> SuperBlock {
        SuperBlock {
            block_size: self.block_size,
            nblocks: self.nblocks,
        }
    }

    /// Size of one block frame in bytes: the header plus the payload.
    pub fn frame_size(&self) -> u64 {
        self.block_size as u64 + *BLOCK_HEADER_SIZE
    }

    /// Size of this device in bytes.
    pub fn device_size(&self) -> u64 {
        device_size_of(&self.superblock())
    }

    /// Path of the file backing this device.
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    /// Absolute byte offset of block `index`'s frame.
    fn index_to_addr(&self, index: u16) -> u64 {
        *SUPERBLOCK_SIZE + index as u64 * self.frame_size()
    }

    /// Read the frame of block `index`. Errors if the index is out of
    /// bounds.
    pub fn read_block(&self, index: u16) -> error_given::Result<Block> {
        if index >= self.nblocks {
            return Err(APIError::ControllerInput("Block index out of bounds"));
        }
        let start = self.index_to_addr(index) as usize;
        let end = start + self.frame_size() as usize;
        Ok(Block::new(index, self.contents[start..end].into()))
    }

    /// Write a block frame back to the device. Errors if the frame has the
    /// wrong size or the block index is out of bounds.
    pub fn write_block(&mut self, b: &Block) -> error_given::Result<()> {
        if b.len() != self.frame_size() {
            return Err(APIError::ControllerInput(
                "Trying to write a wrongly sized block frame",
            ));
        }
        if b.block_no >= self.nblocks {
            return Err(APIError::ControllerInput("Block index out of bounds"));
        }
        let start = self.index_to_addr(b.block_no) as usize;
        let end = start + self.frame_size() as usize;
        self.contents[start..end].copy_from_slice(b.contents_as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::Device;
    use crate::types::Block;
    use std::fs::{create_dir_all, remove_dir, remove_file};
    use std::path::PathBuf;

    // A toy disk: 8 blocks of 10 payload bytes each.
    static BLOCK_SIZE: u16 = 10;
    static NBLOCKS: u16 = 8;

    //Each test gets its own directory under the crate root, so the tests can
    //run in parallel without sharing an image.
    fn disk_prep_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("fs-images-controller-".to_string() + name);
        path.push("img");

        if path.exists() {
            remove_file(&path).unwrap();
        }
        {
            let prefix = path.parent().unwrap();
            create_dir_all(prefix).unwrap();
        }

        path
    }

    fn disk_destruct(dev: Device) {
        let path = dev.path.to_owned();
        dev.destruct();
        remove_dir(path.parent().unwrap()).unwrap(); //only removes an empty directory
    }

    fn zero_frame(block_no: u16, frame_size: u64) -> Block {
        Block::new_zero(block_no, frame_size)
    }

    #[test]
    fn create_disk_test() {
        let path = disk_prep_path("create");
        let mut dev = Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap();
        let fsize = dev.frame_size();
        assert_eq!(fsize, 15);
        assert_eq!(dev.device_size(), 4 + 8 * 15);

        //A second device on the same image is refused
        assert!(Device::new(&path, BLOCK_SIZE, NBLOCKS).is_err());

        //Fresh frames are all zero
        let br = dev.read_block(3).unwrap();
        assert_eq!(br, zero_frame(3, fsize));
        let br = dev.read_block(NBLOCKS - 1).unwrap();
        assert_eq!(br, zero_frame(NBLOCKS - 1, fsize));

        //Out-of-bounds and wrongly sized accesses are rejected
        assert!(dev.read_block(NBLOCKS).is_err());
        assert!(dev.write_block(&zero_frame(NBLOCKS, fsize)).is_err());
        assert!(dev.write_block(&zero_frame(3, fsize + 1)).is_err());
        assert!(dev.write_block(&zero_frame(3, fsize - 1)).is_err());

        //Write a frame and read it back
        let data = (0..15).collect();
        let bw = Block::new(3, data);
        dev.write_block(&bw).unwrap();
        let br = dev.read_block(3).unwrap();
        assert_eq!(br, bw);

        disk_destruct(dev);
        assert!(!path.exists());
    }

    #[test]
    fn load_existing_disk_test() {
        let path = disk_prep_path("load");
        let mut dev = Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap();
        let fsize = dev.frame_size();

        let bw1 = Block::new(0, vec![1; fsize as usize].into_boxed_slice());
        let bw2 = Block::new(7, vec![9; fsize as usize].into_boxed_slice());
        dev.write_block(&bw1).unwrap();
        dev.write_block(&bw2).unwrap();

        //Close the device by dropping it
        drop(dev);

        //Reload: the geometry comes back from the disk header, and the data
        //written before the drop is still there
        let dev = Device::load(&path).unwrap();
        assert_eq!(dev.block_size, BLOCK_SIZE);
        assert_eq!(dev.nblocks, NBLOCKS);
        assert_eq!(dev.read_block(0).unwrap(), bw1);
        assert_eq!(dev.read_block(7).unwrap(), bw2);

        disk_destruct(dev);
        assert!(!path.exists());
    }

    #[test]
    fn load_nonexistent_test() {
        let path = disk_prep_path("load-missing");
        assert!(Device::load(&path).is_err());
        remove_dir(path.parent().unwrap()).unwrap();
    }
}
