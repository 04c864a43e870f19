#![allow(dead_code)]

//Some more general testing utilities
use chainfs_api::controller::Device;
use chainfs_api::fs::BlockSupport;
use chainfs_api::types::INVALID_BLOCK;
use std::fs::{create_dir_all, remove_dir, remove_file};
use std::path::{Path, PathBuf};

//Create the necessary folders 'name' leading up to 'img_name', starting from the crate root
//Additionally, remove 'img_name' if it already exists, so every run starts from a fresh disk
pub fn disk_prep_path(name: &str, img_name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push(name);
    path.push(img_name);

    if path.exists() {
        //Remove the file in case it already exists
        remove_file(&path).unwrap();
    }
    {
        //Create any missing directories first, if applicable
        let prefix = path.parent().unwrap();
        create_dir_all(prefix).unwrap();
    }

    path
}

//Undo folder creation, including removing the parent
pub fn disk_unprep_path(path: &Path) {
    //Ensure that the file has been deleted before going on
    remove_file(path).unwrap();

    let parent = path.parent().unwrap();
    remove_dir(parent).unwrap(); //Safety; only removes an empty directory
}

//Create a fresh device
pub fn disk_setup(path: &Path, block_size: u16, nblocks: u16) -> Device {
    Device::new(path, block_size, nblocks).unwrap()
}

//Load an existing device; the geometry comes back from the disk header
pub fn disk_open(path: &Path) -> Device {
    Device::load(path).unwrap()
}

//Destruct the given device and remove the parent directory it was located in
pub fn disk_destruct(dev: Device) {
    let path = dev.device_path().to_owned();
    drop(dev); //Avoid the device holding a lock over this file
    disk_unprep_path(&path);
}

//Walk every block header and assert the chain invariants:
//- free blocks have both links set to the INVALID sentinel
//- the links of in-use blocks are symmetric (prev.next == self, next.prev == self)
//- the in-use count agrees with the headers
//- every chain reached from a head terminates within nblocks hops
pub fn check_chains<FS: BlockSupport>(fs: &FS) {
    let sb = fs.sup_get().unwrap();
    let mut seen_in_use = 0;
    for i in 0..sb.nblocks {
        let h = fs.bh_get(i).unwrap();
        if !h.is_in_use() {
            assert_eq!(h.prev, INVALID_BLOCK, "free block {} keeps a prev link", i);
            assert_eq!(h.next, INVALID_BLOCK, "free block {} keeps a next link", i);
            continue;
        }
        seen_in_use += 1;
        if h.prev != INVALID_BLOCK {
            let p = fs.bh_get(h.prev).unwrap();
            assert!(p.is_in_use(), "block {} points back at a free block", i);
            assert_eq!(p.next, i, "asymmetric prev link at block {}", i);
        }
        if h.next != INVALID_BLOCK {
            let n = fs.bh_get(h.next).unwrap();
            assert!(n.is_in_use(), "block {} points ahead at a free block", i);
            assert_eq!(n.prev, i, "asymmetric next link at block {}", i);
        }
    }
    assert_eq!(seen_in_use, fs.b_inuse_count());

    for i in 0..sb.nblocks {
        let h = fs.bh_get(i).unwrap();
        if h.is_in_use() && h.prev == INVALID_BLOCK {
            let mut cur = h;
            let mut hops = 0;
            while cur.next != INVALID_BLOCK {
                hops += 1;
                assert!(hops <= sb.nblocks, "cycle in the chain headed at block {}", i);
                cur = fs.bh_get(cur.next).unwrap();
            }
        }
    }
}
