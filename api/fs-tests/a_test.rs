use super::FSName;
use chainfs_api::fs::{BlockSupport, FileSysSupport};
use chainfs_api::types::{BlockHeader, SuperBlock, BLOCK_HEADER_SIZE, INVALID_BLOCK};
use std::path::PathBuf;

#[path = "utils.rs"]
mod utils;

static BLOCK_SIZE: u16 = 10;
static NBLOCKS: u16 = 8;
static SUPERBLOCK: SuperBlock = SuperBlock {
    block_size: BLOCK_SIZE,
    nblocks: NBLOCKS,
};

fn disk_prep_path(name: &str) -> PathBuf {
    utils::disk_prep_path(&("fs-images-a-".to_string() + name), "img")
}

#[test]
fn mkfs() {
    let path = disk_prep_path("mkfs");
    let my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    assert_eq!(my_fs.sup_get().unwrap(), SUPERBLOCK);
    assert_eq!(my_fs.b_inuse_count(), 0);
    //Every header is formatted to the free state
    for i in 0..NBLOCKS {
        assert_eq!(my_fs.bh_get(i).unwrap(), BlockHeader::free());
    }
    utils::check_chains(&my_fs);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn mkfs_rejects_bad_geometry() {
    let path = disk_prep_path("mkfs-bad");
    assert!(FSName::mkfs(
        &path,
        &SuperBlock {
            block_size: 0,
            nblocks: NBLOCKS
        }
    )
    .is_err());
    assert!(FSName::mkfs(
        &path,
        &SuperBlock {
            block_size: BLOCK_SIZE,
            nblocks: INVALID_BLOCK
        }
    )
    .is_err());
    //No image was created, only the parent directory remains
    assert!(!path.exists());
    std::fs::remove_dir(path.parent().unwrap()).unwrap();
}

#[test]
fn alloc_free() {
    let path = disk_prep_path("alloc-free");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    //First-fit allocation hands out the blocks in order
    for i in 0..NBLOCKS {
        assert_eq!(my_fs.b_alloc(INVALID_BLOCK).unwrap(), i);
    }
    assert_eq!(my_fs.b_inuse_count(), NBLOCKS);
    //Nothing left
    assert!(my_fs.b_alloc(INVALID_BLOCK).is_err());

    //Freeing makes the lowest freed block the next allocation
    my_fs.b_free(5).unwrap();
    my_fs.b_free(3).unwrap();
    assert_eq!(my_fs.bh_get(3).unwrap(), BlockHeader::free());
    assert_eq!(my_fs.b_inuse_count(), NBLOCKS - 2);
    assert_eq!(my_fs.b_alloc(INVALID_BLOCK).unwrap(), 3);
    assert_eq!(my_fs.b_alloc(INVALID_BLOCK).unwrap(), 5);

    //Double frees and out-of-bounds indices are rejected
    my_fs.b_free(7).unwrap();
    assert!(my_fs.b_free(7).is_err());
    assert!(my_fs.b_free(NBLOCKS).is_err());

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn alloc_links_and_zeroes() {
    let path = disk_prep_path("alloc-zero");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    //The allocated header carries the prev link it was handed
    let head = my_fs.b_alloc(INVALID_BLOCK).unwrap();
    let tail = my_fs.b_alloc(head).unwrap();
    assert_eq!(my_fs.bh_get(tail).unwrap(), BlockHeader::linked(head));

    //Scribble into the payload, free, reallocate: the payload is zero again
    let mut b = my_fs.b_get(tail).unwrap();
    b.write_data(&[7; 10], *BLOCK_HEADER_SIZE).unwrap();
    my_fs.b_put(&b).unwrap();
    my_fs.b_free(tail).unwrap();
    assert_eq!(my_fs.b_alloc(INVALID_BLOCK).unwrap(), tail);
    let b = my_fs.b_get(tail).unwrap();
    let mut payload = [1; 10];
    b.read_data(&mut payload, *BLOCK_HEADER_SIZE).unwrap();
    assert_eq!(payload, [0; 10]);

    //b_free resets only the header; freed payload bytes stay put
    let mut b = my_fs.b_get(head).unwrap();
    b.write_data(&[9; 10], *BLOCK_HEADER_SIZE).unwrap();
    my_fs.b_put(&b).unwrap();
    my_fs.b_free(head).unwrap();
    let b = my_fs.b_get(head).unwrap();
    let mut payload = [0; 10];
    b.read_data(&mut payload, *BLOCK_HEADER_SIZE).unwrap();
    assert_eq!(payload, [9; 10]);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn mount_rebuilds_free_map() {
    let path = disk_prep_path("mount");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let a = my_fs.b_alloc(INVALID_BLOCK).unwrap();
    let b = my_fs.b_alloc(a).unwrap();
    assert_eq!((a, b), (0, 1));
    //Close the forward link the way the region layer would
    let mut ha = my_fs.bh_get(a).unwrap();
    ha.next = b;
    my_fs.bh_put(a, &ha).unwrap();
    let dev = my_fs.unmountfs();
    drop(dev);

    //Remount from the image: the in-use set comes back from the headers
    let mut my_fs = FSName::mountfs(utils::disk_open(&path)).unwrap();
    assert_eq!(my_fs.b_inuse_count(), 2);
    assert_eq!(my_fs.b_alloc(INVALID_BLOCK).unwrap(), 2);
    utils::check_chains(&my_fs);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}
