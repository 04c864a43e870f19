use super::FSName;
use chainfs_api::fs::{BlockSupport, FileSysSupport, RegionSupport};
use chainfs_api::types::{SuperBlock, INVALID_BLOCK};
use std::path::PathBuf;

#[path = "utils.rs"]
mod utils;

static BLOCK_SIZE: u16 = 10;
static NBLOCKS: u16 = 16;
static SUPERBLOCK: SuperBlock = SuperBlock {
    block_size: BLOCK_SIZE,
    nblocks: NBLOCKS,
};

fn disk_prep_path(name: &str) -> PathBuf {
    utils::disk_prep_path(&("fs-images-b-".to_string() + name), "img")
}

//A recognizable byte pattern of length n
fn pattern(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 251) as u8).collect()
}

#[test]
fn alloc_and_seat() {
    let path = disk_prep_path("seat");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let r = my_fs.r_alloc().unwrap();
    assert_eq!(r, 0);
    assert_eq!(my_fs.b_inuse_count(), 1);

    //Cursor operations require a seated region
    assert!(my_fs.r_read(&mut [0; 4]).is_err());
    assert!(my_fs.r_tell().is_err());

    my_fs.r_seat(r).unwrap();
    assert_eq!(my_fs.r_tell().unwrap(), 0);

    //Free blocks and chain interiors cannot be seated
    assert!(my_fs.r_seat(1).is_err());
    my_fs.r_write(&pattern(15)).unwrap(); //extends the chain by one block
    assert!(my_fs.r_seat(my_fs.bh_get(r).unwrap().next).is_err());

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn write_read_spanning() {
    let path = disk_prep_path("span");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let r = my_fs.r_alloc().unwrap();
    my_fs.r_seat(r).unwrap();
    let data = pattern(25);
    assert_eq!(my_fs.r_write(&data).unwrap(), 25);
    //25 bytes over 10-byte blocks: a chain of 3
    assert_eq!(my_fs.b_inuse_count(), 3);
    assert_eq!(my_fs.r_tell().unwrap(), 25);
    utils::check_chains(&my_fs);

    //Read the whole chain back: the last block was zeroed at allocation,
    //and a further read stops short at the tail
    my_fs.r_seat(r).unwrap();
    let mut buf = vec![0; 30];
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), 30);
    assert_eq!(&buf[..25], &data[..]);
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), 0);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn interleaved_regions() {
    let path = disk_prep_path("interleave");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    //Two regions whose chains interleave block by block
    let ra = my_fs.r_alloc().unwrap();
    let rb = my_fs.r_alloc().unwrap();
    my_fs.r_seat(ra).unwrap();
    my_fs.r_write(&[0xAA; 15]).unwrap();
    my_fs.r_seat(rb).unwrap();
    my_fs.r_write(&[0xBB; 15]).unwrap();
    utils::check_chains(&my_fs);
    assert_eq!(my_fs.b_inuse_count(), 4);

    let mut buf = [0; 15];
    my_fs.r_seat(ra).unwrap();
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), 15);
    assert_eq!(buf, [0xAA; 15]);
    my_fs.r_seat(rb).unwrap();
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), 15);
    assert_eq!(buf, [0xBB; 15]);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn exact_fill_extends_on_next_write() {
    let path = disk_prep_path("boundary");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let r = my_fs.r_alloc().unwrap();
    my_fs.r_seat(r).unwrap();
    //Exactly filling the block does not extend the chain
    assert_eq!(my_fs.r_write(&[1; 10]).unwrap(), 10);
    assert_eq!(my_fs.b_inuse_count(), 1);
    assert_eq!(my_fs.bh_get(r).unwrap().next, INVALID_BLOCK);
    //The next write does
    assert_eq!(my_fs.r_write(&[2; 1]).unwrap(), 1);
    assert_eq!(my_fs.b_inuse_count(), 2);
    assert_ne!(my_fs.bh_get(r).unwrap().next, INVALID_BLOCK);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn relative_seeks() {
    let path = disk_prep_path("seek");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let r = my_fs.r_alloc().unwrap();
    my_fs.r_seat(r).unwrap();
    let data = pattern(30);
    my_fs.r_write(&data).unwrap();

    //Forward across two block boundaries
    my_fs.r_seat(r).unwrap();
    my_fs.r_seek(17).unwrap();
    assert_eq!(my_fs.r_tell().unwrap(), 17);
    let mut buf = [0; 3];
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), 3);
    assert_eq!(buf, [data[17], data[18], data[19]]);

    //Backward lands on the right byte mid-chain
    my_fs.r_seek(-13).unwrap();
    assert_eq!(my_fs.r_tell().unwrap(), 7);
    let mut buf = [0; 2];
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), 2);
    assert_eq!(buf, [data[7], data[8]]);

    //Backward past the head clamps at offset 0
    my_fs.r_seek(-100).unwrap();
    assert_eq!(my_fs.r_tell().unwrap(), 0);
    let mut buf = [0; 1];
    my_fs.r_read(&mut buf).unwrap();
    assert_eq!(buf[0], data[0]);

    //Forward past the tail clamps at the end of the chain
    my_fs.r_seek(1000).unwrap();
    assert_eq!(my_fs.r_tell().unwrap(), 30);
    assert_eq!(my_fs.r_read(&mut [0; 4]).unwrap(), 0);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn trunc_and_free() {
    let path = disk_prep_path("trunc");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let r = my_fs.r_alloc().unwrap();
    my_fs.r_seat(r).unwrap();
    my_fs.r_write(&pattern(25)).unwrap();
    assert_eq!(my_fs.b_inuse_count(), 3);

    //Truncation keeps the head and releases the rest of the chain
    my_fs.r_trunc(r).unwrap();
    assert_eq!(my_fs.b_inuse_count(), 1);
    assert_eq!(my_fs.bh_get(r).unwrap().next, INVALID_BLOCK);
    utils::check_chains(&my_fs);
    //The cursor was unseated along the way
    assert!(my_fs.r_tell().is_err());

    //Regrow and free the whole region
    my_fs.r_seat(r).unwrap();
    my_fs.r_write(&pattern(12)).unwrap();
    assert_eq!(my_fs.b_inuse_count(), 2);
    my_fs.r_free(r).unwrap();
    assert_eq!(my_fs.b_inuse_count(), 0);
    utils::check_chains(&my_fs);
    //Freeing an unallocated region is rejected
    assert!(my_fs.r_free(r).is_err());

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}

#[test]
fn exhaustion_short_write() {
    let path = disk_prep_path("full");
    let mut my_fs = FSName::mkfs(&path, &SUPERBLOCK).unwrap();

    let r = my_fs.r_alloc().unwrap();
    my_fs.r_seat(r).unwrap();
    //Capacity is nblocks * block_size bytes; the write comes up short
    let capacity = (NBLOCKS as u64) * (BLOCK_SIZE as u64);
    let data = pattern(200);
    assert_eq!(my_fs.r_write(&data).unwrap(), capacity);
    assert_eq!(my_fs.b_inuse_count(), NBLOCKS);
    //Nothing more fits
    assert_eq!(my_fs.r_write(&[1; 4]).unwrap(), 0);

    //What was written is intact
    my_fs.r_seat(r).unwrap();
    let mut buf = vec![0; capacity as usize];
    assert_eq!(my_fs.r_read(&mut buf).unwrap(), capacity);
    assert_eq!(&buf[..], &data[..capacity as usize]);

    let dev = my_fs.unmountfs();
    utils::disk_destruct(dev);
}
