//! chainfs: a virtual file system persisted inside one ordinary host file.
//!
//! The implementation is a ladder of four layers, each a module exporting a
//! filesystem struct that wraps the layer below and re-implements its
//! traits by delegation:
//!
//! 1. [`a_block_support`]: fixed-size blocks with chain headers,
//!    first-fit allocation over an in-memory free map.
//! 2. [`b_region_support`]: variable-length byte streams (regions) over
//!    block chains, behind one shared cursor.
//! 3. [`c_dirs_support`]: the namespace, encoded inside regions as
//!    directory entries and metadata records, plus path navigation.
//! 4. [`d_file_support`]: open files, a descriptor table multiplexed over
//!    the shared cursor, and the POSIX-style call surface.
//!
//! The traits live in the `chainfs_api` crate together with the
//! backing-file driver and the on-disk record types; the integration tests
//! under `api/fs-tests/` are shared into the modules here by `#[path]`.

#![deny(missing_docs)]

pub mod a_block_support;
pub mod b_region_support;
pub mod c_dirs_support;
pub mod d_file_support;

pub mod error_fs;
