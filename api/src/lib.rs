//! Shared surface of the chainfs virtual file system.
//!
//! This crate contains the backing-file driver, the on-disk record types and
//! the traits the layered implementation in `chainfs_core` provides. Keeping
//! these in their own crate ensures the integration tests under `fs-tests/`
//! exercise the implementation exclusively through its public contract.

#![deny(missing_docs)]

//Implementation of the backing-file driver
pub mod controller;
pub mod error_given;

//Basic modules for types
pub mod types;

//Traits the core crate implements
pub mod fs;
