//! Error types of the layered implementation, one enum per layer.
//!
//! Each layer embeds the errors of the layer below via `#[from]`, so a
//! failure deep in the stack converts upward with the `?` operator while
//! keeping its source chain intact.

use chainfs_api::error_given::APIError;
use thiserror::Error;

///Error type used in the block layer
#[derive(Error, Debug)]
pub enum BlockLayerError {
    ///errors from the controller layer
    #[error("Error in the controller layer")]
    ControllerError(#[from] APIError),

    ///errors regarding input to the block layer
    #[error("Error in the input of the block layer: {0}")]
    BlockLayerInput(&'static str),

    ///no free block is left to allocate
    #[error("No free blocks left on the device")]
    DeviceFull,
}

///Error type used in the region layer
#[derive(Error, Debug)]
pub enum RegionLayerError {
    ///errors from the block layer
    #[error("Error in the block layer")]
    BlockError(#[from] BlockLayerError),

    ///errors regarding input to the region layer
    #[error("Error in the input of the region layer: {0}")]
    RegionLayerInput(&'static str),

    ///a cursor operation was attempted with no region seated
    #[error("No region is seated under the cursor")]
    NoActiveRegion,
}

///Error type used in the directory layer
#[derive(Error, Debug)]
pub enum DirLayerError {
    ///errors from the region layer
    #[error("Error in the region layer")]
    RegionError(#[from] RegionLayerError),

    ///errors from record encoding in the api crate
    #[error("Error in the api layer")]
    ApiError(#[from] APIError),

    ///a path component or residual is not a storable name
    #[error("Invalid name: {0}")]
    InvalidName(&'static str),

    ///a path component did not resolve, or the target is missing
    #[error("Path not found: {0}")]
    PathNotFound(String),

    ///the directory still holds a file or subdirectory
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    ///errors regarding the internal state of the directory layer
    #[error("Error in operation of the directory layer: {0}")]
    DirLayerOp(&'static str),
}

///Error type used in the file layer
#[derive(Error, Debug)]
pub enum FileLayerError {
    ///errors from the directory layer
    #[error("Error in the directory layer")]
    DirError(#[from] DirLayerError),

    ///the descriptor does not refer to an open file
    #[error("Invalid file descriptor: {0}")]
    InvalidDescriptor(usize),

    ///all descriptor slots are occupied
    #[error("The descriptor table is full")]
    DescriptorTableFull,

    ///the path resolved to an existing file under O_EXCL
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    ///the path did not resolve to a file and O_CREATE was absent
    #[error("File not found: {0}")]
    NotFound(String),

    ///catch-all for errors that do not warrant their own variant
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
