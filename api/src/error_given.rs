//! Errors produced by the shared api layer.
//!
//! The variants below are the failure modes of the backing-file driver and
//! the record (de)serialization helpers. Layer-specific error enums in the
//! core crate embed this type via `#[from]`, so `?` converts upward along
//! the layer ladder.

use std::io;
use thiserror::Error;

/// Error type used in the api crate.
///
/// The `#[error]` tag derives the `Display` implementation per variant; the
/// `#[from]` tag derives a `From` implementation so `io::Error` and
/// `bincode::Error` convert with the `?` operator.
#[derive(Error, Debug)]
pub enum APIError {
    /// Error caused when performing IO against the backing file
    #[error("Issue using IO in the controller layer")]
    APIO(#[from] io::Error),
    /// Error caused when (de)serializing an on-disk record
    #[error("Issue with serialization in the controller layer")]
    APISerialize(#[from] bincode::Error),
    /// Invalid input to the controller layer
    #[error("Invalid controller input: {0}")]
    ControllerInput(&'static str),
    /// Invalid input to a block or buffer operation
    #[error("Invalid block input: {0}")]
    BlockInput(&'static str),

    /// Catch-all for errors that do not warrant their own variant.
    /// Kept transparent so the source error's message shows through.
    #[error(transparent)]
    Other(#[from] anyhow::Error), // source and Display delegate to anyhow::Error
}

/// Define a generic alias for a `Result` with the error type `APIError`.
pub type Result<T> = std::result::Result<T, APIError>;
