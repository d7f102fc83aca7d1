//! Error types for Vitrine.

use thiserror::Error;

/// Result type alias using Vitrine's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Vitrine operations.
///
/// Every variant is terminal for the operation that raised it and is
/// surfaced synchronously to the caller; nothing is retried internally.
/// A failed acquisition or negotiation never leaves partially acquired
/// resources behind.
#[derive(Error, Debug)]
pub enum Error {
    /// The windowing system failed to set up a GPU context.
    #[error("windowing system GPU context initialization failed")]
    ContextInitFailed,

    /// One or more context-bundle members were absent after initialization.
    #[error("display or rendering context missing after initialization")]
    ContextMissing,

    /// An allocation query carried no capability set.
    #[error("allocation query carried no capabilities")]
    NoCaps,

    /// A capability set did not describe a concrete frame format.
    #[error("capabilities do not describe a concrete frame format")]
    InvalidCaps,

    /// The buffer pool rejected construction or configuration.
    #[error("buffer pool rejected configuration: {0}")]
    ConfigFailed(String),
}
