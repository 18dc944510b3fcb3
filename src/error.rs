//! Error types for the sampling profiler

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by the sampler and its collaborators
#[derive(Debug, Error)]
pub enum SamplerError {
    /// The timer was armed from a thread other than the process main thread
    #[error("sampling can only be started from the main thread")]
    UnsupportedContext,

    /// `start()` was called on a sampler that is already running
    #[error("sampler is already running")]
    AlreadyRunning,

    /// Another sampler in this process already holds the sampling timer
    #[error("the process sampling timer is already held by another sampler")]
    TimerInUse,

    /// A captured stack could not be turned into a stack key.
    /// Never returned from public sampler operations; counted as a dropped sample.
    #[error("failed to encode stack: {0}")]
    EncodingFailure(String),

    /// The report destination could not be written
    #[error("failed to write report to {}: {source}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Installing the signal handler or programming the timer failed
    #[error("signal timer setup failed: {0}")]
    Signal(#[from] Errno),

    /// The process exit hook could not be registered
    #[error("failed to register the process exit hook")]
    ExitHook,

    /// Sampler configuration was rejected
    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SamplerError>;
