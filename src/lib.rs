//! Stacksampler - signal-driven statistical CPU profiler
//!
//! This library periodically interrupts the main thread on a CPU-time timer,
//! captures its call stack, and counts how often each distinct stack occurs.
//! Reports use the collapsed-stack text format consumed by flame graph tools.

pub mod capture;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod frequency;
pub mod report;
pub mod sampler;
pub mod symbolize;
pub mod timer;

pub use config::SamplerConfig;
pub use error::{Result, SamplerError};
pub use sampler::{ProfileSnapshot, Sampler, SamplerState, SamplingGuard};
