//! # Tiktag Core
//!
//! `tiktag-core` is the platform-independent part of tiktag, a timing probe against the
//! Arm Memory Tagging Extension (MTE). It manages the key/lock relation of tagged memory
//! and measures cache-timing differences of accesses through tagged pointers.
//!
//! ## Architecture Overview
//!
//! Hardware access is abstracted by three traits in [`platform`]:
//!
//! - [`platform::TagCheckControl`] - Detects tagging support and enables synchronous
//!   tag checking for the calling thread.
//!
//! - [`platform::MemoryTagging`] - Generates random keys, stores and loads granule locks
//!   and performs tag-checked byte accesses.
//!
//! - [`platform::CacheTiming`] - Evicts cache lines and reads the cycle counter.
//!
//! Allocation of taggable memory goes through [`region::TaggedAllocator`].
//!
//! ## Main Components
//!
//! - [`lifecycle::TagManager`] - Allocates tagged regions, generates keys and binds them
//!   as locks.
//!
//! - [`oracle::Oracle`] - The flush, time, read, time probe and its sampling loop.
//!
//! - [`fault::trigger_boundary_fault`] - The deliberate out-of-granule write that ends a
//!   hardware run with `SIGSEGV`.
//!
//! - [`stats`] and [`classify`] - Post-processing of timing samples.
//!
//! - [`Experiment`] - Orchestrates all of the above for one [`ProbeConfig`].
//!
//! ## Platform Support
//!
//! Real measurements need an AArch64 Linux system with MTE (`tiktag-aarch64`). Everything
//! in this crate also runs against the in-process simulator (`tiktag-sim`).

#![warn(missing_docs)]

pub mod classify;
mod config;
mod error;
mod experiment;
pub mod fault;
pub mod lifecycle;
pub mod oracle;
pub mod platform;
pub mod region;
pub mod stats;
pub mod tag;
pub mod util;

pub use config::{ConfigError, ProbeConfig};
pub use error::{EXIT_FAILURE, Error, Result};
pub use experiment::{Experiment, ExperimentData, SiteData};
