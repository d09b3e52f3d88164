//! Utility functions and types used throughout tiktag.
//!
//! This module provides:
//! - [`Size`] - Region size representation
//! - Architectural constants ([`GRANULE_SIZE`], [`TAG_SHIFT`], ...) and [`page_size`]
//! - Progress reporting utilities ([`NamedProgress`])
//! - Seedable random number generation ([`Rng`])

mod constants;
mod named_progress;
mod rng;
mod size;

pub use self::constants::*;
pub use self::named_progress::NamedProgress;
pub use self::rng::Rng;
pub use self::size::Size;
