//! Cache-timing probe against Arm MTE tag checks.
//!
//! Facade over the tiktag workspace: re-exports [`tiktag_core`] and, behind features, the
//! platform crates.
//!
//! - `sim` (default) - the software model, [`sim`]
//! - `aarch64` - MTE hardware support, [`aarch64`]

pub use tiktag_core::*;

#[cfg(feature = "aarch64")]
pub use tiktag_aarch64 as aarch64;
#[cfg(feature = "sim")]
pub use tiktag_sim as sim;
