//! Platform capability traits.
//!
//! The hardware primitives the probe depends on are irreducible: random tag insertion,
//! lock store, cache maintenance and the cycle counter. Each is a named method on one of
//! the traits below, implemented per target by a platform crate (`tiktag-aarch64` for real
//! MTE hardware, `tiktag-sim` for the software model used in tests).
//!
//! - [`TagCheckControl`] - capability detection and tag-check mode configuration
//! - [`MemoryTagging`] - key generation, lock store/load, and tag-checked byte accesses
//! - [`CacheTiming`] - cache line eviction and the cycle counter
//!
//! [`Platform`] is the union of all three and is implemented for every type that provides them.

use crate::Error;
use crate::tag::{IncludeMask, Tag, TaggedAddress};

/// A tag check that failed synchronously.
///
/// Platforms that deliver tag-check faults as signals never construct this; the process is
/// terminated at the offending access instead.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[error("tag check fault at {address}: key {} does not match lock {lock}", .address.tag())]
pub struct TagCheckFault {
    /// The tagged address that was accessed
    pub address: TaggedAddress,
    /// Lock of the granule at the time of the access
    pub lock: Tag,
}

/// Capability detection and tag-check mode configuration.
pub trait TagCheckControl {
    /// Checks that the CPU and kernel support memory tagging.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] if tagging is not supported.
    fn detect(&self) -> Result<(), Error>;

    /// Enables tagged addressing with synchronous tag-check faults for this process.
    ///
    /// `include` restricts the tags that random key generation may return.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationFailure`] if the mode cannot be enabled.
    fn enable_sync_checking(&self, include: IncludeMask) -> Result<(), Error>;
}

/// Key generation, lock management and tag-checked accesses.
pub trait MemoryTagging {
    /// Returns `address` with a random key drawn from the tags not excluded by `include`.
    ///
    /// Pure address transformation: no memory or tag storage is touched.
    fn generate_tag(&self, address: TaggedAddress, include: IncludeMask) -> TaggedAddress;

    /// Stores the key of `address` as the lock of its granule.
    ///
    /// `address` must be granule aligned and point into memory mapped with tagging enabled.
    fn set_granule_lock(&self, address: TaggedAddress);

    /// Loads the lock of the granule containing `address`.
    fn granule_lock(&self, address: TaggedAddress) -> Tag;

    /// Reads one byte through `address`, subject to the tag check.
    ///
    /// # Errors
    ///
    /// Returns a [`TagCheckFault`] if the platform surfaces mismatches in-process.
    fn read_byte(&self, address: TaggedAddress) -> Result<u8, TagCheckFault>;

    /// Writes one byte through `address`, subject to the tag check.
    ///
    /// # Errors
    ///
    /// Returns a [`TagCheckFault`] if the platform surfaces mismatches in-process.
    fn write_byte(&self, address: TaggedAddress, value: u8) -> Result<(), TagCheckFault>;
}

/// Cache maintenance and cycle counting.
pub trait CacheTiming {
    /// Evicts the cache line holding `address` from all cache levels.
    ///
    /// Must not return before the eviction is complete, so that a following timed read
    /// starts from a cold line.
    fn flush_cache_line(&self, address: TaggedAddress);

    /// Reads the cycle counter.
    ///
    /// Must be ordered with respect to surrounding memory accesses: no load issued before
    /// the call may complete after it and vice versa.
    fn read_cycle_counter(&self) -> u64;
}

/// Everything the probe needs from a target.
pub trait Platform: TagCheckControl + MemoryTagging + CacheTiming {}

impl<T: TagCheckControl + MemoryTagging + CacheTiming> Platform for T {}
