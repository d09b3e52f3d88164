//! The deliberate boundary fault.

use crate::platform::{MemoryTagging, TagCheckFault};
use crate::tag::TaggedAddress;
use crate::util::GRANULE_SIZE;
use log::warn;
use serde::Serialize;

/// Value written by [`trigger_boundary_fault`].
pub const BOUNDARY_WRITE_VALUE: u8 = 0x55;

/// What happened if [`trigger_boundary_fault`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultOutcome {
    /// The platform rejected the write and reported it in-process.
    Reported(TagCheckFault),
    /// The write went through. Tag checking was not active in synchronous mode.
    NotRaised,
}

/// Writes one byte just past the granule `pointer` was bound to.
///
/// **Terminates the process** on hardware with synchronous tag checking: the granule at
/// `pointer + 16` still carries its old lock, the write mismatches, and the kernel delivers
/// `SIGSEGV` at this exact store. No handler is installed and none must be; callers that
/// want to observe the fault do so at the process level (exit signal).
///
/// Returning at all is a result of its own: either the platform surfaces faults in-process
/// ([`FaultOutcome::Reported`]) or the fault did not occur ([`FaultOutcome::NotRaised`]).
pub fn trigger_boundary_fault<M: MemoryTagging + ?Sized>(
    platform: &M,
    pointer: TaggedAddress,
) -> FaultOutcome {
    let target = pointer.granule_base().byte_add(GRANULE_SIZE);
    match platform.write_byte(target, BOUNDARY_WRITE_VALUE) {
        Err(fault) => FaultOutcome::Reported(fault),
        Ok(()) => {
            warn!("write to {} did not fault", target);
            FaultOutcome::NotRaised
        }
    }
}
