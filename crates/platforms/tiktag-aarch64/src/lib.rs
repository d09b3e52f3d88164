//! Arm Memory Tagging Extension platform for tiktag.
//!
//! Implements the [`tiktag_core::platform`] traits with the MTE instructions (`irg`, `stg`,
//! `ldg`), data cache maintenance by virtual address and the generic timer's virtual
//! counter. Tag checking is configured through `prctl` and tagged memory is obtained with
//! `mmap(PROT_MTE)`.
//!
//! Tag-check faults are delivered by the kernel as `SIGSEGV` at the faulting access, so
//! [`MtePlatform`] never returns [`tiktag_core::platform::TagCheckFault`]; a mismatched
//! access ends the process.
//!
//! # Platform Requirements
//!
//! - AArch64 Linux 5.10 or newer built with `CONFIG_ARM64_MTE`
//! - A CPU implementing FEAT_MTE2 (`HWCAP2_MTE`)
//!
//! On every other target only [`PROT_MTE`] and [`mte_allocator`] are available.

#![warn(missing_docs)]

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
mod mte;

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
pub use mte::MtePlatform;

use tiktag_core::region::MmapAllocator;

/// `mmap` protection flag requesting tag storage for the mapping.
pub const PROT_MTE: libc::c_int = 0x20;

/// Allocator producing mappings with tag storage.
pub const fn mte_allocator() -> MmapAllocator {
    MmapAllocator::new(PROT_MTE)
}
