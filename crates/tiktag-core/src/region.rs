//! Tagged memory regions and the allocators that produce them.
//!
//! This module defines the [`TaggedAllocator`] trait and the anonymous-mapping
//! [`MmapAllocator`] shared by the platform crates.

use crate::tag::TaggedAddress;
use crate::util::{GRANULE_SIZE, Size};
use log::debug;
use std::ptr::null_mut;

/// A contiguous anonymous mapping subdivided into tag granules.
///
/// Freshly mapped regions carry [`Tag::UNTAGGED`](crate::tag::Tag::UNTAGGED) as lock on
/// every granule.
#[derive(Debug)]
pub struct TaggedRegion {
    ptr: *mut u8,
    len: usize,
}

impl TaggedRegion {
    /// Wraps an existing mapping.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes of readable and writable memory that stays mapped
    /// for the lifetime of the region.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        TaggedRegion { ptr, len }
    }

    /// Maps `len` bytes of anonymous private memory with `PROT_READ | PROT_WRITE | extra_prot`.
    ///
    /// The memory is zeroed by the kernel.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `mmap` fails.
    pub fn mmap(len: usize, extra_prot: libc::c_int) -> std::io::Result<Self> {
        let p = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | extra_prot,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        let ptr = p as *mut u8;
        // tagged addresses are rebuilt from integers, so the provenance must be exposed
        let _ = ptr.expose_provenance();
        debug!("mapped {} bytes at {:p} (prot extra {:#x})", len, ptr, extra_prot);
        Ok(TaggedRegion { ptr, len })
    }

    /// Base address of the region, carrying the default tag.
    pub fn base(&self) -> TaggedAddress {
        TaggedAddress::untagged(self.ptr as usize)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of tag granules in the region.
    pub fn granules(&self) -> usize {
        self.len / GRANULE_SIZE
    }

    /// Returns `true` if `address` lies inside the region, ignoring its tag.
    pub fn contains(&self, address: TaggedAddress) -> bool {
        let start = self.ptr as usize;
        (start..start + self.len).contains(&address.address())
    }

    /// Unmaps the region. Consumes self.
    pub fn dealloc(self) {
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}

/// Trait for strategies that provide tagged memory regions.
///
/// # Associated Types
///
/// * `Error` - The error type returned by allocation. Must implement [`std::error::Error`].
pub trait TaggedAllocator {
    /// The error type returned by allocation operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Allocates a region of `size` bytes whose granules can carry locks.
    ///
    /// # Errors
    ///
    /// May return an error if:
    /// * The mapping cannot be created (insufficient memory)
    /// * The kernel rejects the tagging protection flag
    fn alloc_tagged_region(&mut self, size: Size) -> Result<TaggedRegion, Self::Error>;
}

/// Allocator mapping anonymous memory with an extra protection flag.
///
/// Hardware platforms pass `PROT_MTE`; the simulator passes `0` and keeps locks in
/// shadow storage.
#[derive(Debug, Clone, Copy)]
pub struct MmapAllocator {
    extra_prot: libc::c_int,
}

impl MmapAllocator {
    /// Creates an allocator that adds `extra_prot` to every mapping.
    pub const fn new(extra_prot: libc::c_int) -> Self {
        MmapAllocator { extra_prot }
    }

    /// Allocator for plain memory without hardware tag storage.
    pub const fn untagged() -> Self {
        Self::new(0)
    }
}

impl TaggedAllocator for MmapAllocator {
    type Error = std::io::Error;
    fn alloc_tagged_region(&mut self, size: Size) -> Result<TaggedRegion, Self::Error> {
        assert!(size.bytes() > 0, "Size must be greater than 0");
        assert!(
            size.is_page_aligned(),
            "Size {} must be a multiple of the page size",
            size
        );
        TaggedRegion::mmap(size.bytes(), self.extra_prot)
    }
}
