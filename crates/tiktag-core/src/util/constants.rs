use lazy_static::lazy_static;

/// Size of a tag granule in bytes. Every byte of a granule shares one lock.
pub const GRANULE_SIZE: usize = 16;
/// Mask for extracting the offset within a granule
pub const GRANULE_MASK: usize = GRANULE_SIZE - 1;

/// Bit position of the logical tag inside a pointer value
pub const TAG_SHIFT: u32 = 56;
/// Width of a logical tag in bits
pub const TAG_BITS: u32 = 4;
/// Mask of the logical tag bits inside a pointer value
pub const TAG_MASK: u64 = ((1 << TAG_BITS) - 1) << TAG_SHIFT;
/// Mask of the address bits, i.e. everything below the ignored top byte
pub const ADDR_MASK: u64 = (1 << TAG_SHIFT) - 1;

/// Data cache line size on the reference cores (64 bytes)
pub const CL_SIZE: usize = 64;

/// Number of probes performed against one probe site by default
pub const DEFAULT_PROBE_ITERATIONS: usize = 1000;

/// Upper bound on probes per site. One run keeps every sample in memory.
pub const MAX_PROBE_ITERATIONS: usize = 1 << 24;

/// Value written to the probe site by default
pub const DEFAULT_SECRET: u8 = 0x45;

lazy_static! {
    /// Page size of the running system as reported by `sysconf(_SC_PAGESIZE)`.
    ///
    /// Falls back to 4 KB if the query fails.
    pub static ref PAGE_SIZE: usize = {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 4096 } else { size as usize }
    };
}

/// Returns the page size of the running system.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_and_address_masks_are_disjoint() {
        assert_eq!(TAG_MASK & ADDR_MASK, 0);
        assert_eq!(TAG_MASK, 0x0F00_0000_0000_0000);
    }

    #[test]
    fn page_size_is_granule_aligned() {
        assert!(page_size().is_power_of_two());
        assert_eq!(page_size() % GRANULE_SIZE, 0);
    }
}
