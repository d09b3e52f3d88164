use log::{debug, info};
use std::arch::asm;
use tiktag_core::Error;
use tiktag_core::platform::{CacheTiming, MemoryTagging, TagCheckControl, TagCheckFault};
use tiktag_core::tag::{IncludeMask, Tag, TaggedAddress};
use tiktag_core::util::GRANULE_MASK;

// uapi constants not exported by libc for every target
const AT_HWCAP2: libc::c_ulong = 26;
const HWCAP2_MTE: libc::c_ulong = 1 << 18;
const PR_SET_TAGGED_ADDR_CTRL: libc::c_int = 55;
const PR_TAGGED_ADDR_ENABLE: libc::c_ulong = 1;
const PR_MTE_TCF_SYNC: libc::c_ulong = 1 << 1;
const PR_MTE_TAG_SHIFT: u32 = 3;

/// MTE hardware of the running core.
///
/// Stateless: capability and tag-check mode live in the kernel and the CPU, and
/// `prctl` applies to the calling thread. Run the whole experiment on one thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct MtePlatform;

impl MtePlatform {
    /// Creates the platform handle. Nothing is configured until
    /// [`TagCheckControl::enable_sync_checking`].
    pub const fn new() -> Self {
        MtePlatform
    }
}

impl TagCheckControl for MtePlatform {
    fn detect(&self) -> Result<(), Error> {
        let hwcap2 = unsafe { libc::getauxval(AT_HWCAP2) };
        debug!("AT_HWCAP2 = {:#x}", hwcap2);
        if hwcap2 & HWCAP2_MTE == 0 {
            return Err(Error::CapabilityUnavailable);
        }
        Ok(())
    }

    fn enable_sync_checking(&self, include: IncludeMask) -> Result<(), Error> {
        let ctrl = PR_TAGGED_ADDR_ENABLE
            | PR_MTE_TCF_SYNC
            | ((include.bits() as libc::c_ulong) << PR_MTE_TAG_SHIFT);
        let ret = unsafe { libc::prctl(PR_SET_TAGGED_ADDR_CTRL, ctrl, 0, 0, 0) };
        if ret != 0 {
            return Err(Error::ConfigurationFailure(std::io::Error::last_os_error()));
        }
        info!("PR_SET_TAGGED_ADDR_CTRL = {:#x}", ctrl);
        Ok(())
    }
}

impl MemoryTagging for MtePlatform {
    fn generate_tag(&self, address: TaggedAddress, include: IncludeMask) -> TaggedAddress {
        let tagged: u64;
        unsafe {
            asm!(
                ".arch_extension memtag",
                "irg {out}, {inp}, {excl}",
                inp = in(reg) address.to_raw(),
                excl = in(reg) include.exclusion_bits(),
                out = lateout(reg) tagged,
                options(nomem, nostack, preserves_flags),
            );
        }
        TaggedAddress::from_raw(tagged)
    }

    fn set_granule_lock(&self, address: TaggedAddress) {
        assert_eq!(
            address.address() & GRANULE_MASK,
            0,
            "lock store to unaligned address {}",
            address
        );
        unsafe {
            asm!(
                ".arch_extension memtag",
                "stg {ptr}, [{ptr}]",
                ptr = in(reg) address.as_ptr(),
                options(nostack, preserves_flags),
            );
        }
    }

    fn granule_lock(&self, address: TaggedAddress) -> Tag {
        let mut loaded = address.untagged_ptr() as u64;
        unsafe {
            asm!(
                ".arch_extension memtag",
                "ldg {val}, [{val}]",
                val = inout(reg) loaded,
                options(nostack, readonly, preserves_flags),
            );
        }
        TaggedAddress::from_raw(loaded).tag()
    }

    fn read_byte(&self, address: TaggedAddress) -> Result<u8, TagCheckFault> {
        // a mismatch raises SIGSEGV here
        Ok(unsafe { address.as_ptr().read_volatile() })
    }

    fn write_byte(&self, address: TaggedAddress, value: u8) -> Result<(), TagCheckFault> {
        unsafe { address.as_ptr().write_volatile(value) };
        Ok(())
    }
}

impl CacheTiming for MtePlatform {
    fn flush_cache_line(&self, address: TaggedAddress) {
        unsafe {
            asm!(
                "dc civac, {ptr}",
                "dsb ish",
                "isb",
                ptr = in(reg) address.as_ptr(),
                options(nostack, preserves_flags),
            );
        }
    }

    // The DSB waits for outstanding loads, so a closing read covers the whole timed
    // access. The trailing ISB keeps later loads from starting before the counter is read.
    fn read_cycle_counter(&self) -> u64 {
        let cycles: u64;
        unsafe {
            asm!(
                "dsb ish",
                "isb",
                "mrs {t}, cntvct_el0",
                "isb",
                t = out(reg) cycles,
                options(nostack, preserves_flags),
            );
        }
        cycles
    }
}
