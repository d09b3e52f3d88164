use log::{debug, trace};
use rand::Rng as _;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use tiktag_core::Error;
use tiktag_core::platform::{CacheTiming, MemoryTagging, TagCheckControl, TagCheckFault};
use tiktag_core::region::MmapAllocator;
use tiktag_core::tag::{IncludeMask, Tag, TaggedAddress};
use tiktag_core::util::{CL_SIZE, GRANULE_MASK, Rng};

/// Allocator for the simulator. Locks live in shadow storage, so plain memory suffices.
pub type SimAllocator = MmapAllocator;

/// Creates the allocator matching [`SimulatedMte`].
pub const fn sim_allocator() -> SimAllocator {
    MmapAllocator::untagged()
}

/// Latency model of the simulated cache, in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimLatency {
    /// Cost of a read hitting a cached line
    pub hit: u64,
    /// Cost of a read from a cold line
    pub miss: u64,
    /// Upper bound of the uniform noise added to every access
    pub jitter: u64,
}

impl Default for SimLatency {
    fn default() -> Self {
        SimLatency {
            hit: 40,
            miss: 200,
            jitter: 8,
        }
    }
}

/// In-process model of an MTE-capable core.
///
/// Locks are kept per granule in a map next to the real memory, which must come from a
/// plain mapping (see [`sim_allocator`]). Tag checks are evaluated in software and a
/// mismatch is returned as [`TagCheckFault`] instead of a signal, so tests can observe
/// faults without losing the process. The cycle counter is a virtual clock advanced only
/// by simulated reads.
///
/// Like the kernel, the model starts with every tag excluded from generation and tag
/// checking disabled; [`TagCheckControl::enable_sync_checking`] sets both.
#[derive(Debug)]
pub struct SimulatedMte {
    capable: bool,
    honor_sync: bool,
    sync: Cell<bool>,
    process_mask: Cell<IncludeMask>,
    locks: RefCell<HashMap<usize, Tag>>,
    cached: RefCell<HashSet<usize>>,
    clock: Cell<u64>,
    faults: Cell<usize>,
    latency: SimLatency,
    rng: RefCell<Rng>,
}

impl SimulatedMte {
    /// Creates a capable core whose keys and jitter derive from `seed`.
    pub fn new(seed: u64) -> Self {
        SimulatedMte {
            capable: true,
            honor_sync: true,
            sync: Cell::new(false),
            process_mask: Cell::new(IncludeMask::from_bits(0)),
            locks: RefCell::new(HashMap::new()),
            cached: RefCell::new(HashSet::new()),
            clock: Cell::new(0),
            faults: Cell::new(0),
            latency: SimLatency::default(),
            rng: RefCell::new(Rng::from_seed(seed)),
        }
    }

    /// A core without memory tagging.
    pub fn without_capability() -> Self {
        SimulatedMte {
            capable: false,
            ..Self::new(0)
        }
    }

    /// Accepts the synchronous mode request but never checks tags, like a kernel that
    /// silently falls back to no checking.
    pub fn ignoring_tag_checks(mut self) -> Self {
        self.honor_sync = false;
        self
    }

    /// Replaces the latency model.
    pub fn with_latency(mut self, latency: SimLatency) -> Self {
        self.latency = latency;
        self
    }

    /// Whether synchronous tag checking is active.
    pub fn sync_checking(&self) -> bool {
        self.sync.get()
    }

    /// Number of tag checks that failed so far.
    pub fn faults(&self) -> usize {
        self.faults.get()
    }

    /// Returns `true` if the line holding `address` is currently cached.
    pub fn is_cached(&self, address: TaggedAddress) -> bool {
        self.cached.borrow().contains(&line_of(address))
    }

    fn check(&self, address: TaggedAddress) -> Result<(), TagCheckFault> {
        if !self.sync.get() {
            return Ok(());
        }
        let lock = self.granule_lock(address);
        if address.tag().admitted_by(lock) {
            return Ok(());
        }
        self.faults.set(self.faults.get() + 1);
        trace!("tag check failed at {} (lock {})", address, lock);
        Err(TagCheckFault { address, lock })
    }

    /// Advances the clock by the cost of touching the line of `address` and warms it.
    fn access(&self, address: TaggedAddress) {
        let hit = !self.cached.borrow_mut().insert(line_of(address));
        self.tick(if hit { self.latency.hit } else { self.latency.miss });
    }

    fn tick(&self, base: u64) {
        let noise = if self.latency.jitter == 0 {
            0
        } else {
            self.rng.borrow_mut().random_range(0..=self.latency.jitter)
        };
        self.clock.set(self.clock.get() + base + noise);
    }
}

fn line_of(address: TaggedAddress) -> usize {
    address.address() / CL_SIZE
}

impl TagCheckControl for SimulatedMte {
    fn detect(&self) -> Result<(), Error> {
        if self.capable {
            Ok(())
        } else {
            Err(Error::CapabilityUnavailable)
        }
    }

    fn enable_sync_checking(&self, include: IncludeMask) -> Result<(), Error> {
        if !self.capable {
            return Err(Error::ConfigurationFailure(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "tagged address control not available",
            )));
        }
        self.process_mask.set(include);
        self.sync.set(self.honor_sync);
        debug!(
            "simulated tag checking {} with include mask {:#06x}",
            if self.honor_sync { "sync" } else { "off" },
            include.bits()
        );
        Ok(())
    }
}

impl MemoryTagging for SimulatedMte {
    fn generate_tag(&self, address: TaggedAddress, include: IncludeMask) -> TaggedAddress {
        // irg excludes the union of the process exclusion set and the operand
        let allowed = IncludeMask::from_bits(include.bits() & self.process_mask.get().bits());
        address.with_tag(self.rng.borrow_mut().pick_tag(allowed))
    }

    fn set_granule_lock(&self, address: TaggedAddress) {
        assert_eq!(
            address.address() & GRANULE_MASK,
            0,
            "lock store to unaligned address {}",
            address
        );
        self.locks
            .borrow_mut()
            .insert(address.granule_index(), address.tag());
    }

    fn granule_lock(&self, address: TaggedAddress) -> Tag {
        self.locks
            .borrow()
            .get(&address.granule_index())
            .copied()
            .unwrap_or(Tag::UNTAGGED)
    }

    fn read_byte(&self, address: TaggedAddress) -> Result<u8, TagCheckFault> {
        if let Err(fault) = self.check(address) {
            // the load is squashed before it can fill the line
            self.tick(self.latency.miss);
            return Err(fault);
        }
        self.access(address);
        Ok(unsafe { address.untagged_ptr().read_volatile() })
    }

    fn write_byte(&self, address: TaggedAddress, value: u8) -> Result<(), TagCheckFault> {
        self.check(address)?;
        self.access(address);
        unsafe { address.untagged_ptr().write_volatile(value) };
        Ok(())
    }
}

impl CacheTiming for SimulatedMte {
    fn flush_cache_line(&self, address: TaggedAddress) {
        self.cached.borrow_mut().remove(&line_of(address));
    }

    fn read_cycle_counter(&self) -> u64 {
        self.clock.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiktag_core::region::TaggedAllocator;
    use tiktag_core::util::Size;

    fn enabled(seed: u64) -> SimulatedMte {
        let sim = SimulatedMte::new(seed).with_latency(SimLatency {
            hit: 10,
            miss: 100,
            jitter: 0,
        });
        sim.enable_sync_checking(IncludeMask::DEFAULT)
            .expect("enable");
        sim
    }

    #[test]
    fn capability_is_reported() {
        assert!(SimulatedMte::new(1).detect().is_ok());
        let sim = SimulatedMte::without_capability();
        assert!(matches!(sim.detect(), Err(Error::CapabilityUnavailable)));
        assert!(matches!(
            sim.enable_sync_checking(IncludeMask::DEFAULT),
            Err(Error::ConfigurationFailure(_))
        ));
    }

    #[test]
    fn generation_is_empty_until_enabled() {
        let sim = SimulatedMte::new(3);
        let a = TaggedAddress::untagged(0x1000);
        assert_eq!(sim.generate_tag(a, IncludeMask::DEFAULT).tag(), Tag::UNTAGGED);
        sim.enable_sync_checking(IncludeMask::DEFAULT).unwrap();
        for _ in 0..64 {
            let tag = sim.generate_tag(a, IncludeMask::DEFAULT).tag();
            assert!(IncludeMask::DEFAULT.contains(tag));
        }
    }

    #[test]
    fn mismatched_access_faults_without_touching_memory() -> anyhow::Result<()> {
        let sim = enabled(5);
        let region = sim_allocator().alloc_tagged_region(Size::Pages(1))?;
        let key = region.base().with_tag(Tag::new(6).unwrap());
        sim.set_granule_lock(key);
        sim.write_byte(key, 0x11)?;
        assert_eq!(sim.read_byte(key)?, 0x11);

        let fault = sim.write_byte(key.byte_add(0x10), 0x22).unwrap_err();
        assert_eq!(fault.lock, Tag::UNTAGGED);
        assert_eq!(sim.read_byte(region.base().byte_add(0x10))?, 0);
        assert!(sim.read_byte(region.base()).is_err());
        assert_eq!(sim.faults(), 2);
        region.dealloc();
        Ok(())
    }

    #[test]
    fn disabled_checking_lets_mismatches_through() -> anyhow::Result<()> {
        let sim = SimulatedMte::new(5).ignoring_tag_checks();
        sim.enable_sync_checking(IncludeMask::DEFAULT)?;
        assert!(!sim.sync_checking());
        let region = sim_allocator().alloc_tagged_region(Size::Pages(1))?;
        let key = region.base().with_tag(Tag::new(6).unwrap());
        sim.write_byte(key.byte_add(0x10), 0x22)?;
        assert_eq!(sim.faults(), 0);
        region.dealloc();
        Ok(())
    }

    #[test]
    fn flush_makes_the_next_read_slow() -> anyhow::Result<()> {
        let sim = enabled(9);
        let region = sim_allocator().alloc_tagged_region(Size::Pages(1))?;
        let p = region.base().byte_add(0x40);
        let t0 = sim.read_cycle_counter();
        sim.read_byte(p)?;
        let t1 = sim.read_cycle_counter();
        sim.read_byte(p)?;
        let t2 = sim.read_cycle_counter();
        assert_eq!(t1 - t0, 100);
        assert_eq!(t2 - t1, 10);
        assert!(sim.is_cached(p));
        sim.flush_cache_line(p);
        assert!(!sim.is_cached(p));
        sim.read_byte(p)?;
        assert_eq!(sim.read_cycle_counter() - t2, 100);
        region.dealloc();
        Ok(())
    }

    #[test]
    fn squashed_read_does_not_fill_the_line() -> anyhow::Result<()> {
        let sim = enabled(2);
        let region = sim_allocator().alloc_tagged_region(Size::Pages(1))?;
        let key = region.base().byte_add(0x80).with_tag(Tag::new(3).unwrap());
        assert!(sim.read_byte(key).is_err());
        assert!(!sim.is_cached(key));
        region.dealloc();
        Ok(())
    }

    #[test]
    #[should_panic(expected = "unaligned")]
    fn unaligned_lock_store_panics() {
        enabled(1).set_granule_lock(TaggedAddress::untagged(0x1008));
    }
}
