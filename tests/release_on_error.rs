//! Runs alone in its own test binary, so no other test can map memory at the address a
//! failed run released.
use std::cell::Cell;
use tiktag::platform::{CacheTiming, MemoryTagging, TagCheckControl, TagCheckFault};
use tiktag::tag::{IncludeMask, Tag, TaggedAddress};
use tiktag::util::DEFAULT_SECRET;
use tiktag::{Error, Experiment, ProbeConfig};
use tiktag_sim::{SimulatedMte, sim_allocator};

/// Software model whose tag check rejects the one-time secret store.
struct RejectingSecretStore {
    inner: SimulatedMte,
    rejected: Cell<Option<TaggedAddress>>,
}

impl TagCheckControl for RejectingSecretStore {
    fn detect(&self) -> Result<(), Error> {
        self.inner.detect()
    }

    fn enable_sync_checking(&self, include: IncludeMask) -> Result<(), Error> {
        self.inner.enable_sync_checking(include)
    }
}

impl MemoryTagging for RejectingSecretStore {
    fn generate_tag(&self, address: TaggedAddress, include: IncludeMask) -> TaggedAddress {
        self.inner.generate_tag(address, include)
    }

    fn set_granule_lock(&self, address: TaggedAddress) {
        self.inner.set_granule_lock(address)
    }

    fn granule_lock(&self, address: TaggedAddress) -> Tag {
        self.inner.granule_lock(address)
    }

    fn read_byte(&self, address: TaggedAddress) -> Result<u8, TagCheckFault> {
        self.inner.read_byte(address)
    }

    fn write_byte(&self, address: TaggedAddress, value: u8) -> Result<(), TagCheckFault> {
        if value == DEFAULT_SECRET {
            self.rejected.set(Some(address));
            return Err(TagCheckFault {
                address,
                lock: Tag::UNTAGGED,
            });
        }
        self.inner.write_byte(address, value)
    }
}

impl CacheTiming for RejectingSecretStore {
    fn flush_cache_line(&self, address: TaggedAddress) {
        self.inner.flush_cache_line(address)
    }

    fn read_cycle_counter(&self) -> u64 {
        self.inner.read_cycle_counter()
    }
}

/// Returns `true` if `address` lies inside any mapping of this process.
fn is_mapped(address: usize) -> anyhow::Result<bool> {
    let maps = std::fs::read_to_string("/proc/self/maps")?;
    for line in maps.lines() {
        let range = line.split_whitespace().next().unwrap_or_default();
        if let Some((start, end)) = range.split_once('-') {
            let start = usize::from_str_radix(start, 16)?;
            let end = usize::from_str_radix(end, 16)?;
            if (start..end).contains(&address) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[test]
fn test_failed_setup_unmaps_region() -> anyhow::Result<()> {
    let platform = RejectingSecretStore {
        inner: SimulatedMte::new(0x5eed),
        rejected: Cell::new(None),
    };
    let mut experiment = Experiment::new(&platform, sim_allocator(), ProbeConfig::default());
    let mut sampled = 0;
    let err = experiment.run(|_, _| sampled += 1).unwrap_err();
    assert!(matches!(err, Error::TagCheck(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(sampled, 0);
    assert!(experiment.key().is_none());

    let site = platform.rejected.get().expect("secret store attempted");
    assert!(!is_mapped(site.address())?, "region still mapped after failed run");
    Ok(())
}
