//! Tag lifecycle management.
//!
//! [`TagManager`] owns the relation between the locks stored for a region's granules and
//! the key embedded in a pointer: it allocates tagged regions, derives random keys and
//! binds them as locks. There is no revoke operation; binding a new key to a granule
//! silently supersedes the old lock, so at most one lock is live per granule.

use crate::Error;
use crate::platform::MemoryTagging;
use crate::region::{TaggedAllocator, TaggedRegion};
use crate::tag::{IncludeMask, Tag, TaggedAddress};
use crate::util::{GRANULE_SIZE, Size};
use log::{debug, info};

/// Establishes and mutates the key/lock relation of tagged regions.
pub struct TagManager<'a, M: MemoryTagging + ?Sized> {
    platform: &'a M,
    include: IncludeMask,
}

impl<'a, M: MemoryTagging + ?Sized> TagManager<'a, M> {
    /// Creates a manager drawing keys from `include`.
    pub fn new(platform: &'a M, include: IncludeMask) -> Self {
        TagManager { platform, include }
    }

    /// Allocates a region whose granules can carry locks.
    ///
    /// Every granule starts with lock [`Tag::UNTAGGED`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the allocator fails. The failure is final;
    /// nothing is retried.
    pub fn allocate_tagged_region<A: TaggedAllocator + ?Sized>(
        &self,
        allocator: &mut A,
        size: Size,
    ) -> Result<TaggedRegion, Error> {
        let region = allocator
            .alloc_tagged_region(size)
            .map_err(|e| Error::AllocationFailure {
                size: size.bytes(),
                source: Box::new(e),
            })?;
        info!("Allocated tagged region of {} at {}", size, region.base());
        Ok(region)
    }

    /// Returns `address` with a freshly generated random key.
    ///
    /// Does not touch memory or locks; calling it twice yields two independent keys.
    pub fn generate_key(&self, address: TaggedAddress) -> TaggedAddress {
        let key = self.platform.generate_tag(address, self.include);
        debug!("generated key {} for {}", key.tag(), address);
        key
    }

    /// Binds the key of `address` as the lock of the granule containing it.
    ///
    /// Must be called before any tag-checked access through `address`.
    ///
    /// # Panics
    ///
    /// Panics if `address` is null.
    pub fn bind_lock(&self, address: TaggedAddress) {
        assert!(!address.is_null(), "cannot bind a lock to the null address");
        let granule = address.granule_base();
        self.platform.set_granule_lock(granule);
        debug!("bound lock {} to granule {}", granule.tag(), granule);
    }

    /// Binds the key of `address` to every granule overlapping `[address, address + len)`.
    pub fn bind_range(&self, address: TaggedAddress, len: usize) {
        let start = address.granule_base();
        let end = address.address() + len;
        let mut granule = start;
        while granule.address() < end {
            self.bind_lock(granule);
            granule = granule.byte_add(GRANULE_SIZE);
        }
    }

    /// Current lock of the granule containing `address`.
    pub fn lock_of(&self, address: TaggedAddress) -> Tag {
        self.platform.granule_lock(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TagCheckFault;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// Minimal tag store: keys count up, locks live in a map.
    #[derive(Default)]
    struct ShadowTags {
        next: Cell<u8>,
        locks: RefCell<HashMap<usize, Tag>>,
    }

    impl MemoryTagging for ShadowTags {
        fn generate_tag(&self, address: TaggedAddress, include: IncludeMask) -> TaggedAddress {
            loop {
                let t = Tag::new(self.next.get() % 16).unwrap();
                self.next.set(self.next.get().wrapping_add(1));
                if include.contains(t) {
                    return address.with_tag(t);
                }
            }
        }
        fn set_granule_lock(&self, address: TaggedAddress) {
            assert_eq!(address.address() % GRANULE_SIZE, 0);
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
        fn read_byte(&self, _address: TaggedAddress) -> Result<u8, TagCheckFault> {
            Ok(0)
        }
        fn write_byte(&self, _address: TaggedAddress, _value: u8) -> Result<(), TagCheckFault> {
            Ok(())
        }
    }

    #[test]
    fn generate_key_does_not_touch_locks() {
        let tags = ShadowTags::default();
        let manager = TagManager::new(&tags, IncludeMask::DEFAULT);
        let base = TaggedAddress::untagged(0x1000);
        let a = manager.generate_key(base);
        let b = manager.generate_key(base);
        assert_eq!(a.address(), base.address());
        assert_eq!(b.address(), base.address());
        assert_ne!(a.tag(), b.tag());
        assert!(tags.locks.borrow().is_empty());
        assert_eq!(manager.lock_of(base), Tag::UNTAGGED);
    }

    #[test]
    fn bind_lock_aligns_down_and_supersedes() {
        let tags = ShadowTags::default();
        let manager = TagManager::new(&tags, IncludeMask::DEFAULT);
        let first = TaggedAddress::new(0x1007, Tag::new(3).unwrap());
        manager.bind_lock(first);
        assert_eq!(manager.lock_of(TaggedAddress::untagged(0x1000)).value(), 3);
        manager.bind_lock(first.with_tag(Tag::new(9).unwrap()));
        assert_eq!(manager.lock_of(first).value(), 9);
        assert_eq!(tags.locks.borrow().len(), 1);
    }

    #[test]
    fn bind_range_covers_partial_granules() {
        let tags = ShadowTags::default();
        let manager = TagManager::new(&tags, IncludeMask::DEFAULT);
        let key = TaggedAddress::new(0x1008, Tag::new(4).unwrap());
        manager.bind_range(key, 0x10);
        assert_eq!(manager.lock_of(TaggedAddress::untagged(0x1000)).value(), 4);
        assert_eq!(manager.lock_of(TaggedAddress::untagged(0x1010)).value(), 4);
        assert_eq!(manager.lock_of(TaggedAddress::untagged(0x1020)), Tag::UNTAGGED);
    }

    #[test]
    #[should_panic(expected = "null address")]
    fn bind_lock_rejects_null() {
        let tags = ShadowTags::default();
        TagManager::new(&tags, IncludeMask::DEFAULT).bind_lock(TaggedAddress::untagged(0));
    }
}
