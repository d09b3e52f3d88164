//! Logical tags and tagged addresses.
//!
//! A pointer carries its *key* in bits 56..=59 of the pointer value, the part of the top
//! byte the CPU ignores for address translation. The memory it points to carries a *lock*
//! per 16-byte granule. [`TaggedAddress`] keeps both halves apart as a value pair and only
//! combines them when a raw pointer value is needed.
//!
//! ```text
//!  63    60 59   56 55                                              0
//! ┌────────┬───────┬─────────────────────────────────────────────────┐
//! │ ignored│  tag  │                 virtual address                 │
//! └────────┴───────┴─────────────────────────────────────────────────┘
//! ```

use crate::util::{ADDR_MASK, GRANULE_MASK, GRANULE_SIZE, TAG_MASK, TAG_SHIFT};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 4-bit logical tag, used both as pointer key and as granule lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tag(u8);

impl Tag {
    /// Tag of freshly mapped memory and of plain pointers.
    pub const UNTAGGED: Tag = Tag(0);
    /// Reserved lock value that admits every key.
    pub const MATCH_ALL: Tag = Tag(0xF);
    /// Number of distinct tag values.
    pub const COUNT: usize = 16;

    /// Creates a tag, returning `None` if `value` does not fit in four bits.
    pub const fn new(value: u8) -> Option<Tag> {
        if (value as usize) < Self::COUNT {
            Some(Tag(value))
        } else {
            None
        }
    }

    /// The numeric tag value.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns `true` if an access with key `self` is admitted by `lock`.
    pub fn admitted_by(self, lock: Tag) -> bool {
        self == lock || lock == Tag::MATCH_ALL
    }
}

impl TryFrom<u8> for Tag {
    type Error = String;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tag::new(value).ok_or_else(|| format!("tag {} out of range", value))
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Set of tags that random key generation is allowed to produce.
///
/// Bit `n` set means tag `n` may be generated. The same mask is handed to the kernel
/// when enabling tag checking, and its complement is the exclusion operand of `irg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeMask(u16);

impl IncludeMask {
    /// Every tag except [`Tag::UNTAGGED`] and [`Tag::MATCH_ALL`].
    pub const DEFAULT: IncludeMask = IncludeMask(0x7ffe);

    /// Creates a mask from raw bits.
    pub const fn from_bits(bits: u16) -> Self {
        IncludeMask(bits)
    }

    /// Raw mask bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Exclusion mask as expected by the `irg` instruction.
    pub const fn exclusion_bits(self) -> u64 {
        (!self.0) as u64
    }

    /// Returns `true` if `tag` may be generated.
    pub fn contains(self, tag: Tag) -> bool {
        self.0 & (1 << tag.value()) != 0
    }

    /// Iterates over the allowed tags in ascending order.
    pub fn tags(self) -> impl Iterator<Item = Tag> {
        (0..Tag::COUNT as u8)
            .map(Tag)
            .filter(move |t| self.contains(*t))
    }
}

impl Default for IncludeMask {
    fn default() -> Self {
        IncludeMask::DEFAULT
    }
}

/// An address together with the key tag embedded in its top byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TaggedAddress {
    address: usize,
    tag: Tag,
}

impl TaggedAddress {
    /// Pairs an (untagged) address with a tag. Any tag bits already present in
    /// `address` are discarded.
    pub fn new(address: usize, tag: Tag) -> Self {
        TaggedAddress {
            address: (address as u64 & ADDR_MASK) as usize,
            tag,
        }
    }

    /// Plain address carrying [`Tag::UNTAGGED`].
    pub fn untagged(address: usize) -> Self {
        Self::new(address, Tag::UNTAGGED)
    }

    /// Splits a raw pointer value into address and tag.
    pub fn from_raw(raw: u64) -> Self {
        TaggedAddress {
            address: (raw & ADDR_MASK) as usize,
            tag: Tag(((raw & TAG_MASK) >> TAG_SHIFT) as u8),
        }
    }

    /// Combines address and tag into a raw pointer value.
    pub fn to_raw(self) -> u64 {
        (self.address as u64 & ADDR_MASK) | ((self.tag.value() as u64) << TAG_SHIFT)
    }

    /// The address without tag bits.
    pub fn address(self) -> usize {
        self.address
    }

    /// The embedded key.
    pub fn tag(self) -> Tag {
        self.tag
    }

    /// Same address, different key.
    pub fn with_tag(self, tag: Tag) -> Self {
        TaggedAddress { tag, ..self }
    }

    /// Address `offset` bytes further, keeping the key.
    pub fn byte_add(self, offset: usize) -> Self {
        TaggedAddress {
            address: self.address + offset,
            ..self
        }
    }

    /// Start of the granule containing this address, keeping the key.
    pub fn granule_base(self) -> Self {
        TaggedAddress {
            address: self.address & !GRANULE_MASK,
            ..self
        }
    }

    /// Index of the granule containing this address.
    pub fn granule_index(self) -> usize {
        self.address / GRANULE_SIZE
    }

    /// Returns `true` for the null address, regardless of tag.
    pub fn is_null(self) -> bool {
        self.address == 0
    }

    /// Pointer carrying the key in its top byte.
    ///
    /// Only meaningful on targets that ignore the top byte on access (aarch64 with TBI).
    /// The address must have been exposed by the allocation it belongs to.
    pub fn as_ptr(self) -> *mut u8 {
        std::ptr::with_exposed_provenance_mut(self.to_raw() as usize)
    }

    /// Pointer with the tag bits stripped.
    pub fn untagged_ptr(self) -> *mut u8 {
        std::ptr::with_exposed_provenance_mut(self.address)
    }
}

impl fmt::Display for TaggedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.to_raw())
    }
}
