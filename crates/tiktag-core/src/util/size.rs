use super::page_size;

/// Region size representation supporting bytes and pages.
///
/// Pages are resolved against the running system's page size, so `Size::Pages(2)`
/// is 8 KB on a 4 KB kernel and 32 KB on a 16 KB kernel.
///
/// # Examples
///
/// ```
/// use tiktag_core::util::{Size, page_size};
///
/// assert_eq!(Size::B(64).bytes(), 64);
/// assert_eq!(Size::KB(8).bytes(), 8192);
/// assert_eq!(Size::Pages(2).bytes(), 2 * page_size());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Size {
    /// Size in bytes
    B(usize),
    /// Size in kilobytes (1 KB = 1024 bytes)
    KB(usize),
    /// Size in system pages
    Pages(usize),
}

impl Size {
    /// Converts this size to bytes.
    ///
    /// # Panics
    ///
    /// Panics if the size does not fit in `usize`. Use [`Size::checked_bytes`] for
    /// sizes taken from user input.
    pub fn bytes(&self) -> usize {
        self.checked_bytes()
            .unwrap_or_else(|| panic!("{:?} overflows usize", self))
    }

    /// Converts this size to bytes, returning `None` on overflow.
    pub fn checked_bytes(&self) -> Option<usize> {
        match self {
            Size::B(bytes) => Some(*bytes),
            Size::KB(kb) => kb.checked_mul(1 << 10),
            Size::Pages(pages) => pages.checked_mul(page_size()),
        }
    }

    /// Returns `true` if the size covers a whole number of pages.
    pub fn is_page_aligned(&self) -> bool {
        self.bytes().is_multiple_of(page_size())
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::B(bytes) => write!(f, "{} B", bytes),
            Size::KB(kb) => write!(f, "{} KB", kb),
            Size::Pages(pages) => match self.checked_bytes() {
                Some(bytes) => write!(f, "{} pages ({} B)", pages, bytes),
                None => write!(f, "{} pages", pages),
            },
        }
    }
}
