use crate::Error;
use crate::tag::{IncludeMask, Tag};
use crate::util::{
    DEFAULT_PROBE_ITERATIONS, DEFAULT_SECRET, GRANULE_SIZE, MAX_PROBE_ITERATIONS, Size, page_size,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Errors that can occur when loading a probe configuration.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

/// Configuration of a probe experiment.
///
/// All fields have defaults, so a JSON file only needs to list what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Number of probes against the probe site
    pub iterations: usize,
    /// Region size in pages
    pub pages: usize,
    /// Offset of the probe site. `None` means one page plus one granule.
    pub secret_offset: Option<usize>,
    /// Value stored at the probe site. Must not be zero.
    pub secret: u8,
    /// Offset of a zeroed control site probed as often as the probe site
    pub control_offset: Option<usize>,
    /// Tags random key generation may return
    pub include_mask: IncludeMask,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_PROBE_ITERATIONS,
            pages: 2,
            secret_offset: None,
            secret: DEFAULT_SECRET,
            control_offset: None,
            include_mask: IncludeMask::DEFAULT,
        }
    }
}

impl ProbeConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_jsonfile(filepath: &str) -> Result<ProbeConfig, ConfigError> {
        let mut file = File::open(Path::new(filepath))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: ProbeConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Effective probe site offset.
    pub fn secret_offset(&self) -> usize {
        self.secret_offset.unwrap_or(page_size() + GRANULE_SIZE)
    }

    /// Region size.
    pub fn region_size(&self) -> Size {
        Size::Pages(self.pages)
    }

    /// Checks that all sites lie inside the region and clear of the boundary granule, that
    /// the probe count is bounded and that every admitted key differs from the default lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pages == 0 {
            return Err(Error::InvalidConfig(
                "region must span at least one page".into(),
            ));
        }
        if self.secret == 0 {
            return Err(Error::InvalidConfig(
                "secret must be non-zero, zero marks an uninitialized site".into(),
            ));
        }
        if self.iterations == 0 || self.iterations > MAX_PROBE_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "iterations must lie in 1..={}, got {}",
                MAX_PROBE_ITERATIONS, self.iterations
            )));
        }
        if self.include_mask.tags().next().is_none() {
            return Err(Error::InvalidConfig("include mask admits no tags".into()));
        }
        if self.include_mask.contains(Tag::UNTAGGED) {
            return Err(Error::InvalidConfig(format!(
                "include mask {:#06x} admits tag 0, which matches the default lock",
                self.include_mask.bits()
            )));
        }
        let len = self.region_size().checked_bytes().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "region of {} pages overflows the address space",
                self.pages
            ))
        })?;
        let sites = std::iter::once(("secret", self.secret_offset()))
            .chain(self.control_offset.map(|o| ("control", o)));
        for (name, offset) in sites {
            if offset >= len {
                return Err(Error::InvalidConfig(format!(
                    "{} offset {:#x} outside region of {:#x} bytes",
                    name, offset, len
                )));
            }
            if offset / GRANULE_SIZE <= 1 {
                return Err(Error::InvalidConfig(format!(
                    "{} offset {:#x} overlaps the first two granules",
                    name, offset
                )));
            }
        }
        let shares_granule = self
            .control_offset
            .is_some_and(|control| control / GRANULE_SIZE == self.secret_offset() / GRANULE_SIZE);
        if shares_granule {
            return Err(Error::InvalidConfig(
                "control site shares the probe site granule".into(),
            ));
        }
        Ok(())
    }
}
