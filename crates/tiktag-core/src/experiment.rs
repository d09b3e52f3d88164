//! End-to-end probe orchestration.

use crate::Error;
use crate::config::ProbeConfig;
use crate::fault::{FaultOutcome, trigger_boundary_fault};
use crate::lifecycle::TagManager;
use crate::oracle::Oracle;
use crate::platform::Platform;
use crate::region::{TaggedAllocator, TaggedRegion};
use crate::stats::{LatencyStats, Separation};
use crate::tag::TaggedAddress;
use log::{debug, info, warn};
use serde::Serialize;

/// Bytes written to the first granule to demonstrate unchecked and checked accesses.
const MARKER: [u8; 2] = [0x36, 0x39];

/// Samples and summary of one probed site.
#[derive(Debug, Clone, Serialize)]
pub struct SiteData {
    /// Offset of the site within the region
    pub offset: usize,
    /// Value stored at the site
    pub value: u8,
    /// Summary of `samples`
    pub stats: Option<LatencyStats>,
    /// Raw cycle counts, in probe order
    pub samples: Vec<u64>,
}

impl SiteData {
    fn new(offset: usize, value: u8, samples: Vec<u64>) -> Self {
        Self {
            offset,
            value,
            stats: LatencyStats::from_samples(&samples),
            samples,
        }
    }
}

/// Results of a complete probe run.
#[derive(Debug, Serialize)]
pub struct ExperimentData {
    /// RFC 3339 timestamp of when the run finished
    pub date: String,
    /// Base of the region with its default tag
    pub untagged_pointer: TaggedAddress,
    /// Base of the region with the generated key
    pub tagged_pointer: TaggedAddress,
    /// Probe site results
    pub probe: SiteData,
    /// Control site results, if configured
    pub control: Option<SiteData>,
    /// Distance between probe and control distributions, if a control was probed
    pub separation: Option<Separation>,
}

/// A region with its bound key, kept alive between probing and the fault step.
struct Prepared {
    region: TaggedRegion,
    key: TaggedAddress,
}

/// Runs the probe end to end on one platform.
///
/// The steps are:
///
/// 1. Capability detection and synchronous tag-check configuration
/// 2. Allocation of the tagged region
/// 3. Unchecked and checked marker writes to the first granule
/// 4. Key generation, lock binding and the one-time secret write
/// 5. The probe loop (and the control loop, if configured)
///
/// [`Experiment::trigger_boundary_fault`] performs the final, terminating step.
pub struct Experiment<'a, P: Platform + ?Sized, A: TaggedAllocator> {
    platform: &'a P,
    allocator: A,
    config: ProbeConfig,
    prepared: Option<Prepared>,
}

impl<'a, P: Platform + ?Sized, A: TaggedAllocator> Experiment<'a, P, A> {
    /// Creates an experiment. Nothing touches the platform before [`run`](Self::run).
    pub fn new(platform: &'a P, allocator: A, config: ProbeConfig) -> Self {
        Self {
            platform,
            allocator,
            config,
            prepared: None,
        }
    }

    /// The configuration this experiment runs with.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Prepares the region and probes it, calling `sink(iteration, cycles)` once per probe
    /// of the probe site.
    ///
    /// # Errors
    ///
    /// Fails before any allocation if the configuration is invalid or tagging is
    /// unavailable, and before any probe if configuration or allocation fail.
    pub fn run(&mut self, mut sink: impl FnMut(usize, u64)) -> Result<ExperimentData, Error> {
        self.config.validate()?;
        self.platform.detect()?;
        info!("Memory tagging is supported");
        self.platform.enable_sync_checking(self.config.include_mask)?;
        info!("Enabled synchronous tag checking");

        let manager = TagManager::new(self.platform, self.config.include_mask);
        let region =
            manager.allocate_tagged_region(&mut self.allocator, self.config.region_size())?;
        if let Some(old) = self.prepared.take() {
            old.region.dealloc();
        }

        let (untagged, key) = match self.prepare(&manager, &region) {
            Ok(pointers) => pointers,
            Err(e) => {
                region.dealloc();
                return Err(e);
            }
        };
        let secret_offset = self.config.secret_offset();

        let oracle = Oracle::new(self.platform, self.platform);
        info!(
            "Probing offset {:#x} {} times",
            secret_offset, self.config.iterations
        );
        let samples = oracle.probe_many(key, secret_offset, self.config.iterations, &mut sink);
        let probe = SiteData::new(secret_offset, self.config.secret, samples);

        let control = self.config.control_offset.map(|offset| {
            info!("Probing control offset {:#x}", offset);
            let samples = oracle.probe_many(key, offset, self.config.iterations, |_, _| {});
            SiteData::new(offset, 0, samples)
        });
        let separation = match (&probe.stats, control.as_ref().and_then(|c| c.stats.as_ref())) {
            (Some(p), Some(c)) => Some(Separation::from_stats(p, c)),
            _ => None,
        };
        if let Some(sep) = &separation {
            info!(
                "median gap {} cycles, noise {} cycles, detectable: {}",
                sep.median_gap,
                sep.noise,
                sep.is_detectable()
            );
        }

        self.prepared = Some(Prepared { region, key });
        Ok(ExperimentData {
            date: chrono::Local::now().to_rfc3339(),
            untagged_pointer: untagged,
            tagged_pointer: key,
            probe,
            control,
            separation,
        })
    }

    /// Key bound to the first granule of the prepared region, if [`run`](Self::run) succeeded.
    pub fn key(&self) -> Option<TaggedAddress> {
        self.prepared.as_ref().map(|p| p.key)
    }

    /// Writes past the first granule of the prepared region.
    ///
    /// **Terminates the process** with `SIGSEGV` on hardware in synchronous mode; see
    /// [`crate::fault::trigger_boundary_fault`].
    ///
    /// # Panics
    ///
    /// Panics if [`run`](Self::run) has not completed successfully.
    pub fn trigger_boundary_fault(&self) -> FaultOutcome {
        let prepared = self
            .prepared
            .as_ref()
            .expect("trigger_boundary_fault called before a successful run");
        info!("Expecting SIGSEGV...");
        let outcome = trigger_boundary_fault(self.platform, prepared.key);
        if outcome == FaultOutcome::NotRaised {
            warn!("...no SIGSEGV was received");
        }
        outcome
    }

    /// Unmaps the prepared region, if any.
    pub fn release(mut self) {
        if let Some(prepared) = self.prepared.take() {
            prepared.region.dealloc();
        }
    }

    /// Writes the markers, binds the key and stores the secret. The caller owns `region`
    /// and unmaps it if this fails.
    fn prepare(
        &self,
        manager: &TagManager<'_, P>,
        region: &TaggedRegion,
    ) -> Result<(TaggedAddress, TaggedAddress), Error> {
        let untagged = region.base();
        info!("pointer is {}", untagged);
        let readback = self.write_markers(untagged)?;
        info!("ptr[0] = {:#x} ptr[1] = {:#x}", readback[0], readback[1]);

        let key = manager.generate_key(untagged);
        manager.bind_lock(key);
        info!("pointer is now {}", key);
        let readback = self.write_markers(key)?;
        info!("ptr[0] = {:#x} ptr[1] = {:#x}", readback[0], readback[1]);

        let secret_offset = self.config.secret_offset();
        let site = key.byte_add(secret_offset);
        manager.bind_lock(site);
        self.platform.write_byte(site, self.config.secret)?;
        debug!(
            "secret {:#x} written at offset {:#x} (lock {})",
            self.config.secret,
            secret_offset,
            manager.lock_of(site)
        );
        if let Some(control_offset) = self.config.control_offset {
            manager.bind_lock(key.byte_add(control_offset));
        }

        Ok((untagged, key))
    }

    fn write_markers(&self, pointer: TaggedAddress) -> Result<[u8; 2], Error> {
        let mut readback = [0u8; 2];
        for (i, &marker) in MARKER.iter().enumerate() {
            self.platform.write_byte(pointer.byte_add(i), marker)?;
        }
        for (i, byte) in readback.iter_mut().enumerate() {
            *byte = self.platform.read_byte(pointer.byte_add(i))?;
        }
        Ok(readback)
    }
}
