//! Timing side-channel oracle.
//!
//! A probe evicts the line holding the target byte, reads the cycle counter, reads the
//! byte once, reads the counter again and returns the difference. Whether the access
//! would have passed the tag check is not decided here; that is a statistical question
//! over many samples (see [`crate::stats`] and [`crate::classify`]).
//!
//! Per probe the conceptual state is `COLD -> ACCESSING -> MEASURED`, after which the
//! sample is handed out and nothing is retained. Only microarchitectural state changes.
//!
//! # Sample quality
//!
//! The loop runs on one thread without yielding. Interrupts, migrations to another core
//! and frequency changes still land inside individual measurements and show up as
//! outliers. They widen the distributions but never make a probe fail.

use crate::platform::{CacheTiming, MemoryTagging};
use crate::tag::TaggedAddress;
use crate::util::MAX_PROBE_ITERATIONS;
use log::trace;
use std::hint::black_box;

/// Cache-timing probe over a tagged pointer.
pub struct Oracle<'a, M: MemoryTagging + ?Sized, T: CacheTiming + ?Sized> {
    memory: &'a M,
    timer: &'a T,
}

impl<'a, M: MemoryTagging + ?Sized, T: CacheTiming + ?Sized> Oracle<'a, M, T> {
    /// Creates an oracle issuing accesses through `memory` and timing them with `timer`.
    pub fn new(memory: &'a M, timer: &'a T) -> Self {
        Oracle { memory, timer }
    }

    /// Measures one access to `pointer + offset` from a cold cache line.
    ///
    /// The byte at the target must already hold its final value. The returned cycle count
    /// brackets the single read and nothing else. If the platform reports the read as a tag
    /// mismatch, the load is treated as squashed and the measured time is still returned.
    pub fn probe(&self, pointer: TaggedAddress, offset: usize) -> u64 {
        let target = pointer.byte_add(offset);
        self.timer.flush_cache_line(target);
        let start = self.timer.read_cycle_counter();
        let value = match self.memory.read_byte(target) {
            Ok(value) => value,
            Err(fault) => {
                trace!("probe load squashed: {}", fault);
                0
            }
        };
        let end = self.timer.read_cycle_counter();
        // the loaded value must materialize before the sample is handed out
        black_box(value);
        end.saturating_sub(start)
    }

    /// Probes `pointer + offset` `iterations` times, passing every sample to `sink` as it
    /// is produced.
    pub fn probe_many(
        &self,
        pointer: TaggedAddress,
        offset: usize,
        iterations: usize,
        mut sink: impl FnMut(usize, u64),
    ) -> Vec<u64> {
        let mut samples = Vec::with_capacity(iterations.min(MAX_PROBE_ITERATIONS));
        for i in 0..iterations {
            let cycles = self.probe(pointer, offset);
            sink(i, cycles);
            samples.push(cycles);
        }
        samples
    }
}
