//! Software model of an MTE-capable core for tiktag.
//!
//! Implements the [`tiktag_core::platform`] traits without any hardware support, so the
//! probe, the lifecycle manager and the boundary fault can run on every host. Tag
//! mismatches are reported in-process instead of raising `SIGSEGV`, and timing comes from
//! a virtual clock driven by a small cache model (see [`SimLatency`]).
//!
//! Measurements taken here say nothing about real hardware.

#![warn(missing_docs)]

mod sim;

pub use sim::*;
