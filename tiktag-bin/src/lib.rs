//! # Tiktag
//!
//! Tiktag measures whether cache timing of accesses through MTE-tagged pointers reveals
//! anything about tag-check outcomes. The `tiktag` binary prepares a tagged region,
//! stores a secret, probes it repeatedly and finally writes one byte past the bound
//! granule, which on MTE hardware in synchronous mode ends the process with `SIGSEGV`.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # On an MTE-capable AArch64 Linux machine
//! cargo run --release --bin=tiktag
//!
//! # Anywhere else, against the software model
//! cargo run --release --bin=tiktag -- --simulate --skip-fault --output results.json
//! ```
//!
//! Use `tiktag --help` to see available options. A JSON configuration file (see
//! `crates/tiktag-core/config/probe.json`) can be passed with `--config`; command line
//! flags override its values.
//!
//! ## Exit codes
//!
//! - `0` probing finished and the fault step was skipped with `--skip-fault`, or the
//!   software model (`--simulate`) reported the boundary fault in-process
//! - `1` a precondition failed (no MTE, `prctl` or `mmap` failure, invalid configuration)
//! - `2` the boundary write did not fault
//! - killed by `SIGSEGV` the boundary write faulted, which is the expected outcome

#[macro_use]
extern crate log;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use std::num::ParseIntError;

/// Exit code reported when the boundary write did not fault.
pub const EXIT_NO_FAULT: u8 = 2;

/// Sets up `env_logger` (default filter `info`) behind a progress-aware log bridge.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    debug!("logging initialized");
    Ok(progress)
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number<T>(s: &str) -> Result<T, ParseIntError>
where
    T: TryFrom<u64>,
    T: std::str::FromStr<Err = ParseIntError>,
{
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => {
            let value = u64::from_str_radix(hex, 16)?;
            T::try_from(value).or_else(|_| s.parse::<T>())
        }
        None => s.parse(),
    }
}
