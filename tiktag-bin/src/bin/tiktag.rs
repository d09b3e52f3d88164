use std::{
    fs::File,
    io::{BufWriter, Write},
    process::ExitCode,
};

use anyhow::Result;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info};
use serde::Serialize;
use tiktag_bin::{EXIT_NO_FAULT, init_logging_with_progress, parse_number};
use tiktag_core::fault::FaultOutcome;
use tiktag_core::platform::Platform;
use tiktag_core::region::TaggedAllocator;
use tiktag_core::util::NamedProgress;
use tiktag_core::{EXIT_FAILURE, Experiment, ExperimentData, ProbeConfig};
use tiktag_sim::{SimulatedMte, sim_allocator};

/// CLI arguments for the `tiktag` binary.
///
/// Every probe parameter left unset falls back to the configuration file, if given, and
/// then to the built-in defaults (2 pages, secret 0x45 at one page plus 0x10, 1000 probes).
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// A probe configuration file (JSON).
    #[clap(long = "config")]
    config: Option<String>,
    /// The number of probes against the secret.
    #[clap(long = "iterations")]
    iterations: Option<usize>,
    /// The region size in pages.
    #[clap(long = "pages")]
    pages: Option<usize>,
    /// Offset of the secret within the region (decimal or 0x-prefixed hex).
    #[clap(long = "secret-offset", value_parser = parse_number::<usize>)]
    secret_offset: Option<usize>,
    /// The secret value (decimal or 0x-prefixed hex, non-zero).
    #[clap(long = "secret", value_parser = parse_number::<u8>)]
    secret: Option<u8>,
    /// Offset of a zeroed control site probed as often as the secret.
    #[clap(long = "control-offset", value_parser = parse_number::<usize>)]
    control_offset: Option<usize>,
    /// Exit after probing instead of performing the faulting boundary write.
    #[clap(long = "skip-fault")]
    skip_fault: bool,
    /// Run against the software model instead of MTE hardware.
    #[clap(long = "simulate")]
    simulate: bool,
    /// Seed of the software model. Random if not given.
    #[clap(long = "seed")]
    seed: Option<u64>,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
}

impl CliArgs {
    fn probe_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_jsonfile(path)?,
            None => ProbeConfig::default(),
        };
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(pages) = self.pages {
            config.pages = pages;
        }
        if let Some(secret) = self.secret {
            config.secret = secret;
        }
        config.secret_offset = self.secret_offset.or(config.secret_offset);
        config.control_offset = self.control_offset.or(config.control_offset);
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct RunResults<'a> {
    args: &'a CliArgs,
    platform: &'static str,
    seed: Option<u64>,
    config: ProbeConfig,
    data: ExperimentData,
}

impl RunResults<'_> {
    fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Results saved to {}", filename);
        Ok(())
    }
}

fn run<P: Platform, A: TaggedAllocator>(
    platform: &P,
    allocator: A,
    config: ProbeConfig,
    args: &CliArgs,
    platform_name: &'static str,
    progress: &MultiProgress,
) -> Result<ExitCode> {
    let bar = progress.add(ProgressBar::new(config.iterations as u64));
    bar.set_style(ProgressStyle::named_bar("Probing secret"));
    let mut experiment = Experiment::new(platform, allocator, config.clone());
    let data = experiment.run(|_, cycles| {
        info!("Access time: {} cycles", cycles);
        bar.inc(1);
    });
    bar.finish_and_clear();
    let data = data?;

    if let Some(stats) = &data.probe.stats {
        info!(
            "secret: median {} cycles, p90 {} cycles, min {}, max {}",
            stats.median, stats.p90, stats.min, stats.max
        );
    }
    let results = RunResults {
        args,
        platform: platform_name,
        seed: args.seed,
        config,
        data,
    };
    if let Some(output_file) = &args.output {
        results.save_to_file(output_file)?;
    }

    if args.skip_fault {
        info!("Skipping the boundary write");
        experiment.release();
        return Ok(ExitCode::SUCCESS);
    }
    match experiment.trigger_boundary_fault() {
        FaultOutcome::Reported(fault) => {
            info!("Boundary write rejected: {}", fault);
            experiment.release();
            Ok(ExitCode::SUCCESS)
        }
        FaultOutcome::NotRaised => {
            experiment.release();
            Ok(ExitCode::from(EXIT_NO_FAULT))
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
fn run_hardware(config: ProbeConfig, args: &CliArgs, progress: &MultiProgress) -> Result<ExitCode> {
    let platform = tiktag_aarch64::MtePlatform::new();
    run(
        &platform,
        tiktag_aarch64::mte_allocator(),
        config,
        args,
        "mte",
        progress,
    )
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
fn run_hardware(
    _config: ProbeConfig,
    _args: &CliArgs,
    _progress: &MultiProgress,
) -> Result<ExitCode> {
    log::warn!("MTE hardware needs AArch64 Linux, use --simulate on this host");
    Err(tiktag_core::Error::CapabilityUnavailable.into())
}

fn main() -> ExitCode {
    let progress = match init_logging_with_progress() {
        Ok(progress) => progress,
        Err(e) => {
            eprintln!("failed to initialize logging: {:?}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let mut args = CliArgs::parse();
    if args.simulate && args.seed.is_none() {
        args.seed = Some(rand::random());
    }
    info!("CLI args: {:?}", args);

    let result = args.probe_config().and_then(|config| {
        if args.simulate {
            let seed = args.seed.unwrap_or_default();
            run(
                &SimulatedMte::new(seed),
                sim_allocator(),
                config,
                &args,
                "sim",
                &progress,
            )
        } else {
            run_hardware(config, &args, &progress)
        }
    });
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:?}", e);
            let code = e
                .downcast_ref::<tiktag_core::Error>()
                .map_or(EXIT_FAILURE, tiktag_core::Error::exit_code);
            ExitCode::from(code)
        }
    }
}
