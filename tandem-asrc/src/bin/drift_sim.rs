//! Clock drift simulator
//!
//! Runs the bridge against a simulated host and hardware interface with a
//! configurable clock offset and prints buffer and controller statistics.
//!
//! **Usage:**
//! ```bash
//! drift-sim [--config <file>] [--host-rate 44100] [--drift-ppm 100] [--blocks 20000]
//!           [--rate-change 48000] [--export <file>]
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tandem_asrc::sim::{run_simulation, SimConfig, SimReport, SimSegment};
use tandem_asrc::AsrcConfig;
use tracing::{error, info};

/// Clock drift simulator
#[derive(Parser, Debug)]
#[clap(name = "drift-sim")]
#[clap(about = "Simulate host/hardware clock drift through the adaptive resampler")]
struct Args {
    /// Configuration file (overrides TANDEM_CONFIG and the default location)
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host rate for the first segment (Hz)
    #[clap(long, default_value = "44100")]
    host_rate: u32,

    /// Hardware clock offset (ppm, positive = fast)
    #[clap(long, default_value = "100", allow_hyphen_values = true)]
    drift_ppm: f64,

    /// Host blocks per segment
    #[clap(long, default_value = "20000")]
    blocks: u64,

    /// Frames per host block
    #[clap(long, default_value = "4")]
    block_frames: usize,

    /// Renegotiate to this rate for a second segment
    #[clap(long, value_name = "HZ")]
    rate_change: Option<u32>,

    /// Export results to JSON file
    #[clap(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tandem_asrc=info")),
        )
        .init();

    let args = Args::parse();

    let start_time = Instant::now();
    match simulate(&args) {
        Ok(report) => {
            display_results(&report);

            // Export if requested
            if let Some(export_path) = &args.export {
                match report.export_json(export_path) {
                    Ok(()) => println!("\nResults exported to: {}", export_path.display()),
                    Err(e) => error!("Failed to export results: {}", e),
                }
            }

            info!(
                "Simulation complete in {:.1} seconds",
                start_time.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn simulate(args: &Args) -> Result<SimReport> {
    let mut config =
        AsrcConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.host_rate = args
        .host_rate
        .try_into()
        .context("Unsupported --host-rate")?;
    config.max_host_block_frames = config.max_host_block_frames.max(args.block_frames);

    let mut segments = vec![SimSegment {
        host_rate: args.host_rate,
        host_blocks: args.blocks,
    }];
    if let Some(rate) = args.rate_change {
        segments.push(SimSegment {
            host_rate: rate,
            host_blocks: args.blocks,
        });
    }

    let sim = SimConfig {
        hardware_drift_ppm: args.drift_ppm,
        host_block_frames: args.block_frames,
        segments,
        tone_hz: 997.0,
    };

    Ok(run_simulation(&config, &sim, None)?)
}

fn display_results(report: &SimReport) {
    println!(
        "\n{} host blocks, {} hardware frames, hardware {:+.1} ppm",
        report.host_blocks_sent, report.hardware_frames_sent, report.sim.hardware_drift_ppm
    );

    for epoch in &report.epochs {
        println!(
            "\nEpoch {}: {} -> {}",
            epoch.index, epoch.host_rate, epoch.hardware_rate
        );
        println!(
            "  controller: {} cycles, {} rejected, playback ratio {:.9}, capture ratio {:.9}",
            epoch.cycles, epoch.rejected_cycles, epoch.playback_ratio, epoch.capture_ratio
        );
        println!(
            "  playback FIFO: {}/{} frames ({:.0}%), {} overflows, {} underflows, {} silent frames",
            epoch.playback.occupied,
            epoch.playback.capacity,
            epoch.playback.fill_percent() * 100.0,
            epoch.playback.overflows,
            epoch.playback.underflows,
            epoch.silent_render_frames
        );
        println!(
            "  capture FIFO:  {}/{} frames ({:.0}%), {} overflows, {} underflows, {} silent frames",
            epoch.capture.occupied,
            epoch.capture.capacity,
            epoch.capture.fill_percent() * 100.0,
            epoch.capture.overflows,
            epoch.capture.underflows,
            epoch.silent_host_frames
        );

        let occupancy = report.playback_occupancy(epoch.index, 50);
        println!(
            "  playback occupancy after 50 cycles: min {} max {} mean {:.1}",
            occupancy.min_frames, occupancy.max_frames, occupancy.mean_frames
        );
        if let Some(ppm) = epoch.estimated_drift_ppm {
            println!("  estimated drift: {:+.1} ppm", ppm);
        }
    }
}
