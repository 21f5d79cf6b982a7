//! CLI entry point for the petri simulation server.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rand::Rng;

use petri::config::SimConfig;
use petri::server::BroadcastServer;
use petri::sim::Simulation;

/// Bacterial colony ecology simulation server.
///
/// Runs a parallel cellular ecology on a 2D grid and streams world
/// snapshots to connected terminal clients over TCP.
#[derive(Parser, Debug)]
#[command(name = "petri")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value = "4433")]
    port: u16,

    /// World width in cells
    #[arg(short = 'W', long = "width", default_value = "256")]
    width: u32,

    /// World height in cells
    #[arg(short = 'H', long = "height", default_value = "256")]
    height: u32,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short = 'j', long = "threads", default_value = "0")]
    threads: usize,

    /// Number of colonies seeded at startup
    #[arg(short = 'c', long = "colonies", default_value = "12")]
    colonies: usize,

    /// Target milliseconds per simulation tick
    #[arg(short = 't', long = "tick-rate", default_value = "50")]
    tick_rate: u64,

    /// World seed (random if omitted)
    #[arg(short = 's', long = "seed")]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // Validate inputs
    if args.width < 16 || args.height < 16 {
        bail!("The world must be at least 16x16 cells.");
    }
    if args.width > 4096 || args.height > 4096 {
        bail!("The world cannot exceed 4096 cells per side.");
    }
    if args.tick_rate == 0 {
        bail!("The tick rate must be at least 1 ms.");
    }

    // Determine thread count
    let threads = if args.threads == 0 {
        num_cpus::get()
    } else {
        args.threads
    };

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());

    let config = SimConfig {
        width: args.width,
        height: args.height,
        threads,
        initial_colonies: args.colonies,
        tick_rate_ms: args.tick_rate,
        seed,
        ..SimConfig::default()
    };

    if !config.can_hold_initial_colonies() {
        bail!("The world is too small for {} colonies.", args.colonies);
    }

    info!(
        "starting: {}x{} world, {} colonies, {} threads, seed {seed}",
        config.width, config.height, config.initial_colonies, config.threads
    );

    let sim = Simulation::new(config).context("failed to build the simulation")?;
    let addr: SocketAddr = format!("0.0.0.0:{}", args.port)
        .parse()
        .context("invalid listen address")?;
    let mut server = BroadcastServer::bind(addr, sim)?;

    // SIGINT/SIGTERM request a graceful stop; the loop exits at the next
    // tick boundary.
    let control = server.control();
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        control.stop();
    })
    .context("failed to install signal handler")?;

    server.run()?;
    info!("goodbye");
    Ok(())
}
