//! pseudoclone CLI - clone Linux pseudo file systems
//!
//! Thin entry point: logging, argument parsing, one clone run, exit code.

use clap::Parser;
use pseudoclone::clone;
use pseudoclone::config::{CliArgs, CloneConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();

    // -v raises the default level; RUST_LOG still wins when set
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> pseudoclone::Result<()> {
    let cfg = CloneConfig::from_cli(&args)?;

    let outcome = clone::run(&cfg)?;

    let ms = outcome.elapsed.as_millis();
    println!("Elapsed time: {}.{:03} seconds", ms / 1000, ms % 1000);

    if cfg.stats_level > 0 {
        print_phases(&outcome);
        outcome.stats.print_summary(cfg.stats_level, !cfg.no_dst);
    }

    if cfg.banner_eligible {
        println!(
            "Successfully cloned {} to {}",
            cfg.source.display(),
            cfg.destination.display()
        );
    }
    Ok(())
}

fn print_phases(outcome: &clone::CloneOutcome) {
    println!("Scan time: {:.3?}", outcome.scan_time);
    if let Some(t) = outcome.prune_time {
        println!("Prune time: {t:.3?}");
    }
    if let Some(t) = outcome.unroll_time {
        println!("Unroll time: {t:.3?}");
    }
}
