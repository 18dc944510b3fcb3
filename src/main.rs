use std::hint::black_box;

use anyhow::{Context, Result};
use clap::Parser;
use stacksampler::timer::ItimerSource;
use stacksampler::{cli::Cli, ProfileSnapshot, Sampler};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

#[inline(never)]
fn some_function(iterations: u64) -> u64 {
    let mut b = 0u64;
    for _ in 0..iterations {
        b = black_box(b + 1);
    }
    b
}

#[inline(never)]
fn another_function(iterations: u64) -> u64 {
    let mut c = 0u64;
    for _ in 0..iterations {
        c = black_box(c + 1);
    }
    c
}

/// Print sampling summary to stderr
fn print_summary(snapshot: &ProfileSnapshot) {
    eprintln!("\n╔════════════════════════════════════════════════════════════╗");
    eprintln!("║  Stacksampler Summary                                      ║");
    eprintln!("╚════════════════════════════════════════════════════════════╝");
    eprintln!();
    eprintln!("Samples recorded:          {}", snapshot.total_samples);
    eprintln!("Samples dropped:           {}", snapshot.dropped_samples);
    eprintln!("Timer firings:             {}", snapshot.firings);
    eprintln!("Distinct stacks:           {}", snapshot.entries.len());
    eprintln!("Off-thread firings:        {}", ItimerSource::foreign_firings());
    eprintln!("Wall time:                 {:.3}s", snapshot.elapsed.as_secs_f64());
    eprintln!();
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = args.sampler_config().context("Invalid sampler configuration")?;
    let mut sampler = Sampler::with_config(config)?;
    let mut guard = sampler.start_scoped().context("Failed to start sampler")?;

    black_box(some_function(args.iterations));
    black_box(another_function(args.iterations));

    if args.summary {
        if let Some(snapshot) = guard.snapshot()? {
            print_summary(&snapshot);
        }
    }

    let report = guard
        .finish(Some(&args.output))
        .with_context(|| format!("Failed to write report to {}", args.output.display()))?;

    if args.print && !report.is_empty() {
        println!("{}", report);
    }

    Ok(())
}
