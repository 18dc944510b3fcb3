//! CLI argument parsing for the stacksampler demo

use std::path::PathBuf;

use clap::Parser;

use crate::config::SamplerConfig;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "stacksampler")]
#[command(version)]
#[command(
    about = "Profile a built-in CPU-bound workload and write collapsed stacks",
    long_about = None
)]
pub struct Cli {
    /// File to write the collapsed-stack report to
    #[arg(short = 'o', long = "output", value_name = "PATH", default_value = "example.stacks")]
    pub output: PathBuf,

    /// CPU time between samples in microseconds (overrides the config file)
    #[arg(short = 'i', long = "interval-us", value_name = "MICROS")]
    pub interval_us: Option<u64>,

    /// Deepest stack to capture (overrides the config file)
    #[arg(long = "max-depth", value_name = "FRAMES")]
    pub max_depth: Option<usize>,

    /// TOML file with sampler settings
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Loop iterations for each workload function
    #[arg(short = 'n', long = "iterations", default_value = "100000000")]
    pub iterations: u64,

    /// Also print the report to stdout
    #[arg(long = "print")]
    pub print: bool,

    /// Print a sampling summary to stderr
    #[arg(short = 's', long = "summary")]
    pub summary: bool,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied
    pub fn sampler_config(&self) -> Result<SamplerConfig> {
        let mut config = match &self.config {
            Some(path) => SamplerConfig::from_file(path)?,
            None => SamplerConfig::default(),
        };
        if let Some(interval_us) = self.interval_us {
            config.interval_us = interval_us;
        }
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        config.validate()?;
        Ok(config)
    }
}
