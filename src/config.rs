//! Configuration for slice loading and the `slice-hammer` binary.
//!
//! [`LoadConfig`] is the library-side knob set passed to every
//! [`LazySource`](crate::slice::LazySource). [`Config`] is the command-line
//! configuration of the stress binary and supports:
//! - Command-line arguments via clap
//! - Environment variables with `SLICE_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Environment Variables
//!
//! - `SLICE_SHAPE` - Volume shape, comma-separated (default: 256,256,256)
//! - `SLICE_LATENCY_MS` - Simulated latency before each compute (default: 1000)
//! - `SLICE_WORKERS` - Worker threads for realizations (default: 4)
//! - `SLICE_STEPS` - Number of planes to step through (default: 16)
//! - `SLICE_FRAME_MS` - Delay between viewer steps (default: 100)
//! - `SLICE_CACHE_SLICES` - Realized slices kept by the registry (default: 8)
//! - `SLICE_SETTLE_MS` - How long to wait for the last slice (default: 10000)

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

// =============================================================================
// Load Configuration
// =============================================================================

/// Options applied when a source submits its realization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Fixed delay on the worker before compute starts.
    ///
    /// Only meant for exercising responsiveness under slow loads.
    pub simulated_latency: Option<Duration>,
}

impl LoadConfig {
    /// Configuration with no artificial latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the simulated latency.
    pub fn with_simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = Some(latency);
        self
    }
}

// =============================================================================
// Default Values
// =============================================================================

/// Default volume edge length.
pub const DEFAULT_EDGE: usize = 256;

/// Default simulated latency in milliseconds.
pub const DEFAULT_LATENCY_MS: u64 = 1000;

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of viewer steps.
pub const DEFAULT_STEPS: usize = 16;

/// Default delay between viewer steps in milliseconds.
pub const DEFAULT_FRAME_MS: u64 = 100;

/// Default number of realized slices kept.
pub const DEFAULT_CACHE_SLICES: usize = 8;

/// Default time to wait for the final slice in milliseconds.
pub const DEFAULT_SETTLE_MS: u64 = 10_000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Output format for the run summary.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable log lines
    #[default]
    Text,
    /// A single JSON object on stdout
    Json,
}

/// slice-hammer - step a simulated viewer through a lazily generated volume.
///
/// Every step requests a new plane. Planes are realized on a worker pool with
/// an artificial latency, so fast stepping supersedes and cancels loads that
/// have not started yet.
#[derive(Parser, Debug, Clone)]
#[command(name = "slice-hammer")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Volume shape, comma-separated. The first axis is stepped through.
    #[arg(
        long,
        env = "SLICE_SHAPE",
        value_delimiter = ',',
        default_values_t = [DEFAULT_EDGE, DEFAULT_EDGE, DEFAULT_EDGE]
    )]
    pub shape: Vec<usize>,

    /// Simulated latency before each realization, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_LATENCY_MS, env = "SLICE_LATENCY_MS")]
    pub latency_ms: u64,

    /// Worker threads available for realizations.
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "SLICE_WORKERS")]
    pub workers: usize,

    /// Number of planes to step through.
    #[arg(long, default_value_t = DEFAULT_STEPS, env = "SLICE_STEPS")]
    pub steps: usize,

    /// Delay between viewer steps, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_FRAME_MS, env = "SLICE_FRAME_MS")]
    pub frame_ms: u64,

    /// Maximum number of slices kept by the registry.
    #[arg(long, default_value_t = DEFAULT_CACHE_SLICES, env = "SLICE_CACHE_SLICES")]
    pub cache_slices: usize,

    /// How long to wait for the final slice before giving up, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS, env = "SLICE_SETTLE_MS")]
    pub settle_ms: u64,

    /// Transpose each plane before it loads (exercises deferred transpose).
    #[arg(long, default_value_t = false)]
    pub transpose: bool,

    /// Summary output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.shape.len() < 2 {
            return Err("shape needs at least 2 axes (one to step through, one to display)".to_string());
        }
        if self.shape.iter().any(|&len| len == 0) {
            return Err("shape axes must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.steps == 0 {
            return Err("steps must be greater than 0".to_string());
        }
        if self.cache_slices == 0 {
            return Err("cache_slices must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Library load configuration derived from the CLI.
    pub fn load_config(&self) -> LoadConfig {
        if self.latency_ms == 0 {
            LoadConfig::new()
        } else {
            LoadConfig::new().with_simulated_latency(Duration::from_millis(self.latency_ms))
        }
    }

    /// Delay between viewer steps.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    /// Time allowed for the final slice to load.
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
