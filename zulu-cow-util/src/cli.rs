use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use zulu_cow::StoreConfig;

#[derive(Debug, Parser)]
#[command(name = "zulu-cow-util")]
#[command(about = "Copy-on-write image overlay utility", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Store tunables shared by every subcommand.
#[derive(Debug, Args)]
pub struct Tunables {
    /// Upper bound on dirty bitmap memory
    #[arg(long, value_name = "BYTES", default_value_t = StoreConfig::DEFAULT_BITMAP_CAPACITY)]
    pub bitmap_size: usize,

    /// Size of the buffer used to copy groups into the overlay
    #[arg(long, value_name = "BYTES", default_value_t = StoreConfig::DEFAULT_SCRATCH_SIZE)]
    pub buffer_size: usize,

    /// Sector size
    #[arg(long, value_name = "BYTES", default_value_t = StoreConfig::DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,
}

impl Tunables {
    pub fn config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_bitmap_capacity(self.bitmap_size)
            .with_scratch_size(self.buffer_size)
            .with_block_size(self.block_size)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Display the group layout derived for an image
    Info {
        /// Path to the original image
        #[arg(value_name = "ORIGINAL")]
        original: PathBuf,

        #[command(flatten)]
        tunables: Tunables,
    },

    /// Apply writes to an image through an overlay
    Patch {
        /// Path to the original image (never modified)
        #[arg(value_name = "ORIGINAL")]
        original: PathBuf,

        /// Path to the overlay (created or truncated)
        #[arg(value_name = "OVERLAY")]
        overlay: PathBuf,

        /// Write the contents of FILE at OFFSET; may be repeated
        #[arg(short, long = "write", value_name = "OFFSET=FILE", value_parser = parse_write, required = true)]
        writes: Vec<(u64, PathBuf)>,

        /// Write the merged image to this path
        #[arg(short, long, value_name = "FILE")]
        export: Option<PathBuf>,

        #[command(flatten)]
        tunables: Tunables,
    },

    /// Check the engine against a flat reference image with random I/O
    Simulate {
        /// Image size
        #[arg(long, value_name = "BYTES", value_parser = parse_size, default_value = "8388608")]
        size: u64,

        /// Write/read pairs per run
        #[arg(long, default_value_t = 1000)]
        ops: usize,

        /// Seed of the first run
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Number of independent runs, executed in parallel
        #[arg(long, default_value_t = 1)]
        runs: usize,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,

        #[command(flatten)]
        tunables: Tunables,
    },
}

fn parse_size(s: &str) -> Result<u64, String> {
    zulu_cow_util::parse_size(s).map_err(|e| format!("invalid size '{s}': {e}"))
}

fn parse_write(s: &str) -> Result<(u64, PathBuf), String> {
    let (offset, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected OFFSET=FILE, got '{s}'"))?;

    let offset = parse_size(offset)?;

    if path.is_empty() {
        return Err(format!("missing file in '{s}'"));
    }

    Ok((offset, PathBuf::from(path)))
}
