mod cli;

use clap::Parser;
use cli::{Cli, Command, Tunables};
use snafu::{ResultExt, Snafu, ensure};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zulu_cow::Geometry;
use zulu_cow_util::{ConsoleProgress, Patch, SilentProgress, SimulateOptions, Simulation};

/// Top-level application errors for zulu-cow-util.
#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to stat '{}'", path.display()))]
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("invalid geometry for '{}'", path.display()))]
    Geometry {
        path: PathBuf,
        source: zulu_cow::GeometryError,
    },

    #[snafu(display("failed to open store"))]
    OpenStore { source: zulu_cow::OpenPathsError },

    #[snafu(display("failed to load patch"))]
    ReadPatch {
        source: zulu_cow_util::ReadPatchError,
    },

    #[snafu(display("failed to write patch at offset {offset:#x}"))]
    Write {
        offset: u64,
        source: zulu_cow::WriteError,
    },

    #[snafu(display(
        "patch at offset {offset:#x} runs past the end of the image ({written} of {len} bytes written)"
    ))]
    ShortWrite { offset: u64, written: usize, len: usize },

    #[snafu(display("failed to flush overlay"))]
    FlushOverlay { source: std::io::Error },

    #[snafu(display("failed to create '{}'", path.display()))]
    CreateExport {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to export image to '{}'", path.display()))]
    Export {
        path: PathBuf,
        source: zulu_cow::ExportError,
    },

    #[snafu(display("failed to finish writing '{}'", path.display()))]
    FlushExport {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("simulation failed"))]
    Simulate {
        source: zulu_cow_util::SimulateError,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[snafu::report]
fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match cli.command {
        Command::Info { original, tunables } => cmd_info(&original, &tunables),
        Command::Patch {
            original,
            overlay,
            writes,
            export,
            tunables,
        } => cmd_patch(&original, &overlay, &writes, export.as_deref(), &tunables),
        Command::Simulate {
            size,
            ops,
            seed,
            runs,
            quiet,
            tunables,
        } => cmd_simulate(
            SimulateOptions {
                image_size: size,
                ops,
                seed,
                config: tunables.config(),
            },
            runs,
            quiet,
        ),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_info(path: &Path, tunables: &Tunables) -> Result<()> {
    let len = std::fs::metadata(path)
        .context(MetadataSnafu { path })?
        .len();
    let config = tunables.config();
    let geometry = Geometry::new(len, config.block_size(), config.bitmap_capacity())
        .context(GeometrySnafu { path })?;

    println!("Image: {}", path.display());
    println!();
    println!("{geometry}");

    Ok(())
}

fn cmd_patch(
    original: &Path,
    overlay: &Path,
    writes: &[(u64, PathBuf)],
    export: Option<&Path>,
    tunables: &Tunables,
) -> Result<()> {
    let mut store = zulu_cow::open(original, overlay, tunables.config()).context(OpenStoreSnafu)?;

    for (offset, path) in writes {
        let patch = Patch::from_file(*offset, path).context(ReadPatchSnafu)?;
        let written = store
            .write_at(patch.offset, &patch.data)
            .context(WriteSnafu {
                offset: patch.offset,
            })?;

        info!(offset = patch.offset, written, patch = %path.display(), "applied patch");

        ensure!(
            written == patch.data.len(),
            ShortWriteSnafu {
                offset: patch.offset,
                written,
                len: patch.data.len()
            }
        );
    }

    store.flush().context(FlushOverlaySnafu)?;

    println!(
        "Dirty groups:   {} of {}",
        store.bitmap().count_dirty(),
        store.geometry().group_count()
    );
    println!("Stats:          {}", store.stats());

    if let Some(path) = export {
        let file = File::create(path).context(CreateExportSnafu { path })?;
        let mut sink = BufWriter::new(file);
        let start = std::time::Instant::now();
        let exported = store.export(&mut sink).context(ExportSnafu { path })?;

        sink.flush().context(FlushExportSnafu { path })?;

        println!(
            "Exported {exported} bytes to {} in {:.2}s.",
            path.display(),
            start.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

fn cmd_simulate(options: SimulateOptions, runs: usize, quiet: bool) -> Result<()> {
    if !quiet {
        println!(
            "Simulating {runs} run(s) of {} write/read pairs on a {} byte image...",
            options.ops,
            options.image_size
        );
    }

    let start = std::time::Instant::now();

    // Pick the reporter based on verbosity.
    let reports = if quiet {
        Simulation::new(options, SilentProgress).run(runs)
    } else {
        Simulation::new(options, ConsoleProgress::new()).run(runs)
    }
    .context(SimulateSnafu)?;

    let elapsed = start.elapsed();

    if !quiet {
        if let Some(report) = reports.first() {
            println!();
            println!("{}", report.geometry);
        }

        println!("Done in {:.2}s.", elapsed.as_secs_f64());
    }

    Ok(())
}
