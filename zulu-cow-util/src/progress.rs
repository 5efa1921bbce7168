use crate::simulate::{OpKind, SimulateReport};

/// Trait for receiving simulation progress updates.
///
/// All methods take `&self` (not `&mut self`) so the progress reporter can be
/// shared across threads when several runs execute in parallel.
pub trait SimulateProgress: Send + Sync {
    /// Called once before any run starts.
    fn start(&self, _runs: usize, _ops_per_run: usize) {}

    /// Called when a run with the given seed starts.
    fn run_start(&self, _seed: u64) {}

    /// Called after each checked operation.
    fn op_completed(&self, _seed: u64, _kind: OpKind, _offset: u64, _len: usize) {}

    /// Called when a run finished without a mismatch.
    fn run_completed(&self, _report: &SimulateReport) {}

    /// Called when all runs are done.
    fn completed(&self) {}
}

/// A no-op progress implementation that discards all updates.
pub struct SilentProgress;

impl SimulateProgress for SilentProgress {}

/// Console progress reporter using an indicatif progress bar.
///
/// The bar counts operations across all runs. Per-run statistics are printed
/// above it as runs finish.
#[cfg(feature = "cli")]
pub struct ConsoleProgress {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            bar: indicatif::ProgressBar::hidden(),
        }
    }
}

#[cfg(feature = "cli")]
impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl SimulateProgress for ConsoleProgress {
    fn start(&self, runs: usize, ops_per_run: usize) {
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length((runs * ops_per_run) as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {pos}/{len} ops [{elapsed_precise}]")
                .unwrap()
                .progress_chars("━╸─"),
        );
        self.bar.reset();
    }

    fn op_completed(&self, _seed: u64, kind: OpKind, _offset: u64, _len: usize) {
        if kind == OpKind::Read {
            self.bar.inc(1);
        }
    }

    fn run_completed(&self, report: &SimulateReport) {
        self.bar.println(format!(
            "seed {}: {} dirty groups, {}",
            report.seed, report.dirty_groups, report.stats
        ));
    }

    fn completed(&self) {
        let total = self.bar.position();
        self.bar.finish_and_clear();
        println!("Simulation complete ({} ops checked).", total);
    }
}
