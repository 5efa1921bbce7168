mod error;

pub use self::error::SimulateError;

use self::error::*;
use crate::progress::SimulateProgress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use snafu::{ResultExt, ensure};
use tracing::debug;
use zulu_cow::image::MemFile;
use zulu_cow::{BackingStore, Geometry, Stats, StoreConfig};

/// Largest number of sectors touched by a single random operation.
const MAX_OP_SECTORS: u64 = 64;

/// The kind of operation applied during a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Write,
    Read,
}

/// Parameters for a [`Simulation`].
#[derive(Debug, Clone, Copy)]
pub struct SimulateOptions {
    /// Image length in bytes.
    pub image_size: u64,
    /// Write/read pairs per run.
    pub ops: usize,
    /// Seed of the first run; run `i` uses `seed + i`.
    pub seed: u64,
    pub config: StoreConfig,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            image_size: 8 * 1024 * 1024,
            ops: 1000,
            seed: 1,
            config: StoreConfig::default(),
        }
    }
}

/// Outcome of a run whose every read matched the reference.
#[derive(Debug, Clone)]
pub struct SimulateReport {
    pub seed: u64,
    pub geometry: Geometry,
    pub dirty_groups: u64,
    pub stats: Stats,
}

/// Randomized differential check of a [`BackingStore`] against a flat buffer.
///
/// Each run seeds an original image with sector-sized runs of random bytes,
/// then applies random sector-aligned writes to both the store and a plain
/// copy of the image, following each write with a random read that must match.
/// The fully recreated image is compared at the end.
pub struct Simulation<P: SimulateProgress> {
    options: SimulateOptions,
    progress: P,
}

impl<P: SimulateProgress> Simulation<P> {
    pub fn new(options: SimulateOptions, progress: P) -> Self {
        Self { options, progress }
    }

    /// Runs `runs` independent simulations in parallel.
    ///
    /// Reports are returned in seed order. The first mismatch aborts with an
    /// error naming its seed.
    pub fn run(&self, runs: usize) -> Result<Vec<SimulateReport>, SimulateError> {
        let block_size = self.options.config.block_size();

        ensure!(
            self.options.image_size >= block_size as u64,
            ImageTooSmallSnafu {
                size: self.options.image_size,
                block_size
            }
        );

        self.progress.start(runs, self.options.ops);

        let reports = (0..runs)
            .into_par_iter()
            .map(|i| self.run_seed(self.options.seed.wrapping_add(i as u64)))
            .collect::<Result<Vec<_>, _>>()?;

        self.progress.completed();

        Ok(reports)
    }

    /// Runs a single simulation with the given seed.
    pub fn run_seed(&self, seed: u64) -> Result<SimulateReport, SimulateError> {
        let options = &self.options;
        let block_size = options.config.block_size() as u64;
        let sectors = options.image_size / block_size;

        ensure!(
            sectors > 0,
            ImageTooSmallSnafu {
                size: options.image_size,
                block_size: options.config.block_size()
            }
        );

        self.progress.run_start(seed);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut truth = vec![0; options.image_size as usize];

        fill_sectors(&mut rng, &mut truth, block_size as usize);

        let mut store = BackingStore::new(
            MemFile::from_vec(truth.clone()),
            MemFile::default(),
            options.config,
        )
        .context(OpenStoreSnafu { seed })?;

        for op in 0..options.ops {
            // Write.
            let (offset, len) = random_span(&mut rng, sectors, block_size);
            let mut data = vec![0; len];

            fill_sectors(&mut rng, &mut data, block_size as usize);

            let written = store
                .write_at(offset, &data)
                .context(WriteSnafu { seed, op, offset })?;

            ensure!(
                written == len,
                ShortWriteSnafu {
                    seed,
                    op,
                    offset,
                    expected: len,
                    actual: written
                }
            );

            truth[offset as usize..offset as usize + len].copy_from_slice(&data);
            self.progress.op_completed(seed, OpKind::Write, offset, len);

            // Read back a different span.
            let (offset, len) = random_span(&mut rng, sectors, block_size);
            let mut buf = vec![0; len];

            let read = store
                .read_at(offset, &mut buf)
                .context(ReadSnafu { seed, op, offset })?;
            let expected = &truth[offset as usize..offset as usize + len];

            if let Some(at) = first_difference(&buf[..read], expected).or_else(|| {
                // A short read is a mismatch at the first missing byte.
                (read < len).then_some(read)
            }) {
                return ReadMismatchSnafu {
                    seed,
                    op,
                    offset,
                    len,
                    at,
                }
                .fail();
            }

            self.progress.op_completed(seed, OpKind::Read, offset, len);
        }

        let image = store.recreate().context(RecreateSnafu { seed })?;

        if let Some(at) = first_difference(&image, &truth) {
            return ImageMismatchSnafu { seed, at }.fail();
        }

        let report = SimulateReport {
            seed,
            geometry: *store.geometry(),
            dirty_groups: store.bitmap().count_dirty(),
            stats: store.stats(),
        };

        debug!(seed, stats = %report.stats, "simulation run passed");

        self.progress.run_completed(&report);

        Ok(report)
    }
}

/// Picks a random sector-aligned span of 1 to [`MAX_OP_SECTORS`] sectors.
fn random_span(rng: &mut StdRng, sectors: u64, block_size: u64) -> (u64, usize) {
    let count = rng.gen_range(1..=MAX_OP_SECTORS.min(sectors));
    let start = rng.gen_range(0..=sectors - count);

    (start * block_size, (count * block_size) as usize)
}

/// Fills `buf` with one random byte value per sector.
fn fill_sectors(rng: &mut StdRng, buf: &mut [u8], block_size: usize) {
    for sector in buf.chunks_mut(block_size) {
        sector.fill(rng.gen_range(0..=u8::MAX));
    }
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter().zip(b).position(|(x, y)| x != y)
}

/// Returns the seed of a failed run.
pub fn failing_seed(err: &SimulateError) -> Option<u64> {
    match err {
        SimulateError::ImageTooSmall { .. } => None,
        SimulateError::OpenStore { seed, .. }
        | SimulateError::Write { seed, .. }
        | SimulateError::ShortWrite { seed, .. }
        | SimulateError::Read { seed, .. }
        | SimulateError::ReadMismatch { seed, .. }
        | SimulateError::Recreate { seed, .. }
        | SimulateError::ImageMismatch { seed, .. } => Some(*seed),
    }
}
