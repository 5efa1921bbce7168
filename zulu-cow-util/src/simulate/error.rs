use snafu::Snafu;

/// Errors that can occur during a simulation run.
///
/// Every variant carries the seed of the failing run so it can be replayed
/// with `--seed`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SimulateError {
    #[snafu(display("image of {size} bytes holds no {block_size}-byte sector"))]
    ImageTooSmall { size: u64, block_size: u32 },

    #[snafu(display("seed {seed}: cannot open store: {source}"))]
    OpenStore {
        seed: u64,
        source: zulu_cow::OpenError,
    },

    #[snafu(display("seed {seed}: op #{op}: write at {offset} failed: {source}"))]
    Write {
        seed: u64,
        op: usize,
        offset: u64,
        source: zulu_cow::WriteError,
    },

    #[snafu(display("seed {seed}: op #{op}: wrote {actual} of {expected} bytes at {offset}"))]
    ShortWrite {
        seed: u64,
        op: usize,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("seed {seed}: op #{op}: read at {offset} failed: {source}"))]
    Read {
        seed: u64,
        op: usize,
        offset: u64,
        source: zulu_cow::ReadError,
    },

    #[snafu(display(
        "seed {seed}: op #{op}: read of {len} bytes at {offset} differs from reference at byte {at}"
    ))]
    ReadMismatch {
        seed: u64,
        op: usize,
        offset: u64,
        len: usize,
        at: usize,
    },

    #[snafu(display("seed {seed}: cannot recreate image: {source}"))]
    Recreate {
        seed: u64,
        source: zulu_cow::ExportError,
    },

    #[snafu(display("seed {seed}: recreated image differs from reference at byte {at}"))]
    ImageMismatch { seed: u64, at: usize },
}
