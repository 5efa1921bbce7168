use std::cmp::min;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A seekable byte store used as either side of a [`BackingStore`](crate::BackingStore).
///
/// Every call names its own offset, so implementations keep no cursor of
/// their own. A short read or write is reported through the returned count;
/// callers decide whether that is fatal.
pub trait BlockFile {
    /// Reads bytes at `offset` into `buf`.
    ///
    /// Returns the number of bytes actually read. Zero means `offset` is at or
    /// past the end of the file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf` at `offset`.
    ///
    /// Returns the number of bytes actually persisted, which may be less than
    /// `buf.len()`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Returns the current length of the file in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Truncates or extends the file to `len` bytes.
    ///
    /// Extension must read back as zeroes; file-backed implementations may
    /// leave the new range sparse.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Flushes buffered writes, if the implementation buffers any.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Returns `true` if the file is empty.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    ///
    /// Returns [`io::ErrorKind::UnexpectedEof`] if the file ends before the
    /// buffer is filled.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut total = 0;

        while total < buf.len() {
            let n = self.read_at(offset + total as u64, &mut buf[total..])?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF in block file",
                ));
            }

            total += n;
        }

        Ok(())
    }

    /// Writes all of `buf` at `offset`.
    ///
    /// Returns [`io::ErrorKind::WriteZero`] if the file stops accepting bytes
    /// before the buffer is drained.
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut total = 0;

        while total < buf.len() {
            let n = self.write_at(offset + total as u64, &buf[total..])?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "block file accepted no bytes",
                ));
            }

            total += n;
        }

        Ok(())
    }
}

impl<F: BlockFile + ?Sized> BlockFile for Box<F> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        (**self).write_at(offset, buf)
    }

    fn len(&self) -> io::Result<u64> {
        (**self).len()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// In-memory block file backed by a `Vec<u8>`.
///
/// The file never grows on its own: a write that reaches the end is cut
/// short, exactly like a fixed-size device. Use [`set_len()`](BlockFile::set_len)
/// to resize it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MemFile {
    data: Vec<u8>,
}

impl std::fmt::Debug for MemFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFile")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl MemFile {
    /// Creates a zero-filled file of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for MemFile {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl BlockFile for MemFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };

        if start >= self.data.len() {
            return Ok(0);
        }

        let n = min(buf.len(), self.data.len() - start);

        buf[..n].copy_from_slice(&self.data[start..start + n]);

        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };

        if start >= self.data.len() {
            return Ok(0);
        }

        let n = min(buf.len(), self.data.len() - start);

        self.data[start..start + n].copy_from_slice(&buf[..n]);

        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "length exceeds usize"))?;

        self.data.resize(len, 0);

        Ok(())
    }
}

/// How a [`StdFile`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file for reading only.
    ReadOnly,
    /// Open for reading and writing, creating the file if it does not exist.
    ReadWriteCreate,
}

/// Block file backed by a [`std::fs::File`].
///
/// Positional I/O is implemented with seek followed by read/write on a shared
/// `&File`, so the file's own cursor is not meaningful between calls.
#[derive(Debug)]
pub struct StdFile {
    file: std::fs::File,
}

impl StdFile {
    /// Opens `path` in the given mode.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> io::Result<Self> {
        let mut options = OpenOptions::new();

        match mode {
            OpenMode::ReadOnly => options.read(true),
            OpenMode::ReadWriteCreate => options.read(true).write(true).create(true),
        };

        let file = options.open(path)?;

        Ok(Self { file })
    }

    pub fn from_file(file: std::fs::File) -> Self {
        Self { file }
    }

    pub fn into_file(self) -> std::fs::File {
        self.file
    }

    /// Flushes file data and metadata to the device.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl BlockFile for StdFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = &self.file;

        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_file_reads_stop_at_end() {
        let file = MemFile::from_vec((0..10).collect());
        let mut buf = [0xFF; 8];

        assert_eq!(file.read_at(6, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[6, 7, 8, 9]);
        assert_eq!(file.read_at(10, &mut buf).unwrap(), 0);
        assert_eq!(file.read_at(u64::MAX, &mut buf).unwrap(), 0);
    }

    #[test]
    fn mem_file_writes_never_grow_the_file() {
        let mut file = MemFile::new(4);

        assert_eq!(file.write_at(2, &[1, 2, 3]).unwrap(), 2);
        assert_eq!(file.write_at(4, &[9]).unwrap(), 0);
        assert_eq!(file.as_slice(), &[0, 0, 1, 2]);
    }

    #[test]
    fn mem_file_set_len_zero_fills() {
        let mut file = MemFile::from_vec(vec![7; 2]);

        file.set_len(5).unwrap();
        assert_eq!(file.as_slice(), &[7, 7, 0, 0, 0]);

        file.set_len(1).unwrap();
        assert_eq!(file.as_slice(), &[7]);
    }

    #[test]
    fn read_exact_at_reports_eof() {
        let file = MemFile::new(3);
        let mut buf = [0; 4];
        let err = file.read_exact_at(0, &mut buf).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn write_all_at_reports_write_zero() {
        let mut file = MemFile::new(3);
        let err = file.write_all_at(1, &[1, 2, 3]).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(file.as_slice(), &[0, 1, 2]);
    }
}
