//! Read-only ZIP archives, with Zip64 support.
//!
//! [`ZipArchive`] parses the central directory of a [`Stream`] once, keeps a
//! copy of it in memory, and serves entries through [`ZipFile`] handles. All
//! handles share the one underlying stream, guarded by a mutex held only for
//! each seek-and-read pair, so handles can be read from different threads.
//!
//! Only stored and deflated entries are supported. Encrypted entries and
//! multi-disk archives are rejected.
//!
//! To serve ZIP files found during path resolution, register a [`ZipFormat`]
//! on an [`Fs`][crate::Fs].
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bstr::ByteSlice;

use crate::{
    ArchiveFormat, Backend, DirEntry, Error, ErrorKind, File, FileInfo, OpenMode, ReadDir, Result,
    Stream, error::OptionExt,
};

mod directory;
mod file;
pub mod format;

use directory::CentralDirectory;
use format::{Trailer, read_exact_at};

pub use file::ZipFile;

/// Limits and buffer sizes of a [`ZipArchive`].
#[derive(Debug, Clone)]
pub struct Config {
    central_directory_size_limit: u64,
    stored_cache_size: usize,
    compressed_cache_size: usize,
    inflate_window_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            central_directory_size_limit: 64 << 20,
            stored_cache_size: 16 << 10,
            compressed_cache_size: 16 << 10,
            inflate_window_size: 64 << 10,
        }
    }
}

impl Config {
    /// The minimum [`Config::inflate_window_size`], the largest DEFLATE
    /// back-reference distance.
    pub const MIN_INFLATE_WINDOW_SIZE: usize = 32 << 10;

    /// Central directories larger than this are rejected with
    /// [`ErrorKind::TooBig`].
    pub fn central_directory_size_limit(mut self, limit: u64) -> Self {
        self.central_directory_size_limit = limit;
        self
    }

    /// The read-ahead buffer size of each stored entry handle. Reads at least
    /// this large bypass it.
    pub fn stored_cache_size(mut self, size: usize) -> Self {
        self.stored_cache_size = size.max(1);
        self
    }

    /// The compressed input buffer size of each deflated entry handle.
    pub fn compressed_cache_size(mut self, size: usize) -> Self {
        self.compressed_cache_size = size.max(1);
        self
    }

    /// The decompression ring buffer size of each deflated entry handle. It
    /// is rounded up to a power of two, and at least
    /// [`Config::MIN_INFLATE_WINDOW_SIZE`].
    ///
    /// Entries not larger than this are decompressed into a buffer of their
    /// exact size instead, so seeking backwards never restarts decompression.
    pub fn inflate_window_size(mut self, size: usize) -> Self {
        self.inflate_window_size = size
            .max(Self::MIN_INFLATE_WINDOW_SIZE)
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        self
    }
}

/// The [`ArchiveFormat`] of ZIP files.
#[derive(Debug, Clone, Default)]
pub struct ZipFormat {
    config: Config,
}

impl ZipFormat {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl ArchiveFormat for ZipFormat {
    fn mount(&self, stream: Box<dyn Stream>) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(ZipArchive::new_with_config(stream, self.config.clone())?))
    }
}

/// State shared by an archive and all its open files.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) directory: CentralDirectory,
    pub(crate) stream_len: u64,
    stream: Mutex<Box<dyn Stream>>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Stream>> {
        // Every access seeks first, so a panic mid-read leaves nothing stale.
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read exactly `buf.len()` bytes at `offset` of the archive stream.
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut stream = self.lock();
        read_exact_at(&mut **stream, offset, buf)
    }
}

/// A mounted ZIP archive.
#[derive(Clone)]
pub struct ZipArchive {
    shared: Arc<Shared>,
}

impl fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchive")
            .field("stream_len", &self.shared.stream_len)
            .field("directory", &self.shared.directory)
            .finish_non_exhaustive()
    }
}

impl ZipArchive {
    /// Parse the archive in `stream` with the default [`Config`].
    pub fn new(stream: impl Stream + 'static) -> Result<Self> {
        Self::new_with_config(stream, Config::default())
    }

    /// Same as [`ZipArchive::new`] but with a non-default [`Config`].
    pub fn new_with_config(stream: impl Stream + 'static, config: Config) -> Result<Self> {
        let mut stream: Box<dyn Stream> = Box::new(stream);
        let stream_len = stream.len()?;
        let trailer = Trailer::locate(&mut *stream, stream_len)?;
        debug!(
            "central directory at {} of {} bytes with {} records, zip64: {}",
            trailer.cd_offset, trailer.cd_size, trailer.total_entries, trailer.is_zip64,
        );

        if trailer.cd_size > config.central_directory_size_limit {
            bail!(Error::new(
                ErrorKind::TooBig,
                format!(
                    "central directory has {} bytes, exceeding the limit of {} bytes",
                    trailer.cd_size, config.central_directory_size_limit,
                ),
            ));
        }
        let size = usize::try_from(trailer.cd_size).map_err(|_| ErrorKind::TooBig)?;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| ErrorKind::OutOfMemory)?;
        data.resize(size, 0);
        read_exact_at(&mut *stream, trailer.cd_offset, &mut data)?;

        let directory = CentralDirectory::new(data.into_boxed_slice(), trailer.total_entries)?;
        debug!("mounted ZIP archive with {} distinct records", directory.len());

        // The mutex is only created once everything else is in place.
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                directory,
                stream_len,
                stream: Mutex::new(stream),
            }),
        })
    }

    /// The number of distinct records in the central directory.
    pub fn len(&self) -> usize {
        self.shared.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open the file at a normalized `path` inside the archive.
    pub fn open_file(&self, path: &str) -> Result<ZipFile> {
        let dir = &self.shared.directory;
        let node = self.lookup(path)?;
        if dir.node_is_dir(node) {
            bail!(Error::new(
                ErrorKind::IsDirectory,
                format!("{path:?} is a directory"),
            ));
        }
        let pos = dir.node_record(node).context("file node without a record")?;
        let entry = dir.entry(pos)?;
        ZipFile::new(self.shared.clone(), entry)
    }

    fn lookup(&self, path: &str) -> Result<usize> {
        self.shared.directory.lookup(path).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("{path:?} is not found in the archive"),
            )
        })
    }
}

impl Backend for ZipArchive {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>> {
        if mode.writes() {
            bail!(Error::new(
                ErrorKind::NotImplemented,
                "ZIP archives are read-only",
            ));
        }
        Ok(Box::new(self.open_file(path)?))
    }

    fn info(&self, path: &str) -> Result<FileInfo> {
        let node = self.lookup(path)?;
        self.shared.directory.node_info(node)
    }

    fn read_dir(&self, path: &str) -> Result<ReadDir> {
        let node = self.lookup(path)?;
        if !self.shared.directory.node_is_dir(node) {
            bail!(Error::new(
                ErrorKind::InvalidArgument,
                format!("{path:?} is not a directory"),
            ));
        }
        let shared = self.shared.clone();
        let iter = shared.directory.node_children(node).map(move |child| {
            let dir = &shared.directory;
            let name = dir.node_name(child).to_str_lossy().into_owned();
            Ok(DirEntry::new(name, dir.node_info(child)?))
        });
        Ok(ReadDir::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_clamps() {
        let config = Config::default()
            .stored_cache_size(0)
            .compressed_cache_size(0)
            .inflate_window_size(1000);
        assert_eq!(config.stored_cache_size, 1);
        assert_eq!(config.compressed_cache_size, 1);
        assert_eq!(config.inflate_window_size, 32 << 10);

        let config = Config::default().inflate_window_size((64 << 10) + 1);
        assert_eq!(config.inflate_window_size, 128 << 10);
    }

    #[test]
    fn not_a_zip() {
        let err = ZipArchive::new(crate::MemoryStream::new(&b"short"[..])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFile);
        let err = ZipArchive::new(crate::MemoryStream::new(vec![0u8; 100_000])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFile);
    }

    #[test]
    fn empty_archive() {
        // An EOCD record alone, followed by a comment.
        let mut data = vec![0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(b"note");
        let zip = ZipArchive::new(crate::MemoryStream::new(data)).unwrap();
        assert!(zip.is_empty());
        assert!(zip.info("").unwrap().is_dir());
        assert_eq!(zip.read_dir("").unwrap().count(), 0);
        assert!(zip.open("x", OpenMode::READ).err().unwrap().is_not_found());
        assert_eq!(
            zip.open("x", OpenMode::WRITE).err().unwrap().kind(),
            ErrorKind::NotImplemented
        );
    }
}
