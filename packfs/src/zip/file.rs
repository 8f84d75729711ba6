//! Reading entry data of an opened ZIP entry.
use std::{fmt, io::SeekFrom, sync::Arc};

use crate::{
    Error, ErrorKind, File, FileInfo, Result, Stream,
    error::{BoolExt, OptionExt},
    inflate::{Decompressor, Flags, Status},
    stream::resolve_seek,
};

use super::{
    Shared,
    format::{self, Entry, FLAG_ENCRYPTED, METHOD_DEFLATED, METHOD_STORED},
};

/// An opened file inside a [`ZipArchive`][super::ZipArchive].
///
/// Each handle has its own cursor and caches. The archive stream is only
/// locked while cache misses are served, so handles of one archive may be read
/// concurrently from different threads.
pub struct ZipFile {
    shared: Arc<Shared>,
    entry: Entry,
    data_start: u64,
    pos: u64,
    reader: Reader,
}

enum Reader {
    Stored(StoredReader),
    Deflated(Box<DeflatedReader>),
}

impl fmt::Debug for ZipFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFile")
            .field("entry", &self.entry)
            .field("data_start", &self.data_start)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl ZipFile {
    pub(crate) fn new(shared: Arc<Shared>, entry: Entry) -> Result<Self> {
        if entry.flags & FLAG_ENCRYPTED != 0 {
            bail!(Error::new(
                ErrorKind::NotImplemented,
                "encrypted entries are not supported",
            ));
        }
        match entry.method {
            METHOD_STORED => (entry.compressed_size == entry.uncompressed_size)
                .or_context("stored entry with different compressed and uncompressed sizes")?,
            METHOD_DEFLATED => {}
            method => bail!(Error::new(
                ErrorKind::NotImplemented,
                format!("unsupported compression method {method}"),
            )),
        }

        let data_start = {
            let mut stream = shared.lock();
            format::data_start(&mut **stream, entry.local_header_offset)?
        };
        let data_end = data_start
            .checked_add(entry.compressed_size)
            .context("entry data offset overflows")?;
        (data_end <= shared.stream_len).or_context("entry data is out of bounds")?;
        trace!(
            "open entry at {} with {} compressed bytes, method {}",
            data_start, entry.compressed_size, entry.method,
        );

        let reader = if entry.method == METHOD_STORED {
            Reader::Stored(StoredReader::new(shared.config.stored_cache_size))
        } else {
            Reader::Deflated(Box::new(DeflatedReader::new(
                shared.config.compressed_cache_size,
                shared.config.inflate_window_size,
                entry.uncompressed_size,
            )?))
        };

        Ok(Self {
            shared,
            entry,
            data_start,
            pos: 0,
            reader,
        })
    }

    /// The central directory metadata of this entry.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl Stream for ZipFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let size = self.entry.uncompressed_size;
        if self.pos >= size {
            bail!(ErrorKind::AtEnd);
        }
        // Bounded by `buf.len()`.
        let want = (size - self.pos).min(buf.len() as u64) as usize;
        let buf = &mut buf[..want];
        let n = match &mut self.reader {
            Reader::Stored(r) => r.read(&self.shared, self.data_start, size, self.pos, buf)?,
            Reader::Deflated(r) => r.read(&self.shared, self.data_start, &self.entry, self.pos, buf)?,
        };
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.pos, self.entry.uncompressed_size)?;
        if let Reader::Deflated(r) = &mut self.reader {
            r.prepare_seek(target);
        }
        self.pos = target;
        Ok(target)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.entry.uncompressed_size)
    }
}

impl File for ZipFile {
    fn info(&self) -> Result<FileInfo> {
        Ok(FileInfo::new(self.entry.uncompressed_size, false)
            .with_modified(self.entry.modified)
            .with_accessed(self.entry.accessed))
    }
}

fn alloc(len: usize) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ErrorKind::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf.into_boxed_slice())
}

/// Reads of a stored entry, through a read-ahead cache.
struct StoredReader {
    cache: Box<[u8]>,
    cache_cap: usize,
    /// Entry offset of `cache[0]`.
    cache_start: u64,
    cache_len: usize,
}

impl StoredReader {
    fn new(cache_cap: usize) -> Self {
        Self {
            // Allocated on the first miss.
            cache: Box::default(),
            cache_cap,
            cache_start: 0,
            cache_len: 0,
        }
    }

    fn read(
        &mut self,
        shared: &Shared,
        data_start: u64,
        size: u64,
        pos: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let cache_end = self.cache_start + self.cache_len as u64;
        if self.cache_start <= pos && pos < cache_end {
            let off = (pos - self.cache_start) as usize;
            let n = buf.len().min(self.cache_len - off);
            buf[..n].copy_from_slice(&self.cache[off..off + n]);
            return Ok(n);
        }

        if buf.len() >= self.cache_cap {
            shared.read_at(data_start + pos, buf)?;
            return Ok(buf.len());
        }

        if self.cache.is_empty() {
            self.cache = alloc(self.cache_cap)?;
        }
        // Bounded by the cache capacity.
        let fill = (size - pos).min(self.cache_cap as u64) as usize;
        shared.read_at(data_start + pos, &mut self.cache[..fill])?;
        self.cache_start = pos;
        self.cache_len = fill;
        let n = buf.len().min(fill);
        buf[..n].copy_from_slice(&self.cache[..n]);
        Ok(n)
    }
}

/// Reads of a deflated entry.
///
/// Decompressed output goes into `window`, which is either a ring buffer
/// holding the most recent output, or a buffer holding the whole entry. Reads
/// are served from it, so small seeks backwards are cheap. Seeking backwards
/// past it restarts decompression from the entry start.
struct DeflatedReader {
    decomp: Decompressor,
    input: Box<[u8]>,
    input_start: usize,
    input_end: usize,
    /// Compressed bytes read from the archive so far.
    loaded: u64,

    window: Box<[u8]>,
    non_wrapping: bool,
    /// Write position in `window`, congruent to `produced` modulo its length.
    out_pos: usize,
    /// Total bytes decompressed so far.
    produced: u64,
}

impl DeflatedReader {
    fn new(input_cap: usize, window_size: usize, uncompressed_size: u64) -> Result<Self> {
        let (window_len, non_wrapping) = match usize::try_from(uncompressed_size) {
            Ok(len) if len <= window_size => (len, true),
            _ => (window_size, false),
        };
        Ok(Self {
            decomp: Decompressor::new(),
            input: alloc(input_cap)?,
            input_start: 0,
            input_end: 0,
            loaded: 0,
            window: alloc(window_len)?,
            non_wrapping,
            out_pos: 0,
            produced: 0,
        })
    }

    /// The entry offset of the oldest byte still held by `window`.
    fn window_start(&self) -> u64 {
        if self.non_wrapping {
            0
        } else {
            self.produced.saturating_sub(self.window.len() as u64)
        }
    }

    fn prepare_seek(&mut self, target: u64) {
        if target < self.window_start() {
            debug!(
                "seek back to {target} before the inflate window at {}, restart",
                self.window_start(),
            );
            self.decomp.reset();
            self.input_start = 0;
            self.input_end = 0;
            self.loaded = 0;
            self.out_pos = 0;
            self.produced = 0;
        }
    }

    fn read(
        &mut self,
        shared: &Shared,
        data_start: u64,
        entry: &Entry,
        pos: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        // Reads after a restart decode forward from the entry start.
        self.prepare_seek(pos);
        while self.produced <= pos {
            self.fill(shared, data_start, entry)?;
        }

        let len = self.window.len();
        // Bounded by the window length.
        let avail = (self.produced - pos) as usize;
        let n = buf.len().min(avail);
        let idx = if self.non_wrapping {
            pos as usize
        } else {
            (pos % len as u64) as usize
        };
        let first = n.min(len - idx);
        buf[..first].copy_from_slice(&self.window[idx..idx + first]);
        buf[first..n].copy_from_slice(&self.window[..n - first]);
        Ok(n)
    }

    /// Decompress at least one more byte into the window.
    fn fill(&mut self, shared: &Shared, data_start: u64, entry: &Entry) -> Result<()> {
        if self.decomp.is_done() {
            bail!(Error::invalid_file(
                "deflate stream is shorter than the declared size"
            ));
        }
        if !self.non_wrapping && self.out_pos == self.window.len() {
            self.out_pos = 0;
        }

        loop {
            if self.input_start == self.input_end && self.loaded < entry.compressed_size {
                // Bounded by the input buffer length.
                let n = (entry.compressed_size - self.loaded).min(self.input.len() as u64) as usize;
                shared.read_at(data_start + self.loaded, &mut self.input[..n])?;
                self.loaded += n as u64;
                self.input_start = 0;
                self.input_end = n;
            }

            let mut flags = Flags::default();
            if self.loaded < entry.compressed_size {
                flags |= Flags::HAS_MORE_INPUT;
            }
            if self.non_wrapping {
                flags |= Flags::NON_WRAPPING_OUTPUT;
            }
            let progress = self.decomp.decompress(
                &self.input[self.input_start..self.input_end],
                &mut self.window,
                self.out_pos,
                flags,
            )?;
            self.input_start += progress.consumed;
            self.out_pos += progress.produced;
            self.produced += progress.produced as u64;

            if self.produced > entry.uncompressed_size {
                bail!(Error::invalid_file(
                    "deflate stream is longer than the declared size"
                ));
            }
            match progress.status {
                Status::Done => {
                    (self.produced == entry.uncompressed_size)
                        .or_context("deflate stream is shorter than the declared size")?;
                    return Ok(());
                }
                _ if progress.produced != 0 => return Ok(()),
                // Only a whole-entry buffer can be full here.
                Status::HasMoreOutput => bail!(Error::invalid_file(
                    "deflate stream is longer than the declared size"
                )),
                Status::NeedsMoreInput => {}
            }
        }
    }
}
