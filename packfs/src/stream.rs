//! The minimal byte stream abstraction underlying files, archives and
//! in-memory buffers.
//!
//! A [`Stream`] is a cursor over some byte source with `read`, `seek`, `tell`
//! and an optional `write` capability. Implementations here:
//!
//! - [`MemoryStream`] over an owned buffer, either read-only or growable.
//! - [`FileStream`] over an operating system file handle.
//! - [`ReadAtStream`] over any [`positioned_io::ReadAt`] random access source.
//!
//! [`StreamIo`] adapts any stream to [`std::io::Read`], [`std::io::Write`] and
//! [`std::io::Seek`].
use std::{fmt, io::SeekFrom};

use positioned_io::{ReadAt, Size};

use crate::{Error, ErrorKind, Result};

/// A byte stream with a cursor.
///
/// `read` returns the number of bytes actually transferred, which may be less
/// than requested. When the cursor is at the end and no bytes are available,
/// it fails with [`ErrorKind::AtEnd`], even if `buf` is empty. Use
/// [`Stream::read_exact`] to require an exact-count transfer.
pub trait Stream: Send {
    /// Read up to `buf.len()` bytes at the cursor and advance it.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes at the cursor and advance it.
    ///
    /// Only streams opened with a write capability support this, others fail
    /// with [`ErrorKind::NotImplemented`].
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let _ = buf;
        bail!(ErrorKind::NotImplemented)
    }

    /// Move the cursor and return its new offset from the start.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// The current cursor offset from the start.
    fn tell(&mut self) -> Result<u64>;

    /// Read exactly `buf.len()` bytes, or fail with [`ErrorKind::AtEnd`].
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                bail!(Error::new(ErrorKind::AtEnd, "stream ended before the requested length"));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Write all of `buf`, or fail.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                bail!(Error::new(ErrorKind::Io, "stream accepted no more bytes"));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// The total length of the stream, keeping the cursor unchanged.
    fn len(&mut self) -> Result<u64> {
        let pos = self.tell()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(len)
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn tell(&mut self) -> Result<u64> {
        (**self).tell()
    }

    fn len(&mut self) -> Result<u64> {
        (**self).len()
    }
}

/// Resolve a seek request against a stream of known length.
///
/// Targets before the start or after the end fail with [`ErrorKind::BadSeek`].
pub(crate) fn resolve_seek(pos: SeekFrom, cur: u64, len: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(off) => Some(off),
        SeekFrom::Current(delta) => cur.checked_add_signed(delta),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
    };
    match target {
        Some(off) if off <= len => Ok(off),
        _ => Err(Error::new(
            ErrorKind::BadSeek,
            format!("seek to {pos:?} is out of range for a stream of {len} bytes"),
        )),
    }
}

/// A stream over an owned in-memory buffer.
///
/// Streams created by [`MemoryStream::new`] are read-only. Those created by
/// [`MemoryStream::writable`] also accept writes, overwriting bytes at the
/// cursor and growing the buffer past its end.
#[derive(Clone, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
    writable: bool,
}

impl fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStream")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .field("writable", &self.writable)
            .finish()
    }
}

impl MemoryStream {
    /// A read-only stream over `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            writable: false,
        }
    }

    /// A read-write stream over `data`, starting at offset 0.
    pub fn writable(data: impl Into<Vec<u8>>) -> Self {
        Self {
            writable: true,
            ..Self::new(data)
        }
    }

    pub fn get_ref(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Stream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            bail!(ErrorKind::AtEnd);
        }
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        self.pos += len;
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            bail!(Error::new(ErrorKind::NotImplemented, "memory stream is read-only"));
        }
        let end = self.pos.checked_add(buf.len()).ok_or(ErrorKind::TooBig)?;
        if end > self.data.len() {
            self.data
                .try_reserve(end - self.data.len())
                .map_err(|_| ErrorKind::OutOfMemory)?;
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let off = resolve_seek(pos, self.pos as u64, self.data.len() as u64)?;
        // Bounded by the in-memory length.
        self.pos = off as usize;
        Ok(off)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// A stream over an operating system file.
#[derive(Debug)]
pub struct FileStream {
    file: std::fs::File,
    writable: bool,
}

impl FileStream {
    /// Wrap an opened file. `writable` must reflect whether it was opened for
    /// writing.
    pub fn new(file: std::fs::File, writable: bool) -> Self {
        Self { file, writable }
    }

    /// Open an existing file read-only.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(std::fs::File::open(path)?, false))
    }

    pub fn get_ref(&self) -> &std::fs::File {
        &self.file
    }

    pub fn into_inner(self) -> std::fs::File {
        self.file
    }
}

impl Stream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use std::io::{Read, Seek};

        if buf.is_empty() {
            let pos = self.file.stream_position()?;
            if pos >= self.file.metadata()?.len() {
                bail!(ErrorKind::AtEnd);
            }
            return Ok(0);
        }
        match self.file.read(buf)? {
            0 => bail!(ErrorKind::AtEnd),
            n => Ok(n),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;

        if !self.writable {
            bail!(Error::new(ErrorKind::NotImplemented, "file is not opened for writing"));
        }
        Ok(self.file.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        use std::io::Seek;

        // Seeking past the end is allowed on OS files; before the start is not.
        self.file
            .seek(pos)
            .map_err(|err| Error::new(ErrorKind::BadSeek, err.to_string()))
    }

    fn tell(&mut self) -> Result<u64> {
        use std::io::Seek;

        Ok(self.file.stream_position()?)
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// A read-only stream with a cursor over a random access source.
///
/// This allows mounting an archive from anything implementing
/// [`positioned_io::ReadAt`], eg. a slice of a larger file.
#[derive(Debug)]
pub struct ReadAtStream<R> {
    rdr: R,
    len: u64,
    pos: u64,
}

impl<R: ReadAt> ReadAtStream<R> {
    /// Wrap `rdr` whose readable length is `len` bytes.
    pub fn new(rdr: R, len: u64) -> Self {
        Self { rdr, len, pos: 0 }
    }

    /// Wrap `rdr`, querying its length via [`Size`].
    pub fn with_size(rdr: R) -> Result<Self>
    where
        R: Size,
    {
        let len = rdr
            .size()?
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "source has no known size"))?;
        Ok(Self::new(rdr, len))
    }

    pub fn get_ref(&self) -> &R {
        &self.rdr
    }

    pub fn into_inner(self) -> R {
        self.rdr
    }
}

impl<R: ReadAt + Send> Stream for ReadAtStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = self.len.saturating_sub(self.pos);
        if rest == 0 {
            bail!(ErrorKind::AtEnd);
        }
        let want = usize::try_from(rest).map_or(buf.len(), |rest| rest.min(buf.len()));
        let n = self.rdr.read_at(self.pos, &mut buf[..want])?;
        if n == 0 && want != 0 {
            bail!(Error::new(ErrorKind::AtEnd, "source is shorter than its declared size"));
        }
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.len)
    }
}

/// An adapter implementing [`std::io`] traits for a [`Stream`].
///
/// Reads at the end of the stream return `Ok(0)` as `std::io::Read` expects.
#[derive(Debug)]
pub struct StreamIo<S>(pub S);

impl<S: Stream> std::io::Read for StreamIo<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::AtEnd => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl<S: Stream> std::io::Write for StreamIo<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.0.write(buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<S: Stream> std::io::Seek for StreamIo<S> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Ok(self.0.seek(pos)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn memory_read_contract() {
        let mut s = MemoryStream::new(&b"hello"[..]);
        let mut buf = [0u8; 3];
        assert_eq!(s.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(s.read(&mut buf).unwrap(), 2);
        assert_eq!(s.tell().unwrap(), 5);

        // At end, even a zero-length read reports it.
        assert_eq!(s.read(&mut []).unwrap_err().kind(), ErrorKind::AtEnd);
        assert_eq!(s.read(&mut buf).unwrap_err().kind(), ErrorKind::AtEnd);

        s.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(s.read_exact(&mut [0u8; 8]).unwrap_err().kind(), ErrorKind::AtEnd);
    }

    #[test]
    fn memory_seek_bounds() {
        let mut s = MemoryStream::new(vec![0u8; 10]);
        assert_eq!(s.seek(SeekFrom::End(-3)).unwrap(), 7);
        assert_eq!(s.seek(SeekFrom::Current(2)).unwrap(), 9);
        assert_eq!(s.seek(SeekFrom::End(0)).unwrap(), 10);
        assert_eq!(
            s.seek(SeekFrom::Current(-11)).unwrap_err().kind(),
            ErrorKind::BadSeek
        );
        assert_eq!(s.seek(SeekFrom::Start(11)).unwrap_err().kind(), ErrorKind::BadSeek);
        assert_eq!(s.tell().unwrap(), 10);
        assert_eq!(s.len().unwrap(), 10);
    }

    #[test]
    fn memory_write_capability() {
        let mut ro = MemoryStream::new(vec![1, 2, 3]);
        assert_eq!(ro.write(b"x").unwrap_err().kind(), ErrorKind::NotImplemented);

        let mut rw = MemoryStream::writable(vec![1, 2, 3]);
        rw.seek(SeekFrom::Start(2)).unwrap();
        rw.write_all(b"abc").unwrap();
        assert_eq!(rw.into_inner(), [1, 2, b'a', b'b', b'c']);
    }

    #[test]
    fn read_at_stream() {
        let data: Vec<u8> = (0..=255).collect();
        let mut s = ReadAtStream::new(data, 200);
        s.seek(SeekFrom::Start(190)).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(s.read(&mut buf).unwrap(), 10);
        assert_eq!(buf[..10], (190..200).collect::<Vec<u8>>()[..]);
        assert_eq!(s.read(&mut buf).unwrap_err().kind(), ErrorKind::AtEnd);
        assert_eq!(s.len().unwrap(), 200);
    }

    #[test]
    fn io_adapter() {
        let mut out = Vec::new();
        let mut io = StreamIo(Box::new(MemoryStream::new(&b"abcdef"[..])) as Box<dyn Stream>);
        io.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }
}
