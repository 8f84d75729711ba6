//! The error type shared by streams, backends and archives.
use std::{borrow::Cow, fmt};

use crate::inflate;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised from a stream, a filesystem backend, or an archive.
///
/// Use [`Error::kind`] to classify it.
pub struct Error(Box<ErrorInner>);

/// The classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A parameter is invalid, eg. a malformed path or conflicting open flags.
    InvalidArgument,
    /// Memory allocation failed.
    OutOfMemory,
    /// The process ran out of file handles.
    TooManyOpenFiles,
    /// The path does not exist.
    NotFound,
    /// The path already exists.
    AlreadyExists,
    /// The path is a directory where a file is expected.
    IsDirectory,
    /// An archive or compressed stream is structurally malformed.
    InvalidFile,
    /// A seek target is out of range.
    BadSeek,
    /// A size exceeds addressable memory or a configured limit.
    TooBig,
    /// A checksum does not match the content.
    ChecksumMismatch,
    /// The operation is not supported by this stream or backend.
    NotImplemented,
    /// The stream is at its end and no bytes are available.
    AtEnd,
    /// Other input/output errors from the operating system.
    Io,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::TooManyOpenFiles => "too many open files",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::IsDirectory => "is a directory",
            ErrorKind::InvalidFile => "invalid file",
            ErrorKind::BadSeek => "bad seek",
            ErrorKind::TooBig => "too big",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::AtEnd => "at end of stream",
            ErrorKind::Io => "input/output error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug)]
enum ErrorInner {
    Kind(ErrorKind),
    Message(ErrorKind, Cow<'static, str>),
    Inflate(inflate::Error),
    Io(ErrorKind, std::io::Error),
}

impl Error {
    /// Create an error of `kind` with a human readable message.
    #[cold]
    pub fn new(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Self {
        Self(Box::new(ErrorInner::Message(kind, msg.into())))
    }

    /// Shortcut for an [`ErrorKind::InvalidFile`] error.
    #[cold]
    pub(crate) fn invalid_file(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidFile, msg)
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match &*self.0 {
            ErrorInner::Kind(kind) | ErrorInner::Message(kind, _) | ErrorInner::Io(kind, _) => {
                *kind
            }
            ErrorInner::Inflate(inflate::Error::Adler32Mismatch { .. }) => {
                ErrorKind::ChecksumMismatch
            }
            ErrorInner::Inflate(inflate::Error::InvalidParam(_)) => ErrorKind::InvalidArgument,
            ErrorInner::Inflate(_) => ErrorKind::InvalidFile,
        }
    }

    /// Whether this is a [`ErrorKind::NotFound`] error.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ErrorInner::Kind(kind) => kind.fmt(f),
            ErrorInner::Message(kind, msg) => write!(f, "{kind}: {msg}"),
            ErrorInner::Inflate(err) => write!(f, "failed to inflate: {err}"),
            ErrorInner::Io(_, err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.0 {
            ErrorInner::Inflate(err) => Some(err),
            ErrorInner::Io(_, err) => Some(err),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    #[cold]
    fn from(kind: ErrorKind) -> Self {
        Self(Box::new(ErrorInner::Kind(kind)))
    }
}

impl From<inflate::Error> for Error {
    #[cold]
    fn from(err: inflate::Error) -> Self {
        Self(Box::new(ErrorInner::Inflate(err)))
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;

        let kind = match err.kind() {
            // A file used as a directory, as when a path reaches into an archive.
            IoKind::NotFound | IoKind::NotADirectory => ErrorKind::NotFound,
            IoKind::AlreadyExists => ErrorKind::AlreadyExists,
            IoKind::UnexpectedEof => ErrorKind::AtEnd,
            IoKind::OutOfMemory => ErrorKind::OutOfMemory,
            IoKind::InvalidInput => ErrorKind::InvalidArgument,
            IoKind::IsADirectory => ErrorKind::IsDirectory,
            IoKind::Unsupported => ErrorKind::NotImplemented,
            #[cfg(unix)]
            _ if err.raw_os_error() == Some(rustix::io::Errno::MFILE.raw_os_error()) => {
                ErrorKind::TooManyOpenFiles
            }
            _ => ErrorKind::Io,
        };
        Self(Box::new(ErrorInner::Io(kind, err)))
    }
}

// Needed for `Read` impl.
impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind as IoKind;

        let kind = match err.kind() {
            ErrorKind::NotFound => IoKind::NotFound,
            ErrorKind::AlreadyExists => IoKind::AlreadyExists,
            ErrorKind::InvalidArgument | ErrorKind::BadSeek => IoKind::InvalidInput,
            ErrorKind::OutOfMemory => IoKind::OutOfMemory,
            ErrorKind::AtEnd => IoKind::UnexpectedEof,
            ErrorKind::NotImplemented => IoKind::Unsupported,
            _ => IoKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}

pub(crate) trait OptionExt<T> {
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    #[inline]
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(Error::invalid_file(msg)),
        }
    }
}

pub(crate) trait BoolExt {
    fn or_context(self, msg: &'static str) -> Result<()>;
}

impl BoolExt for bool {
    #[inline]
    fn or_context(self, msg: &'static str) -> Result<()> {
        if self {
            Ok(())
        } else {
            Err(Error::invalid_file(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kind_mapping() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::AtEnd);

        let io = std::io::Error::from(Error::new(ErrorKind::BadSeek, "before start"));
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidInput);
        assert_eq!(io.to_string(), "bad seek: before start");
    }

    #[cfg(unix)]
    #[test]
    fn too_many_open_files() {
        let raw = rustix::io::Errno::MFILE.raw_os_error();
        let err = Error::from(std::io::Error::from_raw_os_error(raw));
        assert_eq!(err.kind(), ErrorKind::TooManyOpenFiles);
        let err = Error::from(std::io::Error::from_raw_os_error(rustix::io::Errno::NOENT.raw_os_error()));
        assert!(err.is_not_found());
    }

    #[test]
    fn inflate_kinds() {
        let err = Error::from(inflate::Error::Adler32Mismatch {
            expected: 1,
            computed: 2,
        });
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        let err = Error::from(inflate::Error::Corrupt("invalid block type"));
        assert_eq!(err.kind(), ErrorKind::InvalidFile);
        assert_eq!(err.to_string(), "failed to inflate: corrupt stream: invalid block type");
    }
}
