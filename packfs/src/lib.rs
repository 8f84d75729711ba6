//! A virtual filesystem that resolves paths either to real files or to
//! entries inside container files such as `.zip` archives.
//!
//! The entry point is [`Fs`]. It dispatches to a [`Backend`], by default an
//! [`OsBackend`] rooted at some directory, and falls back to archive traversal
//! when a path does not exist there:
//!
//! ```no_run
//! use packfs::{Fs, OpenMode, OsBackend, Stream, zip::ZipFormat};
//!
//! # fn work() -> packfs::Result<()> {
//! let mut fs = Fs::new(OsBackend::new("assets"));
//! fs.register_archive("pak", ZipFormat::default())?;
//!
//! // `data/level1.pak` is a ZIP file containing `textures/wall.png`.
//! let mut file = fs.open("data/level1.pak/textures/wall.png", OpenMode::READ)?;
//! let mut header = [0u8; 8];
//! file.read_exact(&mut header)?;
//! # Ok(()) }
//! ```
//!
//! Lower level building blocks are public too: [`stream`] has the byte stream
//! abstraction and its in-memory and OS implementations, [`inflate`] is a
//! resumable raw DEFLATE decoder, and [`zip`] reads ZIP central directories.

#[cfg(feature = "log")]
#[macro_use(trace_time)]
extern crate measure_time;

#[cfg(feature = "log")]
#[macro_use(trace, debug)]
extern crate log;

#[cfg(not(feature = "log"))]
#[macro_use]
mod macros {
    macro_rules! trace {
        ($($tt:tt)*) => {
            let _ = if false {
                let _ = ::std::format_args!($($tt)*);
            };
        };
    }

    macro_rules! debug {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }

    macro_rules! trace_time {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }
}

macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err(Into::into($err))
    };
}

/// Bit set newtypes over an unsigned integer, with named constants.
macro_rules! impl_flags {
    ($name:ident($repr:ty); $($(#[$meta:meta])* $flag:ident = $value:expr,)*) => {
        impl $name {
            $(
                $(#[$meta])*
                pub const $flag: Self = Self($value);
            )*

            /// No flags set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// The raw bits.
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Whether all flags in `other` are set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut set = f.debug_set();
                $(
                    if self.contains(Self::$flag) && Self::$flag.0 != 0 {
                        set.entry(&format_args!(stringify!($flag)));
                    }
                )*
                set.finish()
            }
        }
    };
}

pub mod archive;
pub mod error;
pub mod fs;
pub mod inflate;
pub mod stream;
pub mod zip;

pub use positioned_io;

use std::{cmp::Ordering, ops::Range};

pub use archive::ArchiveFormat;
pub use error::{Error, ErrorKind, Result};
pub use fs::{Backend, DirEntry, File, FileInfo, Fs, OpenMode, OsBackend, ReadDir};
pub use stream::{FileStream, MemoryStream, ReadAtStream, Stream, StreamIo};

/// Below this many candidates, lookups scan linearly instead of bisecting.
const LINEAR_SEARCH_THRESHOLD: usize = 10;

/// There is currently no binary search functions in std over a generic range.
/// This is copied from std: <https://github.com/rust-lang/rust/blob/1.86.0/library/core/src/slice/mod.rs#L2817>
/// License: MIT OR Apache-2.0
fn bisect_range_by<F>(range: Range<usize>, mut f: F) -> Option<usize>
where
    F: FnMut(usize) -> Ordering,
{
    let total_size = range.end - range.start;
    let mut size = total_size;
    if size == 0 {
        return None;
    }
    let mut base = range.start;

    while size > 1 {
        let half = size / 2;
        let mid = base + half;
        let cmp = f(mid);
        base = if cmp == Ordering::Greater { base } else { mid };
        size -= half;
    }

    let cmp = f(base);
    if cmp == Ordering::Equal {
        debug_assert!(base < range.end);
        Some(base)
    } else {
        None
    }
}

/// Find the position in `range` where `f` returns `Equal`, scanning linearly
/// for short ranges and bisecting otherwise.
///
/// `f` must be consistent with a sorted order over `range` for the bisection
/// to agree with the scan.
fn search_range_by<F>(range: Range<usize>, mut f: F) -> Option<usize>
where
    F: FnMut(usize) -> Ordering,
{
    if range.len() < LINEAR_SEARCH_THRESHOLD {
        range.into_iter().find(|&i| f(i) == Ordering::Equal)
    } else {
        bisect_range_by(range, f)
    }
}
