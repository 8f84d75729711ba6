//! The interface between the virtual filesystem and container formats.
use std::sync::Arc;

use crate::{Backend, Result, Stream};

/// A container format that can be mounted as a read-only [`Backend`].
///
/// Implementations are registered on an [`Fs`][crate::Fs] under a file
/// extension, and are used to mount matching files found during path
/// resolution. The format value itself carries any per-format configuration.
pub trait ArchiveFormat: Send + Sync {
    /// Parse the container behind `stream` and return a backend serving its
    /// entries.
    ///
    /// Failures must not leave a partially usable archive behind.
    fn mount(&self, stream: Box<dyn Stream>) -> Result<Arc<dyn Backend>>;
}

impl<F: ArchiveFormat + ?Sized> ArchiveFormat for Arc<F> {
    fn mount(&self, stream: Box<dyn Stream>) -> Result<Arc<dyn Backend>> {
        (**self).mount(stream)
    }
}
