//! The virtual filesystem: backends, file handles and archive-aware path
//! resolution.
//!
//! Virtual paths are `/`-separated and relative to the backend root. Empty and
//! `.` segments are ignored, and `..` is rejected.
use std::{
    collections::HashMap,
    fmt,
    io::SeekFrom,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use crate::{ArchiveFormat, Error, ErrorKind, FileStream, Result, Stream};

/// How a file is opened.
///
/// At least one of [`OpenMode::READ`] and [`OpenMode::WRITE`] must be set.
/// [`OpenMode::APPEND`] and [`OpenMode::TRUNCATE`] require
/// [`OpenMode::WRITE`] and exclude each other.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenMode(u8);

impl_flags! {
    OpenMode(u8);

    READ = 1 << 0,
    /// Open for writing, creating the file if it does not exist.
    WRITE = 1 << 1,
    /// Every write goes to the end of the file.
    APPEND = 1 << 2,
    /// Truncate an existing file to zero length.
    TRUNCATE = 1 << 3,
}

impl OpenMode {
    /// Whether the mode requests any kind of write access.
    pub const fn writes(self) -> bool {
        self.0 & (Self::WRITE.0 | Self::APPEND.0 | Self::TRUNCATE.0) != 0
    }

    /// Check the flag combination.
    pub fn validate(self) -> Result<()> {
        if !self.contains(Self::READ) && !self.contains(Self::WRITE) {
            bail!(Error::new(
                ErrorKind::InvalidArgument,
                "open mode requires read or write access",
            ));
        }
        if self.contains(Self::APPEND | Self::TRUNCATE) {
            bail!(Error::new(
                ErrorKind::InvalidArgument,
                "append and truncate are mutually exclusive",
            ));
        }
        if self.writes() && !self.contains(Self::WRITE) {
            bail!(Error::new(
                ErrorKind::InvalidArgument,
                "append and truncate require write access",
            ));
        }
        Ok(())
    }
}

/// Metadata of a file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    len: u64,
    is_dir: bool,
    modified: Option<SystemTime>,
    accessed: Option<SystemTime>,
}

impl FileInfo {
    pub fn new(len: u64, is_dir: bool) -> Self {
        Self {
            len,
            is_dir,
            modified: None,
            accessed: None,
        }
    }

    #[must_use]
    pub fn with_modified(mut self, time: Option<SystemTime>) -> Self {
        self.modified = time;
        self
    }

    #[must_use]
    pub fn with_accessed(mut self, time: Option<SystemTime>) -> Self {
        self.accessed = time;
        self
    }

    /// The size in bytes. For directories, this is backend specific and
    /// usually zero.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    #[inline]
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    #[inline]
    pub fn accessed(&self) -> Option<SystemTime> {
        self.accessed
    }
}

impl From<&std::fs::Metadata> for FileInfo {
    fn from(meta: &std::fs::Metadata) -> Self {
        Self::new(meta.len(), meta.is_dir())
            .with_modified(meta.modified().ok())
            .with_accessed(meta.accessed().ok())
    }
}

/// An entry yielded by [`ReadDir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: String,
    info: FileInfo,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, info: FileInfo) -> Self {
        Self {
            name: name.into(),
            info,
        }
    }

    /// The file name, without any directory part.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }
}

/// A lazy, forward-only iterator over directory entries.
///
/// The `.` and `..` pseudo-entries are never yielded.
pub struct ReadDir {
    inner: Box<dyn Iterator<Item = Result<DirEntry>> + Send>,
}

impl fmt::Debug for ReadDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadDir").finish_non_exhaustive()
    }
}

impl ReadDir {
    pub fn new(iter: impl Iterator<Item = Result<DirEntry>> + Send + 'static) -> Self {
        Self {
            inner: Box::new(iter),
        }
    }
}

impl Iterator for ReadDir {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(ent) if ent.name == "." || ent.name == ".." => {}
                ret => return Some(ret),
            }
        }
    }
}

/// An open file: a [`Stream`] that also knows its metadata.
pub trait File: Stream {
    fn info(&self) -> Result<FileInfo>;
}

impl<F: File + ?Sized> File for Box<F> {
    fn info(&self) -> Result<FileInfo> {
        (**self).info()
    }
}

/// A source of files addressed by virtual paths.
///
/// Paths passed in are already normalized: `/`-separated, without empty, `.`
/// or `..` segments. The empty path is the root directory.
pub trait Backend: Send + Sync {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>>;

    fn info(&self, path: &str) -> Result<FileInfo>;

    fn read_dir(&self, path: &str) -> Result<ReadDir> {
        let _ = path;
        Err(ErrorKind::NotImplemented.into())
    }
}

/// Normalize a user supplied virtual path.
pub(crate) fn normalize(path: &str) -> Result<String> {
    let mut out = String::with_capacity(path.len());
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => bail!(Error::new(
                ErrorKind::InvalidArgument,
                format!("parent directory segment in path {path:?}"),
            )),
            _ => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(seg);
            }
        }
    }
    Ok(out)
}

/// A [`Backend`] over a directory of the host filesystem.
#[derive(Debug, Clone)]
pub struct OsBackend {
    root: PathBuf,
}

impl OsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Paths are normalized again, so that direct callers cannot escape the root.
    fn host_path(&self, path: &str) -> Result<PathBuf> {
        let path = normalize(path)?;
        let mut host = self.root.clone();
        host.extend(path.split('/').filter(|seg| !seg.is_empty()));
        Ok(host)
    }
}

impl Backend for OsBackend {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>> {
        mode.validate()?;
        let file = std::fs::OpenOptions::new()
            .read(mode.contains(OpenMode::READ))
            .write(mode.contains(OpenMode::WRITE))
            .append(mode.contains(OpenMode::APPEND))
            .truncate(mode.contains(OpenMode::TRUNCATE))
            .create(mode.contains(OpenMode::WRITE))
            .open(self.host_path(path)?)?;
        if file.metadata()?.is_dir() {
            bail!(Error::new(
                ErrorKind::IsDirectory,
                format!("cannot open directory {path:?}"),
            ));
        }
        Ok(Box::new(OsFile(FileStream::new(file, mode.writes()))))
    }

    fn info(&self, path: &str) -> Result<FileInfo> {
        let meta = std::fs::metadata(self.host_path(path)?)?;
        Ok(FileInfo::from(&meta))
    }

    fn read_dir(&self, path: &str) -> Result<ReadDir> {
        let iter = std::fs::read_dir(self.host_path(path)?)?.map(|ent| {
            let ent = ent?;
            // Follow symlinks, as `open` does.
            let meta = std::fs::metadata(ent.path())?;
            let name = ent.file_name().to_string_lossy().into_owned();
            Ok(DirEntry::new(name, FileInfo::from(&meta)))
        });
        Ok(ReadDir::new(iter))
    }
}

#[derive(Debug)]
struct OsFile(FileStream);

impl Stream for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.0.write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.0.seek(pos)
    }

    fn tell(&mut self) -> Result<u64> {
        self.0.tell()
    }

    fn len(&mut self) -> Result<u64> {
        self.0.len()
    }
}

impl File for OsFile {
    fn info(&self) -> Result<FileInfo> {
        Ok(FileInfo::from(&self.0.get_ref().metadata()?))
    }
}

type MountMap = HashMap<String, Arc<dyn Backend>>;

/// How many archives deep resolution goes by default.
pub const DEFAULT_MAX_NESTING: usize = 16;

/// A backend reached during resolution: the root, or an archive `depth` levels
/// deep mounted at virtual path `key`.
#[derive(Clone, Copy)]
struct Level<'a> {
    backend: &'a dyn Backend,
    key: &'a str,
    depth: usize,
}

/// An operation on a path of a [`Level`], resolved through archives.
type Op<'a, T> = &'a dyn Fn(Level<'_>, &str) -> Result<T>;

/// The virtual filesystem.
///
/// Every operation first goes to the root backend. If the path is not found
/// there and the operation does not write, it is retried through archives
/// found along the path:
///
/// - A segment whose name has a registered archive extension, and which is not
///   the last segment, is mounted and the remainder of the path is resolved
///   inside it. Any failure here is final.
/// - Otherwise, each sibling of the segment with a registered archive
///   extension is mounted and the segment with the remainder is resolved inside
///   it. The first success wins.
///
/// Resolution recurses into mounted archives, so archives nested in archives
/// work the same way, down to [`Fs::set_max_nesting`] levels. Mounted archives
/// are cached by their full virtual path and live as long as the `Fs`.
pub struct Fs {
    backend: Box<dyn Backend>,
    formats: Vec<(String, Arc<dyn ArchiveFormat>)>,
    mounted: Mutex<MountMap>,
    max_nesting: usize,
}

impl fmt::Debug for Fs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fs")
            .field(
                "formats",
                &self.formats.iter().map(|(ext, _)| ext).collect::<Vec<_>>(),
            )
            .field("mounted", &self.mounted().keys().collect::<Vec<_>>())
            .field("max_nesting", &self.max_nesting)
            .finish_non_exhaustive()
    }
}

impl Fs {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            formats: Vec::new(),
            mounted: Mutex::new(HashMap::new()),
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }

    /// Set how many archives deep resolution may go. Deeper archives are
    /// skipped while searching siblings, and fail with [`ErrorKind::TooBig`]
    /// when named in the path.
    ///
    /// Defaults to [`DEFAULT_MAX_NESTING`].
    pub fn set_max_nesting(&mut self, depth: usize) {
        self.max_nesting = depth;
    }

    /// Register an archive format for files ending with `.{ext}`, compared
    /// case-insensitively. A leading dot in `ext` is ignored.
    ///
    /// Formats registered earlier take precedence on overlapping extensions.
    pub fn register_archive(
        &mut self,
        ext: &str,
        format: impl ArchiveFormat + 'static,
    ) -> Result<()> {
        let ext = ext.strip_prefix('.').unwrap_or(ext);
        if ext.is_empty() || ext.contains('/') {
            bail!(Error::new(
                ErrorKind::InvalidArgument,
                format!("invalid archive extension {ext:?}"),
            ));
        }
        self.formats.push((ext.to_owned(), Arc::new(format)));
        Ok(())
    }

    /// Open a file.
    ///
    /// Opening for write never looks into archives.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>> {
        mode.validate()?;
        let path = normalize(path)?;
        if mode.writes() {
            return self.backend.open(&path, mode);
        }
        self.resolve(self.root(), &path, &|lvl, p| lvl.backend.open(p, mode))
    }

    /// Get the metadata of a file or directory.
    pub fn info(&self, path: &str) -> Result<FileInfo> {
        let path = normalize(path)?;
        self.resolve(self.root(), &path, &|lvl, p| lvl.backend.info(p))
    }

    /// List a directory.
    pub fn read_dir(&self, path: &str) -> Result<ReadDir> {
        let path = normalize(path)?;
        self.resolve(self.root(), &path, &|lvl, p| lvl.backend.read_dir(p))
    }

    /// Mount the archive at `path`, or get it from the cache.
    ///
    /// The archive file itself is located the same way as [`Fs::open`].
    pub fn open_archive(&self, path: &str) -> Result<Arc<dyn Backend>> {
        let path = normalize(path)?;
        self.resolve(self.root(), &path, &|lvl, p| self.mount(lvl, p))
    }

    /// Whether the archive at virtual path `path` is mounted.
    pub fn is_mounted(&self, path: &str) -> bool {
        normalize(path).is_ok_and(|path| self.mounted().contains_key(&path))
    }

    fn root(&self) -> Level<'_> {
        Level {
            backend: &*self.backend,
            key: "",
            depth: 0,
        }
    }

    fn mounted(&self) -> MutexGuard<'_, MountMap> {
        self.mounted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn format_for(&self, name: &str) -> Option<&Arc<dyn ArchiveFormat>> {
        let name = name.as_bytes();
        self.formats.iter().find_map(|(ext, format)| {
            let ext = ext.as_bytes();
            let stem_len = name.len().checked_sub(ext.len() + 1)?;
            (stem_len > 0
                && name[stem_len] == b'.'
                && name[stem_len + 1..].eq_ignore_ascii_case(ext))
            .then_some(format)
        })
    }

    /// Mount the archive file `path` of `parent`.
    fn mount(&self, parent: Level<'_>, path: &str) -> Result<Arc<dyn Backend>> {
        let key = join(parent.key, path);
        if parent.depth >= self.max_nesting {
            bail!(Error::new(
                ErrorKind::TooBig,
                format!("{key:?} is nested deeper than {} archives", self.max_nesting),
            ));
        }
        if let Some(archive) = self.mounted().get(&key) {
            return Ok(archive.clone());
        }

        let name = path.rsplit('/').next().unwrap_or(path);
        let Some(format) = self.format_for(name) else {
            bail!(Error::new(
                ErrorKind::InvalidArgument,
                format!("no archive format is registered for {key:?}"),
            ));
        };
        let file = parent.backend.open(path, OpenMode::READ)?;
        // The lock is not held while mounting, which may resolve nested paths.
        let archive = format.mount(Box::new(file))?;
        debug!("mounted archive {key:?}");
        Ok(self.mounted().entry(key).or_insert(archive).clone())
    }

    fn resolve<T>(&self, lvl: Level<'_>, path: &str, op: Op<'_, T>) -> Result<T> {
        match op(lvl, path) {
            Err(err) if err.is_not_found() => {}
            ret => return ret,
        }
        if path.is_empty() || self.formats.is_empty() {
            bail!(ErrorKind::NotFound);
        }
        trace!("{:?} is not found, searching archives", join(lvl.key, path));

        let segments = path.split('/').collect::<Vec<_>>();
        for (i, &seg) in segments.iter().enumerate() {
            let dir = segments[..i].join("/");
            let rest = segments[i + 1..].join("/");

            if !rest.is_empty() && self.format_for(seg).is_some() {
                let archive_path = join(&dir, seg);
                let archive = self.mount(lvl, &archive_path)?;
                let key = join(lvl.key, &archive_path);
                return self.resolve(lvl.enter(&*archive, &key), &rest, op);
            }

            let Ok(siblings) = lvl.backend.read_dir(&dir) else {
                // Deeper directories do not exist in this backend either.
                break;
            };
            let inner_path = join(seg, &rest);
            for ent in siblings {
                let Ok(ent) = ent else { continue };
                if ent.info().is_dir() || self.format_for(ent.name()).is_none() {
                    continue;
                }
                let archive_path = join(&dir, ent.name());
                let archive = match self.mount(lvl, &archive_path) {
                    Ok(archive) => archive,
                    Err(err) => {
                        debug!("skipping {archive_path:?}: {err}");
                        continue;
                    }
                };
                let key = join(lvl.key, &archive_path);
                if let Ok(ret) = self.resolve(lvl.enter(&*archive, &key), &inner_path, op) {
                    trace!("found {inner_path:?} in {key:?}");
                    return Ok(ret);
                }
            }
        }
        Err(Error::new(
            ErrorKind::NotFound,
            format!("{:?} is not found", join(lvl.key, path)),
        ))
    }
}

impl<'a> Level<'a> {
    fn enter(self, backend: &'a dyn Backend, key: &'a str) -> Self {
        Level {
            backend,
            key,
            depth: self.depth + 1,
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    match (dir.is_empty(), name.is_empty()) {
        (true, _) => name.to_owned(),
        (_, true) => dir.to_owned(),
        _ => format!("{dir}/{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    #[test]
    fn open_mode() {
        OpenMode::READ.validate().unwrap();
        (OpenMode::WRITE | OpenMode::APPEND).validate().unwrap();
        (OpenMode::READ | OpenMode::WRITE | OpenMode::TRUNCATE)
            .validate()
            .unwrap();

        for bad in [
            OpenMode::empty(),
            OpenMode::APPEND,
            OpenMode::READ | OpenMode::TRUNCATE,
            OpenMode::WRITE | OpenMode::APPEND | OpenMode::TRUNCATE,
        ] {
            let err = bad.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{bad:?}");
        }
        assert!(!OpenMode::READ.writes());
        assert_eq!(
            format!("{:?}", OpenMode::READ | OpenMode::WRITE),
            "{READ, WRITE}"
        );
    }

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize("").unwrap(), "");
        assert_eq!(normalize("/a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize("./x").unwrap(), "x");
        let err = normalize("a/../b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn read_dir_skips_pseudo_entries() {
        let info = FileInfo::new(0, true);
        let entries = [".", "a", "..", "b"].map(|name| Ok::<_, Error>(DirEntry::new(name, info)));
        let names = ReadDir::new(entries.into_iter())
            .map(|ent| ent.unwrap().name().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a", "b"]);
    }

    /// A flat backend of in-memory files, counting mounts of its archives.
    struct Flat(Vec<(&'static str, Vec<u8>)>);

    impl Backend for Flat {
        fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>> {
            if mode.writes() {
                bail!(ErrorKind::NotImplemented);
            }
            let (_, data) = self
                .0
                .iter()
                .find(|(name, _)| *name == path)
                .ok_or(ErrorKind::NotFound)?;
            Ok(Box::new(MemFile(MemoryStream::new(data.clone()))))
        }

        fn info(&self, path: &str) -> Result<FileInfo> {
            match self.0.iter().find(|(name, _)| *name == path) {
                Some((_, data)) => Ok(FileInfo::new(data.len() as u64, false)),
                None if path.is_empty() => Ok(FileInfo::new(0, true)),
                None => Err(ErrorKind::NotFound.into()),
            }
        }

        fn read_dir(&self, path: &str) -> Result<ReadDir> {
            if !path.is_empty() {
                bail!(ErrorKind::NotFound);
            }
            let entries = self
                .0
                .iter()
                .map(|(name, data)| {
                    Ok::<_, Error>(DirEntry::new(*name, FileInfo::new(data.len() as u64, false)))
                })
                .collect::<Vec<_>>();
            Ok(ReadDir::new(entries.into_iter()))
        }
    }

    struct MemFile(MemoryStream);

    impl Stream for MemFile {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.0.read(buf)
        }

        fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
            self.0.seek(pos)
        }

        fn tell(&mut self) -> Result<u64> {
            self.0.tell()
        }
    }

    impl File for MemFile {
        fn info(&self) -> Result<FileInfo> {
            Ok(FileInfo::new(self.0.get_ref().len() as u64, false))
        }
    }

    /// A toy format: the container content is a list of `name=content` lines.
    struct Lines;

    impl ArchiveFormat for Lines {
        fn mount(&self, mut stream: Box<dyn Stream>) -> Result<Arc<dyn Backend>> {
            let mut buf = vec![0u8; stream.len()? as usize];
            stream.read_exact(&mut buf)?;
            let text = String::from_utf8(buf).map_err(|_| Error::invalid_file("not utf-8"))?;
            let files = text
                .lines()
                .map(|line| {
                    let (name, content) = line.split_once('=').ok_or(ErrorKind::InvalidFile)?;
                    let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
                    Ok((name, content.as_bytes().to_vec()))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Arc::new(Flat(files)))
        }
    }

    fn read_all(mut file: Box<dyn File>) -> Vec<u8> {
        let mut buf = vec![0u8; file.len().unwrap() as usize];
        file.read_exact(&mut buf).unwrap();
        buf
    }

    fn test_fs() -> Fs {
        let mut fs = Fs::new(Flat(vec![
            ("plain.txt", b"plain".to_vec()),
            ("a.lines", b"x=from a\nshared=a".to_vec()),
            ("b.LINES", b"y=from b\nshared=b\nnested.lines=z=deep".to_vec()),
            ("broken.lines", b"no separator".to_vec()),
        ]));
        fs.register_archive(".lines", Lines).unwrap();
        fs
    }

    #[test]
    fn register_rejects_empty() {
        let mut fs = test_fs();
        assert_eq!(
            fs.register_archive(".", Lines).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn resolution() {
        let fs = test_fs();
        assert_eq!(read_all(fs.open("plain.txt", OpenMode::READ).unwrap()), b"plain");

        // Explicit archive.
        assert_eq!(read_all(fs.open("a.lines/x", OpenMode::READ).unwrap()), b"from a");
        assert_eq!(read_all(fs.open("b.LINES/y", OpenMode::READ).unwrap()), b"from b");
        assert!(fs.is_mounted("a.lines"));

        // Sibling scan, skipping the broken archive.
        assert_eq!(read_all(fs.open("y", OpenMode::READ).unwrap()), b"from b");
        assert!(fs.is_mounted("b.LINES"));
        assert!(!fs.is_mounted("broken.lines"));

        // Nested.
        assert_eq!(read_all(fs.open("b.LINES/nested.lines/z", OpenMode::READ).unwrap()), b"deep");
        assert!(fs.is_mounted("b.LINES/nested.lines"));

        assert!(fs.open("missing", OpenMode::READ).err().unwrap().is_not_found());
        assert_eq!(fs.info("x").unwrap().len(), 6);
    }

    #[test]
    fn explicit_archive_fails_closed() {
        let fs = test_fs();
        // `x` exists in `a.lines`, but the named archive is broken.
        let err = fs.open("broken.lines/x", OpenMode::READ).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidFile);
        // `y` only exists in `b.LINES`, which is not searched.
        let err = fs.open("a.lines/y", OpenMode::READ).err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn write_skips_archives() {
        let fs = test_fs();
        let err = fs.open("x", OpenMode::WRITE).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
    }

    #[test]
    fn archive_cache() {
        let fs = test_fs();
        let first = fs.open_archive("a.lines").unwrap();
        let second = fs.open_archive("/a.lines").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            fs.open_archive("plain.txt").err().unwrap().kind(),
            ErrorKind::InvalidArgument
        );
    }
}
