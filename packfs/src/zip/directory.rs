//! The in-memory central directory: the verbatim record bytes, an index of
//! records sorted by name, and a directory tree over that index.
//!
//! Names are compared byte-wise, case-sensitively. Only `/` separates path
//! segments, so a `\` is an ordinary name byte.
use std::{cmp::Ordering, fmt, ops::Range};

use crate::{
    Error, ErrorKind, FileInfo, Result, bisect_range_by,
    error::OptionExt,
    search_range_by,
};

use super::format::{CENTRAL_HEADER_SIZE, Entry, Record};

pub(crate) const ROOT: usize = 0;

/// A node of the directory tree.
///
/// A directory node covers a contiguous range of the sorted index, which its
/// children partition in order. A file node covers exactly its own record.
#[derive(Debug, Clone, Copy)]
struct Node {
    /// The name segment of this node in `data`, without separators.
    name_start: u32,
    name_len: u32,
    is_dir: bool,
    /// Length of the name prefix shared by all records below this node,
    /// including the trailing separator.
    prefix_len: u32,
    entries_start: u32,
    entries_end: u32,
    children_start: u32,
    children_end: u32,
    /// The index position of the record naming exactly this node.
    record: Option<u32>,
}

impl Node {
    fn entries(&self) -> Range<usize> {
        self.entries_start as usize..self.entries_end as usize
    }

    fn children(&self) -> Range<usize> {
        self.children_start as usize..self.children_end as usize
    }
}

pub(crate) struct CentralDirectory {
    data: Box<[u8]>,
    /// Offsets of records in `data`, sorted by name and deduplicated.
    index: Box<[u32]>,
    nodes: Box<[Node]>,
}

impl fmt::Debug for CentralDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralDirectory")
            .field("size", &self.data.len())
            .field("records", &self.index.len())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// The name of the record at `offset`. The record must be validated.
fn name_at(data: &[u8], offset: u32) -> &[u8] {
    let offset = offset as usize;
    let name_len = u16::from_le_bytes([data[offset + 28], data[offset + 29]]);
    let start = offset + CENTRAL_HEADER_SIZE;
    &data[start..start + usize::from(name_len)]
}

/// Compare tree keys, which are name segments with a `/` appended for
/// directories.
fn key_cmp(a: &[u8], a_dir: bool, b: &[u8], b_dir: bool) -> Ordering {
    let a = a.iter().chain(a_dir.then_some(&b'/'));
    let b = b.iter().chain(b_dir.then_some(&b'/'));
    a.cmp(b)
}

/// Split the first key off a non-empty name suffix: `(segment, is_dir)`.
fn next_key(rest: &[u8]) -> (&[u8], bool) {
    match rest.iter().position(|&b| b == b'/') {
        Some(i) => (&rest[..i], true),
        None => (rest, false),
    }
}

/// Whether `name` has `seg/` at `prefix_len`.
fn has_dir_key(name: &[u8], prefix_len: usize, seg: &[u8]) -> bool {
    let end = prefix_len + seg.len();
    name.len() > end && name[prefix_len..end] == *seg && name[end] == b'/'
}

fn count_keys(name: &[u8]) -> usize {
    let dirs = name.iter().filter(|&&b| b == b'/').count();
    let has_file = name.last().is_some_and(|&b| b != b'/');
    dirs + usize::from(has_file)
}

fn common_keys(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b)
        .take_while(|(x, y)| x == y)
        .filter(|&(&x, _)| x == b'/')
        .count()
}

impl CentralDirectory {
    /// Validate the central directory `data` of `total_entries` records and
    /// build its index and tree.
    pub fn new(data: Box<[u8]>, total_entries: u64) -> Result<Self> {
        trace_time!("build index of {total_entries} central directory records");

        u32::try_from(data.len()).map_err(|_| {
            Error::new(
                ErrorKind::TooBig,
                format!("central directory of {} bytes is too large", data.len()),
            )
        })?;
        let count = usize::try_from(total_entries)
            .ok()
            .context("central directory record count overflows")?;

        let mut index = Vec::with_capacity(count);
        let mut offset = 0usize;
        for _ in 0..count {
            let record = Record::parse(&data[offset..])?;
            // Reject malformed Zip64 fields before anything is served.
            record.entry()?;
            index.push(offset as u32);
            offset += record.len;
        }

        // Stable, so the earliest of duplicated names survives.
        index.sort_by(|&a, &b| name_at(&data, a).cmp(name_at(&data, b)));
        index.dedup_by(|later, earlier| name_at(&data, *later) == name_at(&data, *earlier));
        if index.len() != count {
            debug!("dropped {} records with duplicated names", count - index.len());
        }

        let nodes = build_tree(&data, &index);
        Ok(Self {
            data,
            index: index.into_boxed_slice(),
            nodes: nodes.into_boxed_slice(),
        })
    }

    /// The number of distinct records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// The name of the record at sorted position `pos`.
    pub fn name(&self, pos: usize) -> &[u8] {
        name_at(&self.data, self.index[pos])
    }

    pub fn entry(&self, pos: usize) -> Result<Entry> {
        Record::parse(&self.data[self.index[pos] as usize..])?.entry()
    }

    /// Find a record by name by scanning the index.
    pub fn find_linear(&self, name: &[u8]) -> Option<usize> {
        (0..self.index.len()).find(|&pos| self.name(pos) == name)
    }

    /// Find a record by name by bisecting the index.
    pub fn find_sorted(&self, name: &[u8]) -> Option<usize> {
        bisect_range_by(0..self.index.len(), |pos| self.name(pos).cmp(name))
    }

    /// Find the tree node of a normalized path. Files take precedence over
    /// directories of the same name.
    pub fn lookup(&self, path: &str) -> Option<usize> {
        if path.is_empty() {
            return Some(ROOT);
        }
        let mut node = ROOT;
        let mut segments = path.as_bytes().split(|&b| b == b'/').peekable();
        while let Some(seg) = segments.next() {
            let children = self.nodes[node].children();
            node = if segments.peek().is_some() {
                self.find_child(children, seg, true)?
            } else {
                self.find_child(children.clone(), seg, false)
                    .or_else(|| self.find_child(children, seg, true))?
            };
        }
        Some(node)
    }

    fn find_child(&self, children: Range<usize>, seg: &[u8], is_dir: bool) -> Option<usize> {
        search_range_by(children, |i| {
            key_cmp(self.node_name(i), self.nodes[i].is_dir, seg, is_dir)
        })
    }

    pub fn node_name(&self, node: usize) -> &[u8] {
        let n = &self.nodes[node];
        let start = n.name_start as usize;
        &self.data[start..start + n.name_len as usize]
    }

    pub fn node_is_dir(&self, node: usize) -> bool {
        self.nodes[node].is_dir
    }

    /// The index position of the record naming exactly this node. Implicit
    /// directories have none.
    pub fn node_record(&self, node: usize) -> Option<usize> {
        self.nodes[node].record.map(|pos| pos as usize)
    }

    pub fn node_children(&self, node: usize) -> Range<usize> {
        self.nodes[node].children()
    }

    pub fn node_info(&self, node: usize) -> Result<FileInfo> {
        let is_dir = self.node_is_dir(node);
        let Some(pos) = self.node_record(node) else {
            return Ok(FileInfo::new(0, true));
        };
        let entry = self.entry(pos)?;
        let len = if is_dir { 0 } else { entry.uncompressed_size };
        Ok(FileInfo::new(len, is_dir)
            .with_modified(entry.modified)
            .with_accessed(entry.accessed))
    }
}

/// Build the tree over a sorted, deduplicated index, breadth first, so that the
/// children of each node are contiguous.
fn build_tree(data: &[u8], index: &[u32]) -> Vec<Node> {
    trace_time!("build directory tree");

    // Each record adds the keys it does not share with its predecessor.
    let mut bound = 1;
    let mut prev: &[u8] = &[];
    for &offset in index {
        let name = name_at(data, offset);
        bound += count_keys(name) - common_keys(prev, name);
        prev = name;
    }

    let mut nodes = Vec::with_capacity(bound);
    nodes.push(Node {
        name_start: 0,
        name_len: 0,
        is_dir: true,
        prefix_len: 0,
        entries_start: 0,
        entries_end: index.len() as u32,
        children_start: 0,
        children_end: 0,
        record: None,
    });

    let mut cur = 0;
    while cur < nodes.len() {
        let prefix_len = nodes[cur].prefix_len as usize;
        let entries = nodes[cur].entries();
        let children_start = nodes.len();

        let mut pos = entries.start;
        while pos < entries.end {
            let offset = index[pos];
            let name = name_at(data, offset);
            let rest = &name[prefix_len..];
            if rest.is_empty() {
                // Sorts first in its range.
                nodes[cur].record = Some(pos as u32);
                pos += 1;
                continue;
            }

            let (seg, is_dir) = next_key(rest);
            let mut end = pos + 1;
            if is_dir {
                while end < entries.end && has_dir_key(name_at(data, index[end]), prefix_len, seg) {
                    end += 1;
                }
            }
            nodes.push(Node {
                name_start: (offset as usize + CENTRAL_HEADER_SIZE + prefix_len) as u32,
                name_len: seg.len() as u32,
                is_dir,
                prefix_len: (prefix_len + seg.len() + usize::from(is_dir)) as u32,
                entries_start: pos as u32,
                entries_end: end as u32,
                children_start: 0,
                children_end: 0,
                record: None,
            });
            pos = end;
        }

        nodes[cur].children_start = children_start as u32;
        nodes[cur].children_end = nodes.len() as u32;
        cur += 1;
    }

    debug_assert!(nodes.len() <= bound, "{} > {bound}", nodes.len());
    nodes
}

#[cfg(test)]
mod tests {
    use zerocopy::{FromZeros, IntoBytes, little_endian as le};

    use super::*;
    use crate::zip::format::{CENTRAL_HEADER_SIGNATURE, CentralDirectoryHeader, EXTRA_ZIP64};

    struct Rec<'a> {
        name: &'a str,
        sizes: [u32; 3],
        extra: Vec<u8>,
    }

    fn rec(name: &str, offset: u32) -> Rec<'_> {
        Rec {
            name,
            sizes: [10, 20, offset],
            extra: Vec::new(),
        }
    }

    fn encode(recs: &[Rec<'_>]) -> (Box<[u8]>, u64) {
        let mut out = Vec::new();
        for r in recs {
            let mut h = CentralDirectoryHeader::new_zeroed();
            h.signature = le::U32::new(CENTRAL_HEADER_SIGNATURE);
            h.method = le::U16::new(8);
            h.compressed_size = le::U32::new(r.sizes[0]);
            h.uncompressed_size = le::U32::new(r.sizes[1]);
            h.local_header_offset = le::U32::new(r.sizes[2]);
            h.name_len = le::U16::new(r.name.len() as u16);
            h.extra_len = le::U16::new(r.extra.len() as u16);
            h.comment_len = le::U16::new(3);
            out.extend_from_slice(h.as_bytes());
            out.extend_from_slice(r.name.as_bytes());
            out.extend_from_slice(&r.extra);
            out.extend_from_slice(b"cmt");
        }
        (out.into_boxed_slice(), recs.len() as u64)
    }

    fn build(recs: &[Rec<'_>]) -> Result<CentralDirectory> {
        let (data, count) = encode(recs);
        CentralDirectory::new(data, count)
    }

    fn sample() -> CentralDirectory {
        let mut names = vec![
            "b/z.txt".to_owned(),
            "a.txt".to_owned(),
            "b/".to_owned(),
            "b/c/d.txt".to_owned(),
            "b-sibling".to_owned(),
            "win\\".to_owned(),
            "win/inner".to_owned(),
            "a".to_owned(),
            "a/x".to_owned(),
        ];
        // Enough children to bisect.
        names.extend((0..30).rev().map(|i| format!("many/f{i:02}")));
        let recs = names
            .iter()
            .enumerate()
            .map(|(i, name)| rec(name, i as u32))
            .collect::<Vec<_>>();
        build(&recs).unwrap()
    }

    fn path_of(cd: &CentralDirectory, node: usize) -> Option<String> {
        let pos = cd.node_record(node)?;
        Some(String::from_utf8(cd.name(pos).to_vec()).unwrap())
    }

    #[test]
    fn sorted_index() {
        let cd = sample();
        for pos in 1..cd.len() {
            assert!(cd.name(pos - 1) < cd.name(pos));
        }
        for pos in 0..cd.len() {
            let name = cd.name(pos);
            assert_eq!(cd.find_linear(name), Some(pos));
            assert_eq!(cd.find_sorted(name), Some(pos));
        }
        for missing in ["", "b", "many/f30", "zzz", "b/c/"] {
            assert_eq!(cd.find_linear(missing.as_bytes()), None, "{missing}");
            assert_eq!(cd.find_sorted(missing.as_bytes()), None, "{missing}");
        }
        assert_eq!(cd.find_sorted(b"win/"), None);
    }

    #[test]
    fn tree_lookup() {
        let cd = sample();
        let find = |path: &str| cd.lookup(path).and_then(|node| path_of(&cd, node));

        assert_eq!(find("b/c/d.txt").as_deref(), Some("b/c/d.txt"));
        assert_eq!(find("b").as_deref(), Some("b/"));
        assert_eq!(find("win\\").as_deref(), Some("win\\"));
        assert!(cd.node_is_dir(cd.lookup("win").unwrap()));
        assert!(!cd.node_is_dir(cd.lookup("win\\").unwrap()));
        assert_eq!(find("win/inner").as_deref(), Some("win/inner"));
        assert_eq!(find("many/f07").as_deref(), Some("many/f07"));
        // A file shadows a directory of the same name.
        assert_eq!(find("a").as_deref(), Some("a"));
        assert_eq!(find("a/x").as_deref(), Some("a/x"));

        // Implicit directories have no record.
        let c = cd.lookup("b/c").unwrap();
        assert!(cd.node_is_dir(c));
        assert_eq!(cd.node_record(c), None);
        assert!(cd.node_info(c).unwrap().is_dir());

        for missing in ["nope", "a.txt/x", "b/c/d.txt/e", "many/f99", "b/c/"] {
            assert_eq!(cd.lookup(missing), None, "{missing}");
        }

        let root_children = cd
            .node_children(ROOT)
            .map(|i| String::from_utf8(cd.node_name(i).to_vec()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            root_children,
            ["a", "a.txt", "a", "b-sibling", "b", "many", "win", "win\\"]
        );

        let info = cd.node_info(cd.lookup("many/f01").unwrap()).unwrap();
        assert_eq!(info.len(), 20);
        assert!(!info.is_dir());
    }

    /// Collect the records of all nodes under `node`, in tree order.
    fn walk(cd: &CentralDirectory, node: usize, out: &mut Vec<usize>) {
        out.extend(cd.node_record(node));
        for child in cd.node_children(node) {
            walk(cd, child, out);
        }
    }

    #[test]
    fn tree_partitions_index() {
        let cd = sample();
        for node in 0..cd.nodes.len() {
            let n = cd.nodes[node];
            if !n.is_dir {
                assert_eq!(n.entries().len(), 1);
                continue;
            }
            // Children partition the range without gaps, after the node's own record.
            let mut expect_start = n.entries().start + usize::from(n.record.is_some());
            for child in n.children() {
                assert_eq!(cd.nodes[child].entries().start, expect_start);
                expect_start = cd.nodes[child].entries().end;
            }
            assert_eq!(expect_start, n.entries().end);

            // Tree order equals a prefix-filtered linear scan.
            let mut got = Vec::new();
            walk(&cd, node, &mut got);
            let prefix = &cd.name(n.entries().start)[..n.prefix_len as usize];
            let expect = (0..cd.len())
                .filter(|&pos| cd.name(pos).starts_with(prefix))
                .collect::<Vec<_>>();
            assert_eq!(got, expect, "node {node}");
        }
    }

    #[test]
    fn backslash_is_a_name_byte() {
        let cd = build(&[rec("a\\", 1), rec("a0", 2), rec("a/x", 3), rec("a/", 4)]).unwrap();
        let names = (0..cd.len()).map(|pos| cd.name(pos)).collect::<Vec<_>>();
        assert_eq!(names, [&b"a/"[..], &b"a/x"[..], &b"a0"[..], &b"a\\"[..]]);

        let dir = cd.lookup("a").unwrap();
        assert!(cd.node_is_dir(dir));
        assert_eq!(path_of(&cd, dir).as_deref(), Some("a/"));
        let file = cd.lookup("a\\").unwrap();
        assert!(!cd.node_is_dir(file));
        assert!(!cd.entry(cd.node_record(file).unwrap()).unwrap().is_dir);
        assert_eq!(cd.node_info(file).unwrap().len(), 20);
        assert_eq!(cd.lookup("a\\/x"), None);
    }

    #[test]
    fn duplicates_keep_first() {
        let cd = build(&[rec("x", 1), rec("dup", 2), rec("dup", 3), rec("dup/", 4)]).unwrap();
        assert_eq!(cd.len(), 3);
        let pos = cd.find_sorted(b"dup").unwrap();
        assert_eq!(cd.entry(pos).unwrap().local_header_offset, 2);
    }

    fn zip64_extra(fields: &[u64]) -> Vec<u8> {
        let mut extra = Vec::new();
        extra.extend_from_slice(&EXTRA_ZIP64.to_le_bytes());
        extra.extend_from_slice(&(fields.len() as u16 * 8).to_le_bytes());
        for f in fields {
            extra.extend_from_slice(&f.to_le_bytes());
        }
        extra
    }

    #[test]
    fn zip64_fields() {
        let plain = build(&[rec("f", 7000)]).unwrap().entry(0).unwrap();

        // All overflowed, in the order uncompressed, compressed, offset.
        let mut all = rec("f", u32::MAX);
        all.sizes = [u32::MAX; 3];
        // An unrelated extra block comes first.
        all.extra = [0x55, 0x54, 0x01, 0x00, 0x00].to_vec();
        all.extra.extend(zip64_extra(&[20, 10, 7000]));
        let all = build(&[all]).unwrap().entry(0).unwrap();

        // Only the offset overflowed.
        let mut offset_only = rec("f", u32::MAX);
        offset_only.extra = zip64_extra(&[7000]);
        let offset_only = build(&[offset_only]).unwrap().entry(0).unwrap();

        for entry in [all, offset_only] {
            assert_eq!(
                (entry.compressed_size, entry.uncompressed_size, entry.local_header_offset),
                (plain.compressed_size, plain.uncompressed_size, plain.local_header_offset),
            );
        }

        let mut big = rec("f", 0);
        big.sizes[0] = u32::MAX;
        big.extra = zip64_extra(&[5 << 32]);
        let big = build(&[big]).unwrap().entry(0).unwrap();
        assert_eq!(big.compressed_size, 5 << 32);
    }

    #[test]
    fn malformed_fails_closed() {
        let mut truncated = rec("ok", u32::MAX);
        truncated.sizes[1] = u32::MAX;
        truncated.extra = zip64_extra(&[1]);
        let err = build(&[rec("a", 0), truncated]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFile);

        let mut missing = rec("f", u32::MAX);
        missing.extra = Vec::new();
        assert_eq!(build(&[missing]).unwrap_err().kind(), ErrorKind::InvalidFile);

        // More records claimed than present.
        let (data, _) = encode(&[rec("a", 0)]);
        let err = CentralDirectory::new(data, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFile);
    }
}
