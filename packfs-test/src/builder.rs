//! A minimal ZIP writer for test fixtures.
use std::io::Write;

use flate2::{Compression, Crc, write::DeflateEncoder};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD64_SIGNATURE: u32 = 0x0606_4b50;
const EOCD64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;

/// 1980-01-01 in MS-DOS date format.
pub const DOS_EPOCH_DATE: u16 = 1 << 5 | 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflated,
    /// An unsupported method code, with the data stored as is.
    Other(u16),
}

/// Per-entry options of [`ZipBuilder::entry`].
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub flags: u16,
    /// Extra field bytes of the local header only.
    pub local_extra: Vec<u8>,
    /// Extra field bytes of the central directory record only.
    pub central_extra: Vec<u8>,
    /// Overrides the declared uncompressed size.
    pub declared_size: Option<u64>,
}

/// Writes an archive in memory, entry by entry.
#[derive(Debug, Default)]
pub struct ZipBuilder {
    out: Vec<u8>,
    records: Vec<u8>,
    count: u64,
    zip64: bool,
    comment: Vec<u8>,
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Compress `data` as raw DEFLATE.
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// An Info-ZIP extended timestamp extra block with a modification time and,
/// optionally, an access time.
pub fn extended_timestamp(mtime: i32, atime: Option<i32>) -> Vec<u8> {
    let mut out = Vec::new();
    put16(&mut out, 0x5455);
    put16(&mut out, if atime.is_some() { 9 } else { 5 });
    out.push(if atime.is_some() { 3 } else { 1 });
    out.extend_from_slice(&mtime.to_le_bytes());
    if let Some(atime) = atime {
        out.extend_from_slice(&atime.to_le_bytes());
    }
    out
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every size and offset through Zip64 fields, and a Zip64 trailer.
    pub fn zip64(&mut self, zip64: bool) -> &mut Self {
        self.zip64 = zip64;
        self
    }

    /// Set the archive comment.
    pub fn comment(&mut self, comment: &[u8]) -> &mut Self {
        self.comment = comment.to_vec();
        self
    }

    /// Prepend arbitrary bytes, eg. a self-extractor stub. Must be called
    /// before any entry.
    pub fn prefix(&mut self, data: &[u8]) -> &mut Self {
        assert_eq!(self.count, 0);
        self.out.extend_from_slice(data);
        self
    }

    pub fn stored(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.entry(name, Method::Stored, data, EntryOptions::default())
    }

    pub fn deflated(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.entry(name, Method::Deflated, data, EntryOptions::default())
    }

    /// Add an explicit directory record. `name` should end with `/`.
    pub fn dir(&mut self, name: &str) -> &mut Self {
        self.stored(name, &[])
    }

    pub fn entry(
        &mut self,
        name: &str,
        method: Method,
        data: &[u8],
        opts: EntryOptions,
    ) -> &mut Self {
        let (method, payload) = match method {
            Method::Stored => (0, data.to_vec()),
            Method::Deflated => (8, deflate(data)),
            Method::Other(code) => (code, data.to_vec()),
        };
        let mut crc = Crc::new();
        crc.update(data);
        let crc = crc.sum();
        let csize = payload.len() as u64;
        let usize_ = opts.declared_size.unwrap_or(data.len() as u64);
        let offset = self.out.len() as u64;
        let zip64 = self.zip64;
        let version = if zip64 { 45 } else { 20 };
        let small = move |v: u64| if zip64 { u32::MAX } else { v as u32 };

        let mut local_extra = Vec::new();
        if zip64 {
            put16(&mut local_extra, 1);
            put16(&mut local_extra, 16);
            put64(&mut local_extra, usize_);
            put64(&mut local_extra, csize);
        }
        local_extra.extend_from_slice(&opts.local_extra);

        let out = &mut self.out;
        put32(out, LOCAL_HEADER_SIGNATURE);
        put16(out, version);
        put16(out, opts.flags);
        put16(out, method);
        put16(out, 0);
        put16(out, DOS_EPOCH_DATE);
        put32(out, crc);
        put32(out, small(csize));
        put32(out, small(usize_));
        put16(out, name.len() as u16);
        put16(out, local_extra.len() as u16);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&local_extra);
        out.extend_from_slice(&payload);

        let mut central_extra = Vec::new();
        if zip64 {
            put16(&mut central_extra, 1);
            put16(&mut central_extra, 24);
            put64(&mut central_extra, usize_);
            put64(&mut central_extra, csize);
            put64(&mut central_extra, offset);
        }
        central_extra.extend_from_slice(&opts.central_extra);

        let rec = &mut self.records;
        put32(rec, CENTRAL_HEADER_SIGNATURE);
        put16(rec, version);
        put16(rec, version);
        put16(rec, opts.flags);
        put16(rec, method);
        put16(rec, 0);
        put16(rec, DOS_EPOCH_DATE);
        put32(rec, crc);
        put32(rec, small(csize));
        put32(rec, small(usize_));
        put16(rec, name.len() as u16);
        put16(rec, central_extra.len() as u16);
        // Comment length, start disk, internal and external attributes.
        put16(rec, 0);
        put16(rec, 0);
        put16(rec, 0);
        put32(rec, 0);
        put32(rec, small(offset));
        rec.extend_from_slice(name.as_bytes());
        rec.extend_from_slice(&central_extra);

        self.count += 1;
        self
    }

    /// Append the central directory and trailer and return the archive bytes.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = self.out.clone();
        let cd_offset = out.len() as u64;
        out.extend_from_slice(&self.records);
        let cd_size = self.records.len() as u64;

        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            put32(&mut out, EOCD64_SIGNATURE);
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, self.count);
            put64(&mut out, self.count);
            put64(&mut out, cd_size);
            put64(&mut out, cd_offset);

            put32(&mut out, EOCD64_LOCATOR_SIGNATURE);
            put32(&mut out, 0);
            put64(&mut out, eocd64_offset);
            put32(&mut out, 1);
        }

        let (count, cd_size, cd_offset) = if self.zip64 {
            (u16::MAX, u32::MAX, u32::MAX)
        } else {
            (self.count as u16, cd_size as u32, cd_offset as u32)
        };
        put32(&mut out, EOCD_SIGNATURE);
        put16(&mut out, 0);
        put16(&mut out, 0);
        put16(&mut out, count);
        put16(&mut out, count);
        put32(&mut out, cd_size);
        put32(&mut out, cd_offset);
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out
    }
}
