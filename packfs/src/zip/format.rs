//! The low-level on-disk structures of ZIP archives.
//!
//! Only the subset needed for reading single-disk archives with stored or
//! deflated entries is covered, including the Zip64 extensions.
//!
//! See also:
//! [APPNOTE.TXT](https://pkware.cachefly.net/webdocs/casestudies/APPNOTE.TXT)
use std::{
    io::SeekFrom,
    time::{Duration, SystemTime},
};

use chrono::NaiveDate;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, little_endian as le};

use crate::{
    Error, ErrorKind, Result, Stream,
    error::{BoolExt, OptionExt},
};

pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
pub const EOCD64_SIGNATURE: u32 = 0x0606_4b50;
pub const EOCD64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

/// General purpose flag: the entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;

pub const EXTRA_ZIP64: u16 = 0x0001;
pub const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;

/// The maximum length of the archive comment following the EOCD record.
pub const MAX_COMMENT_LEN: u64 = 0xFFFF;

const SCAN_CHUNK_SIZE: u64 = 4 << 10;

/// The End-Of-Central-Directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct EndOfCentralDirectory {
    pub signature: le::U32,
    pub disk_number: le::U16,
    pub cd_start_disk: le::U16,
    pub disk_entries: le::U16,
    pub total_entries: le::U16,
    pub cd_size: le::U32,
    pub cd_offset: le::U32,
    pub comment_len: le::U16,
}

/// Locates the [`Zip64EndOfCentralDirectory`]. It immediately precedes the
/// [`EndOfCentralDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Zip64Locator {
    pub signature: le::U32,
    pub eocd64_disk: le::U32,
    pub eocd64_offset: le::U64,
    pub total_disks: le::U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Zip64EndOfCentralDirectory {
    pub signature: le::U32,
    /// Size of the rest of this record, excluding the leading 12 bytes.
    pub record_size: le::U64,
    pub version_made_by: le::U16,
    pub version_needed: le::U16,
    pub disk_number: le::U32,
    pub cd_start_disk: le::U32,
    pub disk_entries: le::U64,
    pub total_entries: le::U64,
    pub cd_size: le::U64,
    pub cd_offset: le::U64,
}

/// The fixed part of a central directory record. It is followed by the file
/// name, the extra field and the file comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct CentralDirectoryHeader {
    pub signature: le::U32,
    pub version_made_by: le::U16,
    pub version_needed: le::U16,
    pub flags: le::U16,
    pub method: le::U16,
    pub mtime: le::U16,
    pub mdate: le::U16,
    pub crc32: le::U32,
    pub compressed_size: le::U32,
    pub uncompressed_size: le::U32,
    pub name_len: le::U16,
    pub extra_len: le::U16,
    pub comment_len: le::U16,
    pub disk_start: le::U16,
    pub internal_attrs: le::U16,
    pub external_attrs: le::U32,
    pub local_header_offset: le::U32,
}

/// The fixed part of a local file header. It is followed by the file name and
/// the extra field, which may differ from those in the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct LocalFileHeader {
    pub signature: le::U32,
    pub version_needed: le::U16,
    pub flags: le::U16,
    pub method: le::U16,
    pub mtime: le::U16,
    pub mdate: le::U16,
    pub crc32: le::U32,
    pub compressed_size: le::U32,
    pub uncompressed_size: le::U32,
    pub name_len: le::U16,
    pub extra_len: le::U16,
}

pub const EOCD_SIZE: u64 = size_of::<EndOfCentralDirectory>() as u64;
pub const ZIP64_LOCATOR_SIZE: u64 = size_of::<Zip64Locator>() as u64;
pub const EOCD64_SIZE: u64 = size_of::<Zip64EndOfCentralDirectory>() as u64;
pub const CENTRAL_HEADER_SIZE: usize = size_of::<CentralDirectoryHeader>();
pub const LOCAL_HEADER_SIZE: u64 = size_of::<LocalFileHeader>() as u64;

const _: () = assert!(EOCD_SIZE == 22);
const _: () = assert!(ZIP64_LOCATOR_SIZE == 20);
const _: () = assert!(EOCD64_SIZE == 56);
const _: () = assert!(CENTRAL_HEADER_SIZE == 46);
const _: () = assert!(LOCAL_HEADER_SIZE == 30);

pub(crate) fn read_exact_at(stream: &mut dyn Stream, offset: u64, buf: &mut [u8]) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(buf)
}

/// Where the central directory is, as found from the archive trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub total_entries: u64,
    pub cd_offset: u64,
    pub cd_size: u64,
    pub is_zip64: bool,
}

impl Trailer {
    /// Locate and validate the (Zip64) End-Of-Central-Directory record of a
    /// stream of `stream_len` bytes.
    pub fn locate(stream: &mut dyn Stream, stream_len: u64) -> Result<Self> {
        (stream_len >= EOCD_SIZE).or_context("file is too small to be a ZIP archive")?;

        let (eocd_pos, eocd) = find_eocd(stream, stream_len)?;
        if eocd.disk_number != eocd.cd_start_disk {
            bail!(Error::new(
                ErrorKind::NotImplemented,
                "multi-disk archives are not supported",
            ));
        }

        let mut trailer = Self {
            total_entries: eocd.total_entries.get().into(),
            cd_offset: eocd.cd_offset.get().into(),
            cd_size: eocd.cd_size.get().into(),
            is_zip64: false,
        };
        if eocd.total_entries.get() == u16::MAX
            || eocd.cd_offset.get() == u32::MAX
            || eocd.cd_size.get() == u32::MAX
        {
            let eocd64 = read_eocd64(stream, eocd_pos)?;
            trailer = Self {
                total_entries: eocd64.total_entries.get(),
                cd_offset: eocd64.cd_offset.get(),
                cd_size: eocd64.cd_size.get(),
                is_zip64: true,
            };
        }

        let cd_end = trailer
            .cd_offset
            .checked_add(trailer.cd_size)
            .context("central directory offset overflows")?;
        (cd_end <= eocd_pos).or_context("central directory overlaps its trailer")?;
        (trailer.total_entries <= trailer.cd_size / CENTRAL_HEADER_SIZE as u64)
            .or_context("central directory is too small for its record count")?;
        Ok(trailer)
    }
}

/// Find the EOCD record, which is followed by at most [`MAX_COMMENT_LEN`]
/// bytes of comment.
///
/// The comment may itself contain the signature, or even a whole record. A
/// candidate whose comment ends exactly at the end of the stream and which
/// points to a plausible central directory wins. Otherwise the last plausible
/// one is taken, then the last one fitting in the stream, so that
/// [`Trailer::locate`] reports what is wrong with it.
fn find_eocd(stream: &mut dyn Stream, stream_len: u64) -> Result<(u64, EndOfCentralDirectory)> {
    let mut eocd = EndOfCentralDirectory::new_zeroed();
    let last = stream_len - EOCD_SIZE;

    // Fast path: no comment.
    read_exact_at(stream, last, eocd.as_mut_bytes())?;
    if eocd.signature.get() == EOCD_SIGNATURE
        && eocd.comment_len.get() == 0
        && is_plausible(stream, last, &eocd)?
    {
        return Ok((last, eocd));
    }

    let mut plausible = None;
    let mut fitting = None;

    // Scan candidate positions backwards in chunks. Each chunk also covers the
    // 3 bytes following it, so signatures across chunk boundaries are found.
    let first = stream_len.saturating_sub(MAX_COMMENT_LEN + EOCD_SIZE);
    let sig = EOCD_SIGNATURE.to_le_bytes();
    let mut buf = vec![0u8; SCAN_CHUNK_SIZE as usize + sig.len() - 1];
    let mut hi = last;
    loop {
        let lo = hi.saturating_sub(SCAN_CHUNK_SIZE - 1).max(first);
        let chunk = &mut buf[..(hi - lo) as usize + sig.len()];
        read_exact_at(stream, lo, chunk)?;
        for i in (0..=(hi - lo) as usize).rev() {
            if chunk[i..i + sig.len()] != sig {
                continue;
            }
            let pos = lo + i as u64;
            read_exact_at(stream, pos, eocd.as_mut_bytes())?;
            let end = pos + EOCD_SIZE + u64::from(eocd.comment_len.get());
            if end > stream_len {
                continue;
            }
            fitting.get_or_insert((pos, eocd));
            if !is_plausible(stream, pos, &eocd)? {
                trace!("skipped implausible EOCD candidate at {pos}");
                continue;
            }
            if end == stream_len {
                trace!(
                    "found EOCD at {pos} with a comment of {} bytes",
                    eocd.comment_len.get(),
                );
                return Ok((pos, eocd));
            }
            plausible.get_or_insert((pos, eocd));
        }
        if lo == first {
            break;
        }
        hi = lo - 1;
    }
    plausible
        .or(fitting)
        .context("missing End-Of-Central-Directory record")
}

/// Whether `eocd` at `pos` points to something looking like a central
/// directory. Full validation happens later.
fn is_plausible(stream: &mut dyn Stream, pos: u64, eocd: &EndOfCentralDirectory) -> Result<bool> {
    let mut sig = [0u8; 4];
    if eocd.disk_number != eocd.cd_start_disk {
        return Ok(false);
    }
    if eocd.total_entries.get() == u16::MAX
        || eocd.cd_offset.get() == u32::MAX
        || eocd.cd_size.get() == u32::MAX
    {
        let Some(locator_pos) = pos.checked_sub(ZIP64_LOCATOR_SIZE) else {
            return Ok(false);
        };
        read_exact_at(stream, locator_pos, &mut sig)?;
        return Ok(u32::from_le_bytes(sig) == EOCD64_LOCATOR_SIGNATURE);
    }

    let cd_offset = u64::from(eocd.cd_offset.get());
    let cd_end = cd_offset + u64::from(eocd.cd_size.get());
    if eocd.total_entries.get() == 0 {
        return Ok(cd_end == pos);
    }
    if cd_end > pos || eocd.cd_size.get() < 4 {
        return Ok(false);
    }
    read_exact_at(stream, cd_offset, &mut sig)?;
    Ok(u32::from_le_bytes(sig) == CENTRAL_HEADER_SIGNATURE)
}

fn read_eocd64(stream: &mut dyn Stream, eocd_pos: u64) -> Result<Zip64EndOfCentralDirectory> {
    let locator_pos = eocd_pos
        .checked_sub(ZIP64_LOCATOR_SIZE)
        .context("missing Zip64 End-Of-Central-Directory locator")?;
    let mut locator = Zip64Locator::new_zeroed();
    read_exact_at(stream, locator_pos, locator.as_mut_bytes())?;
    (locator.signature.get() == EOCD64_LOCATOR_SIGNATURE)
        .or_context("invalid Zip64 End-Of-Central-Directory locator signature")?;

    let pos = locator.eocd64_offset.get();
    (pos.checked_add(EOCD64_SIZE).is_some_and(|end| end <= locator_pos))
        .or_context("Zip64 End-Of-Central-Directory offset out of bounds")?;

    let mut eocd64 = Zip64EndOfCentralDirectory::new_zeroed();
    read_exact_at(stream, pos, eocd64.as_mut_bytes())?;
    (eocd64.signature.get() == EOCD64_SIGNATURE)
        .or_context("invalid Zip64 End-Of-Central-Directory signature")?;
    (eocd64.record_size.get() >= EOCD64_SIZE - 12)
        .or_context("Zip64 End-Of-Central-Directory record is too short")?;
    Ok(eocd64)
}

/// A central directory record split into its parts.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub header: &'a CentralDirectoryHeader,
    pub name: &'a [u8],
    pub extra: &'a [u8],
    /// Total length of the record, including the trailing comment.
    pub len: usize,
}

impl<'a> Record<'a> {
    /// Split the record at the start of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let (header, rest) = CentralDirectoryHeader::ref_from_prefix(data)
            .ok()
            .context("truncated central directory record")?;
        (header.signature.get() == CENTRAL_HEADER_SIGNATURE)
            .or_context("invalid central directory record signature")?;
        let name_len = usize::from(header.name_len.get());
        let extra_len = usize::from(header.extra_len.get());
        let var_len = name_len + extra_len + usize::from(header.comment_len.get());
        (var_len <= rest.len()).or_context("truncated central directory record")?;
        Ok(Self {
            header,
            name: &rest[..name_len],
            extra: &rest[name_len..name_len + extra_len],
            len: CENTRAL_HEADER_SIZE + var_len,
        })
    }

    /// Decode the entry metadata, resolving Zip64 fields.
    pub fn entry(&self) -> Result<Entry> {
        let h = self.header;
        let mut entry = Entry {
            flags: h.flags.get(),
            method: h.method.get(),
            crc32: h.crc32.get(),
            compressed_size: h.compressed_size.get().into(),
            uncompressed_size: h.uncompressed_size.get().into(),
            local_header_offset: h.local_header_offset.get().into(),
            is_dir: self.name.last() == Some(&b'/'),
            modified: dos_time(h.mdate.get(), h.mtime.get()),
            accessed: None,
        };

        let overflowed = [
            h.uncompressed_size.get() == u32::MAX,
            h.compressed_size.get() == u32::MAX,
            h.local_header_offset.get() == u32::MAX,
        ];
        if overflowed.contains(&true) {
            let (_, mut data) = extra_fields(self.extra)
                .find(|&(id, _)| id == EXTRA_ZIP64)
                .context("missing Zip64 extra field")?;
            // Only overflowed fields are present, in this order.
            let targets = [
                &mut entry.uncompressed_size,
                &mut entry.compressed_size,
                &mut entry.local_header_offset,
            ];
            for (target, overflowed) in targets.into_iter().zip(overflowed) {
                if overflowed {
                    let (value, rest) = data
                        .split_first_chunk::<8>()
                        .context("truncated Zip64 extra field")?;
                    *target = u64::from_le_bytes(*value);
                    data = rest;
                }
            }
        }

        if let Some((_, data)) = extra_fields(self.extra).find(|&(id, _)| id == EXTRA_EXTENDED_TIMESTAMP)
        {
            let (modified, accessed) = extended_timestamps(data);
            entry.modified = modified.or(entry.modified);
            entry.accessed = accessed;
        }

        Ok(entry)
    }
}

/// Metadata of an entry, decoded from its central directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

/// Iterate `(id, data)` blocks of an extra field. Trailing malformed bytes are
/// ignored.
pub fn extra_fields(mut extra: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    std::iter::from_fn(move || {
        let (head, rest) = extra.split_first_chunk::<4>()?;
        let id = u16::from_le_bytes([head[0], head[1]]);
        let len = usize::from(u16::from_le_bytes([head[2], head[3]]));
        if rest.len() < len {
            extra = &[];
            return None;
        }
        let (data, rest) = rest.split_at(len);
        extra = rest;
        Some((id, data))
    })
}

/// Decode the Info-ZIP extended timestamp field into modification and access
/// times. The central directory copy usually carries the modification time only.
fn extended_timestamps(data: &[u8]) -> (Option<SystemTime>, Option<SystemTime>) {
    let Some((&flags, mut rest)) = data.split_first() else {
        return (None, None);
    };
    let mut next = |present: bool| {
        if !present {
            return None;
        }
        let (time, tail) = rest.split_first_chunk::<4>()?;
        rest = tail;
        unix_time(i32::from_le_bytes(*time).into())
    };
    let modified = next(flags & 1 != 0);
    let accessed = next(flags & 2 != 0);
    (modified, accessed)
}

fn unix_time(secs: i64) -> Option<SystemTime> {
    let delta = Duration::from_secs(secs.unsigned_abs());
    if secs >= 0 {
        SystemTime::UNIX_EPOCH.checked_add(delta)
    } else {
        SystemTime::UNIX_EPOCH.checked_sub(delta)
    }
}

/// Convert an MS-DOS date and time, taken as UTC. Returns `None` for invalid
/// values, including the all-zero "no time" marker.
pub fn dos_time(date: u16, time: u16) -> Option<SystemTime> {
    let dt = NaiveDate::from_ymd_opt(
        1980 + i32::from(date >> 9),
        u32::from((date >> 5) & 0xF),
        u32::from(date & 0x1F),
    )?
    .and_hms_opt(
        u32::from(time >> 11),
        u32::from((time >> 5) & 0x3F),
        u32::from(time & 0x1F) * 2,
    )?
    .and_utc();
    Some(dt.into())
}

/// Read the local file header at `offset` and return the offset of the entry
/// data following it.
pub(crate) fn data_start(stream: &mut dyn Stream, offset: u64) -> Result<u64> {
    let mut header = LocalFileHeader::new_zeroed();
    read_exact_at(stream, offset, header.as_mut_bytes()).map_err(|err| {
        if err.kind() == ErrorKind::AtEnd {
            Error::invalid_file("local file header out of bounds")
        } else {
            err
        }
    })?;
    (header.signature.get() == LOCAL_HEADER_SIGNATURE).or_context("invalid local file header signature")?;
    Ok(offset
        + LOCAL_HEADER_SIZE
        + u64::from(header.name_len.get())
        + u64::from(header.extra_len.get()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_epoch() {
        let t = dos_time(0x21, 0).unwrap();
        assert_eq!(t, SystemTime::UNIX_EPOCH + Duration::from_secs(315_532_800));
        // 2024-02-29 13:37:58
        let date = (44 << 9) | (2 << 5) | 29;
        let time = (13 << 11) | (37 << 5) | 29;
        let t = dos_time(date, time).unwrap();
        assert_eq!(t, SystemTime::UNIX_EPOCH + Duration::from_secs(1_709_213_878));
        assert_eq!(dos_time(0, 0), None);
        // February 30th and a 60th second.
        assert_eq!(dos_time((44 << 9) | (2 << 5) | 30, 0), None);
        assert_eq!(dos_time(0x21, 30), None);
    }

    #[test]
    fn extra_field_iteration() {
        let extra = [
            0x01, 0x00, 0x08, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, //
            0x55, 0x54, 0x05, 0x00, 0x01, 0x10, 0x00, 0x00, 0x00, //
            0xFF, 0xFF, 0x10, // trailing garbage
        ];
        let fields = extra_fields(&extra).collect::<Vec<_>>();
        assert_eq!(
            fields,
            [
                (EXTRA_ZIP64, &[1, 2, 3, 4, 5, 6, 7, 8][..]),
                (EXTRA_EXTENDED_TIMESTAMP, &[0x01, 0x10, 0, 0, 0][..]),
            ]
        );
        let (modified, accessed) = extended_timestamps(fields[1].1);
        assert_eq!(modified, Some(SystemTime::UNIX_EPOCH + Duration::from_secs(16)));
        assert_eq!(accessed, None);
    }
}
