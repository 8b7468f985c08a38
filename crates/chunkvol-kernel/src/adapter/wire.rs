//! Attribute and directory records in the driver framework's layout.
//!
//! ```text
//! FileInfo (72 bytes)
//! 0x00 u32 file attributes     0x04 u32 reparse tag
//! 0x08 u64 allocation size     0x10 u64 file size
//! 0x18 u64 creation time       0x20 u64 last access time
//! 0x28 u64 last write time     0x30 u64 change time
//! 0x38 u64 index number        0x40 u32 hard links   0x44 u32 EA size
//!
//! DirInfo
//! 0x00 u16 record size (header + name bytes)
//! 0x02 6 bytes padding
//! 0x08 FileInfo
//! 0x50 24 bytes reserved
//! 0x68 UTF-16LE name, then zero padding to a multiple of 8
//! ```
//!
//! Times are FILETIME: 100ns ticks since 1601-01-01 UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};

use crate::namespace::EntryAttributes;

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;

pub const FILE_INFO_LEN: usize = 72;
pub const DIR_INFO_HEADER_LEN: usize = 104;

/// FILETIME of the unix epoch.
const UNIX_EPOCH_FILETIME: u64 = 116_444_736_000_000_000;

/// Convert to FILETIME. Times before 1601 clamp to 0.
pub fn to_filetime(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            let ticks = u64::try_from(since.as_nanos() / 100).unwrap_or(u64::MAX);
            UNIX_EPOCH_FILETIME.saturating_add(ticks)
        }
        Err(before) => {
            let ticks = u64::try_from(before.duration().as_nanos() / 100).unwrap_or(u64::MAX);
            UNIX_EPOCH_FILETIME.saturating_sub(ticks)
        }
    }
}

/// Inverse of [`to_filetime`].
pub fn from_filetime(filetime: u64) -> SystemTime {
    let nanos = |ticks: u64| Duration::from_nanos(ticks.saturating_mul(100));
    if filetime >= UNIX_EPOCH_FILETIME {
        UNIX_EPOCH + nanos(filetime - UNIX_EPOCH_FILETIME)
    } else {
        UNIX_EPOCH - nanos(UNIX_EPOCH_FILETIME - filetime)
    }
}

/// File metadata record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_attributes: u32,
    pub reparse_tag: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub index_number: u64,
    pub hard_links: u32,
    pub ea_size: u32,
}

impl FileInfo {
    pub fn from_attributes(attrs: &EntryAttributes) -> Self {
        let kind_bit = if attrs.is_dir() {
            FILE_ATTRIBUTE_DIRECTORY
        } else {
            FILE_ATTRIBUTE_ARCHIVE
        };
        Self {
            file_attributes: kind_bit | FILE_ATTRIBUTE_READONLY,
            reparse_tag: 0,
            allocation_size: attrs.allocation_size,
            file_size: attrs.size,
            creation_time: to_filetime(attrs.timestamps.creation),
            last_access_time: to_filetime(attrs.timestamps.last_access),
            last_write_time: to_filetime(attrs.timestamps.last_write),
            change_time: to_filetime(attrs.timestamps.change),
            index_number: attrs.index_number,
            hard_links: 0,
            ea_size: 0,
        }
    }

    pub fn encode(&self) -> [u8; FILE_INFO_LEN] {
        let mut buf = [0u8; FILE_INFO_LEN];
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0x00..0x04], self.file_attributes);
        LittleEndian::write_u32(&mut buf[0x04..0x08], self.reparse_tag);
        LittleEndian::write_u64(&mut buf[0x08..0x10], self.allocation_size);
        LittleEndian::write_u64(&mut buf[0x10..0x18], self.file_size);
        LittleEndian::write_u64(&mut buf[0x18..0x20], self.creation_time);
        LittleEndian::write_u64(&mut buf[0x20..0x28], self.last_access_time);
        LittleEndian::write_u64(&mut buf[0x28..0x30], self.last_write_time);
        LittleEndian::write_u64(&mut buf[0x30..0x38], self.change_time);
        LittleEndian::write_u64(&mut buf[0x38..0x40], self.index_number);
        LittleEndian::write_u32(&mut buf[0x40..0x44], self.hard_links);
        LittleEndian::write_u32(&mut buf[0x44..0x48], self.ea_size);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..FILE_INFO_LEN)?;
        Some(Self {
            file_attributes: LittleEndian::read_u32(&buf[0x00..0x04]),
            reparse_tag: LittleEndian::read_u32(&buf[0x04..0x08]),
            allocation_size: LittleEndian::read_u64(&buf[0x08..0x10]),
            file_size: LittleEndian::read_u64(&buf[0x10..0x18]),
            creation_time: LittleEndian::read_u64(&buf[0x18..0x20]),
            last_access_time: LittleEndian::read_u64(&buf[0x20..0x28]),
            last_write_time: LittleEndian::read_u64(&buf[0x28..0x30]),
            change_time: LittleEndian::read_u64(&buf[0x30..0x38]),
            index_number: LittleEndian::read_u64(&buf[0x38..0x40]),
            hard_links: LittleEndian::read_u32(&buf[0x40..0x44]),
            ea_size: LittleEndian::read_u32(&buf[0x44..0x48]),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

/// One directory listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub file_info: FileInfo,
    pub name: String,
}

impl DirInfo {
    pub fn new(name: impl Into<String>, attrs: &EntryAttributes) -> Self {
        Self {
            file_info: FileInfo::from_attributes(attrs),
            name: name.into(),
        }
    }

    /// Value of the record-size field: header plus name bytes, unpadded.
    pub fn record_size(&self) -> usize {
        DIR_INFO_HEADER_LEN + 2 * self.name.encode_utf16().count()
    }

    /// Encoded record, zero padded to a multiple of 8 bytes.
    ///
    /// Names are at most 255 UTF-16 units, so the size always fits its field.
    pub fn encode(&self) -> Vec<u8> {
        let size = self.record_size();
        let mut buf = vec![0u8; size.next_multiple_of(8)];
        LittleEndian::write_u16(&mut buf[0..2], size as u16);
        self.file_info.encode_into(&mut buf[8..8 + FILE_INFO_LEN]);
        for (i, unit) in self.name.encode_utf16().enumerate() {
            let at = DIR_INFO_HEADER_LEN + 2 * i;
            LittleEndian::write_u16(&mut buf[at..at + 2], unit);
        }
        buf
    }

    /// Decode one record from the front of `buf`, returning it and the
    /// padded length consumed.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let size = usize::from(LittleEndian::read_u16(buf.get(0..2)?));
        if size < DIR_INFO_HEADER_LEN || (size - DIR_INFO_HEADER_LEN) % 2 != 0 {
            return None;
        }
        let file_info = FileInfo::decode(buf.get(8..8 + FILE_INFO_LEN)?)?;
        let units: Vec<u16> = buf
            .get(DIR_INFO_HEADER_LEN..size)?
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
            .collect();
        let name = String::from_utf16(&units).ok()?;
        Some((Self { file_info, name }, size.next_multiple_of(8)))
    }
}

/// Concatenated, individually padded records, as a directory buffer.
pub fn encode_dir_buffer<'a>(records: impl IntoIterator<Item = &'a DirInfo>) -> Vec<u8> {
    records.into_iter().flat_map(DirInfo::encode).collect()
}
