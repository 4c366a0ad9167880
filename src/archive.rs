//! Minimal ZIP writer for the album's download archive.
//!
//! Entries are *stored*, never compressed: the payloads are JPEGs, which do
//! not shrink under deflate. Each entry is written as soon as it is added, so
//! memory use is bounded by the largest single entry, not the archive.
//!
//! ```text
//! [local header 1][data 1] ... [local header n][data n]
//! [central record 1] ... [central record n]
//! [end of central directory]
//! ```
//!
//! All multi-byte fields are little-endian. Filenames carry the UTF-8 flag
//! (general purpose bit 11). There is no Zip64 support, so the archive is
//! limited to [`MAX_ENTRIES`] entries and 4 GiB of offsets.

use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Entry counts are stored in 16-bit fields; readers treat the top bit
/// inconsistently, so stay below it.
pub const MAX_ENTRIES: usize = 32767;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
/// Version 1.0: stored entries only.
const VERSION: u16 = 10;
const FLAG_UTF8: u16 = 1 << 11;
const METHOD_STORED: u16 = 0;
const CRC_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive is limited to {MAX_ENTRIES} entries")]
    TooManyEntries,
    #[error("archive exceeds 4 GiB, which requires Zip64")]
    TooLarge,
    #[error("entry name too long: {0}")]
    NameTooLong(String),
}

/// Streaming writer for a stored-only ZIP archive.
pub struct ArchiveWriter<W: Write> {
    out: W,
    /// Central directory records, written out on [`close`](Self::close).
    directory: Vec<u8>,
    entries: usize,
    offset: u64,
}

impl ArchiveWriter<BufWriter<File>> {
    /// Create (or truncate) the archive file at `path`.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            directory: Vec::new(),
            entries: 0,
            offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append one stored entry.
    pub fn add_entry(
        &mut self,
        name: &str,
        data: &[u8],
        timestamp: NaiveDateTime,
    ) -> Result<(), ArchiveError> {
        if self.entries >= MAX_ENTRIES {
            return Err(ArchiveError::TooManyEntries);
        }
        let name_len =
            u16::try_from(name.len()).map_err(|_| ArchiveError::NameTooLong(name.to_string()))?;
        let size = u32::try_from(data.len()).map_err(|_| ArchiveError::TooLarge)?;
        let header_offset = u32::try_from(self.offset).map_err(|_| ArchiveError::TooLarge)?;
        let (time, date) = dos_timestamp(timestamp);
        let crc = checksum(data);

        let mut header = Vec::with_capacity(30 + name.len());
        put_u32(&mut header, LOCAL_HEADER_SIGNATURE);
        put_u16(&mut header, VERSION);
        put_u16(&mut header, FLAG_UTF8);
        put_u16(&mut header, METHOD_STORED);
        put_u16(&mut header, time);
        put_u16(&mut header, date);
        put_u32(&mut header, crc);
        put_u32(&mut header, size);
        put_u32(&mut header, size);
        put_u16(&mut header, name_len);
        put_u16(&mut header, 0);
        header.extend_from_slice(name.as_bytes());

        self.out.write_all(&header)?;
        self.out.write_all(data)?;
        self.offset += (header.len() + data.len()) as u64;

        let record = &mut self.directory;
        put_u32(record, CENTRAL_HEADER_SIGNATURE);
        put_u16(record, VERSION); // made by
        put_u16(record, VERSION); // needed to extract
        put_u16(record, FLAG_UTF8);
        put_u16(record, METHOD_STORED);
        put_u16(record, time);
        put_u16(record, date);
        put_u32(record, crc);
        put_u32(record, size);
        put_u32(record, size);
        put_u16(record, name_len);
        put_u16(record, 0); // extra field
        put_u16(record, 0); // comment
        put_u16(record, 0); // disk number
        put_u16(record, 0); // internal attributes
        put_u32(record, 0); // external attributes
        put_u32(record, header_offset);
        record.extend_from_slice(name.as_bytes());

        self.entries += 1;
        Ok(())
    }

    /// Write the central directory and end record, returning the sink.
    pub fn close(mut self) -> Result<W, ArchiveError> {
        let directory_offset = u32::try_from(self.offset).map_err(|_| ArchiveError::TooLarge)?;
        let directory_size =
            u32::try_from(self.directory.len()).map_err(|_| ArchiveError::TooLarge)?;
        // Bounded by MAX_ENTRIES in add_entry.
        let count = self.entries as u16;

        let mut end = Vec::with_capacity(22);
        put_u32(&mut end, END_OF_DIRECTORY_SIGNATURE);
        put_u16(&mut end, 0); // this disk
        put_u16(&mut end, 0); // disk with the directory
        put_u16(&mut end, count);
        put_u16(&mut end, count);
        put_u32(&mut end, directory_size);
        put_u32(&mut end, directory_offset);
        put_u16(&mut end, 0); // comment

        self.out.write_all(&self.directory)?;
        self.out.write_all(&end)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in data.chunks(CRC_CHUNK) {
        hasher.update(chunk);
    }
    hasher.finalize()
}

/// MS-DOS (time, date) pair. Two-second resolution; years before 1980 clamp.
pub fn dos_timestamp(timestamp: NaiveDateTime) -> (u16, u16) {
    let time = (timestamp.hour() << 11) | (timestamp.minute() << 5) | (timestamp.second() / 2);
    let year = (timestamp.year().clamp(1980, 2107) - 1980) as u32;
    let date = (year << 9) | (timestamp.month() << 5) | timestamp.day();
    (time as u16, date as u16)
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(12, 30, 44)
            .unwrap()
    }

    fn le16(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([bytes[at], bytes[at + 1]])
    }

    fn le32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn dos_timestamp_packing() {
        let (time, date) = dos_timestamp(noon());
        assert_eq!(time, (12 << 11) | (30 << 5) | 22);
        assert_eq!(date, (44 << 9) | (5 << 5) | 17);
    }

    #[test]
    fn dos_timestamp_clamps_early_years() {
        let early = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let (_, date) = dos_timestamp(early);
        assert_eq!(date >> 9, 0);
    }

    #[test]
    fn single_entry_layout() {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_entry("a.txt", b"hello", noon()).unwrap();
        let bytes = writer.close().unwrap();

        // Local header
        assert_eq!(le32(&bytes, 0), LOCAL_HEADER_SIGNATURE);
        assert_eq!(le16(&bytes, 4), 10);
        assert_eq!(le16(&bytes, 6), 1 << 11);
        assert_eq!(le16(&bytes, 8), 0);
        assert_eq!(le32(&bytes, 14), crc32fast::hash(b"hello"));
        assert_eq!(le32(&bytes, 18), 5);
        assert_eq!(le32(&bytes, 22), 5);
        assert_eq!(le16(&bytes, 26), 5);
        assert_eq!(&bytes[30..35], b"a.txt");
        assert_eq!(&bytes[35..40], b"hello");

        // Central record
        let central = 40;
        assert_eq!(le32(&bytes, central), CENTRAL_HEADER_SIGNATURE);
        assert_eq!(le32(&bytes, central + 42), 0);
        assert_eq!(&bytes[central + 46..central + 51], b"a.txt");

        // End record
        let end = bytes.len() - 22;
        assert_eq!(le32(&bytes, end), END_OF_DIRECTORY_SIGNATURE);
        assert_eq!(le16(&bytes, end + 8), 1);
        assert_eq!(le16(&bytes, end + 10), 1);
        assert_eq!(le32(&bytes, end + 12), 51);
        assert_eq!(le32(&bytes, end + 16), 40);
    }

    #[test]
    fn second_entry_records_its_offset() {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_entry("one", b"1", noon()).unwrap();
        writer.add_entry("two", b"22", noon()).unwrap();
        assert_eq!(writer.len(), 2);
        let bytes = writer.close().unwrap();

        let first_local = 30 + 3 + 1;
        let second_local = 30 + 3 + 2;
        let directory = first_local + second_local;
        let second_record = directory + 46 + 3;
        assert_eq!(le32(&bytes, second_record + 42), first_local as u32);
    }

    #[test]
    fn empty_archive_is_just_the_end_record() {
        let writer = ArchiveWriter::new(Vec::new());
        assert!(writer.is_empty());
        let bytes = writer.close().unwrap();
        assert_eq!(bytes.len(), 22);
        assert_eq!(le16(&bytes, 8), 0);
    }

    #[test]
    fn entry_limit_is_enforced() {
        let mut writer = ArchiveWriter::new(std::io::sink());
        for i in 0..MAX_ENTRIES {
            writer.add_entry(&i.to_string(), b"", noon()).unwrap();
        }
        assert!(matches!(
            writer.add_entry("overflow", b"", noon()),
            Err(ArchiveError::TooManyEntries)
        ));
    }

    #[test]
    fn crc_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(checksum(&data), crc32fast::hash(&data));
    }
}
