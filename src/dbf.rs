//! dBASE-III record file decoder.
//!
//! # On-disk layout (all numeric fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   version byte (ignored)
//!    1      3   last-update date (ignored)
//!    4      4   record_count        (LE u32)
//!    8      2   header_length       (LE u16)
//!   10      2   record_length       (LE u16)
//!   12     20   reserved (ignored)
//!   32   N×32   field descriptors, terminated by 0x0D
//! ```
//!
//! Each 32-byte field descriptor:
//!
//! ```text
//! Offset  Size  Field
//!    0     11   name  (NUL-terminated ASCII, trailing NULs stripped)
//!   11      1   kind  (one ASCII character, e.g. 'C', 'N')
//!   16      1   length (u8)
//! ```
//!
//! Records start at `header_length` and are `record_length` bytes each: one
//! deletion flag byte (`0x2A` = deleted) followed by the field values at
//! their declared lengths.  A record that would overrun the buffer stops
//! iteration; everything produced before it is valid.
//!
//! # Field decoding
//! Legacy Thai catalogs mix codepages, so each field value is decoded by a
//! cascade: strict TIS-620, then CP874 (windows-874), then UTF-8, then
//! Latin-1.  The first decoder that accepts the bytes wins.  Strict
//! detection would reject real data; the cascade never does — Latin-1 maps
//! every byte.

use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::WINDOWS_874;
use thiserror::Error;

/// Fixed size of the header prefix before the field descriptor table.
pub const HEADER_PREFIX_SIZE: usize = 32;
/// Size of one field descriptor entry.
pub const FIELD_DESCRIPTOR_SIZE: usize = 32;
/// Deletion flag value in the first byte of a record.
pub const DELETED_FLAG: u8 = 0x2A;

#[derive(Error, Debug)]
pub enum DbfError {
    #[error("DBF buffer too short for header ({0} bytes, need at least {HEADER_PREFIX_SIZE})")]
    HeaderTooShort(usize),
}

// ── Field descriptor ─────────────────────────────────────────────────────────

/// One column of the table.  Immutable after header parse.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name:   String,
    pub kind:   u8,
    pub length: usize,
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DbfHeader {
    pub record_count:  u32,
    pub header_length: u16,
    pub record_length: u16,
    pub fields:        Vec<FieldDescriptor>,
}

impl DbfHeader {
    /// Parse the header and the field descriptor table.
    ///
    /// The descriptor count is `(header_length - 33) / 32`; a descriptor
    /// whose 32 bytes would exceed the buffer ends the table early.
    pub fn parse(buf: &[u8]) -> Result<Self, DbfError> {
        if buf.len() < HEADER_PREFIX_SIZE {
            return Err(DbfError::HeaderTooShort(buf.len()));
        }

        let record_count  = LittleEndian::read_u32(&buf[4..8]);
        let header_length = LittleEndian::read_u16(&buf[8..10]);
        let record_length = LittleEndian::read_u16(&buf[10..12]);

        let field_count = (header_length as usize)
            .saturating_sub(HEADER_PREFIX_SIZE + 1)
            / FIELD_DESCRIPTOR_SIZE;

        let mut fields = Vec::with_capacity(field_count);
        for i in 0..field_count {
            let start = HEADER_PREFIX_SIZE + i * FIELD_DESCRIPTOR_SIZE;
            let end   = start + FIELD_DESCRIPTOR_SIZE;
            if end > buf.len() {
                break;
            }
            let desc = &buf[start..end];

            let name_end = desc[..11].iter().position(|&b| b == 0).unwrap_or(11);
            let name = desc[..name_end]
                .iter()
                .map(|&b| b as char)
                .collect::<String>();

            fields.push(FieldDescriptor {
                name,
                kind:   desc[11],
                length: desc[16] as usize,
            });
        }

        Ok(Self { record_count, header_length, record_length, fields })
    }

    /// Column position of a field by name, if present.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

// ── Record ───────────────────────────────────────────────────────────────────

/// One decoded row: field values in header column order.
#[derive(Debug, Clone)]
pub struct DbfRecord {
    pub values: Vec<String>,
}

impl DbfRecord {
    pub fn get(&self, index: Option<usize>) -> &str {
        index
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

// ── Table ────────────────────────────────────────────────────────────────────

/// A fully parsed DBF buffer: header plus a record iterator.
pub struct DbfTable {
    buf:        Vec<u8>,
    pub header: DbfHeader,
}

impl DbfTable {
    pub fn parse(buf: Vec<u8>) -> Result<Self, DbfError> {
        let header = DbfHeader::parse(&buf)?;
        Ok(Self { buf, header })
    }

    /// Iterate live records.  Deleted records (`0x2A` flag) are skipped and
    /// counted; the first record that would overrun the buffer ends
    /// iteration.
    pub fn records(&self) -> Records<'_> {
        Records { table: self, next: 0, deleted: 0 }
    }
}

pub struct Records<'a> {
    table:   &'a DbfTable,
    next:    u32,
    deleted: u32,
}

impl Records<'_> {
    /// Deleted rows skipped so far.
    pub fn deleted(&self) -> u32 {
        self.deleted
    }
}

impl Iterator for Records<'_> {
    type Item = DbfRecord;

    fn next(&mut self) -> Option<DbfRecord> {
        let header = &self.table.header;
        let buf    = &self.table.buf;

        while self.next < header.record_count {
            let i = self.next as usize;
            self.next += 1;

            let offset = header.header_length as usize + i * header.record_length as usize;
            let end    = offset + header.record_length as usize;
            if end > buf.len() {
                return None; // truncated tail — stop cleanly
            }
            if buf[offset] == DELETED_FLAG {
                self.deleted += 1;
                continue;
            }

            let mut values = Vec::with_capacity(header.fields.len());
            let mut pos = offset + 1;
            for field in &header.fields {
                values.push(decode_field(&buf[pos..pos + field.length]));
                pos += field.length;
            }
            return Some(DbfRecord { values });
        }
        None
    }
}

// ── Field decoding cascade ───────────────────────────────────────────────────

/// Decode one raw field value: TIS-620 → CP874 → UTF-8 → Latin-1, first
/// accepting decoder wins, surrounding ASCII whitespace stripped.
pub fn decode_field(bytes: &[u8]) -> String {
    let decoded = decode_tis620(bytes)
        .or_else(|| {
            WINDOWS_874
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned())
        })
        .or_else(|| std::str::from_utf8(bytes).ok().map(str::to_owned))
        .unwrap_or_else(|| decode_latin1(bytes));
    decoded.trim_matches(|c: char| c.is_ascii_whitespace()).to_owned()
}

/// Strict TIS-620: ASCII plus the Thai block at 0xA1..=0xDA and 0xDF..=0xFB.
/// Bytes outside those ranges reject the whole value.  (The WHATWG registry
/// folds the `tis-620` label into windows-874, which would make the first
/// two cascade stages indistinguishable.)
fn decode_tis620(bytes: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x00..=0x7F => out.push(b as char),
            0xA1..=0xDA | 0xDF..=0xFB => {
                out.push(char::from_u32(0x0E00 + (b as u32 - 0xA0))?)
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Latin-1 maps every byte; this stage cannot fail.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
