//! Minimal CBOR reader and writer for constructor-tagged records
//!
//! Only the subset needed by [`TargetRecord`](super::TargetRecord) is covered:
//! unsigned integers, byte strings (definite or chunked), the constructor tag
//! and indefinite-length arrays.

use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read};

pub const MAJOR_UNSIGNED: u8 = 0;
pub const MAJOR_NEGATIVE: u8 = 1;
pub const MAJOR_BYTES: u8 = 2;
pub const MAJOR_ARRAY: u8 = 4;
pub const MAJOR_TAG: u8 = 6;

/// Tag for constructor index 0
pub const CONSTRUCTOR_0_TAG: u64 = 121;

/// Additional-info value marking an indefinite-length item
const INDEFINITE: u8 = 31;

/// Break marker closing an indefinite-length item
pub const BREAK: u8 = 0xff;

/// Byte strings longer than this are written as indefinite-length chunks
pub const MAX_BYTES_CHUNK: usize = 64;

/// Append-only CBOR encoder
#[derive(Debug, Default)]
pub struct CborWriter {
    buf: Vec<u8>,
}

impl CborWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a major type with its length or value argument
    pub fn write_header(&mut self, major: u8, value: u64) {
        let major = major << 5;
        let mut scratch = [0u8; 8];
        match value {
            0..=23 => self.buf.push(major | value as u8),
            24..=0xff => self.buf.extend_from_slice(&[major | 24, value as u8]),
            0x100..=0xffff => {
                BigEndian::write_u16(&mut scratch, value as u16);
                self.buf.push(major | 25);
                self.buf.extend_from_slice(&scratch[..2]);
            }
            0x1_0000..=0xffff_ffff => {
                BigEndian::write_u32(&mut scratch, value as u32);
                self.buf.push(major | 26);
                self.buf.extend_from_slice(&scratch[..4]);
            }
            _ => {
                BigEndian::write_u64(&mut scratch, value);
                self.buf.push(major | 27);
                self.buf.extend_from_slice(&scratch);
            }
        }
    }

    pub fn write_tag(&mut self, tag: u64) {
        self.write_header(MAJOR_TAG, tag);
    }

    pub fn write_uint(&mut self, value: u64) {
        self.write_header(MAJOR_UNSIGNED, value);
    }

    pub fn begin_indefinite_array(&mut self) {
        self.buf.push((MAJOR_ARRAY << 5) | INDEFINITE);
    }

    pub fn write_break(&mut self) {
        self.buf.push(BREAK);
    }

    /// Write a byte string, chunking anything longer than [`MAX_BYTES_CHUNK`]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() <= MAX_BYTES_CHUNK {
            self.write_header(MAJOR_BYTES, bytes.len() as u64);
            self.buf.extend_from_slice(bytes);
            return;
        }

        self.buf.push((MAJOR_BYTES << 5) | INDEFINITE);
        for chunk in bytes.chunks(MAX_BYTES_CHUNK) {
            self.write_header(MAJOR_BYTES, chunk.len() as u64);
            self.buf.extend_from_slice(chunk);
        }
        self.write_break();
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Length argument of an item header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Definite(u64),
    Indefinite,
}

/// Cursor-based CBOR decoder over a borrowed buffer
pub struct CborReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> CborReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.cursor
            .read_u8()
            .map_err(|_| Error::malformed(format!("truncated at offset {}", self.position())))
    }

    fn peek_byte(&self) -> Option<u8> {
        let data = self.cursor.get_ref();
        data.get(self.cursor.position() as usize).copied()
    }

    /// Current offset into the buffer
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Read an item header, returning the major type and length argument
    pub fn read_header(&mut self) -> Result<(u8, Length)> {
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        let truncated = |_| Error::malformed("truncated item header");
        let length = match info {
            0..=23 => Length::Definite(info as u64),
            24 => Length::Definite(self.cursor.read_u8().map_err(truncated)? as u64),
            25 => Length::Definite(self.cursor.read_u16::<BigEndian>().map_err(truncated)? as u64),
            26 => Length::Definite(self.cursor.read_u32::<BigEndian>().map_err(truncated)? as u64),
            27 => Length::Definite(self.cursor.read_u64::<BigEndian>().map_err(truncated)?),
            INDEFINITE => Length::Indefinite,
            other => {
                return Err(Error::malformed(format!(
                    "reserved additional info {} at offset {}",
                    other,
                    self.position() - 1
                )))
            }
        };
        Ok((major, length))
    }

    fn expect_definite(&mut self, expected_major: u8, what: &str) -> Result<u64> {
        match self.read_header()? {
            (major, Length::Definite(value)) if major == expected_major => Ok(value),
            (major, _) => Err(Error::malformed(format!(
                "expected {}, found major type {}",
                what, major
            ))),
        }
    }

    pub fn read_uint(&mut self) -> Result<u64> {
        match self.read_header()? {
            (MAJOR_UNSIGNED, Length::Definite(value)) => Ok(value),
            (MAJOR_NEGATIVE, _) => Err(Error::malformed("negative integer where unsigned expected")),
            (major, _) => Err(Error::malformed(format!(
                "expected unsigned integer, found major type {}",
                major
            ))),
        }
    }

    pub fn expect_tag(&mut self, tag: u64) -> Result<()> {
        let found = self.expect_definite(MAJOR_TAG, "constructor tag")?;
        if found != tag {
            return Err(Error::malformed(format!("expected tag {}, found {}", tag, found)));
        }
        Ok(())
    }

    /// Read an array header; definite arrays must hold exactly `fields` items
    pub fn expect_array(&mut self, fields: u64) -> Result<Length> {
        match self.read_header()? {
            (MAJOR_ARRAY, Length::Indefinite) => Ok(Length::Indefinite),
            (MAJOR_ARRAY, Length::Definite(n)) if n == fields => Ok(Length::Definite(n)),
            (MAJOR_ARRAY, Length::Definite(n)) => Err(Error::malformed(format!(
                "expected {} fields, found {}",
                fields, n
            ))),
            (major, _) => Err(Error::malformed(format!(
                "expected array, found major type {}",
                major
            ))),
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        match self.read_header()? {
            (MAJOR_BYTES, Length::Definite(len)) => self.read_exact(len),
            (MAJOR_BYTES, Length::Indefinite) => {
                let mut out = Vec::new();
                while self.peek_byte() != Some(BREAK) {
                    let len = self.expect_definite(MAJOR_BYTES, "byte string chunk")?;
                    out.extend(self.read_exact(len)?);
                }
                self.expect_break()?;
                Ok(out)
            }
            (major, _) => Err(Error::malformed(format!(
                "expected byte string, found major type {}",
                major
            ))),
        }
    }

    fn read_exact(&mut self, len: u64) -> Result<Vec<u8>> {
        let remaining = self.cursor.get_ref().len() as u64 - self.position();
        if len > remaining {
            return Err(Error::malformed(format!(
                "byte string of {} bytes exceeds remaining {}",
                len, remaining
            )));
        }
        let mut out = vec![0u8; len as usize];
        self.cursor
            .read_exact(&mut out)
            .map_err(|_| Error::malformed("truncated byte string"))?;
        Ok(out)
    }

    pub fn expect_break(&mut self) -> Result<()> {
        match self.read_byte()? {
            BREAK => Ok(()),
            other => Err(Error::malformed(format!(
                "expected break, found 0x{:02x}",
                other
            ))),
        }
    }

    /// Fail if any input remains unread
    pub fn finish(self) -> Result<()> {
        let total = self.cursor.get_ref().len() as u64;
        if self.position() != total {
            return Err(Error::malformed(format!(
                "{} trailing bytes",
                total - self.position()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_uint_widths() {
        let cases: [(u64, &str); 6] = [
            (0, "00"),
            (23, "17"),
            (24, "1818"),
            (300, "19012c"),
            (70_000, "1a00011170"),
            (u64::MAX, "1bffffffffffffffff"),
        ];
        for (value, expected) in cases {
            let mut writer = CborWriter::new();
            writer.write_uint(value);
            let bytes = writer.into_bytes();
            assert_eq!(hex::encode(&bytes), expected);

            let mut reader = CborReader::new(&bytes);
            assert_eq!(reader.read_uint().unwrap(), value);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn test_long_bytes_are_chunked() {
        let payload: Vec<u8> = (0..150u8).collect();
        let mut writer = CborWriter::new();
        writer.write_bytes(&payload);
        let bytes = writer.into_bytes();

        assert_eq!(bytes[0], 0x5f);
        assert_eq!(*bytes.last().unwrap(), BREAK);

        let mut reader = CborReader::new(&bytes);
        assert_eq!(reader.read_bytes().unwrap(), payload);
        reader.finish().unwrap();
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = CborReader::new(&[0x19, 0x01]);
        assert_matches!(reader.read_uint(), Err(Error::MalformedRecord { .. }));

        let mut reader = CborReader::new(&[0x44, 0x00, 0x01]);
        assert_matches!(reader.read_bytes(), Err(Error::MalformedRecord { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let mut reader = CborReader::new(&[0x20]);
        assert_matches!(reader.read_uint(), Err(Error::MalformedRecord { .. }));

        let mut reader = CborReader::new(&[0xd8, 0x7a]);
        assert_matches!(reader.expect_tag(CONSTRUCTOR_0_TAG), Err(Error::MalformedRecord { .. }));

        let mut reader = CborReader::new(&[0x83]);
        assert_matches!(reader.expect_array(7), Err(Error::MalformedRecord { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let reader = CborReader::new(&[0x00]);
        assert!(reader.finish().is_err());
    }
}
