//! Record reader for the BIFF8 stream inside legacy `.xls` workbooks.
//!
//! A record is a 2-byte kind, a 2-byte size and a payload. Payloads longer than
//! 8224 bytes spill into trailing CONTINUE records, which the reader stitches back
//! together so callers see one logical record.

use crate::error::IngestError;
use crate::helpers::bytes::to_f64;
use crate::helpers::bytes::to_u16;
use crate::helpers::bytes::to_u32;
use crate::helpers::bytes::to_u64;
use crate::helpers::bytes::to_usize;
use encoding_rs::Encoding;
use thiserror::Error;

const CONTINUE: u16 = 60;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining")]
    NoEnoughDataError(usize),
}

pub(crate) struct Biff8Reader {
    /// Encoding of 8-bit strings, switched by the CODEPAGE record.
    pub(crate) encoding: &'static Encoding,
    buffer: Vec<u8>,
    pointer: usize,
    chunks: Vec<(usize, usize)>,
    index: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(data: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            encoding: encoding_rs::WINDOWS_1252,
            buffer: data,
            pointer: 0,
            chunks: Vec::new(),
            index: 0,
            offset: 0,
        }
    }

    /// Advances to the next record and returns its kind, or `None` at the end of the stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, IngestError> {
        if self.pointer + 4 > self.buffer.len() {
            return Ok(None);
        }
        self.index = 0;
        self.offset = 0;
        self.chunks.clear();

        let kind = self.get_u16_at(self.pointer)?;
        let chunk = self.chunk_at(self.pointer)?;
        self.chunks.push(chunk);
        self.pointer = chunk.1;
        while self.pointer + 4 <= self.buffer.len() && self.get_u16_at(self.pointer)? == CONTINUE {
            let chunk = self.chunk_at(self.pointer)?;
            self.chunks.push(chunk);
            self.pointer = chunk.1;
        }
        Ok(Some(kind))
    }

    /// Kind of the record after the current one, without moving to it.
    pub(crate) fn peek(&self) -> Option<u16> {
        if self.pointer + 4 <= self.buffer.len() {
            self.get_u16_at(self.pointer).ok()
        } else {
            None
        }
    }

    /// Payload bounds of the record header at `pointer`, clamped to the buffer.
    fn chunk_at(&self, pointer: usize) -> Result<(usize, usize), IngestError> {
        let size = self.get_u16_at(pointer + 2)? as usize;
        let lower = pointer + 4;
        let upper = self.buffer.len().min(lower + size);
        Ok((lower, upper))
    }

    /// Jumps to an absolute stream position, typically a sheet's BOF.
    pub(crate) fn goto(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    fn read_extract(&mut self, length: usize) -> Result<&[u8], IngestError> {
        let (data, size) = self.read(length);
        if size == length {
            Ok(data)
        } else {
            Err(Biff8Error::NoEnoughDataError(length))?
        }
    }

    /// Reads up to `length` bytes without crossing a chunk boundary.
    fn read(&mut self, length: usize) -> (&[u8], usize) {
        if let Some((lower, upper)) = self.chunks.get(self.index).copied() {
            let source = upper.min(lower + self.offset);
            let target = upper.min(source + length);
            let size = target - source;
            if source < upper {
                if target == upper {
                    self.index += 1;
                    self.offset = 0;
                } else {
                    self.offset += size;
                }
                return (&self.buffer[source..target], size);
            }
        }
        (&[], 0)
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), IngestError> {
        if length > 0 {
            self.read_extract(length)?;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, IngestError> {
        self.read_extract(1).map(|data| data[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, IngestError> {
        self.read_extract(2).map(to_u16)
    }

    /// Reads the `u16` that ends `offset` bytes before the end of the current record.
    pub(crate) fn get_u16_back(&self, offset: usize) -> Result<u16, IngestError> {
        let mut offset = offset;
        for (lower, upper) in self.chunks.iter().rev() {
            if *lower + offset <= *upper {
                return self.get_u16_at(*upper - offset);
            }
            offset -= *upper - *lower;
        }
        Err(Biff8Error::NoEnoughDataError(2))?
    }

    fn get_u16_at(&self, index: usize) -> Result<u16, IngestError> {
        if index + 2 <= self.buffer.len() {
            Ok(to_u16(&self.buffer[index..index + 2]))
        } else {
            Err(Biff8Error::NoEnoughDataError(2))?
        }
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, IngestError> {
        self.read_extract(4).map(to_u32)
    }

    pub(crate) fn read_usize(&mut self) -> Result<usize, IngestError> {
        self.read_extract(4).map(to_usize)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, IngestError> {
        self.read_extract(8).map(to_u64)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, IngestError> {
        self.read_extract(8).map(to_f64)
    }

    /// Reads an RK number, the compressed 30-bit integer or truncated double Excel
    /// uses for most numeric cells. The flag in bit 0 divides the value by 100.
    pub(crate) fn read_rk_number(&mut self) -> Result<f64, IngestError> {
        let value = self.read_u32()?;
        let is_percentage = (value & 0x01) != 0;
        let is_integer = (value & 0x02) != 0;

        let value = if is_integer {
            ((value as i32) >> 2) as f64
        } else {
            f64::from_bits(((value >> 2) as u64) << 34)
        };
        Ok(if is_percentage { value / 100.0 } else { value })
    }

    /// Reads a string with a 1-byte character count (sheet names).
    pub(crate) fn read_short_xl_unicode_string(&mut self) -> Result<String, IngestError> {
        let mut string = String::new();
        let chars = self.read_u8()? as usize;
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// Reads a string with a 2-byte character count (LABEL, STRING and FORMAT records).
    pub(crate) fn read_xl_unicode_string(&mut self) -> Result<String, IngestError> {
        let mut string = String::new();
        let chars = self.read_u16()? as usize;
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// Reads a shared string table entry, which may carry formatting runs and phonetic
    /// data and may be split across CONTINUE boundaries.
    pub(crate) fn read_xl_unicode_rich_extended_string(&mut self) -> Result<String, IngestError> {
        let mut string = String::new();
        let mut expected = self.read_u16()? as usize;
        let (mut actual, trailing) = self.read_string_into(expected, true, &mut string)?;
        while actual < expected {
            expected -= actual;
            // Each continuation restarts with its own flag byte.
            (actual, _) = self.read_string_into(expected, false, &mut string)?;
            if actual == 0 {
                Err(Biff8Error::NoEnoughDataError(expected))?;
            }
        }
        // Formatting runs and phonetic data follow the last character.
        self.skip(trailing)?;
        Ok(string)
    }

    /// Appends up to `chars` characters from the current chunk. Returns the characters
    /// read and the size of the formatting and phonetic blocks that follow the text.
    fn read_string_into(&mut self, chars: usize, is_extend: bool, content: &mut String) -> Result<(usize, usize), IngestError> {
        let flag = self.read_u8()?;
        let is_high_byte = (flag & 0x1) > 0;
        let expected = if is_high_byte { chars << 1 } else { chars };
        let rich_string_count = if is_extend && (flag & 0x8) > 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let phonetic_count = if is_extend && (flag & 0x4) > 0 {
            self.read_usize()?
        } else {
            0
        };
        let encoding = self.encoding;
        let (bytes, actual) = self.read(expected);
        if is_high_byte {
            let (string, _, _) = encoding_rs::UTF_16LE.decode(bytes);
            content.push_str(&string);
        } else if encoding == encoding_rs::UTF_16LE {
            // Compressed UTF-16 keeps only the low byte, which is Latin-1.
            content.extend(bytes.iter().map(|byte| *byte as char));
        } else {
            let (string, _, _) = encoding.decode(bytes);
            content.push_str(&string);
        }
        let chars = if is_high_byte { actual >> 1 } else { actual };
        Ok((chars, 4 * rich_string_count + phonetic_count))
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = kind.to_le_bytes().to_vec();
        bytes.extend((payload.len() as u16).to_le_bytes());
        bytes.extend(payload);
        bytes
    }

    #[test]
    fn continue_records_join_the_previous_payload() {
        let mut data = record(252, &[1, 2]);
        data.extend(record(CONTINUE, &[3, 4]));
        data.extend(record(10, &[]));
        let mut reader = Biff8Reader::new(data);

        assert_eq!(reader.next().unwrap(), Some(252));
        assert_eq!(reader.peek(), Some(10));
        assert_eq!(reader.read_u32().unwrap_err().to_string(), "Fewer than 4 bytes remaining");
        assert_eq!(reader.next().unwrap(), Some(10));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn reads_compressed_and_wide_strings() {
        let mut payload = vec![3, 0, 0];
        payload.extend(b"abc");
        payload.extend([2, 0, 1]);
        payload.extend("ğü".encode_utf16().flat_map(|unit| unit.to_le_bytes()));
        let mut reader = Biff8Reader::new(record(516, &payload));
        reader.encoding = encoding_rs::UTF_16LE;

        reader.next().unwrap();
        assert_eq!(reader.read_xl_unicode_string().unwrap(), "abc");
        assert_eq!(reader.read_xl_unicode_string().unwrap(), "ğü");
    }

    #[test]
    fn decodes_rk_numbers() {
        let integer = (42u32 << 2) | 0x02;
        let percentage = (1234u32 << 2) | 0x03;
        let double = ((1.5f64.to_bits() >> 34) as u32) << 2;
        let payload: Vec<u8> = [integer, percentage, double]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let mut reader = Biff8Reader::new(record(638, &payload));

        reader.next().unwrap();
        assert_eq!(reader.read_rk_number().unwrap(), 42.0);
        assert_eq!(reader.read_rk_number().unwrap(), 12.34);
        assert_eq!(reader.read_rk_number().unwrap(), 1.5);
    }

    #[test]
    fn truncated_stream_yields_no_record() {
        let mut reader = Biff8Reader::new(vec![9, 8]);
        assert_eq!(reader.next().unwrap(), None);
    }
}
