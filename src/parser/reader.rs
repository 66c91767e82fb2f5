//! Cursor over the raw bytes of a module.

use super::DecodeError;
use byteorder::{ByteOrder, LittleEndian};

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    // Basic operations --------------------------------------------------------

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn eof(&self) -> DecodeError {
        DecodeError::UnexpectedEof { offset: self.pos }
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.bytes.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.eof())?;
        if end > self.bytes.len() {
            return Err(self.eof());
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Splits off the next `len` bytes as an independent reader, used for
    /// section and function bodies whose size is declared up front.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>, DecodeError> {
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        Ok(Reader {
            bytes: &self.bytes[..start + bytes.len()],
            pos: start,
        })
    }

    // Fixed-width little-endian values ------------------------------------------

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(LittleEndian::read_u32(self.read_bytes(4)?)))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(LittleEndian::read_u64(self.read_bytes(8)?)))
    }

    // LEB128 --------------------------------------------------------------------

    pub fn read_vu32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_unsigned(32)? as u32)
    }

    pub fn read_vu64(&mut self) -> Result<u64, DecodeError> {
        self.read_unsigned(64)
    }

    pub fn read_vs32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_signed(32)? as i32)
    }

    /// Signed 33-bit integer, only used by block types that name a type index.
    pub fn read_vs33(&mut self) -> Result<i64, DecodeError> {
        self.read_signed(33)
    }

    pub fn read_vs64(&mut self) -> Result<i64, DecodeError> {
        self.read_signed(64)
    }

    fn read_unsigned(&mut self, bits: u32) -> Result<u64, DecodeError> {
        let max_bytes = (bits + 6) / 7;
        let mut result = 0u64;
        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            let shift = i * 7;
            let payload = u64::from(byte & 0x7f);
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::IntegerTooLong);
                }
                let used = bits - shift;
                if payload >> used != 0 {
                    return Err(DecodeError::IntegerTooLarge);
                }
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    fn read_signed(&mut self, bits: u32) -> Result<i64, DecodeError> {
        let max_bytes = (bits + 6) / 7;
        let mut result = 0i64;
        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            let shift = i * 7;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::IntegerTooLong);
                }
                // the unused high bits of the last byte must replicate the sign bit
                let used = bits - shift;
                let high = (byte & 0x7f) >> (used - 1);
                let all_ones = (1u8 << (8 - used)) - 1;
                if high != 0 && high != all_ones {
                    return Err(DecodeError::IntegerTooLarge);
                }
            }
            result |= i64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                let consumed = shift + 7;
                if consumed < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << consumed;
                }
                break;
            }
        }
        Ok(result)
    }

    // Composite values ----------------------------------------------------------

    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_vu32()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::MalformedUtf8)
    }

    /// Reads a vector length and checks it against an implementation limit.
    pub fn read_count(&mut self, what: &'static str, max: u32) -> Result<u32, DecodeError> {
        let count = self.read_vu32()?;
        if count > max {
            return Err(DecodeError::LimitExceeded { what, count, max });
        }
        Ok(count)
    }
}
