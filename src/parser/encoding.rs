//! Binary format vocabulary shared by the decoder and the encoder.
//!
//! Section identifiers, descriptor tags and the LEB128 / IEEE 754 writers used
//! when serialising a module back to bytes. Readers live in
//! [`crate::parser::reader`].

use byteorder::{ByteOrder, LittleEndian};
use std::convert::TryFrom;
use std::fmt;

/// `\0asm`
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
pub const VERSION: u32 = 1;

pub const TYPE_FUNC: u8 = 0x60;
pub const BLOCK_EMPTY: u8 = 0x40;
pub const OP_END: u8 = 0x0B;
pub const PREFIX_MISC: u8 = 0xFC;

pub const DESC_FUNC: u8 = 0x00;
pub const DESC_TABLE: u8 = 0x01;
pub const DESC_MEMORY: u8 = 0x02;
pub const DESC_GLOBAL: u8 = 0x03;

pub const LIMITS_MIN: u8 = 0x00;
pub const LIMITS_MIN_MAX: u8 = 0x01;

/// Element segments pack three bits into their flags: bit 0 marks a passive
/// or declarative segment, bit 1 an explicit table index (active) or a
/// declarative segment (non-active), bit 2 expression items.
pub const ELEM_PASSIVE_OR_DECLARATIVE: u32 = 0b001;
pub const ELEM_EXPLICIT_TABLE_OR_DECLARATIVE: u32 = 0b010;
pub const ELEM_EXPRESSIONS: u32 = 0b100;

pub const DATA_ACTIVE: u32 = 0;
pub const DATA_PASSIVE: u32 = 1;
pub const DATA_ACTIVE_EXPLICIT: u32 = 2;

/// Section identifiers as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

impl SectionId {
    /// Every non-custom section, in the order a module must declare them.
    pub const ORDERED: [SectionId; 12] = [
        SectionId::Type,
        SectionId::Import,
        SectionId::Function,
        SectionId::Table,
        SectionId::Memory,
        SectionId::Global,
        SectionId::Export,
        SectionId::Start,
        SectionId::Element,
        SectionId::DataCount,
        SectionId::Code,
        SectionId::Data,
    ];

    /// Position of this section in the mandatory ordering. The data count
    /// section sits between element and code despite its higher id.
    pub fn rank(self) -> usize {
        match self {
            SectionId::Custom => 0,
            other => SectionId::ORDERED.iter().position(|s| *s == other).map_or(0, |p| p + 1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionId::Custom => "custom",
            SectionId::Type => "type",
            SectionId::Import => "import",
            SectionId::Function => "function",
            SectionId::Table => "table",
            SectionId::Memory => "memory",
            SectionId::Global => "global",
            SectionId::Export => "export",
            SectionId::Start => "start",
            SectionId::Element => "element",
            SectionId::Code => "code",
            SectionId::Data => "data",
            SectionId::DataCount => "data count",
        }
    }
}

impl TryFrom<u8> for SectionId {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, u8> {
        Ok(match id {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            12 => SectionId::DataCount,
            other => return Err(other),
        })
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name(), *self as u8)
    }
}

/// Writers for the primitive encodings of the binary format.
///
/// Integers are always written in their shortest LEB128 form.
pub trait WasmWrite {
    fn put_u32_leb(&mut self, value: u32);
    fn put_u64_leb(&mut self, value: u64);
    fn put_i32_leb(&mut self, value: i32);
    fn put_i64_leb(&mut self, value: i64);
    fn put_f32(&mut self, value: f32);
    fn put_f64(&mut self, value: f64);
    /// Length-prefixed UTF-8 name.
    fn put_name(&mut self, name: &str);
    /// Length-prefixed byte vector.
    fn put_blob(&mut self, bytes: &[u8]);
}

impl WasmWrite for Vec<u8> {
    fn put_u32_leb(&mut self, value: u32) {
        self.put_u64_leb(u64::from(value));
    }

    fn put_u64_leb(&mut self, mut value: u64) {
        loop {
            let low = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.push(low);
                return;
            }
            self.push(low | 0x80);
        }
    }

    fn put_i32_leb(&mut self, value: i32) {
        self.put_i64_leb(i64::from(value));
    }

    fn put_i64_leb(&mut self, mut value: i64) {
        loop {
            let low = (value & 0x7f) as u8;
            value >>= 7;
            let sign_clear = low & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                self.push(low);
                return;
            }
            self.push(low | 0x80);
        }
    }

    fn put_f32(&mut self, value: f32) {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, value.to_bits());
        self.extend_from_slice(&raw);
    }

    fn put_f64(&mut self, value: f64) {
        let mut raw = [0u8; 8];
        LittleEndian::write_u64(&mut raw, value.to_bits());
        self.extend_from_slice(&raw);
    }

    fn put_name(&mut self, name: &str) {
        self.put_blob(name.as_bytes());
    }

    fn put_blob(&mut self, bytes: &[u8]) {
        self.put_u32_leb(bytes.len() as u32);
        self.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::reader::Reader;
    use rand::Rng;

    fn leb_u32(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u32_leb(value);
        buf
    }

    fn leb_i32(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_i32_leb(value);
        buf
    }

    #[test]
    fn unsigned_known_encodings() {
        assert_eq!(leb_u32(0), vec![0x00]);
        assert_eq!(leb_u32(127), vec![0x7f]);
        assert_eq!(leb_u32(128), vec![0x80, 0x01]);
        assert_eq!(leb_u32(624485), vec![0xe5, 0x8e, 0x26]);
        assert_eq!(leb_u32(u32::MAX), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn signed_known_encodings() {
        assert_eq!(leb_i32(0), vec![0x00]);
        assert_eq!(leb_i32(-1), vec![0x7f]);
        assert_eq!(leb_i32(63), vec![0x3f]);
        assert_eq!(leb_i32(64), vec![0xc0, 0x00]);
        assert_eq!(leb_i32(-64), vec![0x40]);
        assert_eq!(leb_i32(-123456), vec![0xc0, 0xbb, 0x78]);
        assert_eq!(leb_i32(i32::MIN), vec![0x80, 0x80, 0x80, 0x80, 0x78]);
    }

    #[test]
    fn random_values_read_back() {
        let mut rng = rand::thread_rng();
        for _ in 0..2000 {
            let (u, s, l): (u32, i32, i64) = (rng.gen(), rng.gen(), rng.gen());
            let mut buf = Vec::new();
            buf.put_u32_leb(u);
            buf.put_i32_leb(s);
            buf.put_i64_leb(l);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.read_vu32().unwrap(), u);
            assert_eq!(reader.read_vs32().unwrap(), s);
            assert_eq!(reader.read_vs64().unwrap(), l);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn floats_keep_their_bits() {
        let nan_with_payload = f32::from_bits(0x7fa0_0001);
        let mut buf = Vec::new();
        buf.put_f32(nan_with_payload);
        buf.put_f64(-0.0);
        assert_eq!(&buf[..4], &[0x01, 0x00, 0xa0, 0x7f]);
        assert_eq!(&buf[4..], &[0, 0, 0, 0, 0, 0, 0, 0x80]);
    }

    #[test]
    fn data_count_ranks_between_element_and_code() {
        assert!(SectionId::Element.rank() < SectionId::DataCount.rank());
        assert!(SectionId::DataCount.rank() < SectionId::Code.rank());
        assert_eq!(SectionId::try_from(13), Err(13));
    }
}
