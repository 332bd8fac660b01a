//! Low level wire format primitives.
//!
//! Everything here works on an in-memory buffer with an explicit position. Nothing is validated
//! beyond the availability of the bytes that a read needs.

use bytes::{BufMut, Bytes};
use std::convert::TryFrom;
use std::fmt;

use crate::error::DecodeError;

/// Largest field number the protobuf encoding allows.
pub const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;

/// A 64-bit varint never needs more than ten bytes.
const MAX_VARINT_LEN: usize = 10;

/// Physical encoding of a field, taken from the low three bits of its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WireType
{
    /// `int32`, `int64`, `uint32`, `uint64`, `sint32`, `sint64`, `bool`, `enum`.
    Varint = 0,

    /// `fixed64`, `sfixed64`, `double`.
    Fixed64 = 1,

    /// `string`, `bytes`, embedded messages, packed repeated fields.
    LengthDelimited = 2,

    /// Group start (deprecated).
    StartGroup = 3,

    /// Group end (deprecated).
    EndGroup = 4,

    /// `fixed32`, `sfixed32`, `float`.
    Fixed32 = 5,
}

impl WireType
{
    /// Wire type for the tag bits, if they name one.
    pub fn from_bits(bits: u8) -> Option<Self>
    {
        Some(match bits {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            3 => WireType::StartGroup,
            4 => WireType::EndGroup,
            5 => WireType::Fixed32,
            _ => return None,
        })
    }

    /// The tag bits of the wire type.
    pub fn bits(self) -> u8
    {
        self as u8
    }
}

impl fmt::Display for WireType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::LengthDelimited => "length-delimited",
            WireType::StartGroup => "group",
            WireType::EndGroup => "group end",
            WireType::Fixed32 => "fixed32",
        })
    }
}

/// Decodes a varint from the start of `data`.
///
/// Returns the value and the number of bytes it occupied. The value is accumulated in full 64
/// bits.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), DecodeError>
{
    varint_at(data, 0)
}

/// Appends the varint encoding of `value` to `buf`.
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut)
{
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Appends a field tag to `buf`.
pub fn encode_tag(number: u32, wire_type: WireType, buf: &mut impl BufMut)
{
    encode_varint((u64::from(number) << 3) | u64::from(wire_type.bits()), buf);
}

fn varint_at(data: &[u8], start: usize) -> Result<(u64, usize), DecodeError>
{
    let mut result = 0u64;
    let available = data.get(start..).unwrap_or(&[]);
    for (idx, b) in available.iter().enumerate() {
        if idx >= MAX_VARINT_LEN {
            return Err(DecodeError::VarintTooLong { offset: start });
        }

        result |= u64::from(b & 0x7f) << (idx * 7);
        if b & 0x80 == 0 {
            return Ok((result, idx + 1));
        }
    }

    Err(DecodeError::BufferOverflow {
        offset: start,
        needed: 1,
    })
}

/// Read position over a shared byte buffer.
///
/// Slices handed out by the cursor share the underlying allocation.
#[derive(Debug, Clone)]
pub struct Cursor
{
    data: Bytes,
    pos: usize,
}

impl Cursor
{
    /// Creates a cursor at the start of `data`.
    pub fn new(data: Bytes) -> Self
    {
        Cursor { data, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize
    {
        self.pos
    }

    /// True, once every byte has been consumed.
    pub fn is_empty(&self) -> bool
    {
        self.pos >= self.data.len()
    }

    /// The bytes that have not been consumed yet.
    pub fn remainder(&self) -> Bytes
    {
        self.data.slice(self.pos.min(self.data.len())..)
    }

    /// Bytes between `start` and the current position.
    pub fn since(&self, start: usize) -> Bytes
    {
        self.data.slice(start..self.pos)
    }

    /// Reads a varint, returning the value and the number of bytes consumed.
    pub fn read_varint(&mut self) -> Result<(u64, usize), DecodeError>
    {
        let (value, len) = varint_at(&self.data, self.pos)?;
        self.pos += len;
        Ok((value, len))
    }

    /// Reads exactly `n` bytes.
    pub fn read_fixed(&mut self, n: usize) -> Result<Bytes, DecodeError>
    {
        let available = self.data.len().saturating_sub(self.pos);
        if available < n {
            return Err(DecodeError::BufferOverflow {
                offset: self.pos,
                needed: n - available,
            });
        }

        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    /// Reads a varint length followed by that many bytes.
    pub fn read_length_delimited(&mut self) -> Result<Bytes, DecodeError>
    {
        let start = self.pos;
        let (len, _) = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::BufferOverflow {
            offset: start,
            needed: usize::MAX,
        })?;

        self.read_fixed(len).map_err(|e| {
            self.pos = start;
            e
        })
    }

    /// Reads a tag and splits it into field number and wire type.
    pub fn read_tag(&mut self) -> Result<(u32, WireType), DecodeError>
    {
        let offset = self.pos;
        let (tag, _) = self.read_varint()?;

        let bits = (tag & 0x07) as u8;
        let wire_type =
            WireType::from_bits(bits).ok_or(DecodeError::InvalidWireType { wire_type: bits, offset })?;

        let number = tag >> 3;
        if number == 0 || number > MAX_FIELD_NUMBER {
            return Err(DecodeError::InvalidFieldNumber { number, offset });
        }

        Ok((number as u32, wire_type))
    }

    /// Reads the body of a group whose start tag has already been consumed.
    ///
    /// Returns the bytes between the start tag and the matching end tag. The end tag itself is
    /// consumed but not part of the result. Nested groups are skipped as a whole, however deep
    /// they go.
    pub fn read_group(&mut self, number: u32) -> Result<Bytes, DecodeError>
    {
        let start = self.pos;
        let mut open = vec![number];
        while let Some(&expected) = open.last() {
            let tag_start = self.pos;
            let (found, wire_type) = self.read_tag()?;
            match wire_type {
                WireType::EndGroup if found == expected => {
                    open.pop();
                    if open.is_empty() {
                        return Ok(self.data.slice(start..tag_start));
                    }
                }
                WireType::EndGroup => {
                    return Err(DecodeError::GroupMismatch {
                        expected,
                        found,
                        offset: tag_start,
                    });
                }
                WireType::StartGroup => open.push(found),
                other => self.skip(other)?,
            }
        }
        Ok(self.data.slice(start..self.pos))
    }

    fn skip(&mut self, wire_type: WireType) -> Result<(), DecodeError>
    {
        match wire_type {
            WireType::Varint => self.read_varint().map(drop),
            WireType::Fixed64 => self.read_fixed(8).map(drop),
            WireType::Fixed32 => self.read_fixed(4).map(drop),
            WireType::LengthDelimited => self.read_length_delimited().map(drop),
            WireType::StartGroup | WireType::EndGroup => {
                unreachable!("Groups are handled by read_group")
            }
        }
    }
}

#[cfg(test)]
mod test
{
    use super::*;

    #[test]
    fn canonical_varint()
    {
        assert_eq!(decode_varint(&[0x96, 0x01]).unwrap(), (150, 2));
        assert_eq!(decode_varint(&[0x8e, 0x02]).unwrap(), (270, 2));
        assert_eq!(decode_varint(&[0x00]).unwrap(), (0, 1));
    }

    #[test]
    fn encode_then_decode()
    {
        let mut buf = vec![];
        encode_varint(300, &mut buf);
        assert_eq!(buf, vec![0xac, 0x02]);
        assert_eq!(decode_varint(&buf).unwrap(), (300, 2));
    }

    #[test]
    fn full_64_bit_range()
    {
        for value in &[1u64 << 31, 1 << 35, u64::from(u32::MAX) + 1, u64::MAX] {
            let mut buf = vec![];
            encode_varint(*value, &mut buf);
            assert_eq!(decode_varint(&buf).unwrap(), (*value, buf.len()));
        }
    }

    #[test]
    fn truncated_varint()
    {
        assert_eq!(
            decode_varint(&[0x96]),
            Err(DecodeError::BufferOverflow {
                offset: 0,
                needed: 1
            })
        );
        assert!(matches!(
            decode_varint(&[]),
            Err(DecodeError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn overlong_varint()
    {
        let data = [0xff; 11];
        assert_eq!(
            decode_varint(&data),
            Err(DecodeError::VarintTooLong { offset: 0 })
        );
    }

    #[test]
    fn read_fixed_past_end()
    {
        let mut cursor = Cursor::new(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(
            cursor.read_fixed(4),
            Err(DecodeError::BufferOverflow {
                offset: 0,
                needed: 1
            })
        );
        assert_eq!(cursor.read_fixed(3).unwrap(), Bytes::from_static(&[1, 2, 3]));
        assert!(cursor.is_empty());
    }

    #[test]
    fn length_delimited()
    {
        let mut cursor = Cursor::new(Bytes::from_static(b"\x03abcd"));
        assert_eq!(cursor.read_length_delimited().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(cursor.remainder(), Bytes::from_static(b"d"));

        let mut short = Cursor::new(Bytes::from_static(b"\x05ab"));
        assert!(short.read_length_delimited().is_err());
        assert_eq!(short.position(), 0);
    }

    #[test]
    fn tags()
    {
        let mut cursor = Cursor::new(Bytes::from_static(&[0x08, 0x07, 0x00]));
        assert_eq!(cursor.read_tag().unwrap(), (1, WireType::Varint));
        assert_eq!(
            cursor.read_tag(),
            Err(DecodeError::InvalidWireType {
                wire_type: 7,
                offset: 1
            })
        );
        assert_eq!(
            cursor.read_tag(),
            Err(DecodeError::InvalidFieldNumber {
                number: 0,
                offset: 2
            })
        );
    }

    #[test]
    fn group_body()
    {
        // Group 2 holding field 1 = 150 and a nested group 3, then the end of group 2.
        let data = [0x08, 0x96, 0x01, 0x1b, 0x08, 0x01, 0x1c, 0x14, 0x08, 0x01];
        let mut cursor = Cursor::new(Bytes::copy_from_slice(&data));
        let body = cursor.read_group(2).unwrap();
        assert_eq!(&body[..], &data[..7]);
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn group_mismatch()
    {
        let mut cursor = Cursor::new(Bytes::from_static(&[0x08, 0x01, 0x1c]));
        assert_eq!(
            cursor.read_group(2),
            Err(DecodeError::GroupMismatch {
                expected: 2,
                found: 3,
                offset: 2
            })
        );
    }

    #[test]
    fn unterminated_group()
    {
        let mut cursor = Cursor::new(Bytes::from_static(&[0x08, 0x01]));
        assert!(matches!(
            cursor.read_group(2),
            Err(DecodeError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn deeply_nested_groups()
    {
        // 100 000 nested group 1 starts, closed again one by one.
        let depth = 100_000;
        let mut data = vec![0x0b; depth];
        data.extend(std::iter::repeat(0x0c).take(depth + 1));
        let mut cursor = Cursor::new(Bytes::from(data));
        let body = cursor.read_group(1).unwrap();
        assert_eq!(body.len(), depth * 2);
        assert!(cursor.is_empty());

        // The same starts without any end tags.
        let mut cursor = Cursor::new(Bytes::from(vec![0x0b; depth]));
        assert!(matches!(
            cursor.read_group(1),
            Err(DecodeError::BufferOverflow { .. })
        ));
    }
}
