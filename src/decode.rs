//! Lazy, schema-less decoding of protocol buffer payloads.
//!
//! A [`Message`] only splits its bytes into fields when they are first asked for. Length-delimited
//! fields keep their payload undecoded until a caller wants them as a sub-message, a string or
//! some other interpretation; see [`Field::render`](crate::render).
//!
//! ```
//! use rawproto::{Message, WireType};
//!
//! let message = Message::new(vec![0x08, 0x96, 0x01, 0x12, 0x02, b'h', b'i']);
//! assert_eq!(message.get(1)[0].varint(), Some(150));
//! assert_eq!(message.get(2)[0].wire_type(), WireType::LengthDelimited);
//! assert_eq!(message.field_counts().get(&2), Some(&1));
//! ```

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::path::Path;
use crate::render::{RenderType, Value};
use crate::wire::{decode_varint, Cursor, WireType};

/// Deepest sub-message level that tree walks and searches descend into on their own.
///
/// Fields below it are rendered without trying them as messages.
pub const MAX_NESTING: usize = 100;

/// A message node of the lazy field tree.
///
/// The field table is built at most once, on first access. Decoding never panics and never
/// fails past this node: on malformed input the table holds the fields read before the problem,
/// and [`error`](Message::error) and [`remainder`](Message::remainder) describe what was left.
#[derive(Debug, Clone)]
pub struct Message
{
    data: Bytes,
    path: Path,
    decoded: OnceLock<Decoded>,
}

#[derive(Debug, Clone, Default)]
struct Decoded
{
    fields: BTreeMap<u32, Vec<Field>>,

    /// (field number, index within its group) in buffer order.
    order: Vec<(u32, usize)>,

    error: Option<DecodeError>,
    remainder: Option<Bytes>,
}

/// One wire-level record of a message.
#[derive(Debug, Clone)]
pub struct Field
{
    number: u32,
    wire_type: WireType,
    payload: Bytes,
    path: Path,
    varint: Option<u64>,
    pub(crate) cache: FieldCache,
}

/// Compute-once slots for the interpretations of a field.
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldCache
{
    speculative: OnceLock<Option<Arc<Message>>>,
    explicit: OnceLock<Result<Arc<Message>, DecodeError>>,
    pub(crate) values: [OnceLock<Result<Value, DecodeError>>; RenderType::COUNT],
}

impl Message
{
    /// Creates a root message over `data`.
    pub fn new(data: impl Into<Bytes>) -> Self
    {
        Self::at(data, Path::root())
    }

    /// Creates a message that lives at `path` within some larger document.
    ///
    /// Paths of the fields below it continue from `path`, so name and type maps written for the
    /// whole document keep working on the detached part.
    pub fn at(data: impl Into<Bytes>, path: Path) -> Self
    {
        Message {
            data: data.into(),
            path,
            decoded: OnceLock::new(),
        }
    }

    /// Decodes `data` as a root message.
    ///
    /// Fails only if the buffer is non-empty and not a single field could be read from it.
    /// Partially decodable buffers succeed; inspect [`error`](Message::error) for the rest.
    pub fn parse(data: impl Into<Bytes>) -> Result<Self, DecodeError>
    {
        let message = Self::new(data);
        if let Some(e) = message.error() {
            if message.is_empty() {
                return Err(e.clone());
            }
            debug!(
                fields = message.len(),
                remainder = message.remainder().map(|r| r.len()).unwrap_or(0),
                "Partial decode: {}",
                e
            );
        }
        Ok(message)
    }

    /// Decodes `data` at `path`, failing on any malformed or trailing bytes.
    pub fn parse_exact(data: impl Into<Bytes>, path: Path) -> Result<Self, DecodeError>
    {
        let message = Self::at(data, path);
        match message.error() {
            Some(e) => Err(e.clone()),
            None => Ok(message),
        }
    }

    /// The message bytes.
    pub fn bytes(&self) -> &Bytes
    {
        &self.data
    }

    /// Path of the message. Root messages have the root path.
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Fields grouped by field number, each group in buffer order.
    pub fn fields(&self) -> &BTreeMap<u32, Vec<Field>>
    {
        &self.decoded().fields
    }

    /// All appearances of field `number`.
    pub fn get(&self, number: u32) -> &[Field]
    {
        self.decoded()
            .fields
            .get(&number)
            .map(|f| f.as_slice())
            .unwrap_or(&[])
    }

    /// Iterates all fields in buffer order.
    pub fn iter(&self) -> impl Iterator<Item = &Field>
    {
        let decoded = self.decoded();
        decoded
            .order
            .iter()
            .map(move |(number, idx)| &decoded.fields[number][*idx])
    }

    /// Number of decoded fields, counting every repetition.
    pub fn len(&self) -> usize
    {
        self.decoded().order.len()
    }

    /// True, if no field was decoded.
    pub fn is_empty(&self) -> bool
    {
        self.decoded().order.is_empty()
    }

    /// Number of appearances per field number.
    ///
    /// Only separates the fields; no payload is interpreted.
    pub fn field_counts(&self) -> BTreeMap<u32, usize>
    {
        self.fields()
            .iter()
            .map(|(number, fields)| (*number, fields.len()))
            .collect()
    }

    /// Wire type per field number, taken from the first appearance.
    pub fn fingerprint(&self) -> BTreeMap<u32, WireType>
    {
        self.fields()
            .iter()
            .filter_map(|(number, fields)| fields.first().map(|f| (*number, f.wire_type)))
            .collect()
    }

    /// The error that stopped decoding, if any.
    pub fn error(&self) -> Option<&DecodeError>
    {
        self.decoded().error.as_ref()
    }

    /// Bytes left undecoded after an error.
    pub fn remainder(&self) -> Option<&Bytes>
    {
        self.decoded().remainder.as_ref()
    }

    /// True, if every byte was consumed by well-formed fields.
    pub fn is_complete(&self) -> bool
    {
        self.decoded().error.is_none()
    }

    /// Length-delimited fields anywhere below this message whose text contains `needle`.
    ///
    /// Only plausible sub-messages are descended into, down to [`MAX_NESTING`] levels.
    pub fn search_string(&self, needle: &str) -> Vec<&Field>
    {
        let mut found = vec![];
        self.search_into(needle, 0, &mut found);
        found
    }

    fn search_into<'a>(&'a self, needle: &str, depth: usize, found: &mut Vec<&'a Field>)
    {
        for field in self.iter() {
            let child = match depth < MAX_NESTING {
                true => field.try_parse_as_message(),
                false => None,
            };
            match child {
                Some(child) => child.search_into(needle, depth + 1, found),
                None if field.wire_type == WireType::LengthDelimited => {
                    if let Ok(text) = std::str::from_utf8(&field.payload) {
                        if text.contains(needle) {
                            found.push(field);
                        }
                    }
                }
                None => {}
            }
        }
    }

    fn decoded(&self) -> &Decoded
    {
        self.decoded.get_or_init(|| decode_fields(&self.data, &self.path))
    }
}

impl PartialEq for Message
{
    fn eq(&self, other: &Self) -> bool
    {
        self.path == other.path && self.data == other.data
    }
}

fn decode_fields(data: &Bytes, path: &Path) -> Decoded
{
    let mut decoded = Decoded::default();
    let mut cursor = Cursor::new(data.clone());

    while !cursor.is_empty() {
        let start = cursor.position();
        match read_field(&mut cursor, path) {
            Ok(field) => {
                let group = decoded.fields.entry(field.number).or_default();
                decoded.order.push((field.number, group.len()));
                group.push(field);
            }
            Err(e) => {
                decoded.remainder = Some(data.slice(start..));
                decoded.error = Some(e);
                break;
            }
        }
    }

    decoded
}

fn read_field(cursor: &mut Cursor, parent: &Path) -> Result<Field, DecodeError>
{
    let tag_start = cursor.position();
    let (number, wire_type) = cursor.read_tag()?;

    let mut varint = None;
    let payload = match wire_type {
        WireType::Varint => {
            let start = cursor.position();
            let (value, _) = cursor.read_varint()?;
            varint = Some(value);
            cursor.since(start)
        }
        WireType::Fixed64 => cursor.read_fixed(8)?,
        WireType::Fixed32 => cursor.read_fixed(4)?,
        WireType::LengthDelimited => cursor.read_length_delimited()?,
        WireType::StartGroup => cursor.read_group(number)?,
        WireType::EndGroup => {
            return Err(DecodeError::UnexpectedGroupEnd {
                number,
                offset: tag_start,
            })
        }
    };

    Ok(Field {
        number,
        wire_type,
        payload,
        path: parent.child(number),
        varint,
        cache: FieldCache::default(),
    })
}

impl Field
{
    /// Creates a detached field.
    ///
    /// `payload` follows the decoder's convention: the varint bytes for varint fields, the raw
    /// 8 or 4 bytes for fixed fields, the content for length-delimited fields and the body for
    /// groups.
    pub fn new(
        path: Path,
        wire_type: WireType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, DecodeError>
    {
        let payload = payload.into();
        let varint = match wire_type {
            WireType::Varint => Some(decode_varint(&payload)?.0),
            _ => None,
        };

        Ok(Field {
            number: path.last().unwrap_or(0),
            wire_type,
            payload,
            path,
            varint,
            cache: FieldCache::default(),
        })
    }

    /// Field number.
    pub fn number(&self) -> u32
    {
        self.number
    }

    /// Wire type.
    pub fn wire_type(&self) -> WireType
    {
        self.wire_type
    }

    /// Payload bytes as found on the wire.
    pub fn payload(&self) -> &Bytes
    {
        &self.payload
    }

    /// Path of the field.
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Decoded value of a varint field.
    pub fn varint(&self) -> Option<u64>
    {
        self.varint
    }

    /// The payload as a sub-message, if it plausibly is one.
    ///
    /// A length-delimited payload qualifies when it decodes into at least one field with no bytes
    /// left over. Group bodies always qualify unless they are malformed. The attempt is made
    /// once and remembered.
    pub fn try_parse_as_message(&self) -> Option<&Arc<Message>>
    {
        self.cache
            .speculative
            .get_or_init(|| {
                let empty_ok = match self.wire_type {
                    WireType::LengthDelimited => false,
                    WireType::StartGroup => true,
                    _ => return None,
                };

                let child = Message::at(self.payload.clone(), self.path.clone());
                if let Some(e) = child.error() {
                    trace!(path = %self.path, "Not a sub-message: {}", e);
                    return None;
                }
                if child.is_empty() && !empty_ok {
                    return None;
                }
                Some(Arc::new(child))
            })
            .as_ref()
    }

    /// The payload as a sub-message, surfacing the decode error if it is not one.
    ///
    /// Used when the caller has asked for `sub` explicitly. An empty payload is an empty
    /// message here.
    pub fn sub_message(&self) -> Result<&Arc<Message>, DecodeError>
    {
        self.cache
            .explicit
            .get_or_init(|| {
                if !RenderType::Sub.is_legal_for(self.wire_type) {
                    return Err(DecodeError::InvalidRenderType {
                        render_type: RenderType::Sub,
                        wire_type: self.wire_type,
                    });
                }
                match self.try_parse_as_message() {
                    Some(message) => Ok(message.clone()),
                    None => Message::parse_exact(self.payload.clone(), self.path.clone())
                        .map(Arc::new),
                }
            })
            .as_ref()
            .map_err(|e| e.clone())
    }
}

impl PartialEq for Field
{
    fn eq(&self, other: &Self) -> bool
    {
        self.number == other.number
            && self.wire_type == other.wire_type
            && self.path == other.path
            && self.payload == other.payload
    }
}

#[cfg(test)]
mod test
{
    use super::*;

    #[test]
    fn simple_varint()
    {
        let message = Message::new(vec![0x08, 0x96, 0x01]);
        assert_eq!(message.len(), 1);

        let field = &message.get(1)[0];
        assert_eq!(field.number(), 1);
        assert_eq!(field.wire_type(), WireType::Varint);
        assert_eq!(field.varint(), Some(150));
        assert_eq!(&field.payload()[..], &[0x96, 0x01]);
        assert_eq!(field.path(), &Path::from(vec![1]));
        assert!(message.is_complete());
    }

    #[test]
    fn repeated_elements_keep_order()
    {
        let message = Message::new(vec![
            0x22, 0x05, b'h', b'e', b'l', b'l', b'o', 0x28, 0x01, 0x28, 0x02, 0x28, 0x03,
        ]);
        let numbers: Vec<_> = message.iter().map(|f| f.number()).collect();
        assert_eq!(numbers, vec![4, 5, 5, 5]);

        let values: Vec<_> = message.get(5).iter().map(|f| f.varint().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);

        let counts = message.field_counts();
        assert_eq!(counts.get(&4), Some(&1));
        assert_eq!(counts.get(&5), Some(&3));
    }

    #[test]
    fn fixed_fields()
    {
        let message = Message::new(vec![
            0x09, 1, 2, 3, 4, 5, 6, 7, 8, // field 1, fixed64
            0x15, 1, 2, 3, 4, // field 2, fixed32
        ]);
        assert_eq!(message.get(1)[0].wire_type(), WireType::Fixed64);
        assert_eq!(&message.get(1)[0].payload()[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(message.get(2)[0].wire_type(), WireType::Fixed32);
        assert_eq!(message.get(2)[0].payload().len(), 4);
    }

    #[test]
    fn nested_message_is_lazy_and_shared()
    {
        let data = Bytes::from_static(&[0x1a, 0x03, 0x08, 0x96, 0x01]);
        let message = Message::new(data.clone());
        let field = &message.get(3)[0];

        let child = field.try_parse_as_message().unwrap();
        assert_eq!(child.get(1)[0].varint(), Some(150));
        assert_eq!(child.get(1)[0].path(), &Path::from(vec![3, 1]));

        // The payload is a view into the root buffer.
        assert_eq!(field.payload().as_ptr(), data[2..].as_ptr());

        // Second access hands out the same node.
        let again = field.try_parse_as_message().unwrap();
        assert!(Arc::ptr_eq(child, again));
    }

    #[test]
    fn text_is_not_a_message()
    {
        let message = Message::new(b"\x12\x07testing".to_vec());
        assert!(message.get(2)[0].try_parse_as_message().is_none());
    }

    #[test]
    fn empty_payload_is_not_a_plausible_message()
    {
        let message = Message::new(vec![0x12, 0x00]);
        let field = &message.get(2)[0];
        assert!(field.try_parse_as_message().is_none());
        assert!(field.sub_message().unwrap().is_empty());
    }

    #[test]
    fn truncated_buffer_keeps_prefix()
    {
        let message = Message::new(vec![0x08, 0x01, 0x10, 0x96]);
        assert_eq!(message.len(), 1);
        assert_eq!(message.get(1)[0].varint(), Some(1));
        assert!(matches!(
            message.error(),
            Some(DecodeError::BufferOverflow { .. })
        ));
        assert_eq!(&message.remainder().unwrap()[..], &[0x10, 0x96]);
        assert!(Message::parse(vec![0x08, 0x01, 0x10, 0x96]).is_ok());
    }

    #[test]
    fn truncated_first_field_is_an_error()
    {
        assert!(matches!(
            Message::parse(vec![0x08, 0x96]),
            Err(DecodeError::BufferOverflow { .. })
        ));
        assert!(Message::parse(Vec::<u8>::new()).unwrap().is_empty());
    }

    #[test]
    fn end_group_at_top_level()
    {
        let message = Message::new(vec![0x0c]);
        assert_eq!(
            message.error(),
            Some(&DecodeError::UnexpectedGroupEnd {
                number: 1,
                offset: 0
            })
        );
    }

    #[test]
    fn groups_become_messages()
    {
        // Field 2 is a group holding field 3 = 7, followed by field 1 = 1.
        let message = Message::new(vec![0x13, 0x18, 0x07, 0x14, 0x08, 0x01]);
        let group = &message.get(2)[0];
        assert_eq!(group.wire_type(), WireType::StartGroup);
        assert_eq!(&group.payload()[..], &[0x18, 0x07]);

        let child = group.try_parse_as_message().unwrap();
        assert_eq!(child.get(3)[0].varint(), Some(7));
        assert_eq!(message.get(1)[0].varint(), Some(1));
    }

    #[test]
    fn sub_message_surfaces_errors()
    {
        let message = Message::new(b"\x12\x07testing".to_vec());
        assert!(message.get(2)[0].sub_message().is_err());

        let varint = Message::new(vec![0x08, 0x01]);
        assert_eq!(
            varint.get(1)[0].sub_message().unwrap_err(),
            DecodeError::InvalidRenderType {
                render_type: RenderType::Sub,
                wire_type: WireType::Varint
            }
        );
    }

    #[test]
    fn search_strings()
    {
        // 1: { 2: "needle in a haystack" }, 3: "hay"
        let mut data = vec![0x0a, 22, 0x12, 20];
        data.extend_from_slice(b"needle in a haystack");
        data.extend_from_slice(b"\x1a\x03hay");

        let message = Message::new(data);
        let found = message.search_string("needle");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path(), &Path::from(vec![1, 2]));
        assert_eq!(message.search_string("hay").len(), 2);
    }

    #[test]
    fn concurrent_readers_share_caches()
    {
        let message = Arc::new(Message::new(vec![0x1a, 0x03, 0x08, 0x96, 0x01]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let message = message.clone();
                std::thread::spawn(move || {
                    let child = message.get(3)[0].try_parse_as_message().unwrap().clone();
                    child.get(1)[0].varint()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(150));
        }
    }
}
