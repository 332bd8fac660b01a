//! Interpretations of field payloads.
//!
//! The wire format only tells how long a value is. What it means is chosen per field with a
//! [`RenderType`], either supplied by the caller or guessed by [`Field::default_render_type`].

use bytes::Bytes;
use std::convert::TryInto;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::decode::{Field, Message};
use crate::error::{DecodeError, PathError};
use crate::path::Path;
use crate::project::FieldMap;
use crate::wire::{decode_varint, WireType};

/// Semantic interpretation of a field payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderType
{
    /// The field itself.
    Raw,
    /// Payload bytes.
    Bytes,
    /// UTF-8 text.
    String,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    UInt,
    /// Floating point number.
    Float,
    /// Boolean.
    Bool,
    /// Embedded message.
    Sub,
    /// Back-to-back varints.
    PackedVarint,
    /// Back-to-back little-endian 32-bit words.
    PackedInt32,
    /// Back-to-back little-endian 64-bit words.
    PackedInt64,
}

const VARINT_TYPES: &[RenderType] = &[
    RenderType::Int,
    RenderType::UInt,
    RenderType::Bool,
    RenderType::Raw,
    RenderType::Bytes,
];

const FIXED_TYPES: &[RenderType] = &[
    RenderType::UInt,
    RenderType::Int,
    RenderType::Float,
    RenderType::Bytes,
    RenderType::Raw,
];

const LENGTH_DELIMITED_TYPES: &[RenderType] = &[
    RenderType::String,
    RenderType::Bytes,
    RenderType::Sub,
    RenderType::PackedVarint,
    RenderType::PackedInt32,
    RenderType::PackedInt64,
    RenderType::Raw,
];

const GROUP_TYPES: &[RenderType] = &[RenderType::Sub, RenderType::Bytes, RenderType::Raw];

impl RenderType
{
    /// Number of render types.
    pub const COUNT: usize = 11;

    /// Canonical name, as used in queries and type maps.
    pub fn name(self) -> &'static str
    {
        match self {
            RenderType::Raw => "raw",
            RenderType::Bytes => "bytes",
            RenderType::String => "string",
            RenderType::Int => "int",
            RenderType::UInt => "uint",
            RenderType::Float => "float",
            RenderType::Bool => "bool",
            RenderType::Sub => "sub",
            RenderType::PackedVarint => "packedVarint",
            RenderType::PackedInt32 => "packedInt32",
            RenderType::PackedInt64 => "packedInt64",
        }
    }

    /// Render types that make sense for a wire type.
    ///
    /// The first entry is the default, except for length-delimited fields whose default is
    /// guessed from the payload.
    pub fn legal_for(wire_type: WireType) -> &'static [RenderType]
    {
        match wire_type {
            WireType::Varint => VARINT_TYPES,
            WireType::Fixed64 | WireType::Fixed32 => FIXED_TYPES,
            WireType::LengthDelimited => LENGTH_DELIMITED_TYPES,
            WireType::StartGroup => GROUP_TYPES,
            WireType::EndGroup => &[],
        }
    }

    /// True, if the render type may be used for the wire type.
    pub fn is_legal_for(self, wire_type: WireType) -> bool
    {
        Self::legal_for(wire_type).contains(&self)
    }

    pub(crate) fn index(self) -> usize
    {
        self as usize
    }
}

impl fmt::Display for RenderType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl FromStr for RenderType
{
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        s.parse::<TypeSpec>().map(|spec| spec.render)
    }
}

/// A render type as written by the caller.
///
/// Type maps may name protobuf scalar types (`sint32`, `fixed64`, ...) instead of render types.
/// These map onto the closest render type, and the scalar name is kept for schema output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeSpec
{
    /// Render type used for values.
    pub render: RenderType,

    /// Protobuf scalar type named by the caller, if any.
    pub scalar: Option<&'static str>,
}

impl From<RenderType> for TypeSpec
{
    fn from(render: RenderType) -> Self
    {
        TypeSpec {
            render,
            scalar: None,
        }
    }
}

impl FromStr for TypeSpec
{
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let lower = s.trim().to_ascii_lowercase();
        let render = match lower.as_str() {
            "raw" => RenderType::Raw,
            "bytes" => RenderType::Bytes,
            "string" => RenderType::String,
            "int" => RenderType::Int,
            "uint" => RenderType::UInt,
            "float" => RenderType::Float,
            "bool" => RenderType::Bool,
            "sub" => RenderType::Sub,
            "packedvarint" | "packedintvar" => RenderType::PackedVarint,
            "packedint32" => RenderType::PackedInt32,
            "packedint64" => RenderType::PackedInt64,
            _ => return scalar_alias(&lower),
        };
        Ok(render.into())
    }
}

fn scalar_alias(name: &str) -> Result<TypeSpec, PathError>
{
    let (render, scalar) = match name {
        "double" => (RenderType::Float, "double"),
        "int32" => (RenderType::Int, "int32"),
        "int64" => (RenderType::Int, "int64"),
        "sint32" => (RenderType::Int, "sint32"),
        "sint64" => (RenderType::Int, "sint64"),
        "sfixed32" => (RenderType::Int, "sfixed32"),
        "sfixed64" => (RenderType::Int, "sfixed64"),
        "enum" => (RenderType::Int, "int32"),
        "uint32" => (RenderType::UInt, "uint32"),
        "uint64" => (RenderType::UInt, "uint64"),
        "fixed32" => (RenderType::UInt, "fixed32"),
        "fixed64" => (RenderType::UInt, "fixed64"),
        _ => {
            return Err(PathError::UnknownRenderType {
                name: name.to_string(),
            })
        }
    };
    Ok(TypeSpec {
        render,
        scalar: Some(scalar),
    })
}

/// A rendered field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value
{
    /// Signed integer.
    Int(i64),
    /// Unsigned integer. Varints always render as this, whatever their declared sign.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    String(String),
    /// Payload bytes.
    Bytes(Bytes),
    /// Embedded message.
    Message(Arc<Message>),
    /// Packed repeated scalars.
    Packed(PackedArray),
    /// The field itself.
    Raw(RawField),
}

/// Packed scalar arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum PackedArray
{
    /// Varints.
    Varint(Vec<u64>),
    /// 32-bit words.
    Int32(Vec<i32>),
    /// 64-bit words.
    Int64(Vec<i64>),
}

/// The wire-level parts of a field, detached from any caches.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField
{
    /// Field number.
    pub number: u32,
    /// Wire type.
    pub wire_type: WireType,
    /// Path of the field.
    pub path: Path,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Field
{
    /// The render type used when the caller doesn't pick one.
    ///
    /// Length-delimited payloads are guessed: a payload that decodes fully as a message is `sub`,
    /// UTF-8 text without control characters is `string`, anything else is `bytes`. Groups are
    /// `sub` unless their body is malformed. Other wire types use the first entry of
    /// [`RenderType::legal_for`].
    pub fn default_render_type(&self) -> RenderType
    {
        match self.try_parse_as_message() {
            Some(_) => RenderType::Sub,
            None => self.fallback_render_type(),
        }
    }

    /// The default render type, without trying the payload as a message.
    pub fn fallback_render_type(&self) -> RenderType
    {
        match self.wire_type() {
            WireType::LengthDelimited if looks_like_text(self.payload()) => RenderType::String,
            WireType::LengthDelimited | WireType::StartGroup => RenderType::Bytes,
            wt => RenderType::legal_for(wt)
                .first()
                .copied()
                .unwrap_or(RenderType::Raw),
        }
    }

    /// The render type for this field given an optional type map.
    pub fn effective_render_type(&self, types: Option<&FieldMap>) -> RenderType
    {
        types
            .and_then(|map| map.render_type(self.path()))
            .unwrap_or_else(|| self.default_render_type())
    }

    /// Renders the field with `render_type`.
    ///
    /// Each interpretation is computed once and then served from the field's cache.
    pub fn render(&self, render_type: RenderType) -> Result<Value, DecodeError>
    {
        if !render_type.is_legal_for(self.wire_type()) {
            return Err(DecodeError::InvalidRenderType {
                render_type,
                wire_type: self.wire_type(),
            });
        }

        self.cache.values[render_type.index()]
            .get_or_init(|| self.coerce(render_type))
            .clone()
    }

    /// Renders the field with its default render type.
    pub fn render_default(&self) -> Result<Value, DecodeError>
    {
        self.render(self.default_render_type())
    }

    /// The wire-level parts of the field.
    pub fn raw(&self) -> RawField
    {
        RawField {
            number: self.number(),
            wire_type: self.wire_type(),
            path: self.path().clone(),
            payload: self.payload().clone(),
        }
    }

    fn coerce(&self, render_type: RenderType) -> Result<Value, DecodeError>
    {
        let payload = self.payload();
        Ok(match (render_type, self.wire_type()) {
            (RenderType::Raw, _) => Value::Raw(self.raw()),
            (RenderType::Bytes, _) => Value::Bytes(payload.clone()),
            (RenderType::Sub, _) => Value::Message(self.sub_message()?.clone()),
            (RenderType::String, _) => Value::String(utf8(payload)?.to_string()),

            (RenderType::Int, WireType::Varint) | (RenderType::UInt, WireType::Varint) => {
                Value::UInt(self.varint().unwrap_or_default())
            }
            (RenderType::Bool, _) => Value::Bool(self.varint().unwrap_or_default() != 0),

            (RenderType::UInt, WireType::Fixed64) => Value::UInt(u64::from_le_bytes(word(payload)?)),
            (RenderType::Int, WireType::Fixed64) => Value::Int(i64::from_le_bytes(word(payload)?)),
            (RenderType::Float, WireType::Fixed64) => {
                Value::Float(f64::from_le_bytes(word(payload)?))
            }
            (RenderType::UInt, _) => Value::UInt(u64::from(u32::from_le_bytes(word(payload)?))),
            (RenderType::Int, _) => Value::Int(i64::from(i32::from_le_bytes(word(payload)?))),
            (RenderType::Float, _) => Value::Float(f64::from(f32::from_le_bytes(word(payload)?))),

            (RenderType::PackedVarint, _) => Value::Packed(PackedArray::Varint(packed_varints(payload)?)),
            (RenderType::PackedInt32, _) => Value::Packed(PackedArray::Int32(
                packed_words(payload)?.into_iter().map(i32::from_le_bytes).collect(),
            )),
            (RenderType::PackedInt64, _) => Value::Packed(PackedArray::Int64(
                packed_words(payload)?.into_iter().map(i64::from_le_bytes).collect(),
            )),
        })
    }
}

/// True, if the bytes are UTF-8 without control characters.
pub fn looks_like_text(data: &[u8]) -> bool
{
    data.iter().all(|b| *b >= 0x20) && std::str::from_utf8(data).is_ok()
}

fn utf8(data: &[u8]) -> Result<&str, DecodeError>
{
    std::str::from_utf8(data).map_err(|e| DecodeError::Utf8DecodeFailure {
        valid_up_to: e.valid_up_to(),
    })
}

fn word<const N: usize>(data: &[u8]) -> Result<[u8; N], DecodeError>
{
    data.get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::BufferOverflow {
            offset: 0,
            needed: N.saturating_sub(data.len()),
        })
}

fn packed_varints(mut data: &[u8]) -> Result<Vec<u64>, DecodeError>
{
    let total = data.len();
    let mut output = vec![];
    while !data.is_empty() {
        let (value, len) = decode_varint(data).map_err(|e| match e {
            DecodeError::BufferOverflow { needed, .. } => DecodeError::BufferOverflow {
                offset: total - data.len(),
                needed,
            },
            DecodeError::VarintTooLong { .. } => DecodeError::VarintTooLong {
                offset: total - data.len(),
            },
            other => other,
        })?;
        output.push(value);
        data = &data[len..];
    }
    Ok(output)
}

fn packed_words<const N: usize>(data: &[u8]) -> Result<Vec<[u8; N]>, DecodeError>
{
    let tail = data.len() % N;
    if tail != 0 {
        return Err(DecodeError::BufferOverflow {
            offset: data.len() - tail,
            needed: N - tail,
        });
    }

    data.chunks_exact(N).map(word::<N>).collect()
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write_hex(f, b),
            Value::Message(m) => write!(f, "<message {} fields>", m.len()),
            Value::Packed(PackedArray::Varint(v)) => write_list(f, v),
            Value::Packed(PackedArray::Int32(v)) => write_list(f, v),
            Value::Packed(PackedArray::Int64(v)) => write_list(f, v),
            Value::Raw(raw) => {
                write!(f, "{} ({}): ", raw.path, raw.wire_type)?;
                write_hex(f, &raw.payload)
            }
        }
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result
{
    for (idx, b) in data.iter().enumerate() {
        if idx > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result
{
    for (idx, v) in values.iter().enumerate() {
        if idx > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", v)?;
    }
    Ok(())
}

impl From<&Value> for serde_json::Value
{
    fn from(value: &Value) -> Self
    {
        use serde_json::Value as Json;

        match value {
            Value::Int(v) => Json::from(*v),
            Value::UInt(v) => Json::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(v) => Json::Bool(*v),
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => bytes_to_json(b),
            Value::Message(m) => m.to_object(&FieldMap::default()).unwrap_or(Json::Null),
            Value::Packed(PackedArray::Varint(v)) => Json::from(v.clone()),
            Value::Packed(PackedArray::Int32(v)) => Json::from(v.clone()),
            Value::Packed(PackedArray::Int64(v)) => Json::from(v.clone()),
            Value::Raw(raw) => serde_json::json!({
                "number": raw.number,
                "wireType": raw.wire_type.bits(),
                "path": raw.path.to_string(),
                "bytes": bytes_to_json(&raw.payload),
            }),
        }
    }
}

fn bytes_to_json(data: &[u8]) -> serde_json::Value
{
    serde_json::Value::Array(data.iter().map(|b| serde_json::Value::from(*b)).collect())
}
