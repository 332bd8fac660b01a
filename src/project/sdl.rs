//! Projection into a `.proto` schema.
//!
//! The shapes of all appearances of a sub-message are merged, so a repeated message field gets
//! one declaration that covers every field seen in any of its repeats.
//!
//! Groups can't be declared in proto3. A tree that holds any group is written as proto2 instead,
//! with explicit labels and `[packed = true]` on packed arrays.

use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;
use tracing::debug;

use super::{FieldMap, Visitor, WalkEntry};
use crate::decode::Message;
use crate::error::DecodeError;
use crate::render::RenderType;
use crate::wire::WireType;

impl Message
{
    /// A proto3 schema that describes the message.
    ///
    /// The root type is `MessageRoot`. Sub-messages are declared as `Message<N>`, after the
    /// number of the field that holds them, right below that field. Unnamed fields are called
    /// `f<N>`. Groups make the schema proto2 and are declared as `group Group<N>`, which names
    /// the field `group<N>` whatever the field map says.
    pub fn to_proto(&self, map: &FieldMap) -> Result<String, DecodeError>
    {
        self.to_proto_with(map, "f")
    }

    /// Like [`to_proto`](Message::to_proto), with `prefix` before the numbers of unnamed fields.
    pub fn to_proto_with(&self, map: &FieldMap, prefix: &str) -> Result<String, DecodeError>
    {
        let mut builder = ShapeBuilder {
            prefix,
            stack: vec![Frame::default()],
        };
        self.walk_with(map, &mut builder)?;
        let root = builder.stack.pop().map(|f| f.shape).unwrap_or_default();

        let proto2 = root.has_groups();
        let mut output = match proto2 {
            true => String::from("syntax = \"proto2\";\n\n"),
            false => String::from("syntax = \"proto3\";\n\n"),
        };
        write_message(&mut output, "MessageRoot", &root, 0, proto2);
        Ok(output)
    }
}

#[derive(Debug, Default)]
struct Shape
{
    fields: BTreeMap<u32, ShapeField>,
}

#[derive(Debug)]
struct ShapeField
{
    name: String,
    wire_type: WireType,
    repeated: bool,
    packed: bool,
    kind: Kind,
}

#[derive(Debug)]
enum Kind
{
    Scalar(&'static str),
    Message(Shape),
}

impl Shape
{
    fn insert(&mut self, number: u32, field: ShapeField)
    {
        match self.fields.entry(number) {
            MapEntry::Vacant(slot) => {
                slot.insert(field);
            }
            MapEntry::Occupied(slot) => {
                let existing = slot.into_mut();
                existing.repeated |= field.repeated;
                existing.packed |= field.packed;
                existing.kind.merge(field.kind, existing.wire_type, number);
            }
        }
    }

    fn merge(&mut self, other: Shape)
    {
        for (number, field) in other.fields {
            self.insert(number, field);
        }
    }

    fn has_groups(&self) -> bool
    {
        self.fields.values().any(|f| match &f.kind {
            Kind::Message(nested) => f.wire_type == WireType::StartGroup || nested.has_groups(),
            Kind::Scalar(_) => false,
        })
    }
}

impl Kind
{
    fn merge(&mut self, other: Kind, wire_type: WireType, number: u32)
    {
        match (self, other) {
            (Kind::Message(ours), Kind::Message(theirs)) => ours.merge(theirs),
            (Kind::Scalar(ours), Kind::Scalar(theirs)) if *ours == theirs => {}
            (ours, _) => {
                if wire_type == WireType::LengthDelimited {
                    debug!(number, "Conflicting shapes, declaring as bytes");
                    *ours = Kind::Scalar("bytes");
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Frame
{
    shape: Shape,
    counts: BTreeMap<u32, usize>,
}

struct ShapeBuilder<'p>
{
    prefix: &'p str,
    stack: Vec<Frame>,
}

impl ShapeBuilder<'_>
{
    fn record(&mut self, entry: &WalkEntry<'_>, kind: Kind, packed: bool)
    {
        let name = identifier(&entry.key(self.prefix));
        let frame = match self.stack.last_mut() {
            Some(frame) => frame,
            None => return,
        };

        let number = entry.field.number();
        let count = frame.counts.entry(number).or_insert(0);
        *count += 1;

        frame.shape.insert(
            number,
            ShapeField {
                name,
                wire_type: entry.field.wire_type(),
                repeated: packed || *count > 1,
                packed,
                kind,
            },
        );
    }
}

impl<'a> Visitor<'a> for ShapeBuilder<'_>
{
    fn field(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>
    {
        let (label, packed) = label(&entry);
        self.record(&entry, Kind::Scalar(label), packed);
        Ok(())
    }

    fn enter(&mut self, _entry: WalkEntry<'a>, _message: &'a Message) -> Result<(), DecodeError>
    {
        self.stack.push(Frame::default());
        Ok(())
    }

    fn leave(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>
    {
        let shape = self.stack.pop().map(|f| f.shape).unwrap_or_default();
        self.record(&entry, Kind::Message(shape), false);
        Ok(())
    }
}

/// Type label of a field that is not a sub-message, and whether it is a packed array.
///
/// Labels keep the wire type, so the message parses against the schema.
fn label(entry: &WalkEntry<'_>) -> (&'static str, bool)
{
    let wire_type = entry.field.wire_type();
    if let Some(scalar) = entry.scalar {
        if scalar_wire_type(scalar) == Some(wire_type) {
            return (scalar, false);
        }
    }

    match (wire_type, entry.render_type) {
        (WireType::Varint, RenderType::Int) => ("int32", false),
        (WireType::Varint, RenderType::UInt) => ("uint32", false),
        (WireType::Varint, RenderType::Bool) => ("bool", false),
        (WireType::Varint, _) => ("uint64", false),

        (WireType::Fixed64, RenderType::Int) => ("sfixed64", false),
        (WireType::Fixed64, RenderType::Float) => ("double", false),
        (WireType::Fixed64, _) => ("fixed64", false),

        (WireType::Fixed32, RenderType::Int) => ("sfixed32", false),
        (WireType::Fixed32, RenderType::Float) => ("float", false),
        (WireType::Fixed32, _) => ("fixed32", false),

        (_, RenderType::String) => ("string", false),
        (_, RenderType::PackedVarint) => ("uint64", true),
        (_, RenderType::PackedInt32) => ("sfixed32", true),
        (_, RenderType::PackedInt64) => ("sfixed64", true),
        _ => ("bytes", false),
    }
}

fn scalar_wire_type(scalar: &str) -> Option<WireType>
{
    match scalar {
        "int32" | "int64" | "uint32" | "uint64" | "sint32" | "sint64" | "bool" => {
            Some(WireType::Varint)
        }
        "double" | "fixed64" | "sfixed64" => Some(WireType::Fixed64),
        "float" | "fixed32" | "sfixed32" => Some(WireType::Fixed32),
        _ => None,
    }
}

/// Turns an output key into a proto identifier.
fn identifier(key: &str) -> String
{
    let last = key.rsplit('.').next().unwrap_or(key);
    let mut name: String = last
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'f');
    }
    name
}

fn write_message(output: &mut String, name: &str, shape: &Shape, depth: usize, proto2: bool)
{
    let indent = "  ".repeat(depth);
    output.push_str(&format!("{}message {} {{\n", indent, name));
    write_fields(output, shape, depth + 1, proto2);
    output.push_str(&format!("{}}}\n", indent));
}

fn write_fields(output: &mut String, shape: &Shape, depth: usize, proto2: bool)
{
    let indent = "  ".repeat(depth);
    for (number, field) in &shape.fields {
        let label = match (field.repeated, proto2) {
            (true, _) => "repeated ",
            (false, true) => "optional ",
            (false, false) => "",
        };
        match &field.kind {
            Kind::Scalar(scalar) => {
                let options = match proto2 && field.packed {
                    true => " [packed = true]",
                    false => "",
                };
                output.push_str(&format!(
                    "{}{}{} {} = {}{};\n",
                    indent, label, scalar, field.name, number, options
                ));
            }
            Kind::Message(nested) if field.wire_type == WireType::StartGroup => {
                output.push_str(&format!(
                    "{}{}group Group{} = {} {{\n",
                    indent, label, number, number
                ));
                write_fields(output, nested, depth + 1, proto2);
                output.push_str(&format!("{}}}\n", indent));
            }
            Kind::Message(nested) => {
                let type_name = format!("Message{}", number);
                output.push_str(&format!(
                    "{}{}{} {} = {};\n",
                    indent, label, type_name, field.name, number
                ));
                write_message(output, &type_name, nested, depth, proto2);
            }
        }
    }
}
