//! Error types for decoding, rendering and querying.

use snafu::Snafu;

use crate::render::RenderType;
use crate::wire::WireType;

/// Error raised while reading the wire format or coercing a field value.
///
/// Failures hit during speculative sub-message decoding never escape the decoder. They only
/// surface when the caller explicitly asks for an interpretation the bytes cannot support.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DecodeError
{
    /// The cursor ran past the end of the buffer.
    #[snafu(display("Buffer overflow at offset {}: {} more bytes needed", offset, needed))]
    BufferOverflow
    {
        /// Offset where the read started.
        offset: usize,
        /// Number of bytes missing.
        needed: usize,
    },

    /// A varint kept its continuation bit set past the tenth byte.
    #[snafu(display("Varint at offset {} is longer than 10 bytes", offset))]
    VarintTooLong
    {
        /// Offset of the first varint byte.
        offset: usize,
    },

    /// The low three bits of a tag were 6 or 7.
    #[snafu(display("Invalid wire type {} at offset {}", wire_type, offset))]
    InvalidWireType
    {
        /// Wire type bits.
        wire_type: u8,
        /// Offset of the tag.
        offset: usize,
    },

    /// The field number of a tag was zero or above the protobuf maximum.
    #[snafu(display("Invalid field number {} at offset {}", number, offset))]
    InvalidFieldNumber
    {
        /// Decoded field number.
        number: u64,
        /// Offset of the tag.
        offset: usize,
    },

    /// A group was terminated by the end tag of a different field.
    #[snafu(display(
        "Group {} terminated by end tag of field {} at offset {}",
        expected,
        found,
        offset
    ))]
    GroupMismatch
    {
        /// Field number of the group start tag.
        expected: u32,
        /// Field number of the end tag.
        found: u32,
        /// Offset of the end tag.
        offset: usize,
    },

    /// An end group tag appeared outside a group.
    #[snafu(display("Unexpected end of group {} at offset {}", number, offset))]
    UnexpectedGroupEnd
    {
        /// Field number of the end tag.
        number: u32,
        /// Offset of the end tag.
        offset: usize,
    },

    /// The requested render type is not legal for the field's wire type.
    #[snafu(display("Render type '{}' is not valid for {} fields", render_type, wire_type))]
    InvalidRenderType
    {
        /// Requested render type.
        render_type: RenderType,
        /// Wire type of the field.
        wire_type: WireType,
    },

    /// A string was requested for bytes that are not UTF-8.
    #[snafu(display("Payload is not valid UTF-8 after {} bytes", valid_up_to))]
    Utf8DecodeFailure
    {
        /// Length of the valid UTF-8 prefix.
        valid_up_to: usize,
    },
}

/// Error parsing a textual path or render type.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum PathError
{
    /// A path segment was not an unsigned field number.
    #[snafu(display("Invalid path segment '{}'", segment))]
    InvalidSegment
    {
        /// The offending segment.
        segment: String,
    },

    /// The render type name is not known.
    #[snafu(display("Unknown render type '{}'", name))]
    UnknownRenderType
    {
        /// The offending name.
        name: String,
    },
}

/// Error running a query.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum QueryError
{
    /// The query string could not be parsed.
    #[snafu(display("Invalid query '{}': {}", query, source))]
    InvalidQuery
    {
        /// Query text.
        query: String,
        /// Source error.
        source: PathError,
    },

    /// A matched field could not be rendered with the requested type.
    #[snafu(display("Query '{}' failed: {}", query, source))]
    Render
    {
        /// Query text.
        query: String,
        /// Source error.
        source: DecodeError,
    },
}

/// Error loading a name/type map.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum FieldMapError
{
    /// The input was not a flat JSON object of strings.
    #[snafu(display("Invalid field map JSON: {}", source))]
    Json
    {
        /// Source error.
        source: serde_json::Error,
    },

    /// An entry did not hold a valid `path[:type]` value.
    #[snafu(display("Invalid entry '{}': {}", name, source))]
    Entry
    {
        /// Entry name.
        name: String,
        /// Source error.
        source: PathError,
    },
}
