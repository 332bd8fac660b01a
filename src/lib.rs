//! Schema-less decoding of protocol buffer messages.
//!
//! Rawproto reads arbitrary protobuf payloads without a `.proto` definition. The wire format
//! alone doesn't tell a string from a nested message or a packed array, so every
//! length-delimited field is decoded speculatively and falls back to a plainer interpretation
//! when the guess doesn't hold. Callers can override the guesses per field path.
//!
//! The decoded tree can be queried by field number paths, projected into a JSON object or a
//! synthesized `.proto` definition, and ranked against known message types.
//!
//! ```
//! use rawproto::{FieldMap, Message, Value};
//!
//! // 1: 150, 2: "testing", 3: { 1: 150 }
//! let message = Message::new(vec![
//!     0x08, 0x96, 0x01,
//!     0x12, 0x07, b't', b'e', b's', b't', b'i', b'n', b'g',
//!     0x1a, 0x03, 0x08, 0x96, 0x01,
//! ]);
//!
//! assert_eq!(message.query("2").unwrap(), vec![Value::String("testing".into())]);
//! assert_eq!(message.query("3.1:uint").unwrap(), vec![Value::UInt(150)]);
//!
//! let names = FieldMap::parse(vec![("id", "1"), ("title", "2")]).unwrap();
//! assert_eq!(
//!     message.to_object(&names).unwrap(),
//!     serde_json::json!({ "id": [150], "title": ["testing"], "3": [{ "1": [150] }] })
//! );
//! ```
#![warn(missing_docs)]
#![allow(clippy::match_bool)]

pub mod decode;
pub mod error;
pub mod matcher;
pub mod path;
pub mod project;
pub mod query;
pub mod render;
pub mod schema;
pub mod wire;

pub use decode::{Field, Message};
pub use error::{DecodeError, FieldMapError, PathError, QueryError};
pub use matcher::{CandidateField, MatchResult, Matcher, SchemaCandidate};
pub use path::Path;
pub use project::{FieldMap, Visitor, WalkEntry};
pub use query::Query;
pub use render::{PackedArray, RawField, RenderType, TypeSpec, Value};
pub use schema::{ParseError, Schema};
pub use wire::WireType;
