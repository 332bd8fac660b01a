//! Dotted path queries.
//!
//! A query is `<path>[:<renderType>]`, for example `1.2.4:string`. The path is relative to the
//! message the query runs on and a leading `0` is dropped. Every field found at the path is
//! rendered, in buffer order.
//!
//! ```
//! use rawproto::{Message, Value};
//!
//! let message = Message::new(vec![0x1a, 0x03, 0x08, 0x96, 0x01]);
//! assert_eq!(message.query("3.1:int").unwrap(), vec![Value::UInt(150)]);
//! ```

use snafu::ResultExt;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::decode::{Field, Message};
use crate::error::{DecodeError, InvalidQuery, PathError, QueryError, Render};
use crate::path::Path;
use crate::project::FieldMap;
use crate::render::{RenderType, Value};
use crate::wire::WireType;

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query
{
    path: Path,
    render_type: Option<RenderType>,
}

impl Query
{
    /// Creates a query for `path`.
    pub fn new(path: Path, render_type: Option<RenderType>) -> Self
    {
        Query { path, render_type }
    }

    /// Path of the queried fields.
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Requested render type. `None` uses the type map or the field's default.
    pub fn render_type(&self) -> Option<RenderType>
    {
        self.render_type
    }

    /// The same query below `prefix`.
    pub fn with_prefix(self, prefix: &Path) -> Self
    {
        Query {
            path: prefix.join(&self.path),
            render_type: self.render_type,
        }
    }
}

impl FromStr for Query
{
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let (path, render_type) = match s.split_once(':') {
            Some((path, render_type)) => (path, Some(render_type.parse()?)),
            None => (s, None),
        };

        Ok(Query {
            path: path.parse()?,
            render_type,
        })
    }
}

impl fmt::Display for Query
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.render_type {
            Some(rt) => write!(f, "{}:{}", self.path, rt),
            None => write!(f, "{}", self.path),
        }
    }
}

impl Message
{
    /// All fields at `path` below this message.
    ///
    /// Intermediate fields are only descended into when they decode as messages. Missing fields
    /// give an empty result.
    pub fn select(&self, path: &Path) -> Vec<&Field>
    {
        let (last, parents) = match path.numbers().split_last() {
            Some(split) => split,
            None => return vec![],
        };

        let mut messages: Vec<&Message> = vec![self];
        for number in parents {
            messages = messages
                .into_iter()
                .flat_map(|m| m.get(*number))
                .filter_map(|f| f.try_parse_as_message().map(|m| &**m))
                .collect();
        }

        messages.into_iter().flat_map(|m| m.get(*last)).collect()
    }

    /// Runs a textual query.
    pub fn query(&self, query: &str) -> Result<Vec<Value>, QueryError>
    {
        let parsed: Query = query.parse().context(InvalidQuery { query })?;
        self.resolve(&parsed, None).context(Render { query })
    }

    /// Runs several queries and concatenates their results in order.
    pub fn query_all<I>(&self, queries: I) -> Result<Vec<Value>, QueryError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut output = vec![];
        for q in queries {
            output.extend(self.query(q.as_ref())?);
        }
        Ok(output)
    }

    /// Resolves a parsed query.
    ///
    /// Fields without an explicit render type in the query use `types`, then their default. The
    /// root path addresses this message itself.
    pub fn resolve(&self, query: &Query, types: Option<&FieldMap>) -> Result<Vec<Value>, DecodeError>
    {
        if query.path.is_root() {
            return self
                .render_self(query.render_type.unwrap_or(RenderType::Sub))
                .map(|v| vec![v]);
        }

        self.select(&query.path)
            .into_iter()
            .map(|field| {
                let render_type = query
                    .render_type
                    .unwrap_or_else(|| field.effective_render_type(types));
                field.render(render_type)
            })
            .collect()
    }

    fn render_self(&self, render_type: RenderType) -> Result<Value, DecodeError>
    {
        match render_type {
            RenderType::Sub => Ok(Value::Message(Arc::new(self.clone()))),
            RenderType::Bytes => Ok(Value::Bytes(self.bytes().clone())),
            RenderType::String => std::str::from_utf8(self.bytes())
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| DecodeError::Utf8DecodeFailure {
                    valid_up_to: e.valid_up_to(),
                }),
            other => Err(DecodeError::InvalidRenderType {
                render_type: other,
                wire_type: WireType::LengthDelimited,
            }),
        }
    }
}

#[cfg(test)]
mod test
{
    use super::*;
    use bytes::Bytes;

    fn repeated() -> Message
    {
        Message::new(vec![
            0x22, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x28, 0x01, 0x28, 0x02, 0x28, 0x03,
        ])
    }

    #[test]
    fn parse_query()
    {
        let q: Query = "0.1.2:string".parse().unwrap();
        assert_eq!(q.path(), &Path::from(vec![1, 2]));
        assert_eq!(q.render_type(), Some(RenderType::String));
        assert_eq!(q.to_string(), "1.2:string");

        let q: Query = "4".parse().unwrap();
        assert_eq!(q.render_type(), None);

        assert!("1:nope".parse::<Query>().is_err());
        assert!("a.b".parse::<Query>().is_err());
    }

    #[test]
    fn prefix()
    {
        let q: Query = "1:int".parse().unwrap();
        assert_eq!(
            q.with_prefix(&Path::from(vec![3])).path(),
            &Path::from(vec![3, 1])
        );
    }

    #[test]
    fn simple()
    {
        let message = Message::new(vec![0x08, 0x96, 0x01]);
        assert_eq!(message.query("1:int").unwrap(), vec![Value::UInt(150)]);
        assert_eq!(message.query("1").unwrap(), vec![Value::UInt(150)]);
    }

    #[test]
    fn repeats_and_multiple_queries()
    {
        let message = repeated();
        assert_eq!(
            message.query("5:int").unwrap(),
            vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]
        );
        assert_eq!(
            message.query_all(&["5:int", "4:string"]).unwrap(),
            vec![
                Value::UInt(1),
                Value::UInt(2),
                Value::UInt(3),
                Value::String("hello".to_string())
            ]
        );
    }

    #[test]
    fn missing_fields_are_empty()
    {
        let message = repeated();
        assert!(message.query("9:int").unwrap().is_empty());
        assert!(message.query("9.1.2").unwrap().is_empty());
        // "hello" is not a message, so nothing below it.
        assert!(message.query("4.1").unwrap().is_empty());
    }

    #[test]
    fn submessage_as_bytes()
    {
        let message = Message::new(vec![0x1a, 0x03, 0x08, 0x96, 0x01]);
        assert_eq!(
            message.query("3:bytes").unwrap(),
            vec![Value::Bytes(Bytes::from_static(&[0x08, 0x96, 0x01]))]
        );
    }

    #[test]
    fn root()
    {
        let message = Message::new(vec![0x08, 0x96, 0x01]);
        assert_eq!(
            message.query("0:bytes").unwrap(),
            vec![Value::Bytes(Bytes::from_static(&[0x08, 0x96, 0x01]))]
        );
        match &message.query("0").unwrap()[..] {
            [Value::Message(m)] => assert_eq!(m.get(1)[0].varint(), Some(150)),
            other => panic!("Unexpected: {:?}", other),
        }
        assert!(message.query("0:int").is_err());
    }

    #[test]
    fn illegal_type_is_an_error()
    {
        let message = Message::new(vec![0x08, 0x96, 0x01]);
        match message.query("1:string") {
            Err(QueryError::Render { query, source }) => {
                assert_eq!(query, "1:string");
                assert_eq!(
                    source,
                    DecodeError::InvalidRenderType {
                        render_type: RenderType::String,
                        wire_type: WireType::Varint
                    }
                );
            }
            other => panic!("Unexpected: {:?}", other),
        }
    }

    #[test]
    fn type_map_supplies_render_type()
    {
        let message = Message::new(vec![0x32, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05]);
        let types = FieldMap::parse(vec![("values", "6:packedVarint")]).unwrap();
        let q: Query = "6".parse().unwrap();
        assert_eq!(
            message.resolve(&q, Some(&types)).unwrap(),
            message.query("6:packedVarint").unwrap()
        );
    }

    #[test]
    fn relative_to_detached_message()
    {
        let message = Message::at(vec![0x08, 0x96, 0x01], Path::from(vec![3]));
        let fields = message.select(&Path::from(vec![1]));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].path(), &Path::from(vec![3, 1]));
    }
}
