//! Projection into a nested JSON object.

use serde_json::{Map, Value as Json};

use super::{FieldMap, Visitor, WalkEntry};
use crate::decode::Message;
use crate::error::DecodeError;

impl Message
{
    /// The message as a JSON object.
    ///
    /// Every key holds an array of the field's values in buffer order; sub-messages become
    /// nested objects. Unnamed fields are keyed by their field number.
    ///
    /// ```
    /// use rawproto::{FieldMap, Message};
    ///
    /// let message = Message::new(vec![0x1a, 0x03, 0x08, 0x96, 0x01]);
    /// let object = message.to_object(&FieldMap::new()).unwrap();
    /// assert_eq!(object, serde_json::json!({ "3": [{ "1": [150] }] }));
    /// ```
    pub fn to_object(&self, map: &FieldMap) -> Result<Json, DecodeError>
    {
        self.to_object_with(map, "")
    }

    /// Like [`to_object`](Message::to_object), with `prefix` before the numbers of unnamed
    /// fields.
    pub fn to_object_with(&self, map: &FieldMap, prefix: &str) -> Result<Json, DecodeError>
    {
        let mut builder = ObjectBuilder {
            prefix,
            stack: vec![Map::new()],
        };
        self.walk_with(map, &mut builder)?;
        Ok(Json::Object(builder.stack.pop().unwrap_or_default()))
    }
}

struct ObjectBuilder<'p>
{
    prefix: &'p str,
    stack: Vec<Map<String, Json>>,
}

impl ObjectBuilder<'_>
{
    fn push(&mut self, entry: &WalkEntry<'_>, value: Json)
    {
        let key = entry.key(self.prefix);
        if let Some(target) = self.stack.last_mut() {
            insert_dotted(target, &key, value);
        }
    }
}

impl<'a> Visitor<'a> for ObjectBuilder<'_>
{
    fn field(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>
    {
        let value = entry.field.render(entry.render_type)?;
        self.push(&entry, Json::from(&value));
        Ok(())
    }

    fn enter(&mut self, _entry: WalkEntry<'a>, _message: &'a Message) -> Result<(), DecodeError>
    {
        self.stack.push(Map::new());
        Ok(())
    }

    fn leave(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>
    {
        let object = self.stack.pop().unwrap_or_default();
        self.push(&entry, Json::Object(object));
        Ok(())
    }
}

/// Appends `value` under a dotted key, creating the intermediate objects.
///
/// If an intermediate key already holds something other than an object, the dotted key is used
/// as it is.
fn insert_dotted(map: &mut Map<String, Json>, key: &str, value: Json)
{
    let segments: Vec<&str> = key.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) if !split.1.is_empty() && navigable(map, split.1) => split,
        _ => return append(map, key, value),
    };

    let mut target = map;
    for segment in parents {
        target = match target
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()))
        {
            Json::Object(inner) => inner,
            _ => return,
        };
    }
    append(target, last, value);
}

fn navigable(map: &Map<String, Json>, segments: &[&str]) -> bool
{
    let mut current = map;
    for segment in segments {
        match current.get(*segment) {
            None => return true,
            Some(Json::Object(inner)) => current = inner,
            Some(_) => return false,
        }
    }
    true
}

fn append(map: &mut Map<String, Json>, key: &str, value: Json)
{
    match map
        .entry(key.to_string())
        .or_insert_with(|| Json::Array(vec![]))
    {
        Json::Array(items) => items.push(value),
        other => {
            let previous = std::mem::take(other);
            *other = Json::Array(vec![previous, value]);
        }
    }
}
