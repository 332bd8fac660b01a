//! Whole-tree projections.
//!
//! Both projections are built on [`Message::walk_with`], which visits every field in field-number
//! order and descends into sub-messages. A [`FieldMap`] supplies names and render types for
//! individual paths.

use snafu::ResultExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::decode::{Field, Message, MAX_NESTING};
use crate::error::{DecodeError, Entry, FieldMapError, Json};
use crate::path::Path;
use crate::render::{RenderType, TypeSpec};

mod object;
mod sdl;

/// Path-keyed names and render types supplied by the caller.
///
/// The textual form is a flat object from a name to `"<path>[:<renderType>]"`:
///
/// ```
/// use rawproto::{FieldMap, Path, RenderType};
///
/// let map = FieldMap::from_json(r#"{ "title": "1.2:string", "id": "1.1" }"#).unwrap();
/// let title = "1.2".parse::<Path>().unwrap();
/// assert_eq!(map.name(&title), Some("title"));
/// assert_eq!(map.render_type(&title), Some(RenderType::String));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap
{
    names: HashMap<Path, String>,
    types: HashMap<Path, TypeSpec>,
    no_sub_parse: HashSet<Path>,
}

impl FieldMap
{
    /// An empty map.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Builds a map from `(name, "path[:type]")` entries.
    ///
    /// Entries with an empty name only set the type.
    pub fn parse<I, K, V>(entries: I) -> Result<Self, FieldMapError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = FieldMap::new();
        for (name, value) in entries {
            let name = name.as_ref();
            let (path, render_type) = match value.as_ref().split_once(':') {
                Some((path, render_type)) => (path, Some(render_type)),
                None => (value.as_ref(), None),
            };

            let path: Path = path.parse().context(Entry { name })?;
            if let Some(render_type) = render_type {
                let spec: TypeSpec = render_type.parse().context(Entry { name })?;
                map.insert_type(path.clone(), spec);
            }
            if !name.is_empty() {
                map.insert_name(path, name);
            }
        }
        Ok(map)
    }

    /// Builds a map from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, FieldMapError>
    {
        let entries: BTreeMap<String, String> = serde_json::from_str(json).context(Json {})?;
        Self::parse(entries)
    }

    /// Names the field at `path`.
    pub fn insert_name(&mut self, path: Path, name: impl Into<String>)
    {
        self.names.insert(path, name.into());
    }

    /// Sets the render type of the field at `path`.
    ///
    /// Forcing `string` or `bytes` also stops the walk from trying the field as a sub-message.
    pub fn insert_type(&mut self, path: Path, spec: impl Into<TypeSpec>)
    {
        let spec = spec.into();
        if matches!(spec.render, RenderType::String | RenderType::Bytes) {
            self.no_sub_parse.insert(path.clone());
        }
        self.types.insert(path, spec);
    }

    /// Stops the walk from trying the field at `path` as a sub-message.
    pub fn insert_no_sub_parse(&mut self, path: Path)
    {
        self.no_sub_parse.insert(path);
    }

    /// Name of the field at `path`.
    pub fn name(&self, path: &Path) -> Option<&str>
    {
        self.names.get(path).map(|s| s.as_str())
    }

    /// Type of the field at `path`, as written by the caller.
    pub fn type_spec(&self, path: &Path) -> Option<TypeSpec>
    {
        self.types.get(path).copied()
    }

    /// Render type of the field at `path`.
    pub fn render_type(&self, path: &Path) -> Option<RenderType>
    {
        self.types.get(path).map(|spec| spec.render)
    }

    /// True, if the field at `path` must not be tried as a sub-message.
    pub fn skips_sub_parse(&self, path: &Path) -> bool
    {
        self.no_sub_parse.contains(path)
    }

    /// Paths that are never tried as sub-messages.
    pub fn no_sub_parse_paths(&self) -> impl Iterator<Item = &Path>
    {
        self.no_sub_parse.iter()
    }

    /// True, if the map holds nothing.
    pub fn is_empty(&self) -> bool
    {
        self.names.is_empty() && self.types.is_empty() && self.no_sub_parse.is_empty()
    }
}

/// A field as seen by the walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkEntry<'a>
{
    /// The field.
    pub field: &'a Field,

    /// Name from the field map.
    pub name: Option<&'a str>,

    /// Effective render type.
    pub render_type: RenderType,

    /// Protobuf scalar type named in the field map.
    pub scalar: Option<&'static str>,

    /// True, if the render type came from the field map.
    pub explicit: bool,

    /// Nesting depth below the message the walk started from.
    pub depth: usize,
}

impl WalkEntry<'_>
{
    /// Output key of the field.
    ///
    /// Named fields use their dotted name without the segments that the nesting already
    /// provides. Unnamed fields use `prefix` followed by the field number.
    pub fn key(&self, prefix: &str) -> String
    {
        match self.name {
            Some(name) => {
                let segments: Vec<&str> = name.split('.').collect();
                if segments.len() > self.depth + 1 {
                    segments[self.depth..].join(".")
                } else {
                    segments.last().copied().unwrap_or(name).to_string()
                }
            }
            None => format!("{}{}", prefix, self.field.number()),
        }
    }
}

/// Callbacks of a tree walk.
///
/// Fields that are descended into are reported with `enter` and `leave`, every other field
/// with `field`.
pub trait Visitor<'a>
{
    /// A field that is not descended into.
    fn field(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>;

    /// Start of a sub-message.
    fn enter(&mut self, entry: WalkEntry<'a>, message: &'a Message) -> Result<(), DecodeError>
    {
        let _ = (entry, message);
        Ok(())
    }

    /// End of a sub-message.
    fn leave(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>
    {
        let _ = entry;
        Ok(())
    }
}

struct Collect<'a>(Vec<WalkEntry<'a>>);

impl<'a> Visitor<'a> for Collect<'a>
{
    fn field(&mut self, entry: WalkEntry<'a>) -> Result<(), DecodeError>
    {
        self.0.push(entry);
        Ok(())
    }

    fn enter(&mut self, entry: WalkEntry<'a>, _message: &'a Message) -> Result<(), DecodeError>
    {
        self.0.push(entry);
        Ok(())
    }
}

impl Message
{
    /// Every field of the tree in walk order.
    ///
    /// Sub-messages are listed before their own fields.
    pub fn walk<'a>(&'a self, map: &'a FieldMap) -> Result<Vec<WalkEntry<'a>>, DecodeError>
    {
        let mut collect = Collect(vec![]);
        self.walk_with(map, &mut collect)?;
        Ok(collect.0)
    }

    /// Walks the tree, reporting each field to `visitor`.
    ///
    /// Length-delimited fields and groups are descended into when the map types them as `sub`,
    /// or when they are untyped, decode as a message and sit less than [`MAX_NESTING`] levels
    /// below this message. Errors come only from the map: a render
    /// type the wire type can't have, or a forced `sub` on bytes that aren't a message.
    pub fn walk_with<'a, V>(&'a self, map: &'a FieldMap, visitor: &mut V) -> Result<(), DecodeError>
    where
        V: Visitor<'a>,
    {
        debug!(path = %self.path(), fields = self.len(), "Walking message");
        walk_message(self, map, 0, visitor)
    }
}

fn walk_message<'a, V>(
    message: &'a Message,
    map: &'a FieldMap,
    depth: usize,
    visitor: &mut V,
) -> Result<(), DecodeError>
where
    V: Visitor<'a>,
{
    for field in message.fields().values().flatten() {
        let (entry, child) = classify(field, map, depth)?;
        match child {
            Some(child) => {
                visitor.enter(entry, child)?;
                walk_message(child, map, depth + 1, visitor)?;
                visitor.leave(entry)?;
            }
            None => visitor.field(entry)?,
        }
    }
    Ok(())
}

fn classify<'a>(
    field: &'a Field,
    map: &'a FieldMap,
    depth: usize,
) -> Result<(WalkEntry<'a>, Option<&'a Message>), DecodeError>
{
    let spec = map.type_spec(field.path());
    let (render_type, child) = match spec.map(|s| s.render) {
        Some(rt) if !rt.is_legal_for(field.wire_type()) => {
            return Err(DecodeError::InvalidRenderType {
                render_type: rt,
                wire_type: field.wire_type(),
            })
        }
        Some(RenderType::Sub) => (RenderType::Sub, Some(&**field.sub_message()?)),
        Some(rt) => (rt, None),
        None if map.skips_sub_parse(field.path()) => (field.fallback_render_type(), None),
        None if depth >= MAX_NESTING => {
            debug!(path = %field.path(), "Nesting limit reached, not descending");
            (field.fallback_render_type(), None)
        }
        None => match field.try_parse_as_message() {
            Some(child) => (RenderType::Sub, Some(&**child)),
            None => (field.fallback_render_type(), None),
        },
    };

    let entry = WalkEntry {
        field,
        name: map.name(field.path()),
        render_type,
        scalar: spec.and_then(|s| s.scalar),
        explicit: spec.is_some(),
        depth,
    };
    Ok((entry, child))
}
