use std::borrow::Cow;
use std::collections::BTreeMap;

use super::*;
use crate::wire::MAX_FIELD_NUMBER;

#[derive(Default)]
pub(crate) struct SchemaBuilder
{
    pub(crate) packages: Vec<PackageBuilder>,
}

#[derive(Default, Debug, PartialEq)]
pub(crate) struct PackageBuilder
{
    pub(crate) name: Option<String>,
    pub(crate) syntax: Syntax,
    pub(crate) types: Vec<TypeBuilder>,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum TypeBuilder
{
    Message(MessageBuilder),
    Enum(EnumBuilder),
}

#[derive(Default, Debug, PartialEq, Clone)]
pub(crate) struct MessageBuilder
{
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldBuilder>,
    pub(crate) oneofs: Vec<OneofBuilder>,
    pub(crate) inner_types: Vec<TypeBuilder>,
    pub(crate) options: Vec<ProtoOption>,
}

#[derive(Default, Debug, PartialEq, Clone)]
pub(crate) struct EnumBuilder
{
    pub(crate) name: String,
    pub(crate) fields: Vec<EnumField>,
    pub(crate) options: Vec<ProtoOption>,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) struct FieldBuilder
{
    pub(crate) multiplicity: Multiplicity,
    pub(crate) field_type: FieldTypeBuilder,
    pub(crate) name: String,
    pub(crate) number: u64,
    pub(crate) options: Vec<ProtoOption>,
}

#[derive(Default, Debug, PartialEq, Clone)]
pub(crate) struct OneofBuilder
{
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldBuilder>,
    pub(crate) options: Vec<ProtoOption>,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum FieldTypeBuilder
{
    Builtin(ValueType),
    Unknown(String),
    Group(String),
}

impl SchemaBuilder
{
    pub fn build(self) -> Result<Schema, ParseError>
    {
        let mut cache = BuildCache::default();
        for p in &self.packages {
            p.populate(&mut cache)?;
        }

        // The cache fixed the final index of every type. Fill the slots in whatever order the
        // builders are consumed.
        let mut slots: Vec<Option<TypeInfo>> = cache.types.iter().map(|_| None).collect();
        let packages = self
            .packages
            .into_iter()
            .enumerate()
            .map(|(idx, p)| p.build(PackageRef(InternalRef(idx)), &cache, &mut slots))
            .collect::<Result<Vec<_>, _>>()?;

        let types: Vec<TypeInfo> = slots.into_iter().flatten().collect();
        let types_by_name = types
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.full_name().to_string(), idx))
            .collect();

        Ok(Schema {
            packages,
            types,
            types_by_name,
        })
    }
}

impl PackageBuilder
{
    fn populate(&self, cache: &mut BuildCache) -> Result<(), ParseError>
    {
        let mut path = match &self.name {
            Some(name) => name.split('.').collect(),
            None => vec![],
        };

        for t in &self.types {
            t.populate(cache, &mut path)?;
        }

        Ok(())
    }

    fn build(
        self,
        self_ref: PackageRef,
        cache: &BuildCache,
        slots: &mut Vec<Option<TypeInfo>>,
    ) -> Result<Package, ParseError>
    {
        let PackageBuilder {
            name,
            syntax,
            types,
        } = self;

        let scope = name.clone().unwrap_or_default();
        let types = types
            .into_iter()
            .map(|t| t.build(&scope, TypeParent::Package(self_ref), syntax, cache, slots))
            .collect::<Result<_, _>>()?;

        Ok(Package {
            name,
            syntax,
            self_ref,
            types,
        })
    }
}

impl TypeBuilder
{
    fn name(&self) -> &str
    {
        match self {
            TypeBuilder::Message(m) => &m.name,
            TypeBuilder::Enum(e) => &e.name,
        }
    }

    /// Lists types found in this builder recursively into the build cache.
    ///
    /// On error the `path` will be left in an undefined state.
    fn populate<'a>(&'a self, cache: &mut BuildCache, path: &mut Vec<&'a str>)
        -> Result<(), ParseError>
    {
        path.push(self.name());
        let full_name = path.join(".");
        let item_type = match self {
            TypeBuilder::Message(..) => ItemType::Message,
            TypeBuilder::Enum(..) => ItemType::Enum,
        };

        let cache_idx = cache.types.len();
        if cache.items.insert(full_name.clone(), cache_idx).is_some() {
            return Err(ParseError::DuplicateType { name: full_name });
        }
        cache.types.push(CacheData {
            item_type,
            final_idx: cache_idx,
        });

        if let TypeBuilder::Message(m) = self {
            for inner in &m.inner_types {
                inner.populate(cache, path)?;
            }
        }

        path.pop();
        Ok(())
    }

    fn build(
        self,
        scope: &str,
        parent: TypeParent,
        syntax: Syntax,
        cache: &BuildCache,
        slots: &mut Vec<Option<TypeInfo>>,
    ) -> Result<TypeRef, ParseError>
    {
        let full_name = join_name(scope, self.name());
        let idx = cache
            .type_by_full_name(&full_name)
            .expect("Existing type wasn't added to the cache")
            .final_idx;

        Ok(match self {
            TypeBuilder::Message(m) => {
                let self_ref = MessageRef(InternalRef(idx));
                let info = m.build(full_name, parent, self_ref, syntax, cache, slots)?;
                slots[idx] = Some(TypeInfo::Message(info));
                TypeRef::Message(self_ref)
            }
            TypeBuilder::Enum(e) => {
                let self_ref = EnumRef(InternalRef(idx));
                slots[idx] = Some(TypeInfo::Enum(e.build(full_name, parent, self_ref)));
                TypeRef::Enum(self_ref)
            }
        })
    }
}

impl MessageBuilder
{
    fn build(
        self,
        full_name: String,
        parent: TypeParent,
        self_ref: MessageRef,
        syntax: Syntax,
        cache: &BuildCache,
        slots: &mut Vec<Option<TypeInfo>>,
    ) -> Result<MessageInfo, ParseError>
    {
        let inner_types = self
            .inner_types
            .into_iter()
            .map(|inner| inner.build(&full_name, TypeParent::Message(self_ref), syntax, cache, slots))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields: Vec<_> = self
            .fields
            .into_iter()
            .map(|field| field.build(&full_name, syntax, cache, None))
            .collect::<Result<_, _>>()?;

        // Oneof members are ordinary fields on the wire.
        let mut oneofs = vec![];
        for (idx, oneof) in self.oneofs.into_iter().enumerate() {
            let oneof_ref = OneofRef(InternalRef(idx));
            for field in oneof.fields {
                fields.push(field.build(&full_name, syntax, cache, Some(oneof_ref))?);
            }
            oneofs.push(Oneof {
                name: oneof.name,
                self_ref: oneof_ref,
                options: oneof.options,
                fields: vec![],
            });
        }

        let fields: BTreeMap<u32, MessageField> =
            fields.into_iter().map(|f| (f.number, f)).collect();
        for oneof in &mut oneofs {
            oneof.fields = fields
                .values()
                .filter(|f| f.oneof == Some(oneof.self_ref))
                .map(|f| f.number)
                .collect();
        }

        Ok(MessageInfo {
            name: self.name,
            full_name,
            parent,
            self_ref,
            oneofs,
            inner_types,
            options: self.options,
            fields,
        })
    }
}

impl EnumBuilder
{
    fn build(self, full_name: String, parent: TypeParent, self_ref: EnumRef) -> EnumInfo
    {
        EnumInfo {
            name: self.name,
            full_name,
            parent,
            self_ref,
            options: self.options,
            fields: self.fields,
        }
    }
}

impl FieldBuilder
{
    fn build(
        self,
        scope: &str,
        syntax: Syntax,
        cache: &BuildCache,
        oneof: Option<OneofRef>,
    ) -> Result<MessageField, ParseError>
    {
        if self.number == 0 || self.number > MAX_FIELD_NUMBER {
            return Err(ParseError::InvalidFieldNumber {
                number: self.number,
                field: join_name(scope, &self.name),
            });
        }

        let field_type = self.field_type.build(scope, cache)?;
        let multiplicity =
            resolve_multiplicity(self.multiplicity, &field_type, &self.options, syntax);
        Ok(MessageField {
            name: self.name,
            number: self.number as u32,
            field_type,
            multiplicity,
            options: self.options,
            oneof,
        })
    }
}

fn resolve_multiplicity(
    declared: Multiplicity,
    field_type: &ValueType,
    options: &[ProtoOption],
    syntax: Syntax,
) -> Multiplicity
{
    // Only repeated scalar fields are candidates for packing.
    if declared != Multiplicity::Repeated || !field_type.is_packable() {
        return declared;
    }

    // Check the options.
    if let Some(opt) = options.iter().find(|o| o.name == "packed") {
        return match opt.value {
            Constant::Bool(true) => Multiplicity::RepeatedPacked,
            _ => Multiplicity::Repeated,
        };
    }

    match syntax {
        Syntax::Proto3 => Multiplicity::RepeatedPacked,
        Syntax::Proto2 => Multiplicity::Repeated,
    }
}

impl FieldTypeBuilder
{
    fn build(self, scope: &str, cache: &BuildCache) -> Result<ValueType, ParseError>
    {
        let (name, group) = match self {
            FieldTypeBuilder::Builtin(vt) => return Ok(vt),
            FieldTypeBuilder::Unknown(s) => (s, false),
            FieldTypeBuilder::Group(s) => (s, true),
        };

        let t = cache
            .resolve_type(&name, scope)
            .ok_or_else(|| ParseError::TypeNotFound {
                name,
                context: scope.to_string(),
            })?;

        Ok(match (t.item_type, group) {
            (ItemType::Message, false) => ValueType::Message(MessageRef(InternalRef(t.final_idx))),
            (ItemType::Message, true) => ValueType::Group(MessageRef(InternalRef(t.final_idx))),
            (ItemType::Enum, _) => ValueType::Enum(EnumRef(InternalRef(t.final_idx))),
        })
    }
}

fn join_name(scope: &str, name: &str) -> String
{
    match scope.is_empty() {
        true => name.to_string(),
        false => format!("{}.{}", scope, name),
    }
}

#[derive(Default)]
struct BuildCache
{
    items: BTreeMap<String, usize>,
    types: Vec<CacheData>,
}

struct CacheData
{
    item_type: ItemType,
    final_idx: usize,
}

impl BuildCache
{
    fn resolve_type(&self, relative_name: &str, mut current_path: &str) -> Option<&CacheData>
    {
        if let Some(absolute) = relative_name.strip_prefix('.') {
            return self.type_by_full_name(absolute);
        }

        loop {
            let lookup: Cow<str> = match current_path.is_empty() {
                true => relative_name.into(),
                false => format!("{}.{}", current_path, relative_name).into(),
            };

            if let Some(t) = self.type_by_full_name(&lookup) {
                return Some(t);
            }

            if current_path.is_empty() {
                return None;
            }

            match current_path.rfind('.') {
                Some(i) => {
                    let (start, _) = current_path.split_at(i);
                    current_path = start;
                }
                None => {
                    current_path = "";
                }
            }
        }
    }

    fn type_by_full_name(&self, full_name: &str) -> Option<&CacheData>
    {
        self.items
            .get(full_name)
            .and_then(|idx| self.types.get(*idx))
    }
}
