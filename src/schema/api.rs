use super::*;
use crate::wire::WireType;

impl Schema
{
    /// Create a new, empty schema.
    pub fn new() -> Self
    {
        Schema {
            packages: Default::default(),
            types: Default::default(),
            types_by_name: Default::default(),
        }
    }

    /// Packages in the order of the files they came from.
    pub fn packages(&self) -> &[Package]
    {
        &self.packages
    }

    /// Resolves a package reference.
    ///
    /// Will **panic** if the package defined by the `PackageRef` does not exist in this schema.
    /// Such panic means the `PackageRef` came from a different schema.
    pub fn resolve_package(&self, package_ref: PackageRef) -> &Package
    {
        &self.packages[package_ref.0 .0]
    }

    /// Gets type info by name.
    pub fn get_type(&self, full_name: &str) -> Option<&TypeInfo>
    {
        self.types_by_name
            .get(full_name)
            .map(|idx| &self.types[*idx])
    }

    /// Gets a message type info by name.
    pub fn get_message(&self, full_name: &str) -> Option<&MessageInfo>
    {
        match self.get_type(full_name) {
            Some(TypeInfo::Message(m)) => Some(m),
            _ => None,
        }
    }

    /// Gets an enum type info by name.
    pub fn get_enum(&self, full_name: &str) -> Option<&EnumInfo>
    {
        match self.get_type(full_name) {
            Some(TypeInfo::Enum(e)) => Some(e),
            _ => None,
        }
    }

    /// Iterates all message types, nested ones included.
    pub fn messages(&self) -> impl Iterator<Item = &MessageInfo>
    {
        self.types.iter().filter_map(|t| match t {
            TypeInfo::Message(m) => Some(m),
            TypeInfo::Enum(_) => None,
        })
    }

    fn resolve_type(&self, tr: InternalRef) -> Option<&TypeInfo>
    {
        self.types.get(tr.0)
    }

    /// Resolves a message reference.
    ///
    /// Will **panic** if the message defined by the `MessageRef` does not exist in this schema.
    /// Such panic means the `MessageRef` came from a different schema. The panic is not
    /// guaranteed, as a message with an equal `MessageRef` may exist in multiple schemas.
    pub fn resolve_message(&self, tr: MessageRef) -> &MessageInfo
    {
        match self.resolve_type(tr.0) {
            Some(TypeInfo::Message(msg)) => msg,
            _ => panic!("Message did not exist in this schema"),
        }
    }
}

impl TypeInfo
{
    /// Get the name of the type.
    pub fn name(&self) -> &str
    {
        match self {
            TypeInfo::Message(m) => &m.name,
            TypeInfo::Enum(e) => &e.name,
        }
    }

    /// Get the full name of the type.
    pub fn full_name(&self) -> &str
    {
        match self {
            TypeInfo::Message(m) => &m.full_name,
            TypeInfo::Enum(e) => &e.full_name,
        }
    }

    /// Get the parent information for the type.
    pub fn parent(&self) -> TypeParent
    {
        match self {
            TypeInfo::Message(m) => m.parent,
            TypeInfo::Enum(e) => e.parent,
        }
    }
}

impl MessageInfo
{
    /// Iterates all message fields.
    pub fn iter_fields(&self) -> impl Iterator<Item = &MessageField>
    {
        self.fields.values()
    }

    /// Get a field by its number.
    pub fn get_field(&self, number: u32) -> Option<&MessageField>
    {
        self.fields.get(&number)
    }

    /// True for the entry types synthesized for `map<K, V>` fields.
    pub fn is_map_entry(&self) -> bool
    {
        self.options
            .iter()
            .any(|o| o.name == "map_entry" && o.value == Constant::Bool(true))
    }
}

impl MessageField
{
    /// Wire type the field's values are encoded with.
    pub fn wire_type(&self) -> WireType
    {
        match self.multiplicity {
            Multiplicity::RepeatedPacked => WireType::LengthDelimited,
            _ => self.field_type.wire_type(),
        }
    }

    /// True, if the repeats are packed into one length-delimited value.
    pub fn is_packed(&self) -> bool
    {
        self.multiplicity == Multiplicity::RepeatedPacked
    }
}

impl ValueType
{
    /// Wire type of a single value.
    pub fn wire_type(&self) -> WireType
    {
        match self {
            Self::Double => WireType::Fixed64,
            Self::Float => WireType::Fixed32,
            Self::Int32 => WireType::Varint,
            Self::Int64 => WireType::Varint,
            Self::UInt32 => WireType::Varint,
            Self::UInt64 => WireType::Varint,
            Self::SInt32 => WireType::Varint,
            Self::SInt64 => WireType::Varint,
            Self::Fixed32 => WireType::Fixed32,
            Self::Fixed64 => WireType::Fixed64,
            Self::SFixed32 => WireType::Fixed32,
            Self::SFixed64 => WireType::Fixed64,
            Self::Bool => WireType::Varint,
            Self::String => WireType::LengthDelimited,
            Self::Bytes => WireType::LengthDelimited,
            Self::Message(..) => WireType::LengthDelimited,
            Self::Group(..) => WireType::StartGroup,
            Self::Enum(..) => WireType::Varint,
        }
    }

    /// True, if repeated values of this type may be packed.
    pub fn is_packable(&self) -> bool
    {
        matches!(
            self.wire_type(),
            WireType::Varint | WireType::Fixed32 | WireType::Fixed64
        )
    }

    /// The message type, for message and group fields.
    pub fn message_ref(&self) -> Option<MessageRef>
    {
        match self {
            Self::Message(m) | Self::Group(m) => Some(*m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test
{
    use super::*;

    const ITEMS: &str = r#"
        syntax = "proto3";
        package shop;

        message Item {
            int32 id = 1;
            repeated uint32 tags = 2;
            repeated int32 unpacked = 3 [packed = false];
            repeated string names = 4;
            map<string, Price> prices = 5;
            oneof kind {
                string title = 6;
                Kind kind_value = 7;
            }

            message Price { double amount = 1; }
            enum Kind { NONE = 0; BOOK = 1; ALIAS = 1; }
        }
    "#;

    #[test]
    fn field_lookup()
    {
        let schema = Schema::parse(&[ITEMS]).unwrap();
        let item = schema.get_message("shop.Item").unwrap();

        assert_eq!(item.get_field(1).unwrap().name, "id");
        assert_eq!(
            item.iter_fields().map(|f| f.number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn wire_types()
    {
        let schema = Schema::parse(&[ITEMS]).unwrap();
        let item = schema.get_message("shop.Item").unwrap();
        let wire = |n| item.get_field(n).unwrap().wire_type();

        assert_eq!(wire(1), WireType::Varint);
        assert_eq!(wire(2), WireType::LengthDelimited);
        assert!(item.get_field(2).unwrap().is_packed());
        assert_eq!(wire(3), WireType::Varint);
        assert_eq!(wire(4), WireType::LengthDelimited);
        assert!(!item.get_field(4).unwrap().is_packed());
        assert_eq!(wire(7), WireType::Varint);
    }

    #[test]
    fn map_entries()
    {
        let schema = Schema::parse(&[ITEMS]).unwrap();
        let item = schema.get_message("shop.Item").unwrap();
        let prices = item.get_field(5).unwrap();
        assert_eq!(prices.multiplicity, Multiplicity::Repeated);

        let entry = schema.resolve_message(prices.field_type.message_ref().unwrap());
        assert_eq!(entry.full_name, "shop.Item.PricesEntry");
        assert!(entry.is_map_entry());
        assert_eq!(entry.get_field(1).unwrap().field_type, ValueType::String);

        let price = schema.get_message("shop.Item.Price").unwrap();
        assert_eq!(
            entry.get_field(2).unwrap().field_type,
            ValueType::Message(price.self_ref)
        );
    }

    #[test]
    fn oneofs()
    {
        let schema = Schema::parse(&[ITEMS]).unwrap();
        let item = schema.get_message("shop.Item").unwrap();
        assert_eq!(item.oneofs.len(), 1);
        assert_eq!(item.oneofs[0].name, "kind");
        assert_eq!(item.oneofs[0].fields, vec![6, 7]);

        assert_eq!(
            item.get_field(7).unwrap().oneof,
            Some(item.oneofs[0].self_ref)
        );
        assert_eq!(item.get_field(1).unwrap().oneof, None);
    }

    #[test]
    fn enums()
    {
        let schema = Schema::parse(&[ITEMS]).unwrap();
        let kind = schema.get_enum("shop.Item.Kind").unwrap();
        let names: Vec<&str> = kind.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["NONE", "BOOK", "ALIAS"]);

        let item = schema.get_message("shop.Item").unwrap();
        assert_eq!(
            item.get_field(7).unwrap().field_type,
            ValueType::Enum(kind.self_ref)
        );
    }

    #[test]
    fn proto2_packing()
    {
        let schema = Schema::parse(&[r#"
            syntax = "proto2";
            message Legacy {
                repeated int32 plain = 1;
                repeated int32 packed = 2 [packed = true];
                optional Mode mode = 3;
                repeated Mode modes = 4 [packed = true];
                required fixed64 id = 5;
            }
            enum Mode { A = 0; }
        "#])
        .unwrap();
        let legacy = schema.get_message("Legacy").unwrap();
        assert_eq!(
            legacy.get_field(1).unwrap().multiplicity,
            Multiplicity::Repeated
        );
        assert_eq!(
            legacy.get_field(2).unwrap().multiplicity,
            Multiplicity::RepeatedPacked
        );
        assert_eq!(
            legacy.get_field(3).unwrap().multiplicity,
            Multiplicity::Optional
        );
        assert!(legacy.get_field(4).unwrap().is_packed());
        assert_eq!(legacy.get_field(5).unwrap().wire_type(), WireType::Fixed64);
    }

    #[test]
    fn groups()
    {
        let schema = Schema::parse(&[r#"
            message Search {
                repeated group Result = 1 {
                    required string url = 2;
                }
            }
        "#])
        .unwrap();
        let search = schema.get_message("Search").unwrap();
        let result = search.get_field(1).unwrap();
        assert_eq!(result.name, "result");
        assert_eq!(result.wire_type(), WireType::StartGroup);

        let group = schema.resolve_message(result.field_type.message_ref().unwrap());
        assert_eq!(group.full_name, "Search.Result");
    }

    #[test]
    fn messages_iterates_nested_types()
    {
        let schema = Schema::parse(&[ITEMS]).unwrap();
        let names: Vec<_> = schema.messages().map(|m| m.full_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["shop.Item", "shop.Item.PricesEntry", "shop.Item.Price"]
        );
    }
}
