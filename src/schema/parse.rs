use bytes::{BufMut, Bytes, BytesMut};
use pest::{
    iterators::{Pair, Pairs},
    Parser,
};

use super::builder::*;
use super::*;

#[derive(pest_derive::Parser)]
#[grammar = "schema/proto.pest"]
struct ProtoParser;

impl Schema
{
    /// Parses the files into a schema.
    ///
    /// Type references may cross files. Imports are not followed, so every file a reference
    /// points into must be in `files`.
    pub fn parse<T, S>(files: T) -> Result<Self, ParseError>
    where
        T: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let builder = SchemaBuilder {
            packages: files
                .into_iter()
                .map(|f| PackageBuilder::parse_str(f.as_ref()))
                .collect::<Result<_, _>>()?,
        };

        builder.build()
    }
}

impl PackageBuilder
{
    pub fn parse_str(input: &str) -> Result<Self, ParseError>
    {
        let pairs = ProtoParser::parse(Rule::proto, input)
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            .context(SyntaxError {})?;

        let mut current_package = PackageBuilder::default();
        for pair in pairs {
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::syntax => current_package.syntax = parse_syntax(inner),
                    Rule::topLevelDef => {
                        if let Some(t) = TypeBuilder::parse(inner) {
                            current_package.types.push(t);
                        }
                    }
                    Rule::import => {}
                    Rule::package => {
                        current_package.name =
                            Some(inner.into_inner().next().unwrap().as_str().to_string())
                    }
                    Rule::option => {}
                    Rule::emptyStatement => {}
                    Rule::EOI => {}
                    r => unreachable!("{:?}: {:?}", r, inner),
                }
            }
        }

        Ok(current_package)
    }
}

fn parse_syntax(p: Pair<Rule>) -> Syntax
{
    // syntax > syntaxValue > syntaxVersion
    let version = p.into_inner().next().unwrap().into_inner().next().unwrap();
    match version.as_str() {
        "proto3" => Syntax::Proto3,
        _ => Syntax::Proto2,
    }
}

impl TypeBuilder
{
    /// Services and extensions carry no message layouts and yield `None`.
    pub fn parse(p: Pair<Rule>) -> Option<Self>
    {
        let pair = p.into_inner().next().unwrap();
        match pair.as_rule() {
            Rule::message => Some(TypeBuilder::Message(MessageBuilder::parse(pair))),
            Rule::enum_ => Some(TypeBuilder::Enum(EnumBuilder::parse(pair))),
            Rule::service | Rule::extend => None,
            r => unreachable!("{:?}: {:?}", r, pair),
        }
    }
}

impl MessageBuilder
{
    pub fn parse(p: Pair<Rule>) -> Self
    {
        let mut inner = p.into_inner();
        let name = inner.next().unwrap().as_str().to_string();
        Self::parse_body(name, inner.next().unwrap())
    }

    fn parse_body(name: String, body: Pair<Rule>) -> Self
    {
        let mut fields = vec![];
        let mut oneofs = vec![];
        let mut inner_types = vec![];
        let mut options = vec![];
        for p in body.into_inner() {
            match p.as_rule() {
                Rule::field => fields.push(FieldBuilder::parse(p)),
                Rule::enum_ => inner_types.push(TypeBuilder::Enum(EnumBuilder::parse(p))),
                Rule::message => inner_types.push(TypeBuilder::Message(MessageBuilder::parse(p))),
                Rule::option => options.push(ProtoOption::parse(p)),
                Rule::oneof => oneofs.push(OneofBuilder::parse(p)),
                Rule::mapField => {
                    let (field, entry) = FieldBuilder::parse_map(p);
                    fields.push(field);
                    inner_types.push(TypeBuilder::Message(entry));
                }
                Rule::group => {
                    let (field, group) = FieldBuilder::parse_group(p);
                    fields.push(field);
                    inner_types.push(TypeBuilder::Message(group));
                }
                Rule::reserved => {} // Reserved numbers and names never appear on the wire.
                Rule::extensions => {}
                Rule::extend => {}
                Rule::emptyStatement => {}
                r => unreachable!("{:?}: {:?}", r, p),
            }
        }

        MessageBuilder {
            name,
            fields,
            oneofs,
            inner_types,
            options,
        }
    }
}

impl EnumBuilder
{
    fn parse(p: Pair<Rule>) -> EnumBuilder
    {
        let mut inner = p.into_inner();
        let name = inner.next().unwrap().as_str().to_string();

        let mut fields = vec![];
        let mut options = vec![];
        let body = inner.next().unwrap();
        for p in body.into_inner() {
            match p.as_rule() {
                Rule::enumField => {
                    let mut inner = p.into_inner();
                    fields.push(EnumField {
                        name: inner.next().unwrap().as_str().to_string(),
                        value: parse_int_literal(inner.next().unwrap()),
                        options: ProtoOption::parse_options(inner),
                    })
                }
                Rule::option => options.push(ProtoOption::parse(p)),
                Rule::reserved => {}
                Rule::emptyStatement => {}
                r => unreachable!("{:?}: {:?}", r, p),
            }
        }

        EnumBuilder {
            name,
            fields,
            options,
        }
    }
}

impl FieldBuilder
{
    pub fn parse(p: Pair<Rule>) -> Self
    {
        let mut inner = p.into_inner();
        let multiplicity = parse_label(inner.next().unwrap());
        let field_type = parse_field_type(inner.next().unwrap().as_str());
        let name = inner.next().unwrap().as_str().to_string();
        let number = parse_uint_literal(inner.next().unwrap());

        let options = match inner.next() {
            Some(p) => ProtoOption::parse_options(p.into_inner()),
            None => vec![],
        };

        FieldBuilder {
            multiplicity,
            field_type,
            name,
            number,
            options,
        }
    }

    pub fn parse_oneof(p: Pair<Rule>) -> Self
    {
        let mut inner = p.into_inner();
        let field_type = parse_field_type(inner.next().unwrap().as_str());
        let name = inner.next().unwrap().as_str().to_string();
        let number = parse_uint_literal(inner.next().unwrap());

        let options = match inner.next() {
            Some(p) => ProtoOption::parse_options(p.into_inner()),
            None => vec![],
        };

        FieldBuilder {
            multiplicity: Multiplicity::Single,
            field_type,
            name,
            number,
            options,
        }
    }

    /// A `map<K, V>` field is a repeated field of a synthesized `<Name>Entry` message.
    fn parse_map(p: Pair<Rule>) -> (Self, MessageBuilder)
    {
        let mut inner = p.into_inner();
        let key_type = parse_field_type(inner.next().unwrap().as_str());
        let value_type = parse_field_type(inner.next().unwrap().as_str());
        let name = inner.next().unwrap().as_str().to_string();
        let number = parse_uint_literal(inner.next().unwrap());
        let options = match inner.next() {
            Some(p) => ProtoOption::parse_options(p.into_inner()),
            None => vec![],
        };

        let entry_name = format!("{}Entry", camel_case(&name));
        let entry_field = |name: &str, number, field_type| FieldBuilder {
            multiplicity: Multiplicity::Single,
            field_type,
            name: name.to_string(),
            number,
            options: vec![],
        };
        let entry = MessageBuilder {
            name: entry_name.clone(),
            fields: vec![
                entry_field("key", 1, key_type),
                entry_field("value", 2, value_type),
            ],
            options: vec![ProtoOption {
                name: "map_entry".to_string(),
                value: Constant::Bool(true),
            }],
            ..Default::default()
        };

        let field = FieldBuilder {
            multiplicity: Multiplicity::Repeated,
            field_type: FieldTypeBuilder::Unknown(entry_name),
            name,
            number,
            options,
        };
        (field, entry)
    }

    /// A group declares both a nested message and a field named after it in lower case.
    fn parse_group(p: Pair<Rule>) -> (Self, MessageBuilder)
    {
        let mut inner = p.into_inner();
        let multiplicity = parse_label(inner.next().unwrap());
        let type_name = inner.next().unwrap().as_str().to_string();
        let number = parse_uint_literal(inner.next().unwrap());

        let mut options = vec![];
        let mut body = inner.next().unwrap();
        if body.as_rule() == Rule::fieldOptions {
            options = ProtoOption::parse_options(body.into_inner());
            body = inner.next().unwrap();
        }

        let field = FieldBuilder {
            multiplicity,
            field_type: FieldTypeBuilder::Group(type_name.clone()),
            name: type_name.to_lowercase(),
            number,
            options,
        };
        (field, MessageBuilder::parse_body(type_name, body))
    }
}

impl OneofBuilder
{
    pub fn parse(p: Pair<Rule>) -> Self
    {
        let mut inner = p.into_inner();
        let name = inner.next().unwrap().as_str().to_string();
        let mut options = Vec::new();
        let mut fields = vec![];
        for p in inner {
            match p.as_rule() {
                Rule::option => options.push(ProtoOption::parse(p)),
                Rule::oneofField => fields.push(FieldBuilder::parse_oneof(p)),
                Rule::emptyStatement => {}
                r => unreachable!("{:?}: {:?}", r, p),
            }
        }
        OneofBuilder {
            name,
            fields,
            options,
        }
    }
}

fn parse_label(p: Pair<Rule>) -> Multiplicity
{
    match p.into_inner().next().map(|l| l.as_rule()) {
        Some(Rule::optional) => Multiplicity::Optional,
        Some(Rule::repeated) => Multiplicity::Repeated,
        Some(Rule::required) | None => Multiplicity::Single,
        Some(r) => unreachable!("{:?}", r),
    }
}

fn parse_field_type(t: &str) -> FieldTypeBuilder
{
    FieldTypeBuilder::Builtin(match t {
        "double" => ValueType::Double,
        "float" => ValueType::Float,
        "int32" => ValueType::Int32,
        "int64" => ValueType::Int64,
        "uint32" => ValueType::UInt32,
        "uint64" => ValueType::UInt64,
        "sint32" => ValueType::SInt32,
        "sint64" => ValueType::SInt64,
        "fixed32" => ValueType::Fixed32,
        "fixed64" => ValueType::Fixed64,
        "sfixed32" => ValueType::SFixed32,
        "sfixed64" => ValueType::SFixed64,
        "bool" => ValueType::Bool,
        "string" => ValueType::String,
        "bytes" => ValueType::Bytes,
        _ => return FieldTypeBuilder::Unknown(t.to_string()),
    })
}

/// `my_map` becomes `MyMap`.
fn camel_case(name: &str) -> String
{
    let mut output = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        match c {
            '_' => upper = true,
            c if upper => {
                output.extend(c.to_uppercase());
                upper = false;
            }
            c => output.push(c),
        }
    }
    output
}

/// Out of range literals saturate.
fn parse_digits(lit: Pair<Rule>) -> u64
{
    let s = lit.as_str();
    match lit.as_rule() {
        Rule::decimalLit => s.parse().unwrap_or(u64::MAX),
        Rule::octalLit => u64::from_str_radix(s, 8).unwrap_or(u64::MAX),
        Rule::hexLit => u64::from_str_radix(&s[2..], 16).unwrap_or(u64::MAX),
        r => unreachable!("{:?}: {:?}", r, lit),
    }
}

pub fn parse_uint_literal(p: Pair<Rule>) -> u64
{
    match p.as_rule() {
        Rule::fieldNumber => parse_digits(p.into_inner().next().unwrap()),
        r => unreachable!("{:?}: {:?}", r, p),
    }
}

pub fn parse_int_literal(p: Pair<Rule>) -> i64
{
    match p.as_rule() {
        Rule::intLit => {
            let mut inner = p.into_inner();
            let first = inner.next().unwrap();
            let (sign, lit) = match first.as_rule() {
                Rule::sign if first.as_str() == "-" => (-1, inner.next().unwrap()),
                Rule::sign => (1, inner.next().unwrap()),
                _ => (1, first),
            };
            let value = sign * parse_digits(lit) as i128;
            value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
        }
        r => unreachable!("{:?}: {:?}", r, p),
    }
}

pub fn parse_float_literal(p: Pair<Rule>) -> f64
{
    match p.as_rule() {
        Rule::floatLit => p.as_str().parse::<f64>().unwrap_or(f64::NAN),
        r => unreachable!("{:?}: {:?}", r, p),
    }
}

impl ProtoOption
{
    fn parse(p: Pair<Rule>) -> Self
    {
        let mut inner = p.into_inner();
        Self {
            name: parse_ident(inner.next().unwrap()),
            value: Constant::parse(inner.next().unwrap()),
        }
    }

    fn parse_options(pairs: Pairs<Rule>) -> Vec<Self>
    {
        pairs
            .map(|p| match p.as_rule() {
                Rule::fieldOption => Self::parse(p),
                Rule::enumValueOption => Self::parse(p),
                Rule::option => Self::parse(p),
                r => unreachable!("{:?}: {:?}", r, p),
            })
            .collect()
    }
}

impl Constant
{
    fn parse(p: Pair<Rule>) -> Self
    {
        let p = p.into_inner().next().unwrap();
        match p.as_rule() {
            Rule::fullIdent => Constant::Ident(p.as_str().to_string()),
            Rule::intLit => Constant::Integer(parse_int_literal(p)),
            Rule::floatLit => Constant::Float(parse_float_literal(p)),
            Rule::strLit => Constant::String(parse_string_literal(p)),
            Rule::boolLit => Constant::Bool(p.as_str() == "true"),
            Rule::aggregateLit => Constant::Aggregate(p.as_str().to_string()),
            r => unreachable!("{:?}: {:?}", r, p),
        }
    }
}

fn parse_ident(p: Pair<Rule>) -> String
{
    let mut ident = vec![];
    for part in p.into_inner() {
        match part.as_rule() {
            Rule::ident => ident.push(part.as_str().to_string()),
            Rule::fullIdent => ident.push(format!("({})", part.as_str())),
            r => unreachable!("{:?}: {:?}", r, part),
        }
    }

    ident.join(".")
}

fn parse_string_literal(s: Pair<Rule>) -> Bytes
{
    let inner = s.into_inner();
    let mut output = BytesMut::new();
    for c in inner {
        let c = c.into_inner().next().unwrap();
        match c.as_rule() {
            Rule::hexEscape => {
                let digits = c.into_inner().next().unwrap().as_str();
                output.put_u8(u8::from_str_radix(digits, 16).unwrap_or(0));
            }
            Rule::octEscape => {
                // Three octal digits can exceed a byte; keep the low bits.
                let digits = c.into_inner().next().unwrap().as_str();
                output.put_u8(u16::from_str_radix(digits, 8).unwrap_or(0) as u8);
            }
            Rule::charEscape => match c.into_inner().next().unwrap().as_str() {
                "a" => output.put_u8(0x07),
                "b" => output.put_u8(0x08),
                "f" => output.put_u8(0x0C),
                "n" => output.put_u8(0x0A),
                "r" => output.put_u8(0x0D),
                "t" => output.put_u8(0x09),
                "v" => output.put_u8(0x0B),
                "\\" => output.put_u8(0x5C),
                "\'" => output.put_u8(0x27),
                "\"" => output.put_u8(0x22),
                "?" => output.put_u8(0x3F),
                o => unreachable!("Invalid escape sequence \\{}", o),
            },
            Rule::anyChar => output.put(c.as_str().as_bytes()),
            r => unreachable!("{:?}: {:?}", r, c),
        }
    }
    output.freeze()
}
