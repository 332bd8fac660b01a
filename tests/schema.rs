#[test]
fn parse()
{
    use rawproto::schema::{Multiplicity, Schema, TypeParent, ValueType};

    let schema = Schema::parse(&[r#"
      syntax = "proto3";
      message Message {
          string s = 1;
          repeated bytes b = 2;
          optional int64 large = 3;
          repeated sint32 signed = 4;
          Message child = 10;
      }
    "#])
    .unwrap();

    let message = schema.get_message("Message").unwrap();
    assert!(matches!(message.parent, TypeParent::Package(_)));

    let fields: Vec<(&str, u32, Multiplicity)> = message
        .iter_fields()
        .map(|f| (f.name.as_str(), f.number, f.multiplicity))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("s", 1, Multiplicity::Single),
            ("b", 2, Multiplicity::Repeated),
            ("large", 3, Multiplicity::Optional),
            ("signed", 4, Multiplicity::RepeatedPacked),
            ("child", 10, Multiplicity::Single),
        ]
    );

    assert_eq!(message.get_field(4).unwrap().field_type, ValueType::SInt32);
    assert_eq!(
        message.get_field(10).unwrap().field_type,
        ValueType::Message(message.self_ref)
    );
}

#[test]
fn oneof()
{
    use rawproto::schema::Schema;

    let schema = Schema::parse(&[r#"
      syntax = "proto3";
      message Message {
          oneof a {
            string a1 = 1;
            string a2 = 2;
            string a3 = 3;
          };
          oneof b {
            uint32 b1 = 4;
            uint32 b2 = 5;
            uint32 b3 = 6;
          }
          string plain = 7;
      }
    "#])
    .unwrap();

    let message = schema.get_message("Message").unwrap();
    let oneofs: Vec<(&str, &[u32])> = message
        .oneofs
        .iter()
        .map(|o| (o.name.as_str(), &o.fields[..]))
        .collect();
    assert_eq!(oneofs, vec![("a", &[1, 2, 3][..]), ("b", &[4, 5, 6][..])]);

    let b2 = message.get_field(5).unwrap();
    assert_eq!(b2.oneof, Some(message.oneofs[1].self_ref));
    assert_eq!(message.get_field(7).unwrap().oneof, None);
}

#[test]
fn packages_and_references()
{
    use rawproto::schema::{Schema, ValueType};

    let schema = Schema::parse(&[
        r#"
          syntax = "proto3";
          package shop.v1;
          import "common.proto";

          message Order {
              message Line {
                  common.Money price = 1;
                  Status status = 2;
              }
              repeated Line lines = 1;
              .shop.v1.Order.Line first = 2;
          }
          enum Status { UNKNOWN = 0; SHIPPED = 1; }
        "#,
        r#"
          syntax = "proto3";
          package common;
          message Money { int64 units = 1; string currency = 2; }
        "#,
    ])
    .unwrap();

    assert_eq!(schema.packages().len(), 2);
    assert_eq!(schema.packages()[0].name.as_deref(), Some("shop.v1"));

    let order = schema.get_message("shop.v1.Order").unwrap();
    let line = schema.get_message("shop.v1.Order.Line").unwrap();
    assert_eq!(
        order.get_field(2).unwrap().field_type,
        ValueType::Message(line.self_ref)
    );

    let money = schema.get_message("common.Money").unwrap();
    assert_eq!(
        line.get_field(1).unwrap().field_type,
        ValueType::Message(money.self_ref)
    );

    let status = schema.get_enum("shop.v1.Status").unwrap();
    assert_eq!(
        line.get_field(2).unwrap().field_type,
        ValueType::Enum(status.self_ref)
    );
    assert_eq!(status.fields[1].name, "SHIPPED");
    assert_eq!(status.fields[1].value, 1);
    assert_eq!(schema.messages().count(), 3);
}

#[test]
fn proto2_groups_and_packing()
{
    use rawproto::schema::{Multiplicity, Schema, ValueType};
    use rawproto::WireType;

    let schema = Schema::parse(&[r#"
      syntax = "proto2";
      message Search {
          repeated group Result = 1 {
              required string url = 2;
          }
          repeated int32 plain = 3;
          repeated int32 packed = 4 [packed = true];
      }
    "#])
    .unwrap();

    let search = schema.get_message("Search").unwrap();
    let result = schema.get_message("Search.Result").unwrap();

    let group = search.get_field(1).unwrap();
    assert_eq!(group.field_type, ValueType::Group(result.self_ref));
    assert_eq!(group.wire_type(), WireType::StartGroup);
    assert_eq!(result.get_field(2).unwrap().multiplicity, Multiplicity::Single);

    assert_eq!(
        search.get_field(3).unwrap().multiplicity,
        Multiplicity::Repeated
    );
    assert_eq!(search.get_field(3).unwrap().wire_type(), WireType::Varint);
    assert_eq!(
        search.get_field(4).unwrap().wire_type(),
        WireType::LengthDelimited
    );
}

#[test]
fn errors()
{
    use rawproto::schema::{ParseError, Schema};

    assert!(matches!(
        Schema::parse(&["message {"]),
        Err(ParseError::SyntaxError { .. })
    ));

    match Schema::parse(&["message A { Missing m = 1; }"]) {
        Err(ParseError::TypeNotFound { name, context }) => {
            assert_eq!(name, "Missing");
            assert_eq!(context, "A");
        }
        other => panic!("Unexpected: {:?}", other),
    }

    assert!(matches!(
        Schema::parse(&["message A {}", "message A {}"]),
        Err(ParseError::DuplicateType { name }) if name == "A"
    ));

    assert!(matches!(
        Schema::parse(&["message A { int32 x = 536870912; }"]),
        Err(ParseError::InvalidFieldNumber { number: 536870912, .. })
    ));
}

#[test]
fn match_against_parsed_types()
{
    use rawproto::{Matcher, Message, Schema};

    let schema = Schema::parse(&[r#"
      syntax = "proto3";
      package demo;
      message Point { int32 x = 1; int32 y = 2; }
      message Label { string text = 1; Point at = 2; }
    "#])
    .unwrap();

    // text: "hi", at: {x: 1, y: 2}
    let message = Message::new(vec![
        0x0a, 0x02, b'h', b'i', 0x12, 0x04, 0x08, 0x01, 0x10, 0x02,
    ]);

    let ranked = Matcher::from_schema(&schema).rank(&message);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].name, "demo.Label");
    assert_eq!(ranked[0].confidence, 1.0);
    assert_eq!(ranked[0].matching_fields, 4);
    assert_eq!(ranked[1].name, "demo.Point");
    assert_eq!(ranked[1].incompatibilities, 2);
}
