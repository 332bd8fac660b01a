//! Ranking known message types against a decoded message.
//!
//! Every candidate is scored on the field numbers and wire types it shares with the message,
//! including the fields of sub-messages that the candidate declares as message types:
//!
//! ```text
//! confidence = matching / (message_fields + candidate_fields - matching) / (1 + incompatibilities)
//! ```
//!
//! A field is incompatible when the candidate declares its number with a different wire type.
//! A message encoded from a candidate that sets every declared field scores exactly `1.0`.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::decode::Message;
use crate::schema::Schema;
use crate::wire::WireType;

/// Deepest sub-message level that is still compared.
const MAX_DEPTH: usize = 32;

/// The layout of a known message type.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCandidate
{
    /// Full name of the message type.
    pub name: String,

    /// Declared fields.
    pub fields: Vec<CandidateField>,
}

/// A declared field of a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateField
{
    /// Field number.
    pub number: u32,

    /// Wire type the field is declared with.
    pub wire_type: WireType,

    /// For packed fields, the wire type of the unpacked scalars.
    pub scalar_wire_type: Option<WireType>,

    /// Full name of the message type for message and group fields.
    pub message_type: Option<String>,
}

/// The score of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult
{
    /// Candidate name.
    pub name: String,

    /// Score between `0.0` and `1.0`.
    pub confidence: f64,

    /// Field numbers present in both with a compatible wire type, sub-messages included.
    pub matching_fields: usize,

    /// Field numbers present in both with conflicting wire types, sub-messages included.
    pub incompatibilities: usize,
}

impl SchemaCandidate
{
    /// One candidate per message type of the schema.
    ///
    /// The entry types synthesized for `map` fields are only reachable as sub-messages.
    pub fn from_schema(schema: &Schema) -> Vec<SchemaCandidate>
    {
        schema
            .messages()
            .filter(|m| !m.is_map_entry())
            .chain(schema.messages().filter(|m| m.is_map_entry()))
            .map(|m| SchemaCandidate {
                name: m.full_name.clone(),
                fields: m
                    .iter_fields()
                    .map(|f| CandidateField {
                        number: f.number,
                        wire_type: f.wire_type(),
                        scalar_wire_type: match f.is_packed() {
                            true => Some(f.field_type.wire_type()),
                            false => None,
                        },
                        message_type: f
                            .field_type
                            .message_ref()
                            .map(|r| schema.resolve_message(r).full_name.clone()),
                    })
                    .collect(),
            })
            .collect()
    }

    fn field(&self, number: u32) -> Option<&CandidateField>
    {
        self.fields.iter().find(|f| f.number == number)
    }
}

impl CandidateField
{
    /// True, if a field encoded with `wire_type` fits this declaration.
    ///
    /// Packed fields also accept their unpacked encoding.
    pub fn accepts(&self, wire_type: WireType) -> bool
    {
        self.wire_type == wire_type || self.scalar_wire_type == Some(wire_type)
    }
}

/// Scores messages against a fixed set of candidates.
#[derive(Debug, Clone, Default)]
pub struct Matcher
{
    candidates: Vec<SchemaCandidate>,
    by_name: HashMap<String, usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally
{
    message_fields: usize,
    candidate_fields: usize,
    matching: usize,
    incompatibilities: usize,
}

impl Tally
{
    fn add(&mut self, other: Tally)
    {
        self.message_fields += other.message_fields;
        self.candidate_fields += other.candidate_fields;
        self.matching += other.matching;
        self.incompatibilities += other.incompatibilities;
    }

    fn confidence(&self) -> f64
    {
        let union = self.message_fields + self.candidate_fields - self.matching;
        if union == 0 {
            // Nothing on either side.
            return 1.0;
        }
        self.matching as f64 / union as f64 / (1 + self.incompatibilities) as f64
    }
}

impl Matcher
{
    /// Creates a matcher over `candidates`.
    ///
    /// Sub-message types are looked up by name among the same candidates.
    pub fn new(candidates: Vec<SchemaCandidate>) -> Self
    {
        let mut by_name = HashMap::new();
        for (idx, c) in candidates.iter().enumerate() {
            by_name.entry(c.name.clone()).or_insert(idx);
        }
        Matcher {
            candidates,
            by_name,
        }
    }

    /// Creates a matcher over every message type of `schema`.
    pub fn from_schema(schema: &Schema) -> Self
    {
        Self::new(SchemaCandidate::from_schema(schema))
    }

    /// The candidates in their original order.
    pub fn candidates(&self) -> &[SchemaCandidate]
    {
        &self.candidates
    }

    /// Scores every candidate, best first.
    ///
    /// Ties go to the candidate with more matching fields, then to the smaller name.
    pub fn rank(&self, message: &Message) -> Vec<MatchResult>
    {
        let mut results: Vec<MatchResult> = self
            .candidates
            .iter()
            .map(|candidate| {
                let tally = self.score(message, candidate, 0);
                trace!(
                    candidate = %candidate.name,
                    matching = tally.matching,
                    incompatibilities = tally.incompatibilities,
                    "Scored candidate"
                );
                MatchResult {
                    name: candidate.name.clone(),
                    confidence: tally.confidence(),
                    matching_fields: tally.matching,
                    incompatibilities: tally.incompatibilities,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.matching_fields.cmp(&a.matching_fields))
                .then_with(|| a.name.cmp(&b.name))
        });

        if let Some(best) = results.first() {
            debug!(best = %best.name, confidence = best.confidence, "Ranked candidates");
        }
        results
    }

    fn score(&self, message: &Message, candidate: &SchemaCandidate, depth: usize) -> Tally
    {
        let fingerprint = message.fingerprint();
        let mut tally = Tally {
            message_fields: fingerprint.len(),
            candidate_fields: candidate.fields.len(),
            ..Tally::default()
        };

        for (number, wire_type) in fingerprint {
            let declared = match candidate.field(number) {
                Some(f) => f,
                None => continue,
            };

            if !declared.accepts(wire_type) {
                tally.incompatibilities += 1;
                continue;
            }
            tally.matching += 1;

            if depth >= MAX_DEPTH {
                continue;
            }
            let nested = declared
                .message_type
                .as_ref()
                .and_then(|name| self.by_name.get(name))
                .map(|idx| &self.candidates[*idx]);
            if let Some(nested) = nested {
                let child = message
                    .get(number)
                    .iter()
                    .find_map(|f| f.try_parse_as_message());
                if let Some(child) = child {
                    tally.add(self.score(child, nested, depth + 1));
                }
            }
        }

        tally
    }
}

#[cfg(test)]
mod test
{
    use super::*;
    use crate::wire::{encode_tag, encode_varint};
    use bytes::{BufMut, BytesMut};

    const LISTINGS: &str = r#"
        syntax = "proto3";
        package app;

        message Listing {
            string title = 1;
            int64 price = 2;
            Seller seller = 3;
            repeated int32 ratings = 4;
        }
        message Seller { string name = 1; fixed64 id = 2; }
        message Other { int32 a = 1; int32 b = 2; }
    "#;

    fn put_bytes(buf: &mut BytesMut, number: u32, data: &[u8])
    {
        encode_tag(number, WireType::LengthDelimited, buf);
        encode_varint(data.len() as u64, buf);
        buf.put_slice(data);
    }

    fn listing() -> Message
    {
        let mut seller = BytesMut::new();
        put_bytes(&mut seller, 1, b"Ann");
        encode_tag(2, WireType::Fixed64, &mut seller);
        seller.put_u64_le(77);

        let mut buf = BytesMut::new();
        put_bytes(&mut buf, 1, b"Book");
        encode_tag(2, WireType::Varint, &mut buf);
        encode_varint(1200, &mut buf);
        put_bytes(&mut buf, 3, &seller);
        put_bytes(&mut buf, 4, &[5, 4]);
        Message::new(buf.freeze())
    }

    #[test]
    fn candidates_from_schema()
    {
        let schema = Schema::parse(&[LISTINGS]).unwrap();
        let candidates = SchemaCandidate::from_schema(&schema);
        assert_eq!(
            candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["app.Listing", "app.Seller", "app.Other"]
        );

        let ratings = candidates[0].field(4).unwrap();
        assert_eq!(ratings.wire_type, WireType::LengthDelimited);
        assert_eq!(ratings.scalar_wire_type, Some(WireType::Varint));
        assert!(ratings.accepts(WireType::Varint));
        assert_eq!(
            candidates[0].field(3).unwrap().message_type.as_deref(),
            Some("app.Seller")
        );
    }

    #[test]
    fn exact_schema_ranks_first()
    {
        let matcher = Matcher::from_schema(&Schema::parse(&[LISTINGS]).unwrap());
        let results = matcher.rank(&listing());

        assert_eq!(results[0].name, "app.Listing");
        assert_eq!(results[0].confidence, 1.0);
        assert_eq!(results[0].matching_fields, 6);
        assert_eq!(results[0].incompatibilities, 0);
        assert!(results[1].confidence < 1.0);
    }

    #[test]
    fn incompatible_fields_lower_the_score()
    {
        let matcher = Matcher::from_schema(&Schema::parse(&[LISTINGS]).unwrap());
        let results = matcher.rank(&listing());
        let seller = results.iter().find(|r| r.name == "app.Seller").unwrap();

        // Field 1 matches, field 2 is a varint instead of fixed64.
        assert_eq!(seller.matching_fields, 1);
        assert_eq!(seller.incompatibilities, 1);
        assert!((seller.confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_name()
    {
        let candidate = |name: &str| SchemaCandidate {
            name: name.to_string(),
            fields: vec![CandidateField {
                number: 1,
                wire_type: WireType::Varint,
                scalar_wire_type: None,
                message_type: None,
            }],
        };
        let matcher = Matcher::new(vec![candidate("b"), candidate("a")]);
        let results = matcher.rank(&Message::new(vec![0x08, 0x01]));
        assert_eq!(results[0].name, "a");
        assert_eq!(results[1].name, "b");
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn recursive_types_terminate()
    {
        let matcher = Matcher::from_schema(
            &Schema::parse(&["message Node { int32 value = 1; Node child = 2; }"]).unwrap(),
        );

        let mut data = BytesMut::new();
        for _ in 0..40 {
            let mut outer = BytesMut::new();
            encode_tag(1, WireType::Varint, &mut outer);
            encode_varint(1, &mut outer);
            if !data.is_empty() {
                put_bytes(&mut outer, 2, &data);
            }
            data = outer;
        }

        let results = matcher.rank(&Message::new(data.freeze()));
        assert_eq!(results[0].name, "Node");
        assert_eq!(results[0].incompatibilities, 0);
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn no_candidates()
    {
        assert!(Matcher::default().rank(&listing()).is_empty());
    }
}
