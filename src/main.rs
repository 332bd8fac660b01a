//! rawproto - Decode protocol buffer messages without a schema
//!
//! Reads a binary message from standard input and prints it as JSON, as a guessed `.proto`
//! definition, as query results or as a ranking of known message types.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rawproto::{FieldMap, Matcher, Message, Path, Query, Schema};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Decode protocol buffer messages without a schema
#[derive(Parser, Debug)]
#[command(name = "rawproto")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli
{
    #[command(subcommand)]
    command: Command,

    /// Standard input is hex text instead of binary; whitespace is ignored
    #[arg(long, global = true)]
    hex: bool,

    /// Decode the input as if it was the sub-message at this path, e.g. `2.4`
    #[arg(long, global = true, value_name = "PATH")]
    at: Option<Path>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command
{
    /// Print the message as JSON
    Json
    {
        /// JSON file that names and types fields: {"name": "path[:type]"}
        types: Option<PathBuf>,

        /// Key prefix for unnamed fields
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Print a .proto definition that describes the message
    Proto
    {
        /// JSON file that names and types fields: {"name": "path[:type]"}
        types: Option<PathBuf>,

        /// Name prefix for unnamed fields
        #[arg(short, long, default_value = "f")]
        prefix: String,
    },

    /// Print the values found by one or more queries, e.g. `1.2.4:string`
    Query
    {
        /// Queries, `<path>[:<renderType>]`
        #[arg(required = true)]
        queries: Vec<String>,

        /// JSON file that types fields for queries without an explicit type
        #[arg(short, long)]
        types: Option<PathBuf>,

        /// Path prepended to every query
        #[arg(long, value_name = "PATH")]
        prefix_path: Option<Path>,
    },

    /// Print the number of appearances of each top-level field
    Fields,

    /// Print the guessed render type of every field path
    Types,

    /// Rank the message types of .proto files by how well they fit the message
    Match
    {
        /// .proto files; imports are not followed, so list every file needed
        #[arg(required = true)]
        protos: Vec<PathBuf>,
    },
}

fn main() -> Result<()>
{
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the output.
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let input = read_input(cli.hex)?;
    info!(bytes = input.len(), "Read input");

    let message = Message::at(input, cli.at.unwrap_or_else(Path::root));
    if let Some(e) = message.error() {
        if message.is_empty() {
            bail!("Input is not a protobuf message: {}", e);
        }
        debug!(error = %e, "Input decoded partially");
    }

    let output = match cli.command {
        Command::Json { types, prefix } => {
            let map = load_field_map(types.as_ref())?;
            let object = message
                .to_object_with(&map, &prefix)
                .context("Failed to project the message")?;
            serde_json::to_string_pretty(&object)?
        }
        Command::Proto { types, prefix } => {
            let map = load_field_map(types.as_ref())?;
            message
                .to_proto_with(&map, &prefix)
                .context("Failed to project the message")?
        }
        Command::Query {
            queries,
            types,
            prefix_path,
        } => {
            let map = load_field_map(types.as_ref())?;
            let prefix = prefix_path.unwrap_or_else(Path::root);
            let mut results: Vec<serde_json::Value> = vec![];
            for q in &queries {
                let query: Query = q
                    .parse()
                    .with_context(|| format!("Invalid query '{}'", q))?;
                let query = query.with_prefix(&prefix);
                debug!(%query, "Running query");
                let values = message
                    .resolve(&query, Some(&map))
                    .with_context(|| format!("Query '{}' failed", q))?;
                results.extend(values.iter().map(serde_json::Value::from));
            }
            serde_json::to_string_pretty(&results)?
        }
        Command::Fields => {
            let counts: serde_json::Map<String, serde_json::Value> = message
                .field_counts()
                .into_iter()
                .map(|(number, count)| (number.to_string(), json!(count)))
                .collect();
            serde_json::to_string_pretty(&counts)?
        }
        Command::Types => {
            let map = FieldMap::new();
            let mut types = BTreeMap::new();
            for entry in message.walk(&map).context("Failed to walk the message")? {
                types
                    .entry(entry.field.path().to_string())
                    .or_insert_with(|| entry.render_type.to_string());
            }
            serde_json::to_string_pretty(&types)?
        }
        Command::Match { protos } => {
            let sources = protos
                .iter()
                .map(|p| {
                    fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display()))
                })
                .collect::<Result<Vec<_>>>()?;
            let schema = Schema::parse(&sources).context("Failed to parse .proto files")?;
            let matcher = Matcher::from_schema(&schema);
            info!(candidates = matcher.candidates().len(), "Loaded candidates");

            let ranked: Vec<serde_json::Value> = matcher
                .rank(&message)
                .into_iter()
                .map(|r| {
                    json!({
                        "name": r.name,
                        "confidence": r.confidence,
                        "matchingFields": r.matching_fields,
                        "incompatibilities": r.incompatibilities,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&ranked)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn read_input(hex: bool) -> Result<Vec<u8>>
{
    let mut input = vec![];
    std::io::stdin()
        .read_to_end(&mut input)
        .context("Failed to read standard input")?;

    match hex {
        true => parse_hex(&input),
        false => Ok(input),
    }
}

/// Hex digit pairs; ASCII whitespace anywhere is skipped.
fn parse_hex(text: &[u8]) -> Result<Vec<u8>>
{
    let digits: Vec<u8> = text
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        bail!("Hex input has an odd number of digits");
    }

    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).context("Hex input is not text")?;
            u8::from_str_radix(pair, 16).with_context(|| format!("Invalid hex byte '{}'", pair))
        })
        .collect()
}

/// Loads a types file. Its paths are absolute, also with `--at`.
fn load_field_map(file: Option<&PathBuf>) -> Result<FieldMap>
{
    let file = match file {
        Some(f) => f,
        None => return Ok(FieldMap::new()),
    };

    let json = fs::read_to_string(file)
        .with_context(|| format!("Failed to read types file {}", file.display()))?;
    let map = FieldMap::from_json(&json)
        .with_context(|| format!("Invalid types file {}", file.display()))?;
    debug!(file = %file.display(), "Loaded types file");
    Ok(map)
}

#[cfg(test)]
mod test
{
    use super::*;

    #[test]
    fn hex_input()
    {
        assert_eq!(parse_hex(b"08 96\n01").unwrap(), vec![0x08, 0x96, 0x01]);
        assert_eq!(parse_hex(b"").unwrap(), Vec::<u8>::new());
        assert!(parse_hex(b"089").is_err());
        assert!(parse_hex(b"0g").is_err());
    }
}
