//! Adapter for an external `find`-style matcher program.
//!
//! The program is invoked as
//! `<argv..> --img-path Q --db-path DB --model-name M --detector-backend D --enforce-detection B`
//! and must print its result table(s) as JSON on stdout. Accepted shapes:
//!
//! - a list of row objects: `[{"identity": "db/alice.jpg", "distance": 0.31}, ...]`
//! - a column table: `{"identity": ["db/alice.jpg"], "Facenet_cosine": [0.31]}`,
//!   where a column may also be an index-keyed object (`{"0": ...}`)
//! - a list of either of the above, of which only the first table is used.
//!
//! Rows are expected best-first.

use std::path::PathBuf;
use std::process::Command;

use serde_json::{Map, Value};

use super::{Candidate, Distance, FaceMatcher, MatchOutcome, MatchQuery, MatcherError, Metric};
use crate::store::label_from_path;

#[derive(Debug, Clone)]
pub struct CommandMatcher {
    program: String,
    args: Vec<String>,
}

impl CommandMatcher {
    pub fn new(argv: &[String]) -> Result<Self, MatcherError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MatcherError::Unsupported("empty matcher command".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command(&self, query: &MatchQuery<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--img-path")
            .arg(query.image)
            .arg("--db-path")
            .arg(query.store)
            .arg("--model-name")
            .arg(query.model)
            .arg("--detector-backend")
            .arg(query.detector)
            .arg("--enforce-detection")
            .arg(query.enforce_detection.to_string());
        cmd
    }
}

impl FaceMatcher for CommandMatcher {
    fn find(&self, query: &MatchQuery<'_>) -> Result<MatchOutcome, MatcherError> {
        log::debug!(
            "running {} on {} against {}",
            self.program,
            query.image.display(),
            query.store.display()
        );
        let output = self
            .command(query)
            .output()
            .map_err(|source| MatcherError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MatcherError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_find_output(&stdout)
    }
}

/// Reduce a matcher's JSON output to its top-ranked candidate.
pub fn parse_find_output(raw: &str) -> Result<MatchOutcome, MatcherError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| MatcherError::Output(e.to_string()))?;
    let table = first_table(&value)?;
    let Some(row) = top_row(table)? else {
        return Ok(MatchOutcome::none());
    };

    let identity = row
        .get("identity")
        .and_then(Value::as_str)
        .ok_or_else(|| MatcherError::Output("top row has no identity".into()))?;
    let identity = PathBuf::from(identity);
    let label = label_from_path(&identity)
        .ok_or_else(|| MatcherError::Output(format!("no label in identity {identity:?}")))?;

    let distance = row
        .iter()
        .find_map(|(name, value)| Some((Metric::from_column(name)?, name, value)))
        .map(|(metric, name, value)| {
            distance_value(value)
                .map(|value| Distance { metric, value })
                .ok_or_else(|| {
                    MatcherError::Output(format!(
                        "column {name} holds {}, not a distance",
                        kind(value)
                    ))
                })
        })
        .transpose()?;

    Ok(MatchOutcome {
        top: Some(Candidate {
            label,
            identity,
            distance,
        }),
    })
}

/// pandas serialises NaN as `null`; keep it as NaN so it never passes a
/// threshold.
fn distance_value(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(f64::NAN),
        other => other.as_f64(),
    }
}

fn is_table(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .get("identity")
            .map_or(false, |v| v.is_array() || v.is_object()),
        _ => false,
    }
}

/// Unwrap a list of tables down to the first one.
fn first_table(value: &Value) -> Result<&Value, MatcherError> {
    match value {
        Value::Array(items) => match items.first() {
            Some(first @ Value::Array(_)) => Ok(first),
            Some(first) if is_table(first) => Ok(first),
            _ => Ok(value),
        },
        Value::Object(_) => Ok(value),
        other => Err(MatcherError::Output(format!(
            "expected a table, got {}",
            kind(other)
        ))),
    }
}

fn top_row(table: &Value) -> Result<Option<Map<String, Value>>, MatcherError> {
    match table {
        Value::Array(rows) => match rows.first() {
            None => Ok(None),
            Some(Value::Object(row)) => Ok(Some(row.clone())),
            Some(other) => Err(MatcherError::Output(format!(
                "expected a row object, got {}",
                kind(other)
            ))),
        },
        Value::Object(columns) => {
            let mut row = Map::new();
            for (name, column) in columns {
                if let Some(cell) = first_cell(column) {
                    row.insert(name.clone(), cell.clone());
                }
            }
            Ok(row.get("identity").is_some().then_some(row))
        }
        other => Err(MatcherError::Output(format!(
            "expected a table, got {}",
            kind(other)
        ))),
    }
}

fn first_cell(column: &Value) -> Option<&Value> {
    match column {
        Value::Array(cells) => cells.first(),
        // pandas "columns" orient: {"0": v0, "1": v1, ...}
        Value::Object(cells) => cells
            .iter()
            .filter_map(|(k, v)| k.parse::<u64>().ok().map(|i| (i, v)))
            .min_by_key(|(i, _)| *i)
            .map(|(_, v)| v),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
