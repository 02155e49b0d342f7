//! Decoding of BigQuery REST values into [`Cell`]s.
//!
//! The REST API returns every scalar as a JSON string (timestamps as fractional epoch
//! seconds, bytes as base64) and wraps repeated and record values in `{"v": ...}` and
//! `{"f": [...]}` objects. Nested values are rebuilt into plain JSON documents using the
//! field schema: records become objects keyed by field name and array elements are decoded
//! with their scalar type.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde_json::{Map, Number, Value};

use crate::bail;
use crate::error::{ErrorKind, ReplicateResult};
use crate::types::{Cell, ColumnType};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Mode of BigQuery fields holding arrays.
const REPEATED_MODE: &str = "REPEATED";

impl ColumnType {
    /// Maps a BigQuery field type name and mode to the column type of the snapshot.
    ///
    /// Repeated fields, records and JSON become [`ColumnType::Json`]. Types without a
    /// native counterpart (geography, interval, range) are kept as text.
    pub fn from_bigquery(type_name: &str, mode: Option<&str>) -> ColumnType {
        if is_repeated(mode) {
            return ColumnType::Json;
        }

        match type_name.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => ColumnType::Bool,
            "INT64" | "INTEGER" => ColumnType::Int64,
            "FLOAT64" | "FLOAT" => ColumnType::Float64,
            "NUMERIC" | "BIGNUMERIC" => ColumnType::Numeric,
            "STRING" => ColumnType::String,
            "BYTES" => ColumnType::Bytes,
            "DATE" => ColumnType::Date,
            "TIME" => ColumnType::Time,
            "DATETIME" => ColumnType::DateTime,
            "TIMESTAMP" => ColumnType::Timestamp,
            "JSON" | "RECORD" | "STRUCT" => ColumnType::Json,
            _ => ColumnType::String,
        }
    }
}

fn is_repeated(mode: Option<&str>) -> bool {
    mode.is_some_and(|mode| mode.eq_ignore_ascii_case(REPEATED_MODE))
}

/// Decodes the REST values of one BigQuery field, following its nested schema.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDecoder {
    /// A scalar stored in a column of its own type.
    Scalar(ColumnType),
    /// A `JSON` field, delivered as a serialized document.
    Json,
    /// A `RECORD` or `STRUCT` field with its named sub-fields in schema order.
    Record(Vec<(String, FieldDecoder)>),
    /// A `REPEATED` field of the given element type.
    Repeated(Box<FieldDecoder>),
}

impl FieldDecoder {
    /// Builds the decoder of a field from its type name, mode and already built sub-fields.
    pub fn from_bigquery(
        type_name: &str,
        mode: Option<&str>,
        fields: Vec<(String, FieldDecoder)>,
    ) -> FieldDecoder {
        let element = match type_name.to_ascii_uppercase().as_str() {
            "JSON" => FieldDecoder::Json,
            "RECORD" | "STRUCT" => FieldDecoder::Record(fields),
            _ => FieldDecoder::Scalar(ColumnType::from_bigquery(type_name, None)),
        };

        if is_repeated(mode) {
            FieldDecoder::Repeated(Box::new(element))
        } else {
            element
        }
    }

    /// The column type values of this field are stored as.
    pub fn column_type(&self) -> ColumnType {
        match self {
            FieldDecoder::Scalar(typ) => *typ,
            _ => ColumnType::Json,
        }
    }

    /// Decodes one top level cell of this field.
    pub fn decode(&self, value: Option<&Value>) -> ReplicateResult<Cell> {
        match (self, value) {
            (FieldDecoder::Scalar(typ), _) => parse_cell(*typ, value),
            (_, None | Some(Value::Null)) => Ok(Cell::Null),
            (_, Some(value)) => Ok(Cell::Json(self.to_json(value)?)),
        }
    }

    fn to_json(&self, value: &Value) -> ReplicateResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            FieldDecoder::Scalar(typ) => Ok(scalar_to_json(parse_cell(*typ, Some(value))?)),
            FieldDecoder::Json => Ok(json_document(value)),
            FieldDecoder::Record(fields) => {
                let Some(Value::Array(cells)) = value.get("f") else {
                    bail!(ErrorKind::InvalidData, "Expected a BigQuery record value", value);
                };
                if cells.len() != fields.len() {
                    bail!(
                        ErrorKind::InvalidData,
                        "BigQuery record does not match its schema",
                        format!("expected {} fields, got {}", fields.len(), cells.len())
                    );
                }

                let mut object = Map::with_capacity(fields.len());
                for ((name, decoder), cell) in fields.iter().zip(cells) {
                    object.insert(name.clone(), decoder.to_json(envelope_value(cell))?);
                }

                Ok(Value::Object(object))
            }
            FieldDecoder::Repeated(element) => {
                let Value::Array(items) = value else {
                    bail!(ErrorKind::InvalidData, "Expected a BigQuery array value", value);
                };

                items
                    .iter()
                    .map(|item| element.to_json(envelope_value(item)))
                    .collect::<ReplicateResult<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }
}

/// Returns the payload of a `{"v": ...}` wrapper.
fn envelope_value(cell: &Value) -> &Value {
    cell.get("v").unwrap_or(cell)
}

/// Renders a decoded scalar inside a JSON document.
///
/// Numbers and booleans become JSON literals. Numerics stay strings to keep their precision
/// and temporal values use their ISO 8601 form.
fn scalar_to_json(cell: Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Bool(value),
        Cell::I64(value) => Value::from(value),
        Cell::F64(value) => Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string())),
        Cell::Numeric(value) | Cell::String(value) => Value::String(value),
        Cell::Bytes(value) => Value::String(BASE64_STANDARD.encode(value)),
        Cell::Date(value) => Value::String(value.format(DATE_FORMAT).to_string()),
        Cell::Time(value) => Value::String(value.format(TIME_FORMAT).to_string()),
        Cell::DateTime(value) => Value::String(value.format(DATETIME_FORMATS[0]).to_string()),
        Cell::Timestamp(value) => Value::String(value.to_rfc3339_opts(SecondsFormat::Micros, true)),
        Cell::Json(value) => value,
    }
}

/// Decodes one BigQuery cell value into a [`Cell`] of type `typ`.
pub fn parse_cell(typ: ColumnType, value: Option<&Value>) -> ReplicateResult<Cell> {
    let value = match value {
        None | Some(Value::Null) => return Ok(Cell::Null),
        Some(value) => value,
    };

    if typ == ColumnType::Json {
        return Ok(Cell::Json(json_document(value)));
    }

    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Bool(b) => return parse_scalar(typ, if *b { "true" } else { "false" }),
        Value::Number(n) => return parse_scalar(typ, &n.to_string()),
        other => {
            bail!(
                ErrorKind::InvalidData,
                "Unexpected nested value for a scalar column",
                other
            )
        }
    };

    parse_scalar(typ, text)
}

fn parse_scalar(typ: ColumnType, text: &str) -> ReplicateResult<Cell> {
    let cell = match typ {
        ColumnType::Bool => match text.to_ascii_lowercase().as_str() {
            "true" => Cell::Bool(true),
            "false" => Cell::Bool(false),
            _ => bail!(ErrorKind::ConversionError, "Invalid boolean value", text),
        },
        ColumnType::Int64 => match text.parse() {
            Ok(i) => Cell::I64(i),
            Err(err) => bail!(ErrorKind::ConversionError, "Invalid integer value", err),
        },
        ColumnType::Float64 => match text.parse() {
            Ok(f) => Cell::F64(f),
            Err(err) => bail!(ErrorKind::ConversionError, "Invalid float value", err),
        },
        ColumnType::Numeric => Cell::Numeric(text.to_string()),
        ColumnType::String => Cell::String(text.to_string()),
        ColumnType::Bytes => match BASE64_STANDARD.decode(text) {
            Ok(bytes) => Cell::Bytes(bytes),
            Err(err) => bail!(ErrorKind::ConversionError, "Invalid base64 bytes value", err),
        },
        ColumnType::Date => match NaiveDate::parse_from_str(text, DATE_FORMAT) {
            Ok(date) => Cell::Date(date),
            Err(err) => bail!(ErrorKind::ConversionError, "Invalid date value", err),
        },
        ColumnType::Time => match NaiveTime::parse_from_str(text, TIME_FORMAT) {
            Ok(time) => Cell::Time(time),
            Err(err) => bail!(ErrorKind::ConversionError, "Invalid time value", err),
        },
        ColumnType::DateTime => Cell::DateTime(parse_datetime(text)?),
        ColumnType::Timestamp => Cell::Timestamp(parse_timestamp(text)?),
        ColumnType::Json => Cell::Json(json_document(&Value::String(text.to_string()))),
    };

    Ok(cell)
}

fn parse_datetime(text: &str) -> ReplicateResult<NaiveDateTime> {
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(datetime);
        }
    }

    bail!(ErrorKind::ConversionError, "Invalid datetime value", text)
}

/// Parses fractional seconds since the epoch, e.g. `1.700000000123456E9`.
fn parse_timestamp(text: &str) -> ReplicateResult<DateTime<chrono::Utc>> {
    let seconds: f64 = match text.parse() {
        Ok(seconds) => seconds,
        Err(err) => bail!(ErrorKind::ConversionError, "Invalid timestamp value", err),
    };

    // Microseconds are the finest precision BigQuery stores.
    let micros = (seconds * 1_000_000.0).round() as i64;
    match DateTime::from_timestamp_micros(micros) {
        Some(timestamp) => Ok(timestamp),
        None => bail!(ErrorKind::ConversionError, "Timestamp out of range", text),
    }
}

/// Decodes a JSON document that arrives serialized as a string. Anything that does not
/// parse is kept as a JSON string.
fn json_document(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        other => other.clone(),
    }
}
