use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt;

/// Column types a [`TableSnapshot`] can carry.
///
/// Each variant maps to exactly one Postgres column type, see [`ColumnType::postgres_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    Numeric,
    String,
    Bytes,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
}

impl ColumnType {
    /// Returns the Postgres type used when creating the destination column.
    pub fn postgres_type(&self) -> &'static str {
        match self {
            ColumnType::Bool => "boolean",
            ColumnType::Int64 => "bigint",
            ColumnType::Float64 => "double precision",
            ColumnType::Numeric => "numeric",
            ColumnType::String => "text",
            ColumnType::Bytes => "bytea",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::DateTime => "timestamp",
            ColumnType::Timestamp => "timestamptz",
            ColumnType::Json => "jsonb",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.postgres_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// A single decoded value of a source row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    /// Kept as text so that no precision is lost on the way to a `numeric` column.
    Numeric(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }
}

/// The complete in-memory copy of one source table.
///
/// A snapshot is fully materialized before anything is written to the destination and is
/// dropped as soon as the table has been copied.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub name: String,
    pub column_schemas: Vec<ColumnSchema>,
    pub rows: Vec<TableRow>,
}

impl TableSnapshot {
    pub fn new(name: impl Into<String>, column_schemas: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            column_schemas,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<TableRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}
