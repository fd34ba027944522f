//! Row decoding
//!
//! BigQuery returns every cell as a JSON string (or null) next to a schema.
//! This module turns that into typed `Column`s and `CellValue`s.

use chamado_core::{CellValue, Column, ColumnType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::error::{RunError, RunResult};

/// `schema` object of a query response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }
}

/// One entry of `rows`: `{"f": [{"v": ...}, ...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub f: Vec<RawCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

/// Map an engine type name (legacy or standard SQL spelling) to a column type.
pub fn column_type(engine_type: &str) -> ColumnType {
    match engine_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => ColumnType::Integer,
        "FLOAT" | "FLOAT64" => ColumnType::Float,
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => ColumnType::Decimal,
        "BOOLEAN" | "BOOL" => ColumnType::Boolean,
        "DATE" => ColumnType::Date,
        "TIMESTAMP" => ColumnType::Timestamp,
        _ => ColumnType::Text,
    }
}

pub fn decode_columns(schema: &TableSchema) -> Vec<Column> {
    schema
        .fields
        .iter()
        .map(|f| {
            let ty = if f.is_repeated() {
                ColumnType::Text
            } else {
                column_type(&f.field_type)
            };
            Column::new(f.name.clone(), ty)
        })
        .collect()
}

/// Decode raw rows against the schema.
pub fn decode_rows(schema: &TableSchema, rows: &[RawRow]) -> RunResult<Vec<Vec<CellValue>>> {
    let columns = decode_columns(schema);
    rows.iter()
        .map(|row| {
            if row.f.len() != columns.len() {
                return Err(RunError::transport(format!(
                    "row has {} cells, schema has {} fields",
                    row.f.len(),
                    columns.len()
                )));
            }
            row.f
                .iter()
                .zip(&columns)
                .map(|(cell, column)| decode_cell(&cell.v, column.column_type))
                .collect()
        })
        .collect()
}

/// Decode one cell value.
pub fn decode_cell(value: &serde_json::Value, column_type: ColumnType) -> RunResult<CellValue> {
    let raw = match value {
        serde_json::Value::Null => return Ok(CellValue::Null),
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Bool(b) => return Ok(CellValue::Bool(*b)),
        other => return Ok(CellValue::Text(other.to_string())),
    };

    let bad = |what: &str| RunError::transport(format!("cannot decode {:?} as {}", raw, what));

    let cell = match column_type {
        ColumnType::Integer => CellValue::Int(raw.parse::<i64>().map_err(|_| bad("integer"))?),
        ColumnType::Float => CellValue::Float(parse_float(raw).ok_or_else(|| bad("float"))?),
        ColumnType::Decimal => CellValue::Decimal(raw.to_string()),
        ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            _ => return Err(bad("boolean")),
        },
        ColumnType::Date => CellValue::Date(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| bad("date"))?,
        ),
        ColumnType::Timestamp => {
            CellValue::Timestamp(parse_timestamp(raw).ok_or_else(|| bad("timestamp"))?)
        }
        ColumnType::Text => CellValue::Text(raw.to_string()),
    };
    Ok(cell)
}

fn parse_float(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => raw.parse::<f64>().ok(),
    }
}

/// Timestamps arrive as (possibly scientific) epoch seconds, e.g. `1.7327808E9`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let seconds = raw.parse::<f64>().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros)
}
