// 🧽 Response Shaper - the single normalization boundary
//
// Everything the warehouse hands back passes through here exactly once:
// - column names → snake_case field names (via the table's schema adapter)
// - integers, reals and exact decimals → native f64
// - integer keys (schema identifier columns) stay exact integers
// - booleans stay booleans, nulls stay null
// No driver type survives past this module.

use crate::error::{AnalyticsError, Result};
use crate::schema::TableSchema;
use chrono::NaiveDate;
use serde_json::{Map, Number, Value};

// ============================================================================
// RAW (DRIVER-LEVEL) VALUES
// ============================================================================

/// A single value as the storage driver returns it
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    /// Exact fixed-point number carried as text (e.g. "1234.50")
    Decimal(String),
    Text(String),
}

impl From<rusqlite::types::Value> for Cell {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value as V;
        match value {
            V::Null => Cell::Null,
            V::Integer(i) => Cell::Integer(i),
            V::Real(r) => Cell::Real(r),
            V::Text(s) => Cell::Text(s),
            V::Blob(bytes) => Cell::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

impl From<Option<i64>> for Cell {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Cell::Null, Cell::Integer)
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map_or(Cell::Null, Cell::Text)
    }
}

impl From<Option<NaiveDate>> for Cell {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map_or(Cell::Null, |d| Cell::Text(d.format("%Y-%m-%d").to_string()))
    }
}

/// A row as the storage driver returns it: ordered, mixed-case column names
pub type RawRow = Vec<(String, Cell)>;

/// A row after normalization: snake_case keys, JSON-safe values
pub type NormalizedRow = Map<String, Value>;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Convert one driver value into a JSON-safe value
pub fn normalize_cell(column: &str, cell: Cell) -> Result<Value> {
    match cell {
        Cell::Null => Ok(Value::Null),
        Cell::Bool(b) => Ok(Value::Bool(b)),
        Cell::Integer(i) => float_value(column, i as f64),
        Cell::Real(r) => float_value(column, r),
        Cell::Decimal(text) => {
            let parsed: f64 = text.trim().parse().map_err(|_| {
                AnalyticsError::aggregation(format!(
                    "column {} holds a malformed decimal '{}'",
                    column, text
                ))
            })?;
            float_value(column, parsed)
        }
        Cell::Text(s) => Ok(Value::String(s)),
    }
}

fn float_value(column: &str, value: f64) -> Result<Value> {
    Number::from_f64(value).map(Value::Number).ok_or_else(|| {
        AnalyticsError::aggregation(format!("column {} holds a non-finite number", column))
    })
}

/// Normalize a raw row against its table schema
pub fn normalize_row(row: RawRow, schema: &TableSchema) -> Result<NormalizedRow> {
    let mut out = Map::with_capacity(row.len());
    for (column, cell) in row {
        let value = match cell {
            Cell::Integer(i) if schema.is_identifier(&column) => Value::from(i),
            cell => normalize_cell(&column, cell)?,
        };
        out.insert(schema.field_for(&column), value);
    }
    Ok(out)
}

/// Shape any serializable aggregate into a plain JSON mapping
pub fn to_mapping<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AnalyticsError::aggregation(format!("result not serializable: {}", e)))
}

// ============================================================================
// FIELD ACCESS (used when building typed records from normalized rows)
// ============================================================================

fn field<'a>(row: &'a NormalizedRow, name: &str) -> Result<&'a Value> {
    row.get(name)
        .ok_or_else(|| AnalyticsError::aggregation(format!("record is missing field '{}'", name)))
}

pub fn opt_f64(row: &NormalizedRow, name: &str) -> Result<Option<f64>> {
    match field(row, name)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(AnalyticsError::aggregation(format!(
            "field '{}' should be numeric, found {}",
            name, other
        ))),
    }
}

/// Integer-valued field; a fractional value is a shape error
pub fn opt_i64(row: &NormalizedRow, name: &str) -> Result<Option<i64>> {
    if let Value::Number(n) = field(row, name)? {
        if let Some(i) = n.as_i64() {
            return Ok(Some(i));
        }
    }
    match opt_f64(row, name)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 => Ok(Some(v as i64)),
        Some(v) => Err(AnalyticsError::aggregation(format!(
            "field '{}' should be a whole number, found {}",
            name, v
        ))),
    }
}

/// Text field; numbers are rendered as text (opaque identifiers)
pub fn opt_string(row: &NormalizedRow, name: &str) -> Result<Option<String>> {
    match field(row, name)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(v)) if v.fract() == 0.0 => format!("{}", v as i64),
            _ => n.to_string(),
        })),
        other => Err(AnalyticsError::aggregation(format!(
            "field '{}' should be text, found {}",
            name, other
        ))),
    }
}

/// Date field stored as `YYYY-MM-DD` (a trailing time part is ignored)
pub fn opt_date(row: &NormalizedRow, name: &str) -> Result<Option<NaiveDate>> {
    match opt_string(row, name)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => {
            let day = s.trim().get(..10).unwrap_or(s.trim());
            NaiveDate::parse_from_str(day, "%Y-%m-%d").map(Some).map_err(|_| {
                AnalyticsError::aggregation(format!("field '{}' holds a malformed date '{}'", name, s))
            })
        }
    }
}
