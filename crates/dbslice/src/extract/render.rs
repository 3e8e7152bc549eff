//! Literal rendering of extracted values.
//!
//! Rows are written to the destination as pre-rendered SQL value tuples, so
//! every source value is cast to a literal textual form here, once, at read
//! time. Rendering is driven by the declared semantic type, not the runtime
//! value, so masked fields render the same way as the field they replace.

use crate::error::{Result, SliceError};
use crate::schema::{Field, FieldType, Table};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// A decoded scalar value from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl Scalar {
    /// Plain string form used for frontier keys and reference values.
    pub fn key_string(&self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Decimal(v) => v.to_string(),
            Scalar::Text(v) => v.clone(),
            Scalar::Date(v) => v.format("%Y-%m-%d").to_string(),
            Scalar::Time(v) => v.format("%H:%M:%S").to_string(),
            Scalar::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render a string as a double-quoted, backslash-escaped MySQL literal.
pub fn string_literal(value: &str) -> String {
    format!(
        "\"{}\"",
        value.replace('\\', "\\\\").replace('"', "\\\"")
    )
}

/// Render a primary-key value for use inside an IN (...) list: numeric keys
/// stay bare, everything else is quoted.
pub fn key_literal(key: &str) -> String {
    if key.parse::<i64>().is_ok() {
        key.to_string()
    } else {
        string_literal(key)
    }
}

/// Render one field value as a SQL literal.
///
/// An absent value becomes NULL only when the field is nullable; absent
/// date/time values in NOT NULL fields fall back to zero-date sentinels
/// (MySQL zero dates do not survive decoding, so this also restores them).
/// An absent value in any other NOT NULL field is an extraction error.
pub fn render_field(field: &Field, value: Option<&Scalar>) -> Result<String> {
    let Some(value) = value else {
        if field.nullable {
            return Ok("NULL".to_string());
        }
        return match field.ty {
            FieldType::Date => Ok("\"0000-00-00\"".to_string()),
            FieldType::Time => Ok("\"00:00:00\"".to_string()),
            FieldType::DateTime => Ok("\"0000-00-00 00:00:00\"".to_string()),
            _ => Err(SliceError::schema(format!(
                "unexpected NULL in non-nullable field '{}'",
                field.name
            ))),
        };
    };

    Ok(match value {
        Scalar::Int(v) => v.to_string(),
        Scalar::Float(v) => v.to_string(),
        Scalar::Decimal(v) => v.to_string(),
        Scalar::Text(v) => string_literal(v),
        Scalar::Date(v) => format!("\"{}\"", v.format("%Y-%m-%d")),
        Scalar::Time(v) => format!("\"{}\"", v.format("%H:%M:%S")),
        Scalar::DateTime(v) => format!("\"{}\"", v.format("%Y-%m-%d %H:%M:%S")),
    })
}

/// Build the SELECT list for a table: fields in catalog order, with masked
/// fields replaced by their configured expression aliased back to the
/// original name.
pub fn select_list(table: &Table, mask: &HashMap<String, String>) -> String {
    table
        .fields
        .iter()
        .map(|f| match mask.get(&f.name) {
            Some(expr) => format!("{} AS {}", expr, quote_ident(&f.name)),
            None => quote_ident(&f.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
