//! Schema metadata types for tables, fields and foreign-key edges.
//!
//! These types are a snapshot of the source catalog, loaded once at job
//! start and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Semantic field type, reduced from the raw catalog data type.
///
/// Only the distinctions that matter for literal rendering are kept;
/// everything unrecognized falls back to `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Decimal,
    String,
    Date,
    Time,
    DateTime,
    Enum,
}

impl FieldType {
    /// Classify a raw `INFORMATION_SCHEMA` data type.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                FieldType::Integer
            }
            "decimal" | "numeric" | "float" | "double" | "real" => FieldType::Decimal,
            "date" => FieldType::Date,
            "time" => FieldType::Time,
            "datetime" | "timestamp" => FieldType::DateTime,
            "enum" | "set" => FieldType::Enum,
            _ => FieldType::String,
        }
    }
}

/// A single table field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,

    /// Raw catalog data type (e.g. "bigint", "varchar").
    pub data_type: String,

    /// Semantic type used for literal rendering.
    pub ty: FieldType,

    /// Whether the field accepts NULL.
    pub nullable: bool,

    /// Whether the field is the primary key.
    pub primary_key: bool,
}

/// An outgoing foreign-key edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referenced table name.
    pub table: String,

    /// Referenced column name.
    pub column: String,
}

/// Table metadata: ordered fields, primary key, and outgoing references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Fields in catalog order.
    pub fields: Vec<Field>,

    /// Primary-key field name (empty when the table has none).
    pub primary_key: String,

    /// Outgoing foreign keys, keyed by the local field name.
    pub references: HashMap<String, ForeignKeyRef>,

    /// CREATE TABLE DDL as reported by the source.
    #[serde(default)]
    pub create_sql: String,
}

impl Table {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the table has a field with the given name.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Field names in catalog order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// A stored routine (procedure or function) on the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    /// Routine name.
    pub name: String,

    /// "PROCEDURE" or "FUNCTION".
    pub kind: String,

    /// CREATE DDL with the DEFINER clause stripped.
    pub create_sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_classification() {
        assert_eq!(FieldType::from_data_type("bigint"), FieldType::Integer);
        assert_eq!(FieldType::from_data_type("tinyint"), FieldType::Integer);
        assert_eq!(FieldType::from_data_type("decimal"), FieldType::Decimal);
        assert_eq!(FieldType::from_data_type("double"), FieldType::Decimal);
        assert_eq!(FieldType::from_data_type("varchar"), FieldType::String);
        assert_eq!(FieldType::from_data_type("longtext"), FieldType::String);
        assert_eq!(FieldType::from_data_type("date"), FieldType::Date);
        assert_eq!(FieldType::from_data_type("time"), FieldType::Time);
        assert_eq!(FieldType::from_data_type("datetime"), FieldType::DateTime);
        assert_eq!(FieldType::from_data_type("timestamp"), FieldType::DateTime);
        assert_eq!(FieldType::from_data_type("enum"), FieldType::Enum);
        // Unknown types fall back to string rendering
        assert_eq!(FieldType::from_data_type("json"), FieldType::String);
    }
}
