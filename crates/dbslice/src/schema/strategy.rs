//! Declarative read-strategy rules and their resolution into table plans.
//!
//! The schema-rules document maps every table to a rule: `upon_request`
//! (copied only when referenced), `join` (restricted to a parent table's
//! selection), or the name of a filter rule with a WHERE predicate. Rule
//! resolution happens once, up front, and fails fast on any inconsistency.

use crate::error::{Result, SliceError};
use crate::schema::types::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Placeholder substituted with the quoted table name inside predicates.
const TABLE_NAME_PLACEHOLDER: &str = "%table_name%";

/// The schema-rules document: named filter predicates plus one entry per
/// table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRules {
    /// Named, reusable filter predicates.
    #[serde(default)]
    pub rules: HashMap<String, FilterRule>,

    /// Per-table rule assignments.
    pub tables: HashMap<String, TableRule>,
}

/// A named filter predicate for the conditioned strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    /// WHERE predicate; `%table_name%` expands to the quoted table name.
    #[serde(rename = "where")]
    pub predicate: String,
}

/// Rule assignment for a single table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRule {
    /// `upon_request`, `join`, or the name of an entry in `rules`.
    pub rule: String,

    /// Field masks: replacement SQL expression by field name.
    #[serde(default)]
    pub mask: HashMap<String, String>,

    /// Join parent table (join rule only).
    #[serde(default)]
    pub table: Option<String>,

    /// Foreign-key field pointing at the parent (join rule only).
    #[serde(default)]
    pub reference: Option<String>,
}

impl SchemaRules {
    /// Load the rules document from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse the rules document from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: SchemaRules = serde_yaml::from_str(yaml)?;
        Ok(rules)
    }
}

/// Resolved read strategy for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Never scanned directly; rows are fetched only when referenced.
    OnRequest,

    /// Full scan restricted by a WHERE predicate (placeholder expanded).
    Filtered { predicate: String },

    /// Restricted to rows whose `reference` field falls in the parent's
    /// selected key set.
    Joined {
        parent: String,
        reference: String,
        join_column: String,
        /// The parent's own WHERE predicate, when the parent is filtered.
        parent_filter: Option<String>,
    },
}

/// Immutable per-table plan: metadata, resolved strategy, field masks.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: Table,
    pub strategy: ReadStrategy,
    pub mask: HashMap<String, String>,
}

/// Resolve every table's rule into a [`TablePlan`].
///
/// The join configuration must form a DAG: a cycle among join parents is a
/// fatal configuration error even though the underlying foreign-key graph
/// may contain cycles.
pub(crate) fn resolve_plans(
    tables: &HashMap<String, Table>,
    rules: &SchemaRules,
) -> Result<HashMap<String, Arc<TablePlan>>> {
    let mut resolved = HashMap::new();
    let mut names: Vec<&String> = tables.keys().collect();
    names.sort();

    for name in names {
        let mut visiting = Vec::new();
        resolve_one(name, tables, rules, &mut resolved, &mut visiting)?;
    }

    Ok(resolved)
}

fn resolve_one(
    name: &str,
    tables: &HashMap<String, Table>,
    rules: &SchemaRules,
    resolved: &mut HashMap<String, Arc<TablePlan>>,
    visiting: &mut Vec<String>,
) -> Result<Arc<TablePlan>> {
    if let Some(plan) = resolved.get(name) {
        return Ok(plan.clone());
    }
    if visiting.iter().any(|n| n.as_str() == name) {
        return Err(SliceError::config(format!(
            "cyclic join configuration: {} -> {}",
            visiting.join(" -> "),
            name
        )));
    }

    let table = tables
        .get(name)
        .ok_or_else(|| SliceError::config(format!("unknown table '{}'", name)))?;
    let table_rule = rules
        .tables
        .get(name)
        .ok_or_else(|| SliceError::config(format!("no rule provided for table '{}'", name)))?;

    visiting.push(name.to_string());

    let strategy = match table_rule.rule.as_str() {
        "upon_request" => ReadStrategy::OnRequest,
        "join" => {
            let parent = table_rule.table.as_deref().ok_or_else(|| {
                SliceError::config(format!("join rule for table '{}' requires 'table'", name))
            })?;
            let reference = table_rule.reference.as_deref().ok_or_else(|| {
                SliceError::config(format!(
                    "join rule for table '{}' requires 'reference'",
                    name
                ))
            })?;
            let parent_table = tables.get(parent).ok_or_else(|| {
                SliceError::config(format!(
                    "can't join table '{}' with unknown table '{}'",
                    name, parent
                ))
            })?;
            if !table.has_field(reference) {
                return Err(SliceError::config(format!(
                    "table '{}' has no field '{}' to join on",
                    name, reference
                )));
            }

            let parent_plan = resolve_one(parent, tables, rules, resolved, visiting)?;
            let parent_filter = match &parent_plan.strategy {
                ReadStrategy::Filtered { predicate } => Some(predicate.clone()),
                _ => None,
            };

            ReadStrategy::Joined {
                parent: parent.to_string(),
                reference: reference.to_string(),
                join_column: join_column(table, reference, parent_table)?,
                parent_filter,
            }
        }
        rule_name => {
            let filter = rules.rules.get(rule_name).ok_or_else(|| {
                SliceError::config(format!(
                    "unknown rule '{}' for table '{}'",
                    rule_name, name
                ))
            })?;
            let predicate = filter
                .predicate
                .replace(TABLE_NAME_PLACEHOLDER, &format!("`{}`", name));
            ReadStrategy::Filtered { predicate }
        }
    };

    visiting.pop();

    let plan = Arc::new(TablePlan {
        table: table.clone(),
        strategy,
        mask: table_rule.mask.clone(),
    });
    resolved.insert(name.to_string(), plan.clone());
    Ok(plan)
}

/// Determine which parent column the join restricts on: the referenced
/// column of the foreign key when one exists, otherwise the parent's `id`
/// field, otherwise the parent's primary key.
fn join_column(table: &Table, reference: &str, parent: &Table) -> Result<String> {
    if let Some(fk) = table.references.get(reference) {
        return Ok(fk.column.clone());
    }
    if parent.has_field("id") {
        return Ok("id".to_string());
    }
    if parent.primary_key.is_empty() {
        return Err(SliceError::config(format!(
            "join parent '{}' has no primary key",
            parent.name
        )));
    }
    Ok(parent.primary_key.clone())
}
