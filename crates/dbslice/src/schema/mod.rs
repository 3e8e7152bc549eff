//! Schema registry: source catalog introspection and read-strategy plans.

mod strategy;
mod types;

pub use strategy::{FilterRule, ReadStrategy, SchemaRules, TablePlan, TableRule};
pub use types::{Field, FieldType, ForeignKeyRef, Routine, Table};

use crate::error::{Result, SliceError};
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row as _;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable snapshot of the source schema plus one resolved read plan per
/// table. Built once at job start.
pub struct SchemaRegistry {
    tables: HashMap<String, Table>,
    routines: Vec<Routine>,
    plans: HashMap<String, Arc<TablePlan>>,
}

impl SchemaRegistry {
    /// Load table metadata, foreign-key edges and DDL from the source
    /// catalog and resolve each table's read strategy.
    pub async fn load(pool: &MySqlPool, database: &str, rules: &SchemaRules) -> Result<Self> {
        let names = load_table_names(pool, database).await?;

        let mut tables = HashMap::new();
        for name in names {
            let (fields, primary_key) = load_fields(pool, database, &name).await?;
            let references = load_references(pool, database, &name).await?;
            let create_sql = load_create_sql(pool, &name).await?;
            tables.insert(
                name.clone(),
                Table {
                    name,
                    fields,
                    primary_key,
                    references,
                    create_sql,
                },
            );
        }

        let routines = load_routines(pool, database).await?;

        info!(
            "Loaded {} tables and {} routines from '{}'",
            tables.len(),
            routines.len(),
            database
        );

        Self::from_parts(tables, routines, rules)
    }

    /// Build a registry from pre-loaded metadata. Strategy resolution and
    /// its failure modes behave exactly as in [`SchemaRegistry::load`].
    pub fn from_parts(
        tables: HashMap<String, Table>,
        routines: Vec<Routine>,
        rules: &SchemaRules,
    ) -> Result<Self> {
        let plans = strategy::resolve_plans(&tables, rules)?;
        Ok(Self {
            tables,
            routines,
            plans,
        })
    }

    /// The resolved plan for a table.
    pub fn plan(&self, table: &str) -> Result<Arc<TablePlan>> {
        self.plans
            .get(table)
            .cloned()
            .ok_or_else(|| SliceError::config(format!("unknown table '{}'", table)))
    }

    /// Table metadata by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// All known table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the registry knows the table.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// All table metadata entries.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Stored routines captured from the source.
    pub fn routines(&self) -> &[Routine] {
        &self.routines
    }
}

async fn load_table_names(pool: &MySqlPool, database: &str) -> Result<Vec<String>> {
    // CAST to CHAR to handle collation differences where information_schema
    // may return VARBINARY instead of VARCHAR
    let query = r#"
        SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query).bind(database).fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("TABLE_NAME"))
        .collect())
}

async fn load_fields(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<(Vec<Field>, String)> {
    let query = r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
            CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
            CAST(COLUMN_KEY AS CHAR(16)) AS COLUMN_KEY,
            IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query)
        .bind(database)
        .bind(table)
        .fetch_all(pool)
        .await?;

    if rows.is_empty() {
        return Err(SliceError::schema(format!(
            "table '{}' has no fields",
            table
        )));
    }

    let mut fields = Vec::with_capacity(rows.len());
    let mut primary_key = String::new();

    for row in rows {
        let name: String = row.get("COLUMN_NAME");
        let data_type: String = row.get("DATA_TYPE");
        let key: String = row.get("COLUMN_KEY");
        let nullable: i32 = row.get("is_nullable");
        let is_primary = key == "PRI";

        if is_primary && primary_key.is_empty() {
            primary_key = name.clone();
        }

        fields.push(Field {
            ty: FieldType::from_data_type(&data_type),
            name,
            data_type,
            nullable: nullable == 1,
            primary_key: is_primary,
        });
    }

    debug!("Loaded {} fields for {}", fields.len(), table);
    Ok((fields, primary_key))
}

async fn load_references(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<HashMap<String, ForeignKeyRef>> {
    let query = r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
            CAST(REFERENCED_TABLE_NAME AS CHAR(255)) AS REFERENCED_TABLE_NAME,
            CAST(REFERENCED_COLUMN_NAME AS CHAR(255)) AS REFERENCED_COLUMN_NAME
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
          AND REFERENCED_TABLE_NAME IS NOT NULL
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query)
        .bind(database)
        .bind(table)
        .fetch_all(pool)
        .await?;

    let mut references = HashMap::new();
    for row in rows {
        let field: String = row.get("COLUMN_NAME");
        references.insert(
            field,
            ForeignKeyRef {
                table: row.get("REFERENCED_TABLE_NAME"),
                column: row.get("REFERENCED_COLUMN_NAME"),
            },
        );
    }

    debug!("Loaded {} foreign keys for {}", references.len(), table);
    Ok(references)
}

async fn load_create_sql(pool: &MySqlPool, table: &str) -> Result<String> {
    let sql = format!("SHOW CREATE TABLE `{}`", table.replace('`', "``"));
    let row: MySqlRow = sqlx::query(&sql).fetch_one(pool).await?;
    // Column 0 is the table name, column 1 the DDL.
    Ok(row.try_get::<String, _>(1)?)
}

async fn load_routines(pool: &MySqlPool, database: &str) -> Result<Vec<Routine>> {
    let query = r#"
        SELECT
            CAST(ROUTINE_NAME AS CHAR(255)) AS ROUTINE_NAME,
            CAST(ROUTINE_TYPE AS CHAR(16)) AS ROUTINE_TYPE
        FROM INFORMATION_SCHEMA.ROUTINES
        WHERE ROUTINE_SCHEMA = ?
        ORDER BY ROUTINE_NAME
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query).bind(database).fetch_all(pool).await?;

    let mut routines = Vec::new();
    for row in rows {
        let name: String = row.get("ROUTINE_NAME");
        let kind: String = row.get("ROUTINE_TYPE");

        let show = format!("SHOW CREATE {} `{}`", kind, name.replace('`', "``"));
        let ddl_row: MySqlRow = sqlx::query(&show).fetch_one(pool).await?;
        // Column 2 holds the CREATE statement; NULL without SHOW privileges.
        let create_sql: Option<String> = ddl_row.try_get(2)?;
        let create_sql = create_sql.ok_or_else(|| {
            SliceError::schema(format!("missing CREATE statement for routine '{}'", name))
        })?;

        routines.push(Routine {
            name,
            kind,
            create_sql: strip_definer(&create_sql),
        });
    }

    Ok(routines)
}

/// Remove the DEFINER clause from routine DDL so it can be replayed under
/// the destination user.
fn strip_definer(sql: &str) -> String {
    match sql.find("DEFINER=") {
        Some(start) => {
            let rest = &sql[start..];
            let end = rest
                .find(char::is_whitespace)
                .map(|i| start + i + 1)
                .unwrap_or(sql.len());
            format!("{}{}", &sql[..start], &sql[end..])
        }
        None => sql.to_string(),
    }
}
