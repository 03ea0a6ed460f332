//! Comparison of a live database schema with the schema declared by the migration chain.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::model::{
    migration::SchemaState,
    schema::{ColumnDef, ColumnType},
};

/**
 * A column as reported by `information_schema.columns`.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub data_type: String,
    pub nullable: bool,
    pub character_maximum_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    /**
     * Default expression as PostgreSQL renders it, e.g. `'US'::character varying`.
     */
    pub default: Option<String>,
}

impl LiveColumn {
    /**
     * Creates a column without size or default.
     */
    pub fn new(data_type: &str, nullable: bool) -> Self {
        LiveColumn { data_type: data_type.to_string(), nullable, character_maximum_length: None, numeric_precision: None, numeric_scale: None, default: None }
    }

    fn size_sql(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::VarChar(_) => match self.character_maximum_length {
                Some(length) => format!("VARCHAR({length})"),
                None => "VARCHAR".to_string(),
            },
            ColumnType::Numeric { .. } => match (self.numeric_precision, self.numeric_scale) {
                (Some(precision), Some(scale)) => format!("NUMERIC({precision}, {scale})"),
                _ => "NUMERIC".to_string(),
            },
            _ => self.data_type.clone(),
        }
    }
}

/**
 * A single-column foreign key as read from `pg_constraint`.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveForeignKey {
    pub table: String,
    pub column: String,
    /**
     * Delete rule rendered as in DDL, e.g. `CASCADE` or `NO ACTION`.
     */
    pub on_delete: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTable {
    pub columns: BTreeMap<String, LiveColumn>,
    pub indexes: BTreeSet<String>,
    pub unique: BTreeSet<String>,
    /**
     * Foreign keys by referencing column.
     */
    pub foreign_keys: BTreeMap<String, LiveForeignKey>,
}

/**
 * Tables, columns, indexes, uniqueness constraints and foreign keys read from a database catalog.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSchema {
    pub tables: BTreeMap<String, LiveTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SchemaDifference {
    MissingTable { table: String },
    UnexpectedTable { table: String },
    MissingColumn { table: String, column: String },
    UnexpectedColumn { table: String, column: String },
    ColumnType { table: String, column: String, expected: String, actual: String },
    ColumnSize { table: String, column: String, expected: String, actual: String },
    ColumnDefault { table: String, column: String, expected: Option<String>, actual: Option<String> },
    Nullability { table: String, column: String, expected_nullable: bool },
    MissingIndex { table: String, index: String },
    MissingUnique { table: String, constraint: String },
    MissingForeignKey { table: String, column: String, references: String },
    ForeignKeyOnDelete { table: String, column: String, expected: String, actual: String },
}

impl fmt::Display for SchemaDifference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemaDifference::MissingTable { table } => write!(f, "table {table} is missing"),
            SchemaDifference::UnexpectedTable { table } => write!(f, "table {table} is not part of the schema"),
            SchemaDifference::MissingColumn { table, column } => write!(f, "column {table}.{column} is missing"),
            SchemaDifference::UnexpectedColumn { table, column } => write!(f, "column {table}.{column} is not part of the schema"),
            SchemaDifference::ColumnType { table, column, expected, actual } => write!(f, "column {table}.{column} has type {actual}, expected {expected}"),
            SchemaDifference::ColumnSize { table, column, expected, actual } => write!(f, "column {table}.{column} is {actual}, expected {expected}"),
            SchemaDifference::ColumnDefault { table, column, expected, actual } => write!(
                f,
                "column {table}.{column} has default {}, expected {}",
                actual.as_deref().unwrap_or("none"),
                expected.as_deref().unwrap_or("none")
            ),
            SchemaDifference::Nullability { table, column, expected_nullable } => {
                let expected = if *expected_nullable { "nullable" } else { "not null" };
                write!(f, "column {table}.{column} should be {expected}")
            }
            SchemaDifference::MissingIndex { table, index } => write!(f, "index {index} on {table} is missing"),
            SchemaDifference::MissingUnique { table, constraint } => write!(f, "unique constraint {constraint} on {table} is missing"),
            SchemaDifference::MissingForeignKey { table, column, references } => write!(f, "foreign key {table}.{column} -> {references} is missing"),
            SchemaDifference::ForeignKeyOnDelete { table, column, expected, actual } => write!(f, "foreign key {table}.{column} is ON DELETE {actual}, expected ON DELETE {expected}"),
        }
    }
}

/**
 * Lists every difference between the declared and the live schema.
 *
 * # Arguments
 * `expected`: Schema declared by the migration chain.
 * `live`: Schema read from the database.
 * `ignored_tables`: Live tables that are not part of the declared schema on purpose, e.g. the migration ledger.
 *
 * # Returns
 * The differences, empty when the live schema matches.
 */
pub fn compare(expected: &SchemaState, live: &LiveSchema, ignored_tables: &[&str]) -> Vec<SchemaDifference> {
    let mut differences = Vec::new();
    for (name, table) in &expected.tables {
        let Some(live_table) = live.tables.get(*name) else {
            differences.push(SchemaDifference::MissingTable { table: (*name).to_string() });
            continue;
        };
        for column in &table.columns {
            match live_table.columns.get(column.name) {
                None => differences.push(SchemaDifference::MissingColumn { table: (*name).to_string(), column: column.name.to_string() }),
                Some(live_column) => compare_column(name, column, live_column, &mut differences),
            }
            if let Some(foreign_key) = &column.references {
                let references = format!("{}({})", foreign_key.table, foreign_key.column);
                match live_table.foreign_keys.get(column.name) {
                    Some(live_key) if live_key.table == foreign_key.table && live_key.column == foreign_key.column => {
                        if live_key.on_delete != foreign_key.on_delete.sql() {
                            differences.push(SchemaDifference::ForeignKeyOnDelete {
                                table: (*name).to_string(),
                                column: column.name.to_string(),
                                expected: foreign_key.on_delete.sql().to_string(),
                                actual: live_key.on_delete.clone(),
                            });
                        }
                    }
                    _ => differences.push(SchemaDifference::MissingForeignKey { table: (*name).to_string(), column: column.name.to_string(), references }),
                }
            }
        }
        for live_column in live_table.columns.keys() {
            if table.find_column(live_column).is_none() {
                differences.push(SchemaDifference::UnexpectedColumn { table: (*name).to_string(), column: live_column.clone() });
            }
        }
        for index in &table.indexes {
            if !live_table.indexes.contains(index.name) {
                differences.push(SchemaDifference::MissingIndex { table: (*name).to_string(), index: index.name.to_string() });
            }
        }
        for unique in &table.unique {
            if !live_table.unique.contains(unique.name) {
                differences.push(SchemaDifference::MissingUnique { table: (*name).to_string(), constraint: unique.name.to_string() });
            }
        }
    }
    for name in live.tables.keys() {
        if !expected.tables.contains_key(name.as_str()) && !ignored_tables.contains(&name.as_str()) {
            differences.push(SchemaDifference::UnexpectedTable { table: name.clone() });
        }
    }
    differences
}

fn compare_column(table: &str, column: &ColumnDef, live_column: &LiveColumn, differences: &mut Vec<SchemaDifference>) {
    let expected_type = column.column_type.information_schema_name();
    if live_column.data_type != expected_type {
        differences.push(SchemaDifference::ColumnType {
            table: table.to_string(),
            column: column.name.to_string(),
            expected: expected_type.to_string(),
            actual: live_column.data_type.clone(),
        });
    } else if !size_matches(&column.column_type, live_column) {
        differences.push(SchemaDifference::ColumnSize {
            table: table.to_string(),
            column: column.name.to_string(),
            expected: column.column_type.sql(),
            actual: live_column.size_sql(&column.column_type),
        });
    }
    if live_column.nullable != column.nullable {
        differences.push(SchemaDifference::Nullability { table: table.to_string(), column: column.name.to_string(), expected_nullable: column.nullable });
    }
    if !default_matches(column, live_column.default.as_deref()) {
        differences.push(SchemaDifference::ColumnDefault {
            table: table.to_string(),
            column: column.name.to_string(),
            expected: expected_default(column),
            actual: live_column.default.clone(),
        });
    }
}

fn size_matches(column_type: &ColumnType, live_column: &LiveColumn) -> bool {
    match column_type {
        ColumnType::VarChar(length) => live_column.character_maximum_length == Some(i64::from(*length)),
        ColumnType::Numeric { precision, scale } => live_column.numeric_precision == Some(i64::from(*precision)) && live_column.numeric_scale == Some(i64::from(*scale)),
        _ => true,
    }
}

fn expected_default(column: &ColumnDef) -> Option<String> {
    match (&column.default, column.column_type) {
        (Some(default), _) => Some(default.sql()),
        (None, ColumnType::BigSerial) => Some("nextval(...)".to_string()),
        (None, _) => None,
    }
}

/**
 * Compares a declared default with the expression PostgreSQL stores, which carries a type cast for literals.
 */
fn default_matches(column: &ColumnDef, live: Option<&str>) -> bool {
    match (&column.default, live) {
        (None, None) => column.column_type != ColumnType::BigSerial,
        (None, Some(live)) => column.column_type == ColumnType::BigSerial && live.starts_with("nextval("),
        (Some(_), None) => false,
        (Some(default), Some(live)) => {
            let uncast = live.split_once("::").map_or(live, |(value, _)| value);
            uncast == default.sql()
        }
    }
}
