//! Declarative description of tables, rendered to PostgreSQL DDL.
//!
//! The same definitions drive table creation in migrations and verification of a live database.

use std::fmt::Write;

use serde::Serialize;

/**
 * Column type, with the name PostgreSQL reports for it in `information_schema.columns.data_type`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    BigSerial,
    Integer,
    Numeric { precision: u32, scale: u32 },
    VarChar(u32),
    Date,
    TimestampTz,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::BigSerial => "BIGSERIAL".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Numeric { precision, scale } => format!("NUMERIC({precision}, {scale})"),
            ColumnType::VarChar(length) => format!("VARCHAR({length})"),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
        }
    }

    pub fn information_schema_name(&self) -> &'static str {
        match self {
            ColumnType::BigSerial => "bigint",
            ColumnType::Integer => "integer",
            ColumnType::Numeric { .. } => "numeric",
            ColumnType::VarChar(_) => "character varying",
            ColumnType::Date => "date",
            ColumnType::TimestampTz => "timestamp with time zone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DefaultValue {
    Integer(i64),
    Text(&'static str),
    Now,
}

impl DefaultValue {
    pub fn sql(&self) -> String {
        match self {
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Text(value) => format!("'{}'", value.replace('\'', "''")),
            DefaultValue::Now => "now()".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnDelete {
    /**
     * Deleting the parent row deletes the dependent rows. Irreversible.
     */
    Cascade,
    Restrict,
}

impl OnDelete {
    pub fn sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<DefaultValue>,
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    /**
     * Creates a nullable column without default.
     */
    pub fn new(name: &'static str, column_type: ColumnType) -> Self {
        ColumnDef { name, column_type, nullable: true, primary_key: false, default: None, references: None }
    }

    /**
     * Auto-incrementing bigint primary key.
     */
    pub fn id() -> Self {
        ColumnDef::new("id", ColumnType::BigSerial).primary_key()
    }

    /**
     * Non-null timestamp defaulting to the transaction time.
     */
    pub fn timestamp(name: &'static str) -> Self {
        ColumnDef::new(name, ColumnType::TimestampTz).not_null().default(DefaultValue::Now)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn references(mut self, table: &'static str, column: &'static str, on_delete: OnDelete) -> Self {
        self.references = Some(ForeignKey { table, column, on_delete });
        self
    }

    fn sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            let _ = write!(sql, " DEFAULT {}", default.sql());
        }
        if let Some(foreign_key) = &self.references {
            let _ = write!(sql, " REFERENCES {} ({}) ON DELETE {}", foreign_key.table, foreign_key.column, foreign_key.on_delete.sql());
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDef {
    pub name: &'static str,
    pub columns: Vec<&'static str>,
}

impl IndexDef {
    pub fn new(name: &'static str, columns: &[&'static str]) -> Self {
        IndexDef { name, columns: columns.to_vec() }
    }

    pub fn create_sql(&self, table: &str) -> String {
        format!("CREATE INDEX {} ON {} ({})", self.name, table, self.columns.join(", "))
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP INDEX {}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueDef {
    pub name: &'static str,
    pub columns: Vec<&'static str>,
}

impl UniqueDef {
    pub fn new(name: &'static str, columns: &[&'static str]) -> Self {
        UniqueDef { name, columns: columns.to_vec() }
    }
}

/**
 * A table with its columns, secondary indexes and uniqueness constraints.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub unique: Vec<UniqueDef>,
}

impl TableDef {
    pub fn new(name: &'static str) -> Self {
        TableDef { name, columns: vec![], indexes: vec![], unique: vec![] }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, name: &'static str, columns: &[&'static str]) -> Self {
        self.indexes.push(IndexDef::new(name, columns));
        self
    }

    pub fn unique(mut self, name: &'static str, columns: &[&'static str]) -> Self {
        self.unique.push(UniqueDef::new(name, columns));
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    /**
     * Renders the statements creating the table together with its indexes and uniqueness constraints.
     * They are meant to run in one transaction so the table never exists without its constraints.
     */
    pub fn create_statements(&self) -> Vec<String> {
        let mut definitions: Vec<String> = self.columns.iter().map(ColumnDef::sql).collect();
        definitions.extend(self.unique.iter().map(|unique| format!("CONSTRAINT {} UNIQUE ({})", unique.name, unique.columns.join(", "))));
        let mut statements = vec![format!("CREATE TABLE {} (\n    {}\n)", self.name, definitions.join(",\n    "))];
        statements.extend(self.indexes.iter().map(|index| index.create_sql(self.name)));
        statements
    }

    pub fn drop_statements(&self) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.name)]
    }
}
