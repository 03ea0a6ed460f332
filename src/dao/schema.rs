use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    verification::{LiveColumn, LiveForeignKey, LiveSchema},
};

/**
 * Database response types for catalog queries.
 */
pub type QueryTableDbResp = (String,);
pub type QueryColumnDbResp = (String, String, String, String, Option<i64>, Option<i64>, Option<i64>, Option<String>);
pub type QueryTableObjectDbResp = (String, String);
pub type QueryForeignKeyDbResp = (String, String, String, String, String);

const QUERY_TABLES: &str = "SELECT table_name::text FROM information_schema.tables WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'";

const QUERY_COLUMNS: &str = "SELECT table_name::text, column_name::text, data_type::text, is_nullable::text,
                                    character_maximum_length::bigint, numeric_precision::bigint, numeric_scale::bigint, column_default::text
                             FROM information_schema.columns
                             WHERE table_schema = current_schema()";

const QUERY_INDEXES: &str = "SELECT tablename::text, indexname::text FROM pg_indexes WHERE schemaname = current_schema()";

const QUERY_UNIQUE_CONSTRAINTS: &str = "SELECT c.relname::text, con.conname::text
                                        FROM pg_constraint con
                                        JOIN pg_class c ON c.oid = con.conrelid
                                        JOIN pg_namespace n ON n.oid = c.relnamespace
                                        WHERE con.contype = 'u' AND n.nspname = current_schema()";

/**
 * Single-column foreign keys with their delete rule rendered as in DDL.
 */
const QUERY_FOREIGN_KEYS: &str = "SELECT c.relname::text, a.attname::text, rc.relname::text, ra.attname::text,
                                         CASE con.confdeltype WHEN 'c' THEN 'CASCADE' WHEN 'r' THEN 'RESTRICT' WHEN 'n' THEN 'SET NULL'
                                                              WHEN 'd' THEN 'SET DEFAULT' ELSE 'NO ACTION' END
                                  FROM pg_constraint con
                                  JOIN pg_class c ON c.oid = con.conrelid
                                  JOIN pg_namespace n ON n.oid = c.relnamespace
                                  JOIN pg_class rc ON rc.oid = con.confrelid
                                  JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = con.conkey[1]
                                  JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = con.confkey[1]
                                  WHERE con.contype = 'f' AND n.nspname = current_schema()";

/**
 * DAO reading the schema of the current database from its catalog.
 */
pub struct SchemaDao {}

impl SchemaDao {
    pub fn new() -> Self {
        SchemaDao {}
    }

    /**
     * Reads tables, columns, indexes, uniqueness constraints and foreign keys of the current schema.
     */
    #[instrument(skip(self, connection))]
    pub async fn read_live_schema(&self, connection: &mut PgConnection) -> Result<LiveSchema, ApplicationError> {
        let span = tracing::Span::current();
        let tables: Vec<QueryTableDbResp> = sqlx::query_as(QUERY_TABLES)
            .fetch_all(&mut *connection)
            .instrument(span.clone())
            .await
            .map_err(|err| Self::catalog_error("tables", &err))?;
        let columns: Vec<QueryColumnDbResp> = sqlx::query_as(QUERY_COLUMNS)
            .fetch_all(&mut *connection)
            .instrument(span.clone())
            .await
            .map_err(|err| Self::catalog_error("columns", &err))?;
        let indexes: Vec<QueryTableObjectDbResp> = sqlx::query_as(QUERY_INDEXES)
            .fetch_all(&mut *connection)
            .instrument(span.clone())
            .await
            .map_err(|err| Self::catalog_error("indexes", &err))?;
        let unique_constraints: Vec<QueryTableObjectDbResp> = sqlx::query_as(QUERY_UNIQUE_CONSTRAINTS)
            .fetch_all(&mut *connection)
            .instrument(span.clone())
            .await
            .map_err(|err| Self::catalog_error("unique constraints", &err))?;
        let foreign_keys: Vec<QueryForeignKeyDbResp> = sqlx::query_as(QUERY_FOREIGN_KEYS)
            .fetch_all(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| Self::catalog_error("foreign keys", &err))?;

        let mut live = LiveSchema::default();
        for (table,) in tables {
            live.tables.entry(table).or_default();
        }
        for (table, column, data_type, is_nullable, character_maximum_length, numeric_precision, numeric_scale, default) in columns {
            if let Some(live_table) = live.tables.get_mut(&table) {
                let live_column = LiveColumn { data_type, nullable: is_nullable == "YES", character_maximum_length, numeric_precision, numeric_scale, default };
                live_table.columns.insert(column, live_column);
            }
        }
        for (table, index) in indexes {
            if let Some(live_table) = live.tables.get_mut(&table) {
                live_table.indexes.insert(index);
            }
        }
        for (table, constraint) in unique_constraints {
            if let Some(live_table) = live.tables.get_mut(&table) {
                live_table.unique.insert(constraint);
            }
        }
        for (table, column, referenced_table, referenced_column, on_delete) in foreign_keys {
            if let Some(live_table) = live.tables.get_mut(&table) {
                live_table.foreign_keys.insert(column, LiveForeignKey { table: referenced_table, column: referenced_column, on_delete });
            }
        }
        Ok(live)
    }

    fn catalog_error(what: &str, err: &sqlx::Error) -> ApplicationError {
        ApplicationError::new(ErrorType::DatabaseError, format!("Failed to read {what} from catalog: {err}"))
    }
}
