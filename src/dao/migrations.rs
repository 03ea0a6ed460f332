use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    migration::{AppliedMigration, Migration, Operation},
};

/**
 * Name of the applied migrations ledger table.
 */
pub const LEDGER_TABLE: &str = "schema_migrations";

/**
 * Key of the advisory lock serializing concurrent migration runs.
 */
const MIGRATION_LOCK_KEY: i64 = 0x5745_4154_4845_5230;

/**
 * Database response type for querying the ledger.
 */
pub type QueryLedgerDbResp = (String, Option<String>, String, DateTime<Utc>);

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
                                 id VARCHAR(255) PRIMARY KEY,
                                 predecessor VARCHAR(255),
                                 description TEXT NOT NULL,
                                 applied_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp())";

const LEDGER_EXISTS: &str = "SELECT to_regclass('schema_migrations') IS NOT NULL";

const QUERY_LEDGER: &str = "SELECT id, predecessor, description, applied_at FROM schema_migrations ORDER BY applied_at, id";

const INSERT_LEDGER: &str = "INSERT INTO schema_migrations (id, predecessor, description) VALUES ($1, $2, $3)";

const DELETE_LEDGER: &str = "DELETE FROM schema_migrations WHERE id = $1";

const LOCK: &str = "SELECT pg_advisory_lock($1)";

const UNLOCK: &str = "SELECT pg_advisory_unlock($1)";

impl From<QueryLedgerDbResp> for AppliedMigration {
    fn from(row: QueryLedgerDbResp) -> Self {
        AppliedMigration { id: row.0, predecessor: row.1, description: row.2, applied_at: row.3 }
    }
}

/**
 * DAO for the applied migrations ledger and for executing schema operations.
 */
pub struct MigrationDao {}

impl MigrationDao {
    pub fn new() -> Self {
        MigrationDao {}
    }

    /**
     * Blocks until this connection holds the migration lock. The lock is bound to the session, so every
     * statement of the run must go through the same connection.
     */
    #[instrument(skip(self, connection))]
    pub async fn lock(&self, connection: &mut PgConnection) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(LOCK)
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire migration lock: {err}")))?;
        Ok(())
    }

    #[instrument(skip(self, connection))]
    pub async fn unlock(&self, connection: &mut PgConnection) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(UNLOCK)
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to release migration lock: {err}")))?;
        Ok(())
    }

    /**
     * Creates the ledger table if it does not exist yet.
     */
    #[instrument(skip(self, connection))]
    pub async fn ensure_ledger(&self, connection: &mut PgConnection) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::raw_sql(CREATE_LEDGER)
            .execute(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to create migration ledger: {err}")))?;
        Ok(())
    }

    /**
     * Lists the applied migrations. An absent ledger means nothing has been applied.
     */
    #[instrument(skip(self, connection))]
    pub async fn list_applied(&self, connection: &mut PgConnection) -> Result<Vec<AppliedMigration>, ApplicationError> {
        let span = tracing::Span::current();
        let exists: (bool,) = sqlx::query_as(LEDGER_EXISTS)
            .fetch_one(&mut *connection)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to look up migration ledger: {err}")))?;
        if !exists.0 {
            return Ok(vec![]);
        }
        let results: Vec<QueryLedgerDbResp> = sqlx::query_as(QUERY_LEDGER)
            .fetch_all(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to read migration ledger: {err}")))?;
        Ok(results.into_iter().map(AppliedMigration::from).collect())
    }

    #[instrument(skip(self, transaction, migration), fields(migration = migration.id))]
    pub async fn record_applied(&self, transaction: &mut PgConnection, migration: &Migration) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query(INSERT_LEDGER)
            .bind(migration.id)
            .bind(migration.predecessor)
            .bind(migration.description)
            .execute(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Migration, format!("Failed to record migration {} as applied: {err}", migration.id)))?;
        Ok(())
    }

    #[instrument(skip(self, transaction))]
    pub async fn remove_applied(&self, transaction: &mut PgConnection, migration_id: &str) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_LEDGER)
            .bind(migration_id)
            .execute(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Migration, format!("Failed to remove migration {migration_id} from ledger: {err}")))?;
        if result.rows_affected() != 1 {
            return Err(ApplicationError::new(ErrorType::Migration, format!("Migration {migration_id} is not in the ledger")));
        }
        Ok(())
    }

    /**
     * Executes the statements of one schema operation.
     *
     * # Arguments
     * `transaction`: Transaction of the migration the operation belongs to.
     * `migration_id`: Id of that migration, used in error messages.
     * `operation`: The operation to execute.
     *
     * # Returns
     * A `Migration` error naming the migration and the operation if a statement fails.
     */
    #[instrument(skip(self, transaction, operation), fields(operation = %operation.describe()))]
    pub async fn execute_operation(&self, transaction: &mut PgConnection, migration_id: &str, operation: &Operation) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        for statement in operation.statements() {
            tracing::debug!("Executing {}", statement);
            sqlx::raw_sql(&statement)
                .execute(&mut *transaction)
                .instrument(span.clone())
                .await
                .map_err(|err| ApplicationError::new(ErrorType::Migration, format!("Migration {migration_id} failed to {}: {err}", operation.describe())))?;
        }
        Ok(())
    }
}
