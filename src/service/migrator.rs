use sqlx::{Connection, PgConnection, Pool, Postgres};

use crate::{
    dao::{
        migrations::{LEDGER_TABLE, MigrationDao},
        schema::SchemaDao,
    },
    migrations,
    model::{
        apperror::{ApplicationError, ErrorType},
        migration::{Migration, MigrationChain, MigrationStatus, Operation},
        verification::{SchemaDifference, compare},
    },
    service::{acquire, connection_pool, finish},
};

/**
 * Applies, reverts and inspects the migration chain against a database.
 */
pub struct MigrationService {
    migration_dao: MigrationDao,
    schema_dao: SchemaDao,
    chain: Result<MigrationChain, ApplicationError>,
    /**
     * Optional connection pool. `None` until the runtime is initialized.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl MigrationService {
    /**
     * Creates a service for the migration chain of this build.
     */
    pub fn new(connection_pool: Option<Pool<Postgres>>) -> Self {
        Self::with_chain(migrations::chain(), connection_pool)
    }

    /**
     * Creates a service for the given chain. An invalid chain is reported by every operation.
     *
     * # Arguments
     * `chain`: The ordered migration chain, or the error from ordering it.
     * `connection_pool`: Optional connection pool for database operations.
     */
    pub fn with_chain(chain: Result<MigrationChain, ApplicationError>, connection_pool: Option<Pool<Postgres>>) -> Self {
        MigrationService { migration_dao: MigrationDao::new(), schema_dao: SchemaDao::new(), chain, connection_pool }
    }

    fn chain(&self) -> Result<&MigrationChain, ApplicationError> {
        self.chain.as_ref().map_err(|err| err.clone())
    }

    /**
     * Applies every pending migration, each in its own transaction. Holds the migration lock for the whole run so
     * concurrent deployments apply each migration once.
     *
     * # Returns
     * Ids of the migrations applied by this run. Empty when the database was already up to date.
     * On failure the failing migration is rolled back, earlier ones stay applied.
     */
    pub async fn migrate(&self) -> Result<Vec<String>, ApplicationError> {
        let chain = self.chain()?;
        let connection_pool = connection_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.migration_dao.lock(&mut connection).await?;
        let result = self.apply_pending(chain, &mut connection).await;
        let unlocked = self.migration_dao.unlock(&mut connection).await;
        let applied = result?;
        unlocked?;
        Ok(applied)
    }

    async fn apply_pending(&self, chain: &MigrationChain, connection: &mut PgConnection) -> Result<Vec<String>, ApplicationError> {
        self.migration_dao.ensure_ledger(connection).await?;
        let ledger = self.migration_dao.list_applied(connection).await?;
        let pending = chain.pending(&ledger)?;
        if pending.is_empty() {
            tracing::info!("Database schema is up to date, {} migrations applied", ledger.len());
            return Ok(vec![]);
        }
        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            if migration.is_breaking() {
                tracing::warn!("Applying breaking migration {}: {}", migration.id, migration.description);
            }
            let mut transaction = connection.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
            let result = self.apply_forward(&mut transaction, migration).await;
            if let Err(err) = finish(transaction, result).await {
                tracing::error!("Migration {} failed and was rolled back: {}", migration.id, err);
                return Err(err);
            }
            tracing::info!("Applied migration {}", migration.id);
            applied.push(migration.id.to_string());
        }
        Ok(applied)
    }

    async fn apply_forward(&self, transaction: &mut PgConnection, migration: &Migration) -> Result<(), ApplicationError> {
        self.execute_operations(transaction, migration.id, &migration.forward).await?;
        self.migration_dao.record_applied(transaction, migration).await
    }

    async fn execute_operations(&self, transaction: &mut PgConnection, migration_id: &str, operations: &[Operation]) -> Result<(), ApplicationError> {
        for operation in operations {
            self.migration_dao.execute_operation(transaction, migration_id, operation).await?;
        }
        Ok(())
    }

    /**
     * Reverts the last applied migration.
     *
     * # Returns
     * Id of the reverted migration, or a `Migration` error when nothing is applied or the last applied migration
     * is one-way.
     */
    pub async fn rollback(&self) -> Result<String, ApplicationError> {
        let chain = self.chain()?;
        let connection_pool = connection_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.migration_dao.lock(&mut connection).await?;
        let result = self.revert_last(chain, &mut connection).await;
        let unlocked = self.migration_dao.unlock(&mut connection).await;
        let reverted = result?;
        unlocked?;
        Ok(reverted)
    }

    async fn revert_last(&self, chain: &MigrationChain, connection: &mut PgConnection) -> Result<String, ApplicationError> {
        let ledger = self.migration_dao.list_applied(connection).await?;
        let Some(migration) = chain.last_applied(&ledger)? else {
            return Err(ApplicationError::new(ErrorType::Migration, "No migrations are applied".to_string()));
        };
        let Some(backward) = &migration.backward else {
            tracing::warn!("Refusing to roll back one-way migration {}", migration.id);
            return Err(ApplicationError::new(ErrorType::Migration, format!("Migration {} is irreversible", migration.id)));
        };
        let mut transaction = connection.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))?;
        let result = match self.execute_operations(&mut transaction, migration.id, backward).await {
            Ok(()) => self.migration_dao.remove_applied(&mut transaction, migration.id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = finish(transaction, result).await {
            tracing::error!("Rollback of migration {} failed: {}", migration.id, err);
            return Err(err);
        }
        tracing::info!("Reverted migration {}", migration.id);
        Ok(migration.id.to_string())
    }

    /**
     * Lists every migration of the chain with the time it was applied, if it was.
     */
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, ApplicationError> {
        let chain = self.chain()?;
        let connection_pool = connection_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        let ledger = self.migration_dao.list_applied(&mut connection).await?;
        chain.pending(&ledger)?;
        Ok(chain.status(&ledger))
    }

    /**
     * Compares the live schema with the schema declared by the full chain.
     *
     * # Returns
     * The differences, empty when the database matches. Pending migrations and leftover placeholder tables show
     * up as differences.
     */
    pub async fn verify(&self) -> Result<Vec<SchemaDifference>, ApplicationError> {
        let expected = self.chain()?.final_schema()?;
        let connection_pool = connection_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        let live = self.schema_dao.read_live_schema(&mut connection).await?;
        let differences = compare(&expected, &live, &[LEDGER_TABLE]);
        for difference in &differences {
            tracing::warn!("Schema difference: {}", difference);
        }
        Ok(differences)
    }
}


#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use sqlx::PgPool;

    use super::*;
    use crate::migrations::tables::{CROP_YIELDS_PLACEHOLDER, YEARLY_WEATHER_STATS_PLACEHOLDER};
    use crate::model::schema::{ColumnDef, ColumnType, IndexDef, TableDef};

    #[sqlx::test(migrations = false)]
    async fn test_migrate_empty_database(pool: PgPool) {
        let service = MigrationService::new(Some(pool.clone()));
        let applied = service.migrate().await.unwrap();
        assert_eq!(applied, vec!["0001_initial", "0002_implement_yearly_stats_and_crop_yield"]);
        assert!(service.verify().await.unwrap().is_empty());

        let mut connection = pool.acquire().await.unwrap();
        let live = SchemaDao::new().read_live_schema(&mut connection).await.unwrap();
        assert!(!live.tables.contains_key(YEARLY_WEATHER_STATS_PLACEHOLDER));
        assert!(!live.tables.contains_key(CROP_YIELDS_PLACEHOLDER));
    }

    #[sqlx::test(migrations = false)]
    async fn test_verify_reports_column_and_foreign_key_drift(pool: PgPool) {
        let service = MigrationService::new(Some(pool.clone()));
        service.migrate().await.unwrap();
        sqlx::raw_sql(
            "ALTER TABLE yearly_weather_stats DROP CONSTRAINT yearly_weather_stats_station_id_fkey;
             ALTER TABLE yearly_weather_stats ADD CONSTRAINT yearly_weather_stats_station_id_fkey
                 FOREIGN KEY (station_id) REFERENCES weather_stations (station_id) ON DELETE RESTRICT;
             ALTER TABLE yearly_weather_stats ALTER COLUMN avg_max_temp TYPE NUMERIC(12, 4);
             ALTER TABLE yearly_weather_stats ALTER COLUMN total_records DROP DEFAULT;
             ALTER TABLE crop_yields ALTER COLUMN state TYPE VARCHAR(50);
             ALTER TABLE crop_yields ALTER COLUMN crop_type DROP DEFAULT;",
        )
        .execute(&pool)
        .await
        .unwrap();

        let differences = service.verify().await.unwrap();
        assert_eq!(differences.len(), 5, "{differences:?}");
        assert!(differences.contains(&SchemaDifference::ForeignKeyOnDelete {
            table: "yearly_weather_stats".to_string(),
            column: "station_id".to_string(),
            expected: "CASCADE".to_string(),
            actual: "RESTRICT".to_string(),
        }));
        assert!(differences.contains(&SchemaDifference::ColumnSize {
            table: "yearly_weather_stats".to_string(),
            column: "avg_max_temp".to_string(),
            expected: "NUMERIC(6, 1)".to_string(),
            actual: "NUMERIC(12, 4)".to_string(),
        }));
        assert!(differences.contains(&SchemaDifference::ColumnSize {
            table: "crop_yields".to_string(),
            column: "state".to_string(),
            expected: "VARCHAR(2)".to_string(),
            actual: "VARCHAR(50)".to_string(),
        }));
        assert!(differences.contains(&SchemaDifference::ColumnDefault {
            table: "yearly_weather_stats".to_string(),
            column: "total_records".to_string(),
            expected: Some("0".to_string()),
            actual: None,
        }));
        assert!(differences.contains(&SchemaDifference::ColumnDefault {
            table: "crop_yields".to_string(),
            column: "crop_type".to_string(),
            expected: Some("'corn_grain'".to_string()),
            actual: None,
        }));
    }

    #[sqlx::test(migrations = false)]
    async fn test_verify_reports_missing_foreign_key(pool: PgPool) {
        let service = MigrationService::new(Some(pool.clone()));
        service.migrate().await.unwrap();
        sqlx::raw_sql("ALTER TABLE daily_weather DROP CONSTRAINT daily_weather_station_id_fkey").execute(&pool).await.unwrap();
        let differences = service.verify().await.unwrap();
        assert_eq!(
            differences,
            vec![SchemaDifference::MissingForeignKey {
                table: "daily_weather".to_string(),
                column: "station_id".to_string(),
                references: "weather_stations(station_id)".to_string(),
            }]
        );
    }

    #[sqlx::test(migrations = false)]
    async fn test_concurrent_migrators_apply_once(pool: PgPool) {
        let first = MigrationService::new(Some(pool.clone()));
        let second = MigrationService::new(Some(pool.clone()));
        let (first_applied, second_applied) = tokio::join!(first.migrate(), second.migrate());
        let mut applied = vec![first_applied.unwrap(), second_applied.unwrap()];
        applied.sort();
        assert_eq!(applied, vec![vec![], vec!["0001_initial".to_string(), "0002_implement_yearly_stats_and_crop_yield".to_string()]]);

        let mut connection = pool.acquire().await.unwrap();
        let ledger = MigrationDao::new().list_applied(&mut connection).await.unwrap();
        let ids: Vec<&str> = ledger.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["0001_initial", "0002_implement_yearly_stats_and_crop_yield"]);
        assert!(first.verify().await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = false)]
    async fn test_reapply_is_a_no_op(pool: PgPool) {
        let service = MigrationService::new(Some(pool));
        service.migrate().await.unwrap();
        assert!(service.migrate().await.unwrap().is_empty());
        let status = service.status().await.unwrap();
        assert!(status.iter().all(|migration| migration.applied_at.is_some()));
        assert!(status[1].breaking);
        assert!(!status[1].reversible);
    }

    #[sqlx::test(migrations = false)]
    async fn test_one_way_rollback_is_refused(pool: PgPool) {
        let service = MigrationService::new(Some(pool));
        service.migrate().await.unwrap();
        let error = service.rollback().await.err().unwrap();
        assert_eq!(error.error_type, ErrorType::Migration);
        assert!(error.message.contains("irreversible"));
        assert!(service.verify().await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = false)]
    async fn test_partial_migrate_and_rollback(pool: PgPool) {
        let first_only = MigrationChain::new(vec![migrations::migrations().remove(0)]);
        let service = MigrationService::with_chain(first_only, Some(pool.clone()));
        assert_eq!(service.migrate().await.unwrap(), vec!["0001_initial"]);
        assert_eq!(service.rollback().await.unwrap(), "0001_initial");
        assert!(service.status().await.unwrap()[0].applied_at.is_none());

        let full = MigrationService::new(Some(pool));
        assert_eq!(full.migrate().await.unwrap().len(), 2);
    }

    #[sqlx::test(migrations = false)]
    async fn test_failing_migration_rolls_back_only_itself(pool: PgPool) {
        let mut chain = migrations::migrations();
        chain.push(Migration {
            id: "0003_broken",
            predecessor: Some("0002_implement_yearly_stats_and_crop_yield"),
            description: "Create a table and an index on a column it does not have",
            forward: vec![
                Operation::CreateTable(TableDef::new("broken").column(ColumnDef::new("value", ColumnType::Integer))),
                Operation::CreateIndex { table: "broken", index: IndexDef::new("broken_missing_idx", &["missing"]) },
            ],
            backward: None,
        });
        let service = MigrationService::with_chain(MigrationChain::new(chain), Some(pool.clone()));
        let error = service.migrate().await.err().unwrap();
        assert_eq!(error.error_type, ErrorType::Migration);
        assert!(error.message.contains("0003_broken"));
        assert!(error.message.contains("broken_missing_idx"));

        let status = service.status().await.unwrap();
        assert!(status[1].applied_at.is_some());
        assert!(status[2].applied_at.is_none());
        let mut connection = pool.acquire().await.unwrap();
        let live = SchemaDao::new().read_live_schema(&mut connection).await.unwrap();
        assert!(!live.tables.contains_key("broken"));
    }
}
