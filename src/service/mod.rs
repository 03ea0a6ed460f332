use sqlx::{Pool, Postgres, Transaction, pool::PoolConnection};

use crate::model::apperror::{ApplicationError, ErrorType};

pub mod crops;
pub mod migrator;
pub mod weather;

/**
 * Returns the pool, or an `Initialization` error when the runtime has not been initialized.
 */
pub(crate) fn connection_pool(connection_pool: &Option<Pool<Postgres>>) -> Result<&Pool<Postgres>, ApplicationError> {
    connection_pool.as_ref().ok_or_else(|| ApplicationError::new(ErrorType::Initialization, "Database runtime is not initialized".to_string()))
}

pub(crate) async fn acquire(connection_pool: &Pool<Postgres>) -> Result<PoolConnection<Postgres>, ApplicationError> {
    connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))
}

pub(crate) async fn begin(connection_pool: &Pool<Postgres>) -> Result<Transaction<'static, Postgres>, ApplicationError> {
    connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))
}

/**
 * Commits the transaction when the work succeeded, otherwise rolls it back and returns the original error.
 *
 * # Arguments
 * `transaction`: The transaction the work ran in.
 * `result`: Outcome of the work.
 */
pub(crate) async fn finish<T>(transaction: Transaction<'_, Postgres>, result: Result<T, ApplicationError>) -> Result<T, ApplicationError> {
    match result {
        Ok(value) => {
            transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = transaction.rollback().await {
                tracing::error!("Failed to rollback transaction after error ({}): {}", err, rollback_err);
            }
            Err(err)
        }
    }
}


#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use sqlx::PgPool;

    use super::*;

    #[sqlx::test(migrations = false)]
    async fn test_failed_rollback_keeps_original_error(pool: PgPool) {
        let mut transaction = begin(&pool).await.unwrap();
        let backend_pid: (i32,) = sqlx::query_as("SELECT pg_backend_pid()").fetch_one(&mut *transaction).await.unwrap();
        sqlx::query("SELECT pg_terminate_backend($1)").bind(backend_pid.0).execute(&pool).await.unwrap();
        let original = ApplicationError::new(ErrorType::Conflict, "Station USC00110072 already exists".to_string());
        let error = finish::<()>(transaction, Err(original)).await.err().unwrap();
        assert_eq!(error.error_type, ErrorType::Conflict);
        assert_eq!(error.message, "Station USC00110072 already exists");
    }

    #[sqlx::test(migrations = false)]
    async fn test_failed_work_is_rolled_back(pool: PgPool) {
        sqlx::raw_sql("CREATE TABLE finish_check (id INTEGER)").execute(&pool).await.unwrap();
        let mut transaction = begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO finish_check VALUES (1)").execute(&mut *transaction).await.unwrap();
        let error = finish::<()>(transaction, Err(ApplicationError::new(ErrorType::Validation, "invalid".to_string()))).await.err().unwrap();
        assert_eq!(error.error_type, ErrorType::Validation);
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM finish_check").fetch_one(&pool).await.unwrap();
        assert_eq!(count.0, 0);
    }
}
