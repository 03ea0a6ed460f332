use std::time::Duration;

use prometheus::Registry;
use sqlx::{Pool, Postgres};
use tokio::task::JoinHandle;

use crate::{
    dao::{
        crops::CropYieldDao,
        pool::{PoolMetrics, create_pool},
        weather::WeatherDao,
    },
    model::{
        apperror::{ApplicationError, ErrorType},
        config::Config,
    },
    service::{connection_pool, crops::CropYieldService, migrator::MigrationService, weather::WeatherService},
};

/**
 * Database runtime of a process. Created uninitialized from the configuration; the entry point calls
 * `initialize` once before any data access.
 */
pub struct Runtime {
    config: Config,
    connection_pool: Option<Pool<Postgres>>,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Runtime { config, connection_pool: None }
    }

    /**
     * Creates the connection pool.
     *
     * # Returns
     * An `Initialization` error when the runtime is already initialized or the database cannot be reached. A
     * failed initialization leaves the runtime uninitialized.
     */
    pub async fn initialize(&mut self) -> Result<(), ApplicationError> {
        if self.is_initialized() {
            return Err(ApplicationError::new(ErrorType::Initialization, "Database runtime is already initialized".to_string()));
        }
        let pool = create_pool(&self.config.database).await?;
        tracing::info!(
            "Database runtime initialized with {} to {} connections",
            self.config.database.min_connections,
            self.config.database.max_connections
        );
        self.connection_pool = Some(pool);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.connection_pool.is_some()
    }

    pub fn connection_pool(&self) -> Result<&Pool<Postgres>, ApplicationError> {
        connection_pool(&self.connection_pool)
    }

    pub fn migration_service(&self) -> MigrationService {
        MigrationService::new(self.connection_pool.clone())
    }

    pub fn weather_service(&self) -> WeatherService {
        WeatherService::new(WeatherDao::new(), self.connection_pool.clone())
    }

    pub fn crop_yield_service(&self) -> CropYieldService {
        CropYieldService::new(CropYieldDao::new(), self.connection_pool.clone())
    }

    /**
     * Registers the pool gauges in the host registry and samples them every second.
     *
     * # Arguments
     * `registry`: The Prometheus registry owned by the host service.
     */
    pub fn export_pool_metrics(&self, registry: &Registry) -> Result<JoinHandle<()>, ApplicationError> {
        let connection_pool = self.connection_pool()?.clone();
        let pool_metrics = PoolMetrics::new()?;
        pool_metrics.register(registry)?;
        Ok(pool_metrics.spawn_sampler(connection_pool, Duration::from_secs(1)))
    }

    /**
     * Closes the pool and waits for checked out connections to be returned.
     */
    pub async fn shutdown(self) {
        if let Some(connection_pool) = self.connection_pool {
            connection_pool.close().await;
            tracing::debug!("Database runtime shut down");
        }
    }
}


#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use super::*;

    #[tokio::test]
    async fn test_initialize_once() {
        dotenv::dotenv().ok();
        let config = Config::load(None).unwrap();
        let mut runtime = Runtime::new(config);
        runtime.initialize().await.unwrap();
        assert!(runtime.is_initialized());
        assert_eq!(runtime.initialize().await.err().unwrap().error_type, ErrorType::Initialization);
        runtime.export_pool_metrics(&Registry::new()).unwrap();
        runtime.shutdown().await;
    }
}
