use std::str::FromStr;
use std::time::Duration;

use prometheus::{IntGauge, Registry};
use sqlx::{
    Pool, Postgres,
    pool::PoolOptions,
    postgres::PgConnectOptions,
};
use tokio::task::JoinHandle;

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    config::Database,
};

/**
 * Builds the connection options from the database configuration. A configured URL wins over the discrete fields.
 *
 * #Arguments
 * `database`: The database configuration.
 *
 * #Returns
 * The connect options, or a `Configuration` error if the URL cannot be parsed.
 */
pub fn connect_options(database: &Database) -> Result<PgConnectOptions, ApplicationError> {
    match &database.url {
        Some(url) => PgConnectOptions::from_str(url).map_err(|err| ApplicationError::new(ErrorType::Configuration, format!("DATABASE_URL is malformed: {err}"))),
        None => Ok(PgConnectOptions::new()
            .host(&database.host)
            .port(database.port)
            .database(&database.name)
            .username(&database.user)
            .password(&database.password)),
    }
}

/**
 * Pool options derived from the database configuration. Timeouts and lifetimes are configured in seconds.
 */
pub fn pool_options(database: &Database) -> PoolOptions<Postgres> {
    PoolOptions::new()
        .max_connections(database.max_connections)
        .min_connections(database.min_connections)
        .acquire_timeout(Duration::from_secs(database.acquire_timeout))
        .idle_timeout(Duration::from_secs(database.idle_timeout))
        .max_lifetime(Duration::from_secs(database.max_lifetime))
}

/**
 * Creates the connection pool and opens the minimum number of connections.
 *
 * #Arguments
 * `database`: The database configuration.
 *
 * #Returns
 * The pool, or an `Initialization` error if the database is unreachable.
 */
pub async fn create_pool(database: &Database) -> Result<Pool<Postgres>, ApplicationError> {
    let connect_options = connect_options(database)?;
    pool_options(database)
        .connect_with(connect_options)
        .await
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to create database pool: {err}")))
}

/**
 * Connection pool gauges. Register them in the host service's registry and sample them periodically.
 */
#[derive(Clone)]
pub struct PoolMetrics {
    max_connections: IntGauge,
    min_connections: IntGauge,
    active_connections: IntGauge,
    idle_connections: IntGauge,
}

impl PoolMetrics {
    pub fn new() -> Result<Self, ApplicationError> {
        Ok(PoolMetrics {
            max_connections: new_gauge("max_connections", "Connection pool maximum")?,
            min_connections: new_gauge("min_connections", "Connection pool minimum")?,
            active_connections: new_gauge("active_connections", "Connection pool active")?,
            idle_connections: new_gauge("idle_connections", "Connection pool idle")?,
        })
    }

    /**
     * Registers the gauges in a registry.
     *
     * #Arguments
     * `registry`: The Prometheus registry owned by the host service.
     */
    pub fn register(&self, registry: &Registry) -> Result<(), ApplicationError> {
        for gauge in [&self.max_connections, &self.min_connections, &self.active_connections, &self.idle_connections] {
            registry.register(Box::new(gauge.clone())).map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to register Prometheus gauge: {err}")))?;
        }
        Ok(())
    }

    pub fn sample(&self, connection_pool: &Pool<Postgres>) {
        self.max_connections.set(i64::from(connection_pool.options().get_max_connections()));
        self.min_connections.set(i64::from(connection_pool.options().get_min_connections()));
        self.active_connections.set(i64::from(connection_pool.size()));
        self.idle_connections.set(i64::try_from(connection_pool.num_idle()).unwrap_or(i64::MAX));
    }

    /**
     * Samples the pool at the given interval until the pool is closed.
     */
    pub fn spawn_sampler(self, connection_pool: Pool<Postgres>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            while !connection_pool.is_closed() {
                interval.tick().await;
                self.sample(&connection_pool);
            }
            tracing::debug!("Connection pool closed, stopping pool metrics sampler");
        })
    }
}

fn new_gauge(name: &str, help: &str) -> Result<IntGauge, ApplicationError> {
    IntGauge::new(name, help).map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to create {name} gauge: {err}")))
}
