use sqlx::{Pool, Postgres};

use crate::{
    dao::weather::WeatherDao,
    model::{
        apperror::ApplicationError,
        models::{
            AggregationScope, AggregationSummary, DailyWeatherAddInputType, ListOutputType, PaginationInput, WeatherStation, WeatherStationAddInputType, YearlyStatsFilter, YearlyWeatherStats,
            YearlyWeatherStatsInputType,
        },
    },
    service::{acquire, begin, connection_pool, finish},
};

/**
 * Represents the service for weather stations, daily observations and yearly statistics.
 */
pub struct WeatherService {
    /**
     * The DAO for weather operations.
     */
    weather_dao: WeatherDao,
    /**
     * Optional connection pool. `None` until the runtime is initialized.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl WeatherService {
    /**
     * Creates a new instance of `WeatherService`.
     *
     * # Arguments
     * `weather_dao`: The DAO for weather operations.
     * `connection_pool`: Optional connection pool for database operations.
     */
    pub fn new(weather_dao: WeatherDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        WeatherService { weather_dao, connection_pool }
    }

    pub async fn add_station(&self, station_add_input: WeatherStationAddInputType) -> Result<WeatherStation, ApplicationError> {
        let station_add_input = station_add_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.weather_dao.add_station(&mut transaction, station_add_input).await;
        finish(transaction, result).await
    }

    pub async fn get_station(&self, station_id: &str) -> Result<WeatherStation, ApplicationError> {
        let mut connection = acquire(connection_pool(&self.connection_pool)?).await?;
        self.weather_dao.get_station(&mut connection, station_id).await
    }

    /**
     * Deletes a station together with its daily records and yearly statistics. The removed rows cannot be recovered.
     *
     * # Arguments
     * `station_id`: Id of the station to delete.
     *
     * # Returns
     * The number of yearly statistics rows removed with the station.
     */
    pub async fn delete_station(&self, station_id: &str) -> Result<i64, ApplicationError> {
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.weather_dao.delete_station(&mut transaction, station_id).await;
        let removed = finish(transaction, result).await?;
        tracing::warn!("Deleted station {} and {} yearly statistics rows with it", station_id, removed);
        Ok(removed)
    }

    pub async fn add_daily_weather(&self, daily_weather_input: DailyWeatherAddInputType) -> Result<i64, ApplicationError> {
        let daily_weather_input = daily_weather_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.weather_dao.add_daily_weather(&mut transaction, daily_weather_input).await;
        finish(transaction, result).await
    }

    /**
     * Adds yearly statistics for a station and year that has none yet.
     *
     * # Arguments
     * `stats_input`: The statistics to add.
     *
     * # Returns
     * The stored row. A `Validation` error leaves the database untouched; a `Conflict` error means the station
     * already has statistics for the year and `upsert_yearly_stats` should be used instead.
     */
    pub async fn add_yearly_stats(&self, stats_input: YearlyWeatherStatsInputType) -> Result<YearlyWeatherStats, ApplicationError> {
        let stats_input = stats_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.weather_dao.add_yearly_stats(&mut transaction, &stats_input).await;
        finish(transaction, result).await
    }

    pub async fn upsert_yearly_stats(&self, stats_input: YearlyWeatherStatsInputType) -> Result<YearlyWeatherStats, ApplicationError> {
        let stats_input = stats_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.weather_dao.upsert_yearly_stats(&mut transaction, &stats_input).await;
        finish(transaction, result).await
    }

    pub async fn update_yearly_stats(&self, stats_id: i64, stats_input: YearlyWeatherStatsInputType) -> Result<YearlyWeatherStats, ApplicationError> {
        let stats_input = stats_input.validate()?;
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.weather_dao.update_yearly_stats(&mut transaction, stats_id, &stats_input).await;
        finish(transaction, result).await
    }

    pub async fn get_yearly_stats(&self, stats_id: i64) -> Result<YearlyWeatherStats, ApplicationError> {
        let mut connection = acquire(connection_pool(&self.connection_pool)?).await?;
        self.weather_dao.get_yearly_stats(&mut connection, stats_id).await
    }

    pub async fn get_yearly_stats_by_key(&self, station_id: &str, year: i32) -> Result<YearlyWeatherStats, ApplicationError> {
        let mut connection = acquire(connection_pool(&self.connection_pool)?).await?;
        self.weather_dao.get_yearly_stats_by_key(&mut connection, station_id, year).await
    }

    /**
     * Retrieves a page of yearly statistics.
     *
     * # Arguments
     * `pagination_input`: `PaginationInput` containing pagination information.
     * `filter`: Station, year span and measurement thresholds.
     */
    pub async fn list_yearly_stats(&self, pagination_input: PaginationInput, filter: YearlyStatsFilter) -> Result<ListOutputType<YearlyWeatherStats>, ApplicationError> {
        let pagination_input = pagination_input.validate()?;
        let filter = filter.validate()?;
        let mut connection = acquire(connection_pool(&self.connection_pool)?).await?;
        self.weather_dao.list_yearly_stats(&mut connection, pagination_input, filter).await
    }

    /**
     * Recomputes the yearly statistics of one station and year from its daily records and stores them.
     *
     * # Arguments
     * `station_id`: Station to recompute.
     * `year`: Year to recompute.
     *
     * # Returns
     * The stored row, or `None` when the station has no daily records for the year.
     */
    #[tracing::instrument(skip(self))]
    pub async fn recompute_yearly_stats(&self, station_id: &str, year: i32) -> Result<Option<YearlyWeatherStats>, ApplicationError> {
        let mut transaction = begin(connection_pool(&self.connection_pool)?).await?;
        let result = self.recompute_within(&mut transaction, station_id, year).await;
        let stats = finish(transaction, result).await?;
        match &stats {
            Some(stats) => tracing::debug!("Stored yearly statistics {} from {} daily records", stats.id, stats.total_records),
            None => tracing::debug!("No daily records for station {} in {}", station_id, year),
        }
        Ok(stats)
    }

    async fn recompute_within(&self, transaction: &mut sqlx::PgConnection, station_id: &str, year: i32) -> Result<Option<YearlyWeatherStats>, ApplicationError> {
        let Some(stats_input) = self.compute_within(transaction, station_id, year).await? else {
            return Ok(None);
        };
        self.weather_dao.upsert_yearly_stats(transaction, &stats_input).await.map(Some)
    }

    async fn compute_within(&self, connection: &mut sqlx::PgConnection, station_id: &str, year: i32) -> Result<Option<YearlyWeatherStatsInputType>, ApplicationError> {
        let aggregate = self.weather_dao.aggregate_daily_weather(connection, station_id, year).await?;
        YearlyWeatherStatsInputType::from_aggregate(station_id, year, aggregate)?.map(YearlyWeatherStatsInputType::validate).transpose()
    }

    /**
     * Recomputes the yearly statistics of every station year with daily records in the scope. Each station year
     * is written in its own transaction.
     *
     * # Arguments
     * `scope`: Station, year span and run mode. A dry run computes every row without clearing or writing.
     *
     * # Returns
     * How many station years were found, how many rows were computed and how many were cleared first.
     */
    pub async fn recompute_all(&self, scope: AggregationScope) -> Result<AggregationSummary, ApplicationError> {
        let scope = scope.validate()?;
        let connection_pool = connection_pool(&self.connection_pool)?;
        let station_id = scope.station_id.as_deref();
        let mut summary = AggregationSummary::default();
        if scope.clear && !scope.dry_run {
            let mut transaction = begin(connection_pool).await?;
            let result = self.weather_dao.delete_yearly_stats(&mut transaction, station_id, scope.year_from, scope.year_to).await;
            summary.cleared = finish(transaction, result).await?;
            tracing::warn!("Cleared {} yearly statistics rows before recomputing", summary.cleared);
        }
        let station_years = {
            let mut connection = acquire(connection_pool).await?;
            self.weather_dao.list_station_years(&mut connection, station_id, scope.year_from, scope.year_to).await?
        };
        summary.station_years = station_years.len();
        for (station_id, year) in &station_years {
            let computed = if scope.dry_run {
                let mut connection = acquire(connection_pool).await?;
                self.compute_within(&mut connection, station_id, *year).await?.is_some()
            } else {
                self.recompute_yearly_stats(station_id, *year).await?.is_some()
            };
            if computed {
                summary.computed += 1;
            }
        }
        if scope.dry_run {
            tracing::info!("Dry run computed {} of {} station years, nothing was written", summary.computed, summary.station_years);
        } else {
            tracing::info!("Recomputed {} of {} station years", summary.computed, summary.station_years);
        }
        Ok(summary)
    }
}
