use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, Postgres, postgres::PgArguments, query::QueryAs};
use tracing::{Instrument, instrument};

use crate::dao::{handle_database_error, paginate};
use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{
        DailyAggregate, DailyWeatherAddInputType, ListOutputType, PaginationInput, WeatherStation, WeatherStationAddInputType, YearlyStatsFilter, YearlyWeatherStats,
        YearlyWeatherStatsInputType,
    },
};

/**
 * Database response type for querying weather stations.
 */
pub type QueryStationDbResp = (String, String, Option<Decimal>, Option<Decimal>, Option<Decimal>, String, DateTime<Utc>, DateTime<Utc>);

/**
 * Database response type for querying yearly statistics.
 */
pub type QueryYearlyStatsDbResp = (
    i64,
    String,
    i32,
    Option<Decimal>,
    Option<Decimal>,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    Option<Decimal>,
    Option<i32>,
    i32,
    i32,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
);

/**
 * Database response type for aggregating daily records.
 */
pub type QueryDailyAggregateDbResp = (Option<Decimal>, Option<Decimal>, Option<i32>, Option<i32>, Option<i64>, Option<Decimal>, Option<i32>, i64, i64, i64);

macro_rules! yearly_stats_columns {
    () => {
        "id, station_id, year, avg_max_temp, avg_min_temp, max_temp, min_temp, total_precipitation, avg_precipitation, max_precipitation, \
         total_records, records_with_temp, records_with_precipitation, created_at, updated_at"
    };
}

macro_rules! yearly_stats_insert {
    () => {
        "INSERT INTO yearly_weather_stats (station_id, year, avg_max_temp, avg_min_temp, max_temp, min_temp, total_precipitation, avg_precipitation, \
         max_precipitation, total_records, records_with_temp, records_with_precipitation) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    };
}

/**
 * SQL query to add a weather station.
 */
const ADD_STATION: &str = "INSERT INTO weather_stations (station_id, name, latitude, longitude, elevation, state) VALUES ($1, $2, $3, $4, $5, $6)
                           RETURNING station_id, name, latitude, longitude, elevation, state, created_at, updated_at";

const GET_STATION: &str = "SELECT station_id, name, latitude, longitude, elevation, state, created_at, updated_at FROM weather_stations WHERE station_id = $1";

/**
 * SQL query to delete a station. Its daily records and yearly statistics are removed by cascade.
 */
const DELETE_STATION: &str = "DELETE FROM weather_stations WHERE station_id = $1";

/**
 * SQL query locking a station row. Blocks inserts of dependent rows until the transaction ends.
 */
const LOCK_STATION: &str = "SELECT station_id FROM weather_stations WHERE station_id = $1 FOR UPDATE";

const COUNT_YEARLY_STATS_FOR_STATION: &str = "SELECT COUNT(*) FROM yearly_weather_stats WHERE station_id = $1";

/**
 * SQL query deleting the yearly statistics of a station and year span. Every filter is optional.
 */
const DELETE_YEARLY_STATS_RANGE: &str = "DELETE FROM yearly_weather_stats
                                         WHERE ($1::varchar IS NULL OR station_id = $1) AND
                                               ($2::integer IS NULL OR year >= $2) AND
                                               ($3::integer IS NULL OR year <= $3)";

const ADD_DAILY_WEATHER: &str = "INSERT INTO daily_weather (station_id, date, max_temp, min_temp, precipitation) VALUES ($1, $2, $3, $4, $5) RETURNING id";

/**
 * SQL query rolling the daily records of one station and year up into yearly aggregates.
 */
const AGGREGATE_DAILY_WEATHER: &str = "SELECT AVG(max_temp), AVG(min_temp), MAX(max_temp), MIN(min_temp),
                                              SUM(precipitation), AVG(precipitation), MAX(precipitation),
                                              COUNT(*),
                                              COUNT(*) FILTER (WHERE max_temp IS NOT NULL AND min_temp IS NOT NULL),
                                              COUNT(precipitation)
                                       FROM daily_weather
                                       WHERE station_id = $1 AND date >= make_date($2, 1, 1) AND date < make_date($2 + 1, 1, 1)";

/**
 * SQL query listing the station and year combinations that have daily records.
 */
const QUERY_STATION_YEARS: &str = "SELECT DISTINCT station_id, EXTRACT(YEAR FROM date)::integer AS year
                                   FROM daily_weather
                                   WHERE ($1::varchar IS NULL OR station_id = $1) AND
                                         ($2::integer IS NULL OR date >= make_date($2, 1, 1)) AND
                                         ($3::integer IS NULL OR date < make_date($3 + 1, 1, 1))
                                   ORDER BY station_id, year";

/**
 * SQL query to insert yearly statistics. Fails on an existing (station, year) row.
 */
const ADD_YEARLY_STATS: &str = concat!(yearly_stats_insert!(), " RETURNING ", yearly_stats_columns!());

/**
 * SQL query to insert or replace yearly statistics. `created_at` of an existing row is kept.
 */
const UPSERT_YEARLY_STATS: &str = concat!(
    yearly_stats_insert!(),
    " ON CONFLICT (station_id, year) DO UPDATE SET avg_max_temp = EXCLUDED.avg_max_temp, avg_min_temp = EXCLUDED.avg_min_temp, \
     max_temp = EXCLUDED.max_temp, min_temp = EXCLUDED.min_temp, total_precipitation = EXCLUDED.total_precipitation, \
     avg_precipitation = EXCLUDED.avg_precipitation, max_precipitation = EXCLUDED.max_precipitation, total_records = EXCLUDED.total_records, \
     records_with_temp = EXCLUDED.records_with_temp, records_with_precipitation = EXCLUDED.records_with_precipitation, \
     updated_at = GREATEST(now(), yearly_weather_stats.updated_at + interval '1 microsecond') RETURNING ",
    yearly_stats_columns!()
);

/**
 * SQL query to update yearly statistics by id. `updated_at` strictly increases even within one transaction.
 */
const UPDATE_YEARLY_STATS: &str = concat!(
    "UPDATE yearly_weather_stats SET station_id = $1, year = $2, avg_max_temp = $3, avg_min_temp = $4, max_temp = $5, min_temp = $6, \
     total_precipitation = $7, avg_precipitation = $8, max_precipitation = $9, total_records = $10, records_with_temp = $11, \
     records_with_precipitation = $12, updated_at = GREATEST(now(), updated_at + interval '1 microsecond') WHERE id = $13 RETURNING ",
    yearly_stats_columns!()
);

const GET_YEARLY_STATS: &str = concat!("SELECT ", yearly_stats_columns!(), " FROM yearly_weather_stats WHERE id = $1");

const GET_YEARLY_STATS_BY_KEY: &str = concat!("SELECT ", yearly_stats_columns!(), " FROM yearly_weather_stats WHERE station_id = $1 AND year = $2");

/**
 * SQL query to list yearly statistics. Every filter is optional and served by the year indexes.
 */
const QUERY_YEARLY_STATS_LIST: &str = concat!(
    "SELECT ",
    yearly_stats_columns!(),
    " FROM yearly_weather_stats
      WHERE ($1::varchar IS NULL OR station_id = $1) AND
            ($2::integer IS NULL OR year >= $2) AND
            ($3::integer IS NULL OR year <= $3) AND
            ($4::numeric IS NULL OR avg_max_temp > $4) AND
            ($5::numeric IS NULL OR avg_min_temp < $5) AND
            ($6::integer IS NULL OR total_precipitation >= $6)
      ORDER BY station_id, year
      LIMIT $7 OFFSET $8"
);

impl From<QueryStationDbResp> for WeatherStation {
    fn from(row: QueryStationDbResp) -> Self {
        WeatherStation { station_id: row.0, name: row.1, latitude: row.2, longitude: row.3, elevation: row.4, state: row.5, created_at: row.6, updated_at: row.7 }
    }
}

impl From<QueryYearlyStatsDbResp> for YearlyWeatherStats {
    fn from(row: QueryYearlyStatsDbResp) -> Self {
        YearlyWeatherStats {
            id: row.0,
            station_id: row.1,
            year: row.2,
            avg_max_temp: row.3,
            avg_min_temp: row.4,
            max_temp: row.5,
            min_temp: row.6,
            total_precipitation: row.7,
            avg_precipitation: row.8,
            max_precipitation: row.9,
            total_records: row.10,
            records_with_temp: row.11,
            records_with_precipitation: row.12,
            created_at: row.13,
            updated_at: row.14,
        }
    }
}

impl From<QueryDailyAggregateDbResp> for DailyAggregate {
    fn from(row: QueryDailyAggregateDbResp) -> Self {
        DailyAggregate {
            avg_max_temp: row.0,
            avg_min_temp: row.1,
            max_temp: row.2,
            min_temp: row.3,
            total_precipitation: row.4,
            avg_precipitation: row.5,
            max_precipitation: row.6,
            total_records: row.7,
            records_with_temp: row.8,
            records_with_precipitation: row.9,
        }
    }
}

/**
 * DAO for weather stations, daily observations and yearly statistics.
 */
pub struct WeatherDao {}

impl WeatherDao {
    /**
     * Creates a new instance of `WeatherDao`.
     */
    pub fn new() -> Self {
        WeatherDao {}
    }

    /**
     * Adds a weather station.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `station_add_input`: The validated station.
     *
     * # Returns
     * The stored station, or a `Conflict` error if the station id is taken.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_station(&self, transaction: &mut PgConnection, station_add_input: WeatherStationAddInputType) -> Result<WeatherStation, ApplicationError> {
        let span = tracing::Span::current();
        let subject = format!("Station {}", station_add_input.station_id);
        let result: QueryStationDbResp = sqlx::query_as(ADD_STATION)
            .bind(station_add_input.station_id)
            .bind(station_add_input.name)
            .bind(station_add_input.latitude)
            .bind(station_add_input.longitude)
            .bind(station_add_input.elevation)
            .bind(station_add_input.state)
            .fetch_one(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &subject))?;
        Ok(WeatherStation::from(result))
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_station(&self, connection: &mut PgConnection, station_id: &str) -> Result<WeatherStation, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryStationDbResp> = sqlx::query_as(GET_STATION)
            .bind(station_id)
            .fetch_optional(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get station: {err}")))?;
        result.map(WeatherStation::from).ok_or_else(|| ApplicationError::new(ErrorType::NotFound, format!("Station {station_id} not found")))
    }

    /**
     * Deletes a station. Its daily records and yearly statistics are deleted with it and cannot be recovered.
     * The station row is locked before counting, so the count matches what the cascade removes.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `station_id`: Id of the station to delete.
     *
     * # Returns
     * The number of yearly statistics rows removed by the cascade.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_station(&self, transaction: &mut PgConnection, station_id: &str) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let locked: Option<(String,)> = sqlx::query_as(LOCK_STATION)
            .bind(station_id)
            .fetch_optional(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to lock station: {err}")))?;
        if locked.is_none() {
            tracing::debug!("Station with ID {} not found for deletion", station_id);
            return Err(ApplicationError::new(ErrorType::NotFound, format!("Station {station_id} not found")));
        }
        let cascaded: (i64,) = sqlx::query_as(COUNT_YEARLY_STATS_FOR_STATION)
            .bind(station_id)
            .fetch_one(&mut *transaction)
            .instrument(span.clone())
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to count yearly statistics of station: {err}")))?;
        sqlx::query(DELETE_STATION)
            .bind(station_id)
            .execute(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete station: {err}")))?;
        Ok(cascaded.0)
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_daily_weather(&self, transaction: &mut PgConnection, daily_weather_input: DailyWeatherAddInputType) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let subject = format!("Daily weather for station {} on {}", daily_weather_input.station_id, daily_weather_input.date);
        let id: (i64,) = sqlx::query_as(ADD_DAILY_WEATHER)
            .bind(daily_weather_input.station_id)
            .bind(daily_weather_input.date)
            .bind(daily_weather_input.max_temp)
            .bind(daily_weather_input.min_temp)
            .bind(daily_weather_input.precipitation)
            .fetch_one(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &subject))?;
        Ok(id.0)
    }

    /**
     * Aggregates the daily records of one station and year.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn aggregate_daily_weather(&self, connection: &mut PgConnection, station_id: &str, year: i32) -> Result<DailyAggregate, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryDailyAggregateDbResp = sqlx::query_as(AGGREGATE_DAILY_WEATHER)
            .bind(station_id)
            .bind(year)
            .fetch_one(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to aggregate daily weather: {err}")))?;
        Ok(DailyAggregate::from(result))
    }

    /**
     * Lists the station and year combinations that have daily records.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn list_station_years(&self, connection: &mut PgConnection, station_id: Option<&str>, year_from: Option<i32>, year_to: Option<i32>) -> Result<Vec<(String, i32)>, ApplicationError> {
        let span = tracing::Span::current();
        sqlx::query_as(QUERY_STATION_YEARS)
            .bind(station_id)
            .bind(year_from)
            .bind(year_to)
            .fetch_all(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to list station years: {err}")))
    }

    /**
     * Deletes the yearly statistics of a station and year span.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `station_id`: Optional station to restrict the deletion to.
     * `year_from`: Optional first year, inclusive.
     * `year_to`: Optional last year, inclusive.
     *
     * # Returns
     * The number of deleted rows.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_yearly_stats(&self, transaction: &mut PgConnection, station_id: Option<&str>, year_from: Option<i32>, year_to: Option<i32>) -> Result<u64, ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_YEARLY_STATS_RANGE)
            .bind(station_id)
            .bind(year_from)
            .bind(year_to)
            .execute(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to delete yearly statistics: {err}")))?;
        Ok(result.rows_affected())
    }

    /**
     * Inserts yearly statistics. Relies on the (station, year) constraint instead of checking for an existing row.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `stats_input`: The validated statistics.
     *
     * # Returns
     * The stored row, or a `Conflict` error if the station already has statistics for the year.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_yearly_stats(&self, transaction: &mut PgConnection, stats_input: &YearlyWeatherStatsInputType) -> Result<YearlyWeatherStats, ApplicationError> {
        let span = tracing::Span::current();
        let result = bind_yearly_stats(sqlx::query_as(ADD_YEARLY_STATS), stats_input)
            .fetch_one(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &yearly_stats_subject(stats_input)))?;
        Ok(YearlyWeatherStats::from(result))
    }

    /**
     * Inserts yearly statistics, or replaces the measurements of the existing (station, year) row.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn upsert_yearly_stats(&self, transaction: &mut PgConnection, stats_input: &YearlyWeatherStatsInputType) -> Result<YearlyWeatherStats, ApplicationError> {
        let span = tracing::Span::current();
        let result = bind_yearly_stats(sqlx::query_as(UPSERT_YEARLY_STATS), stats_input)
            .fetch_one(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &yearly_stats_subject(stats_input)))?;
        Ok(YearlyWeatherStats::from(result))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_yearly_stats(&self, transaction: &mut PgConnection, stats_id: i64, stats_input: &YearlyWeatherStatsInputType) -> Result<YearlyWeatherStats, ApplicationError> {
        let span = tracing::Span::current();
        let result = bind_yearly_stats(sqlx::query_as(UPDATE_YEARLY_STATS), stats_input)
            .bind(stats_id)
            .fetch_optional(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &yearly_stats_subject(stats_input)))?;
        match result {
            Some(row) => Ok(YearlyWeatherStats::from(row)),
            None => {
                tracing::debug!("Yearly statistics with id {} not found for update", stats_id);
                Err(ApplicationError::new(ErrorType::NotFound, format!("Yearly statistics {stats_id} not found")))
            }
        }
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_yearly_stats(&self, connection: &mut PgConnection, stats_id: i64) -> Result<YearlyWeatherStats, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryYearlyStatsDbResp> = sqlx::query_as(GET_YEARLY_STATS)
            .bind(stats_id)
            .fetch_optional(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get yearly statistics: {err}")))?;
        result.map(YearlyWeatherStats::from).ok_or_else(|| ApplicationError::new(ErrorType::NotFound, format!("Yearly statistics {stats_id} not found")))
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_yearly_stats_by_key(&self, connection: &mut PgConnection, station_id: &str, year: i32) -> Result<YearlyWeatherStats, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryYearlyStatsDbResp> = sqlx::query_as(GET_YEARLY_STATS_BY_KEY)
            .bind(station_id)
            .bind(year)
            .fetch_optional(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get yearly statistics: {err}")))?;
        result
            .map(YearlyWeatherStats::from)
            .ok_or_else(|| ApplicationError::new(ErrorType::NotFound, format!("Yearly statistics for station {station_id} and year {year} not found")))
    }

    /**
     * Retrieves a page of yearly statistics matching the filter.
     *
     * # Arguments
     * `connection`: The database connection.
     * `pagination_input`: The pagination input containing start index and page size.
     * `filter`: Optional station, year span and measurement thresholds.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn list_yearly_stats(&self, connection: &mut PgConnection, pagination_input: PaginationInput, filter: YearlyStatsFilter) -> Result<ListOutputType<YearlyWeatherStats>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryYearlyStatsDbResp> = sqlx::query_as(QUERY_YEARLY_STATS_LIST)
            .bind(filter.station_id)
            .bind(filter.year_from)
            .bind(filter.year_to)
            .bind(filter.min_avg_max_temp)
            .bind(filter.max_avg_min_temp)
            .bind(filter.min_total_precipitation)
            .bind(pagination_input.page_size + 1)
            .bind(pagination_input.start_index)
            .fetch_all(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query for yearly statistics list: {err}")))?;
        let (elements, pagination_output) = paginate(results.into_iter().map(YearlyWeatherStats::from).collect(), &pagination_input);
        Ok(ListOutputType::new(elements, pagination_output))
    }
}

fn bind_yearly_stats<'q>(
    query: QueryAs<'q, Postgres, QueryYearlyStatsDbResp, PgArguments>,
    stats_input: &YearlyWeatherStatsInputType,
) -> QueryAs<'q, Postgres, QueryYearlyStatsDbResp, PgArguments> {
    query
        .bind(stats_input.station_id.clone())
        .bind(stats_input.year)
        .bind(stats_input.avg_max_temp)
        .bind(stats_input.avg_min_temp)
        .bind(stats_input.max_temp)
        .bind(stats_input.min_temp)
        .bind(stats_input.total_precipitation)
        .bind(stats_input.avg_precipitation)
        .bind(stats_input.max_precipitation)
        .bind(stats_input.total_records)
        .bind(stats_input.records_with_temp)
        .bind(stats_input.records_with_precipitation)
}

fn yearly_stats_subject(stats_input: &YearlyWeatherStatsInputType) -> String {
    format!("Yearly statistics for station {} and year {}", stats_input.station_id, stats_input.year)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_upsert_keeps_created_at() {
        assert!(UPSERT_YEARLY_STATS.contains("ON CONFLICT (station_id, year)"));
        assert!(!UPSERT_YEARLY_STATS.contains("created_at ="));
        assert!(!UPDATE_YEARLY_STATS.contains("created_at ="));
    }

    #[test]
    fn test_station_is_locked_before_counting() {
        assert!(LOCK_STATION.ends_with("FOR UPDATE"));
        assert!(DELETE_YEARLY_STATS_RANGE.starts_with("DELETE FROM yearly_weather_stats"));
    }

    #[test]
    fn test_insert_has_no_conflict_clause() {
        assert!(!ADD_YEARLY_STATS.contains("ON CONFLICT"));
        assert!(ADD_YEARLY_STATS.ends_with("created_at, updated_at"));
    }
}
