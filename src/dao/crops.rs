use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, postgres::PgArguments, query::QueryAs};
use tracing::{Instrument, instrument};

use crate::dao::{handle_database_error, paginate};
use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{CropYield, CropYieldFilter, CropYieldInputType, ListOutputType, PaginationInput},
};

/**
 * Database response type for querying crop yields.
 */
pub type QueryCropYieldDbResp = (i64, i32, String, String, String, i32, String, String, DateTime<Utc>, DateTime<Utc>);

macro_rules! crop_yield_columns {
    () => {
        "id, year, crop_type, country, state, yield_value, yield_unit, source, created_at, updated_at"
    };
}

macro_rules! crop_yield_insert {
    () => {
        "INSERT INTO crop_yields (year, crop_type, country, state, yield_value, yield_unit, source) VALUES ($1, $2, $3, $4, $5, $6, $7)"
    };
}

/**
 * SQL query to insert a crop yield. Fails on an existing (year, crop type, country, state) row.
 */
const ADD_CROP_YIELD: &str = concat!(crop_yield_insert!(), " RETURNING ", crop_yield_columns!());

/**
 * SQL query to insert a crop yield or replace the value, unit and source of the existing row.
 */
const UPSERT_CROP_YIELD: &str = concat!(
    crop_yield_insert!(),
    " ON CONFLICT (year, crop_type, country, state) DO UPDATE SET yield_value = EXCLUDED.yield_value, yield_unit = EXCLUDED.yield_unit, \
     source = EXCLUDED.source, updated_at = GREATEST(now(), crop_yields.updated_at + interval '1 microsecond') RETURNING ",
    crop_yield_columns!()
);

const UPDATE_CROP_YIELD: &str = concat!(
    "UPDATE crop_yields SET year = $1, crop_type = $2, country = $3, state = $4, yield_value = $5, yield_unit = $6, source = $7, \
     updated_at = GREATEST(now(), updated_at + interval '1 microsecond') WHERE id = $8 RETURNING ",
    crop_yield_columns!()
);

const GET_CROP_YIELD: &str = concat!("SELECT ", crop_yield_columns!(), " FROM crop_yields WHERE id = $1");

const DELETE_CROP_YIELD: &str = "DELETE FROM crop_yields WHERE id = $1";

/**
 * SQL query to list crop yields. An empty state filter selects national-level rows only.
 */
const QUERY_CROP_YIELD_LIST: &str = concat!(
    "SELECT ",
    crop_yield_columns!(),
    " FROM crop_yields
      WHERE ($1::integer IS NULL OR year >= $1) AND
            ($2::integer IS NULL OR year <= $2) AND
            ($3::varchar IS NULL OR crop_type = $3) AND
            ($4::varchar IS NULL OR country = $4) AND
            ($5::varchar IS NULL OR state = $5)
      ORDER BY year, crop_type, country, state
      LIMIT $6 OFFSET $7"
);

impl From<QueryCropYieldDbResp> for CropYield {
    fn from(row: QueryCropYieldDbResp) -> Self {
        CropYield {
            id: row.0,
            year: row.1,
            crop_type: row.2,
            country: row.3,
            state: row.4,
            yield_value: row.5,
            yield_unit: row.6,
            source: row.7,
            created_at: row.8,
            updated_at: row.9,
        }
    }
}

/**
 * DAO for crop yields.
 */
pub struct CropYieldDao {}

impl CropYieldDao {
    /**
     * Creates a new instance of `CropYieldDao`.
     */
    pub fn new() -> Self {
        CropYieldDao {}
    }

    /**
     * Inserts a crop yield.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `crop_yield_input`: The validated crop yield.
     *
     * # Returns
     * The stored row, or a `Conflict` error if the (year, crop type, country, state) combination exists.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_crop_yield(&self, transaction: &mut PgConnection, crop_yield_input: &CropYieldInputType) -> Result<CropYield, ApplicationError> {
        let span = tracing::Span::current();
        let result = bind_crop_yield(sqlx::query_as(ADD_CROP_YIELD), crop_yield_input)
            .fetch_one(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &crop_yield_subject(crop_yield_input)))?;
        Ok(CropYield::from(result))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn upsert_crop_yield(&self, transaction: &mut PgConnection, crop_yield_input: &CropYieldInputType) -> Result<CropYield, ApplicationError> {
        let span = tracing::Span::current();
        let result = bind_crop_yield(sqlx::query_as(UPSERT_CROP_YIELD), crop_yield_input)
            .fetch_one(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &crop_yield_subject(crop_yield_input)))?;
        Ok(CropYield::from(result))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_crop_yield(&self, transaction: &mut PgConnection, crop_yield_id: i64, crop_yield_input: &CropYieldInputType) -> Result<CropYield, ApplicationError> {
        let span = tracing::Span::current();
        let result = bind_crop_yield(sqlx::query_as(UPDATE_CROP_YIELD), crop_yield_input)
            .bind(crop_yield_id)
            .fetch_optional(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err, &crop_yield_subject(crop_yield_input)))?;
        result.map(CropYield::from).ok_or_else(|| ApplicationError::new(ErrorType::NotFound, format!("Crop yield {crop_yield_id} not found")))
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_crop_yield(&self, connection: &mut PgConnection, crop_yield_id: i64) -> Result<CropYield, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryCropYieldDbResp> = sqlx::query_as(GET_CROP_YIELD)
            .bind(crop_yield_id)
            .fetch_optional(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get crop yield: {err}")))?;
        result.map(CropYield::from).ok_or_else(|| ApplicationError::new(ErrorType::NotFound, format!("Crop yield {crop_yield_id} not found")))
    }

    /**
     * Retrieves a page of crop yields matching the filter.
     *
     * # Arguments
     * `connection`: The database connection.
     * `pagination_input`: The pagination input containing start index and page size.
     * `filter`: Optional year span, crop type, country and state.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn list_crop_yields(&self, connection: &mut PgConnection, pagination_input: PaginationInput, filter: CropYieldFilter) -> Result<ListOutputType<CropYield>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryCropYieldDbResp> = sqlx::query_as(QUERY_CROP_YIELD_LIST)
            .bind(filter.year_from)
            .bind(filter.year_to)
            .bind(filter.crop_type)
            .bind(filter.country)
            .bind(filter.state)
            .bind(pagination_input.page_size + 1)
            .bind(pagination_input.start_index)
            .fetch_all(&mut *connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query for crop yield list: {err}")))?;
        let (elements, pagination_output) = paginate(results.into_iter().map(CropYield::from).collect(), &pagination_input);
        Ok(ListOutputType::new(elements, pagination_output))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_crop_yield(&self, transaction: &mut PgConnection, crop_yield_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_CROP_YIELD)
            .bind(crop_yield_id)
            .execute(&mut *transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete crop yield: {err}")))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Crop yield with ID {} not found for deletion", crop_yield_id);
            return Err(ApplicationError::new(ErrorType::NotFound, format!("Crop yield {crop_yield_id} not found")));
        }
        Ok(())
    }
}

fn bind_crop_yield<'q>(query: QueryAs<'q, Postgres, QueryCropYieldDbResp, PgArguments>, crop_yield_input: &CropYieldInputType) -> QueryAs<'q, Postgres, QueryCropYieldDbResp, PgArguments> {
    query
        .bind(crop_yield_input.year)
        .bind(crop_yield_input.crop_type.clone())
        .bind(crop_yield_input.country.clone())
        .bind(crop_yield_input.state.clone())
        .bind(crop_yield_input.yield_value)
        .bind(crop_yield_input.yield_unit.clone())
        .bind(crop_yield_input.source.clone())
}

fn crop_yield_subject(crop_yield_input: &CropYieldInputType) -> String {
    let region = if crop_yield_input.state.is_empty() { crop_yield_input.country.clone() } else { format!("{}/{}", crop_yield_input.country, crop_yield_input.state) };
    format!("Crop yield {} for {} in {}", crop_yield_input.crop_type, region, crop_yield_input.year)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subject_names_region() {
        let mut input = CropYieldInputType::new(2020, 1);
        assert_eq!(crop_yield_subject(&input), "Crop yield corn_grain for US in 2020");
        input.state = "IA".to_string();
        assert_eq!(crop_yield_subject(&input), "Crop yield corn_grain for US/IA in 2020");
    }

    #[test]
    fn test_upsert_conflicts_on_natural_key() {
        assert!(UPSERT_CROP_YIELD.contains("ON CONFLICT (year, crop_type, country, state)"));
        assert!(!UPSERT_CROP_YIELD.contains("created_at ="));
    }
}
