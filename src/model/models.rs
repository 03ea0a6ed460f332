use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::model::{
    apperror::ApplicationError,
    units::{data_completeness, decimal_tenths_to_units, round_half_up, tenths_to_units},
    validation::{check_decimal, check_max_length, check_min, check_not_empty, check_optional_min, check_optional_range, check_range, check_year},
};

pub const DEFAULT_CROP_TYPE: &str = "corn_grain";
pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_YIELD_UNIT: &str = "thousand_metric_tons";

/**
 * Weather station metadata. Owned by the station ingestion process, referenced by yearly statistics.
 */
#[derive(Debug, Clone, Serialize)]
pub struct WeatherStation {
    pub station_id: String,
    pub name: String,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub elevation: Option<Decimal>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/**
 * Input for adding a weather station.
 */
#[derive(Debug, Clone)]
pub struct WeatherStationAddInputType {
    pub station_id: String,
    pub name: String,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub elevation: Option<Decimal>,
    pub state: String,
}

impl WeatherStationAddInputType {
    pub fn new(station_id: &str) -> Self {
        WeatherStationAddInputType { station_id: station_id.to_string(), name: String::new(), latitude: None, longitude: None, elevation: None, state: String::new() }
    }

    /**
     * Validates the station against its column bounds.
     *
     * # Returns
     * The validated input, or a validation error naming the first offending field.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        check_not_empty("station_id", &self.station_id)?;
        check_max_length("station_id", &self.station_id, 20)?;
        check_max_length("name", &self.name, 255)?;
        check_decimal("latitude", self.latitude, 9, 6)?;
        check_optional_range("latitude", self.latitude, Decimal::from(-90), Decimal::from(90))?;
        check_decimal("longitude", self.longitude, 9, 6)?;
        check_optional_range("longitude", self.longitude, Decimal::from(-180), Decimal::from(180))?;
        check_decimal("elevation", self.elevation, 8, 2)?;
        check_max_length("state", &self.state, 2)?;
        Ok(self)
    }
}

/**
 * Input for one daily observation. Temperatures in tenths of °C, precipitation in tenths of mm.
 */
#[derive(Debug, Clone)]
pub struct DailyWeatherAddInputType {
    pub station_id: String,
    pub date: NaiveDate,
    pub max_temp: Option<i32>,
    pub min_temp: Option<i32>,
    pub precipitation: Option<i32>,
}

impl DailyWeatherAddInputType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        check_not_empty("station_id", &self.station_id)?;
        check_optional_min("precipitation", self.precipitation, 0)?;
        if let (Some(max_temp), Some(min_temp)) = (self.max_temp, self.min_temp) {
            if max_temp < min_temp {
                return Err(ApplicationError::validation("max_temp", format!("must not be less than min_temp ({max_temp} < {min_temp})")));
            }
        }
        Ok(self)
    }
}

/**
 * Aggregated yearly statistics for one weather station.
 */
#[derive(Debug, Clone, Serialize)]
pub struct YearlyWeatherStats {
    pub id: i64,
    pub station_id: String,
    pub year: i32,
    /**
     * Average maximum temperature in tenths of °C.
     */
    pub avg_max_temp: Option<Decimal>,
    /**
     * Average minimum temperature in tenths of °C.
     */
    pub avg_min_temp: Option<Decimal>,
    pub max_temp: Option<i32>,
    pub min_temp: Option<i32>,
    /**
     * Total precipitation in tenths of mm.
     */
    pub total_precipitation: Option<i32>,
    pub avg_precipitation: Option<Decimal>,
    pub max_precipitation: Option<i32>,
    pub total_records: i32,
    pub records_with_temp: i32,
    pub records_with_precipitation: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl YearlyWeatherStats {
    pub fn avg_max_temp_celsius(&self) -> Option<Decimal> {
        decimal_tenths_to_units(self.avg_max_temp)
    }

    pub fn avg_min_temp_celsius(&self) -> Option<Decimal> {
        decimal_tenths_to_units(self.avg_min_temp)
    }

    pub fn max_temp_celsius(&self) -> Option<Decimal> {
        tenths_to_units(self.max_temp)
    }

    pub fn min_temp_celsius(&self) -> Option<Decimal> {
        tenths_to_units(self.min_temp)
    }

    pub fn total_precipitation_mm(&self) -> Option<Decimal> {
        tenths_to_units(self.total_precipitation)
    }

    pub fn avg_precipitation_mm(&self) -> Option<Decimal> {
        decimal_tenths_to_units(self.avg_precipitation)
    }

    /**
     * Percentage of daily records with both temperatures.
     */
    pub fn temp_completeness(&self) -> Decimal {
        data_completeness(self.records_with_temp, self.total_records)
    }

    pub fn precipitation_completeness(&self) -> Decimal {
        data_completeness(self.records_with_precipitation, self.total_records)
    }
}

/**
 * Input for writing yearly statistics.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct YearlyWeatherStatsInputType {
    pub station_id: String,
    pub year: i32,
    pub avg_max_temp: Option<Decimal>,
    pub avg_min_temp: Option<Decimal>,
    pub max_temp: Option<i32>,
    pub min_temp: Option<i32>,
    pub total_precipitation: Option<i32>,
    pub avg_precipitation: Option<Decimal>,
    pub max_precipitation: Option<i32>,
    pub total_records: i32,
    pub records_with_temp: i32,
    pub records_with_precipitation: i32,
}

impl YearlyWeatherStatsInputType {
    /**
     * Creates an input with no measurements and zeroed counters.
     */
    pub fn new(station_id: &str, year: i32) -> Self {
        YearlyWeatherStatsInputType {
            station_id: station_id.to_string(),
            year,
            avg_max_temp: None,
            avg_min_temp: None,
            max_temp: None,
            min_temp: None,
            total_precipitation: None,
            avg_precipitation: None,
            max_precipitation: None,
            total_records: 0,
            records_with_temp: 0,
            records_with_precipitation: 0,
        }
    }

    /**
     * Builds the yearly row from aggregated daily records.
     *
     * # Arguments
     * `station_id`: Station the daily records belong to.
     * `year`: Year the daily records belong to.
     * `aggregate`: Aggregated values of the daily records.
     *
     * # Returns
     * `None` when there were no daily records, otherwise the input with averages rounded half up to one decimal.
     */
    pub fn from_aggregate(station_id: &str, year: i32, aggregate: DailyAggregate) -> Result<Option<Self>, ApplicationError> {
        if aggregate.total_records == 0 {
            return Ok(None);
        }
        Ok(Some(YearlyWeatherStatsInputType {
            station_id: station_id.to_string(),
            year,
            avg_max_temp: aggregate.avg_max_temp.map(|value| round_half_up(value, 1)),
            avg_min_temp: aggregate.avg_min_temp.map(|value| round_half_up(value, 1)),
            max_temp: aggregate.max_temp,
            min_temp: aggregate.min_temp,
            total_precipitation: aggregate.total_precipitation.map(|value| narrow("total_precipitation", value)).transpose()?,
            avg_precipitation: aggregate.avg_precipitation.map(|value| round_half_up(value, 1)),
            max_precipitation: aggregate.max_precipitation,
            total_records: narrow("total_records", aggregate.total_records)?,
            records_with_temp: narrow("records_with_temp", aggregate.records_with_temp)?,
            records_with_precipitation: narrow("records_with_precipitation", aggregate.records_with_precipitation)?,
        }))
    }

    /**
     * Validates the statistics against their column bounds.
     *
     * # Returns
     * The validated input, or a validation error naming the first offending field.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        check_not_empty("station_id", &self.station_id)?;
        check_year("year", self.year)?;
        check_decimal("avg_max_temp", self.avg_max_temp, 6, 1)?;
        check_decimal("avg_min_temp", self.avg_min_temp, 6, 1)?;
        check_optional_min("total_precipitation", self.total_precipitation, 0)?;
        check_decimal("avg_precipitation", self.avg_precipitation, 8, 1)?;
        check_optional_min("avg_precipitation", self.avg_precipitation, Decimal::ZERO)?;
        check_optional_min("max_precipitation", self.max_precipitation, 0)?;
        check_min("total_records", self.total_records, 0)?;
        check_min("records_with_temp", self.records_with_temp, 0)?;
        check_min("records_with_precipitation", self.records_with_precipitation, 0)?;
        Ok(self)
    }
}

/**
 * Aggregated values over the daily records of one station and year, as returned by the database.
 */
#[derive(Debug, Clone, Default)]
pub struct DailyAggregate {
    pub avg_max_temp: Option<Decimal>,
    pub avg_min_temp: Option<Decimal>,
    pub max_temp: Option<i32>,
    pub min_temp: Option<i32>,
    pub total_precipitation: Option<i64>,
    pub avg_precipitation: Option<Decimal>,
    pub max_precipitation: Option<i32>,
    pub total_records: i64,
    pub records_with_temp: i64,
    pub records_with_precipitation: i64,
}

fn narrow(field: &str, value: i64) -> Result<i32, ApplicationError> {
    i32::try_from(value).map_err(|_err| ApplicationError::validation(field, format!("must fit a 32-bit integer, got {value}")))
}

/**
 * Crop yield for a crop type in a country, optionally a state, for one year.
 */
#[derive(Debug, Clone, Serialize)]
pub struct CropYield {
    pub id: i64,
    pub year: i32,
    pub crop_type: String,
    pub country: String,
    /**
     * State code. Empty for national-level records.
     */
    pub state: String,
    pub yield_value: i32,
    pub yield_unit: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CropYield {
    pub fn is_national(&self) -> bool {
        self.state.is_empty()
    }
}

/**
 * Input for writing a crop yield.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct CropYieldInputType {
    pub year: i32,
    pub crop_type: String,
    pub country: String,
    pub state: String,
    pub yield_value: i32,
    pub yield_unit: String,
    pub source: String,
}

impl CropYieldInputType {
    /**
     * Creates a national-level corn grain yield for the US with the default unit.
     */
    pub fn new(year: i32, yield_value: i32) -> Self {
        CropYieldInputType {
            year,
            crop_type: DEFAULT_CROP_TYPE.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            state: String::new(),
            yield_value,
            yield_unit: DEFAULT_YIELD_UNIT.to_string(),
            source: String::new(),
        }
    }

    /**
     * Validates the crop yield against its column bounds.
     *
     * # Returns
     * The validated input, or a validation error naming the first offending field.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        check_year("year", self.year)?;
        check_not_empty("crop_type", &self.crop_type)?;
        check_max_length("crop_type", &self.crop_type, 50)?;
        check_not_empty("country", &self.country)?;
        check_max_length("country", &self.country, 3)?;
        check_max_length("state", &self.state, 2)?;
        check_min("yield_value", self.yield_value, 0)?;
        check_not_empty("yield_unit", &self.yield_unit)?;
        check_max_length("yield_unit", &self.yield_unit, 30)?;
        check_max_length("source", &self.source, 100)?;
        Ok(self)
    }
}

/**
 * Filter for listing yearly statistics. Absent fields do not restrict the result.
 */
#[derive(Debug, Clone, Default)]
pub struct YearlyStatsFilter {
    pub station_id: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub min_avg_max_temp: Option<Decimal>,
    pub max_avg_min_temp: Option<Decimal>,
    pub min_total_precipitation: Option<i32>,
}

impl YearlyStatsFilter {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        validate_year_span(self.year_from, self.year_to)?;
        Ok(self)
    }
}

/**
 * Filter for listing crop yields. Absent fields do not restrict the result.
 */
#[derive(Debug, Clone, Default)]
pub struct CropYieldFilter {
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub crop_type: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
}

impl CropYieldFilter {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        validate_year_span(self.year_from, self.year_to)?;
        Ok(self)
    }
}

/**
 * Selects the station years to recompute from daily records. Absent fields do not restrict the selection.
 */
#[derive(Debug, Clone, Default)]
pub struct AggregationScope {
    pub station_id: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    /**
     * Compute and report without writing anything.
     */
    pub dry_run: bool,
    /**
     * Delete the yearly statistics of the selected station and years before recomputing.
     */
    pub clear: bool,
}

impl AggregationScope {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        validate_year_span(self.year_from, self.year_to)?;
        Ok(self)
    }
}

/**
 * Outcome of a recompute run.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationSummary {
    /**
     * Station years with daily records in the scope.
     */
    pub station_years: usize,
    /**
     * Yearly statistics rows written, or that would be written in a dry run.
     */
    pub computed: usize,
    /**
     * Yearly statistics rows deleted before recomputing.
     */
    pub cleared: u64,
}

fn validate_year_span(year_from: Option<i32>, year_to: Option<i32>) -> Result<(), ApplicationError> {
    if let Some(year_from) = year_from {
        check_year("year_from", year_from)?;
    }
    if let Some(year_to) = year_to {
        check_year("year_to", year_to)?;
    }
    if let (Some(year_from), Some(year_to)) = (year_from, year_to) {
        check_range("year_from", year_from, crate::model::validation::YEAR_MIN, year_to)?;
    }
    Ok(())
}

/**
 * Pagination input containing the start index and page size.
 */
#[derive(Debug, Clone, Copy)]
pub struct PaginationInput {
    pub start_index: i64,
    pub page_size: i64,
}

impl PaginationInput {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        check_min("start_index", self.start_index, 0)?;
        check_range("page_size", self.page_size, 1, 1000)?;
        Ok(self)
    }
}

impl Default for PaginationInput {
    fn default() -> Self {
        PaginationInput { start_index: 0, page_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationOutput {
    pub start_index: i64,
    pub page_size: i64,
    pub has_more: bool,
}

impl PaginationOutput {
    pub fn new(start_index: i64, page_size: i64, has_more: bool) -> Self {
        PaginationOutput { start_index, page_size, has_more }
    }
}

/**
 * One page of elements with its pagination information.
 */
#[derive(Debug, Clone, Serialize)]
pub struct ListOutputType<T> {
    pub elements: Vec<T>,
    pub pagination: PaginationOutput,
}

impl<T> ListOutputType<T> {
    pub fn new(elements: Vec<T>, pagination: PaginationOutput) -> Self {
        ListOutputType { elements, pagination }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use crate::model::apperror::ErrorType;

    use super::*;

    fn decimal(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn test_yearly_stats_defaults() {
        let input = YearlyWeatherStatsInputType::new("USC00110072", 1985);
        assert_eq!(input.total_records, 0);
        assert_eq!(input.records_with_temp, 0);
        assert_eq!(input.records_with_precipitation, 0);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_yearly_stats_year_bounds() {
        assert!(YearlyWeatherStatsInputType::new("USC00110072", 1800).validate().is_ok());
        assert!(YearlyWeatherStatsInputType::new("USC00110072", 2100).validate().is_ok());
        let error = YearlyWeatherStatsInputType::new("USC00110072", 2101).validate().err().unwrap();
        assert_eq!(error.error_type, ErrorType::Validation);
        assert_eq!(error.field.as_deref(), Some("year"));
    }

    #[test]
    fn test_yearly_stats_rejects_negative_precipitation() {
        let mut input = YearlyWeatherStatsInputType::new("USC00110072", 2000);
        input.avg_precipitation = Some(decimal("-0.1"));
        let error = input.validate().err().unwrap();
        assert_eq!(error.field.as_deref(), Some("avg_precipitation"));
    }

    #[test]
    fn test_yearly_stats_reports_first_invalid_field() {
        let mut input = YearlyWeatherStatsInputType::new("USC00110072", 1700);
        input.total_records = -1;
        let error = input.validate().err().unwrap();
        assert_eq!(error.field.as_deref(), Some("year"));
    }

    #[test]
    fn test_yearly_stats_rejects_too_precise_average() {
        let mut input = YearlyWeatherStatsInputType::new("USC00110072", 2000);
        input.avg_max_temp = Some(decimal("123.45"));
        let error = input.validate().err().unwrap();
        assert_eq!(error.field.as_deref(), Some("avg_max_temp"));
    }

    #[test]
    fn test_from_aggregate_rounds_half_up() {
        let aggregate = DailyAggregate {
            avg_max_temp: Some(decimal("251.45")),
            avg_min_temp: Some(decimal("-12.25")),
            max_temp: Some(380),
            min_temp: Some(-210),
            total_precipitation: Some(9120),
            avg_precipitation: Some(decimal("24.9863")),
            max_precipitation: Some(812),
            total_records: 365,
            records_with_temp: 360,
            records_with_precipitation: 365,
        };
        let input = YearlyWeatherStatsInputType::from_aggregate("USC00110072", 1999, aggregate).unwrap().unwrap();
        assert_eq!(input.avg_max_temp, Some(decimal("251.5")));
        assert_eq!(input.avg_min_temp, Some(decimal("-12.3")));
        assert_eq!(input.avg_precipitation, Some(decimal("25.0")));
        assert_eq!(input.total_precipitation, Some(9120));
        assert_eq!(input.total_records, 365);
        assert_eq!(input.records_with_temp, 360);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_from_aggregate_without_records() {
        let input = YearlyWeatherStatsInputType::from_aggregate("USC00110072", 1999, DailyAggregate::default()).unwrap();
        assert!(input.is_none());
    }

    #[test]
    fn test_crop_yield_defaults() {
        let input = CropYieldInputType::new(2020, 360_252);
        assert_eq!(input.crop_type, "corn_grain");
        assert_eq!(input.country, "US");
        assert_eq!(input.yield_unit, "thousand_metric_tons");
        assert!(input.state.is_empty());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_crop_yield_bounds() {
        let error = CropYieldInputType::new(2020, -1).validate().err().unwrap();
        assert_eq!(error.field.as_deref(), Some("yield_value"));

        let mut input = CropYieldInputType::new(2020, 1);
        input.state = "IOW".to_string();
        assert_eq!(input.validate().err().unwrap().field.as_deref(), Some("state"));

        let mut input = CropYieldInputType::new(2020, 1);
        input.country = "USAX".to_string();
        assert_eq!(input.validate().err().unwrap().field.as_deref(), Some("country"));

        assert_eq!(CropYieldInputType::new(1799, 1).validate().err().unwrap().field.as_deref(), Some("year"));
    }

    #[test]
    fn test_station_coordinates() {
        let mut input = WeatherStationAddInputType::new("USC00110072");
        input.latitude = Some(decimal("41.234567"));
        input.longitude = Some(decimal("-88.5"));
        assert!(input.clone().validate().is_ok());
        input.latitude = Some(decimal("91"));
        assert_eq!(input.validate().err().unwrap().field.as_deref(), Some("latitude"));
    }

    #[test]
    fn test_daily_weather_temperature_order() {
        let input = DailyWeatherAddInputType { station_id: "USC00110072".to_string(), date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(), max_temp: Some(-20), min_temp: Some(10), precipitation: None };
        assert_eq!(input.validate().err().unwrap().field.as_deref(), Some("max_temp"));
    }

    #[test]
    fn test_filter_year_span() {
        assert!(YearlyStatsFilter { year_from: Some(1990), year_to: Some(2000), ..Default::default() }.validate().is_ok());
        assert!(YearlyStatsFilter { year_from: Some(2000), year_to: Some(1990), ..Default::default() }.validate().is_err());
        assert!(CropYieldFilter { year_to: Some(2200), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_aggregation_scope_years() {
        assert!(AggregationScope::default().validate().is_ok());
        assert!(AggregationScope { year_from: Some(1990), year_to: Some(1990), ..Default::default() }.validate().is_ok());
        let error = AggregationScope { year_from: Some(2001), year_to: Some(2000), ..Default::default() }.validate().err().unwrap();
        assert_eq!(error.field.as_deref(), Some("year_from"));
        assert!(AggregationScope { year_to: Some(1799), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(PaginationInput::default().validate().is_ok());
        assert!(PaginationInput { start_index: -1, page_size: 10 }.validate().is_err());
        assert!(PaginationInput { start_index: 0, page_size: 0 }.validate().is_err());
    }

    #[test]
    fn test_unit_accessors() {
        let now = Utc::now();
        let stats = YearlyWeatherStats {
            id: 1,
            station_id: "USC00110072".to_string(),
            year: 2000,
            avg_max_temp: Some(decimal("250.5")),
            avg_min_temp: None,
            max_temp: Some(380),
            min_temp: None,
            total_precipitation: Some(9125),
            avg_precipitation: None,
            max_precipitation: None,
            total_records: 1,
            records_with_temp: 1,
            records_with_precipitation: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(stats.avg_max_temp_celsius(), Some(decimal("25.05")));
        assert_eq!(stats.max_temp_celsius(), Some(decimal("38")));
        assert_eq!(stats.total_precipitation_mm(), Some(decimal("912.5")));
        assert_eq!(stats.min_temp_celsius(), None);
        assert_eq!(stats.temp_completeness(), Decimal::from(100));
    }
}
