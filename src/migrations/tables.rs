//! Table definitions of the weather and crop schema.
//!
//! Index names match the ones already present in deployed databases and are part of the external contract.

use crate::model::schema::{ColumnDef, ColumnType, DefaultValue, OnDelete, TableDef};

pub const WEATHER_STATIONS: &str = "weather_stations";
pub const DAILY_WEATHER: &str = "daily_weather";
pub const YEARLY_WEATHER_STATS: &str = "yearly_weather_stats";
pub const CROP_YIELDS: &str = "crop_yields";

/**
 * Tables created by the initial migration as stand-ins for the statistics and yield models, later
 * replaced wholesale.
 */
pub const YEARLY_WEATHER_STATS_PLACEHOLDER: &str = "models_yearlyweatherstats";
pub const CROP_YIELDS_PLACEHOLDER: &str = "models_cropyield";

const TENTHS_AVERAGE: ColumnType = ColumnType::Numeric { precision: 6, scale: 1 };

pub fn weather_stations() -> TableDef {
    TableDef::new(WEATHER_STATIONS)
        .column(ColumnDef::new("station_id", ColumnType::VarChar(20)).primary_key())
        .column(ColumnDef::new("name", ColumnType::VarChar(255)).not_null().default(DefaultValue::Text("")))
        .column(ColumnDef::new("latitude", ColumnType::Numeric { precision: 9, scale: 6 }))
        .column(ColumnDef::new("longitude", ColumnType::Numeric { precision: 9, scale: 6 }))
        .column(ColumnDef::new("elevation", ColumnType::Numeric { precision: 8, scale: 2 }))
        .column(ColumnDef::new("state", ColumnType::VarChar(2)).not_null().default(DefaultValue::Text("")))
        .column(ColumnDef::timestamp("created_at"))
        .column(ColumnDef::timestamp("updated_at"))
        .index("weather_stations_state_idx", &["state"])
        .index("weather_stations_created_at_idx", &["created_at"])
}

pub fn daily_weather() -> TableDef {
    TableDef::new(DAILY_WEATHER)
        .column(ColumnDef::id())
        .column(ColumnDef::new("station_id", ColumnType::VarChar(20)).not_null().references(WEATHER_STATIONS, "station_id", OnDelete::Cascade))
        .column(ColumnDef::new("date", ColumnType::Date).not_null())
        .column(ColumnDef::new("max_temp", ColumnType::Integer))
        .column(ColumnDef::new("min_temp", ColumnType::Integer))
        .column(ColumnDef::new("precipitation", ColumnType::Integer))
        .column(ColumnDef::timestamp("created_at"))
        .column(ColumnDef::timestamp("updated_at"))
        .unique("daily_weather_station_id_date_uniq", &["station_id", "date"])
        .index("daily_weather_station_date_idx", &["station_id", "date"])
        .index("daily_weather_date_idx", &["date"])
        .index("daily_weather_station_date_max_temp_idx", &["station_id", "date", "max_temp"])
        .index("daily_weather_station_date_min_temp_idx", &["station_id", "date", "min_temp"])
        .index("daily_weather_station_date_precipitation_idx", &["station_id", "date", "precipitation"])
}

/**
 * Stand-in for the yearly statistics table. Carries only its identity.
 */
pub fn yearly_weather_stats_placeholder() -> TableDef {
    TableDef::new(YEARLY_WEATHER_STATS_PLACEHOLDER).column(ColumnDef::id())
}

pub fn crop_yields_placeholder() -> TableDef {
    TableDef::new(CROP_YIELDS_PLACEHOLDER).column(ColumnDef::id())
}

/**
 * Yearly statistics per station. Deleting a station deletes its statistics.
 */
pub fn yearly_weather_stats() -> TableDef {
    TableDef::new(YEARLY_WEATHER_STATS)
        .column(ColumnDef::id())
        .column(ColumnDef::new("station_id", ColumnType::VarChar(20)).not_null().references(WEATHER_STATIONS, "station_id", OnDelete::Cascade))
        .column(ColumnDef::new("year", ColumnType::Integer).not_null())
        .column(ColumnDef::new("avg_max_temp", TENTHS_AVERAGE))
        .column(ColumnDef::new("avg_min_temp", TENTHS_AVERAGE))
        .column(ColumnDef::new("max_temp", ColumnType::Integer))
        .column(ColumnDef::new("min_temp", ColumnType::Integer))
        .column(ColumnDef::new("total_precipitation", ColumnType::Integer))
        .column(ColumnDef::new("avg_precipitation", ColumnType::Numeric { precision: 8, scale: 1 }))
        .column(ColumnDef::new("max_precipitation", ColumnType::Integer))
        .column(ColumnDef::new("total_records", ColumnType::Integer).not_null().default(DefaultValue::Integer(0)))
        .column(ColumnDef::new("records_with_temp", ColumnType::Integer).not_null().default(DefaultValue::Integer(0)))
        .column(ColumnDef::new("records_with_precipitation", ColumnType::Integer).not_null().default(DefaultValue::Integer(0)))
        .column(ColumnDef::timestamp("created_at"))
        .column(ColumnDef::timestamp("updated_at"))
        .unique("yearly_weather_stats_station_id_year_uniq", &["station_id", "year"])
        .index("yearly_weat_station_65e3b3_idx", &["station_id", "year"])
        .index("yearly_weat_year_18a8f7_idx", &["year"])
        .index("yearly_weat_year_5d0c5a_idx", &["year", "avg_max_temp"])
        .index("yearly_weat_year_c0b93c_idx", &["year", "avg_min_temp"])
        .index("yearly_weat_year_4e7c67_idx", &["year", "total_precipitation"])
}

/**
 * Crop yields per year, crop type, country and state. An empty state marks a national-level record.
 */
pub fn crop_yields() -> TableDef {
    TableDef::new(CROP_YIELDS)
        .column(ColumnDef::id())
        .column(ColumnDef::new("year", ColumnType::Integer).not_null())
        .column(ColumnDef::new("crop_type", ColumnType::VarChar(50)).not_null().default(DefaultValue::Text("corn_grain")))
        .column(ColumnDef::new("country", ColumnType::VarChar(3)).not_null().default(DefaultValue::Text("US")))
        .column(ColumnDef::new("state", ColumnType::VarChar(2)).not_null().default(DefaultValue::Text("")))
        .column(ColumnDef::new("yield_value", ColumnType::Integer).not_null())
        .column(ColumnDef::new("yield_unit", ColumnType::VarChar(30)).not_null().default(DefaultValue::Text("thousand_metric_tons")))
        .column(ColumnDef::new("source", ColumnType::VarChar(100)).not_null().default(DefaultValue::Text("")))
        .column(ColumnDef::timestamp("created_at"))
        .column(ColumnDef::timestamp("updated_at"))
        .unique("crop_yields_year_crop_type_country_state_uniq", &["year", "crop_type", "country", "state"])
        .index("crop_yields_year_2fd844_idx", &["year"])
        .index("crop_yields_crop_ty_f4bf74_idx", &["crop_type", "year"])
        .index("crop_yields_country_a47e8a_idx", &["country", "year"])
        .index("crop_yields_year_6b02d0_idx", &["year", "yield_value"])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_yearly_stats_is_keyed_by_station_and_year() {
        let table = yearly_weather_stats();
        assert_eq!(table.unique.len(), 1);
        assert_eq!(table.unique[0].columns, vec!["station_id", "year"]);
        let station = table.find_column("station_id").unwrap();
        assert_eq!(station.references.as_ref().unwrap().on_delete, OnDelete::Cascade);
        assert!(!station.nullable);
    }

    #[test]
    fn test_every_yearly_stats_index_starts_with_station_or_year() {
        for index in yearly_weather_stats().indexes {
            assert!(matches!(index.columns[0], "station_id" | "year"), "{} is not usable for year filters", index.name);
        }
    }

    #[test]
    fn test_crop_yields_key_includes_state() {
        let table = crop_yields();
        assert_eq!(table.unique[0].columns, vec!["year", "crop_type", "country", "state"]);
        assert!(table.columns.iter().all(|column| column.references.is_none()));
    }

    #[test]
    fn test_counters_default_to_zero() {
        let table = yearly_weather_stats();
        for name in ["total_records", "records_with_temp", "records_with_precipitation"] {
            assert_eq!(table.find_column(name).unwrap().default, Some(DefaultValue::Integer(0)));
        }
    }
}
