//! Initial schema: stations, daily observations and placeholders for the statistics and yield tables.

use crate::migrations::tables::{crop_yields_placeholder, daily_weather, weather_stations, yearly_weather_stats_placeholder};
use crate::model::migration::{Migration, Operation};

pub const ID: &str = "0001_initial";

pub fn migration() -> Migration {
    Migration {
        id: ID,
        predecessor: None,
        description: "Create weather stations, daily weather and placeholder statistics tables",
        forward: vec![
            Operation::CreateTable(weather_stations()),
            Operation::CreateTable(daily_weather()),
            Operation::CreateTable(yearly_weather_stats_placeholder()),
            Operation::CreateTable(crop_yields_placeholder()),
        ],
        backward: Some(vec![
            Operation::DropTable(crop_yields_placeholder()),
            Operation::DropTable(yearly_weather_stats_placeholder()),
            Operation::DropTable(daily_weather()),
            Operation::DropTable(weather_stations()),
        ]),
    }
}
