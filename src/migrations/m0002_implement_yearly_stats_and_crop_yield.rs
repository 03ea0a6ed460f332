//! Replaces the placeholder statistics and yield tables with the full tables.
//!
//! One-way: the placeholders are dropped together with any rows they held, so there is no backward step.

use crate::migrations::{
    m0001_initial,
    tables::{crop_yields, crop_yields_placeholder, yearly_weather_stats, yearly_weather_stats_placeholder},
};
use crate::model::migration::{Migration, Operation};

pub const ID: &str = "0002_implement_yearly_stats_and_crop_yield";

pub fn migration() -> Migration {
    Migration {
        id: ID,
        predecessor: Some(m0001_initial::ID),
        description: "BREAKING: replace placeholder yearly weather stats and crop yield tables (drops their rows)",
        forward: vec![
            Operation::DropTable(yearly_weather_stats_placeholder()),
            Operation::DropTable(crop_yields_placeholder()),
            Operation::CreateTable(yearly_weather_stats()),
            Operation::CreateTable(crop_yields()),
        ],
        backward: None,
    }
}
