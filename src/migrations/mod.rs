//! Schema migrations of the weather and crop database.
//!
//! Each migration lives in its own module named after its id. New migrations are appended with the
//! latest id as predecessor; applied migrations are never edited.

use crate::model::{
    apperror::ApplicationError,
    migration::{Migration, MigrationChain},
};

mod m0001_initial;
mod m0002_implement_yearly_stats_and_crop_yield;
pub mod tables;

pub fn migrations() -> Vec<Migration> {
    vec![m0001_initial::migration(), m0002_implement_yearly_stats_and_crop_yield::migration()]
}

/**
 * The ordered migration chain of this build.
 */
pub fn chain() -> Result<MigrationChain, ApplicationError> {
    MigrationChain::new(migrations())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::migrations::tables::{CROP_YIELDS, CROP_YIELDS_PLACEHOLDER, DAILY_WEATHER, WEATHER_STATIONS, YEARLY_WEATHER_STATS, YEARLY_WEATHER_STATS_PLACEHOLDER, crop_yields, yearly_weather_stats};

    #[test]
    fn test_chain_order() {
        let chain = chain().unwrap();
        let ids: Vec<&str> = chain.iter().map(|migration| migration.id).collect();
        assert_eq!(ids, vec!["0001_initial", "0002_implement_yearly_stats_and_crop_yield"]);
    }

    #[test]
    fn test_final_schema_has_no_placeholder_tables() {
        let schema = chain().unwrap().final_schema().unwrap();
        let mut expected = vec![CROP_YIELDS, DAILY_WEATHER, WEATHER_STATIONS, YEARLY_WEATHER_STATS];
        expected.sort_unstable();
        assert_eq!(schema.table_names(), expected);
        assert!(!schema.tables.contains_key(YEARLY_WEATHER_STATS_PLACEHOLDER));
        assert!(!schema.tables.contains_key(CROP_YIELDS_PLACEHOLDER));
        assert_eq!(schema.tables[YEARLY_WEATHER_STATS], yearly_weather_stats());
        assert_eq!(schema.tables[CROP_YIELDS], crop_yields());
    }

    #[test]
    fn test_initial_schema_has_placeholders() {
        let schema = chain().unwrap().schema_after(1).unwrap();
        assert!(schema.tables.contains_key(YEARLY_WEATHER_STATS_PLACEHOLDER));
        assert!(schema.tables.contains_key(CROP_YIELDS_PLACEHOLDER));
    }

    #[test]
    fn test_placeholder_replacement_is_one_way_and_breaking() {
        let chain = chain().unwrap();
        let replacement = chain.get("0002_implement_yearly_stats_and_crop_yield").unwrap();
        assert!(!replacement.is_reversible());
        assert!(replacement.is_breaking());
        let initial = chain.get("0001_initial").unwrap();
        assert!(initial.is_reversible());
        assert!(!initial.is_breaking());
    }

    #[test]
    fn test_initial_backward_reverts_forward() {
        let chain = chain().unwrap();
        let initial = chain.get("0001_initial").unwrap();
        let mut schema = chain.schema_after(1).unwrap();
        for operation in initial.backward.as_ref().unwrap() {
            operation.apply_to(&mut schema).unwrap();
        }
        assert!(schema.tables.is_empty());
    }
}
