//! Conversions for values stored in tenths of a unit.
//!
//! Temperatures are stored in tenths of a degree Celsius and precipitation in tenths of a millimeter.

use rust_decimal::{Decimal, RoundingStrategy};

const TEN: Decimal = Decimal::TEN;

/**
 * Converts tenths of a unit to whole units, e.g. 250 tenths of °C to 25.0 °C.
 */
pub fn tenths_to_units(tenths: Option<i32>) -> Option<Decimal> {
    tenths.map(|value| Decimal::from(value) / TEN)
}

/**
 * Converts a fixed-point tenths value to whole units, e.g. 250.5 tenths of mm to 25.05 mm.
 */
pub fn decimal_tenths_to_units(tenths: Option<Decimal>) -> Option<Decimal> {
    tenths.map(|value| value / TEN)
}

/**
 * Rounds a value half away from zero to the given number of decimal places.
 */
pub fn round_half_up(value: Decimal, decimal_places: u32) -> Decimal {
    value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero)
}

/**
 * Percentage of records carrying data. Zero when there are no records at all.
 */
pub fn data_completeness(records_with_data: i32, total_records: i32) -> Decimal {
    if total_records <= 0 {
        return Decimal::ZERO;
    }
    Decimal::from(records_with_data) * Decimal::ONE_HUNDRED / Decimal::from(total_records)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_tenths_to_units() {
        assert_eq!(tenths_to_units(Some(250)), Some(Decimal::from_str("25").unwrap()));
        assert_eq!(tenths_to_units(Some(-55)), Some(Decimal::from_str("-5.5").unwrap()));
        assert_eq!(tenths_to_units(None), None);
    }

    #[test]
    fn test_decimal_tenths_to_units() {
        assert_eq!(decimal_tenths_to_units(Some(Decimal::from_str("125.5").unwrap())), Some(Decimal::from_str("12.55").unwrap()));
        assert_eq!(decimal_tenths_to_units(None), None);
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(Decimal::from_str("25.45").unwrap(), 1), Decimal::from_str("25.5").unwrap());
        assert_eq!(round_half_up(Decimal::from_str("-25.45").unwrap(), 1), Decimal::from_str("-25.5").unwrap());
        assert_eq!(round_half_up(Decimal::from_str("25.456").unwrap(), 2), Decimal::from_str("25.46").unwrap());
    }

    #[test]
    fn test_data_completeness() {
        assert_eq!(data_completeness(80, 100), Decimal::from(80));
        assert_eq!(data_completeness(50, 0), Decimal::ZERO);
    }
}
