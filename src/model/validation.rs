//! Declarative field bounds checked before a row is written.
//!
//! Every check names the offending field so that the caller can report it. Input types run their checks in
//! field order and stop at the first violation, so an invalid row is never partially written.

use std::fmt::Display;

use rust_decimal::Decimal;

use crate::model::apperror::ApplicationError;

pub const YEAR_MIN: i32 = 1800;
pub const YEAR_MAX: i32 = 2100;

/**
 * Checks that `value` lies in the closed range `[min, max]`.
 */
pub fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<(), ApplicationError>
where
    T: PartialOrd + Display,
{
    if value < min || value > max {
        return Err(ApplicationError::validation(field, format!("must be between {min} and {max}, got {value}")));
    }
    Ok(())
}

pub fn check_year(field: &str, year: i32) -> Result<(), ApplicationError> {
    check_range(field, year, YEAR_MIN, YEAR_MAX)
}

/**
 * Checks that `value` is at least `min`.
 */
pub fn check_min<T>(field: &str, value: T, min: T) -> Result<(), ApplicationError>
where
    T: PartialOrd + Display,
{
    if value < min {
        return Err(ApplicationError::validation(field, format!("must be at least {min}, got {value}")));
    }
    Ok(())
}

/**
 * Same as `check_min`, absent values always pass.
 */
pub fn check_optional_min<T>(field: &str, value: Option<T>, min: T) -> Result<(), ApplicationError>
where
    T: PartialOrd + Display,
{
    match value {
        Some(value) => check_min(field, value, min),
        None => Ok(()),
    }
}

pub fn check_optional_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<(), ApplicationError>
where
    T: PartialOrd + Display,
{
    match value {
        Some(value) => check_range(field, value, min, max),
        None => Ok(()),
    }
}

/**
 * Checks a string against the maximum length of its column, counted in characters.
 */
pub fn check_max_length(field: &str, value: &str, max_length: usize) -> Result<(), ApplicationError> {
    let length = value.chars().count();
    if length > max_length {
        return Err(ApplicationError::validation(field, format!("must be at most {max_length} characters, got {length}")));
    }
    Ok(())
}

pub fn check_not_empty(field: &str, value: &str) -> Result<(), ApplicationError> {
    if value.trim().is_empty() {
        return Err(ApplicationError::validation(field, "must not be empty".to_string()));
    }
    Ok(())
}

/**
 * Checks that a decimal fits a `numeric(max_digits, decimal_places)` column without rounding.
 *
 * #Arguments
 * `field`: Name of the field.
 * `value`: Optional decimal value. Absent values always pass.
 * `max_digits`: Total number of significant digits allowed.
 * `decimal_places`: Number of fractional digits allowed.
 */
pub fn check_decimal(field: &str, value: Option<Decimal>, max_digits: u32, decimal_places: u32) -> Result<(), ApplicationError> {
    let Some(value) = value else {
        return Ok(());
    };
    let normalized = value.normalize();
    if normalized.scale() > decimal_places {
        return Err(ApplicationError::validation(field, format!("must have at most {decimal_places} decimal places, got {value}")));
    }
    let whole_digits = integer_digits(normalized);
    let max_whole_digits = max_digits - decimal_places;
    if whole_digits > max_whole_digits {
        return Err(ApplicationError::validation(field, format!("must have at most {max_whole_digits} digits before the decimal point, got {value}")));
    }
    Ok(())
}

fn integer_digits(value: Decimal) -> u32 {
    let mut whole = value.trunc().abs();
    let mut digits = 0;
    while !whole.is_zero() {
        whole = (whole / Decimal::TEN).trunc();
        digits += 1;
    }
    digits
}
