use std::borrow::Cow;

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{PaginationInput, PaginationOutput},
};

pub mod crops;
pub mod migrations;
pub mod pool;
pub mod schema;
pub mod weather;

/**
 * Maps a sqlx error to an application error.
 *
 * # Arguments
 * `error`: The sqlx error to map.
 * `subject`: Description of the row the statement was writing, used in conflict messages.
 *
 * # Returns
 * `Conflict` for unique violations, `ConstraintViolation` for foreign key violations, `Validation` for values
 * the column cannot hold, `DatabaseError` otherwise.
 */
pub fn handle_database_error(error: &sqlx::Error, subject: &str) -> ApplicationError {
    if let Some(db_error) = error.as_database_error() {
        tracing::debug!("Database error: {}", db_error);
        if db_error.code() == Some(Cow::Borrowed("23505")) {
            // Unique violation
            return ApplicationError::new(ErrorType::Conflict, format!("{subject} already exists"));
        } else if db_error.code() == Some(Cow::Borrowed("23503")) {
            // Foreign key violation
            return ApplicationError::new(ErrorType::ConstraintViolation, format!("Missing parent value for {subject}"));
        } else if db_error.code() == Some(Cow::Borrowed("22001")) || db_error.code() == Some(Cow::Borrowed("22003")) {
            // Value too long, numeric value out of range
            return ApplicationError::new(ErrorType::Validation, format!("Value out of range for {subject}: {db_error}"));
        }
        tracing::error!("Unhandled database error: {}", db_error);
        return ApplicationError::new(ErrorType::DatabaseError, "Unhandled database error".to_string());
    }
    ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute database operation: {error}"))
}

/**
 * Constructs a `PaginationOutput` based on the pagination input and the number of elements.
 * Queries fetch one element more than the page size to detect further pages.
 */
pub fn get_pagination_output(pagination_input: &PaginationInput, elements_size: usize) -> PaginationOutput {
    let has_more_elements = i64::try_from(elements_size).unwrap_or(i64::MAX) > pagination_input.page_size;
    PaginationOutput::new(pagination_input.start_index, pagination_input.page_size, has_more_elements)
}

/**
 * Drops the look-ahead element and returns the page with its pagination information.
 */
pub fn paginate<T>(mut elements: Vec<T>, pagination_input: &PaginationInput) -> (Vec<T>, PaginationOutput) {
    let pagination_output = get_pagination_output(pagination_input, elements.len());
    elements.truncate(usize::try_from(pagination_input.page_size).unwrap_or(0));
    (elements, pagination_output)
}
