use std::fmt;

/**
 * Represents the type of error that can occur within the persistence layer.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /**
     * The runtime was used before it was initialized, or initialized twice.
     */
    Initialization,
    /**
     * A configuration value was present but malformed.
     */
    Configuration,
    /**
     * A field value violated its declared bounds.
     */
    Validation,
    /**
     * A uniqueness constraint rejected the write. Callers may choose to upsert instead.
     */
    Conflict,
    /**
     * A referential constraint rejected the write.
     */
    ConstraintViolation,
    NotFound,
    /**
     * A schema migration failed, or the migration chain/ledger is inconsistent.
     */
    Migration,
    DatabaseError,
}

/**
 * Represents an error that occurs within the persistence layer.
 */
#[derive(Debug, Clone)]
pub struct ApplicationError {
    /**
     * Error type.
     */
    pub error_type: ErrorType,
    /**
     * Error message describing problem.
     */
    pub message: String,
    /**
     * Offending field for validation errors.
     */
    pub field: Option<String>,
}

impl ApplicationError {
    /**
     * Creates a new ApplicationError.
     *
     * #Arguments
     * `error_type`: The type of error.
     * `message`: A description of the error.
     */
    pub fn new(error_type: ErrorType, message: String) -> Self {
        ApplicationError { error_type, message, field: None }
    }

    /**
     * Creates a validation error for a single field.
     *
     * #Arguments
     * `field`: Name of the field that failed validation.
     * `constraint`: Description of the violated constraint.
     */
    pub fn validation(field: &str, constraint: String) -> Self {
        ApplicationError { error_type: ErrorType::Validation, message: format!("{field}: {constraint}"), field: Some(field.to_string()) }
    }

    pub fn is_conflict(&self) -> bool {
        self.error_type == ErrorType::Conflict
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApplicationError {}
