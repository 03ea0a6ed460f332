use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    config::{Config, LoggingConfig, parse_level},
};

/**
 * Builds the event filter: the application level, the database driver level for `sqlx`, then the configured
 * directives, which win over both.
 *
 * #Arguments
 * `logging`: The logging configuration.
 * `db_level`: Effective level for the database driver.
 */
pub fn build_filter(logging: &LoggingConfig, db_level: &str) -> Result<EnvFilter, ApplicationError> {
    let level = parse_level("LOG_LEVEL", &logging.level)?;
    let db_level = parse_level("DB_LOG_LEVEL", db_level)?;
    let mut filter = EnvFilter::default().add_directive(level.into());
    for directive in std::iter::once(format!("sqlx={db_level}")).chain(logging.directives.iter().cloned()) {
        let directive = directive.parse().map_err(|err| ApplicationError::new(ErrorType::Configuration, format!("Invalid log directive {directive}: {err}")))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/**
 * Installs the global tracing subscriber: console output and, when configured, a log file.
 *
 * #Arguments
 * `config`: The application configuration.
 *
 * #Returns
 * A `Configuration` error for unusable levels or an unwritable log file, an `Initialization` error when a
 * subscriber is already installed.
 */
pub fn init_tracing(config: &Config) -> Result<(), ApplicationError> {
    let logging = &config.logging;
    let filter = build_filter(logging, &config.db_log_level())?;
    let console_layer = fmt::layer()
        .with_target(logging.target)
        .with_thread_ids(logging.thread_ids)
        .with_thread_names(logging.thread_names)
        .with_line_number(logging.line_number)
        .with_ansi(logging.ansi);
    let file_layer = match &logging.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| ApplicationError::new(ErrorType::Configuration, format!("Failed to open log file {path}: {err}")))?;
            Some(
                fmt::layer()
                    .with_target(logging.target)
                    .with_thread_ids(logging.thread_ids)
                    .with_thread_names(logging.thread_names)
                    .with_line_number(logging.line_number)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to initialize tracing: {err}")))
}
