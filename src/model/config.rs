use std::str::FromStr;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Command-line arguments for the application.
 */
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ApplicationArguments {
    /**
     * Optional path to a TOML configuration file. Environment variables override its values.
     */
    #[arg(short, long, global = true)]
    pub config_file: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /**
     * Manage schema migrations.
     */
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /**
     * Recompute yearly statistics from daily records. Without filters every station and year is recomputed.
     */
    Aggregate {
        #[arg(short, long)]
        station: Option<String>,
        /**
         * Recompute a single year. Shorthand for the same start and end year.
         */
        #[arg(short, long, conflicts_with_all = ["start_year", "end_year"])]
        year: Option<i32>,
        #[arg(long)]
        start_year: Option<i32>,
        #[arg(long)]
        end_year: Option<i32>,
        /**
         * Compute and report without writing anything.
         */
        #[arg(long)]
        dry_run: bool,
        /**
         * Delete the yearly statistics of the selected station and years before recomputing.
         */
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum MigrateAction {
    /**
     * Apply all pending migrations.
     */
    Up,
    /**
     * Revert the last applied migration, if it is reversible.
     */
    Down,
    /**
     * Show applied and pending migrations.
     */
    Status {
        #[arg(long)]
        json: bool,
    },
    /**
     * Compare the live schema against the declared schema.
     */
    Verify,
}

/**
 * Represents the configuration for the application.
 *
 * Assembled once at startup from defaults, an optional TOML file and environment variables, then never mutated.
 */
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /**
     * Debug mode. Raises the default database log level.
     */
    pub debug: bool,
    /**
     * Logging configuration for the application.
     */
    pub logging: LoggingConfig,
    /**
     * Database configuration for the application.
     */
    pub database: Database,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /**
     * Level for application log events.
     */
    pub level: String,
    /**
     * Level for database driver events. Defaults to debug in debug mode, otherwise info.
     */
    pub db_level: Option<String>,
    /**
     * Whether to log the target of the log message.
     */
    pub target: bool,
    /**
     * Whether to log thread IDs .
     */
    pub thread_ids: bool,
    /**
     * Whether to log thread names.
     */
    pub thread_names: bool,
    /**
     * Whether to log line numbers.
     */
    pub line_number: bool,
    /**
     * Whether to use ANSI colors in console logs.
     */
    pub ansi: bool,
    /**
     * Optional path to a log file. Events are written there in addition to the console.
     */
    pub logfile: Option<String>,
    /**
     * Additional directives for logging configuration.
     */
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            db_level: None,
            target: true,
            thread_ids: false,
            thread_names: false,
            line_number: false,
            ansi: true,
            logfile: None,
            directives: vec![],
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Database {
    /**
     * Full connection URL. When present it takes precedence over the discrete connection fields.
     */
    pub url: Option<String>,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    /**
     * Seconds to wait for a connection before failing.
     */
    pub acquire_timeout: u64,
    /**
     * Seconds a connection may live before it is recycled.
     */
    pub max_lifetime: u64,
    /**
     * Seconds an unused connection is kept open.
     */
    pub idle_timeout: u64,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for Database {
    fn default() -> Self {
        Database {
            url: None,
            name: "weather_db".to_string(),
            user: "weather_user".to_string(),
            password: "weather_pass".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            acquire_timeout: 10,
            max_lifetime: 600,
            idle_timeout: 300,
            max_connections: 10,
            min_connections: 1,
        }
    }
}

/**
 * Legacy variable names still set by existing deployments. The primary name wins when both are set.
 */
const ENV_ALIASES: &[(&str, &str)] = &[("DEBUG", "DJANGO_DEBUG"), ("LOG_LEVEL", "DJANGO_LOG_LEVEL")];

impl Config {
    /**
     * Loads the configuration from the optional file and the process environment.
     *
     * #Arguments
     * `config_file`: Optional path to a TOML configuration file.
     *
     * #Returns
     * A `Result` containing the validated `Config` or an `ApplicationError` if reading, parsing or validation fails.
     */
    pub fn load(config_file: Option<&str>) -> Result<Config, ApplicationError> {
        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?.validate()
    }

    /**
     * Reads the configuration from the specified file. Missing keys keep their defaults.
     */
    pub fn from_file(config_file: &str) -> Result<Config, ApplicationError> {
        let config_str: String = std::fs::read_to_string(config_file).map_err(|err| ApplicationError::new(ErrorType::Configuration, format!("Failed to read config file: {err}")))?;
        toml::from_str(&config_str).map_err(|err| ApplicationError::new(ErrorType::Configuration, format!("Failed to parse config file: {err}")))
    }

    /**
     * Overlays environment variables on top of this configuration.
     *
     * #Arguments
     * `lookup`: Resolves an environment variable name to its value, if set.
     *
     * #Returns
     * The updated configuration, or a `Configuration` error naming the first malformed variable.
     */
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Config, ApplicationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).or_else(|| ENV_ALIASES.iter().find(|(primary, _)| *primary == name).and_then(|&(_, alias)| lookup(alias)));
        if let Some(debug) = parse_bool(&lookup, "DEBUG")? {
            self.debug = debug;
        }

        let database = &mut self.database;
        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            database.url = Some(url);
        }
        if let Some(name) = lookup("POSTGRES_DB") {
            database.name = name;
        }
        if let Some(user) = lookup("POSTGRES_USER") {
            database.user = user;
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD") {
            database.password = password;
        }
        if let Some(host) = lookup("POSTGRES_HOST") {
            database.host = host;
        }
        if let Some(port) = parse_var(&lookup, "POSTGRES_PORT")? {
            database.port = port;
        }
        if let Some(connect_timeout) = parse_var(&lookup, "DB_CONNECT_TIMEOUT")? {
            database.acquire_timeout = connect_timeout;
        }
        if let Some(acquire_timeout) = parse_var(&lookup, "DB_ACQUIRE_TIMEOUT")? {
            database.acquire_timeout = acquire_timeout;
        }
        if let Some(max_lifetime) = parse_var(&lookup, "DB_CONN_MAX_AGE")? {
            database.max_lifetime = max_lifetime;
        }
        if let Some(idle_timeout) = parse_var(&lookup, "DB_IDLE_TIMEOUT")? {
            database.idle_timeout = idle_timeout;
        }
        if let Some(max_connections) = parse_var(&lookup, "DB_MAX_CONNECTIONS")? {
            database.max_connections = max_connections;
        }
        if let Some(min_connections) = parse_var(&lookup, "DB_MIN_CONNECTIONS")? {
            database.min_connections = min_connections;
        }

        let logging = &mut self.logging;
        if let Some(level) = lookup("LOG_LEVEL") {
            logging.level = level;
        }
        if let Some(db_level) = lookup("DB_LOG_LEVEL") {
            logging.db_level = Some(db_level);
        }
        if let Some(logfile) = lookup("LOG_FILE").filter(|path| !path.is_empty()) {
            logging.logfile = Some(logfile);
        }
        if let Some(ansi) = parse_bool(&lookup, "LOG_ANSI")? {
            logging.ansi = ansi;
        }
        Ok(self)
    }

    /**
     * Validates the assembled configuration so that startup fails early on unusable values.
     */
    pub fn validate(self) -> Result<Config, ApplicationError> {
        let database = &self.database;
        if database.url.is_none() {
            if database.host.is_empty() {
                return Err(ApplicationError::new(ErrorType::Configuration, "POSTGRES_HOST must not be empty".to_string()));
            }
            if database.name.is_empty() {
                return Err(ApplicationError::new(ErrorType::Configuration, "POSTGRES_DB must not be empty".to_string()));
            }
            if database.port == 0 {
                return Err(ApplicationError::new(ErrorType::Configuration, "POSTGRES_PORT must not be 0".to_string()));
            }
        }
        if database.max_connections == 0 {
            return Err(ApplicationError::new(ErrorType::Configuration, "DB_MAX_CONNECTIONS must be at least 1".to_string()));
        }
        if database.min_connections > database.max_connections {
            return Err(ApplicationError::new(
                ErrorType::Configuration,
                format!("DB_MIN_CONNECTIONS ({}) must not exceed DB_MAX_CONNECTIONS ({})", database.min_connections, database.max_connections),
            ));
        }
        if database.max_lifetime == 0 {
            return Err(ApplicationError::new(ErrorType::Configuration, "DB_CONN_MAX_AGE must be greater than 0".to_string()));
        }
        parse_level("LOG_LEVEL", &self.logging.level)?;
        parse_level("DB_LOG_LEVEL", &self.db_log_level())?;
        Ok(self)
    }

    /**
     * Effective log level for the database driver.
     */
    pub fn db_log_level(&self) -> String {
        match &self.logging.db_level {
            Some(level) => level.clone(),
            None if self.debug => "debug".to_string(),
            None => "info".to_string(),
        }
    }
}

/**
 * Parses a log level name such as `info` or `DEBUG`. `WARNING` and `CRITICAL` are accepted for `warn` and `error`.
 */
pub fn parse_level(name: &str, value: &str) -> Result<LevelFilter, ApplicationError> {
    let normalized = match value.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" => "error".to_string(),
        other => other.to_string(),
    };
    LevelFilter::from_str(&normalized).map_err(|_err| ApplicationError::new(ErrorType::Configuration, format!("{name} has an unknown log level: {value}")))
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ApplicationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|err| ApplicationError::new(ErrorType::Configuration, format!("{name} is malformed ({value}): {err}"))),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, name: &str) -> Result<Option<bool>, ApplicationError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|value| value.trim().to_lowercase()) {
        Some(value) if matches!(value.as_str(), "true" | "1" | "yes") => Ok(Some(true)),
        Some(value) if matches!(value.as_str(), "false" | "0" | "no" | "") => Ok(Some(false)),
        Some(value) => Err(ApplicationError::new(ErrorType::Configuration, format!("{name} is not a boolean: {value}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = Config::default().apply_env(lookup_from(&[])).unwrap().validate().unwrap();
        assert!(!config.debug);
        assert_eq!(config.database.name, "weather_db");
        assert_eq!(config.database.user, "weather_user");
        assert_eq!(config.database.password, "weather_pass");
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.max_lifetime, 600);
        assert_eq!(config.database.acquire_timeout, 10);
        assert!(config.database.url.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.db_log_level(), "info");
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let config = Config::default()
            .apply_env(lookup_from(&[
                ("POSTGRES_HOST", "db.internal"),
                ("POSTGRES_PORT", "6543"),
                ("DB_CONN_MAX_AGE", "120"),
                ("DEBUG", "Yes"),
                ("LOG_LEVEL", "warn"),
            ]))
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.max_lifetime, 120);
        assert!(config.debug);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.db_log_level(), "debug");
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = Config::default().apply_env(lookup_from(&[("DJANGO_DEBUG", "True"), ("DJANGO_LOG_LEVEL", "WARNING")])).unwrap().validate().unwrap();
        assert!(config.debug);
        assert_eq!(config.db_log_level(), "debug");
        assert_eq!(config.logging.level, "WARNING");
        assert_eq!(parse_level("LOG_LEVEL", &config.logging.level).unwrap(), LevelFilter::WARN);

        let config = Config::default().apply_env(lookup_from(&[("DJANGO_DEBUG", "true"), ("DEBUG", "false"), ("DJANGO_LOG_LEVEL", "error"), ("LOG_LEVEL", "debug")])).unwrap();
        assert!(!config.debug);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_level_names() {
        assert_eq!(parse_level("LOG_LEVEL", "CRITICAL").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("LOG_LEVEL", " Info ").unwrap(), LevelFilter::INFO);
        assert!(parse_level("LOG_LEVEL", "verbose").is_err());
    }

    #[test]
    fn test_connect_timeout_and_acquire_timeout() {
        let config = Config::default().apply_env(lookup_from(&[("DB_CONNECT_TIMEOUT", "5")])).unwrap();
        assert_eq!(config.database.acquire_timeout, 5);
        let config = Config::default().apply_env(lookup_from(&[("DB_CONNECT_TIMEOUT", "5"), ("DB_ACQUIRE_TIMEOUT", "30")])).unwrap();
        assert_eq!(config.database.acquire_timeout, 30);
    }

    #[test]
    fn test_database_url_is_kept() {
        let config = Config::default().apply_env(lookup_from(&[("DATABASE_URL", "postgres://u:p@h:1/db")])).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://u:p@h:1/db"));
    }

    #[test]
    fn test_malformed_port_fails_fast() {
        let result = Config::default().apply_env(lookup_from(&[("POSTGRES_PORT", "not-a-port")]));
        let error = result.err().unwrap();
        assert_eq!(error.error_type, ErrorType::Configuration);
        assert!(error.message.contains("POSTGRES_PORT"));
    }

    #[test]
    fn test_malformed_bool_fails_fast() {
        let error = Config::default().apply_env(lookup_from(&[("DEBUG", "maybe")])).err().unwrap();
        assert!(error.message.contains("DEBUG"));
    }

    #[test]
    fn test_min_connections_above_max_is_rejected() {
        let error = Config::default().apply_env(lookup_from(&[("DB_MAX_CONNECTIONS", "2"), ("DB_MIN_CONNECTIONS", "5")])).unwrap().validate().err().unwrap();
        assert_eq!(error.error_type, ErrorType::Configuration);
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let error = Config::default().apply_env(lookup_from(&[("LOG_LEVEL", "chatty")])).unwrap().validate().err().unwrap();
        assert!(error.message.contains("LOG_LEVEL"));
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.database.max_connections = 4;
        config.logging.logfile = Some("/tmp/weather_orm.log".to_string());
        config.logging.directives = vec!["sqlx=warn".to_string()];
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.database.max_connections, deserialized.database.max_connections);
        assert_eq!(config.database.name, deserialized.database.name);
        assert_eq!(config.logging.logfile, deserialized.logging.logfile);
        assert_eq!(config.logging.directives, deserialized.logging.directives);
    }

    #[test]
    fn test_example_config_file() {
        let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/example.toml")).unwrap().validate().unwrap();
        assert_eq!(config.database.max_lifetime, 600);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.logging.directives, vec!["weather_orm::service=debug".to_string()]);
    }

    #[test]
    fn test_missing_config_file_is_a_configuration_error() {
        let error = Config::from_file("/nonexistent/weather_orm.toml").err().unwrap();
        assert_eq!(error.error_type, ErrorType::Configuration);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[database]\nhost = \"stats-db\"\n").unwrap();
        assert_eq!(config.database.host, "stats-db");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.logging.level, "info");
    }
}
