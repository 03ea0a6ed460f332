use clap::Parser;

use weather_orm::logging::init_tracing;
use weather_orm::model::apperror::{ApplicationError, ErrorType};
use weather_orm::model::config::{ApplicationArguments, Command, Config, MigrateAction};
use weather_orm::model::migration::MigrationStatus;
use weather_orm::model::models::AggregationScope;
use weather_orm::runtime::Runtime;

/**
 * Entry point. Loads the configuration, initializes the database runtime once and runs the requested command.
 */
#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = ApplicationArguments::parse();

    let config = Config::load(args.config_file.as_deref()).map_err(std::io::Error::other)?;

    init_tracing(&config).map_err(std::io::Error::other)?;

    let mut runtime = Runtime::new(config);
    runtime.initialize().await.map_err(std::io::Error::other)?;

    let result = run(&runtime, args.command).await;
    runtime.shutdown().await;
    result.map_err(|err| {
        tracing::error!("{}", err);
        std::io::Error::other(err)
    })
}

/**
 * Runs one command against an initialized runtime.
 *
 * #Arguments
 * `runtime`: The initialized database runtime.
 * `command`: The command to run.
 */
async fn run(runtime: &Runtime, command: Command) -> Result<(), ApplicationError> {
    match command {
        Command::Migrate { action: MigrateAction::Up } => {
            let applied = runtime.migration_service().migrate().await?;
            if applied.is_empty() {
                println!("No migrations to apply.");
            }
            for id in applied {
                println!("Applied {id}");
            }
        }
        Command::Migrate { action: MigrateAction::Down } => {
            let reverted = runtime.migration_service().rollback().await?;
            println!("Reverted {reverted}");
        }
        Command::Migrate { action: MigrateAction::Status { json } } => {
            let status = runtime.migration_service().status().await?;
            if json {
                let rendered = serde_json::to_string_pretty(&status).map_err(|err| ApplicationError::new(ErrorType::Migration, format!("Failed to render migration status: {err}")))?;
                println!("{rendered}");
            } else {
                for migration in &status {
                    println!("{}", status_line(migration));
                }
            }
        }
        Command::Migrate { action: MigrateAction::Verify } => {
            let differences = runtime.migration_service().verify().await?;
            if !differences.is_empty() {
                for difference in &differences {
                    println!("{difference}");
                }
                return Err(ApplicationError::new(ErrorType::Migration, format!("Database schema has {} differences", differences.len())));
            }
            println!("Database schema matches the migrations.");
        }
        Command::Aggregate { station, year, start_year, end_year, dry_run, clear } => {
            let scope = AggregationScope { station_id: station, year_from: year.or(start_year), year_to: year.or(end_year), dry_run, clear };
            let summary = runtime.weather_service().recompute_all(scope).await?;
            if summary.cleared > 0 {
                println!("Cleared {} yearly statistics rows", summary.cleared);
            }
            if dry_run {
                println!("Dry run: {} of {} station years would be recomputed", summary.computed, summary.station_years);
            } else {
                println!("Recomputed {} of {} station years", summary.computed, summary.station_years);
            }
        }
    }
    Ok(())
}

/**
 * Formats one migration for the plain status listing.
 */
fn status_line(migration: &MigrationStatus) -> String {
    let mark = if migration.applied_at.is_some() { "[X]" } else { "[ ]" };
    let mut line = format!("{mark} {}", migration.id);
    if let Some(applied_at) = migration.applied_at {
        line.push_str(&format!(" (applied {})", applied_at.to_rfc3339()));
    }
    if migration.breaking {
        line.push_str(" BREAKING");
    }
    if !migration.reversible {
        line.push_str(" irreversible");
    }
    line.push_str(&format!(": {}", migration.description));
    line
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_line_marks_pending_breaking_migration() {
        let migration = MigrationStatus { id: "0002".to_string(), description: "replace".to_string(), applied_at: None, reversible: false, breaking: true };
        assert_eq!(status_line(&migration), "[ ] 0002 BREAKING irreversible: replace");
    }

    #[test]
    fn test_arguments_parse() {
        let args = ApplicationArguments::try_parse_from(["weather_orm", "migrate", "status", "--json"]).unwrap();
        assert!(matches!(args.command, Command::Migrate { action: MigrateAction::Status { json: true } }));
        let args = ApplicationArguments::try_parse_from(["weather_orm", "-c", "weather.toml", "aggregate", "--year", "1999"]).unwrap();
        assert_eq!(args.config_file.as_deref(), Some("weather.toml"));
        assert!(matches!(args.command, Command::Aggregate { station: None, year: Some(1999), dry_run: false, clear: false, .. }));
    }

    #[test]
    fn test_aggregate_range_arguments() {
        let args = ApplicationArguments::try_parse_from(["weather_orm", "aggregate", "--station", "USC00110072", "--start-year", "1990", "--end-year", "1999", "--dry-run", "--clear"]).unwrap();
        let Command::Aggregate { station, year, start_year, end_year, dry_run, clear } = args.command else {
            panic!("expected the aggregate command");
        };
        assert_eq!(station.as_deref(), Some("USC00110072"));
        assert_eq!((year, start_year, end_year), (None, Some(1990), Some(1999)));
        assert!(dry_run && clear);
        assert!(ApplicationArguments::try_parse_from(["weather_orm", "aggregate", "--year", "1999", "--start-year", "1990"]).is_err());
    }
}
