pub mod apperror;
pub mod config;
pub mod migration;
pub mod models;
pub mod schema;
pub mod units;
pub mod validation;
pub mod verification;
