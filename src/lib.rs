//! Persistence layer for yearly weather statistics and crop yields: configuration, an explicitly initialized
//! database runtime, a versioned migration chain and typed data access.

pub mod dao;
pub mod logging;
pub mod migrations;
pub mod model;
pub mod runtime;
pub mod service;
