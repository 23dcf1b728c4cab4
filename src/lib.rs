// Core modules
pub mod api;
pub mod control;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use api::{ExchangeClient, ExchangeError, FailureKind};
pub use error::TraderError;
pub use models::*;
pub use strategy::Strategy;
