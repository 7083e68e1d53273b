//! s3db-common - Shared types and utilities
//!
//! This crate provides the identifiers, error taxonomy, and configuration
//! tree shared across every other s3db crate.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod keys;
pub mod types;

pub use config::Config;
pub use connection::ConnectionString;
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use types::*;
