//! BraidDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all BraidDB components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use config::StoreConfig;
pub use error::{BraidError, Result};
pub use types::{Key, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE};
