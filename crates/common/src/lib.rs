//! Common types and utilities for Orbit
//!
//! This crate provides shared types used across the dispatch and
//! real-time crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Shared domain types (GeoPoint, DriverId, DriverStatus)

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
