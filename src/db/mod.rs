//! Database module for sitemon.
//!
//! Provides SQLite storage for the site registry, the current-status
//! projection and the report history.

mod models;
mod store;

pub use models::*;
pub use store::*;
