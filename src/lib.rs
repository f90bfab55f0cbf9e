//! Classified-ads marketplace core.
//!
//! Fuzzy trigram ranking over categories and advertisements, plus the
//! popularity score each advertisement accumulates from comments, likes and
//! saves.

pub mod config;
pub mod errors;
pub mod logging;
pub mod scoring;
pub mod search;
pub mod service;
pub mod store;

pub use errors::{ClassifiedsError, Result};
