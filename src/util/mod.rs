//! Basic shared types: errors and results.

pub mod error;

pub use error::{Error, Result};
