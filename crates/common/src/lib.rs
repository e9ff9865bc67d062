//! Common utilities and types shared across the router redundancy crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
