//! # Error Handling
//!
//! Error handling for the gateplane translator. Plugin, resource and pass
//! failures wrap an underlying error with the context needed to act on it.

pub mod types;

pub use types::{Error, ResourceIdentity, ResourceKind, Result};
