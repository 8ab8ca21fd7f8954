//! # Gateplane
//!
//! Gateplane translates declarative gateway resources (upstreams, proxies,
//! listeners, virtual hosts, routes and their extension policies) into Envoy
//! xDS configuration.
//!
//! ## Architecture
//!
//! ```text
//! ApiSnapshot → Translator → plugins (per capability) → filter ordering
//!            → resource assembly → fingerprint → SnapshotCache
//! ```
//!
//! ## Core Components
//!
//! - **Plugins**: feature modules implementing any subset of the capability
//!   traits in [`plugins`], dispatched in registration order
//! - **Filter stages**: deterministic HTTP filter placement ([`plugins::stage`])
//! - **Settings merge**: global/listener policy combination ([`plugins::merge`])
//! - **Extension configs**: typed `Any` envelopes ([`xds::filters`])
//! - **Fingerprinting**: order-independent change detection ([`xds::fingerprint`])
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use gateplane::{ApiSnapshot, Error, Result, Settings, SnapshotCache, Translator, TranslatorConfig};
//!
//! fn main() -> Result<()> {
//!     let config = TranslatorConfig::load(None)?;
//!     gateplane::observability::init_logging(&config.logging)?;
//!
//!     let raw = std::fs::read_to_string("snapshot.json")
//!         .map_err(|err| Error::config_with_source("cannot read snapshot", Box::new(err)))?;
//!     let snapshot: ApiSnapshot = serde_json::from_str(&raw)?;
//!     let mut translator = Translator::with_default_plugins(&Settings::default(), config)?;
//!     let cache = SnapshotCache::new();
//!     for proxy in &snapshot.proxies {
//!         translator.publish(&snapshot, proxy, &cache)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod plugins;
pub mod xds;

// Re-export commonly used types and traits
pub use config::TranslatorConfig;
pub use domain::{ApiSnapshot, Proxy, Settings};
pub use errors::{Error, Result};
pub use plugins::{Plugin, PluginRegistry};
pub use xds::{PublishOutcome, SnapshotCache, SnapshotFingerprint, Translator};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
