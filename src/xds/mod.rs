//! Envoy xDS resource generation
//!
//! Base conversion of domain resources into Envoy v3 messages, the
//! translation pass that runs plugins over them, fingerprinting of the
//! generated set and the cache the result is published to.
//!
//! Delivering resources to Envoy over a discovery stream is left to the
//! embedding process; it subscribes to [`SnapshotCache`] updates.

pub mod cluster;
pub mod filters;
pub mod fingerprint;
pub mod listener;
pub mod route;
pub mod state;
pub mod translator;

pub use cluster::{build_cluster, CLUSTER_TYPE_URL};
pub use fingerprint::{fingerprint, fnv1_64, resource_hash, Fingerprintable, SnapshotFingerprint};
pub use listener::{build_listener, LISTENER_TYPE_URL};
pub use route::ROUTE_TYPE_URL;
pub use state::{PublishOutcome, PublishedSnapshot, SnapshotCache, SnapshotUpdate};
pub use translator::{
    ProxyResourceSet, TranslationOutput, TranslationPhase, TranslationReport, Translator,
};
