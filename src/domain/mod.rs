//! Domain layer
//!
//! Declarative input resources consumed by the translator. These types carry
//! no Envoy knowledge; conversion lives in `xds` and in the plugins.
//!
//! ## Module Organization
//!
//! - `metadata`: resource identity and shared value types
//! - `upstream`: backends and their health checks
//! - `proxy`: listeners, virtual hosts, routes and weighted destinations
//! - `policy`: extension policies (external processing, CSRF, tap)
//! - `snapshot`: global settings and the per-pass input snapshot

pub mod metadata;
pub mod policy;
pub mod proxy;
pub mod snapshot;
pub mod upstream;

pub use metadata::{
    DurationSpec, FractionDenominator, Metadata, ResourceRef, RuntimeFraction, StringMatch,
};
pub use policy::{
    BodySendMode, CsrfPolicy, ExtProcGrpcService, ExtProcOverrides, ExtProcRouteSettings,
    ExtProcSettings, GrpcRetryPolicy, HeaderForwardingRules, HeaderMutationRules,
    HeaderSendMode, HeaderValue, ListenerExtProc, ProcessingMode, RetryBackoff, TapConfig,
    TapSink,
};
pub use proxy::{
    HttpListener, HttpListenerOptions, Listener, Proxy, Route, RouteAction, RouteMatcher,
    RouteOptions, VirtualHost, VirtualHostOptions, WeightedDestination,
    WeightedDestinationOptions,
};
pub use snapshot::{ApiSnapshot, Settings};
pub use upstream::{
    HealthCheck, HealthChecker, HealthState, Host, HttpHealthCheckSpec, ResponseAssertions,
    ResponseMatch, ResponseMatcher, Upstream,
};
