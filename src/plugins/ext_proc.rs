//! External processing plugin
//!
//! Adds Envoy's ext_proc HTTP filter to listeners, configured from the
//! global settings shallow-merged with the listener's own settings, and
//! writes `ExtProcPerRoute` overrides onto virtual hosts and routes.

use std::borrow::Cow;

use envoy_types::pb::envoy::config::core::v3::{
    grpc_service::{EnvoyGrpc, TargetSpecifier},
    BackoffStrategy, GrpcService, HeaderValue as ProtoHeaderValue, RetryPolicy,
};
use envoy_types::pb::envoy::config::route::v3::{Route as EnvoyRoute, VirtualHost as EnvoyVirtualHost};
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::{
    ext_proc_per_route::Override, metadata_options::MetadataNamespaces,
    processing_mode::{BodySendMode as ProtoBodyMode, HeaderSendMode as ProtoHeaderMode},
    ExtProcOverrides as ExtProcOverridesProto, ExtProcPerRoute,
    ExternalProcessor as ExternalProcessorProto, MetadataOptions,
    ProcessingMode as ProcessingModeProto,
};
use envoy_types::pb::google::protobuf::UInt32Value;
use tracing::debug;

use super::merge::shallow_merge;
use super::{
    HttpFilterPlugin, InitParams, Params, Plugin, RouteContext, RoutePlugin, StagedFilter,
    VirtualHostContext, VirtualHostPlugin,
};
use crate::domain::{
    ApiSnapshot, BodySendMode, DurationSpec, ExtProcGrpcService, ExtProcRouteSettings,
    ExtProcSettings, HeaderSendMode, Listener, ListenerExtProc, ProcessingMode, Route,
    VirtualHost,
};
use crate::errors::{Error, Result};
use crate::xds::filters::{any_from_message, set_per_filter_config};

pub const FILTER_NAME: &str = "envoy.filters.http.ext_proc";
pub const EXT_PROC_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_proc.v3.ExternalProcessor";
pub const EXT_PROC_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_proc.v3.ExtProcPerRoute";

/// Metadata namespaces the processor may always write back into.
pub const RECEIVING_NAMESPACES: [&str; 2] =
    ["envoy.filters.http.ext_proc.encoder", "envoy.filters.http.ext_proc.decoder"];

const MAX_TIMEOUT_SECONDS: i64 = 3600;

#[derive(Debug, Default)]
pub struct ExtProcPlugin {
    global: Option<ExtProcSettings>,
}

impl Plugin for ExtProcPlugin {
    fn name(&self) -> &'static str {
        "ext_proc"
    }

    fn init(&mut self, params: &InitParams<'_>) -> Result<()> {
        self.global = params.settings.ext_proc.clone();
        Ok(())
    }

    fn as_http_filters(&mut self) -> Option<&mut dyn HttpFilterPlugin> {
        Some(self)
    }

    fn as_virtual_host(&mut self) -> Option<&mut dyn VirtualHostPlugin> {
        Some(self)
    }

    fn as_route(&mut self) -> Option<&mut dyn RoutePlugin> {
        Some(self)
    }
}

impl ExtProcPlugin {
    /// Settings in effect for `listener`, if any.
    fn effective_settings<'a>(&'a self, listener: &'a Listener) -> Option<Cow<'a, ExtProcSettings>> {
        match &listener.http.options.ext_proc {
            Some(ListenerExtProc::DisableExtProc(true)) => None,
            Some(ListenerExtProc::DisableExtProc(false)) | None => {
                self.global.as_ref().map(Cow::Borrowed)
            }
            Some(ListenerExtProc::ExtProc(local)) => shallow_merge(self.global.as_ref(), Some(local)),
        }
    }
}

impl HttpFilterPlugin for ExtProcPlugin {
    fn http_filters(&mut self, params: &mut Params<'_>, listener: &Listener) -> Result<Vec<StagedFilter>> {
        let Some(settings) = self.effective_settings(listener) else {
            debug!(listener = %listener.name, "External processing not configured");
            return Ok(Vec::new());
        };

        let processor = external_processor(params, &settings)?;
        let filter = StagedFilter::with_configured_stage(
            FILTER_NAME,
            any_from_message(EXT_PROC_TYPE_URL, &processor),
            settings.filter_stage,
        )?;
        Ok(vec![filter])
    }
}

impl VirtualHostPlugin for ExtProcPlugin {
    fn process_virtual_host(
        &mut self,
        params: &mut Params<'_>,
        _context: &VirtualHostContext<'_>,
        virtual_host: &VirtualHost,
        output: &mut EnvoyVirtualHost,
    ) -> Result<()> {
        if let Some(settings) = &virtual_host.options.ext_proc {
            if let Some(per_route) = per_route_config(params.snapshot, settings)? {
                set_per_filter_config(
                    &mut output.typed_per_filter_config,
                    FILTER_NAME,
                    any_from_message(EXT_PROC_PER_ROUTE_TYPE_URL, &per_route),
                );
            }
        }
        Ok(())
    }
}

impl RoutePlugin for ExtProcPlugin {
    fn process_route(
        &mut self,
        params: &mut Params<'_>,
        _context: &RouteContext<'_>,
        route: &Route,
        output: &mut EnvoyRoute,
    ) -> Result<()> {
        if let Some(settings) = &route.options.ext_proc {
            if let Some(per_route) = per_route_config(params.snapshot, settings)? {
                set_per_filter_config(
                    &mut output.typed_per_filter_config,
                    FILTER_NAME,
                    any_from_message(EXT_PROC_PER_ROUTE_TYPE_URL, &per_route),
                );
            }
        }
        Ok(())
    }
}

/// Build the filter config from effective settings.
///
/// Fields Envoy does not support yet are reported as warnings on `params`
/// and left out of the output.
pub fn external_processor(
    params: &mut Params<'_>,
    settings: &ExtProcSettings,
) -> Result<ExternalProcessorProto> {
    let grpc_service = grpc_service(params.snapshot, settings.grpc_service.as_ref())?;
    validate_message_timeouts(settings.message_timeout, settings.max_message_timeout)?;

    let unreleased = [
        ("mutation_rules", settings.mutation_rules.is_some()),
        ("disable_clear_route_cache", settings.disable_clear_route_cache.is_some()),
        ("forward_rules", settings.forward_rules.is_some()),
        ("filter_metadata", settings.filter_metadata.is_some()),
        ("allow_mode_override", settings.allow_mode_override.is_some()),
    ];
    for (field, _) in unreleased.iter().filter(|(_, set)| *set) {
        params.warn(format!("ext_proc field '{}' is not supported yet and was ignored", field));
    }

    let forwarding_namespaces = if settings.metadata_context_namespaces.is_empty()
        && settings.typed_metadata_context_namespaces.is_empty()
    {
        None
    } else {
        Some(MetadataNamespaces {
            untyped: settings.metadata_context_namespaces.clone(),
            typed: settings.typed_metadata_context_namespaces.clone(),
        })
    };

    Ok(ExternalProcessorProto {
        grpc_service: Some(grpc_service),
        failure_mode_allow: settings.failure_mode_allow.unwrap_or(false),
        processing_mode: settings.processing_mode.as_ref().map(processing_mode),
        request_attributes: settings.request_attributes.clone(),
        response_attributes: settings.response_attributes.clone(),
        message_timeout: settings.message_timeout.map(DurationSpec::to_proto),
        max_message_timeout: settings.max_message_timeout.map(DurationSpec::to_proto),
        stat_prefix: settings.stat_prefix.clone(),
        metadata_options: Some(MetadataOptions {
            forwarding_namespaces,
            receiving_namespaces: Some(MetadataNamespaces {
                untyped: RECEIVING_NAMESPACES.iter().map(|ns| ns.to_string()).collect(),
                typed: Vec::new(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Per-route override: disabled, overridden, or `None` to inherit.
pub fn per_route_config(
    snapshot: &ApiSnapshot,
    settings: &ExtProcRouteSettings,
) -> Result<Option<ExtProcPerRoute>> {
    match (settings.disabled, &settings.overrides) {
        (Some(_), Some(_)) => Err(Error::validation(
            "ext_proc route settings may set either 'disabled' or 'overrides', not both",
        )),
        (Some(false), None) => Err(Error::validation_field(
            "ext_proc can only be disabled with 'disabled: true'",
            "disabled",
        )),
        (Some(true), None) => Ok(Some(ExtProcPerRoute {
            r#override: Some(Override::Disabled(true)),
            ..Default::default()
        })),
        (None, Some(overrides)) => {
            let grpc_service = match &overrides.grpc_service {
                Some(service) => Some(grpc_service(snapshot, Some(service))?),
                None => None,
            };
            Ok(Some(ExtProcPerRoute {
                r#override: Some(Override::Overrides(ExtProcOverridesProto {
                    processing_mode: overrides.processing_mode.as_ref().map(processing_mode),
                    request_attributes: overrides.request_attributes.clone(),
                    response_attributes: overrides.response_attributes.clone(),
                    grpc_service,
                    ..Default::default()
                })),
                ..Default::default()
            }))
        }
        (None, None) => Ok(None),
    }
}

fn grpc_service(snapshot: &ApiSnapshot, service: Option<&ExtProcGrpcService>) -> Result<GrpcService> {
    let service = service
        .filter(|service| !service.ext_proc_server_ref.name.is_empty())
        .ok_or_else(|| {
            Error::validation_field(
                "ext_proc grpc service must reference an upstream",
                "grpc_service.ext_proc_server_ref",
            )
        })?;

    let server = &service.ext_proc_server_ref;
    snapshot
        .find_upstream(server)
        .map_err(|_| Error::not_found("ext_proc server upstream", server.to_string()))?;

    let retry_policy = service.retry_policy.as_ref().map(|policy| {
        let back_off = policy.retry_back_off.clone().unwrap_or_default();
        RetryPolicy {
            retry_back_off: Some(BackoffStrategy {
                base_interval: back_off.base_interval.map(DurationSpec::to_proto),
                max_interval: back_off.max_interval.map(DurationSpec::to_proto),
            }),
            num_retries: policy.num_retries.map(|value| UInt32Value { value }),
            ..Default::default()
        }
    });

    Ok(GrpcService {
        target_specifier: Some(TargetSpecifier::EnvoyGrpc(EnvoyGrpc {
            cluster_name: server.cluster_name(),
            authority: service.authority.clone().unwrap_or_default(),
            retry_policy,
            ..Default::default()
        })),
        timeout: service.timeout.map(DurationSpec::to_proto),
        initial_metadata: service
            .initial_metadata
            .iter()
            .map(|header| ProtoHeaderValue {
                key: header.key.clone(),
                value: header.value.clone(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    })
}

fn processing_mode(mode: &ProcessingMode) -> ProcessingModeProto {
    ProcessingModeProto {
        request_header_mode: header_mode(mode.request_header_mode),
        response_header_mode: header_mode(mode.response_header_mode),
        request_body_mode: body_mode(mode.request_body_mode),
        response_body_mode: body_mode(mode.response_body_mode),
        request_trailer_mode: header_mode(mode.request_trailer_mode),
        response_trailer_mode: header_mode(mode.response_trailer_mode),
    }
}

fn header_mode(mode: HeaderSendMode) -> i32 {
    let proto = match mode {
        HeaderSendMode::Default => ProtoHeaderMode::Default,
        HeaderSendMode::Send => ProtoHeaderMode::Send,
        HeaderSendMode::Skip => ProtoHeaderMode::Skip,
    };
    proto as i32
}

fn body_mode(mode: BodySendMode) -> i32 {
    let proto = match mode {
        BodySendMode::None => ProtoBodyMode::None,
        BodySendMode::Streamed => ProtoBodyMode::Streamed,
        BodySendMode::Buffered => ProtoBodyMode::Buffered,
        BodySendMode::BufferedPartial => ProtoBodyMode::BufferedPartial,
    };
    proto as i32
}

fn validate_message_timeouts(message: Option<DurationSpec>, max: Option<DurationSpec>) -> Result<()> {
    for timeout in [message, max].into_iter().flatten() {
        let within_max = timeout.seconds < MAX_TIMEOUT_SECONDS
            || (timeout.seconds == MAX_TIMEOUT_SECONDS && timeout.nanos == 0);
        if timeout.seconds < 0 || timeout.nanos < 0 || !within_max {
            return Err(Error::validation_field(
                format!(
                    "timeout {}s is outside the supported range [0s, {}s]",
                    timeout.seconds, MAX_TIMEOUT_SECONDS
                ),
                "message_timeout",
            ));
        }
    }

    if let (Some(message), Some(max)) = (message, max) {
        if message > max {
            return Err(Error::validation_field(
                format!(
                    "message timeout {}s must not exceed max message timeout {}s",
                    message.seconds, max.seconds
                ),
                "max_message_timeout",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ExtProcOverrides, GrpcRetryPolicy, HeaderValue, Host, Metadata, ResourceRef, RetryBackoff,
        Settings, Upstream,
    };
    use crate::plugins::{FilterStage, WellKnownStage};
    use crate::xds::filters::decode_typed_config;

    fn upstream(name: &str) -> Upstream {
        Upstream {
            metadata: Metadata::new("gloo-system", name),
            hosts: vec![Host::new("127.0.0.1", 9000)],
            use_http2: true,
            ..Default::default()
        }
    }

    fn snapshot() -> ApiSnapshot {
        ApiSnapshot::with_upstreams(vec![upstream("default"), upstream("override")])
    }

    fn retry_policy() -> GrpcRetryPolicy {
        GrpcRetryPolicy {
            retry_back_off: Some(RetryBackoff {
                base_interval: Some(DurationSpec::seconds(5)),
                max_interval: Some(DurationSpec::seconds(10)),
            }),
            num_retries: Some(7),
        }
    }

    fn global_settings() -> ExtProcSettings {
        ExtProcSettings {
            grpc_service: Some(ExtProcGrpcService {
                ext_proc_server_ref: ResourceRef::new("gloo-system", "default"),
                authority: Some("xyz".into()),
                retry_policy: Some(retry_policy()),
                timeout: Some(DurationSpec::seconds(100)),
                initial_metadata: vec![HeaderValue::new("A", "B"), HeaderValue::new("C", "D")],
            }),
            filter_stage: Some(FilterStage::before(WellKnownStage::Accepted)),
            failure_mode_allow: Some(true),
            processing_mode: Some(ProcessingMode {
                request_header_mode: HeaderSendMode::Send,
                response_header_mode: HeaderSendMode::Send,
                request_body_mode: BodySendMode::Buffered,
                response_body_mode: BodySendMode::BufferedPartial,
                request_trailer_mode: HeaderSendMode::Skip,
                response_trailer_mode: HeaderSendMode::Default,
            }),
            message_timeout: Some(DurationSpec::seconds(1)),
            max_message_timeout: Some(DurationSpec::seconds(5)),
            request_attributes: vec!["req1".into(), "req2".into()],
            response_attributes: vec!["resp1".into(), "resp2".into(), "resp3".into()],
            ..Default::default()
        }
    }

    fn listener_settings() -> ExtProcSettings {
        ExtProcSettings {
            grpc_service: Some(ExtProcGrpcService {
                ext_proc_server_ref: ResourceRef::new("gloo-system", "override"),
                authority: None,
                retry_policy: Some(retry_policy()),
                timeout: Some(DurationSpec::seconds(100)),
                initial_metadata: vec![HeaderValue::new("E", "F")],
            }),
            filter_stage: Some(FilterStage::after(WellKnownStage::Cors)),
            failure_mode_allow: None,
            processing_mode: Some(ProcessingMode {
                response_header_mode: HeaderSendMode::Skip,
                ..Default::default()
            }),
            message_timeout: None,
            max_message_timeout: Some(DurationSpec::seconds(10)),
            request_attributes: Vec::new(),
            response_attributes: vec!["new1".into(), "new2".into()],
            ..Default::default()
        }
    }

    fn plugin(global: Option<ExtProcSettings>) -> ExtProcPlugin {
        let settings = Settings { ext_proc: global, ..Default::default() };
        let mut plugin = ExtProcPlugin::default();
        plugin.init(&InitParams { settings: &settings }).expect("init");
        plugin
    }

    fn listener(ext_proc: Option<ListenerExtProc>) -> Listener {
        let mut listener = Listener::new("http", 8080);
        listener.http.options.ext_proc = ext_proc;
        listener
    }

    fn run(plugin: &mut ExtProcPlugin, listener: &Listener) -> Result<Vec<StagedFilter>> {
        let snapshot = snapshot();
        let mut params = Params::new(&snapshot);
        plugin.http_filters(&mut params, listener)
    }

    fn decode(filter: &StagedFilter) -> ExternalProcessorProto {
        decode_typed_config(&filter.typed_config, EXT_PROC_TYPE_URL).expect("decode")
    }

    #[test]
    fn listener_settings_merge_over_global() {
        let mut plugin = plugin(Some(global_settings()));
        let listener = listener(Some(ListenerExtProc::ExtProc(listener_settings())));

        let filters = run(&mut plugin, &listener).expect("filters");
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].name, FILTER_NAME);
        assert_eq!(filters[0].stage, FilterStage::after(WellKnownStage::Cors));

        let processor = decode(&filters[0]);
        let service = processor.grpc_service.expect("grpc service");
        let Some(TargetSpecifier::EnvoyGrpc(envoy_grpc)) = service.target_specifier else {
            panic!("expected envoy grpc target");
        };
        assert_eq!(envoy_grpc.cluster_name, "override_gloo-system");
        assert_eq!(envoy_grpc.authority, "");
        let retry = envoy_grpc.retry_policy.expect("retry policy");
        assert_eq!(retry.num_retries, Some(UInt32Value { value: 7 }));
        assert_eq!(retry.retry_back_off.and_then(|b| b.max_interval).map(|d| d.seconds), Some(10));
        assert_eq!(service.timeout.map(|d| d.seconds), Some(100));
        assert_eq!(service.initial_metadata.len(), 1);
        assert_eq!(service.initial_metadata[0].key, "E");

        assert!(processor.failure_mode_allow);
        let mode = processor.processing_mode.expect("processing mode");
        assert_eq!(mode.response_header_mode, ProtoHeaderMode::Skip as i32);
        assert_eq!(mode.request_header_mode, ProtoHeaderMode::Default as i32);
        assert_eq!(processor.message_timeout.map(|d| d.seconds), Some(1));
        assert_eq!(processor.max_message_timeout.map(|d| d.seconds), Some(10));
        assert_eq!(processor.request_attributes, vec!["req1", "req2"]);
        assert_eq!(processor.response_attributes, vec!["new1", "new2"]);
    }

    #[test]
    fn global_settings_alone_produce_filter() {
        let mut plugin = plugin(Some(global_settings()));
        let filters = run(&mut plugin, &listener(None)).expect("filters");

        assert_eq!(filters[0].stage, FilterStage::before(WellKnownStage::Accepted));
        let processor = decode(&filters[0]);
        let mode = processor.processing_mode.expect("mode");
        assert_eq!(mode.request_body_mode, ProtoBodyMode::Buffered as i32);
        assert_eq!(mode.response_body_mode, ProtoBodyMode::BufferedPartial as i32);
        assert_eq!(mode.request_trailer_mode, ProtoHeaderMode::Skip as i32);

        let metadata = processor.metadata_options.expect("metadata options");
        assert!(metadata.forwarding_namespaces.is_none());
        assert_eq!(
            metadata.receiving_namespaces.expect("receiving").untyped,
            RECEIVING_NAMESPACES.to_vec()
        );
    }

    #[test]
    fn listener_toggle_controls_global_settings() {
        let mut with_global = plugin(Some(global_settings()));
        let disabled = listener(Some(ListenerExtProc::DisableExtProc(true)));
        assert!(run(&mut with_global, &disabled).expect("disabled").is_empty());

        let enabled = listener(Some(ListenerExtProc::DisableExtProc(false)));
        assert_eq!(run(&mut with_global, &enabled).expect("enabled").len(), 1);

        let mut without_global = plugin(None);
        assert!(run(&mut without_global, &enabled).expect("no global").is_empty());
        assert!(run(&mut without_global, &listener(None)).expect("nothing").is_empty());
    }

    #[test]
    fn listener_only_settings_without_global() {
        let mut plugin = plugin(None);
        let settings = ExtProcSettings {
            response_attributes: vec!["x".into()],
            ..global_settings()
        };
        let filters = run(&mut plugin, &listener(Some(ListenerExtProc::ExtProc(settings)))).expect("filters");
        assert_eq!(decode(&filters[0]).response_attributes, vec!["x"]);
    }

    #[test]
    fn forwarding_namespaces_follow_settings() {
        let mut plugin = plugin(Some(ExtProcSettings {
            metadata_context_namespaces: vec!["untyped".into()],
            typed_metadata_context_namespaces: vec!["typed".into()],
            ..global_settings()
        }));
        let filters = run(&mut plugin, &listener(None)).expect("filters");
        let forwarding = decode(&filters[0])
            .metadata_options
            .and_then(|options| options.forwarding_namespaces)
            .expect("forwarding");
        assert_eq!(forwarding.untyped, vec!["untyped"]);
        assert_eq!(forwarding.typed, vec!["typed"]);
    }

    #[test]
    fn invalid_listener_settings_are_rejected() {
        let cases: Vec<(ExtProcSettings, &str)> = vec![
            (
                ExtProcSettings { grpc_service: Some(ExtProcGrpcService::default()), ..global_settings() },
                "must reference an upstream",
            ),
            (
                ExtProcSettings {
                    grpc_service: Some(ExtProcGrpcService {
                        ext_proc_server_ref: ResourceRef::new("gloo-system", "invalid"),
                        ..Default::default()
                    }),
                    ..global_settings()
                },
                "gloo-system.invalid",
            ),
            (ExtProcSettings { filter_stage: None, ..global_settings() }, "no filter stage configured"),
            (
                ExtProcSettings { message_timeout: Some(DurationSpec::seconds(3700)), ..global_settings() },
                "timeout 3700s is outside",
            ),
            (
                ExtProcSettings {
                    message_timeout: Some(DurationSpec::seconds(50)),
                    max_message_timeout: Some(DurationSpec::seconds(25)),
                    ..global_settings()
                },
                "message timeout 50s must not exceed max message timeout 25s",
            ),
        ];

        for (settings, expected) in cases {
            let mut plugin = plugin(Some(settings));
            let err = run(&mut plugin, &listener(None)).expect_err(expected);
            assert!(format!("{err}").contains(expected), "{err} should contain {expected}");
        }
    }

    #[test]
    fn message_timeout_bounds_are_inclusive() {
        for seconds in [0, 1, 3600] {
            validate_message_timeouts(Some(DurationSpec::seconds(seconds)), None).expect("within range");
            validate_message_timeouts(None, Some(DurationSpec::seconds(seconds))).expect("within range");
        }

        for timeout in [DurationSpec::seconds(3601), DurationSpec::seconds(-1), DurationSpec::millis(3_600_001)] {
            let err = validate_message_timeouts(Some(timeout), None).expect_err("out of range");
            assert!(format!("{err}").contains("outside the supported range [0s, 3600s]"));
            assert!(err.is_config_error());
            validate_message_timeouts(None, Some(timeout)).expect_err("max out of range");
        }

        validate_message_timeouts(Some(DurationSpec::seconds(3600)), Some(DurationSpec::seconds(3600)))
            .expect("equal timeouts");
        let err = validate_message_timeouts(Some(DurationSpec::millis(1500)), Some(DurationSpec::seconds(1)))
            .expect_err("sub-second excess");
        assert!(format!("{err}").contains("must not exceed max message timeout"));
    }

    #[test]
    fn missing_server_is_a_lookup_failure() {
        let mut plugin = plugin(Some(ExtProcSettings {
            grpc_service: Some(ExtProcGrpcService {
                ext_proc_server_ref: ResourceRef::new("gloo-system", "invalid"),
                ..Default::default()
            }),
            ..global_settings()
        }));
        let err = run(&mut plugin, &listener(None)).expect_err("missing server");
        assert!(err.is_lookup_failure());
    }

    #[test]
    fn unreleased_fields_warn_without_failing() {
        let mut plugin = plugin(Some(ExtProcSettings {
            disable_clear_route_cache: Some(true),
            allow_mode_override: Some(false),
            ..global_settings()
        }));
        let snapshot = snapshot();
        let mut params = Params::new(&snapshot);
        let filters = plugin.http_filters(&mut params, &listener(None)).expect("filters");

        assert_eq!(filters.len(), 1);
        assert_eq!(params.warnings().len(), 2);
        assert!(params.warnings()[0].contains("disable_clear_route_cache"));
        assert!(!decode(&filters[0]).disable_clear_route_cache);
    }

    fn per_route(settings: ExtProcRouteSettings) -> Result<Option<ExtProcPerRoute>> {
        per_route_config(&snapshot(), &settings)
    }

    #[test]
    fn route_settings_shapes() {
        assert_eq!(per_route(ExtProcRouteSettings::default()).expect("inherit"), None);

        let disabled = per_route(ExtProcRouteSettings { disabled: Some(true), overrides: None })
            .expect("disabled")
            .expect("config");
        assert_eq!(disabled.r#override, Some(Override::Disabled(true)));

        let overrides = per_route(ExtProcRouteSettings {
            disabled: None,
            overrides: Some(ExtProcOverrides {
                processing_mode: Some(ProcessingMode {
                    request_header_mode: HeaderSendMode::Skip,
                    ..Default::default()
                }),
                request_attributes: vec!["a".into()],
                response_attributes: vec!["b".into()],
                grpc_service: Some(ExtProcGrpcService {
                    ext_proc_server_ref: ResourceRef::new("gloo-system", "override"),
                    ..Default::default()
                }),
            }),
        })
        .expect("overrides")
        .expect("config");
        let Some(Override::Overrides(overrides)) = overrides.r#override else {
            panic!("expected overrides");
        };
        assert_eq!(overrides.request_attributes, vec!["a"]);
        assert_eq!(overrides.response_attributes, vec!["b"]);
        assert!(overrides.grpc_service.is_some());
    }

    #[test]
    fn invalid_route_settings_are_rejected() {
        let err = per_route(ExtProcRouteSettings { disabled: Some(false), overrides: None })
            .expect_err("disabled false");
        assert!(format!("{err}").contains("disabled: true"));

        let err = per_route(ExtProcRouteSettings {
            disabled: Some(true),
            overrides: Some(ExtProcOverrides::default()),
        })
        .expect_err("both set");
        assert!(format!("{err}").contains("not both"));

        let err = per_route(ExtProcRouteSettings {
            disabled: None,
            overrides: Some(ExtProcOverrides {
                grpc_service: Some(ExtProcGrpcService {
                    ext_proc_server_ref: ResourceRef::new("gloo-system", "invalid"),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        })
        .expect_err("missing server");
        assert!(format!("{err}").contains("gloo-system.invalid"));

        let err = per_route(ExtProcRouteSettings {
            disabled: None,
            overrides: Some(ExtProcOverrides {
                grpc_service: Some(ExtProcGrpcService::default()),
                ..Default::default()
            }),
        })
        .expect_err("empty ref");
        assert!(format!("{err}").contains("must reference an upstream"));
    }

    #[test]
    fn route_override_is_written_under_filter_name() {
        let mut plugin = plugin(None);
        let snapshot = snapshot();
        let mut params = Params::new(&snapshot);
        let listener = listener(None);
        let virtual_host = VirtualHost::default();
        let mut route = Route::to_upstream("/", ResourceRef::new("gloo-system", "default"));
        route.options.ext_proc = Some(ExtProcRouteSettings { disabled: Some(true), overrides: None });

        let mut output = EnvoyRoute::default();
        let context = RouteContext { listener: &listener, virtual_host: &virtual_host };
        plugin.process_route(&mut params, &context, &route, &mut output).expect("route");

        let any = output.typed_per_filter_config.get(FILTER_NAME).expect("per filter config");
        assert_eq!(any.type_url, EXT_PROC_PER_ROUTE_TYPE_URL);
        let decoded: ExtProcPerRoute = decode_typed_config(any, EXT_PROC_PER_ROUTE_TYPE_URL).expect("decode");
        assert_eq!(decoded.r#override, Some(Override::Disabled(true)));
    }
}
