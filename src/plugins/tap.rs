//! Tap plugin
//!
//! Mirrors traffic of a listener to exactly one configured sink.

use envoy_types::pb::envoy::config::common::matcher::v3::{match_predicate::Rule, MatchPredicate};
use envoy_types::pb::envoy::config::core::v3::{
    grpc_service::{EnvoyGrpc, TargetSpecifier},
    GrpcService,
};
use envoy_types::pb::envoy::config::tap::v3::{
    output_sink::OutputSinkType, OutputConfig, OutputSink, StreamingGrpcSink,
    TapConfig as TapConfigProto,
};
use envoy_types::pb::envoy::extensions::common::tap::v3::{
    common_extension_config::ConfigType, CommonExtensionConfig,
};
use envoy_types::pb::envoy::extensions::filters::http::tap::v3::Tap;
use envoy_types::pb::google::protobuf::{Duration as ProtoDuration, UInt32Value};

use super::{FilterStage, HttpFilterPlugin, InitParams, Params, Plugin, StagedFilter, WellKnownStage};
use crate::domain::{ApiSnapshot, DurationSpec, Listener, TapConfig, TapSink};
use crate::errors::{Error, Result};
use crate::xds::filters::{any_from_message, typed_extension_config};

pub const FILTER_NAME: &str = "envoy.filters.http.tap";
pub const TAP_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.tap.v3.Tap";
pub const FILTER_STAGE: FilterStage = FilterStage::after(WellKnownStage::Fault);

pub const HTTP_SINK_NAME: &str = "gateplane.tap.sinks.http";
pub const HTTP_SINK_TYPE_URL: &str = "type.googleapis.com/gateplane.tap.sinks.http.v1.HttpSink";

/// Payload of the custom HTTP sink.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpSink {
    #[prost(string, tag = "1")]
    pub cluster: String,
    #[prost(message, optional, tag = "2")]
    pub timeout: Option<ProtoDuration>,
}

#[derive(Debug, Default)]
pub struct TapPlugin;

impl Plugin for TapPlugin {
    fn name(&self) -> &'static str {
        "tap"
    }

    fn init(&mut self, _params: &InitParams<'_>) -> Result<()> {
        Ok(())
    }

    fn as_http_filters(&mut self) -> Option<&mut dyn HttpFilterPlugin> {
        Some(self)
    }
}

impl HttpFilterPlugin for TapPlugin {
    fn http_filters(&mut self, params: &mut Params<'_>, listener: &Listener) -> Result<Vec<StagedFilter>> {
        let Some(config) = &listener.http.options.tap else {
            return Ok(Vec::new());
        };

        match tap_filter(params.snapshot, &listener.name, config)? {
            Some(tap) => Ok(vec![StagedFilter::new(FILTER_NAME, any_from_message(TAP_TYPE_URL, &tap), FILTER_STAGE)]),
            None => Ok(Vec::new()),
        }
    }
}

/// Build the filter config. `None` when no sink is configured.
pub fn tap_filter(snapshot: &ApiSnapshot, tap_id: &str, config: &TapConfig) -> Result<Option<Tap>> {
    let sink = match config.sinks.as_slice() {
        [] => return Ok(None),
        [sink] => sink,
        sinks => {
            return Err(Error::validation_field(
                format!("tap supports exactly one sink, found {}", sinks.len()),
                "sinks",
            ));
        }
    };

    let output_sink_type = match sink {
        TapSink::Grpc { tap_server } => {
            let upstream = snapshot.find_upstream(tap_server)?;
            OutputSinkType::StreamingGrpc(StreamingGrpcSink {
                tap_id: tap_id.to_string(),
                grpc_service: Some(GrpcService {
                    target_specifier: Some(TargetSpecifier::EnvoyGrpc(EnvoyGrpc {
                        cluster_name: upstream.cluster_name(),
                        ..Default::default()
                    })),
                    ..Default::default()
                }),
            })
        }
        TapSink::Http { tap_server, timeout } => {
            let upstream = snapshot.find_upstream(tap_server)?;
            let payload = HttpSink {
                cluster: upstream.cluster_name(),
                timeout: timeout.map(DurationSpec::to_proto),
            };
            OutputSinkType::CustomSink(typed_extension_config(HTTP_SINK_NAME, HTTP_SINK_TYPE_URL, &payload))
        }
    };

    let tap_config = TapConfigProto {
        r#match: Some(MatchPredicate { rule: Some(Rule::AnyMatch(true)) }),
        output_config: Some(OutputConfig {
            sinks: vec![OutputSink { output_sink_type: Some(output_sink_type), ..Default::default() }],
            max_buffered_rx_bytes: config.max_buffered_rx_bytes.map(|value| UInt32Value { value }),
            max_buffered_tx_bytes: config.max_buffered_tx_bytes.map(|value| UInt32Value { value }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(Some(Tap {
        common_config: Some(CommonExtensionConfig {
            config_type: Some(ConfigType::StaticConfig(tap_config)),
        }),
        record_headers_received_time: config.record_headers_received_time,
        ..Default::default()
    }))
}
