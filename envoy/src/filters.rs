//! Typed filter and transport-socket constructors shared by the listener
//! builders.

use envoy_types::pb::envoy::config::accesslog::v3 as accesslog;
use envoy_types::pb::envoy::config::core::v3 as core;
use envoy_types::pb::envoy::config::listener::v3 as listener;
use envoy_types::pb::envoy::extensions::access_loggers::grpc::v3 as grpc_accesslog;
use envoy_types::pb::envoy::extensions::filters::http::ext_authz::v3 as ext_authz;
use envoy_types::pb::envoy::extensions::filters::http::lua::v3 as lua;
use envoy_types::pb::envoy::extensions::filters::http::router::v3 as router;
use envoy_types::pb::envoy::extensions::filters::listener::proxy_protocol::v3 as proxy_protocol;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3 as tls_inspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3 as hcm;
use envoy_types::pb::google::protobuf::{Any, Duration as PbDuration};
use prost::Message;

use crate::CONTROL_PLANE_GRPC_CLUSTER;

/// Packs a message into a `google.protobuf.Any` under its canonical type URL.
pub(crate) fn marshal_any<M: Message>(type_url: &str, msg: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: msg.encode_to_vec(),
    }
}

pub(crate) fn lua_filter(script: &str) -> hcm::HttpFilter {
    let config = lua::Lua {
        default_source_code: Some(core::DataSource {
            specifier: Some(core::data_source::Specifier::InlineString(
                script.to_string(),
            )),
            ..Default::default()
        }),
        ..Default::default()
    };
    hcm::HttpFilter {
        name: "envoy.filters.http.lua".to_string(),
        config_type: Some(hcm::http_filter::ConfigType::TypedConfig(marshal_any(
            "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua",
            &config,
        ))),
        ..Default::default()
    }
}

/// The external authorization filter, pointed at the control plane over
/// gRPC.
pub(crate) fn ext_authz_filter(grpc_client_timeout: PbDuration) -> hcm::HttpFilter {
    let config = ext_authz::ExtAuthz {
        transport_api_version: core::ApiVersion::V3 as i32,
        services: Some(ext_authz::ext_authz::Services::GrpcService(
            core::GrpcService {
                target_specifier: Some(core::grpc_service::TargetSpecifier::EnvoyGrpc(
                    core::grpc_service::EnvoyGrpc {
                        cluster_name: CONTROL_PLANE_GRPC_CLUSTER.to_string(),
                        ..Default::default()
                    },
                )),
                timeout: Some(grpc_client_timeout),
                ..Default::default()
            },
        )),
        ..Default::default()
    };
    hcm::HttpFilter {
        name: "envoy.filters.http.ext_authz".to_string(),
        config_type: Some(hcm::http_filter::ConfigType::TypedConfig(marshal_any(
            "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz",
            &config,
        ))),
        ..Default::default()
    }
}

pub(crate) fn http_router_filter() -> hcm::HttpFilter {
    hcm::HttpFilter {
        name: "envoy.filters.http.router".to_string(),
        config_type: Some(hcm::http_filter::ConfigType::TypedConfig(marshal_any(
            "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router",
            &router::Router::default(),
        ))),
        ..Default::default()
    }
}

pub(crate) fn tls_inspector_filter() -> listener::ListenerFilter {
    listener::ListenerFilter {
        name: "envoy.filters.listener.tls_inspector".to_string(),
        config_type: Some(listener::listener_filter::ConfigType::TypedConfig(
            marshal_any(
                "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector",
                &tls_inspector::TlsInspector::default(),
            ),
        )),
        ..Default::default()
    }
}

pub(crate) fn proxy_protocol_filter() -> listener::ListenerFilter {
    listener::ListenerFilter {
        name: "envoy.filters.listener.proxy_protocol".to_string(),
        config_type: Some(listener::listener_filter::ConfigType::TypedConfig(
            marshal_any(
                "type.googleapis.com/envoy.extensions.filters.listener.proxy_protocol.v3.ProxyProtocol",
                &proxy_protocol::ProxyProtocol::default(),
            ),
        )),
        ..Default::default()
    }
}

/// A TCP gRPC access log bound to the listener itself, so connections
/// rejected before the HTTP filter chain remain observable.
pub(crate) fn listener_access_log() -> accesslog::AccessLog {
    let config = grpc_accesslog::TcpGrpcAccessLogConfig {
        common_config: Some(grpc_accesslog::CommonGrpcAccessLogConfig {
            log_name: "ingress-http-listener".to_string(),
            transport_api_version: core::ApiVersion::V3 as i32,
            grpc_service: Some(core::GrpcService {
                target_specifier: Some(core::grpc_service::TargetSpecifier::EnvoyGrpc(
                    core::grpc_service::EnvoyGrpc {
                        cluster_name: CONTROL_PLANE_GRPC_CLUSTER.to_string(),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            }),
            ..Default::default()
        }),
    };
    accesslog::AccessLog {
        name: "envoy.access_loggers.tcp_grpc".to_string(),
        config_type: Some(accesslog::access_log::ConfigType::TypedConfig(marshal_any(
            "type.googleapis.com/envoy.extensions.access_loggers.grpc.v3.TcpGrpcAccessLogConfig",
            &config,
        ))),
        ..Default::default()
    }
}
