//! Envoy v3 resource emission for the gatehouse control plane.
//!
//! The [`Builder`] turns a validated policy set plus the observed options
//! into the typed resources the embedded data plane consumes: listeners with
//! their filter chains and transport sockets, the main route configuration
//! and one cluster per forwarding policy. Shipping the resources over the
//! discovery stream is the transport collaborator's concern, not this
//! crate's.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod clusters;
mod filters;
mod listeners;
mod luascripts;
mod routes;

pub use self::clusters::cluster_name;
use gatehouse_core::{Options, RuntimeFlags};

/// Name of the dynamic route configuration resource fetched over the
/// aggregated discovery service.
pub const MAIN_ROUTE_CONFIGURATION_NAME: &str = "main";

/// Cluster carrying control-plane gRPC traffic (ext_authz, access logs).
pub const CONTROL_PLANE_GRPC_CLUSTER: &str = "gatehouse-control-plane-grpc";

/// Cluster answering ACME TLS-ALPN-01 certificate issuance handshakes.
pub const ACME_TLS_ALPN_CLUSTER: &str = "gatehouse-acme-tls-alpn";

/// A PEM certificate/key pair from the certificate set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Everything the builder observes: options, the certificate set and the
/// effective runtime flags.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub options: Options,
    pub certificates: Vec<Certificate>,
    pub runtime_flags: RuntimeFlags,
}

/// Builds data-plane resources from policies and options.
#[derive(Clone, Debug, Default)]
pub struct Builder {}

// === impl Builder ===

impl Builder {
    pub fn new() -> Self {
        Self {}
    }
}

/// The main ingress listener only exists on processes that answer end-user
/// traffic.
pub fn should_start_main_listener(options: &Options) -> bool {
    options.services.is_authenticate() || options.services.is_proxy()
}
