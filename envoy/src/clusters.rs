//! Cluster emission: one upstream cluster per forwarding policy.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use envoy_types::pb::envoy::config::cluster::v3 as cluster;
use envoy_types::pb::envoy::config::core::v3 as core;
use envoy_types::pb::envoy::config::endpoint::v3 as endpoint;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3 as tls;
use envoy_types::pb::google::protobuf::UInt32Value;
use gatehouse_core::Policy;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::filters::marshal_any;
use crate::listeners::{inline_bytes, pb_duration};
use crate::{Builder, Config};

/// The cluster resource name for a route ID.
pub fn cluster_name(route_id: &str) -> String {
    format!("route-{route_id}")
}

impl Builder {
    /// Builds one cluster per policy that forwards to upstreams. Redirect
    /// and direct-response policies produce no cluster.
    pub fn build_clusters(&self, cfg: &Config, policies: &[Policy]) -> Result<Vec<cluster::Cluster>> {
        let mut clusters = Vec::new();
        for policy in policies {
            if policy.to.is_empty() {
                continue;
            }
            let built = self
                .build_policy_cluster(cfg, policy)
                .with_context(|| format!("error building cluster for route {policy}"))?;
            clusters.push(built);
        }
        Ok(clusters)
    }

    fn build_policy_cluster(&self, _cfg: &Config, policy: &Policy) -> Result<cluster::Cluster> {
        let id = policy.route_id()?;
        let name = cluster_name(&id);

        let mut lb_endpoints = Vec::with_capacity(policy.to.len());
        let mut all_static = true;
        let mut tls_upstream = false;
        let mut first_host = String::new();
        for to in &policy.to {
            let url = to.parse()?;
            let host = url
                .host_str()
                .ok_or_else(|| anyhow!("destination {} has no host", to.url))?;
            if first_host.is_empty() {
                first_host = host.to_string();
            }
            if host.parse::<IpAddr>().is_err() {
                all_static = false;
            }
            if matches!(url.scheme(), "https" | "tls") {
                tls_upstream = true;
            }
            let port = upstream_port(&url)
                .ok_or_else(|| anyhow!("destination {} has no port", to.url))?;

            lb_endpoints.push(endpoint::LbEndpoint {
                host_identifier: Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(
                    endpoint::Endpoint {
                        address: Some(core::Address {
                            address: Some(core::address::Address::SocketAddress(
                                core::SocketAddress {
                                    address: host.to_string(),
                                    port_specifier: Some(
                                        core::socket_address::PortSpecifier::PortValue(u32::from(
                                            port,
                                        )),
                                    ),
                                    ..Default::default()
                                },
                            )),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                )),
                load_balancing_weight: if to.lb_weight > 0 {
                    Some(UInt32Value {
                        value: to.lb_weight,
                    })
                } else {
                    None
                },
                ..Default::default()
            });
        }

        let discovery = if all_static {
            cluster::cluster::DiscoveryType::Static
        } else {
            cluster::cluster::DiscoveryType::StrictDns
        };

        let transport_socket = if tls_upstream {
            Some(self.build_upstream_tls_transport_socket(policy, &first_host)?)
        } else {
            None
        };

        Ok(cluster::Cluster {
            name,
            connect_timeout: Some(pb_duration(Duration::from_secs(10))),
            cluster_discovery_type: Some(cluster::cluster::ClusterDiscoveryType::Type(
                discovery as i32,
            )),
            load_assignment: Some(endpoint::ClusterLoadAssignment {
                cluster_name: cluster_name(&id),
                endpoints: vec![endpoint::LocalityLbEndpoints {
                    lb_endpoints,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            transport_socket,
            ..Default::default()
        })
    }

    fn build_upstream_tls_transport_socket(
        &self,
        policy: &Policy,
        default_sni: &str,
    ) -> Result<core::TransportSocket> {
        let sni = if !policy.tls_upstream_server_name.is_empty() {
            policy.tls_upstream_server_name.clone()
        } else if !policy.tls_server_name.is_empty() {
            policy.tls_server_name.clone()
        } else {
            default_sni.to_string()
        };

        let mut common = tls::CommonTlsContext::default();

        if let Some(cert) = &policy.client_certificate {
            common.tls_certificates.push(tls::TlsCertificate {
                certificate_chain: Some(inline_bytes(cert.certificate.clone())),
                private_key: Some(inline_bytes(cert.private_key.clone())),
                ..Default::default()
            });
        }

        let mut validation = tls::CertificateValidationContext::default();
        if policy.tls_skip_verify {
            validation.trust_chain_verification =
                tls::certificate_validation_context::TrustChainVerification::AcceptUntrusted
                    as i32;
        }
        if !policy.tls_custom_ca.is_empty() {
            let ca = STANDARD
                .decode(&policy.tls_custom_ca)
                .context("invalid custom certificate authority")?;
            validation.trusted_ca = Some(inline_bytes(ca));
        }
        common.validation_context_type = Some(
            tls::common_tls_context::ValidationContextType::ValidationContext(validation),
        );

        let context = tls::UpstreamTlsContext {
            common_tls_context: Some(common),
            sni,
            allow_renegotiation: policy.tls_upstream_allow_renegotiation,
            ..Default::default()
        };

        Ok(core::TransportSocket {
            name: "tls".to_string(),
            config_type: Some(core::transport_socket::ConfigType::TypedConfig(marshal_any(
                "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext",
                &context,
            ))),
            ..Default::default()
        })
    }
}

fn upstream_port(url: &Url) -> Option<u16> {
    url.port_or_known_default().or(match url.scheme() {
        "ssh" => Some(22),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::WeightedUrl;
    use prost::Message;

    fn mk_policy(from: &str, to: &[&str]) -> Policy {
        let mut policy = Policy {
            from: from.to_string(),
            to: to.iter().map(|to| WeightedUrl::parse_str(to)).collect(),
            ..Default::default()
        };
        policy.validate().expect("valid policy");
        policy.id = policy.route_id().expect("route id");
        policy
    }

    fn endpoint_address(lb: &endpoint::LbEndpoint) -> (String, u32) {
        let Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(ref ep)) = lb.host_identifier
        else {
            panic!("no endpoint")
        };
        let Some(core::address::Address::SocketAddress(ref sa)) =
            ep.address.as_ref().unwrap().address
        else {
            panic!("no socket address")
        };
        let Some(core::socket_address::PortSpecifier::PortValue(port)) = sa.port_specifier else {
            panic!("no port")
        };
        (sa.address.clone(), port)
    }

    #[test]
    fn single_endpoint_cluster() {
        let policy = mk_policy("https://app.example.com", &["https://backend:8080"]);
        let clusters = Builder::new()
            .build_clusters(&Config::default(), std::slice::from_ref(&policy))
            .expect("builds");

        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.name, cluster_name(&policy.id));
        let lb_endpoints = &cluster.load_assignment.as_ref().unwrap().endpoints[0].lb_endpoints;
        assert_eq!(lb_endpoints.len(), 1);
        assert_eq!(
            endpoint_address(&lb_endpoints[0]),
            ("backend".to_string(), 8080)
        );
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(cluster::cluster::ClusterDiscoveryType::Type(
                cluster::cluster::DiscoveryType::StrictDns as i32
            ))
        );
        // An https upstream gets a TLS transport socket with the upstream
        // host as its default SNI.
        let socket = cluster.transport_socket.as_ref().expect("tls socket");
        let Some(core::transport_socket::ConfigType::TypedConfig(ref any)) = socket.config_type
        else {
            panic!("no typed config")
        };
        let context = tls::UpstreamTlsContext::decode(&any.value[..]).expect("decodes");
        assert_eq!(context.sni, "backend");
    }

    #[test]
    fn redirect_policies_produce_no_cluster() {
        let mut policy = Policy {
            from: "https://app.example.com".to_string(),
            redirect: Some(gatehouse_core::PolicyRedirect {
                host_redirect: Some("other.example.com".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        policy.validate().expect("valid");
        let clusters = Builder::new()
            .build_clusters(&Config::default(), &[policy])
            .expect("builds");
        assert!(clusters.is_empty());
    }

    #[test]
    fn weighted_endpoints() {
        let policy = mk_policy(
            "https://app.example.com",
            &["https://a:8080,2", "https://b:8080,1"],
        );
        let clusters = Builder::new()
            .build_clusters(&Config::default(), &[policy])
            .expect("builds");
        let lb_endpoints = &clusters[0].load_assignment.as_ref().unwrap().endpoints[0].lb_endpoints;
        assert_eq!(
            lb_endpoints[0].load_balancing_weight,
            Some(UInt32Value { value: 2 })
        );
        assert_eq!(
            lb_endpoints[1].load_balancing_weight,
            Some(UInt32Value { value: 1 })
        );
    }

    #[test]
    fn ip_only_upstreams_are_static() {
        let policy = mk_policy("https://app.example.com", &["http://127.0.0.1:8080"]);
        let clusters = Builder::new()
            .build_clusters(&Config::default(), &[policy])
            .expect("builds");
        assert_eq!(
            clusters[0].cluster_discovery_type,
            Some(cluster::cluster::ClusterDiscoveryType::Type(
                cluster::cluster::DiscoveryType::Static as i32
            ))
        );
        assert!(clusters[0].transport_socket.is_none());
    }

    #[test]
    fn skip_verify_and_custom_ca_shape_the_validation_context() {
        let mut policy = mk_policy("https://app.example.com", &["https://backend:8080"]);
        policy.tls_skip_verify = true;
        policy.tls_custom_ca = STANDARD.encode(b"pem bytes");
        policy.tls_upstream_server_name = "internal.example.com".to_string();

        let clusters = Builder::new()
            .build_clusters(&Config::default(), &[policy])
            .expect("builds");
        let socket = clusters[0].transport_socket.as_ref().unwrap();
        let Some(core::transport_socket::ConfigType::TypedConfig(ref any)) = socket.config_type
        else {
            panic!("no typed config")
        };
        let context = tls::UpstreamTlsContext::decode(&any.value[..]).expect("decodes");
        assert_eq!(context.sni, "internal.example.com");
        let Some(tls::common_tls_context::ValidationContextType::ValidationContext(
            ref validation,
        )) = context.common_tls_context.as_ref().unwrap().validation_context_type
        else {
            panic!("no validation context")
        };
        assert_eq!(
            validation.trust_chain_verification,
            tls::certificate_validation_context::TrustChainVerification::AcceptUntrusted as i32
        );
        assert_eq!(
            validation.trusted_ca,
            Some(inline_bytes(b"pem bytes".to_vec()))
        );
    }
}
