//! Conversions between the policy model and its wire form.
//!
//! Construction from the wire is total; cross-field checks are deferred to
//! validation so a partially specified policy can still be inspected and
//! reported on. Fields absent on the wire map to empty or default values,
//! and unset nullable fields (timeouts, optional booleans, the allowed
//! audiences list) stay unset rather than collapsing to zero.

use super::{
    DirectResponse, FlattenedClaims, JwtIssuerFormat, Mcp, McpClient, McpServer, Policy,
    PolicyRedirect, RewriteHeader, SubPolicy, WeightedUrl,
};
use crate::proto;
use std::time::Duration;

impl Policy {
    /// Builds a policy from its wire form.
    pub fn from_proto(pb: proto::Route) -> Self {
        let mut to = pb
            .to
            .iter()
            .map(|url| WeightedUrl {
                url: url.clone(),
                lb_weight: 0,
            })
            .collect::<Vec<_>>();
        if pb.load_balancing_weights.len() == to.len() {
            for (to, weight) in to.iter_mut().zip(&pb.load_balancing_weights) {
                to.lb_weight = *weight;
            }
        }

        Self {
            id: pb.id,
            name: pb.name,
            description: pb.description,
            logo_url: pb.logo_url,
            from: pb.from,
            to,
            redirect: pb.redirect.map(|r| PolicyRedirect {
                https_redirect: r.https_redirect,
                scheme_redirect: r.scheme_redirect,
                host_redirect: r.host_redirect,
                port_redirect: r.port_redirect,
                path_redirect: r.path_redirect,
                prefix_rewrite: r.prefix_rewrite,
                response_code: r.response_code,
                strip_query: r.strip_query,
            }),
            response: pb.response.map(|r| DirectResponse {
                status: r.status,
                body: r.body,
            }),
            lb_weights: Vec::new(),
            allowed_users: pb.allowed_users,
            allowed_domains: pb.allowed_domains,
            allowed_idp_claims: claims_from_pb(pb.allowed_idp_claims),
            prefix: pb.prefix,
            path: pb.path,
            regex: pb.regex,
            regex_priority_order: pb.regex_priority_order,
            compiled_regex: None,
            prefix_rewrite: pb.prefix_rewrite,
            regex_rewrite_pattern: pb.regex_rewrite_pattern,
            regex_rewrite_substitution: pb.regex_rewrite_substitution,
            host_rewrite: pb.host_rewrite.unwrap_or_default(),
            host_rewrite_header: pb.host_rewrite_header.unwrap_or_default(),
            host_path_regex_rewrite_pattern: pb.host_path_regex_rewrite_pattern.unwrap_or_default(),
            host_path_regex_rewrite_substitution: pb
                .host_path_regex_rewrite_substitution
                .unwrap_or_default(),
            cors_allow_preflight: pb.cors_allow_preflight,
            allow_public_unauthenticated_access: pb.allow_public_unauthenticated_access,
            allow_any_authenticated_user: pb.allow_any_authenticated_user,
            upstream_timeout: pb.timeout.as_ref().map(duration_from_pb),
            idle_timeout: pb.idle_timeout.as_ref().map(duration_from_pb),
            allow_websockets: pb.allow_websockets,
            allow_spdy: pb.allow_spdy,
            tls_skip_verify: pb.tls_skip_verify,
            tls_server_name: pb.tls_server_name,
            tls_downstream_server_name: pb.tls_downstream_server_name,
            tls_upstream_server_name: pb.tls_upstream_server_name,
            tls_custom_ca: pb.tls_custom_ca,
            tls_custom_ca_file: pb.tls_custom_ca_file,
            tls_client_cert: pb.tls_client_cert,
            tls_client_key: pb.tls_client_key,
            tls_client_cert_file: pb.tls_client_cert_file,
            tls_client_key_file: pb.tls_client_key_file,
            client_certificate: None,
            tls_upstream_allow_renegotiation: pb.tls_upstream_allow_renegotiation,
            set_request_headers: pb.set_request_headers.into_iter().collect(),
            remove_request_headers: pb.remove_request_headers,
            rewrite_response_headers: pb
                .rewrite_response_headers
                .into_iter()
                .map(|h| RewriteHeader {
                    header: h.header,
                    prefix: h.prefix,
                    value: h.value,
                })
                .collect(),
            set_response_headers: pb.set_response_headers.into_iter().collect(),
            preserve_host_header: pb.preserve_host_header,
            pass_identity_headers: pb.pass_identity_headers,
            jwt_issuer_format: JwtIssuerFormat(pb.jwt_issuer_format),
            idp_client_id: pb.idp_client_id.unwrap_or_default(),
            idp_client_secret: pb.idp_client_secret.unwrap_or_default(),
            idp_access_token_allowed_audiences: pb
                .idp_access_token_allowed_audiences
                .map(|l| l.values),
            show_error_details: pb.show_error_details,
            sub_policies: pb.policies.into_iter().map(sub_policy_from_pb).collect(),
            depends_on: pb.depends_on,
            mcp: pb.mcp.map(|mcp| Mcp {
                server: mcp.server.map(|s| McpServer {
                    max_request_bytes: s.max_request_bytes,
                    path: s.path,
                }),
                client: mcp.client.map(|_| McpClient {}),
            }),
        }
    }

    /// Converts the policy to its wire form.
    pub fn to_proto(&self) -> proto::Route {
        proto::Route {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            logo_url: self.logo_url.clone(),
            from: self.from.clone(),
            to: self.to.iter().map(|to| to.url.clone()).collect(),
            load_balancing_weights: if self.to.iter().any(|to| to.lb_weight > 0) {
                self.to.iter().map(|to| to.lb_weight).collect()
            } else {
                Vec::new()
            },
            redirect: self.redirect.as_ref().map(|r| proto::RouteRedirect {
                https_redirect: r.https_redirect,
                scheme_redirect: r.scheme_redirect.clone(),
                host_redirect: r.host_redirect.clone(),
                port_redirect: r.port_redirect,
                path_redirect: r.path_redirect.clone(),
                prefix_rewrite: r.prefix_rewrite.clone(),
                response_code: r.response_code,
                strip_query: r.strip_query,
            }),
            response: self.response.as_ref().map(|r| proto::RouteDirectResponse {
                status: r.status,
                body: r.body.clone(),
            }),
            allowed_users: self.allowed_users.clone(),
            allowed_domains: self.allowed_domains.clone(),
            allowed_idp_claims: claims_to_pb(&self.allowed_idp_claims),
            prefix: self.prefix.clone(),
            path: self.path.clone(),
            regex: self.regex.clone(),
            regex_priority_order: self.regex_priority_order,
            prefix_rewrite: self.prefix_rewrite.clone(),
            regex_rewrite_pattern: self.regex_rewrite_pattern.clone(),
            regex_rewrite_substitution: self.regex_rewrite_substitution.clone(),
            host_rewrite: some_if_not_empty(&self.host_rewrite),
            host_rewrite_header: some_if_not_empty(&self.host_rewrite_header),
            host_path_regex_rewrite_pattern: some_if_not_empty(
                &self.host_path_regex_rewrite_pattern,
            ),
            host_path_regex_rewrite_substitution: some_if_not_empty(
                &self.host_path_regex_rewrite_substitution,
            ),
            cors_allow_preflight: self.cors_allow_preflight,
            allow_public_unauthenticated_access: self.allow_public_unauthenticated_access,
            allow_any_authenticated_user: self.allow_any_authenticated_user,
            timeout: self.upstream_timeout.map(duration_to_pb),
            idle_timeout: self.idle_timeout.map(duration_to_pb),
            allow_websockets: self.allow_websockets,
            allow_spdy: self.allow_spdy,
            tls_skip_verify: self.tls_skip_verify,
            tls_server_name: self.tls_server_name.clone(),
            tls_downstream_server_name: self.tls_downstream_server_name.clone(),
            tls_upstream_server_name: self.tls_upstream_server_name.clone(),
            tls_custom_ca: self.tls_custom_ca.clone(),
            tls_custom_ca_file: self.tls_custom_ca_file.clone(),
            tls_client_cert: self.tls_client_cert.clone(),
            tls_client_key: self.tls_client_key.clone(),
            tls_client_cert_file: self.tls_client_cert_file.clone(),
            tls_client_key_file: self.tls_client_key_file.clone(),
            tls_upstream_allow_renegotiation: self.tls_upstream_allow_renegotiation,
            set_request_headers: self.set_request_headers.clone(),
            remove_request_headers: self.remove_request_headers.clone(),
            rewrite_response_headers: self
                .rewrite_response_headers
                .iter()
                .map(|h| proto::RouteRewriteHeader {
                    header: h.header.clone(),
                    prefix: h.prefix.clone(),
                    value: h.value.clone(),
                })
                .collect(),
            set_response_headers: self.set_response_headers.clone(),
            preserve_host_header: self.preserve_host_header,
            pass_identity_headers: self.pass_identity_headers,
            jwt_issuer_format: self.jwt_issuer_format.0.clone(),
            idp_client_id: some_if_not_empty(&self.idp_client_id),
            idp_client_secret: some_if_not_empty(&self.idp_client_secret),
            idp_access_token_allowed_audiences: self
                .idp_access_token_allowed_audiences
                .as_ref()
                .map(|values| proto::StringList {
                    values: values.clone(),
                }),
            show_error_details: self.show_error_details,
            policies: self.sub_policies.iter().map(sub_policy_to_pb).collect(),
            depends_on: self.depends_on.clone(),
            mcp: self.mcp.as_ref().map(|mcp| proto::Mcp {
                server: mcp.server.as_ref().map(|s| proto::McpServer {
                    max_request_bytes: s.max_request_bytes,
                    path: s.path.clone(),
                }),
                client: mcp.client.as_ref().map(|_| proto::McpClient {}),
            }),
        }
    }
}

fn sub_policy_from_pb(sp: proto::SubPolicy) -> SubPolicy {
    // An unparsable match expression is kept verbatim rather than dropped;
    // validation rejects the policy so it can never become an empty (always
    // true) predicate body.
    let (match_expr, invalid_match_expr) = match sp.match_expression {
        None => (None, None),
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => (Some(value), None),
            Err(_) => (None, Some(raw)),
        },
    };
    SubPolicy {
        id: sp.id,
        name: sp.name,
        allowed_users: sp.allowed_users,
        allowed_domains: sp.allowed_domains,
        allowed_idp_claims: claims_from_pb(sp.allowed_idp_claims),
        match_expr,
        invalid_match_expr,
        explanation: sp.explanation,
        remediation: sp.remediation,
    }
}

fn sub_policy_to_pb(sp: &SubPolicy) -> proto::SubPolicy {
    proto::SubPolicy {
        id: sp.id.clone(),
        name: sp.name.clone(),
        allowed_users: sp.allowed_users.clone(),
        allowed_domains: sp.allowed_domains.clone(),
        allowed_idp_claims: claims_to_pb(&sp.allowed_idp_claims),
        match_expression: sp.invalid_match_expr.clone().or_else(|| {
            sp.match_expr
                .as_ref()
                .and_then(|v| serde_json::to_string(v).ok())
        }),
        explanation: sp.explanation.clone(),
        remediation: sp.remediation.clone(),
    }
}

fn claims_from_pb(
    claims: std::collections::BTreeMap<String, proto::ClaimValues>,
) -> FlattenedClaims {
    claims.into_iter().map(|(k, v)| (k, v.values)).collect()
}

fn claims_to_pb(
    claims: &FlattenedClaims,
) -> std::collections::BTreeMap<String, proto::ClaimValues> {
    claims
        .iter()
        .map(|(k, v)| (k.clone(), proto::ClaimValues { values: v.clone() }))
        .collect()
}

fn some_if_not_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn duration_from_pb(d: &prost_types::Duration) -> Duration {
    Duration::new(d.seconds.max(0) as u64, d.nanos.max(0) as u32)
}

fn duration_to_pb(d: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}
