//! Wire form of the route policy configuration.
//!
//! These messages mirror the `gatehouse.config.v1` protobuf schema and are
//! maintained by hand in generated-code style. Field presence (`optional`)
//! distinguishes set-to-default from unset for nullable fields: timeouts,
//! booleans behind pointers and the IdP allowed-audiences list.

#![allow(missing_docs)]

/// A configuration document: the binary counterpart of the YAML source form.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigDocument {
    #[prost(message, repeated, tag = "1")]
    pub routes: ::prost::alloc::vec::Vec<Route>,
}

/// A single route policy.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub description: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub logo_url: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub from: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "6")]
    pub to: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Optional load balancing weights applied to the endpoints in `to`.
    /// Either empty or the same length as `to`.
    #[prost(uint32, repeated, tag = "7")]
    pub load_balancing_weights: ::prost::alloc::vec::Vec<u32>,
    #[prost(message, optional, tag = "8")]
    pub redirect: ::core::option::Option<RouteRedirect>,
    #[prost(message, optional, tag = "9")]
    pub response: ::core::option::Option<RouteDirectResponse>,
    #[prost(string, repeated, tag = "10")]
    pub allowed_users: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "11")]
    pub allowed_domains: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(btree_map = "string, message", tag = "12")]
    pub allowed_idp_claims: ::prost::alloc::collections::BTreeMap<
        ::prost::alloc::string::String,
        ClaimValues,
    >,
    #[prost(string, tag = "13")]
    pub prefix: ::prost::alloc::string::String,
    #[prost(string, tag = "14")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, tag = "15")]
    pub regex: ::prost::alloc::string::String,
    #[prost(int64, optional, tag = "16")]
    pub regex_priority_order: ::core::option::Option<i64>,
    #[prost(string, tag = "17")]
    pub prefix_rewrite: ::prost::alloc::string::String,
    #[prost(string, tag = "18")]
    pub regex_rewrite_pattern: ::prost::alloc::string::String,
    #[prost(string, tag = "19")]
    pub regex_rewrite_substitution: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "20")]
    pub host_rewrite: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "21")]
    pub host_rewrite_header: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "22")]
    pub host_path_regex_rewrite_pattern: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "23")]
    pub host_path_regex_rewrite_substitution:
        ::core::option::Option<::prost::alloc::string::String>,
    #[prost(bool, tag = "24")]
    pub cors_allow_preflight: bool,
    #[prost(bool, tag = "25")]
    pub allow_public_unauthenticated_access: bool,
    #[prost(bool, tag = "26")]
    pub allow_any_authenticated_user: bool,
    #[prost(message, optional, tag = "27")]
    pub timeout: ::core::option::Option<::prost_types::Duration>,
    #[prost(message, optional, tag = "28")]
    pub idle_timeout: ::core::option::Option<::prost_types::Duration>,
    #[prost(bool, tag = "29")]
    pub allow_websockets: bool,
    #[prost(bool, tag = "30")]
    pub allow_spdy: bool,
    #[prost(bool, tag = "31")]
    pub tls_skip_verify: bool,
    #[prost(string, tag = "32")]
    pub tls_server_name: ::prost::alloc::string::String,
    #[prost(string, tag = "33")]
    pub tls_downstream_server_name: ::prost::alloc::string::String,
    #[prost(string, tag = "34")]
    pub tls_upstream_server_name: ::prost::alloc::string::String,
    #[prost(string, tag = "35")]
    pub tls_custom_ca: ::prost::alloc::string::String,
    #[prost(string, tag = "36")]
    pub tls_custom_ca_file: ::prost::alloc::string::String,
    #[prost(string, tag = "37")]
    pub tls_client_cert: ::prost::alloc::string::String,
    #[prost(string, tag = "38")]
    pub tls_client_key: ::prost::alloc::string::String,
    #[prost(string, tag = "39")]
    pub tls_client_cert_file: ::prost::alloc::string::String,
    #[prost(string, tag = "40")]
    pub tls_client_key_file: ::prost::alloc::string::String,
    #[prost(bool, tag = "41")]
    pub tls_upstream_allow_renegotiation: bool,
    #[prost(btree_map = "string, string", tag = "42")]
    pub set_request_headers: ::prost::alloc::collections::BTreeMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(string, repeated, tag = "43")]
    pub remove_request_headers: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "44")]
    pub rewrite_response_headers: ::prost::alloc::vec::Vec<RouteRewriteHeader>,
    #[prost(btree_map = "string, string", tag = "45")]
    pub set_response_headers: ::prost::alloc::collections::BTreeMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(bool, tag = "46")]
    pub preserve_host_header: bool,
    #[prost(bool, optional, tag = "47")]
    pub pass_identity_headers: ::core::option::Option<bool>,
    #[prost(string, tag = "48")]
    pub jwt_issuer_format: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "49")]
    pub idp_client_id: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "50")]
    pub idp_client_secret: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "51")]
    pub idp_access_token_allowed_audiences: ::core::option::Option<StringList>,
    #[prost(bool, tag = "52")]
    pub show_error_details: bool,
    #[prost(message, repeated, tag = "53")]
    pub policies: ::prost::alloc::vec::Vec<SubPolicy>,
    #[prost(string, repeated, tag = "54")]
    pub depends_on: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "55")]
    pub mcp: ::core::option::Option<Mcp>,
}

/// A redirect action carried on a route instead of destinations.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteRedirect {
    #[prost(bool, optional, tag = "1")]
    pub https_redirect: ::core::option::Option<bool>,
    #[prost(string, optional, tag = "2")]
    pub scheme_redirect: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "3")]
    pub host_redirect: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint32, optional, tag = "4")]
    pub port_redirect: ::core::option::Option<u32>,
    #[prost(string, optional, tag = "5")]
    pub path_redirect: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "6")]
    pub prefix_rewrite: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(int32, optional, tag = "7")]
    pub response_code: ::core::option::Option<i32>,
    #[prost(bool, optional, tag = "8")]
    pub strip_query: ::core::option::Option<bool>,
}

/// A fixed response carried on a route instead of destinations.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteDirectResponse {
    #[prost(uint32, tag = "1")]
    pub status: u32,
    #[prost(string, tag = "2")]
    pub body: ::prost::alloc::string::String,
}

/// A response header rewrite directive.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteRewriteHeader {
    #[prost(string, tag = "1")]
    pub header: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub prefix: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub value: ::prost::alloc::string::String,
}

/// A named subordinate rule set within a route.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubPolicy {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub allowed_users: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "4")]
    pub allowed_domains: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(btree_map = "string, message", tag = "5")]
    pub allowed_idp_claims: ::prost::alloc::collections::BTreeMap<
        ::prost::alloc::string::String,
        ClaimValues,
    >,
    /// JSON-encoded match expression compiled by the criteria compiler.
    #[prost(string, optional, tag = "6")]
    pub match_expression: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "7")]
    pub explanation: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub remediation: ::prost::alloc::string::String,
}

/// Values an identity-provider claim may take.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClaimValues {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// A list of strings whose presence is distinct from emptiness.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringList {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Model Context Protocol extension block.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Mcp {
    #[prost(message, optional, tag = "1")]
    pub server: ::core::option::Option<McpServer>,
    #[prost(message, optional, tag = "2")]
    pub client: ::core::option::Option<McpClient>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct McpServer {
    #[prost(uint32, optional, tag = "1")]
    pub max_request_bytes: ::core::option::Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub path: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct McpClient {}
