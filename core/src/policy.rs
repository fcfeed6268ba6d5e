//! Route policies: the unit of access control.
//!
//! A [`Policy`] matches an inbound request to an action (forward, redirect or
//! respond) plus access constraints. Policies are constructed from a source
//! document or from the wire form; construction is total and all cross-field
//! checks happen in [`Policy::validate`], which may normalize fields in
//! place. After validation a policy is treated as immutable; reloads build
//! fresh instances.

mod convert;
#[cfg(test)]
mod tests;

use crate::hashutil::Digest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

/// Identity-provider claims flattened to claim name -> allowed values.
pub type FlattenedClaims = BTreeMap<String, Vec<String>>;

/// The maximum number of additional hosts that may participate in a route's
/// authentication redirect chain.
pub const MAX_DEPENDS_ON: usize = 5;

/// A validation failure scoped to a single policy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid source url {0:?}")]
    InvalidSourceUrl(String),
    #[error("source url {0:?} contains a path; set it with the path field instead")]
    SourceUrlHasPath(String),
    #[error("exactly one of to, redirect or response must be set")]
    MissingDestination,
    #[error("invalid destination url {0:?}")]
    InvalidDestination(String),
    #[error("cannot mix {0} and non-{0} destination urls")]
    MixedTransportSchemes(&'static str),
    #[error("unsupported redirect response code {0} (supported values: 301, 302, 303, 307, 308)")]
    UnsupportedRedirectCode(i32),
    #[error("route is marked public or any-authenticated but also carries allowlists")]
    ConflictingAllowlists,
    #[error("client certificate key and cert must both be non-empty")]
    ClientCertIncomplete,
    #[error("could not decode client certificate: {0}")]
    ClientCertInvalid(String),
    #[error("could not decode custom certificate authority: {0}")]
    CustomCaDecodeFailure(String),
    #[error("could not read custom certificate authority file {path:?}: {reason}")]
    CustomCaReadFailure { path: String, reason: String },
    #[error("invalid route matching regex: {0}")]
    InvalidRegex(String),
    #[error("unsupported jwt_issuer_format value {0:?}")]
    InvalidJwtIssuerFormat(String),
    #[error("depends_on is limited to {MAX_DEPENDS_ON} additional redirect hosts")]
    TooManyDependencies,
    #[error("unsupported depends_on value {0:?}")]
    InvalidDependency(String),
    #[error("mcp must have exactly one of server or client set")]
    McpUnderspecified,
    #[error("sub-policy {0:?} has an unparsable match expression")]
    InvalidMatchExpression(String),
    #[error("only prefix_rewrite or regex_rewrite_pattern may be set, not both")]
    RegexRewriteConflict,
}

/// A compiled route matching regex. Equality is by source pattern.
#[derive(Clone, Debug)]
pub struct CompiledRegex(Regex);

/// Client certificate material loaded during validation. The policy owns
/// these bytes; they are never shared across snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCertificate {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// A destination URL with an optional load-balancing weight (0 = unweighted).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightedUrl {
    pub url: String,
    pub lb_weight: u32,
}

pub type WeightedUrls = Vec<WeightedUrl>;

/// A route redirect action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRedirect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_redirect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_redirect: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_query: Option<bool>,
}

/// A fixed response to an HTTP request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectResponse {
    #[serde(default)]
    pub status: u32,
    #[serde(default)]
    pub body: String,
}

/// A response header rewrite directive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteHeader {
    pub header: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub value: String,
}

/// Controls the format of the issuer claim in identity tokens passed
/// upstream: `host_only` (default) or `uri`. Kept as a string so that an
/// unknown value is reported by validation rather than failing construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtIssuerFormat(pub String);

/// Model Context Protocol extension block. Exactly one of `server` or
/// `client` must be set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mcp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<McpServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<McpClient>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_bytes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct McpClient {}

/// A named subordinate rule set contributing to the union of allowed
/// identities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubPolicy {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_idp_claims: FlattenedClaims,
    /// Declarative match expression compiled by the criteria compiler.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_expr: Option<serde_json::Value>,
    /// A wire match expression that failed to parse, kept verbatim so
    /// validation rejects the policy and serialization round-trips it.
    #[serde(skip)]
    pub invalid_match_expr: Option<String>,
    /// Why the rule set denies a request.
    #[serde(default)]
    pub explanation: String,
    /// What a user can do to gain access.
    #[serde(default)]
    pub remediation: String,
}

/// Route-specific configuration and access settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Stable route identifier. When empty, a content-derived ID is used.
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logo_url: String,

    pub from: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: WeightedUrls,
    /// Used for a redirect action instead of `to`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<PolicyRedirect>,
    /// Used for a fixed response instead of `to`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<DirectResponse>,

    /// Optional load balancing weights applied to the endpoints in `to`.
    #[serde(default, rename = "_to_weights", skip_serializing_if = "Vec::is_empty")]
    pub lb_weights: Vec<u32>,

    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_idp_claims: FlattenedClaims,

    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub path: String,
    /// Implicitly anchored with `^...$` during validation.
    #[serde(default)]
    pub regex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_priority_order: Option<i64>,
    #[serde(skip)]
    pub compiled_regex: Option<CompiledRegex>,

    #[serde(default)]
    pub prefix_rewrite: String,
    #[serde(default)]
    pub regex_rewrite_pattern: String,
    #[serde(default)]
    pub regex_rewrite_substitution: String,

    #[serde(default)]
    pub host_rewrite: String,
    #[serde(default)]
    pub host_rewrite_header: String,
    #[serde(default)]
    pub host_path_regex_rewrite_pattern: String,
    #[serde(default)]
    pub host_path_regex_rewrite_substitution: String,

    /// Allow unauthenticated CORS preflight requests.
    #[serde(default)]
    pub cors_allow_preflight: bool,
    /// Allow any request to access this route, bypassing authentication.
    #[serde(default)]
    pub allow_public_unauthenticated_access: bool,
    /// Allow any authenticated user.
    #[serde(default)]
    pub allow_any_authenticated_user: bool,

    /// Route-specific upstream timeout. Must be at most the global default;
    /// unset falls back to the global default.
    #[serde(
        default,
        rename = "timeout",
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub upstream_timeout: Option<Duration>,
    /// Period over which no data may flow on the connection. Zero disables
    /// the setting entirely.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,

    #[serde(default)]
    pub allow_websockets: bool,
    #[serde(default)]
    pub allow_spdy: bool,

    /// Accept any certificate presented by the upstream. Testing only.
    #[serde(default)]
    pub tls_skip_verify: bool,
    #[serde(default)]
    pub tls_server_name: String,
    #[serde(default)]
    pub tls_downstream_server_name: String,
    #[serde(default)]
    pub tls_upstream_server_name: String,
    /// Root certificate for upstream verification, base64 inline. When only
    /// the file form is given, validation loads it here.
    #[serde(default)]
    pub tls_custom_ca: String,
    #[serde(default)]
    pub tls_custom_ca_file: String,
    #[serde(default)]
    pub tls_client_cert: String,
    #[serde(default)]
    pub tls_client_key: String,
    #[serde(default)]
    pub tls_client_cert_file: String,
    #[serde(default)]
    pub tls_client_key_file: String,
    #[serde(skip)]
    pub client_certificate: Option<ClientCertificate>,
    #[serde(default)]
    pub tls_upstream_allow_renegotiation: bool,

    #[serde(default)]
    pub set_request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub remove_request_headers: Vec<String>,
    #[serde(default)]
    pub rewrite_response_headers: Vec<RewriteHeader>,
    #[serde(default)]
    pub set_response_headers: BTreeMap<String, String>,

    /// Disables upstream host header rewriting.
    #[serde(default)]
    pub preserve_host_header: bool,
    /// Whether to add the user's identity headers to the upstream request;
    /// unset falls back to the global option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_identity_headers: Option<bool>,

    #[serde(default)]
    pub jwt_issuer_format: JwtIssuerFormat,

    #[serde(default)]
    pub idp_client_id: String,
    #[serde(default)]
    pub idp_client_secret: String,
    /// Allowed audiences for IdP access-token validation. Presence is
    /// distinct from emptiness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_access_token_allowed_audiences: Option<Vec<String>>,

    #[serde(default)]
    pub show_error_details: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_policies: Vec<SubPolicy>,

    /// Additional hosts participating in this route's authentication
    /// redirect chain. A flat hint, not an edge in any traversal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Experimental Model Context Protocol extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<Mcp>,
}

// === impl CompiledRegex ===

impl PartialEq for CompiledRegex {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Eq for CompiledRegex {}

impl CompiledRegex {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }
}

// === impl WeightedUrl ===

impl WeightedUrl {
    /// Splits a destination of the form `url[,weight]`.
    pub fn parse_str(s: &str) -> Self {
        if let Some((url, weight)) = s.rsplit_once(',') {
            if let Ok(lb_weight) = weight.parse::<u32>() {
                return Self {
                    url: url.to_string(),
                    lb_weight,
                };
            }
        }
        Self {
            url: s.to_string(),
            lb_weight: 0,
        }
    }

    /// Parses the destination URL. Unparseable destinations are reported by
    /// validation; callers after validation can rely on success.
    pub fn parse(&self) -> Result<Url, PolicyError> {
        let url = Url::parse(&self.url)
            .map_err(|_| PolicyError::InvalidDestination(self.url.clone()))?;
        if url.host_str().is_none() && !url.cannot_be_a_base() {
            return Err(PolicyError::InvalidDestination(self.url.clone()));
        }
        Ok(url)
    }
}

impl std::fmt::Display for WeightedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lb_weight > 0 {
            write!(f, "{},{}", self.url, self.lb_weight)
        } else {
            self.url.fmt(f)
        }
    }
}

impl Serialize for WeightedUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WeightedUrl {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse_str(&s))
    }
}

// === impl PolicyRedirect ===

impl PolicyRedirect {
    fn validate(&self) -> Result<(), PolicyError> {
        use http::StatusCode;
        const SUPPORTED: [StatusCode; 5] = [
            StatusCode::MOVED_PERMANENTLY,
            StatusCode::FOUND,
            StatusCode::SEE_OTHER,
            StatusCode::TEMPORARY_REDIRECT,
            StatusCode::PERMANENT_REDIRECT,
        ];
        let Some(code) = self.response_code else {
            return Ok(());
        };
        let supported = u16::try_from(code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .map_or(false, |code| SUPPORTED.contains(&code));
        if supported {
            Ok(())
        } else {
            Err(PolicyError::UnsupportedRedirectCode(code))
        }
    }
}

// === impl JwtIssuerFormat ===

impl JwtIssuerFormat {
    pub fn is_valid(&self) -> bool {
        matches!(self.0.as_str(), "" | "host_only" | "uri")
    }

    pub fn is_uri(&self) -> bool {
        self.0 == "uri"
    }
}

// === impl Mcp ===

impl Mcp {
    pub fn is_server(&self) -> bool {
        self.server.is_some()
    }

    pub fn is_client(&self) -> bool {
        self.client.is_some()
    }
}

// === impl McpServer ===

impl McpServer {
    /// Maximum request body size accepted for the MCP server, in bytes.
    pub fn max_request_bytes(&self) -> u32 {
        self.max_request_bytes.unwrap_or(4 * 1024)
    }

    /// Path appended when advertising the server URL.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

// === impl Policy ===

impl Policy {
    /// Checks the validity of the policy, normalizing fields in place:
    /// weights are installed on destinations, the inline CA is populated from
    /// its file form, dependency URLs are reduced to their hosts, the
    /// matching regex is anchored and compiled, and client certificates are
    /// loaded. Normalization is idempotent; a second call reports the same
    /// result and performs no further mutation.
    pub fn validate(&mut self) -> Result<(), PolicyError> {
        let source = Url::parse(&self.from)
            .map_err(|_| PolicyError::InvalidSourceUrl(self.from.clone()))?;
        if source.host_str().is_none() {
            return Err(PolicyError::InvalidSourceUrl(self.from.clone()));
        }

        // Path matching lives in the prefix/path/regex fields, never on the
        // source URL itself.
        if !matches!(source.path(), "" | "/") {
            return Err(PolicyError::SourceUrlHasPath(self.from.clone()));
        }
        if source.scheme() == "http" {
            info!(from = %self.from, "policy source url uses HTTP but only HTTPS is supported");
        }

        let set = usize::from(!self.to.is_empty())
            + usize::from(self.redirect.is_some())
            + usize::from(self.response.is_some());
        if set != 1 {
            return Err(PolicyError::MissingDestination);
        }

        if self.lb_weights.len() == self.to.len() {
            for (to, weight) in self.to.iter_mut().zip(&self.lb_weights) {
                to.lb_weight = *weight;
            }
            self.lb_weights = Vec::new();
        }

        let mut schemes = Vec::new();
        for to in &self.to {
            let url = to.parse()?;
            if !schemes.contains(&url.scheme().to_string()) {
                schemes.push(url.scheme().to_string());
            }
        }
        for transport in ["tcp", "udp"] {
            if schemes.iter().any(|s| s == transport) && schemes.len() > 1 {
                return Err(PolicyError::MixedTransportSchemes(transport));
            }
        }

        if let Some(redirect) = &self.redirect {
            redirect.validate()?;
        }

        // Public access and any-authenticated access are both incompatible
        // with explicit allowlists.
        let has_allowlist = !self.allowed_users.is_empty() || !self.allowed_domains.is_empty();
        if self.allow_public_unauthenticated_access
            && (self.allow_any_authenticated_user || has_allowlist)
        {
            return Err(PolicyError::ConflictingAllowlists);
        }
        if self.allow_any_authenticated_user && has_allowlist {
            return Err(PolicyError::ConflictingAllowlists);
        }

        self.load_client_certificate()?;
        self.load_custom_ca()?;

        if !self.prefix_rewrite.is_empty() && !self.regex_rewrite_pattern.is_empty() {
            return Err(PolicyError::RegexRewriteConflict);
        }

        if !self.regex.is_empty() {
            let anchored = anchor_regex(&self.regex);
            let compiled = Regex::new(&anchored)
                .map_err(|error| PolicyError::InvalidRegex(error.to_string()))?;
            self.compiled_regex = Some(CompiledRegex(compiled));
        }

        if !self.jwt_issuer_format.is_valid() {
            return Err(PolicyError::InvalidJwtIssuerFormat(
                self.jwt_issuer_format.0.clone(),
            ));
        }

        if self.depends_on.len() > MAX_DEPENDS_ON {
            return Err(PolicyError::TooManyDependencies);
        }
        for dep in &mut self.depends_on {
            if dep.contains('/') {
                match Url::parse(dep) {
                    Ok(url) if url.host_str().is_some() => {
                        *dep = url.host_str().unwrap_or_default().to_string();
                    }
                    _ => return Err(PolicyError::InvalidDependency(dep.clone())),
                }
            }
        }

        if let Some(mcp) = &self.mcp {
            if mcp.server.is_some() == mcp.client.is_some() {
                return Err(PolicyError::McpUnderspecified);
            }
        }

        for sp in &self.sub_policies {
            if sp.invalid_match_expr.is_some() {
                let name = if sp.name.is_empty() { &sp.id } else { &sp.name };
                return Err(PolicyError::InvalidMatchExpression(name.clone()));
            }
        }

        Ok(())
    }

    fn load_client_certificate(&mut self) -> Result<(), PolicyError> {
        let inline_mismatch = self.tls_client_cert.is_empty() != self.tls_client_key.is_empty();
        let file_mismatch =
            self.tls_client_cert_file.is_empty() != self.tls_client_key_file.is_empty();
        if inline_mismatch || file_mismatch {
            return Err(PolicyError::ClientCertIncomplete);
        }

        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        if !self.tls_client_cert.is_empty() {
            let certificate = STANDARD
                .decode(&self.tls_client_cert)
                .map_err(|error| PolicyError::ClientCertInvalid(error.to_string()))?;
            let private_key = STANDARD
                .decode(&self.tls_client_key)
                .map_err(|error| PolicyError::ClientCertInvalid(error.to_string()))?;
            self.client_certificate = Some(ClientCertificate {
                certificate,
                private_key,
            });
        } else if !self.tls_client_cert_file.is_empty() {
            let certificate = std::fs::read(&self.tls_client_cert_file)
                .map_err(|error| PolicyError::ClientCertInvalid(error.to_string()))?;
            let private_key = std::fs::read(&self.tls_client_key_file)
                .map_err(|error| PolicyError::ClientCertInvalid(error.to_string()))?;
            self.client_certificate = Some(ClientCertificate {
                certificate,
                private_key,
            });
        }
        Ok(())
    }

    fn load_custom_ca(&mut self) -> Result<(), PolicyError> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        if !self.tls_custom_ca.is_empty() {
            STANDARD
                .decode(&self.tls_custom_ca)
                .map_err(|error| PolicyError::CustomCaDecodeFailure(error.to_string()))?;
        } else if !self.tls_custom_ca_file.is_empty() {
            let ca = std::fs::read(&self.tls_custom_ca_file).map_err(|error| {
                PolicyError::CustomCaReadFailure {
                    path: self.tls_custom_ca_file.clone(),
                    reason: error.to_string(),
                }
            })?;
            self.tls_custom_ca = STANDARD.encode(ca);
        }
        Ok(())
    }

    /// A unique identifier for the route. A user-supplied ID is used
    /// verbatim; otherwise the ID is derived from the fields that define the
    /// route's match and action: from, prefix, path, regex and whichever of
    /// to/redirect/response is set.
    pub fn route_id(&self) -> Result<String, PolicyError> {
        if !self.id.is_empty() {
            return Ok(self.id.clone());
        }
        self.generate_route_id()
    }

    fn generate_route_id(&self) -> Result<String, PolicyError> {
        let mut hash = Digest::new();
        hash.write_str_with_len(&self.from);
        hash.write_str_with_len(&self.prefix);
        hash.write_str_with_len(&self.path);
        hash.write_str_with_len(&self.regex);
        if !self.to.is_empty() {
            hash.write(&[1]);
            hash.write_i32(self.to.len() as i32);
            for to in &self.to {
                let url = to.parse()?;
                hash.write_str_with_len(url.scheme());
                hash.write_str_with_len(if url.cannot_be_a_base() { url.path() } else { "" });
                if url.username().is_empty() && url.password().is_none() {
                    hash.write(&[0]);
                } else {
                    hash.write(&[1]);
                    hash.write_str_with_len(url.username());
                    hash.write_str_with_len(url.password().unwrap_or(""));
                }
                hash.write_str_with_len(&host_with_port(&url));
                hash.write_str_with_len(if url.cannot_be_a_base() { "" } else { url.path() });
                // The parser normalizes away the raw path and raw fragment;
                // their slots stay in the encoding for stability.
                hash.write_str_with_len("");
                hash.write_bool(url.host_str().is_none());
                hash.write_bool(url.query() == Some(""));
                hash.write_str_with_len(url.fragment().unwrap_or(""));
                hash.write_str_with_len("");
                hash.write_u32(to.lb_weight);
            }
        } else if let Some(redirect) = &self.redirect {
            hash.write(&[2]);
            hash.write_opt_bool(redirect.https_redirect);
            hash.write_opt_str_with_len(redirect.scheme_redirect.as_deref());
            hash.write_opt_str_with_len(redirect.host_redirect.as_deref());
            hash.write_opt_u32(redirect.port_redirect);
            hash.write_opt_str_with_len(redirect.path_redirect.as_deref());
            hash.write_opt_str_with_len(redirect.prefix_rewrite.as_deref());
            hash.write_opt_i32(redirect.response_code);
            hash.write_opt_bool(redirect.strip_query);
        } else if let Some(response) = &self.response {
            hash.write(&[3]);
            hash.write_i32(response.status as i32);
            hash.write_str_with_len(&response.body);
        } else {
            return Err(PolicyError::MissingDestination);
        }
        Ok(hash.finish())
    }

    /// Returns true if the policy would match the given request URL.
    pub fn matches(&self, request_url: &Url, strip_port: bool) -> bool {
        // An invalid from URL matches nothing.
        let from_url = match Url::parse(&self.from) {
            Ok(url) => url,
            Err(_) => return false,
        };

        if from_url.host_str() != request_url.host_str() {
            return false;
        }
        if !strip_port && from_url.port_or_known_default() != request_url.port_or_known_default() {
            return false;
        }

        if !self.prefix.is_empty() && !request_url.path().starts_with(&self.prefix) {
            return false;
        }
        if !self.path.is_empty() && request_url.path() != self.path {
            return false;
        }
        if let Some(regex) = &self.compiled_regex {
            if !regex.is_match(request_url.path()) {
                return false;
            }
        }

        true
    }

    pub fn compiled_regex(&self) -> Option<&CompiledRegex> {
        self.compiled_regex.as_ref()
    }

    pub fn is_tcp(&self) -> bool {
        self.from.starts_with("tcp")
    }

    pub fn is_udp(&self) -> bool {
        self.from.starts_with("udp")
    }

    pub fn is_ssh(&self) -> bool {
        self.from.starts_with("ssh://")
    }

    pub fn is_tcp_upstream(&self) -> bool {
        self.to.first().map_or(false, |to| {
            to.parse().map_or(false, |u| u.scheme() == "tcp")
        })
    }

    pub fn is_udp_upstream(&self) -> bool {
        self.to.first().map_or(false, |to| {
            to.parse().map_or(false, |u| u.scheme() == "udp")
        })
    }

    pub fn is_mcp_server(&self) -> bool {
        self.mcp.as_ref().map_or(false, Mcp::is_server)
    }

    pub fn is_mcp_client(&self) -> bool {
        self.mcp.as_ref().map_or(false, Mcp::is_client)
    }

    /// All allowed users, including sub-policy contributions.
    pub fn all_allowed_users(&self) -> Vec<String> {
        let mut users = self.allowed_users.clone();
        for sp in &self.sub_policies {
            users.extend(sp.allowed_users.iter().cloned());
        }
        users
    }

    /// All allowed email domains, including sub-policy contributions.
    pub fn all_allowed_domains(&self) -> Vec<String> {
        let mut domains = self.allowed_domains.clone();
        for sp in &self.sub_policies {
            domains.extend(sp.allowed_domains.iter().cloned());
        }
        domains
    }

    /// All allowed IdP claim sets, including sub-policy contributions.
    pub fn all_allowed_idp_claims(&self) -> Vec<FlattenedClaims> {
        let mut claims = Vec::new();
        if !self.allowed_idp_claims.is_empty() {
            claims.push(self.allowed_idp_claims.clone());
        }
        for sp in &self.sub_policies {
            if !sp.allowed_idp_claims.is_empty() {
                claims.push(sp.allowed_idp_claims.clone());
            }
        }
        claims
    }

    /// The effective pass-identity-headers setting given the global default.
    pub fn pass_identity_headers_or(&self, global: Option<bool>) -> bool {
        self.pass_identity_headers.or(global).unwrap_or(false)
    }

    /// Orders policies so that for a shared source the most specific route
    /// sorts first: longer exact path, then higher regex priority, then more
    /// selective regex and prefix, with the ID as the deterministic
    /// tie-breaker.
    pub fn compare(&self, other: &Self) -> Ordering {
        fn str_desc(a: &str, b: &str) -> Ordering {
            b.cmp(a)
        }

        fn opt_i64_desc(a: Option<i64>, b: Option<i64>) -> Ordering {
            match (a, b) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => b.cmp(&a),
            }
        }

        self.from
            .cmp(&other.from)
            .then_with(|| str_desc(&self.path, &other.path))
            .then_with(|| opt_i64_desc(self.regex_priority_order, other.regex_priority_order))
            .then_with(|| str_desc(&self.regex, &other.regex))
            .then_with(|| str_desc(&self.prefix, &other.prefix))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.to.is_empty() {
            write!(f, "{} -> ?", self.from)
        } else {
            let to = self
                .to
                .iter()
                .map(|to| to.url.clone())
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "{} -> {}", self.from, to)
        }
    }
}

/// Sorts policies with the stable first-match order; see [`Policy::compare`].
pub fn sort_policies(policies: &mut [Policy]) {
    policies.sort_by(Policy::compare);
}

fn anchor_regex(re: &str) -> String {
    let mut anchored = String::with_capacity(re.len() + 2);
    if !re.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(re);
    if !re.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

fn host_with_port(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}
