//! Core types for the gatehouse control plane.
//!
//! This crate holds the canonical route-policy model and everything needed to
//! give policies a stable identity: construction from documents or the wire
//! form, validation, content-derived route IDs and the deterministic
//! first-match ordering. It also carries the process-wide runtime flag
//! registry and the option surface the rest of the pipeline observes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod hashutil;
pub mod options;
pub mod policy;
pub mod proto;
pub mod runtime_flags;

pub use self::options::{
    CodecType, DownstreamMtlsSettings, MtlsEnforcement, Options, Services,
};
pub use self::policy::{
    sort_policies, ClientCertificate, DirectResponse, FlattenedClaims, JwtIssuerFormat, Mcp,
    McpClient, McpServer, Policy, PolicyError, PolicyRedirect, RewriteHeader, SubPolicy,
    WeightedUrl, WeightedUrls, MAX_DEPENDS_ON,
};
pub use self::runtime_flags::{RuntimeFlag, RuntimeFlags};
