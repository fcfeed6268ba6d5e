//! Control inputs observed by the compilation pipeline.

use crate::runtime_flags::RuntimeFlags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// The service role(s) this process runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Services {
    #[default]
    All,
    Authenticate,
    Authorize,
    Databroker,
    Proxy,
}

/// Downstream HTTP codec selection for the main ingress listener.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecType {
    #[default]
    Auto,
    Http1,
    Http2,
    Http3,
}

/// What to do with a downstream connection that fails mutual-TLS
/// enforcement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MtlsEnforcement {
    /// Pass the connection through; the authorization policy decides.
    #[default]
    Policy,
    /// As `Policy`, but deny by default when no policy applies.
    PolicyWithDefaultDeny,
    /// Reject the connection before the HTTP filter chain runs.
    RejectConnection,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamMtlsSettings {
    #[serde(default)]
    pub enforcement: MtlsEnforcement,
}

/// Top-level options consumed by the compilation pipeline. Bootstrap parses
/// these; the core only reads them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub services: Services,

    /// Listen host for the main ingress listener. Ports are fixed by the
    /// listener family (TCP/80, TCP/443, UDP/443).
    #[serde(default = "Options::default_address")]
    pub address: String,

    #[serde(default)]
    pub insecure_server: bool,
    #[serde(default)]
    pub use_proxy_protocol: bool,
    #[serde(default)]
    pub codec_type: CodecType,
    #[serde(default)]
    pub downstream_mtls: DownstreamMtlsSettings,

    #[serde(default = "Options::default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Zero disables the stream-duration cap.
    #[serde(default, with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(default = "Options::default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Zero selects the built-in 30 s default.
    #[serde(default, with = "humantime_serde")]
    pub grpc_client_timeout: Duration,
    #[serde(
        default = "Options::default_upstream_timeout",
        with = "humantime_serde"
    )]
    pub default_upstream_timeout: Duration,

    #[serde(default)]
    pub skip_xff_append: bool,
    #[serde(default)]
    pub xff_num_trusted_hops: u32,

    /// Global default for per-route `pass_identity_headers`.
    #[serde(default)]
    pub pass_identity_headers: Option<bool>,

    /// Flag overrides overlaid on the declared defaults.
    #[serde(default)]
    pub runtime_flags: BTreeMap<String, bool>,
}

// === impl Services ===

impl Services {
    pub fn is_authenticate(&self) -> bool {
        matches!(self, Self::All | Self::Authenticate)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::All | Self::Proxy)
    }
}

impl std::str::FromStr for Services {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "authenticate" => Ok(Self::Authenticate),
            "authorize" => Ok(Self::Authorize),
            "databroker" => Ok(Self::Databroker),
            "proxy" => Ok(Self::Proxy),
            s => Err(anyhow::anyhow!("invalid service: {:?}", s)),
        }
    }
}

impl std::fmt::Display for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => "all".fmt(f),
            Self::Authenticate => "authenticate".fmt(f),
            Self::Authorize => "authorize".fmt(f),
            Self::Databroker => "databroker".fmt(f),
            Self::Proxy => "proxy".fmt(f),
        }
    }
}

// === impl Options ===

impl Default for Options {
    fn default() -> Self {
        Self {
            services: Services::default(),
            address: Self::default_address(),
            insecure_server: false,
            use_proxy_protocol: false,
            codec_type: CodecType::default(),
            downstream_mtls: DownstreamMtlsSettings::default(),
            read_timeout: Self::default_read_timeout(),
            write_timeout: Duration::ZERO,
            idle_timeout: Self::default_idle_timeout(),
            grpc_client_timeout: Duration::ZERO,
            default_upstream_timeout: Self::default_upstream_timeout(),
            skip_xff_append: false,
            xff_num_trusted_hops: 0,
            pass_identity_headers: None,
            runtime_flags: BTreeMap::new(),
        }
    }
}

impl Options {
    fn default_address() -> String {
        "0.0.0.0".to_string()
    }

    fn default_read_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_idle_timeout() -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn default_upstream_timeout() -> Duration {
        Duration::from_secs(30)
    }

    /// The effective runtime flags: declared defaults overlaid by configured
    /// overrides. Unknown override keys are returned alongside so the caller
    /// can report them.
    pub fn effective_runtime_flags(&self) -> (RuntimeFlags, Vec<String>) {
        RuntimeFlags::with_overrides(self.runtime_flags.iter().map(|(k, v)| (k.as_str(), *v)))
    }
}
