//! Process-wide feature toggles with declared defaults.
//!
//! Flags are declared once, in [`DECLARED`], with their compile-time
//! defaults. The effective flag map is built at configuration load by
//! overlaying configured overrides on the defaults; it is immutable
//! afterwards, so reads never take a lock.

use std::collections::BTreeMap;

/// A runtime flag that can flip certain features on or off.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeFlag(&'static str);

/// Enables adding extra labels to metrics.
pub const RUNTIME_FLAG_ADD_EXTRA_METRICS_LABELS: RuntimeFlag =
    RuntimeFlag("add_extra_metrics_labels");

/// Enables the hot-reloading mechanism for the config file and any other
/// files referenced within it.
pub const RUNTIME_FLAG_CONFIG_HOT_RELOAD: RuntimeFlag = RuntimeFlag("config_hot_reload");

/// Enables ignoring the incoming port when matching routes.
pub const RUNTIME_FLAG_MATCH_ANY_INCOMING_PORT: RuntimeFlag =
    RuntimeFlag("match_any_incoming_port");

/// Enables Model Context Protocol upstreams.
pub const RUNTIME_FLAG_MCP: RuntimeFlag = RuntimeFlag("mcp");

/// Serves the main ingress listener over QUIC on UDP/443 instead of TCP.
pub const RUNTIME_FLAG_QUIC_INGRESS: RuntimeFlag = RuntimeFlag("quic_ingress");

/// Takes the ID token expiration time into account when refreshing sessions.
pub const RUNTIME_FLAG_REFRESH_SESSION_AT_ID_TOKEN_EXPIRATION: RuntimeFlag =
    RuntimeFlag("refresh_session_at_id_token_expiration");

/// Every flag known to this build, with its default.
const DECLARED: &[(RuntimeFlag, bool)] = &[
    (RUNTIME_FLAG_ADD_EXTRA_METRICS_LABELS, true),
    (RUNTIME_FLAG_CONFIG_HOT_RELOAD, true),
    (RUNTIME_FLAG_MATCH_ANY_INCOMING_PORT, true),
    (RUNTIME_FLAG_MCP, false),
    (RUNTIME_FLAG_QUIC_INGRESS, false),
    (RUNTIME_FLAG_REFRESH_SESSION_AT_ID_TOKEN_EXPIRATION, true),
];

/// The effective runtime flag map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeFlags(BTreeMap<RuntimeFlag, bool>);

// === impl RuntimeFlag ===

impl RuntimeFlag {
    pub fn key(&self) -> &'static str {
        self.0
    }

    /// Looks up a declared flag by its string key.
    pub fn from_key(key: &str) -> Option<Self> {
        DECLARED.iter().map(|(f, _)| *f).find(|f| f.0 == key)
    }
}

impl std::fmt::Display for RuntimeFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// === impl RuntimeFlags ===

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::defaults()
    }
}

impl RuntimeFlags {
    /// Returns a copy of all declared flag/default pairs.
    ///
    /// Panics if a flag key is declared twice; declarations are fixed at
    /// compile time so this is a build defect, not a runtime condition.
    pub fn defaults() -> Self {
        let mut map = BTreeMap::new();
        for (flag, default) in DECLARED {
            if map.insert(*flag, *default).is_some() {
                panic!("runtime flag {} declared twice", flag);
            }
        }
        Self(map)
    }

    /// Overlays configured overrides on the defaults. Unknown keys are
    /// ignored and reported to the caller.
    pub fn with_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> (Self, Vec<String>) {
        let mut flags = Self::defaults();
        let mut unknown = Vec::new();
        for (key, value) in overrides {
            match RuntimeFlag::from_key(key) {
                Some(flag) => {
                    flags.0.insert(flag, value);
                }
                None => unknown.push(key.to_string()),
            }
        }
        (flags, unknown)
    }

    pub fn enabled(&self, flag: RuntimeFlag) -> bool {
        self.0.get(&flag).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuntimeFlag, bool)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unique_and_stable() {
        let defaults = RuntimeFlags::defaults();
        assert_eq!(defaults.iter().count(), DECLARED.len());
        assert!(defaults.enabled(RUNTIME_FLAG_CONFIG_HOT_RELOAD));
        assert!(!defaults.enabled(RUNTIME_FLAG_QUIC_INGRESS));
    }

    #[test]
    fn overrides_overlay_defaults() {
        let (flags, unknown) =
            RuntimeFlags::with_overrides([("quic_ingress", true), ("no_such_flag", true)]);
        assert!(flags.enabled(RUNTIME_FLAG_QUIC_INGRESS));
        assert!(flags.enabled(RUNTIME_FLAG_CONFIG_HOT_RELOAD));
        assert_eq!(unknown, vec!["no_such_flag".to_string()]);
    }
}
