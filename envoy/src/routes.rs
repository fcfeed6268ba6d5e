//! Main route configuration emission.
//!
//! Policies arrive already validated and sorted; their order here is the
//! data plane's first-match order. One virtual host is produced per source
//! host, in order of first appearance.

use anyhow::{anyhow, Context, Result};
use envoy_types::pb::envoy::config::core::v3 as core;
use envoy_types::pb::envoy::config::route::v3 as route;
use envoy_types::pb::envoy::r#type::matcher::v3 as matcher;
use envoy_types::pb::google::protobuf::BoolValue;
use gatehouse_core::{Policy, PolicyRedirect, RuntimeFlags};
use gatehouse_core::runtime_flags::RUNTIME_FLAG_MATCH_ANY_INCOMING_PORT;
use std::time::Duration;
use tracing::trace;
use url::Url;

use crate::clusters::cluster_name;
use crate::listeners::{inline_bytes, pb_duration};
use crate::{Builder, Config, MAIN_ROUTE_CONFIGURATION_NAME};

impl Builder {
    /// Builds the `main` route configuration from the sorted policy set.
    pub fn build_main_route_configuration(
        &self,
        cfg: &Config,
        policies: &[Policy],
    ) -> Result<route::RouteConfiguration> {
        let mut virtual_hosts: Vec<route::VirtualHost> = Vec::new();
        for policy in policies {
            if policy.is_tcp() || policy.is_udp() || policy.is_ssh() {
                continue;
            }
            let from = Url::parse(&policy.from)
                .with_context(|| format!("invalid source url on route {policy}"))?;
            let host = from
                .host_str()
                .ok_or_else(|| anyhow!("source url has no host on route {policy}"))?;

            let compiled = self
                .build_policy_route(cfg, policy)
                .with_context(|| format!("error building route {policy}"))?;

            match virtual_hosts.iter_mut().find(|vh| vh.name == host) {
                Some(vh) => vh.routes.push(compiled),
                None => virtual_hosts.push(route::VirtualHost {
                    name: host.to_string(),
                    domains: domains_for(&from, &cfg.runtime_flags),
                    routes: vec![compiled],
                    ..Default::default()
                }),
            }
        }

        trace!(virtual_hosts = virtual_hosts.len(), "built main route configuration");
        Ok(route::RouteConfiguration {
            name: MAIN_ROUTE_CONFIGURATION_NAME.to_string(),
            virtual_hosts,
            validate_clusters: Some(BoolValue { value: false }),
            ..Default::default()
        })
    }

    fn build_policy_route(&self, cfg: &Config, policy: &Policy) -> Result<route::Route> {
        let id = policy.route_id()?;

        let path_specifier = if !policy.path.is_empty() {
            route::route_match::PathSpecifier::Path(policy.path.clone())
        } else if !policy.regex.is_empty() {
            let regex = policy
                .compiled_regex()
                .map(|re| re.as_str().to_string())
                .unwrap_or_else(|| policy.regex.clone());
            route::route_match::PathSpecifier::SafeRegex(matcher::RegexMatcher {
                regex,
                ..Default::default()
            })
        } else if !policy.prefix.is_empty() {
            route::route_match::PathSpecifier::Prefix(policy.prefix.clone())
        } else {
            route::route_match::PathSpecifier::Prefix("/".to_string())
        };

        let action = if let Some(redirect) = &policy.redirect {
            route::route::Action::Redirect(build_redirect_action(redirect)?)
        } else if let Some(response) = &policy.response {
            route::route::Action::DirectResponse(route::DirectResponseAction {
                status: response.status,
                body: Some(inline_bytes(response.body.clone().into_bytes())),
                ..Default::default()
            })
        } else {
            route::route::Action::Route(self.build_route_action(cfg, policy, &id))
        };

        Ok(route::Route {
            name: id,
            r#match: Some(route::RouteMatch {
                path_specifier: Some(path_specifier),
                ..Default::default()
            }),
            action: Some(action),
            request_headers_to_add: header_options(&policy.set_request_headers),
            request_headers_to_remove: policy.remove_request_headers.clone(),
            response_headers_to_add: header_options(&policy.set_response_headers),
            ..Default::default()
        })
    }

    fn build_route_action(&self, cfg: &Config, policy: &Policy, id: &str) -> route::RouteAction {
        let mut action = route::RouteAction {
            cluster_specifier: Some(route::route_action::ClusterSpecifier::Cluster(
                cluster_name(id),
            )),
            ..Default::default()
        };

        // Websocket upgrades hold the stream open indefinitely, so the
        // request timeout is disabled for them.
        let timeout = if policy.allow_websockets {
            Duration::ZERO
        } else {
            policy
                .upstream_timeout
                .unwrap_or(cfg.options.default_upstream_timeout)
                .min(cfg.options.default_upstream_timeout)
        };
        action.timeout = Some(pb_duration(timeout));
        if policy.allow_websockets {
            action.idle_timeout = Some(pb_duration(Duration::ZERO));
        } else if let Some(idle) = policy.idle_timeout {
            action.idle_timeout = Some(pb_duration(idle));
        }

        if policy.allow_websockets {
            action
                .upgrade_configs
                .push(route::route_action::UpgradeConfig {
                    upgrade_type: "websocket".to_string(),
                    enabled: Some(BoolValue { value: true }),
                    ..Default::default()
                });
        }
        if policy.allow_spdy {
            action
                .upgrade_configs
                .push(route::route_action::UpgradeConfig {
                    upgrade_type: "spdy/3.1".to_string(),
                    enabled: Some(BoolValue { value: true }),
                    ..Default::default()
                });
        }

        if !policy.prefix_rewrite.is_empty() {
            action.prefix_rewrite = policy.prefix_rewrite.clone();
        } else if !policy.regex_rewrite_pattern.is_empty() {
            action.regex_rewrite = Some(matcher::RegexMatchAndSubstitute {
                pattern: Some(matcher::RegexMatcher {
                    regex: policy.regex_rewrite_pattern.clone(),
                    ..Default::default()
                }),
                substitution: policy.regex_rewrite_substitution.clone(),
            });
        }

        action.host_rewrite_specifier = if policy.preserve_host_header {
            None
        } else if !policy.host_rewrite.is_empty() {
            Some(route::route_action::HostRewriteSpecifier::HostRewriteLiteral(
                policy.host_rewrite.clone(),
            ))
        } else if !policy.host_rewrite_header.is_empty() {
            Some(route::route_action::HostRewriteSpecifier::HostRewriteHeader(
                policy.host_rewrite_header.clone(),
            ))
        } else if !policy.host_path_regex_rewrite_pattern.is_empty() {
            Some(
                route::route_action::HostRewriteSpecifier::HostRewritePathRegex(
                    matcher::RegexMatchAndSubstitute {
                        pattern: Some(matcher::RegexMatcher {
                            regex: policy.host_path_regex_rewrite_pattern.clone(),
                            ..Default::default()
                        }),
                        substitution: policy.host_path_regex_rewrite_substitution.clone(),
                    },
                ),
            )
        } else {
            Some(route::route_action::HostRewriteSpecifier::AutoHostRewrite(
                BoolValue { value: true },
            ))
        };

        action
    }
}

fn build_redirect_action(redirect: &PolicyRedirect) -> Result<route::RedirectAction> {
    let mut action = route::RedirectAction {
        host_redirect: redirect.host_redirect.clone().unwrap_or_default(),
        port_redirect: redirect.port_redirect.unwrap_or_default(),
        strip_query: redirect.strip_query.unwrap_or_default(),
        ..Default::default()
    };

    if let Some(https) = redirect.https_redirect {
        action.scheme_rewrite_specifier = Some(
            route::redirect_action::SchemeRewriteSpecifier::HttpsRedirect(https),
        );
    } else if let Some(scheme) = &redirect.scheme_redirect {
        action.scheme_rewrite_specifier = Some(
            route::redirect_action::SchemeRewriteSpecifier::SchemeRedirect(scheme.clone()),
        );
    }

    if let Some(path) = &redirect.path_redirect {
        action.path_rewrite_specifier = Some(
            route::redirect_action::PathRewriteSpecifier::PathRedirect(path.clone()),
        );
    } else if let Some(prefix) = &redirect.prefix_rewrite {
        action.path_rewrite_specifier = Some(
            route::redirect_action::PathRewriteSpecifier::PrefixRewrite(prefix.clone()),
        );
    }

    action.response_code = match redirect.response_code {
        None => route::redirect_action::RedirectResponseCode::MovedPermanently as i32,
        Some(301) => route::redirect_action::RedirectResponseCode::MovedPermanently as i32,
        Some(302) => route::redirect_action::RedirectResponseCode::Found as i32,
        Some(303) => route::redirect_action::RedirectResponseCode::SeeOther as i32,
        Some(307) => route::redirect_action::RedirectResponseCode::TemporaryRedirect as i32,
        Some(308) => route::redirect_action::RedirectResponseCode::PermanentRedirect as i32,
        Some(code) => return Err(anyhow!("unsupported redirect response code {code}")),
    };

    Ok(action)
}

/// The domains a source URL matches: the bare host plus either any port or
/// the URL's effective port, depending on the incoming-port runtime flag.
fn domains_for(from: &Url, flags: &RuntimeFlags) -> Vec<String> {
    let host = from.host_str().unwrap_or_default();
    if flags.enabled(RUNTIME_FLAG_MATCH_ANY_INCOMING_PORT) {
        vec![host.to_string(), format!("{host}:*")]
    } else {
        match from.port_or_known_default() {
            Some(port) => vec![host.to_string(), format!("{host}:{port}")],
            None => vec![host.to_string()],
        }
    }
}

fn header_options(
    headers: &std::collections::BTreeMap<String, String>,
) -> Vec<core::HeaderValueOption> {
    headers
        .iter()
        .map(|(key, value)| core::HeaderValueOption {
            header: Some(core::HeaderValue {
                key: key.clone(),
                value: value.clone(),
                ..Default::default()
            }),
            append_action: core::header_value_option::HeaderAppendAction::OverwriteIfExistsOrAdd
                as i32,
            ..Default::default()
        })
        .collect()
}
