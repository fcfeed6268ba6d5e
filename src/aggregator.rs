//! The reload pipeline.
//!
//! Reloads are serialized through a single writer: the aggregator owns all
//! compilation state and is driven by one caller at a time, so none of the
//! per-reload logic needs to worry about concurrent access. Each successful
//! reload publishes one immutable snapshot over a watch channel shared by
//! reference with readers. A snapshot is never published partially; if
//! assembly fails or the reload is cancelled, the previous snapshot remains
//! active.

use anyhow::Result;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use gatehouse_core::runtime_flags::RUNTIME_FLAG_QUIC_INGRESS;
use gatehouse_core::{Options, Policy, RuntimeFlags};
use gatehouse_criteria::RouteDecision;
use gatehouse_envoy::{should_start_main_listener, Builder, Certificate, Config};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::source::SourceDocument;

/// A per-policy validation failure. The policy was dropped from the
/// snapshot; the rest of the reload proceeded.
#[derive(Debug)]
pub struct PolicyReport {
    /// Position of the policy in the source document.
    pub index: usize,
    /// The route ID, when it could be computed.
    pub route_id: Option<String>,
    pub error: anyhow::Error,
}

/// One immutable output of a reload.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub listeners: Vec<Listener>,
    pub route_configuration: RouteConfiguration,
    pub clusters: Vec<Cluster>,
    /// The validated policy set in first-match order.
    pub routes: Vec<Policy>,
    /// Decision-engine input, indexed by route ID.
    pub decisions: Vec<RouteDecision>,
    pub reports: Vec<PolicyReport>,
}

/// Consumes source documents and publishes snapshots.
#[derive(Debug)]
pub struct Aggregator {
    builder: Builder,
    options: Options,
    certificates: Vec<Certificate>,
    runtime_flags: RuntimeFlags,
    generation: u64,
    reload_failures: u64,
    tx: watch::Sender<Arc<Snapshot>>,
}

// === impl Aggregator ===

impl Aggregator {
    /// Creates an aggregator and the snapshot watch its readers share. The
    /// initial snapshot is empty at generation zero.
    pub fn new(
        options: Options,
        certificates: Vec<Certificate>,
    ) -> (Self, watch::Receiver<Arc<Snapshot>>) {
        let (runtime_flags, unknown) = options.effective_runtime_flags();
        for key in unknown {
            warn!(%key, "ignoring unknown runtime flag override");
        }
        let (tx, rx) = watch::channel(Arc::new(Snapshot::default()));
        (
            Self {
                builder: Builder::new(),
                options,
                certificates,
                runtime_flags,
                generation: 0,
                reload_failures: 0,
                tx,
            },
            rx,
        )
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// How many reloads have failed snapshot assembly.
    pub fn reload_failures(&self) -> u64 {
        self.reload_failures
    }

    /// Runs one reload: validate, identify, sort, compile and publish. On a
    /// cancelled reload the in-flight snapshot is discarded and no
    /// publication occurs.
    pub fn reload(&mut self, doc: SourceDocument, cancel: &CancellationToken) -> Result<()> {
        let generation = self.generation + 1;
        if cancel.is_cancelled() {
            info!(generation, "reload cancelled; discarding in-flight snapshot");
            return Ok(());
        }
        match self.assemble(doc, cancel, generation) {
            Ok(Some(snapshot)) => {
                self.generation = generation;
                info!(
                    generation,
                    routes = snapshot.routes.len(),
                    dropped = snapshot.reports.len(),
                    "published configuration snapshot"
                );
                self.tx.send_replace(Arc::new(snapshot));
                Ok(())
            }
            Ok(None) => {
                info!(generation, "reload cancelled; discarding in-flight snapshot");
                Ok(())
            }
            Err(error) => {
                self.reload_failures += 1;
                error!(
                    generation,
                    %error,
                    "snapshot assembly failed; previous snapshot remains active"
                );
                Err(error)
            }
        }
    }

    fn assemble(
        &self,
        doc: SourceDocument,
        cancel: &CancellationToken,
        generation: u64,
    ) -> Result<Option<Snapshot>> {
        let mut reports = Vec::new();
        let mut policies: Vec<(usize, Policy)> = Vec::new();

        for (index, mut policy) in doc.routes.into_iter().enumerate() {
            // Validation may block on certificate and CA files.
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Err(error) = policy.validate() {
                warn!(index, from = %policy.from, %error, "dropping invalid route");
                reports.push(PolicyReport {
                    index,
                    route_id: policy.route_id().ok(),
                    error: error.into(),
                });
                continue;
            }
            match policy.route_id() {
                Ok(id) => {
                    policy.id = id;
                    policies.push((index, policy));
                }
                Err(error) => {
                    warn!(index, from = %policy.from, %error, "dropping route without identity");
                    reports.push(PolicyReport {
                        index,
                        route_id: None,
                        error: error.into(),
                    });
                }
            }
        }

        policies.sort_by(|(_, a), (_, b)| a.compare(b));

        let mut routes = Vec::with_capacity(policies.len());
        let mut decisions = Vec::with_capacity(policies.len());
        for (index, policy) in policies {
            match gatehouse_criteria::compile_route(&policy.id, &policy) {
                Ok(decision) => {
                    decisions.push(decision);
                    routes.push(policy);
                }
                Err(error) => {
                    warn!(
                        index,
                        route_id = %policy.id,
                        %error,
                        "dropping route with invalid match expression"
                    );
                    reports.push(PolicyReport {
                        index,
                        route_id: Some(policy.id.clone()),
                        error: error.into(),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }

        let cfg = Config {
            options: self.options.clone(),
            certificates: self.certificates.clone(),
            runtime_flags: self.runtime_flags.clone(),
        };
        let use_quic = self.runtime_flags.enabled(RUNTIME_FLAG_QUIC_INGRESS);
        let listeners = if should_start_main_listener(&cfg.options) {
            vec![self
                .builder
                .build_main_listener(&cfg, &routes, false, use_quic)?]
        } else {
            Vec::new()
        };
        let route_configuration = self.builder.build_main_route_configuration(&cfg, &routes)?;
        let clusters = self.builder.build_clusters(&cfg, &routes)?;

        Ok(Some(Snapshot {
            generation,
            listeners,
            route_configuration,
            clusters,
            routes,
            decisions,
            reports,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{PolicyError, Services};

    fn mk_options(services: Services) -> Options {
        Options {
            services,
            ..Default::default()
        }
    }

    fn doc(raw: &str) -> SourceDocument {
        SourceDocument::from_yaml(raw).expect("decodes")
    }

    const GOOD_AND_BAD: &str = r#"
routes:
  - from: https://app.example.com
    to:
      - https://backend:8080
  - from: https://bad.example.com/path
    to:
      - https://backend:8080
"#;

    #[test]
    fn one_bad_route_never_fails_the_reload() {
        let (mut aggregator, rx) = Aggregator::new(mk_options(Services::Proxy), vec![]);
        aggregator
            .reload(doc(GOOD_AND_BAD), &CancellationToken::new())
            .expect("reload succeeds");

        let snapshot = rx.borrow();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.routes.len(), 1);
        assert_eq!(snapshot.routes[0].from, "https://app.example.com");
        assert_eq!(snapshot.reports.len(), 1);
        assert_eq!(snapshot.reports[0].index, 1);
        assert_eq!(
            snapshot.reports[0].error.downcast_ref::<PolicyError>(),
            Some(&PolicyError::SourceUrlHasPath(
                "https://bad.example.com/path".to_string()
            ))
        );
        assert_eq!(aggregator.reload_failures(), 0);
    }

    #[test]
    fn snapshot_carries_routes_clusters_and_decisions() {
        let (mut aggregator, rx) = Aggregator::new(mk_options(Services::Proxy), vec![]);
        aggregator
            .reload(
                doc(r#"
routes:
  - from: https://app.example.com
    to:
      - https://backend:8080
    allowed_users:
      - alice@example.com
    sub_policies:
      - name: engineers
        match:
          groups:
            has: eng
"#),
                &CancellationToken::new(),
            )
            .expect("reload succeeds");

        let snapshot = rx.borrow();
        assert_eq!(snapshot.listeners.len(), 1);
        assert_eq!(snapshot.listeners[0].name, "https-ingress");
        assert_eq!(snapshot.clusters.len(), 1);
        assert_eq!(snapshot.route_configuration.virtual_hosts.len(), 1);
        assert_eq!(snapshot.decisions.len(), 1);
        let decision = &snapshot.decisions[0];
        assert_eq!(decision.route_id, snapshot.routes[0].id);
        assert_eq!(decision.identity.users, vec!["alice@example.com".to_string()]);
        assert_eq!(decision.policies.len(), 1);
    }

    #[test]
    fn routes_are_published_in_first_match_order() {
        let (mut aggregator, rx) = Aggregator::new(mk_options(Services::Proxy), vec![]);
        aggregator
            .reload(
                doc(r#"
routes:
  - from: https://app.example.com
    to:
      - https://backend:8080
  - from: https://app.example.com
    path: /exact
    to:
      - https://backend:8081
"#),
                &CancellationToken::new(),
            )
            .expect("reload succeeds");

        let snapshot = rx.borrow();
        assert_eq!(snapshot.routes[0].path, "/exact");
        assert_eq!(snapshot.routes[1].path, "");
    }

    #[test]
    fn non_serving_roles_emit_no_main_listener() {
        for services in [Services::Databroker, Services::Authorize] {
            let (mut aggregator, rx) = Aggregator::new(mk_options(services), vec![]);
            aggregator
                .reload(doc(GOOD_AND_BAD), &CancellationToken::new())
                .expect("reload succeeds");
            assert!(rx.borrow().listeners.is_empty(), "{services}");
        }
        for services in [Services::Proxy, Services::Authenticate, Services::All] {
            let (mut aggregator, rx) = Aggregator::new(mk_options(services), vec![]);
            aggregator
                .reload(doc(GOOD_AND_BAD), &CancellationToken::new())
                .expect("reload succeeds");
            assert_eq!(rx.borrow().listeners.len(), 1, "{services}");
        }
    }

    #[test]
    fn cancellation_discards_the_in_flight_snapshot() {
        let (mut aggregator, rx) = Aggregator::new(mk_options(Services::Proxy), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        aggregator
            .reload(doc(GOOD_AND_BAD), &cancel)
            .expect("cancellation is not a failure");

        assert_eq!(rx.borrow().generation, 0);
        assert!(rx.borrow().routes.is_empty());
        assert_eq!(aggregator.reload_failures(), 0);

        // The next reload proceeds normally.
        aggregator
            .reload(doc(GOOD_AND_BAD), &CancellationToken::new())
            .expect("reload succeeds");
        assert_eq!(rx.borrow().generation, 1);
    }

    #[test]
    fn invalid_sub_policy_expression_drops_only_that_route() {
        let (mut aggregator, rx) = Aggregator::new(mk_options(Services::Proxy), vec![]);
        aggregator
            .reload(
                doc(r#"
routes:
  - from: https://app.example.com
    to:
      - https://backend:8080
    sub_policies:
      - name: broken
        match:
          email:
            matches: ".*"
  - from: https://ok.example.com
    to:
      - https://backend:8080
"#),
                &CancellationToken::new(),
            )
            .expect("reload succeeds");

        let snapshot = rx.borrow();
        assert_eq!(snapshot.routes.len(), 1);
        assert_eq!(snapshot.routes[0].from, "https://ok.example.com");
        assert_eq!(snapshot.reports.len(), 1);
    }

    #[tokio::test]
    async fn readers_observe_snapshots_in_publication_order() {
        let (mut aggregator, mut rx) = Aggregator::new(mk_options(Services::Proxy), vec![]);
        aggregator
            .reload(doc(GOOD_AND_BAD), &CancellationToken::new())
            .expect("first reload");
        aggregator
            .reload(doc(GOOD_AND_BAD), &CancellationToken::new())
            .expect("second reload");

        // A burst of reloads may coalesce; the reader sees the latest.
        rx.changed().await.expect("sender alive");
        assert_eq!(rx.borrow().generation, 2);
    }
}
