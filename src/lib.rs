//! Gatehouse control plane: the route-policy compilation pipeline.
//!
//! The pipeline transforms a declarative set of per-route access policies
//! into the dynamic configuration consumed by the embedded data-plane proxy
//! and the predicate inputs consumed by the policy decision engine:
//!
//! ```ignore
//! [SourceDocument] -> validate -> identify/sort -> compile matchers
//!                                               -> emit listeners/routes/clusters
//!                  -> [Snapshot] -> xDS emitter + decision engine
//! ```
//!
//! Reloads are serialized through the single-writer [`Aggregator`]; each
//! publishes one immutable [`Snapshot`] over a watch channel. Snapshots are
//! totally ordered by publication: a reader that observes snapshot N never
//! subsequently observes an older one, though a rapid burst of reloads may
//! coalesce. The data-plane proxy, its discovery-stream transport,
//! certificate acquisition and the decision engine itself are external
//! collaborators.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod aggregator;
mod source;

pub use self::aggregator::{Aggregator, PolicyReport, Snapshot};
pub use self::source::SourceDocument;

pub use gatehouse_core as core;
pub use gatehouse_criteria as criteria;
pub use gatehouse_envoy as envoy;
