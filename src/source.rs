//! Source document decoding.
//!
//! Policies are read from a structured document in either a YAML text form
//! or the binary protobuf form; both decode into the same provisional policy
//! list. Decoding performs no validation; the aggregator validates each
//! policy individually so one bad route cannot fail the whole document.

use anyhow::{Context, Result};
use gatehouse_core::{proto, Policy};
use prost::Message;
use serde::Deserialize;

/// A decoded configuration document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub routes: Vec<Policy>,
}

// === impl SourceDocument ===

impl SourceDocument {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("error decoding configuration document")
    }

    pub fn from_protobuf(raw: &[u8]) -> Result<Self> {
        let doc = proto::ConfigDocument::decode(raw)
            .context("error decoding binary configuration document")?;
        Ok(Self {
            routes: doc.routes.into_iter().map(Policy::from_proto).collect(),
        })
    }
}
