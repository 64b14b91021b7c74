//! Process-wide configuration constants for the storage layer.

use serde::Deserialize;

use crate::error::{GraphError, Result};

/// Capacity and sizing constants governing embedding and overflow behavior.
///
/// The defaults suit production tables; tests shrink the capacities to force
/// overflow transitions with few children.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Backing table name.
    pub table: String,
    /// Maximum children embedded directly in the primary predicate item.
    pub embedded_child_nodes: usize,
    /// Ceiling on the overflow-block pool per predicate.
    pub max_ovfl_blocks: usize,
    /// How many overflow blocks are allocated per pool growth.
    pub ovfl_blocks_grow_by: usize,
    /// Maximum children per overflow item before rotation opens a new one.
    pub ovfw_batch_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            table: "trellis".to_owned(),
            embedded_child_nodes: 20,
            max_ovfl_blocks: 20,
            ovfl_blocks_grow_by: 5,
            ovfw_batch_limit: 200,
        }
    }
}

impl GraphConfig {
    /// Parses a configuration from TOML text, filling unset fields from the
    /// defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GraphError::Unmarshaling {
            routine: "GraphConfig::from_toml_str",
            reason: e.to_string(),
        })
    }

    /// Sets the backing table name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = name.into();
        self
    }

    /// Sets the embedded-child capacity of the primary item.
    pub fn embedded_child_nodes(mut self, n: usize) -> Self {
        self.embedded_child_nodes = n;
        self
    }

    /// Sets the overflow-block pool ceiling.
    pub fn max_ovfl_blocks(mut self, n: usize) -> Self {
        self.max_ovfl_blocks = n;
        self
    }

    /// Sets the pool growth increment.
    pub fn ovfl_blocks_grow_by(mut self, n: usize) -> Self {
        self.ovfl_blocks_grow_by = n;
        self
    }

    /// Sets the per-overflow-item child capacity.
    pub fn ovfw_batch_limit(mut self, n: usize) -> Self {
        self.ovfw_batch_limit = n;
        self
    }
}
