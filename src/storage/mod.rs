//! Graph block storage engine.
//!
//! [`GraphStore`] is the entry point: it owns the backend handle, the type
//! dictionary, and the capacity configuration. The write path is implemented
//! across two files — `propagate.rs` (the append protocol) and `overflow.rs`
//! (target resolution and the overflow-block lifecycle) — each contributing
//! an `impl GraphStore` block.

pub mod block;
mod overflow;
mod propagate;

use std::sync::Arc;

pub use block::{col, DataItem, EdgeStatus, EdgeView, OverflowIndex, OverflowSlot};
pub use overflow::{PropagationTarget, TargetKind};

use crate::config::GraphConfig;
use crate::dict::TypeDictionary;
use crate::error::{GraphError, Result};
use crate::store::{ColumnStore, Item, ItemKey, Update};
use crate::types::{SortKey, Uid};

/// The property-graph block storage layer over a wide-column backend.
pub struct GraphStore {
    store: Arc<dyn ColumnStore>,
    dict: Arc<TypeDictionary>,
    cfg: GraphConfig,
}

impl GraphStore {
    /// Creates a storage layer over the given backend.
    pub fn new(store: Arc<dyn ColumnStore>, dict: Arc<TypeDictionary>, cfg: GraphConfig) -> Self {
        Self { store, dict, cfg }
    }

    /// The type dictionary in use.
    pub fn dict(&self) -> &TypeDictionary {
        &self.dict
    }

    /// The capacity configuration in use.
    pub fn config(&self) -> &GraphConfig {
        &self.cfg
    }

    /// Reads one raw item, classifying backend failures.
    pub(crate) fn read_item(&self, routine: &'static str, key: &ItemKey) -> Result<Option<Item>> {
        self.store
            .get_item(&self.cfg.table, key)
            .map_err(|e| GraphError::from_store(routine, key.clone(), e))
    }

    /// Issues one update, classifying backend failures.
    pub(crate) fn write_item(
        &self,
        routine: &'static str,
        key: &ItemKey,
        update: &Update,
    ) -> Result<()> {
        self.store
            .update_item(&self.cfg.table, key, update)
            .map_err(|e| GraphError::from_store(routine, key.clone(), e))
    }

    /// Reads and decodes the item at `(uid, sortk)`.
    pub fn fetch_data_item(&self, uid: Uid, sortk: &SortKey) -> Result<Option<DataItem>> {
        let key = ItemKey::new(uid, sortk);
        match self.read_item("fetch_data_item", &key)? {
            None => Ok(None),
            Some(raw) => DataItem::from_item(key, &raw).map(Some),
        }
    }

    /// Reads and decodes the overflow index item for `(parent, sortk)`.
    pub fn fetch_overflow_index(
        &self,
        parent: Uid,
        sortk: &SortKey,
    ) -> Result<Option<OverflowIndex>> {
        let key = ItemKey::new(parent, &sortk.index());
        match self.read_item("fetch_overflow_index", &key)? {
            None => Ok(None),
            Some(raw) => OverflowIndex::from_item(key, &raw).map(Some),
        }
    }

    /// Collects every child of `(parent, sortk)` with its status: embedded
    /// children from the primary item, then the contents of every overflow
    /// item the index knows about, in block order and item-sequence order.
    pub fn edge_children(&self, parent: Uid, sortk: &SortKey) -> Result<Vec<(Uid, EdgeStatus)>> {
        let mut out = Vec::new();
        if let Some(item) = self.fetch_data_item(parent, sortk)? {
            out.extend(item.edges()?.children);
        }
        let Some(index) = self.fetch_overflow_index(parent, sortk)? else {
            return Ok(out);
        };
        for slot in index.blocks() {
            for seq in 1..=slot.seq {
                let item_sortk = sortk.with_seq(seq as u32);
                if let Some(item) = self.fetch_data_item(slot.uid, &item_sortk)? {
                    out.extend(item.edges()?.children);
                }
            }
        }
        Ok(out)
    }
}
