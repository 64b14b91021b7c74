//! Trellis: property-graph block storage over a schemaless wide-column store.
//!
//! Traversal queries avoid fan-out joins by denormalizing child scalar
//! values directly into the parent edge's item. The hard problem this crate
//! owns is where a piece of child data physically lands and how it is
//! appended without corrupting alignment or exceeding item-size limits:
//!
//! 1. A parent's predicate item embeds the first `embedded_child_nodes`
//!    children as positionally aligned lists (edge list, status list,
//!    propagated scalar lists, null markers).
//! 2. Past the embedded capacity, children route to a bounded pool of
//!    overflow blocks; once every block's current item is at the batch
//!    limit and the pool is at its ceiling, new items rotate open inside
//!    existing blocks via a sort-key sequence suffix.
//! 3. Every append is one atomic conditional update against one item, so
//!    concurrent propagations can never desynchronize list alignment.
//!
//! [`GraphStore`] is the entry point; it needs a [`ColumnStore`] backend
//! (use [`MemoryStore`] in-process), an immutable [`TypeDictionary`], and a
//! [`GraphConfig`].

pub mod config;
pub mod dict;
pub mod error;
pub mod storage;
pub mod store;
pub mod types;

pub use config::GraphConfig;
pub use dict::{AttrDescriptor, DataType, DictRow, DictSource, JsonSource, TypeDictionary};
pub use error::{GraphError, Result};
pub use storage::{
    col, DataItem, EdgeStatus, EdgeView, GraphStore, OverflowIndex, OverflowSlot,
    PropagationTarget, TargetKind,
};
pub use store::{AttrValue, ColumnStore, Item, ItemKey, MemoryStore, Num, StoreError};
pub use types::{ScalarValue, SortKey, Uid};
