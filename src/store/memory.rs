//! In-process reference backend.
//!
//! `MemoryStore` implements the [`ColumnStore`] contract over a hash map,
//! serializing item mutations behind one lock. Each update is all-or-nothing:
//! actions apply to a scratch copy which replaces the stored item only after
//! every action and the size check succeed.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{
    AttrValue, ColumnStore, Condition, Item, ItemKey, Num, StoreError, StoreResult, Update,
    UpdateAction,
};

/// Default per-item size ceiling, matching the order of magnitude wide-column
/// stores impose (~400 KB).
pub const DEFAULT_MAX_ITEM_SIZE: usize = 400 * 1024;

type Table = FxHashMap<ItemKey, Item>;

/// An in-memory [`ColumnStore`].
pub struct MemoryStore {
    tables: RwLock<FxHashMap<String, Table>>,
    max_item_size: usize,
}

impl MemoryStore {
    /// Creates a store with the default item size limit.
    pub fn new() -> Self {
        Self::with_max_item_size(DEFAULT_MAX_ITEM_SIZE)
    }

    /// Creates a store with an explicit item size limit, letting tests force
    /// size-exceeded rejections with small items.
    pub fn with_max_item_size(bytes: usize) -> Self {
        Self {
            tables: RwLock::new(FxHashMap::default()),
            max_item_size: bytes,
        }
    }

    /// Number of items currently stored in a table.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.len())
    }

    fn item_size(item: &Item) -> usize {
        item.iter()
            .map(|(name, value)| name.len() + value.approx_size())
            .sum()
    }

    fn check_condition(condition: &Condition, item: Option<&Item>) -> bool {
        match condition {
            Condition::AttrNotExists(col) => item.map_or(true, |it| !it.contains_key(*col)),
            Condition::AttrExists(col) => item.is_some_and(|it| it.contains_key(*col)),
            Condition::NumLess(col, bound) => match item.and_then(|it| it.get(*col)) {
                Some(AttrValue::Num(Num::Int(v))) => v < bound,
                Some(AttrValue::Num(Num::Float(v))) => *v < *bound as f64,
                _ => false,
            },
            Condition::ElemEq(col, idx, expected) => item
                .and_then(|it| it.get(*col))
                .and_then(|attr| attr.list_get(*idx))
                .is_some_and(|actual| actual == *expected),
            Condition::ListLenEq(col, n) => item
                .and_then(|it| it.get(*col))
                .is_some_and(|attr| attr.is_list() && attr.list_len() == *n),
        }
    }

    fn apply_actions(scratch: &mut Item, update: &Update) -> StoreResult<()> {
        for action in &update.actions {
            match action {
                UpdateAction::Set(col, value) => {
                    scratch.insert((*col).to_owned(), value.clone());
                }
                UpdateAction::Append(col, value) => {
                    let attr = scratch
                        .get_mut(*col)
                        .ok_or(StoreError::AttributeMissing(*col))?;
                    attr.append_list(value)?;
                }
                UpdateAction::Add(col, delta) => {
                    let attr = scratch
                        .get_mut(*col)
                        .ok_or(StoreError::AttributeMissing(*col))?;
                    match attr {
                        AttrValue::Num(Num::Int(v)) => *v += delta,
                        AttrValue::Num(Num::Float(v)) => *v += *delta as f64,
                        other => {
                            return Err(StoreError::Backend(format!(
                                "cannot increment {} attribute {col}",
                                other.kind()
                            )))
                        }
                    }
                }
                UpdateAction::SetElem(col, idx, value) => {
                    let attr = scratch
                        .get_mut(*col)
                        .ok_or(StoreError::AttributeMissing(*col))?;
                    attr.set_elem(*idx, value)?;
                }
            }
        }
        Ok(())
    }

    fn first_existing_dependency(update: &Update) -> &'static str {
        update
            .actions
            .iter()
            .find_map(|a| match a {
                UpdateAction::Append(col, _)
                | UpdateAction::Add(col, _)
                | UpdateAction::SetElem(col, _, _) => Some(*col),
                UpdateAction::Set(..) => None,
            })
            .unwrap_or("")
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnStore for MemoryStore {
    fn get_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    fn update_item(&self, table: &str, key: &ItemKey, update: &Update) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let table = tables.entry(table.to_owned()).or_default();
        let existing = table.get(key);

        // Appends and increments address attributes that must already exist;
        // an absent item surfaces as AttributeMissing so callers can
        // initialize it, not as a failed condition.
        if existing.is_none() && update.requires_existing() {
            let col = Self::first_existing_dependency(update);
            trace!(key = %key, col, "memstore.update.missing_item");
            return Err(StoreError::AttributeMissing(col));
        }

        if let Some(condition) = &update.condition {
            if !Self::check_condition(condition, existing) {
                trace!(key = %key, "memstore.update.condition_failed");
                return Err(StoreError::ConditionFailed);
            }
        }

        let mut scratch = existing.cloned().unwrap_or_default();
        Self::apply_actions(&mut scratch, update)?;

        if Self::item_size(&scratch) > self.max_item_size {
            trace!(key = %key, size = Self::item_size(&scratch), "memstore.update.size_exceeded");
            return Err(StoreError::SizeExceeded);
        }

        table.insert(key.clone(), scratch);
        Ok(())
    }
}
