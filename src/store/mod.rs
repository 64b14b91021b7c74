//! The wide-column store boundary.
//!
//! The storage layer talks to its backend exclusively through the
//! [`ColumnStore`] trait: keyed items whose attributes are [`AttrValue`]s,
//! mutated by single-item conditional [`Update`]s. The trait captures exactly
//! the contract the core depends on: per-item atomic conditional updates,
//! list-append, numeric increment-by-delta, element-level set/compare, and a
//! distinguishable size-limit rejection.
//!
//! [`MemoryStore`] is the in-process reference backend honoring that contract.

mod expr;
mod memory;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub use expr::{Condition, Update, UpdateAction, UpdateBuilder};
pub use memory::MemoryStore;

use crate::types::{SortKey, Uid};

/// Result alias for backend calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A raw stored item: attribute name to attribute value.
pub type Item = BTreeMap<String, AttrValue>;

/// Backend failure codes the core distinguishes.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The mutated item would exceed the per-item size limit.
    #[error("item size limit exceeded")]
    SizeExceeded,
    /// The update's condition did not hold.
    #[error("conditional check failed")]
    ConditionFailed,
    /// A list-append or increment referenced an attribute that is not present.
    #[error("attribute {0} does not exist")]
    AttributeMissing(&'static str),
    /// A required item was not found.
    #[error("item not found")]
    ItemNotFound,
    /// Anything else the backend reports.
    #[error("backend: {0}")]
    Backend(String),
}

/// A stored number. Integers and floats are kept distinct so that integer
/// propagated values survive round-trips exactly.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum Num {
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
}

impl Num {
    /// Returns the integer value, if this is an integer.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Num::Int(v) => Some(v),
            Num::Float(_) => None,
        }
    }

    /// Returns the value widened to a float.
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(v) => write!(f, "{v}"),
            Num::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One attribute value in its physical column form.
///
/// Binary lists are true list-of-binary structures rather than byte-set
/// aggregates; append operations work per element.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// UTF-8 string.
    Str(String),
    /// Number.
    Num(Num),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Bin(Vec<u8>),
    /// List of strings.
    StrList(Vec<String>),
    /// List of numbers.
    NumList(Vec<Num>),
    /// List of binary values.
    BinList(Vec<Vec<u8>>),
    /// List of booleans.
    BoolList(Vec<bool>),
}

impl AttrValue {
    /// Short label for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Str(_) => "Str",
            AttrValue::Num(_) => "Num",
            AttrValue::Bool(_) => "Bool",
            AttrValue::Bin(_) => "Bin",
            AttrValue::StrList(_) => "StrList",
            AttrValue::NumList(_) => "NumList",
            AttrValue::BinList(_) => "BinList",
            AttrValue::BoolList(_) => "BoolList",
        }
    }

    /// True for the list-shaped kinds.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            AttrValue::StrList(_)
                | AttrValue::NumList(_)
                | AttrValue::BinList(_)
                | AttrValue::BoolList(_)
        )
    }

    /// Number of elements in a list kind, or 0 for scalars.
    pub fn list_len(&self) -> usize {
        match self {
            AttrValue::StrList(v) => v.len(),
            AttrValue::NumList(v) => v.len(),
            AttrValue::BinList(v) => v.len(),
            AttrValue::BoolList(v) => v.len(),
            _ => 0,
        }
    }

    /// Returns the element at `idx` of a list kind, as a scalar value.
    pub fn list_get(&self, idx: usize) -> Option<AttrValue> {
        match self {
            AttrValue::StrList(v) => v.get(idx).map(|e| AttrValue::Str(e.clone())),
            AttrValue::NumList(v) => v.get(idx).map(|e| AttrValue::Num(*e)),
            AttrValue::BinList(v) => v.get(idx).map(|e| AttrValue::Bin(e.clone())),
            AttrValue::BoolList(v) => v.get(idx).map(|e| AttrValue::Bool(*e)),
            _ => None,
        }
    }

    /// Appends the elements of `tail` (a list of the same kind) to this list.
    pub(crate) fn append_list(&mut self, tail: &AttrValue) -> StoreResult<()> {
        match (self, tail) {
            (AttrValue::StrList(dst), AttrValue::StrList(src)) => dst.extend(src.iter().cloned()),
            (AttrValue::NumList(dst), AttrValue::NumList(src)) => dst.extend(src.iter().copied()),
            (AttrValue::BinList(dst), AttrValue::BinList(src)) => dst.extend(src.iter().cloned()),
            (AttrValue::BoolList(dst), AttrValue::BoolList(src)) => dst.extend(src.iter().copied()),
            (dst, src) => {
                return Err(StoreError::Backend(format!(
                    "cannot append {} to {}",
                    src.kind(),
                    dst.kind()
                )))
            }
        }
        Ok(())
    }

    /// Replaces the element at `idx` of a list kind with a scalar of the
    /// matching kind.
    pub(crate) fn set_elem(&mut self, idx: usize, value: &AttrValue) -> StoreResult<()> {
        let oob = || StoreError::Backend(format!("list index {idx} out of range"));
        match (self, value) {
            (AttrValue::StrList(v), AttrValue::Str(e)) => {
                *v.get_mut(idx).ok_or_else(oob)? = e.clone()
            }
            (AttrValue::NumList(v), AttrValue::Num(e)) => *v.get_mut(idx).ok_or_else(oob)? = *e,
            (AttrValue::BinList(v), AttrValue::Bin(e)) => {
                *v.get_mut(idx).ok_or_else(oob)? = e.clone()
            }
            (AttrValue::BoolList(v), AttrValue::Bool(e)) => *v.get_mut(idx).ok_or_else(oob)? = *e,
            (dst, src) => {
                return Err(StoreError::Backend(format!(
                    "cannot set {} element in {}",
                    src.kind(),
                    dst.kind()
                )))
            }
        }
        Ok(())
    }

    /// Approximate stored size in bytes, used for size-limit accounting.
    pub fn approx_size(&self) -> usize {
        match self {
            AttrValue::Str(s) => s.len(),
            AttrValue::Num(_) => 8,
            AttrValue::Bool(_) => 1,
            AttrValue::Bin(b) => b.len(),
            AttrValue::StrList(v) => v.iter().map(|s| s.len() + 1).sum(),
            AttrValue::NumList(v) => v.len() * 9,
            AttrValue::BinList(v) => v.iter().map(|b| b.len() + 1).sum(),
            AttrValue::BoolList(v) => v.len() * 2,
        }
    }
}

/// Physical address of one item: base64 partition key + sort-key path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemKey {
    /// Partition key: base64 encoding of the owning node's [`Uid`].
    pub pk: String,
    /// Sort-key path within the partition.
    pub sk: String,
}

impl ItemKey {
    /// Builds the key addressing `sortk` within `uid`'s partition.
    pub fn new(uid: Uid, sortk: &SortKey) -> Self {
        Self {
            pk: uid.to_base64(),
            sk: sortk.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// The backend contract the storage layer requires.
///
/// Implementations must apply each [`Update`] atomically per item: either the
/// condition holds and every action applies, or the item is left untouched
/// and a [`StoreError`] is returned. Concurrent updates to the same item must
/// be serialized by the backend.
pub trait ColumnStore: Send + Sync {
    /// Reads one item, or `None` if it does not exist.
    fn get_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>>;

    /// Applies one conditional update to one item.
    fn update_item(&self, table: &str, key: &ItemKey, update: &Update) -> StoreResult<()>;
}
