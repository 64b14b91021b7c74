//! Core identifier and value types shared across the storage layer.
//!
//! A [`Uid`] is the 16-byte node identifier; it is always base64-encoded when
//! used as a partition key at the store boundary. A [`SortKey`] is the string
//! path addressing one item within a node's partition; derived keys for
//! propagated scalars, overflow index items, and rotated overflow items are
//! composed here so the suffix grammar lives in exactly one place.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;

use crate::error::{GraphError, Result};

/// Length of a node identifier in bytes.
pub const UID_LEN: usize = 16;

/// Separator inserted between a predicate sort key and an attribute short
/// code when addressing a propagated-scalar item.
const SCALAR_SEP: &str = "#:";

/// Suffix appended to a predicate sort key to address its overflow index item.
const INDEX_SUFFIX: &str = "#X";

/// Separator introducing the item-sequence suffix on rotated overflow items.
const SEQ_SEP: char = '%';

/// A 16-byte node identifier.
///
/// Uids are opaque random bytes. [`fmt::Display`] renders the base64 form used
/// as the store partition key; [`fmt::Debug`] renders hex for log readability.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid([u8; UID_LEN]);

impl Uid {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        let mut bytes = [0u8; UID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps an existing 16-byte identifier.
    pub const fn from_bytes(bytes: [u8; UID_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw identifier bytes.
    pub const fn as_bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }

    /// Decodes an identifier from a byte slice of exactly [`UID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; UID_LEN] = bytes.try_into().map_err(|_| GraphError::Unmarshaling {
            routine: "Uid::from_slice",
            reason: format!("expected {UID_LEN} bytes, got {}", bytes.len()),
        })?;
        Ok(Self(arr))
    }

    /// Encodes the identifier as the base64 partition-key form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decodes an identifier from its base64 partition-key form.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = BASE64.decode(s).map_err(|e| GraphError::Unmarshaling {
            routine: "Uid::from_base64",
            reason: format!("invalid base64 partition key: {e}"),
        })?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", hex::encode(self.0))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// The sort-key path addressing one item within a node's partition.
///
/// Callers supply the predicate path (data partition label + predicate short
/// code, e.g. `A#G#:S`); everything the storage layer derives from it goes
/// through the composition methods below.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortKey(String);

impl SortKey {
    /// Wraps a raw sort-key path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sort key of the propagated-scalar item for the given attribute short
    /// code, e.g. `A#G#:S` + `A` -> `A#G#:S#:A`.
    pub fn scalar(&self, short_code: &str) -> SortKey {
        SortKey(format!("{}{SCALAR_SEP}{short_code}", self.0))
    }

    /// Sort key of the overflow index item for this predicate.
    pub fn index(&self) -> SortKey {
        SortKey(format!("{}{INDEX_SUFFIX}", self.0))
    }

    /// Sort key of the overflow item with the given sequence number.
    ///
    /// Sequence 1 is the unsuffixed base key; rotation opens `<base>%2`,
    /// `<base>%3`, and so on.
    pub fn with_seq(&self, seq: u32) -> SortKey {
        if seq <= 1 {
            self.clone()
        } else {
            SortKey(format!("{}{SEQ_SEP}{seq}", self.0))
        }
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SortKey({})", self.0)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SortKey {
    fn from(path: &str) -> Self {
        SortKey::new(path)
    }
}

/// A typed runtime value carried by one propagation request.
///
/// `Node` is the edge-valued case: the value is the child identifier itself.
/// `DateTime` values travel as RFC 3339 strings and share the string list
/// with `Str` on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Datetime rendered as an RFC 3339 string.
    DateTime(String),
    /// Child node identifier for edge-valued attributes.
    Node(Uid),
}

impl ScalarValue {
    /// Short label for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ScalarValue::Int(_) => "Int",
            ScalarValue::Float(_) => "Float",
            ScalarValue::Str(_) => "Str",
            ScalarValue::Bool(_) => "Bool",
            ScalarValue::Bytes(_) => "Bytes",
            ScalarValue::DateTime(_) => "DateTime",
            ScalarValue::Node(_) => "Node",
        }
    }
}
