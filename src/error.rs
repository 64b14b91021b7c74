//! Typed failure taxonomy for the storage layer.
//!
//! Backend codes ([`crate::store::StoreError`]) are translated here into the
//! taxonomy the callers act on. Only two kinds are actionable by the overflow
//! allocator (size-exceeded and conditional-check-failed); everything else
//! propagates to the caller unchanged. Every variant carries the routine that
//! raised it and, where one exists, the item key it was operating on.

use thiserror::Error;

use crate::store::{ItemKey, StoreError};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

/// A typed failure surfaced by the block model, propagation engine,
/// overflow allocator, or dictionary cache.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The append/update expression could not be constructed. Caller or
    /// configuration defect; never retryable.
    #[error("{routine}: failed to build update expression: {reason}")]
    ExpressionBuild {
        /// Routine that was building the expression.
        routine: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The backend rejected the write because the item would exceed its size
    /// limit. The overflow allocator reacts by selecting a new target.
    #[error("{routine}: item size exceeded for {key}")]
    ItemSizeExceeded {
        /// Routine that issued the write.
        routine: &'static str,
        /// Item the write targeted.
        key: ItemKey,
        /// Backend cause.
        #[source]
        source: StoreError,
    },

    /// A conditional write lost its race. The overflow allocator reacts by
    /// re-reading and reselecting.
    #[error("{routine}: conditional check failed for {key}")]
    ConditionalCheckFailed {
        /// Routine that issued the write.
        routine: &'static str,
        /// Item the write targeted.
        key: ItemKey,
        /// Backend cause.
        #[source]
        source: StoreError,
    },

    /// An append referenced an attribute that does not exist yet; the item
    /// must be created (initialized) before the append is retried.
    #[error("{routine}: attribute does not exist on {key}")]
    AttributeDoesNotExist {
        /// Routine that issued the write.
        routine: &'static str,
        /// Item the write targeted.
        key: ItemKey,
        /// Backend cause.
        #[source]
        source: StoreError,
    },

    /// Any other backend failure. Surfaced, never retried automatically.
    #[error("{routine}: backend failure for {key}")]
    System {
        /// Routine that issued the call.
        routine: &'static str,
        /// Item the call targeted.
        key: ItemKey,
        /// Backend cause.
        #[source]
        source: StoreError,
    },

    /// A required read returned nothing. Fatal during startup (dictionary
    /// load); recoverable by the caller otherwise.
    #[error("{routine}: no item found for {what}")]
    NoItemFound {
        /// Routine that issued the read.
        routine: &'static str,
        /// Description of what was looked up (item key, dictionary entry).
        what: String,
    },

    /// A value could not be encoded into the backend attribute format.
    #[error("{routine}: marshaling failed: {reason}")]
    Marshaling {
        /// Routine doing the encoding.
        routine: &'static str,
        /// What failed.
        reason: String,
    },

    /// A stored attribute could not be decoded into its typed form.
    #[error("{routine}: unmarshaling failed: {reason}")]
    Unmarshaling {
        /// Routine doing the decoding.
        routine: &'static str,
        /// What failed.
        reason: String,
    },

    /// A data-integrity fault, e.g. positionally-aligned lists of unequal
    /// length. Never tolerated silently.
    #[error("{routine}: data integrity fault for {key}: {reason}")]
    Inconsistent {
        /// Routine that detected the fault.
        routine: &'static str,
        /// Item the fault was detected on.
        key: ItemKey,
        /// Description of the fault.
        reason: String,
    },
}

impl GraphError {
    /// Classifies a backend error against the taxonomy, attaching routine and
    /// key context.
    pub fn from_store(routine: &'static str, key: ItemKey, source: StoreError) -> Self {
        match source {
            StoreError::SizeExceeded => GraphError::ItemSizeExceeded {
                routine,
                key,
                source,
            },
            StoreError::ConditionFailed => GraphError::ConditionalCheckFailed {
                routine,
                key,
                source,
            },
            StoreError::AttributeMissing(_) => GraphError::AttributeDoesNotExist {
                routine,
                key,
                source,
            },
            StoreError::ItemNotFound => GraphError::NoItemFound {
                routine,
                what: key.to_string(),
            },
            StoreError::Backend(_) => GraphError::System {
                routine,
                key,
                source,
            },
        }
    }

    /// True exactly for the kinds the overflow allocator reacts to by
    /// reselecting a target: size-exceeded and conditional-check-failed.
    pub fn is_allocator_actionable(&self) -> bool {
        matches!(
            self,
            GraphError::ItemSizeExceeded { .. } | GraphError::ConditionalCheckFailed { .. }
        )
    }

    /// The routine that raised this error.
    pub fn routine(&self) -> &'static str {
        match self {
            GraphError::ExpressionBuild { routine, .. }
            | GraphError::ItemSizeExceeded { routine, .. }
            | GraphError::ConditionalCheckFailed { routine, .. }
            | GraphError::AttributeDoesNotExist { routine, .. }
            | GraphError::System { routine, .. }
            | GraphError::NoItemFound { routine, .. }
            | GraphError::Marshaling { routine, .. }
            | GraphError::Unmarshaling { routine, .. }
            | GraphError::Inconsistent { routine, .. } => routine,
        }
    }
}
