//! Update-expression construction.
//!
//! An [`Update`] is the single-item mutation unit: an ordered set of actions
//! plus at most one condition, applied atomically by the backend. The
//! [`UpdateBuilder`] accumulates actions and surfaces malformed expressions
//! as [`GraphError::ExpressionBuild`] at build time, so engine code can chain
//! calls without checking each step.

use smallvec::SmallVec;

use super::AttrValue;
use crate::error::{GraphError, Result};

/// One mutation within an update expression.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateAction {
    /// Set (or create) an attribute to a value.
    Set(&'static str, AttrValue),
    /// Append the elements of a list value to an existing list attribute.
    Append(&'static str, AttrValue),
    /// Increment an existing numeric attribute by a signed delta.
    Add(&'static str, i64),
    /// Replace one element of an existing list attribute.
    SetElem(&'static str, usize, AttrValue),
}

/// The condition gating an update. Evaluated against the item's state before
/// any action applies; a failed condition leaves the item untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// The attribute must not exist (also true when the item is absent).
    AttrNotExists(&'static str),
    /// The attribute must exist.
    AttrExists(&'static str),
    /// The attribute must be numeric and strictly less than the bound.
    NumLess(&'static str, i64),
    /// The list attribute's element at the index must equal the value.
    ElemEq(&'static str, usize, AttrValue),
    /// The list attribute must have exactly this many elements.
    ListLenEq(&'static str, usize),
}

/// A validated single-item update expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    /// Actions applied in order.
    pub actions: SmallVec<[UpdateAction; 8]>,
    /// Optional gating condition.
    pub condition: Option<Condition>,
}

impl Update {
    /// True when any action is an append, increment, or element set — the
    /// actions that require the target attribute (and item) to exist.
    pub fn requires_existing(&self) -> bool {
        self.actions.iter().any(|a| {
            matches!(
                a,
                UpdateAction::Append(..) | UpdateAction::Add(..) | UpdateAction::SetElem(..)
            )
        })
    }
}

/// Accumulates actions and a condition, validating at [`build`].
///
/// [`build`]: UpdateBuilder::build
pub struct UpdateBuilder {
    routine: &'static str,
    actions: SmallVec<[UpdateAction; 8]>,
    condition: Option<Condition>,
    defect: Option<String>,
}

impl UpdateBuilder {
    /// Starts an expression for the named routine (used in error context).
    pub fn new(routine: &'static str) -> Self {
        Self {
            routine,
            actions: SmallVec::new(),
            condition: None,
            defect: None,
        }
    }

    fn record_defect(&mut self, reason: String) {
        if self.defect.is_none() {
            self.defect = Some(reason);
        }
    }

    /// Adds a set action.
    pub fn set(mut self, column: &'static str, value: AttrValue) -> Self {
        self.actions.push(UpdateAction::Set(column, value));
        self
    }

    /// Adds a list-append action. The value must be a list kind.
    pub fn append(mut self, column: &'static str, value: AttrValue) -> Self {
        if !value.is_list() {
            self.record_defect(format!(
                "append to {column} requires a list value, got {}",
                value.kind()
            ));
        }
        self.actions.push(UpdateAction::Append(column, value));
        self
    }

    /// Adds a numeric increment action.
    pub fn add(mut self, column: &'static str, delta: i64) -> Self {
        self.actions.push(UpdateAction::Add(column, delta));
        self
    }

    /// Adds an element-replacement action. The value must be a scalar kind.
    pub fn set_elem(mut self, column: &'static str, idx: usize, value: AttrValue) -> Self {
        if value.is_list() {
            self.record_defect(format!(
                "set_elem on {column} requires a scalar value, got {}",
                value.kind()
            ));
        }
        self.actions.push(UpdateAction::SetElem(column, idx, value));
        self
    }

    /// Sets the gating condition. At most one condition per update.
    pub fn condition(mut self, condition: Condition) -> Self {
        if self.condition.is_some() {
            self.record_defect("more than one condition on a single update".to_owned());
        }
        self.condition = Some(condition);
        self
    }

    /// Validates and produces the expression.
    pub fn build(self) -> Result<Update> {
        if let Some(reason) = self.defect {
            return Err(GraphError::ExpressionBuild {
                routine: self.routine,
                reason,
            });
        }
        if self.actions.is_empty() {
            return Err(GraphError::ExpressionBuild {
                routine: self.routine,
                reason: "update expression has no actions".to_owned(),
            });
        }
        Ok(Update {
            actions: self.actions,
            condition: self.condition,
        })
    }
}
