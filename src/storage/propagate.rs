//! The value-propagation protocol.
//!
//! One call appends one child's contribution — a scalar value or the child
//! UID itself — to exactly one target item, as a single conditional update.
//! Absent values append the type-appropriate zero with the null marker set,
//! never skipping the append, so index *i* keeps meaning the same child in
//! every list of the item.
//!
//! Items are created lazily: the first append surfaces the backend's
//! attribute-missing code, at which point an initializing update (whole
//! one-element lists, guarded by attribute-not-exists) is issued and the
//! append retried once.

use tracing::{debug, trace};

use super::block::col;
use super::block::EdgeStatus;
use super::overflow::PropagationTarget;
use super::GraphStore;
use crate::dict::{AttrDescriptor, DataType};
use crate::error::{GraphError, Result};
use crate::store::{AttrValue, Condition, ItemKey, Num, Update, UpdateBuilder};
use crate::types::{ScalarValue, SortKey, Uid};

/// Resolve/propagate rounds before `attach` gives up and surfaces the last
/// actionable error.
const ATTACH_RETRY_MAX: usize = 8;

/// Maps a scalar attribute and its runtime value to the physical list
/// column, the one-element list to append, and the null flag.
///
/// A kind mismatch between the declared data-type and the runtime value is a
/// caller defect and fails fast; nothing is coerced.
fn scalar_element(
    routine: &'static str,
    attr: &AttrDescriptor,
    value: Option<ScalarValue>,
) -> Result<(&'static str, AttrValue, bool)> {
    let mismatch = |got: &ScalarValue| GraphError::ExpressionBuild {
        routine,
        reason: format!(
            "attribute {} declared {:?} but value is {}",
            attr.name,
            attr.dtype,
            got.kind()
        ),
    };
    match (attr.dtype, value) {
        (DataType::Int, Some(ScalarValue::Int(v))) => {
            Ok((col::LN, AttrValue::NumList(vec![Num::Int(v)]), false))
        }
        (DataType::Int, None) => Ok((col::LN, AttrValue::NumList(vec![Num::Int(0)]), true)),
        (DataType::Float, Some(ScalarValue::Float(v))) => {
            Ok((col::LN, AttrValue::NumList(vec![Num::Float(v)]), false))
        }
        (DataType::Float, None) => {
            Ok((col::LN, AttrValue::NumList(vec![Num::Float(0.0)]), true))
        }
        (DataType::Str, Some(ScalarValue::Str(v))) => {
            Ok((col::LS, AttrValue::StrList(vec![v]), false))
        }
        (DataType::Str, None) => Ok((col::LS, AttrValue::StrList(vec![String::new()]), true)),
        (DataType::DateTime, Some(ScalarValue::DateTime(v))) => {
            Ok((col::LS, AttrValue::StrList(vec![v]), false))
        }
        (DataType::DateTime, None) => {
            Ok((col::LS, AttrValue::StrList(vec![String::new()]), true))
        }
        (DataType::Bin, Some(ScalarValue::Bytes(v))) => {
            Ok((col::LB, AttrValue::BinList(vec![v]), false))
        }
        (DataType::Bin, None) => Ok((col::LB, AttrValue::BinList(vec![Vec::new()]), true)),
        (DataType::Bool, Some(ScalarValue::Bool(v))) => {
            Ok((col::LBL, AttrValue::BoolList(vec![v]), false))
        }
        (DataType::Bool, None) => Ok((col::LBL, AttrValue::BoolList(vec![false]), true)),
        (DataType::Node, _) => Err(GraphError::ExpressionBuild {
            routine,
            reason: format!("attribute {} is edge-valued, not scalar", attr.name),
        }),
        (_, Some(other)) => Err(mismatch(&other)),
    }
}

impl GraphStore {
    /// Appends one child's contribution for `attr` to the resolved target
    /// item, preserving positional alignment.
    ///
    /// For scalar attributes the value (or its zero substitute, null-marked)
    /// is appended to the propagated-scalar item addressed by the predicate
    /// sort key plus the attribute short code. For edge-valued attributes the
    /// child UID is appended to the target's edge list with status
    /// `ChildUid`, incrementing the attached-child counter under its
    /// capacity condition.
    pub fn propagate_child_data(
        &self,
        attr: &AttrDescriptor,
        parent: Uid,
        sortk: &SortKey,
        target: &PropagationTarget,
        value: Option<ScalarValue>,
    ) -> Result<()> {
        match attr.dtype {
            DataType::Node => self.propagate_edge(attr, parent, sortk, target, value),
            _ => self.propagate_scalar(attr, parent, sortk, target, value),
        }
    }

    fn propagate_edge(
        &self,
        attr: &AttrDescriptor,
        parent: Uid,
        sortk: &SortKey,
        target: &PropagationTarget,
        value: Option<ScalarValue>,
    ) -> Result<()> {
        let routine = "propagate_child_data";
        let child = match value {
            Some(ScalarValue::Node(uid)) => uid,
            Some(other) => {
                return Err(GraphError::ExpressionBuild {
                    routine,
                    reason: format!(
                        "edge attribute {} requires a Node value, got {}",
                        attr.name,
                        other.kind()
                    ),
                })
            }
            None => {
                return Err(GraphError::ExpressionBuild {
                    routine,
                    reason: format!("edge attribute {} requires a child UID", attr.name),
                })
            }
        };

        let capacity = if target.is_embedded() {
            self.cfg.embedded_child_nodes as i64
        } else {
            self.cfg.ovfw_batch_limit as i64
        };
        let key = ItemKey::new(target.uid, &target.edge_sortk(sortk));

        let child_bin = AttrValue::BinList(vec![child.as_bytes().to_vec()]);
        let status = AttrValue::NumList(vec![Num::Int(EdgeStatus::ChildUid.to_raw())]);
        let append = UpdateBuilder::new(routine)
            .append(col::ND, child_bin.clone())
            .append(col::XF, status.clone())
            .add(col::CNT, 1)
            .condition(Condition::NumLess(col::CNT, capacity))
            .build()?;

        let mut init = UpdateBuilder::new(routine)
            .set(col::ND, child_bin)
            .set(col::XF, status)
            .set(col::CNT, AttrValue::Num(Num::Int(1)));
        if !target.is_embedded() {
            init = init.set(col::P, AttrValue::Bin(parent.as_bytes().to_vec()));
        }
        let init = init.condition(Condition::AttrNotExists(col::ND)).build()?;

        self.apply_with_init(routine, &key, &append, &init)?;
        trace!(parent = %parent, child = %child, key = %key, embedded = target.is_embedded(), "propagate.edge");
        Ok(())
    }

    fn propagate_scalar(
        &self,
        attr: &AttrDescriptor,
        parent: Uid,
        sortk: &SortKey,
        target: &PropagationTarget,
        value: Option<ScalarValue>,
    ) -> Result<()> {
        let routine = "propagate_child_data";
        if value.is_none() && !attr.nullable {
            return Err(GraphError::ExpressionBuild {
                routine,
                reason: format!("attribute {} is not nullable", attr.name),
            });
        }

        let (column, element, is_null) = scalar_element(routine, attr, value)?;
        let key = ItemKey::new(target.uid, &target.scalar_sortk(sortk, &attr.short));

        let append = UpdateBuilder::new(routine)
            .append(column, element.clone())
            .append(col::XBL, AttrValue::BoolList(vec![is_null]))
            .build()?;

        let mut init = UpdateBuilder::new(routine)
            .set(column, element)
            .set(col::XBL, AttrValue::BoolList(vec![is_null]));
        if !target.is_embedded() {
            init = init.set(col::P, AttrValue::Bin(parent.as_bytes().to_vec()));
        }
        let init = init.condition(Condition::AttrNotExists(column)).build()?;

        self.apply_with_init(routine, &key, &append, &init)?;
        trace!(parent = %parent, key = %key, column, is_null, "propagate.scalar");
        Ok(())
    }

    /// Issues `append`; when the backend reports the attribute missing the
    /// item is initialized and the append retried once (a failed initialize
    /// condition means another writer created the item between the calls).
    pub(crate) fn apply_with_init(
        &self,
        routine: &'static str,
        key: &ItemKey,
        append: &Update,
        init: &Update,
    ) -> Result<()> {
        match self.write_item(routine, key, append) {
            Ok(()) => Ok(()),
            Err(GraphError::AttributeDoesNotExist { .. }) => {
                trace!(key = %key, "propagate.init_item");
                match self.write_item(routine, key, init) {
                    Ok(()) => Ok(()),
                    Err(GraphError::ConditionalCheckFailed { .. }) => {
                        self.write_item(routine, key, append)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Attaches a child under `(parent, sortk)`: resolves a target, appends
    /// the edge, and reacts to size-exceeded or lost conditional checks by
    /// reselecting, up to a bounded number of rounds.
    ///
    /// Returns the target the child actually landed in so the caller can
    /// route the child's propagated scalar attributes to the same item pair.
    pub fn attach(
        &self,
        attr: &AttrDescriptor,
        parent: Uid,
        sortk: &SortKey,
        child: Uid,
    ) -> Result<PropagationTarget> {
        if attr.dtype != DataType::Node {
            return Err(GraphError::ExpressionBuild {
                routine: "attach",
                reason: format!("attribute {} is not edge-valued", attr.name),
            });
        }

        let mut attempt = 0;
        let mut skip_embedded = false;
        loop {
            let target = if skip_embedded {
                self.resolve_overflow_target(parent, sortk)?
            } else {
                self.resolve_target(parent, sortk)?
            };
            match self.propagate_child_data(
                attr,
                parent,
                sortk,
                &target,
                Some(ScalarValue::Node(child)),
            ) {
                Ok(()) => return Ok(target),
                Err(e) if e.is_allocator_actionable() && attempt + 1 < ATTACH_RETRY_MAX => {
                    if target.is_embedded() {
                        // The primary item rejected on size below its count
                        // capacity; route the remaining rounds to overflow.
                        if matches!(e, GraphError::ItemSizeExceeded { .. }) {
                            skip_embedded = true;
                        }
                    } else {
                        self.note_overflow_item_full(parent, sortk, &target)?;
                    }
                    debug!(parent = %parent, attempt, error = %e, "attach.reselect");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Soft-deletes a child: rewrites its status slot to `UidDetached` with a
    /// compare-and-swap on the previous status. The slot (and every aligned
    /// list entry) stays in place, so positional alignment is unaffected.
    /// Detaching an already-detached child is a no-op.
    pub fn detach_child(&self, parent: Uid, sortk: &SortKey, child: Uid) -> Result<()> {
        let routine = "detach_child";

        if let Some(item) = self.fetch_data_item(parent, sortk)? {
            if let Some(done) = self.detach_in_item(routine, &item, child)? {
                if done {
                    debug!(parent = %parent, child = %child, "detach.embedded");
                }
                return Ok(());
            }
        }

        if let Some(index) = self.fetch_overflow_index(parent, sortk)? {
            for slot in index.blocks() {
                for seq in 1..=slot.seq {
                    let item_sortk = sortk.with_seq(seq as u32);
                    if let Some(item) = self.fetch_data_item(slot.uid, &item_sortk)? {
                        if let Some(done) = self.detach_in_item(routine, &item, child)? {
                            if done {
                                debug!(parent = %parent, child = %child, block = %slot.uid, seq, "detach.overflow");
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }

        Err(GraphError::NoItemFound {
            routine,
            what: format!("child {child} under {parent}/{sortk}"),
        })
    }

    /// Detaches `child` within one item if its slot is there. Returns
    /// `None` when the child is not in this item, `Some(false)` when it was
    /// already detached, `Some(true)` when the status was rewritten.
    fn detach_in_item(
        &self,
        routine: &'static str,
        item: &super::DataItem,
        child: Uid,
    ) -> Result<Option<bool>> {
        let (nd, xf) = item.raw_edges()?;
        let Some(pos) = nd
            .iter()
            .zip(xf)
            .position(|(uid, status)| *uid == child && status.is_attached_child())
        else {
            return Ok(None);
        };
        if xf[pos].is_detached() {
            return Ok(Some(false));
        }
        let update = UpdateBuilder::new(routine)
            .set_elem(
                col::XF,
                pos,
                AttrValue::Num(Num::Int(EdgeStatus::UidDetached.to_raw())),
            )
            .condition(Condition::ElemEq(
                col::XF,
                pos,
                AttrValue::Num(Num::Int(xf[pos].to_raw())),
            ))
            .build()?;
        self.write_item(routine, item.key(), &update)?;
        Ok(Some(true))
    }
}
