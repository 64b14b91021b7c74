//! Overflow-block lifecycle and target resolution.
//!
//! Per (node, predicate) the allocator moves through: embedded (count below
//! `embedded_child_nodes`) -> first overflow (index item created, pool
//! allocated) -> pool active (children routed to the least-loaded block) ->
//! pool full -> rotation (a new overflow *item* opened inside an existing
//! block via the sort-key sequence suffix).
//!
//! Selection is a read-then-write sequence and is the one genuine race in
//! the system. Occupancy accounting therefore goes through conditional
//! element writes (compare-and-swap on the observed counter) with a bounded
//! retry; after the retries are exhausted the allocator forces growth or
//! rotation without re-validating, trading exact accounting for progress.
//! The hard capacity bounds are enforced by the propagation engine's
//! conditional appends, not by these counters.

use tracing::{debug, trace, warn};

use super::block::{col, EdgeStatus, OverflowIndex};
use super::GraphStore;
use crate::error::{GraphError, Result};
use crate::store::{AttrValue, Condition, ItemKey, Num, UpdateBuilder};
use crate::types::{SortKey, Uid};

/// Reselection attempts before the allocator forces growth or rotation.
pub(crate) const ALLOC_RETRY_MAX: usize = 4;

/// Whether a target is the parent item itself or an overflow block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// The child embeds directly in the parent's predicate item.
    Embedded,
    /// The child lands in an overflow block.
    Overflow,
}

/// A resolved propagation target: which item the next append lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropagationTarget {
    /// UID of the item owner: the parent for embedded targets, the overflow
    /// block otherwise.
    pub uid: Uid,
    /// Item sequence within the block (1-based; always 1 for embedded).
    pub seq: u32,
    /// Target classification.
    pub kind: TargetKind,
}

impl PropagationTarget {
    /// Target for embedding into the parent's own predicate item.
    pub fn embedded(parent: Uid) -> Self {
        Self {
            uid: parent,
            seq: 1,
            kind: TargetKind::Embedded,
        }
    }

    /// Target for an overflow block's current item.
    pub fn overflow(block: Uid, seq: u32) -> Self {
        Self {
            uid: block,
            seq,
            kind: TargetKind::Overflow,
        }
    }

    /// True when the target is the parent item itself.
    pub fn is_embedded(&self) -> bool {
        self.kind == TargetKind::Embedded
    }

    /// Sort key of the edge item this target addresses.
    pub fn edge_sortk(&self, sortk: &SortKey) -> SortKey {
        sortk.with_seq(self.seq)
    }

    /// Sort key of the propagated-scalar item this target addresses for the
    /// given attribute short code.
    pub fn scalar_sortk(&self, sortk: &SortKey, short_code: &str) -> SortKey {
        sortk.scalar(short_code).with_seq(self.seq)
    }
}

impl GraphStore {
    /// Resolves where the next child of `(parent, sortk)` lands.
    ///
    /// While the parent's attached count is below the embedded capacity the
    /// parent item itself is the target. Past it, a block with spare
    /// capacity is reserved from the overflow index, growing or rotating the
    /// pool as required.
    pub fn resolve_target(&self, parent: Uid, sortk: &SortKey) -> Result<PropagationTarget> {
        let embedded_cap = self.cfg.embedded_child_nodes as i64;
        let cnt = self
            .fetch_data_item(parent, sortk)?
            .map_or(0, |item| item.cnt());
        if cnt < embedded_cap {
            trace!(parent = %parent, cnt, "ovfl.target.embedded");
            return Ok(PropagationTarget::embedded(parent));
        }
        self.resolve_overflow_target(parent, sortk)
    }

    /// Resolves an overflow target directly, bypassing the embedded-count
    /// check. Used when the primary item rejected an append on size even
    /// though its count is below the embedded capacity.
    pub(crate) fn resolve_overflow_target(
        &self,
        parent: Uid,
        sortk: &SortKey,
    ) -> Result<PropagationTarget> {
        let batch_limit = self.cfg.ovfw_batch_limit as i64;
        for attempt in 0..ALLOC_RETRY_MAX {
            let Some(index) = self.fetch_overflow_index(parent, sortk)? else {
                self.create_overflow_index(parent, sortk)?;
                continue;
            };

            if let Some(pos) = index.select(batch_limit) {
                let slot = index.blocks()[pos];
                if self.reserve_slot(&index, pos)? {
                    trace!(parent = %parent, block = %slot.uid, seq = slot.seq, occ = slot.occ + 1, "ovfl.target.reserved");
                    return Ok(PropagationTarget::overflow(slot.uid, slot.seq as u32));
                }
                trace!(attempt, "ovfl.reserve.conflict");
                continue;
            }

            if index.blocks().len() < self.cfg.max_ovfl_blocks {
                self.grow_pool(parent, sortk, &index)?;
                continue;
            }

            // Pool at ceiling with every current item full: open a new item
            // inside the block that has rotated least.
            let pos = self.rotation_position(&index)?;
            if let Some(new_seq) = self.rotate_block(&index, pos)? {
                let block = index.blocks()[pos].uid;
                debug!(parent = %parent, block = %block, seq = new_seq, "ovfl.rotated");
                return Ok(PropagationTarget::overflow(block, new_seq));
            }
            trace!(attempt, "ovfl.rotate.conflict");
        }

        self.force_expand(parent, sortk)
    }

    fn rotation_position(&self, index: &OverflowIndex) -> Result<usize> {
        index
            .rotation_candidate()
            .ok_or_else(|| GraphError::Inconsistent {
                routine: "resolve_target",
                key: index.key().clone(),
                reason: "overflow index holds an empty pool".to_owned(),
            })
    }

    /// Allocates fresh block UIDs for a new or growing pool.
    fn allocate_block_uids(&self, existing: usize) -> Vec<Uid> {
        let grow_by = self.cfg.ovfl_blocks_grow_by.max(1);
        let room = self.cfg.max_ovfl_blocks.saturating_sub(existing).max(1);
        (0..grow_by.min(room)).map(|_| Uid::new()).collect()
    }

    /// Creates the overflow index item with its first block allocation.
    ///
    /// A lost create race is benign: the winner's pool is re-read on the next
    /// resolution attempt. Blocks are registered in the parent item only by
    /// the writer that actually created them.
    fn create_overflow_index(&self, parent: Uid, sortk: &SortKey) -> Result<()> {
        let routine = "create_overflow_index";
        let uids = self.allocate_block_uids(0);
        let key = ItemKey::new(parent, &sortk.index());
        let update = UpdateBuilder::new(routine)
            .set(
                col::BID,
                AttrValue::BinList(uids.iter().map(|u| u.as_bytes().to_vec()).collect()),
            )
            .set(
                col::OCC,
                AttrValue::NumList(vec![Num::Int(0); uids.len()]),
            )
            .set(
                col::SEQ,
                AttrValue::NumList(vec![Num::Int(1); uids.len()]),
            )
            .condition(Condition::AttrNotExists(col::BID))
            .build()?;
        match self.write_item(routine, &key, &update) {
            Ok(()) => {
                debug!(parent = %parent, blocks = uids.len(), "ovfl.index.created");
                self.register_blocks(parent, sortk, &uids)
            }
            Err(GraphError::ConditionalCheckFailed { .. }) => {
                trace!(parent = %parent, "ovfl.index.create_raced");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Grows the pool by the configured increment, guarded by the observed
    /// pool length so concurrent growers add at most one increment.
    fn grow_pool(&self, parent: Uid, sortk: &SortKey, index: &OverflowIndex) -> Result<()> {
        let routine = "grow_pool";
        let uids = self.allocate_block_uids(index.blocks().len());
        let update = UpdateBuilder::new(routine)
            .append(
                col::BID,
                AttrValue::BinList(uids.iter().map(|u| u.as_bytes().to_vec()).collect()),
            )
            .append(
                col::OCC,
                AttrValue::NumList(vec![Num::Int(0); uids.len()]),
            )
            .append(
                col::SEQ,
                AttrValue::NumList(vec![Num::Int(1); uids.len()]),
            )
            .condition(Condition::ListLenEq(col::BID, index.blocks().len()))
            .build()?;
        match self.write_item(routine, index.key(), &update) {
            Ok(()) => {
                debug!(parent = %parent, added = uids.len(), pool = index.blocks().len() + uids.len(), "ovfl.pool.grown");
                self.register_blocks(parent, sortk, &uids)
            }
            Err(GraphError::ConditionalCheckFailed { .. }) => {
                trace!(parent = %parent, "ovfl.pool.grow_raced");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers newly allocated block UIDs as pointer slots in the parent
    /// predicate item (`XF = OvflBlockUid`, no count change).
    ///
    /// When the parent item itself has no room left for pointer slots the
    /// registration is dropped with a warning; the overflow index remains the
    /// authoritative block list and the read path resolves blocks through it.
    fn register_blocks(&self, parent: Uid, sortk: &SortKey, uids: &[Uid]) -> Result<()> {
        let routine = "register_blocks";
        let key = ItemKey::new(parent, sortk);
        let bins = AttrValue::BinList(uids.iter().map(|u| u.as_bytes().to_vec()).collect());
        let statuses = AttrValue::NumList(vec![
            Num::Int(EdgeStatus::OvflBlockUid.to_raw());
            uids.len()
        ]);
        let append = UpdateBuilder::new(routine)
            .append(col::ND, bins.clone())
            .append(col::XF, statuses.clone())
            .build()?;
        let init = UpdateBuilder::new(routine)
            .set(col::ND, bins)
            .set(col::XF, statuses)
            .set(col::CNT, AttrValue::Num(Num::Int(0)))
            .condition(Condition::AttrNotExists(col::ND))
            .build()?;
        match self.apply_with_init(routine, &key, &append, &init) {
            Err(GraphError::ItemSizeExceeded { .. }) => {
                warn!(parent = %parent, blocks = uids.len(), "ovfl.register.no_room");
                Ok(())
            }
            other => other,
        }
    }

    /// Reserves one child slot in the block's current item: a compare-and-swap
    /// on the occupancy counter. Returns false when the counter moved.
    fn reserve_slot(&self, index: &OverflowIndex, pos: usize) -> Result<bool> {
        let routine = "reserve_slot";
        let slot = index.blocks()[pos];
        let update = UpdateBuilder::new(routine)
            .set_elem(col::OCC, pos, AttrValue::Num(Num::Int(slot.occ + 1)))
            .condition(Condition::ElemEq(
                col::OCC,
                pos,
                AttrValue::Num(Num::Int(slot.occ)),
            ))
            .build()?;
        match self.write_item(routine, index.key(), &update) {
            Ok(()) => Ok(true),
            Err(GraphError::ConditionalCheckFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Opens the next item in a block: bumps its sequence and resets the
    /// occupancy to 1, reserving the first slot for the caller. Conditional
    /// on the observed sequence; returns `None` when another writer rotated
    /// first.
    fn rotate_block(&self, index: &OverflowIndex, pos: usize) -> Result<Option<u32>> {
        let routine = "rotate_block";
        let slot = index.blocks()[pos];
        let update = UpdateBuilder::new(routine)
            .set_elem(col::SEQ, pos, AttrValue::Num(Num::Int(slot.seq + 1)))
            .set_elem(col::OCC, pos, AttrValue::Num(Num::Int(1)))
            .condition(Condition::ElemEq(
                col::SEQ,
                pos,
                AttrValue::Num(Num::Int(slot.seq)),
            ))
            .build()?;
        match self.write_item(routine, index.key(), &update) {
            Ok(()) => Ok(Some((slot.seq + 1) as u32)),
            Err(GraphError::ConditionalCheckFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fallback after the bounded retries lost every race: take capacity
    /// without re-validating. Accounting may drift by a few slots; the
    /// engine's conditional appends still hold the hard bounds.
    fn force_expand(&self, parent: Uid, sortk: &SortKey) -> Result<PropagationTarget> {
        let routine = "force_expand";
        debug!(parent = %parent, "ovfl.force_expand");

        let index = match self.fetch_overflow_index(parent, sortk)? {
            Some(index) => index,
            None => {
                self.create_overflow_index(parent, sortk)?;
                self.fetch_overflow_index(parent, sortk)?.ok_or_else(|| {
                    GraphError::NoItemFound {
                        routine,
                        what: ItemKey::new(parent, &sortk.index()).to_string(),
                    }
                })?
            }
        };

        if index.blocks().len() < self.cfg.max_ovfl_blocks {
            self.grow_pool(parent, sortk, &index)?;
        }

        let fresh = self
            .fetch_overflow_index(parent, sortk)?
            .ok_or_else(|| GraphError::NoItemFound {
                routine,
                what: ItemKey::new(parent, &sortk.index()).to_string(),
            })?;
        let batch_limit = self.cfg.ovfw_batch_limit as i64;
        if let Some(pos) = fresh.select(batch_limit) {
            let slot = fresh.blocks()[pos];
            self.bump_occupancy(&fresh, pos, slot.occ + 1)?;
            return Ok(PropagationTarget::overflow(slot.uid, slot.seq as u32));
        }

        let pos = self.rotation_position(&fresh)?;
        let slot = fresh.blocks()[pos];
        let update = UpdateBuilder::new(routine)
            .set_elem(col::SEQ, pos, AttrValue::Num(Num::Int(slot.seq + 1)))
            .set_elem(col::OCC, pos, AttrValue::Num(Num::Int(1)))
            .build()?;
        self.write_item(routine, fresh.key(), &update)?;
        Ok(PropagationTarget::overflow(slot.uid, (slot.seq + 1) as u32))
    }

    /// Corrects the occupancy accounting after the engine's conditional
    /// append found an overflow item already at capacity: the counter is
    /// pushed to the batch limit so selection stops offering the item. Lost
    /// races are ignored; this is accounting, not a capacity gate.
    pub(crate) fn note_overflow_item_full(
        &self,
        parent: Uid,
        sortk: &SortKey,
        target: &PropagationTarget,
    ) -> Result<()> {
        let routine = "note_overflow_item_full";
        let Some(index) = self.fetch_overflow_index(parent, sortk)? else {
            return Ok(());
        };
        let Some(pos) = index.position_of(target.uid) else {
            return Ok(());
        };
        let slot = index.blocks()[pos];
        let batch_limit = self.cfg.ovfw_batch_limit as i64;
        if slot.seq as u32 != target.seq || slot.occ >= batch_limit {
            return Ok(());
        }
        let update = UpdateBuilder::new(routine)
            .set_elem(col::OCC, pos, AttrValue::Num(Num::Int(batch_limit)))
            .condition(Condition::ElemEq(
                col::OCC,
                pos,
                AttrValue::Num(Num::Int(slot.occ)),
            ))
            .build()?;
        match self.write_item(routine, index.key(), &update) {
            Ok(()) => {
                debug!(block = %target.uid, seq = target.seq, "ovfl.item.marked_full");
                Ok(())
            }
            Err(GraphError::ConditionalCheckFailed { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn bump_occupancy(&self, index: &OverflowIndex, pos: usize, to: i64) -> Result<()> {
        let routine = "bump_occupancy";
        let update = UpdateBuilder::new(routine)
            .set_elem(col::OCC, pos, AttrValue::Num(Num::Int(to)))
            .build()?;
        self.write_item(routine, index.key(), &update)
    }
}
