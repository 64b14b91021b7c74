//! The physical block model.
//!
//! Predicate items, overflow items, and propagated-scalar items all share one
//! item shape ([`DataItem`]): a set of scalar columns plus positionally
//! aligned lists. Index *i* of the edge list `Nd`, the status list `XF`, any
//! propagated scalar list, and the null-marker list `XBl` all refer to the
//! same logical child; accessors here verify that alignment and surface any
//! mismatch as a data-integrity fault.
//!
//! Edge statuses are a tagged variant with explicit classification functions;
//! nothing in this crate compares raw status numbers.

use crate::error::{GraphError, Result};
use crate::store::{AttrValue, Item, ItemKey, Num};
use crate::types::Uid;

/// Physical column names.
pub mod col {
    /// Edge list: child UIDs, or overflow-block UIDs for pointer slots.
    pub const ND: &str = "Nd";
    /// Edge status list, aligned with `Nd`.
    pub const XF: &str = "XF";
    /// Null-marker list, aligned with the propagated scalar lists.
    pub const XBL: &str = "XBl";
    /// Propagated string list (strings and datetimes).
    pub const LS: &str = "LS";
    /// Propagated numeric list (integers and floats).
    pub const LN: &str = "LN";
    /// Propagated binary list.
    pub const LB: &str = "LB";
    /// Propagated boolean list.
    pub const LBL: &str = "LBl";
    /// Attached-child counter.
    pub const CNT: &str = "cnt";
    /// Overflow item back-pointer to the owning node.
    pub const P: &str = "P";
    /// Scalar string column.
    pub const S: &str = "S";
    /// Scalar numeric column.
    pub const N: &str = "N";
    /// Scalar boolean column.
    pub const BL: &str = "Bl";
    /// Scalar binary column.
    pub const B: &str = "B";
    /// Scalar datetime column (RFC 3339 string).
    pub const DT: &str = "DT";
    /// Node-type tag used for type-based lookups.
    pub const TY: &str = "Ty";
    /// Overflow index: pool of overflow-block UIDs.
    pub const BID: &str = "Bid";
    /// Overflow index: occupancy of each block's current item.
    pub const OCC: &str = "Occ";
    /// Overflow index: current item sequence number per block.
    pub const SEQ: &str = "Seq";
}

/// Status of one `Nd` slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeStatus {
    /// Attached child.
    ChildUid,
    /// Child slot reserved by an in-flight attach.
    CuidInuse,
    /// Soft-deleted child; the slot still holds the child UID.
    UidDetached,
    /// The slot holds an overflow-block UID, not a child.
    OvflBlockUid,
    /// Overflow-block slot reserved by an in-flight attach.
    OuidInuse,
    /// Overflow block whose current item is full.
    OvflItemFull,
    /// Child excluded by a filter; routed separately from traversal.
    CuidFiltered,
}

impl EdgeStatus {
    /// Encodes the status as its stored number.
    pub fn to_raw(self) -> i64 {
        match self {
            EdgeStatus::ChildUid => 1,
            EdgeStatus::CuidInuse => 2,
            EdgeStatus::UidDetached => 3,
            EdgeStatus::OvflBlockUid => 4,
            EdgeStatus::OuidInuse => 5,
            EdgeStatus::OvflItemFull => 6,
            EdgeStatus::CuidFiltered => 7,
        }
    }

    /// Decodes a stored status number.
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            1 => Ok(EdgeStatus::ChildUid),
            2 => Ok(EdgeStatus::CuidInuse),
            3 => Ok(EdgeStatus::UidDetached),
            4 => Ok(EdgeStatus::OvflBlockUid),
            5 => Ok(EdgeStatus::OuidInuse),
            6 => Ok(EdgeStatus::OvflItemFull),
            7 => Ok(EdgeStatus::CuidFiltered),
            other => Err(GraphError::Unmarshaling {
                routine: "EdgeStatus::from_raw",
                reason: format!("unknown edge status {other}"),
            }),
        }
    }

    /// True when the slot holds a real child UID (attached, in-flight, or
    /// soft-deleted) and belongs in the child view of a split.
    pub fn is_attached_child(self) -> bool {
        matches!(
            self,
            EdgeStatus::ChildUid | EdgeStatus::CuidInuse | EdgeStatus::UidDetached
        )
    }

    /// True when the slot is an overflow artifact or filtered entry, to be
    /// routed separately from traversal.
    pub fn is_overflow_pointer(self) -> bool {
        !self.is_attached_child()
    }

    /// True for a soft-deleted child slot.
    pub fn is_detached(self) -> bool {
        self == EdgeStatus::UidDetached
    }
}

/// The `(Nd, XF)` pairs of one item, split into the two logical views.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeView {
    /// Real children with their per-child status.
    pub children: Vec<(Uid, EdgeStatus)>,
    /// Overflow-block pointers and filtered slots.
    pub pointers: Vec<(Uid, EdgeStatus)>,
}

/// One decoded item in the shared predicate/overflow/scalar shape.
///
/// All list columns are optional; which are present depends on what the item
/// is (an edge item carries `Nd`/`XF`, a propagated-scalar item carries one
/// value list plus `XBl`). Accessors return empty views for absent columns
/// and fail on alignment violations.
#[derive(Clone, Debug, PartialEq)]
pub struct DataItem {
    key: ItemKey,
    nd: Option<Vec<Uid>>,
    xf: Option<Vec<EdgeStatus>>,
    xbl: Option<Vec<bool>>,
    ls: Option<Vec<String>>,
    ln: Option<Vec<Num>>,
    lb: Option<Vec<Vec<u8>>>,
    lbl: Option<Vec<bool>>,
    cnt: Option<i64>,
    parent: Option<Uid>,
    s: Option<String>,
    n: Option<Num>,
    bl: Option<bool>,
    b: Option<Vec<u8>>,
    dt: Option<String>,
    ty: Option<String>,
}

fn unmarshal_err(column: &str, expected: &str, got: &AttrValue) -> GraphError {
    GraphError::Unmarshaling {
        routine: "DataItem::from_item",
        reason: format!("column {column}: expected {expected}, got {}", got.kind()),
    }
}

fn get_str(item: &Item, column: &str) -> Result<Option<String>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::Str(v)) => Ok(Some(v.clone())),
        Some(other) => Err(unmarshal_err(column, "Str", other)),
    }
}

fn get_num(item: &Item, column: &str) -> Result<Option<Num>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::Num(v)) => Ok(Some(*v)),
        Some(other) => Err(unmarshal_err(column, "Num", other)),
    }
}

fn get_int(item: &Item, column: &str) -> Result<Option<i64>> {
    match get_num(item, column)? {
        None => Ok(None),
        Some(num) => num.as_i64().map(Some).ok_or_else(|| GraphError::Unmarshaling {
            routine: "DataItem::from_item",
            reason: format!("column {column}: expected integer, got float"),
        }),
    }
}

fn get_bool(item: &Item, column: &str) -> Result<Option<bool>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::Bool(v)) => Ok(Some(*v)),
        Some(other) => Err(unmarshal_err(column, "Bool", other)),
    }
}

fn get_bin(item: &Item, column: &str) -> Result<Option<Vec<u8>>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::Bin(v)) => Ok(Some(v.clone())),
        Some(other) => Err(unmarshal_err(column, "Bin", other)),
    }
}

fn get_str_list(item: &Item, column: &str) -> Result<Option<Vec<String>>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::StrList(v)) => Ok(Some(v.clone())),
        Some(other) => Err(unmarshal_err(column, "StrList", other)),
    }
}

fn get_num_list(item: &Item, column: &str) -> Result<Option<Vec<Num>>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::NumList(v)) => Ok(Some(v.clone())),
        Some(other) => Err(unmarshal_err(column, "NumList", other)),
    }
}

fn get_bool_list(item: &Item, column: &str) -> Result<Option<Vec<bool>>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::BoolList(v)) => Ok(Some(v.clone())),
        Some(other) => Err(unmarshal_err(column, "BoolList", other)),
    }
}

fn get_bin_list(item: &Item, column: &str) -> Result<Option<Vec<Vec<u8>>>> {
    match item.get(column) {
        None => Ok(None),
        Some(AttrValue::BinList(v)) => Ok(Some(v.clone())),
        Some(other) => Err(unmarshal_err(column, "BinList", other)),
    }
}

fn get_uid_list(item: &Item, column: &str) -> Result<Option<Vec<Uid>>> {
    match get_bin_list(item, column)? {
        None => Ok(None),
        Some(raw) => raw
            .iter()
            .map(|bytes| Uid::from_slice(bytes))
            .collect::<Result<Vec<_>>>()
            .map(Some),
    }
}

impl DataItem {
    /// Decodes a raw stored item. Unknown columns are ignored; known columns
    /// of the wrong physical kind are unmarshaling errors.
    pub fn from_item(key: ItemKey, item: &Item) -> Result<Self> {
        let xf = match get_num_list(item, col::XF)? {
            None => None,
            Some(raw) => Some(
                raw.iter()
                    .map(|num| {
                        num.as_i64()
                            .ok_or_else(|| GraphError::Unmarshaling {
                                routine: "DataItem::from_item",
                                reason: "column XF: expected integer status".to_owned(),
                            })
                            .and_then(EdgeStatus::from_raw)
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        let parent = match get_bin(item, col::P)? {
            None => None,
            Some(bytes) => Some(Uid::from_slice(&bytes)?),
        };
        Ok(Self {
            nd: get_uid_list(item, col::ND)?,
            xf,
            xbl: get_bool_list(item, col::XBL)?,
            ls: get_str_list(item, col::LS)?,
            ln: get_num_list(item, col::LN)?,
            lb: get_bin_list(item, col::LB)?,
            lbl: get_bool_list(item, col::LBL)?,
            cnt: get_int(item, col::CNT)?,
            parent,
            s: get_str(item, col::S)?,
            n: get_num(item, col::N)?,
            bl: get_bool(item, col::BL)?,
            b: get_bin(item, col::B)?,
            dt: get_str(item, col::DT)?,
            ty: get_str(item, col::TY)?,
            key,
        })
    }

    /// The item's physical key.
    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    /// Attached-child counter; zero when the column is absent.
    pub fn cnt(&self) -> i64 {
        self.cnt.unwrap_or(0)
    }

    /// Back-pointer to the owning node, present on overflow items.
    pub fn parent(&self) -> Option<Uid> {
        self.parent
    }

    /// Scalar string field.
    pub fn string(&self) -> Option<&str> {
        self.s.as_deref()
    }

    /// Scalar numeric field.
    pub fn number(&self) -> Option<Num> {
        self.n
    }

    /// Scalar boolean field.
    pub fn boolean(&self) -> Option<bool> {
        self.bl
    }

    /// Scalar binary field.
    pub fn binary(&self) -> Option<&[u8]> {
        self.b.as_deref()
    }

    /// Scalar datetime field.
    pub fn datetime(&self) -> Option<&str> {
        self.dt.as_deref()
    }

    /// Node-type tag.
    pub fn node_type(&self) -> Option<&str> {
        self.ty.as_deref()
    }

    fn inconsistent(&self, routine: &'static str, reason: String) -> GraphError {
        GraphError::Inconsistent {
            routine,
            key: self.key.clone(),
            reason,
        }
    }

    /// The raw `(Nd, XF)` pairs, alignment-checked.
    pub fn raw_edges(&self) -> Result<(&[Uid], &[EdgeStatus])> {
        match (&self.nd, &self.xf) {
            (None, None) => Ok((&[], &[])),
            (Some(nd), Some(xf)) => {
                if nd.len() != xf.len() {
                    return Err(self.inconsistent(
                        "DataItem::raw_edges",
                        format!("len(Nd)={} != len(XF)={}", nd.len(), xf.len()),
                    ));
                }
                Ok((nd, xf))
            }
            (nd, xf) => Err(self.inconsistent(
                "DataItem::raw_edges",
                format!(
                    "Nd present={}, XF present={}",
                    nd.is_some(),
                    xf.is_some()
                ),
            )),
        }
    }

    /// Splits the edge list into attached children and overflow/artifact
    /// pointers.
    pub fn edges(&self) -> Result<EdgeView> {
        let (nd, xf) = self.raw_edges()?;
        let mut view = EdgeView::default();
        for (uid, status) in nd.iter().zip(xf) {
            if status.is_attached_child() {
                view.children.push((*uid, *status));
            } else {
                view.pointers.push((*uid, *status));
            }
        }
        Ok(view)
    }

    fn paired<'a, T>(
        &'a self,
        routine: &'static str,
        column: &str,
        values: &'a Option<Vec<T>>,
    ) -> Result<(&'a [T], &'a [bool])> {
        let Some(values) = values else {
            return Ok((&[], &[]));
        };
        let Some(flags) = &self.xbl else {
            return Err(self.inconsistent(
                routine,
                format!("{column} present without null-marker list XBl"),
            ));
        };
        if values.len() != flags.len() {
            return Err(self.inconsistent(
                routine,
                format!("len({column})={} != len(XBl)={}", values.len(), flags.len()),
            ));
        }
        if let Some(nd) = &self.nd {
            if values.len() != nd.len() {
                return Err(self.inconsistent(
                    routine,
                    format!("len({column})={} != len(Nd)={}", values.len(), nd.len()),
                ));
            }
        }
        Ok((values, flags))
    }

    /// Propagated numeric values paired with their null flags.
    pub fn numbers(&self) -> Result<(&[Num], &[bool])> {
        self.paired("DataItem::numbers", col::LN, &self.ln)
    }

    /// Propagated string values paired with their null flags.
    pub fn strings(&self) -> Result<(&[String], &[bool])> {
        self.paired("DataItem::strings", col::LS, &self.ls)
    }

    /// Propagated binary values paired with their null flags.
    pub fn binaries(&self) -> Result<(&[Vec<u8>], &[bool])> {
        self.paired("DataItem::binaries", col::LB, &self.lb)
    }

    /// Propagated boolean values paired with their null flags.
    pub fn booleans(&self) -> Result<(&[bool], &[bool])> {
        self.paired("DataItem::booleans", col::LBL, &self.lbl)
    }

    /// Runs every alignment check this item's columns allow.
    pub fn validate_alignment(&self) -> Result<()> {
        self.raw_edges()?;
        self.numbers()?;
        self.strings()?;
        self.binaries()?;
        self.booleans()?;
        Ok(())
    }
}

/// One slot of the overflow index: a block UID with the allocator's view of
/// its current item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverflowSlot {
    /// The overflow block's UID.
    pub uid: Uid,
    /// Occupancy of the block's current item, as accounted by reservations.
    pub occ: i64,
    /// Sequence number of the block's current item (1-based).
    pub seq: i64,
}

/// Decoded overflow index item for one (node, predicate).
#[derive(Clone, Debug, PartialEq)]
pub struct OverflowIndex {
    key: ItemKey,
    blocks: Vec<OverflowSlot>,
}

impl OverflowIndex {
    /// Decodes an index item. `Bid`, `Occ`, and `Seq` must be present and of
    /// equal length.
    pub fn from_item(key: ItemKey, item: &Item) -> Result<Self> {
        let routine = "OverflowIndex::from_item";
        let missing = |column: &str| GraphError::Unmarshaling {
            routine,
            reason: format!("index item missing column {column}"),
        };
        let ints = |column: &'static str, raw: Vec<Num>| -> Result<Vec<i64>> {
            raw.iter()
                .map(|num| {
                    num.as_i64().ok_or_else(|| GraphError::Unmarshaling {
                        routine,
                        reason: format!("column {column}: expected integer"),
                    })
                })
                .collect()
        };

        let bids = get_uid_list(item, col::BID)?.ok_or_else(|| missing(col::BID))?;
        let occ = ints(col::OCC, get_num_list(item, col::OCC)?.ok_or_else(|| missing(col::OCC))?)?;
        let seq = ints(col::SEQ, get_num_list(item, col::SEQ)?.ok_or_else(|| missing(col::SEQ))?)?;
        if bids.len() != occ.len() || bids.len() != seq.len() {
            return Err(GraphError::Inconsistent {
                routine,
                key,
                reason: format!(
                    "len(Bid)={} len(Occ)={} len(Seq)={}",
                    bids.len(),
                    occ.len(),
                    seq.len()
                ),
            });
        }

        let blocks = bids
            .into_iter()
            .zip(occ)
            .zip(seq)
            .map(|((uid, occ), seq)| OverflowSlot { uid, occ, seq })
            .collect();
        Ok(Self { key, blocks })
    }

    /// The index item's physical key.
    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    /// The block pool in allocation order.
    pub fn blocks(&self) -> &[OverflowSlot] {
        &self.blocks
    }

    /// Least-loaded block with spare capacity in its current item, ties
    /// broken by lowest pool index.
    pub fn select(&self, batch_limit: i64) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.occ < batch_limit)
            .min_by_key(|(idx, slot)| (slot.occ, *idx))
            .map(|(idx, _)| idx)
    }

    /// Rotation candidate: the block that has held the fewest items so far
    /// (lowest sequence), ties broken by lowest pool index.
    pub fn rotation_candidate(&self) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .min_by_key(|(idx, slot)| (slot.seq, *idx))
            .map(|(idx, _)| idx)
    }

    /// True when every block's current item is at capacity.
    pub fn is_saturated(&self, batch_limit: i64) -> bool {
        self.blocks.iter().all(|slot| slot.occ >= batch_limit)
    }

    /// Position of a block UID in the pool.
    pub fn position_of(&self, uid: Uid) -> Option<usize> {
        self.blocks.iter().position(|slot| slot.uid == uid)
    }
}
