//! Position allocator for board moves and removals.
//!
//! # Responsibility
//! - Compute the sibling order shifts that keep a column partition
//!   contiguous when one note enters, leaves, or moves inside it.
//! - Express shifts as range predicates so storage can apply each one as a
//!   single bulk update, independent of column size.
//!
//! # Invariants
//! - Pure computation: no storage access.
//! - A plan never shifts the moving note itself; storage excludes it by id.
//! - Target orders outside `0..=target_count` are rejected, never clamped.

use crate::model::note::BoardColumn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One note position on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub column: BoardColumn,
    pub order: i64,
}

impl Placement {
    pub fn new(column: BoardColumn, order: i64) -> Self {
        Self { column, order }
    }
}

/// Inclusive order range. `end: None` is unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRange {
    pub start: i64,
    pub end: Option<i64>,
}

impl OrderRange {
    /// Range `start..` with no upper bound.
    pub fn from(start: i64) -> Self {
        Self { start, end: None }
    }

    /// Range `start..=end`.
    pub fn between(start: i64, end: i64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn contains(&self, order: i64) -> bool {
        order >= self.start && self.end.map_or(true, |end| order <= end)
    }
}

/// Compensation rule applied to every active sibling in `column` whose order
/// falls in `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderShift {
    pub column: BoardColumn,
    pub range: OrderRange,
    /// `+1` opens a slot, `-1` closes a gap.
    pub delta: i64,
}

impl OrderShift {
    /// Applies this shift to one sibling placement, in memory.
    pub fn apply(&self, placement: Placement) -> Placement {
        if placement.column == self.column && self.range.contains(placement.order) {
            Placement::new(placement.column, placement.order + self.delta)
        } else {
            placement
        }
    }
}

/// Shifts plus the moving note's final placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    /// Applied in sequence; ranges of one plan never overlap within a column.
    pub shifts: Vec<OrderShift>,
    pub target: Placement,
}

/// Allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    /// Requested order is outside `0..=max`.
    OrderOutOfRange { requested: i64, max: i64 },
}

impl Display for AllocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderOutOfRange { requested, max } => {
                write!(f, "target order {requested} is outside 0..={max}")
            }
        }
    }
}

impl Error for AllocationError {}

/// Plans one move from `current` to `target`.
///
/// `target_count` is the number of active notes in `target.column`,
/// excluding the moving note. Returns `Ok(None)` when the placement is
/// unchanged.
pub fn plan_move(
    current: Placement,
    target: Placement,
    target_count: i64,
) -> Result<Option<MovePlan>, AllocationError> {
    if target.order < 0 || target.order > target_count {
        return Err(AllocationError::OrderOutOfRange {
            requested: target.order,
            max: target_count,
        });
    }

    if current == target {
        return Ok(None);
    }

    let shifts = if current.column != target.column {
        vec![
            plan_removal(current),
            OrderShift {
                column: target.column,
                range: OrderRange::from(target.order),
                delta: 1,
            },
        ]
    } else if current.order < target.order {
        vec![OrderShift {
            column: current.column,
            range: OrderRange::between(current.order + 1, target.order),
            delta: -1,
        }]
    } else {
        vec![OrderShift {
            column: current.column,
            range: OrderRange::between(target.order, current.order - 1),
            delta: 1,
        }]
    };

    Ok(Some(MovePlan { shifts, target }))
}

/// Plans the compaction left behind when the note at `current` leaves its
/// partition (archive or delete).
pub fn plan_removal(current: Placement) -> OrderShift {
    OrderShift {
        column: current.column,
        range: OrderRange::from(current.order + 1),
        delta: -1,
    }
}
