//! Rows and their terminators/constraints.

use alloc::vec::Vec;

use super::dim::Dim;

/// How a row may be extended during unification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowTerminator {
    /// An open row-variable: more dims may be unified onto this row.
    RowVar(u64),
    /// Matches any prefix; missing leading axes fill with `Dim(1)` when
    /// closed against a longer row (broadcast closure).
    Broadcastable,
    /// Must match axis count exactly.
    Fixed,
}

/// A row-level size constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Unconstrained,
    TotalElems(usize),
}

/// An ordered list of dims, plus a constraint and a terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub dims: Vec<Dim>,
    pub constraint: Constraint,
    pub terminator: RowTerminator,
}

impl Row {
    pub fn fixed(dims: Vec<Dim>) -> Self {
        Row {
            dims,
            constraint: Constraint::Unconstrained,
            terminator: RowTerminator::Fixed,
        }
    }

    pub fn open(var_id: u64) -> Self {
        Row {
            dims: Vec::new(),
            constraint: Constraint::Unconstrained,
            terminator: RowTerminator::RowVar(var_id),
        }
    }

    pub fn broadcastable(dims: Vec<Dim>) -> Self {
        Row {
            dims,
            constraint: Constraint::Unconstrained,
            terminator: RowTerminator::Broadcastable,
        }
    }

    /// True once every dim is concrete and the terminator is closed
    /// (`Fixed`, or `Broadcastable` with no residual row-variable).
    pub fn is_resolved(&self) -> bool {
        matches!(self.terminator, RowTerminator::Fixed | RowTerminator::Broadcastable)
            && self.dims.iter().all(|d| !d.is_var())
    }

    pub fn to_dims(&self) -> Option<Vec<usize>> {
        if !self.is_resolved() {
            return None;
        }
        self.dims.iter().map(Dim::size).collect()
    }

    pub fn total_elems(&self) -> Option<usize> {
        self.to_dims().map(|dims| dims.iter().product())
    }
}
