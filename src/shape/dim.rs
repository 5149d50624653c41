//! Dims.

use alloc::string::String;

use crate::index::ProjId;

/// Either a dim-variable (to be solved by unification) or a concrete,
/// sized dim tagged with its projection-equivalence-class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Var { id: u64, label: Option<String> },
    Concrete {
        size: usize,
        proj_id: ProjId,
        label: Option<String>,
    },
}

impl Dim {
    pub fn var(id: u64) -> Self {
        Dim::Var { id, label: None }
    }

    pub fn labeled_var(id: u64, label: impl Into<String>) -> Self {
        Dim::Var {
            id,
            label: Some(label.into()),
        }
    }

    pub fn concrete(size: usize, proj_id: ProjId) -> Self {
        Dim::Concrete {
            size,
            proj_id,
            label: None,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Dim::Var { .. })
    }

    pub fn size(&self) -> Option<usize> {
        match self {
            Dim::Concrete { size, .. } => Some(*size),
            Dim::Var { .. } => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Dim::Var { label, .. } | Dim::Concrete { label, .. } => label.as_deref(),
        }
    }
}
