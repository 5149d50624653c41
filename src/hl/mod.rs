//! High-level assignment IR (component D).
//!
//! `Code` is the tree composition-combinators build: `Par`/`ParHint`/`Seq`
//! differ only in their safety contract, not in structure.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::shape::Projections;

/// A tensor-node reference. The full tensor-node table (id allocation,
/// buffers, memory mode) is a front-end concern out of scope here; `Code`
/// only needs a stable handle plus a debug label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorRef {
    pub id: u64,
    pub debug_name: String,
}

impl TensorRef {
    pub fn new(id: u64, debug_name: impl Into<String>) -> Self {
        TensorRef {
            id,
            debug_name: debug_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binop {
    Arg1,
    Arg2,
    Add,
    Mul,
    ToPowOf,
    ReluGate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unop {
    Identity,
    Relu,
}

#[derive(Debug, Clone)]
pub enum FetchOp {
    Constant(f64),
    Synthetic(Box<Code>),
    Imported(String),
}

/// One high-level assignment-graph node.
#[derive(Debug, Clone)]
pub enum Code {
    /// Independent children: no ordering constraint between them.
    Par(Vec<Code>),
    /// Children may overlap in their writes/reads, but writes on the left
    /// must complete before reads on the right observe them.
    ParHint(Vec<Code>),
    /// Sequential composition: only a fusion hint, no independence promise.
    Seq(Vec<Code>),
    AccumBinop {
        zero_out: bool,
        accum: Binop,
        op: Binop,
        lhs: TensorRef,
        rhs1: TensorRef,
        rhs2: TensorRef,
        projections: Projections,
    },
    AccumUnop {
        zero_out: bool,
        accum: Binop,
        op: Unop,
        lhs: TensorRef,
        rhs: TensorRef,
        projections: Projections,
    },
    Fetch {
        target: TensorRef,
        op: FetchOp,
        /// The target's own `Fixed`-row iteration space, needed to lower
        /// `Constant`/`Synthetic` into a full loop nest.
        projections: Projections,
    },
    BlockComment(String, Box<Code>),
    Noop,
}

impl Code {
    fn lhs(&self) -> Option<&TensorRef> {
        match self {
            Code::AccumBinop { lhs, .. } | Code::AccumUnop { lhs, .. } => Some(lhs),
            Code::Fetch { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// `remove-updates(tensor, code)`: drops any `Accum-*`/`Fetch` whose lhs
/// equals `tensor`, used to strip initialization-only assignments.
pub fn remove_updates(tensor: &TensorRef, code: Code) -> Code {
    match code {
        Code::Par(children) => {
            Code::Par(children.into_iter().map(|c| remove_updates(tensor, c)).collect())
        }
        Code::ParHint(children) => {
            Code::ParHint(children.into_iter().map(|c| remove_updates(tensor, c)).collect())
        }
        Code::Seq(children) => {
            Code::Seq(children.into_iter().map(|c| remove_updates(tensor, c)).collect())
        }
        Code::BlockComment(msg, body) => {
            Code::BlockComment(msg, Box::new(remove_updates(tensor, *body)))
        }
        other => {
            if other.lhs() == Some(tensor) {
                Code::Noop
            } else {
                other
            }
        }
    }
}

/// List-fold constructor: builds a `Seq` from an ordered list of steps.
pub fn sequential(steps: Vec<Code>) -> Code {
    Code::Seq(steps)
}

/// List-fold constructor: builds a `Par` from an unordered list of steps.
pub fn all_parallel(steps: Vec<Code>) -> Code {
    Code::Par(steps)
}

/// Flattens nested `Par` (and, if `force_hints`, nested `ParHint`) into a
/// single list, preserving relative order.
pub fn flat_parallel(code: Code, force_hints: bool) -> Vec<Code> {
    match code {
        Code::Par(children) => children
            .into_iter()
            .flat_map(|c| flat_parallel(c, force_hints))
            .collect(),
        Code::ParHint(children) if force_hints => children
            .into_iter()
            .flat_map(|c| flat_parallel(c, force_hints))
            .collect(),
        other => alloc::vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_projections() -> Projections {
        Projections {
            product_space: Vec::new(),
            product_iterators: Vec::new(),
            lhs_dims: Vec::new(),
            rhs_dims: Vec::new(),
            project_lhs: Vec::new(),
            project_rhs: Vec::new(),
            debug_info: String::new(),
        }
    }

    fn noop_fetch(id: u64) -> Code {
        Code::Fetch {
            target: TensorRef::new(id, "t"),
            op: FetchOp::Constant(0.0),
            projections: empty_projections(),
        }
    }

    #[test]
    fn remove_updates_strips_only_the_matching_tensor() {
        let target = TensorRef::new(1, "t1");
        let other = TensorRef::new(2, "t2");
        let code = Code::Seq(alloc::vec![noop_fetch(1), noop_fetch(2)]);
        let cleaned = remove_updates(&target, code);
        match cleaned {
            Code::Seq(children) => {
                assert!(matches!(children[0], Code::Noop));
                assert_eq!(children[1].lhs(), Some(&other));
            }
            _ => panic!("expected Seq"),
        }
    }

    #[test]
    fn flat_parallel_flattens_nested_par_but_not_par_hint_by_default() {
        let code = Code::Par(alloc::vec![
            Code::Par(alloc::vec![noop_fetch(1), noop_fetch(2)]),
            Code::ParHint(alloc::vec![noop_fetch(3)]),
        ]);
        let flat = flat_parallel(code, false);
        assert_eq!(flat.len(), 2);
        assert!(matches!(flat[1], Code::ParHint(_)));
    }

    #[test]
    fn flat_parallel_force_hints_flattens_par_hint_too() {
        let code = Code::Par(alloc::vec![Code::ParHint(alloc::vec![noop_fetch(1), noop_fetch(2)])]);
        let flat = flat_parallel(code, true);
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn sequential_and_all_parallel_build_the_expected_shape() {
        assert!(matches!(sequential(alloc::vec![noop_fetch(1)]), Code::Seq(_)));
        assert!(matches!(all_parallel(alloc::vec![noop_fetch(1)]), Code::Par(_)));
    }
}
