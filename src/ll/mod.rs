//! Low-level loop-nest IR and lowering (component E).

pub mod lower;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

pub use crate::hl::{Binop, Unop};
use crate::index::{AxisIndex, Symbol};

/// Where a `For-loop` drew its bound from, kept for trace/debug printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceIt {
    ProductSpace,
    ZeroFill,
}

#[derive(Debug, Clone)]
pub enum Code {
    Comment(String),
    Lines(Vec<Code>),
    ForLoop {
        index: Symbol,
        from: usize,
        to: usize,
        body: Box<Code>,
        trace_it: TraceIt,
    },
    ZeroOut(Symbol),
    Set {
        ptr: Symbol,
        idcs: Vec<AxisIndex>,
        expr: Expr,
    },
    SetLocal {
        scope: u64,
        expr: Expr,
    },
    DynamicIndices {
        tensor: Symbol,
        tensor_idcs: Vec<AxisIndex>,
        dyn_idcs: Vec<AxisIndex>,
        target_dims: Vec<usize>,
        body: Box<Code>,
        slice: Option<Box<Code>>,
    },
    /// Sequential composition of children after a merge/broadcast kernel
    /// fan-in: kept as a distinct variant
    /// purely for diagnostics, not a scheduling primitive of its own.
    Rebalance {
        label: Option<String>,
        children: Vec<Code>,
    },
    StagedCompilation(Box<Code>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant(f64),
    Get {
        ptr: Symbol,
        idcs: Vec<AxisIndex>,
    },
    GetLocal(u64),
    GetGlobal(String),
    LocalScope {
        id: u64,
        body: Box<Code>,
        orig_indices: Vec<AxisIndex>,
    },
    Binop(Binop, Box<Expr>, Box<Expr>),
    Unop(Unop, Box<Expr>),
}

impl Code {
    /// Flag maintained on the lhs node from the accum/op pattern: whether
    /// this assignment distributes over a surrounding sum,
    /// used by later passes deciding whether fetches may be lifted out of
    /// a summation.
    pub fn value_distributes_over_sum(accum: Binop, op: Binop) -> bool {
        matches!(accum, Binop::Add) && matches!(op, Binop::Mul | Binop::Arg1 | Binop::Arg2)
    }
}
