//! Pass 1 — visit analysis.
//!
//! Walks lowered LL code once, building one [`TracedTensor`] record per
//! tensor referenced, in program order.

use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::index::{AxisIndex, Symbol, SymbolFlavor};
use crate::ll::{Code, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRecord {
    Recurrent,
    Visits(u32),
}

#[derive(Debug, Clone, Default)]
pub struct TracedTensor {
    pub assignments_set: Vec<Vec<AxisIndex>>,
    pub accesses_map: HashMap<Vec<AxisIndex>, AccessRecord>,
    pub zero_initialized: bool,
    pub is_replicable: bool,
    pub last_write_non_update: bool,
    pub is_dynamic_slice: bool,
    /// Forced by the tensor-node table (out of scope here): a tensor
    /// already resident on the host with nonzero size is never virtual.
    pub forced_non_virtual: bool,
    /// Marked by the caller (via `compose::Visibility::DeviceOnly`), not
    /// derived from the walk itself: true when this tensor must never be
    /// copied back to the host.
    pub device_only: bool,
    /// The constant value this tensor provably always holds, if every
    /// write site is a literal `Constant` at index `[]`. `None` once any
    /// write contradicts that (non-constant expr, non-scalar index, or a
    /// differing literal).
    pub scalar: Option<f64>,
    /// True if any `Zero-out` touched this tensor at any point, not just
    /// as its first contact (see `zero_initialized` for that).
    pub zeroed_out: bool,
    /// True if the very first contact with this tensor was a `Get`, i.e.
    /// it was read before any `Set`/`Zero-out` wrote it.
    pub read_before_write: bool,
    /// True if this tensor was never the target of a `Set`/`Zero-out`.
    pub read_only: bool,
    /// Distinct right-hand-side expressions this tensor was ever set to
    /// (by `Debug` rendering, since `Expr` carries `f64` and has no
    /// `Eq`/`Hash` impl).
    pub rhs_set: Vec<String>,

    assigned_indices: HashSet<Vec<AxisIndex>>,
    touched: bool,
    last_write_was_rmw: bool,
    sequential_minibatch: bool,
    scalar_spoiled: bool,
}

impl TracedTensor {
    fn new(sequential_minibatch: bool) -> Self {
        TracedTensor {
            is_replicable: true,
            read_only: true,
            sequential_minibatch,
            ..Default::default()
        }
    }

    pub fn visits(&self, idcs: &[AxisIndex]) -> Option<AccessRecord> {
        self.accesses_map.get(idcs).copied()
    }

    /// A candidate virtual tensor per the eligibility filter: visits-bounded,
    /// and not forced non-virtual by the host table.
    pub fn is_virtual_candidate(&self, max_visits: u32) -> bool {
        if self.forced_non_virtual {
            return false;
        }
        self.accesses_map.values().all(|record| match record {
            AccessRecord::Recurrent => true,
            AccessRecord::Visits(n) => *n <= max_visits,
        })
    }
}

#[derive(Debug, Default)]
pub struct VisitState {
    pub tensors: HashMap<u64, TracedTensor>,
    pub sequential_minibatch: bool,
}

impl VisitState {
    pub fn new(sequential_minibatch: bool) -> Self {
        VisitState {
            tensors: HashMap::new(),
            sequential_minibatch,
        }
    }

    fn entry(&mut self, ptr: &Symbol) -> &mut TracedTensor {
        self.tensors
            .entry(ptr.id)
            .or_insert_with(|| TracedTensor::new(self.sequential_minibatch))
    }
}

fn symbol_forces_non_replicable(sym: &Symbol, sequential_minibatch: bool) -> bool {
    match sym.flavor() {
        SymbolFlavor::TaskId => true,
        SymbolFlavor::SampleNum => !sequential_minibatch,
        SymbolFlavor::Plain | SymbolFlavor::Frozen => false,
    }
}

fn idcs_force_non_replicable(idcs: &[AxisIndex], sequential_minibatch: bool) -> bool {
    idcs.iter().any(|idx| match idx {
        AxisIndex::Iterator(s) | AxisIndex::DynamicRecipient(s) | AxisIndex::FrozenRecipient(s) => {
            symbol_forces_non_replicable(s, sequential_minibatch)
        }
        AxisIndex::DynamicProvider { idcs, .. } => {
            idcs_force_non_replicable(idcs, sequential_minibatch)
        }
        AxisIndex::Fixed(_) => false,
    })
}

/// Records a `Get(ptr, idcs)` against the access map, applying the
/// recurrent/visits rule, then recurses into nested index expressions.
fn visit_get(state: &mut VisitState, ptr: &Symbol, idcs: &[AxisIndex]) {
    let sequential_minibatch = state.sequential_minibatch;
    let key = idcs.to_vec();
    let already_assigned = state
        .tensors
        .get(&ptr.id)
        .map(|t| t.assigned_indices.contains(&key))
        .unwrap_or(false);
    let first_contact = !state.tensors.contains_key(&ptr.id);
    let t = state.entry(ptr);
    if first_contact {
        t.read_before_write = true;
    }
    t.touched = true;
    if idcs_force_non_replicable(idcs, sequential_minibatch) {
        t.is_replicable = false;
    }
    let record = t.accesses_map.entry(key).or_insert(AccessRecord::Visits(0));
    if !already_assigned && matches!(record, AccessRecord::Visits(0)) {
        *record = AccessRecord::Recurrent;
    } else if let AccessRecord::Visits(n) = record {
        *n += 1;
    }
}

fn visit_expr(state: &mut VisitState, expr: &Expr) {
    match expr {
        Expr::Constant(_) | Expr::GetLocal(_) | Expr::GetGlobal(_) => {}
        Expr::Get { ptr, idcs } => visit_get(state, ptr, idcs),
        Expr::LocalScope { body, .. } => visit_code(state, body),
        Expr::Binop(_, a, b) => {
            visit_expr(state, a);
            visit_expr(state, b);
        }
        Expr::Unop(_, a) => visit_expr(state, a),
    }
}

fn visit_set(state: &mut VisitState, ptr: &Symbol, idcs: &[AxisIndex], expr: &Expr) {
    let was_rmw = expr_reads_same_cell(expr, ptr, idcs);
    let sequential_minibatch = state.sequential_minibatch;
    let lhs_forces_non_replicable = idcs_force_non_replicable(idcs, sequential_minibatch);
    visit_expr(state, expr);

    let key = idcs.to_vec();
    let rhs_repr = alloc::format!("{expr:?}");
    let t = state.entry(ptr);
    t.touched = true;
    t.read_only = false;
    if lhs_forces_non_replicable {
        t.is_replicable = false;
    }
    t.assignments_set.push(key.clone());
    t.assigned_indices.insert(key.clone());
    t.last_write_was_rmw = was_rmw;
    if !t.rhs_set.contains(&rhs_repr) {
        t.rhs_set.push(rhs_repr);
    }
    if !t.scalar_spoiled {
        match (key.is_empty(), expr) {
            (true, Expr::Constant(c)) if t.scalar.is_none() => t.scalar = Some(*c),
            (true, Expr::Constant(c)) if t.scalar == Some(*c) => {}
            _ => {
                t.scalar = None;
                t.scalar_spoiled = true;
            }
        }
    }
}

fn expr_reads_same_cell(expr: &Expr, ptr: &Symbol, idcs: &[AxisIndex]) -> bool {
    match expr {
        Expr::Get { ptr: p, idcs: i } => p.id == ptr.id && i == idcs,
        Expr::Binop(_, a, b) => {
            expr_reads_same_cell(a, ptr, idcs) || expr_reads_same_cell(b, ptr, idcs)
        }
        Expr::Unop(_, a) => expr_reads_same_cell(a, ptr, idcs),
        Expr::LocalScope { body, .. } => code_reads_cell(body, ptr, idcs),
        _ => false,
    }
}

fn code_reads_cell(code: &Code, ptr: &Symbol, idcs: &[AxisIndex]) -> bool {
    match code {
        Code::Set { expr, .. } => expr_reads_same_cell(expr, ptr, idcs),
        Code::Lines(lines) => lines.iter().any(|c| code_reads_cell(c, ptr, idcs)),
        Code::ForLoop { body, .. } => code_reads_cell(body, ptr, idcs),
        _ => false,
    }
}

fn visit_zero_out(state: &mut VisitState, ptr: &Symbol) {
    let first_contact = !state.tensors.contains_key(&ptr.id);
    let t = state.entry(ptr);
    if first_contact {
        t.zero_initialized = true;
    }
    t.touched = true;
    t.zeroed_out = true;
    t.read_only = false;
}

/// Walks `code` once in program order, updating `state` in place.
pub fn visit_code(state: &mut VisitState, code: &Code) {
    match code {
        Code::Comment(_) => {}
        Code::Lines(lines) => {
            for line in lines {
                visit_code(state, line);
            }
        }
        Code::ForLoop { body, .. } => visit_code(state, body),
        Code::ZeroOut(ptr) => visit_zero_out(state, ptr),
        Code::Set { ptr, idcs, expr } => visit_set(state, ptr, idcs, expr),
        Code::SetLocal { expr, .. } => visit_expr(state, expr),
        Code::DynamicIndices {
            tensor,
            body,
            slice,
            ..
        } => {
            let t = state.entry(tensor);
            if slice.is_some() {
                t.is_dynamic_slice = true;
            }
            visit_code(state, body);
            if let Some(slice_code) = slice {
                visit_code(state, slice_code);
            }
        }
        Code::Rebalance { children, .. } => {
            for child in children {
                visit_code(state, child);
            }
        }
        Code::StagedCompilation(inner) => visit_code(state, inner),
    }
}

/// Finalizes `last_write_non_update` for every touched tensor once the
/// walk over one program is complete.
pub fn finish_visit(state: &mut VisitState) {
    for t in state.tensors.values_mut() {
        t.last_write_non_update = !t.last_write_was_rmw;
    }
}
