//! Passes 2–4: candidate collection, inlining, cleanup.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use super::visit::{TracedTensor, VisitState};
use super::Settings;
use crate::index::{AxisIndex, Symbol};
use crate::ll::{Code, Expr};
use crate::session::Session;

/// Replaces the `raise`/`catch` pattern the original design used to
/// signal "can't virtualize this tensor".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualizationOutcome {
    NonVirtual,
    NonLiteral(String),
}

/// A saved write site for one virtual-candidate tensor: the exact index
/// pattern it was written at, and the expression that computed the value
/// (iterators in `lhs_idcs` are the substitution points at inline time).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub tensor_id: u64,
    pub lhs_idcs: Vec<AxisIndex>,
    pub value: Expr,
}

fn lhs_iterator_ids(idcs: &[AxisIndex]) -> HashMap<u64, ()> {
    idcs.iter()
        .filter_map(|idx| match idx {
            AxisIndex::Iterator(s) => Some((s.id, ())),
            _ => None,
        })
        .collect()
}

fn expr_iterator_refs(expr: &Expr, out: &mut Vec<Symbol>) {
    match expr {
        Expr::Get { idcs, .. } => {
            for idx in idcs {
                if let AxisIndex::Iterator(s) = idx {
                    out.push(s.clone());
                }
            }
        }
        Expr::Binop(_, a, b) => {
            expr_iterator_refs(a, out);
            expr_iterator_refs(b, out);
        }
        Expr::Unop(_, a) => expr_iterator_refs(a, out),
        Expr::LocalScope { body, .. } => code_iterator_refs(body, out),
        Expr::Constant(_) | Expr::GetLocal(_) | Expr::GetGlobal(_) => {}
    }
}

fn code_iterator_refs(code: &Code, out: &mut Vec<Symbol>) {
    match code {
        Code::Set { idcs, expr, .. } => {
            for idx in idcs {
                if let AxisIndex::Iterator(s) = idx {
                    out.push(s.clone());
                }
            }
            expr_iterator_refs(expr, out);
        }
        Code::Lines(lines) => lines.iter().for_each(|c| code_iterator_refs(c, out)),
        Code::ForLoop { body, .. } => code_iterator_refs(body, out),
        _ => {}
    }
}

/// Finds the single `Set` node writing `tensor_id` within `code`, per the
/// simplified model of one write site per virtual candidate.
///
/// Only recurses into a `Dynamic-indices` wrapper's body when
/// `always_inline_dynamic_indexing` is set: otherwise a write site nested
/// under dynamic indexing is left unfound, so the candidate demotes to
/// `NonVirtual` rather than being inlined somewhere its dynamic-provider
/// context wouldn't reproduce.
fn find_write_site<'a>(
    code: &'a Code,
    tensor_id: u64,
    always_inline_dynamic_indexing: bool,
) -> Option<(&'a [AxisIndex], &'a Expr)> {
    match code {
        Code::Set { ptr, idcs, expr } if ptr.id == tensor_id => Some((idcs, expr)),
        Code::Lines(lines) => lines
            .iter()
            .find_map(|c| find_write_site(c, tensor_id, always_inline_dynamic_indexing)),
        Code::ForLoop { body, .. } => find_write_site(body, tensor_id, always_inline_dynamic_indexing),
        Code::DynamicIndices { body, .. } if always_inline_dynamic_indexing => {
            find_write_site(body, tensor_id, always_inline_dynamic_indexing)
        }
        _ => None,
    }
}

/// Pass 2: for each virtual candidate (eligible per [`TracedTensor`]),
/// collects its write site and disqualifies it if the lhs has a
/// non-linear index or the body references an iterator that escapes the
/// lhs's own substitution points.
pub fn collect_candidates(
    state: &VisitState,
    code: &Code,
    settings: &Settings,
) -> HashMap<u64, Result<Candidate, VirtualizationOutcome>> {
    let mut out = HashMap::new();
    for (&tensor_id, traced) in &state.tensors {
        out.insert(tensor_id, collect_one(traced, tensor_id, code, settings));
    }
    out
}

fn collect_one(
    traced: &TracedTensor,
    tensor_id: u64,
    code: &Code,
    settings: &Settings,
) -> Result<Candidate, VirtualizationOutcome> {
    if !traced.is_virtual_candidate(settings.max_visits) {
        return Err(VirtualizationOutcome::NonVirtual);
    }
    let Some((idcs, expr)) = find_write_site(code, tensor_id, settings.always_inline_dynamic_indexing) else {
        return Err(VirtualizationOutcome::NonVirtual);
    };
    let non_linear = idcs
        .iter()
        .any(|idx| !matches!(idx, AxisIndex::Fixed(_) | AxisIndex::Iterator(_)));
    if non_linear {
        return Err(VirtualizationOutcome::NonLiteral(format!(
            "tensor #{tensor_id} has a non-linear lhs index"
        )));
    }
    let bound = lhs_iterator_ids(idcs);
    let mut refs = Vec::new();
    expr_iterator_refs(expr, &mut refs);
    if refs.iter().any(|s| !bound.contains_key(&s.id)) {
        return Err(VirtualizationOutcome::NonLiteral(format!(
            "tensor #{tensor_id}'s write block references an iterator not bound by its own indices"
        )));
    }
    Ok(Candidate {
        tensor_id,
        lhs_idcs: idcs.to_vec(),
        value: expr.clone(),
    })
}

fn substitute_idcs(idcs: &[AxisIndex], subst: &HashMap<u64, AxisIndex>) -> Vec<AxisIndex> {
    idcs.iter()
        .map(|idx| match idx {
            AxisIndex::Iterator(s) => subst.get(&s.id).cloned().unwrap_or_else(|| idx.clone()),
            other => other.clone(),
        })
        .collect()
}

fn substitute_expr(expr: &Expr, subst: &HashMap<u64, AxisIndex>, session: &mut Session) -> Expr {
    match expr {
        Expr::Get { ptr, idcs } => Expr::Get {
            ptr: ptr.clone(),
            idcs: substitute_idcs(idcs, subst),
        },
        Expr::Binop(op, a, b) => Expr::Binop(
            *op,
            Box::new(substitute_expr(a, subst, session)),
            Box::new(substitute_expr(b, subst, session)),
        ),
        Expr::Unop(op, a) => Expr::Unop(*op, Box::new(substitute_expr(a, subst, session))),
        Expr::LocalScope {
            id,
            body,
            orig_indices,
        } => Expr::LocalScope {
            id: *id,
            body: Box::new(substitute_code(body, subst, session)),
            orig_indices: substitute_idcs(orig_indices, subst),
        },
        other => other.clone(),
    }
}

/// α-renames `For-loop` binders to fresh symbols while substituting, so
/// repeated inlining at different call sites cannot capture.
fn substitute_code(code: &Code, subst: &HashMap<u64, AxisIndex>, session: &mut Session) -> Code {
    match code {
        Code::ForLoop {
            index,
            from,
            to,
            body,
            trace_it,
        } => {
            let fresh = Symbol::new(session.alloc_symbol_id(), index.label.clone());
            let mut inner_subst = subst.clone();
            inner_subst.insert(index.id, AxisIndex::Iterator(fresh.clone()));
            Code::ForLoop {
                index: fresh,
                from: *from,
                to: *to,
                body: Box::new(substitute_code(body, &inner_subst, session)),
                trace_it: *trace_it,
            }
        }
        Code::Set { ptr, idcs, expr } => Code::Set {
            ptr: ptr.clone(),
            idcs: substitute_idcs(idcs, subst),
            expr: substitute_expr(expr, subst, session),
        },
        Code::Lines(lines) => Code::Lines(
            lines
                .iter()
                .map(|c| substitute_code(c, subst, session))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Pass 3: replaces every `Get(t, call_idcs)` for a still-virtual `t`
/// with a `Local-scope` wrapping its saved write expression, iterators
/// substituted position-wise by the caller's index expression.
///
/// A call site whose non-iterator lhs positions don't match the
/// candidate's own exactly is left un-inlined rather than disqualifying
/// the candidate globally.
pub fn inline_pass(
    code: &Code,
    candidates: &HashMap<u64, Candidate>,
    session: &mut Session,
) -> Code {
    match code {
        Code::Set { ptr, idcs, expr } => Code::Set {
            ptr: ptr.clone(),
            idcs: idcs.clone(),
            expr: inline_expr(expr, candidates, session),
        },
        Code::SetLocal { scope, expr } => Code::SetLocal {
            scope: *scope,
            expr: inline_expr(expr, candidates, session),
        },
        Code::Lines(lines) => Code::Lines(
            lines
                .iter()
                .map(|c| inline_pass(c, candidates, session))
                .collect(),
        ),
        Code::ForLoop {
            index,
            from,
            to,
            body,
            trace_it,
        } => Code::ForLoop {
            index: index.clone(),
            from: *from,
            to: *to,
            body: Box::new(inline_pass(body, candidates, session)),
            trace_it: *trace_it,
        },
        Code::DynamicIndices {
            tensor,
            tensor_idcs,
            dyn_idcs,
            target_dims,
            body,
            slice,
        } => Code::DynamicIndices {
            tensor: tensor.clone(),
            tensor_idcs: tensor_idcs.clone(),
            dyn_idcs: dyn_idcs.clone(),
            target_dims: target_dims.clone(),
            body: Box::new(inline_pass(body, candidates, session)),
            slice: slice
                .as_ref()
                .map(|s| Box::new(inline_pass(s, candidates, session))),
        },
        other => other.clone(),
    }
}

fn inline_expr(expr: &Expr, candidates: &HashMap<u64, Candidate>, session: &mut Session) -> Expr {
    match expr {
        Expr::Get { ptr, idcs } => {
            if let Some(candidate) = candidates.get(&ptr.id) {
                if let Some(subst) = positional_match(&candidate.lhs_idcs, idcs) {
                    let id = session.alloc_scope_id();
                    let body = substitute_expr(&candidate.value, &subst, session);
                    return Expr::LocalScope {
                        id,
                        body: Box::new(Code::SetLocal { scope: id, expr: body }),
                        orig_indices: idcs.clone(),
                    };
                }
            }
            Expr::Get {
                ptr: ptr.clone(),
                idcs: idcs.clone(),
            }
        }
        Expr::Binop(op, a, b) => Expr::Binop(
            *op,
            Box::new(inline_expr(a, candidates, session)),
            Box::new(inline_expr(b, candidates, session)),
        ),
        Expr::Unop(op, a) => Expr::Unop(*op, Box::new(inline_expr(a, candidates, session))),
        other => other.clone(),
    }
}

/// Builds the iterator → caller-index substitution map, or `None` if a
/// non-iterator lhs position doesn't match the call site exactly.
fn positional_match(lhs_idcs: &[AxisIndex], call_idcs: &[AxisIndex]) -> Option<HashMap<u64, AxisIndex>> {
    if lhs_idcs.len() != call_idcs.len() {
        return None;
    }
    let mut subst = HashMap::new();
    for (lhs, call) in lhs_idcs.iter().zip(call_idcs.iter()) {
        match lhs {
            AxisIndex::Iterator(s) => {
                subst.insert(s.id, call.clone());
            }
            other => {
                if other != call {
                    return None;
                }
            }
        }
    }
    Some(subst)
}

/// Pass 4: removes the original write sites of every virtualized tensor,
/// and (when `scalars` names a tensor) replaces every remaining `Get` of
/// that tensor with its proven literal.
pub fn cleanup(code: &Code, virtualized: &[u64], scalars: &HashMap<u64, f64>) -> Code {
    match code {
        Code::Set { ptr, .. } if virtualized.contains(&ptr.id) => Code::Lines(Vec::new()),
        Code::Set { ptr, idcs, expr } => Code::Set {
            ptr: ptr.clone(),
            idcs: idcs.clone(),
            expr: cleanup_expr(expr, scalars),
        },
        Code::SetLocal { scope, expr } => Code::SetLocal {
            scope: *scope,
            expr: cleanup_expr(expr, scalars),
        },
        Code::Lines(lines) => Code::Lines(lines.iter().map(|c| cleanup(c, virtualized, scalars)).collect()),
        Code::ForLoop {
            index,
            from,
            to,
            body,
            trace_it,
        } => Code::ForLoop {
            index: index.clone(),
            from: *from,
            to: *to,
            body: Box::new(cleanup(body, virtualized, scalars)),
            trace_it: *trace_it,
        },
        Code::DynamicIndices {
            tensor,
            tensor_idcs,
            dyn_idcs,
            target_dims,
            body,
            slice,
        } => Code::DynamicIndices {
            tensor: tensor.clone(),
            tensor_idcs: tensor_idcs.clone(),
            dyn_idcs: dyn_idcs.clone(),
            target_dims: target_dims.clone(),
            body: Box::new(cleanup(body, virtualized, scalars)),
            slice: slice.as_ref().map(|s| Box::new(cleanup(s, virtualized, scalars))),
        },
        other => other.clone(),
    }
}

/// Replaces `Get(ptr, [])` with its literal when `ptr` is a proven scalar.
fn cleanup_expr(expr: &Expr, scalars: &HashMap<u64, f64>) -> Expr {
    match expr {
        Expr::Get { ptr, idcs } if idcs.is_empty() => match scalars.get(&ptr.id) {
            Some(value) => Expr::Constant(*value),
            None => expr.clone(),
        },
        Expr::Binop(op, a, b) => Expr::Binop(
            *op,
            Box::new(cleanup_expr(a, scalars)),
            Box::new(cleanup_expr(b, scalars)),
        ),
        Expr::Unop(op, a) => Expr::Unop(*op, Box::new(cleanup_expr(a, scalars))),
        Expr::LocalScope {
            id,
            body,
            orig_indices,
        } => Expr::LocalScope {
            id: *id,
            body: Box::new(cleanup(body, &[], scalars)),
            orig_indices: orig_indices.clone(),
        },
        other => other.clone(),
    }
}
