//! Pass 5 — algebraic simplification to a fixpoint.
//!
//! Rewrites are applied bottom-up, repeating the whole pass until a round
//! produces no change. Must never alter observable behavior on a
//! non-virtual tensor — every rewrite here preserves the value computed,
//! it only removes redundant structure.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::hl::{Binop, Unop};
use crate::ll::{Code, Expr};

/// Runs [`simplify_code`] repeatedly until the tree stops changing.
///
/// `optimize_integer_pow` gates the `ToPowOf`-unrolling rewrite: when set,
/// a scalar-integer exponent unrolls into a product chain (a negative
/// exponent becomes `chain ^ -1`).
pub fn simplify_fixpoint(code: &Code, optimize_integer_pow: bool) -> Code {
    let mut current = code.clone();
    loop {
        let next = simplify_code(&current, optimize_integer_pow);
        if codes_equal(&next, &current) {
            return next;
        }
        current = next;
    }
}

fn simplify_code(code: &Code, optimize_integer_pow: bool) -> Code {
    match code {
        Code::Lines(lines) => {
            let simplified: Vec<Code> = lines
                .iter()
                .map(|c| simplify_code(c, optimize_integer_pow))
                .filter(|c| !is_empty_lines(c))
                .collect();
            Code::Lines(simplified)
        }
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
            body: Box::new(simplify_code(body, optimize_integer_pow)),
            trace_it: *trace_it,
        },
        Code::Set { ptr, idcs, expr } => Code::Set {
            ptr: ptr.clone(),
            idcs: idcs.clone(),
            expr: simplify_expr(expr, optimize_integer_pow),
        },
        Code::SetLocal { scope, expr } => Code::SetLocal {
            scope: *scope,
            expr: simplify_expr(expr, optimize_integer_pow),
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
            body: Box::new(simplify_code(body, optimize_integer_pow)),
            slice: slice.as_ref().map(|s| Box::new(simplify_code(s, optimize_integer_pow))),
        },
        Code::Rebalance { label, children } => Code::Rebalance {
            label: label.clone(),
            children: children.iter().map(|c| simplify_code(c, optimize_integer_pow)).collect(),
        },
        Code::StagedCompilation(inner) => {
            Code::StagedCompilation(Box::new(simplify_code(inner, optimize_integer_pow)))
        }
        other => other.clone(),
    }
}

fn is_empty_lines(code: &Code) -> bool {
    matches!(code, Code::Lines(lines) if lines.is_empty())
}

fn simplify_expr(expr: &Expr, optimize_integer_pow: bool) -> Expr {
    match expr {
        Expr::Unop(Unop::Identity, inner) => simplify_expr(inner, optimize_integer_pow),
        Expr::Unop(op, inner) => Expr::Unop(*op, Box::new(simplify_expr(inner, optimize_integer_pow))),
        Expr::Binop(op, a, b) => {
            let a = simplify_expr(a, optimize_integer_pow);
            let b = simplify_expr(b, optimize_integer_pow);
            simplify_binop(*op, a, b, optimize_integer_pow)
        }
        Expr::LocalScope {
            id,
            body,
            orig_indices,
        } => simplify_local_scope(*id, body, orig_indices, optimize_integer_pow),
        other => other.clone(),
    }
}

/// Exponents with a larger magnitude than this stay folded as `ToPowOf`
/// rather than unrolled, to keep a stray `x^1000` from blowing up the tree.
const MAX_UNROLLED_POW: i64 = 64;

fn simplify_binop(op: Binop, a: Expr, b: Expr, optimize_integer_pow: bool) -> Expr {
    match op {
        Binop::Arg1 => a,
        Binop::Arg2 => b,
        Binop::Add => match (&a, &b) {
            (Expr::Constant(x), Expr::Constant(y)) => Expr::Constant(x + y),
            (Expr::Constant(c), other) | (other, Expr::Constant(c)) if *c == 0.0 => other.clone(),
            _ => Expr::Binop(op, Box::new(a), Box::new(b)),
        },
        Binop::Mul => match (&a, &b) {
            (Expr::Constant(x), Expr::Constant(y)) => Expr::Constant(x * y),
            (Expr::Constant(c), other) | (other, Expr::Constant(c)) if *c == 1.0 => other.clone(),
            (Expr::Constant(c), _) | (_, Expr::Constant(c)) if *c == 0.0 => Expr::Constant(0.0),
            _ => Expr::Binop(op, Box::new(a), Box::new(b)),
        },
        Binop::ToPowOf => match (&a, &b) {
            (Expr::Constant(x), Expr::Constant(y)) => Expr::Constant(libm_powf(*x, *y)),
            (_, Expr::Constant(c)) if *c == 1.0 => a,
            (_, Expr::Constant(c))
                if optimize_integer_pow && c.fract() == 0.0 && c.abs() <= MAX_UNROLLED_POW as f64 =>
            {
                unroll_integer_pow(a, *c as i64)
            }
            _ => Expr::Binop(op, Box::new(a), Box::new(b)),
        },
        Binop::ReluGate => Expr::Binop(op, Box::new(a), Box::new(b)),
    }
}

/// Unrolls `base ^ n` into a left-folded product chain of `n` copies of
/// `base`; a negative `n` unrolls `|n|` copies and wraps the chain in a
/// `ToPowOf(chain, -1)` reciprocal.
fn unroll_integer_pow(base: Expr, n: i64) -> Expr {
    if n == 0 {
        return Expr::Constant(1.0);
    }
    let magnitude = n.unsigned_abs();
    let mut chain = base.clone();
    for _ in 1..magnitude {
        chain = Expr::Binop(Binop::Mul, Box::new(chain), Box::new(base.clone()));
    }
    if n < 0 {
        Expr::Binop(Binop::ToPowOf, Box::new(chain), Box::new(Expr::Constant(-1.0)))
    } else {
        chain
    }
}

#[cfg(feature = "std")]
fn libm_powf(x: f64, y: f64) -> f64 {
    x.powf(y)
}

#[cfg(not(feature = "std"))]
fn libm_powf(x: f64, y: f64) -> f64 {
    libm::pow(x, y)
}

/// `Local-scope` elision: a scope whose body is a single `Set-local`
/// collapses to its value directly. A scope whose body writes the same
/// local twice (`[Set-local(id,v1); Set-local(id,v2)]`) substitutes
/// `Get-local(id)` by `v1` in `v2` and lifts that result, rather than
/// keeping the scope around one assignment removed from its one real use.
/// Otherwise the scope and its body are simplified in place.
fn simplify_local_scope(
    id: u64,
    body: &Code,
    orig_indices: &[crate::index::AxisIndex],
    optimize_integer_pow: bool,
) -> Expr {
    let simplified_body = simplify_code(body, optimize_integer_pow);
    if let Code::SetLocal { expr, .. } = &simplified_body {
        return expr.clone();
    }
    if let Code::Lines(lines) = &simplified_body {
        if lines.len() == 1 {
            if let Code::SetLocal { expr, .. } = &lines[0] {
                return expr.clone();
            }
        }
        if lines.len() == 2 {
            if let (
                Code::SetLocal { scope: s1, expr: v1 },
                Code::SetLocal { scope: s2, expr: v2 },
            ) = (&lines[0], &lines[1])
            {
                if *s1 == id && *s2 == id {
                    return substitute_get_local(v2, id, v1);
                }
            }
        }
    }
    Expr::LocalScope {
        id,
        body: Box::new(simplified_body),
        orig_indices: orig_indices.to_vec(),
    }
}

/// Substitutes every `Get-local(id)` in `expr` with `replacement`.
fn substitute_get_local(expr: &Expr, id: u64, replacement: &Expr) -> Expr {
    match expr {
        Expr::GetLocal(i) if *i == id => replacement.clone(),
        Expr::Binop(op, a, b) => Expr::Binop(
            *op,
            Box::new(substitute_get_local(a, id, replacement)),
            Box::new(substitute_get_local(b, id, replacement)),
        ),
        Expr::Unop(op, a) => Expr::Unop(*op, Box::new(substitute_get_local(a, id, replacement))),
        Expr::LocalScope {
            id: inner_id,
            body,
            orig_indices,
        } => Expr::LocalScope {
            id: *inner_id,
            body: Box::new(substitute_get_local_in_code(body, id, replacement)),
            orig_indices: orig_indices.clone(),
        },
        other => other.clone(),
    }
}

fn substitute_get_local_in_code(code: &Code, id: u64, replacement: &Expr) -> Code {
    match code {
        Code::SetLocal { scope, expr } => Code::SetLocal {
            scope: *scope,
            expr: substitute_get_local(expr, id, replacement),
        },
        Code::Set { ptr, idcs, expr } => Code::Set {
            ptr: ptr.clone(),
            idcs: idcs.clone(),
            expr: substitute_get_local(expr, id, replacement),
        },
        Code::Lines(lines) => Code::Lines(
            lines
                .iter()
                .map(|c| substitute_get_local_in_code(c, id, replacement))
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
            body: Box::new(substitute_get_local_in_code(body, id, replacement)),
            trace_it: *trace_it,
        },
        other => other.clone(),
    }
}

fn codes_equal(a: &Code, b: &Code) -> bool {
    alloc::format!("{a:?}") == alloc::format!("{b:?}")
}
