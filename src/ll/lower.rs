//! `to-low-level(code)`: translates one HL assignment-graph node into LL
//! loop-nest code.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::{Code, Expr, TraceIt};
use crate::error::{TensorcError, TensorcResult};
use crate::hl;
use crate::index::{AxisIndex, Symbol};
use crate::shape::Projections;

fn tensor_symbol(t: &hl::TensorRef) -> Symbol {
    Symbol::new(t.id, Some(t.debug_name.clone()))
}

/// Finds the first (outermost-wins) `Dynamic-provider` among the operand
/// index arrays, left to right.
fn find_dynamic_provider(idcs_lists: &[&[AxisIndex]]) -> Option<AxisIndex> {
    for idcs in idcs_lists {
        for idx in *idcs {
            if matches!(idx, AxisIndex::DynamicProvider { .. }) {
                return Some(idx.clone());
            }
        }
    }
    None
}

fn wrap_dynamic_provider(provider: AxisIndex, tensor: Symbol, tensor_idcs: Vec<AxisIndex>, body: Code) -> Code {
    let AxisIndex::DynamicProvider { idcs, target_dims } = provider else {
        unreachable!("caller guarantees a DynamicProvider");
    };
    Code::DynamicIndices {
        tensor,
        tensor_idcs,
        dyn_idcs: idcs,
        target_dims,
        body: Box::new(body),
        slice: None,
    }
}

/// Wraps `body` in one `For-loop` per product-space dim (innermost to
/// outermost), skipping dedicated iterators — those are bound externally
/// via `Bindings`, not looped locally.
fn wrap_product_loops(projections: &Projections, body: Code) -> TensorcResult<Code> {
    let mut body = body;
    for (dim, sym) in projections
        .product_space
        .iter()
        .zip(projections.product_iterators.iter())
        .rev()
    {
        if sym.is_dedicated() {
            continue;
        }
        let to = dim.size().ok_or_else(|| {
            TensorcError::invariant("to-low-level reached an unresolved product-space dim")
        })?;
        body = Code::ForLoop {
            index: sym.clone(),
            from: 0,
            to,
            body: Box::new(body),
            trace_it: TraceIt::ProductSpace,
        };
    }
    Ok(body)
}

/// Translates one HL node. Composition nodes (`Par`/`ParHint`/`Seq`)
/// lower to `Lines` — their safety contract is an HL-only scheduling
/// concern, already honored by the time code reaches this pass.
pub fn to_low_level(code: &hl::Code) -> TensorcResult<Code> {
    match code {
        hl::Code::Par(children) | hl::Code::ParHint(children) | hl::Code::Seq(children) => {
            Ok(Code::Lines(
                children.iter().map(to_low_level).collect::<TensorcResult<Vec<_>>>()?,
            ))
        }
        hl::Code::BlockComment(msg, body) => Ok(Code::Lines(alloc::vec![
            Code::Comment(msg.clone()),
            to_low_level(body)?,
        ])),
        hl::Code::Noop => Ok(Code::Lines(Vec::new())),
        hl::Code::AccumBinop {
            zero_out,
            accum,
            op,
            lhs,
            rhs1,
            rhs2,
            projections,
        } => {
            let lhs_sym = tensor_symbol(lhs);
            let rhs1_sym = tensor_symbol(rhs1);
            let rhs2_sym = tensor_symbol(rhs2);
            let lhs_idcs = projections.project_lhs.clone();
            let rhs1_idcs = projections
                .project_rhs
                .first()
                .cloned()
                .ok_or_else(|| TensorcError::invariant("accum-binop projections missing rhs1"))?;
            let rhs2_idcs = projections
                .project_rhs
                .get(1)
                .cloned()
                .ok_or_else(|| TensorcError::invariant("accum-binop projections missing rhs2"))?;

            let expr = Expr::Binop(
                *accum,
                Box::new(Expr::Get {
                    ptr: lhs_sym.clone(),
                    idcs: lhs_idcs.clone(),
                }),
                Box::new(Expr::Binop(
                    *op,
                    Box::new(Expr::Get {
                        ptr: rhs1_sym,
                        idcs: rhs1_idcs.clone(),
                    }),
                    Box::new(Expr::Get {
                        ptr: rhs2_sym,
                        idcs: rhs2_idcs.clone(),
                    }),
                )),
            );
            let mut body = Code::Set {
                ptr: lhs_sym.clone(),
                idcs: lhs_idcs.clone(),
                expr,
            };
            if let Some(provider) = find_dynamic_provider(&[&lhs_idcs, &rhs1_idcs, &rhs2_idcs]) {
                body = wrap_dynamic_provider(provider, lhs_sym.clone(), lhs_idcs.clone(), body);
            }
            body = wrap_product_loops(projections, body)?;
            if *zero_out {
                body = Code::Lines(alloc::vec![Code::ZeroOut(lhs_sym), body]);
            }
            Ok(body)
        }
        hl::Code::AccumUnop {
            zero_out,
            accum,
            op,
            lhs,
            rhs,
            projections,
        } => {
            let lhs_sym = tensor_symbol(lhs);
            let rhs_sym = tensor_symbol(rhs);
            let lhs_idcs = projections.project_lhs.clone();
            let rhs_idcs = projections
                .project_rhs
                .first()
                .cloned()
                .ok_or_else(|| TensorcError::invariant("accum-unop projections missing rhs"))?;

            let expr = Expr::Binop(
                *accum,
                Box::new(Expr::Get {
                    ptr: lhs_sym.clone(),
                    idcs: lhs_idcs.clone(),
                }),
                Box::new(Expr::Unop(
                    *op,
                    Box::new(Expr::Get {
                        ptr: rhs_sym,
                        idcs: rhs_idcs.clone(),
                    }),
                )),
            );
            let mut body = Code::Set {
                ptr: lhs_sym.clone(),
                idcs: lhs_idcs.clone(),
                expr,
            };
            if let Some(provider) = find_dynamic_provider(&[&lhs_idcs, &rhs_idcs]) {
                body = wrap_dynamic_provider(provider, lhs_sym.clone(), lhs_idcs.clone(), body);
            }
            body = wrap_product_loops(projections, body)?;
            if *zero_out {
                body = Code::Lines(alloc::vec![Code::ZeroOut(lhs_sym), body]);
            }
            Ok(body)
        }
        hl::Code::Fetch {
            target,
            op,
            projections,
        } => lower_fetch(target, op, projections),
    }
}

fn lower_fetch(target: &hl::TensorRef, op: &hl::FetchOp, projections: &Projections) -> TensorcResult<Code> {
    let sym = tensor_symbol(target);
    match op {
        hl::FetchOp::Constant(c) if *c == 0.0 => Ok(Code::ZeroOut(sym)),
        hl::FetchOp::Constant(c) => {
            let idcs = projections.project_lhs.clone();
            let body = Code::Set {
                ptr: sym,
                idcs,
                expr: Expr::Constant(*c),
            };
            wrap_product_loops(projections, body)
        }
        hl::FetchOp::Synthetic(inner) => to_low_level(inner),
        hl::FetchOp::Imported(name) => Err(TensorcError::invariant(alloc::format!(
            "Imported fetch `{name}` is reserved and not implemented by any backend"
        ))),
    }
}
