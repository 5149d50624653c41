//! Row/dim unification core.
//!
//! Every unification failure here carries a trace: the dim/row-level
//! record that actually mismatched, wrapped in a [`TraceEntry::Row`] by
//! the caller that knows which shape and axis kind it was unifying.
//! Callers that compose whole shapes (see `infer_shape`'s `Broadcast`
//! arms) add their own `Shape` frames on top.

use alloc::format;
use alloc::vec::Vec;

use super::dim::Dim;
use super::row::{Constraint, Row, RowTerminator};
use crate::error::{TensorcError, TensorcResult, TraceEntry};
use crate::index::proj::ProjClasses;

fn register(dim: &Dim, proj: &mut ProjClasses) {
    if let Dim::Concrete { proj_id, .. } = dim {
        proj.register(*proj_id);
    }
}

fn register_all(row: &Row, proj: &mut ProjClasses) {
    for dim in &row.dims {
        register(dim, proj);
    }
}

/// Unifies two dim equations: equal concrete sizes
/// union their proj-ids; size-1 dims unify with anything (broadcasting);
/// a variable is substituted by the other side; mismatched labels are a
/// hard error.
pub fn unify_dim(target: &mut Dim, other: &Dim, proj: &mut ProjClasses) -> TensorcResult<()> {
    if let (Some(a), Some(b)) = (target.label(), other.label()) {
        if a != b {
            let description = format!("label `{a}` vs `{b}`");
            return Err(TensorcError::shape(
                format!("dim label mismatch: `{a}` vs `{b}`"),
                alloc::vec![TraceEntry::Dim { description }],
            ));
        }
    }
    match (&*target, other) {
        (Dim::Var { .. }, _) => {
            *target = other.clone();
            register(target, proj);
            Ok(())
        }
        (Dim::Concrete { .. }, Dim::Var { .. }) => Ok(()),
        (
            Dim::Concrete {
                size: ts,
                proj_id: tp,
                ..
            },
            Dim::Concrete {
                size: os,
                proj_id: op,
                ..
            },
        ) => {
            if ts == os {
                proj.union(*tp, *op);
                Ok(())
            } else if *ts == 1 {
                *target = other.clone();
                Ok(())
            } else if *os == 1 {
                // Other is the size-1 side; target already carries the
                // larger, authoritative size. Nothing to substitute.
                Ok(())
            } else {
                let description = format!("size {ts} vs {os}");
                Err(TensorcError::shape(
                    format!("dim size mismatch: {ts} vs {os}"),
                    alloc::vec![TraceEntry::Dim { description }],
                ))
            }
        }
    }
}

/// Wraps an error from a row-level unification step in a [`TraceEntry::Row`]
/// naming which shape and axis kind it happened in. Non-`Shape` errors
/// (there are none left on this path, but kept defensive) pass through.
fn with_row_context(err: TensorcError, shape_id: u64, kind: &'static str) -> TensorcError {
    match err {
        TensorcError::Shape { message, mut trace } => {
            trace.push(TraceEntry::Row { shape_id, kind });
            TensorcError::shape(message, trace)
        }
        other => other,
    }
}

/// Unifies the common suffix of `target` against `other`, aligning from
/// the right, extending `target`'s dims on the left
/// when its terminator permits growth and `other` has more dims.
fn unify_suffix(
    target: &mut Row,
    other: &Row,
    proj: &mut ProjClasses,
    shape_id: u64,
    kind: &'static str,
) -> TensorcResult<()> {
    let common = target.dims.len().min(other.dims.len());
    let t_len = target.dims.len();
    let o_len = other.dims.len();
    for k in 0..common {
        unify_dim(
            &mut target.dims[t_len - 1 - k],
            &other.dims[o_len - 1 - k],
            proj,
        )
        .map_err(|e| with_row_context(e, shape_id, kind))?;
    }
    if o_len > t_len {
        let can_grow = !matches!(target.terminator, RowTerminator::Fixed);
        if !can_grow {
            return Err(TensorcError::shape(
                format!("row with Fixed terminator has {t_len} dims, expected {o_len}"),
                alloc::vec![TraceEntry::Row { shape_id, kind }],
            ));
        }
        let extra = &other.dims[..o_len - t_len];
        let mut new_dims = extra.to_vec();
        for dim in &new_dims {
            register(dim, proj);
        }
        new_dims.extend(target.dims.drain(..));
        target.dims = new_dims;
    }
    Ok(())
}

pub(crate) fn apply_total_elems(row: &mut Row, shape_id: u64, kind: &'static str) -> TensorcResult<()> {
    let Constraint::TotalElems(n) = row.constraint else {
        return Ok(());
    };
    let var_positions: Vec<usize> = row
        .dims
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_var())
        .map(|(i, _)| i)
        .collect();
    let known_product: usize = row
        .dims
        .iter()
        .filter_map(Dim::size)
        .product();
    match var_positions.len() {
        0 => {
            if known_product != n {
                return Err(TensorcError::shape(
                    format!("Total-elems({n}) violated: row has {known_product} elements"),
                    alloc::vec![TraceEntry::Row { shape_id, kind }],
                ));
            }
            Ok(())
        }
        1 => {
            if known_product == 0 || n % known_product != 0 {
                return Err(TensorcError::shape(
                    format!(
                        "Total-elems({n}) does not divide evenly by known dims (product {known_product})"
                    ),
                    alloc::vec![TraceEntry::Row { shape_id, kind }],
                ));
            }
            let solved = n / known_product;
            // Resolved to a concrete size with a fresh, unshared
            // projection class (it participates in no other equation).
            let placeholder_proj = crate::index::ProjId(u64::MAX - (var_positions[0] as u64));
            row.dims[var_positions[0]] = Dim::Concrete {
                size: solved,
                proj_id: placeholder_proj,
                label: None,
            };
            Ok(())
        }
        _ => Ok(()), // more than one unresolved dim: leave for a later propagation step
    }
}

/// Unifies `target` against `other`, mutating `target` in place.
///
/// `other` is treated as a read-only bias source: this models one half
/// of a (directional) row equation `{r, subr}`, applied repeatedly (once
/// per operand) by the caller to build up a fresh result row.
pub fn unify_row(
    target: &mut Row,
    other: &Row,
    proj: &mut ProjClasses,
    shape_id: u64,
    kind: &'static str,
) -> TensorcResult<()> {
    let target_is_bare_var =
        matches!(target.terminator, RowTerminator::RowVar(_)) && target.dims.is_empty();
    let other_is_bare_var =
        matches!(other.terminator, RowTerminator::RowVar(_)) && other.dims.is_empty();

    if target_is_bare_var {
        *target = other.clone();
        register_all(target, proj);
        return apply_total_elems(target, shape_id, kind);
    }
    if other_is_bare_var {
        return Ok(());
    }

    unify_suffix(target, other, proj, shape_id, kind)?;
    apply_total_elems(target, shape_id, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::proj::ProjClasses;
    use alloc::vec;

    fn concrete(size: usize, proj: &mut ProjClasses) -> Dim {
        Dim::concrete(size, proj.fresh())
    }

    #[test]
    fn equal_concrete_dims_union_proj_ids() {
        let mut proj = ProjClasses::new();
        let mut a = concrete(4, &mut proj);
        let b = concrete(4, &mut proj);
        unify_dim(&mut a, &b, &mut proj).unwrap();
        let (Dim::Concrete { proj_id: pa, .. }, Dim::Concrete { proj_id: pb, .. }) = (&a, &b) else {
            unreachable!()
        };
        assert!(proj.same_class(*pa, *pb));
    }

    #[test]
    fn mismatched_concrete_dims_error() {
        let mut proj = ProjClasses::new();
        let mut a = concrete(4, &mut proj);
        let b = concrete(5, &mut proj);
        assert!(unify_dim(&mut a, &b, &mut proj).is_err());
    }

    #[test]
    fn size_one_dim_broadcasts() {
        let mut proj = ProjClasses::new();
        let mut a = concrete(1, &mut proj);
        let b = concrete(7, &mut proj);
        unify_dim(&mut a, &b, &mut proj).unwrap();
        assert_eq!(a.size(), Some(7));
    }

    #[test]
    fn broadcastable_row_grows_on_the_left() {
        let mut proj = ProjClasses::new();
        let mut target = Row::broadcastable(vec![concrete(5, &mut proj)]);
        let other = Row::fixed(vec![concrete(3, &mut proj), concrete(5, &mut proj)]);
        unify_row(&mut target, &other, &mut proj, 0, "input").unwrap();
        assert_eq!(target.to_dims(), Some(vec![3, 5]));
    }

    #[test]
    fn mismatched_fixed_rows_carry_a_row_trace_frame() {
        let mut proj = ProjClasses::new();
        let mut target = concrete(4, &mut proj);
        let other = concrete(5, &mut proj);
        let err = unify_dim(&mut target, &other, &mut proj).unwrap_err();
        let err = super::with_row_context(err, 7, "input");
        match err {
            TensorcError::Shape { trace, .. } => {
                assert!(trace.iter().any(|e| matches!(e, TraceEntry::Row { shape_id: 7, kind: "input" })));
                assert!(trace.iter().any(|e| matches!(e, TraceEntry::Dim { .. })));
            }
            other => panic!("expected a Shape error, got {other:?}"),
        }
    }

    #[test]
    fn total_elems_solves_the_lone_variable() {
        let mut proj = ProjClasses::new();
        let mut row = Row {
            dims: vec![concrete(3, &mut proj), Dim::var(0)],
            constraint: Constraint::TotalElems(30),
            terminator: RowTerminator::Fixed,
        };
        apply_total_elems(&mut row, 0, "batch").unwrap();
        assert_eq!(row.to_dims(), Some(vec![3, 10]));
    }

    #[test]
    fn total_elems_non_divisible_is_an_error() {
        let mut proj = ProjClasses::new();
        let mut row = Row {
            dims: vec![concrete(4, &mut proj), Dim::var(0)],
            constraint: Constraint::TotalElems(30),
            terminator: RowTerminator::Fixed,
        };
        assert!(apply_total_elems(&mut row, 0, "batch").is_err());
    }
}
