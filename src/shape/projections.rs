//! Projection derivation.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use super::dim::Dim;
use super::row::Row;
use crate::error::{TensorcError, TensorcResult};
use crate::index::proj::ProjClasses;
use crate::index::{AxisIndex, Symbol};
use crate::session::Session;

/// Output of shape → plan: the shared iteration space for one
/// accum-binop/unop, plus per-operand index arrays into it.
#[derive(Debug, Clone)]
pub struct Projections {
    pub product_space: Vec<Dim>,
    pub product_iterators: Vec<Symbol>,
    pub lhs_dims: Vec<Dim>,
    pub rhs_dims: Vec<Vec<Dim>>,
    pub project_lhs: Vec<AxisIndex>,
    pub project_rhs: Vec<Vec<AxisIndex>>,
    pub debug_info: String,
}

fn concat_dims(rows: &[&Row]) -> Vec<Dim> {
    rows.iter().flat_map(|r| r.dims.iter().cloned()).collect()
}

/// Projects one operand's dims through the shared `representative ->
/// iterator` map built while scanning every operand.
fn project(
    dims: &[Dim],
    proj: &mut ProjClasses,
    iterators: &HashMap<u64, Symbol>,
) -> TensorcResult<Vec<AxisIndex>> {
    dims.iter()
        .map(|dim| match dim {
            Dim::Concrete { size, proj_id, .. } => {
                if *size == 1 {
                    Ok(AxisIndex::Fixed(0))
                } else {
                    let rep = proj.find(*proj_id);
                    let sym = iterators.get(&rep.0).ok_or_else(|| {
                        TensorcError::invariant(format!(
                            "no iterator allocated for projection class {}",
                            rep.0
                        ))
                    })?;
                    Ok(AxisIndex::Iterator(sym.clone()))
                }
            }
            Dim::Var { .. } => Err(TensorcError::invariant(
                "projection derivation reached an unresolved dim variable",
            )),
        })
        .collect()
}

/// Derives the projections record for one `lhs [op] rhs...` computation.
///
/// Every concrete dim with size > 1 gets exactly one iterator per
/// projection-equivalence class (deduped via the union-find's
/// representative); size-1 and otherwise-constrained dims get
/// `Fixed-idx`.
pub fn derive_projections(
    lhs: &Row,
    lhs_rest: &[&Row],
    rhs: &[(&Row, &[&Row])],
    proj: &mut ProjClasses,
    session: &mut Session,
    debug_info: impl Into<String>,
) -> TensorcResult<Projections> {
    let mut lhs_rows: Vec<&Row> = alloc::vec![lhs];
    lhs_rows.extend_from_slice(lhs_rest);
    let lhs_dims = concat_dims(&lhs_rows);

    let rhs_dims: Vec<Vec<Dim>> = rhs
        .iter()
        .map(|(row, rest)| {
            let mut rows: Vec<&Row> = alloc::vec![*row];
            rows.extend_from_slice(rest);
            concat_dims(&rows)
        })
        .collect();

    // Pass 1: discover one iterator per projection-equivalence class
    // among every concrete, size > 1 dim referenced by any operand.
    let mut iterators: HashMap<u64, Symbol> = HashMap::new();
    let mut product_space: Vec<Dim> = Vec::new();
    let mut visit = |dims: &[Dim], proj: &mut ProjClasses, session: &mut Session| {
        for dim in dims {
            if let Dim::Concrete { size, proj_id, .. } = dim {
                if *size <= 1 {
                    continue;
                }
                let rep = proj.find(*proj_id);
                if !iterators.contains_key(&rep.0) {
                    let sym = Symbol::new(session.alloc_symbol_id(), None);
                    iterators.insert(rep.0, sym);
                    product_space.push(dim.clone());
                }
            }
        }
    };
    visit(&lhs_dims, proj, session);
    for dims in &rhs_dims {
        visit(dims, proj, session);
    }

    let product_iterators: Vec<Symbol> = {
        // Stable order: iterate product_space, look up by representative.
        let mut order = Vec::with_capacity(product_space.len());
        for dim in &product_space {
            if let Dim::Concrete { proj_id, .. } = dim {
                let rep = proj.find(*proj_id);
                order.push(iterators[&rep.0].clone());
            }
        }
        order
    };

    let project_lhs = project(&lhs_dims, proj, &iterators)?;
    let mut project_rhs = Vec::with_capacity(rhs_dims.len());
    for dims in &rhs_dims {
        project_rhs.push(project(dims, proj, &iterators)?);
    }

    Ok(Projections {
        product_space,
        product_iterators,
        lhs_dims,
        rhs_dims,
        project_lhs,
        project_rhs,
        debug_info: debug_info.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::row::Row;

    #[test]
    fn dedupes_shared_dims_into_one_iterator() {
        let mut proj = ProjClasses::new();
        let mut session = Session::new();
        let shared = proj.fresh();
        let a = Row::fixed(alloc::vec![Dim::concrete(4, shared)]);
        let b = Row::fixed(alloc::vec![Dim::concrete(4, shared)]);
        let projections =
            derive_projections(&a, &[], &[(&b, &[])], &mut proj, &mut session, "test").unwrap();
        assert_eq!(projections.product_space.len(), 1);
        assert_eq!(projections.product_iterators.len(), 1);
        assert_eq!(projections.project_lhs, alloc::vec![AxisIndex::Iterator(projections.product_iterators[0].clone())]);
        assert_eq!(projections.project_rhs[0], alloc::vec![AxisIndex::Iterator(projections.product_iterators[0].clone())]);
    }

    #[test]
    fn size_one_dims_get_fixed_index() {
        let mut proj = ProjClasses::new();
        let mut session = Session::new();
        let row = Row::fixed(alloc::vec![Dim::concrete(1, proj.fresh())]);
        let projections =
            derive_projections(&row, &[], &[], &mut proj, &mut session, "test").unwrap();
        assert!(projections.product_space.is_empty());
        assert_eq!(projections.project_lhs, alloc::vec![AxisIndex::Fixed(0)]);
    }

    #[test]
    fn every_iterator_appears_in_some_operand() {
        let mut proj = ProjClasses::new();
        let mut session = Session::new();
        let a = Row::fixed(alloc::vec![Dim::concrete(3, proj.fresh()), Dim::concrete(4, proj.fresh())]);
        let projections = derive_projections(&a, &[], &[], &mut proj, &mut session, "test").unwrap();
        assert_eq!(projections.product_iterators.len(), projections.product_space.len());
        for sym in &projections.product_iterators {
            assert!(projections.project_lhs.iter().any(|idx| idx.referenced_symbol() == Some(sym)));
        }
    }
}
