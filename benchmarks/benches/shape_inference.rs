//! Shape-inference benchmark suite.
//!
//! Measures row-polymorphic unification and projection derivation cost
//! across pointwise broadcast and einsum contraction, the two `Logic`
//! variants exercised most heavily by a real training loop.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use tensorc::index::proj::ProjClasses;
use tensorc::session::Session;
use tensorc::shape::{derive_projections, infer_shape, row::Row, ComposeKind, Dim, Logic, Shape};

fn pointwise_broadcast(c: &mut Criterion) {
    c.bench_function("pointwise_broadcast_4096", |b| {
        b.iter_batched(
            || {
                let mut session = Session::new();
                let mut proj = ProjClasses::new();
                let left = Shape::concrete(&mut session, "a", vec![4096], Vec::new(), Vec::new(), &mut proj);
                let right = Shape::concrete(&mut session, "b", vec![4096], Vec::new(), Vec::new(), &mut proj);
                (session, left, right)
            },
            |(mut session, left, right)| {
                let mut out = Shape::new(&mut session, "c");
                infer_shape(&mut out, &Logic::Broadcast(ComposeKind::Pointwise, &left, &right), &mut session)
                    .unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn batched_einsum_contraction(c: &mut Criterion) {
    c.bench_function("einsum_batched_matmul_contraction", |b| {
        b.iter_batched(
            || {
                let mut session = Session::new();
                let mut proj = ProjClasses::new();
                let a = Shape::concrete(&mut session, "a", vec![32], vec![128], vec![64], &mut proj);
                let b = Shape::concrete(&mut session, "b", vec![32], vec![256], vec![128], &mut proj);
                (session, proj, a, b)
            },
            |(mut session, mut proj, a, b)| {
                let mut out = Shape::new(&mut session, "out");
                infer_shape(
                    &mut out,
                    &Logic::Broadcast(ComposeKind::Einsum("...|k->i;...|...->k=>...|->i".into()), &a, &b),
                    &mut session,
                )
                .unwrap();
                tensorc::shape::finish_inference(&mut out, &mut proj);
            },
            BatchSize::SmallInput,
        );
    });
}

fn projection_derivation(c: &mut Criterion) {
    c.bench_function("derive_projections_rank4", |b| {
        b.iter_batched(
            || {
                let mut proj = ProjClasses::new();
                let session = Session::new();
                let dims: Vec<Dim> = vec![8, 16, 32, 64].into_iter().map(|d| Dim::concrete(d, proj.fresh())).collect();
                let lhs = Row::fixed(dims.clone());
                let rhs = Row::fixed(dims);
                (proj, session, lhs, rhs)
            },
            |(mut proj, mut session, lhs, rhs)| {
                derive_projections(&lhs, &[], &[(&rhs, &[])], &mut proj, &mut session, "bench").unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, pointwise_broadcast, batched_einsum_contraction, projection_derivation);
criterion_main!(benches);
