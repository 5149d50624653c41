use tensorc::error::{TensorcError, TraceEntry};
use tensorc::index::proj::ProjClasses;
use tensorc::session::Session;
use tensorc::shape::{infer_shape, AxisKind, ComposeKind, Logic, Shape};

#[test]
fn mismatched_fixed_dims_fail_broadcast_instead_of_silently_picking_one() {
    let mut session = Session::new();
    let mut proj = ProjClasses::new();
    let left = Shape::concrete(&mut session, "a", Vec::new(), vec![4], Vec::new(), &mut proj);
    let right = Shape::concrete(&mut session, "b", Vec::new(), vec![5], Vec::new(), &mut proj);
    let mut out = Shape::new(&mut session, "c");
    let err = infer_shape(&mut out, &Logic::Broadcast(ComposeKind::Pointwise, &left, &right), &mut session)
        .unwrap_err();
    let message = format!("{err}");
    assert!(message.contains('4') && message.contains('5'));
    assert!(message.contains("Compose /"));

    let TensorcError::Shape { trace, .. } = err else {
        panic!("expected a Shape error carrying a trace");
    };
    let shape_ids: Vec<u64> = trace
        .iter()
        .filter_map(|entry| match entry {
            TraceEntry::Shape { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(shape_ids, vec![out.id, left.id, right.id]);
}

#[test]
fn einsum_broadcast_then_projection_derivation_round_trips_through_to_dims() {
    // a: 3 | 4 -> 2 (labeled k -> i), b: 3 | 5 -> 4 (labeled ... -> k),
    // contraction over the shared label k.
    let mut session = Session::new();
    let mut proj = ProjClasses::new();
    let a = Shape::concrete(&mut session, "a", vec![3], vec![4], vec![2], &mut proj);
    let b = Shape::concrete(&mut session, "b", vec![3], vec![5], vec![4], &mut proj);
    let mut out = Shape::new(&mut session, "out");
    infer_shape(
        &mut out,
        &Logic::Broadcast(ComposeKind::Einsum("...|k->i;...|...->k=>...|->i".into()), &a, &b),
        &mut session,
    )
    .unwrap();
    tensorc::shape::finish_inference(&mut out, &mut proj);

    assert_eq!(out.to_dims(AxisKind::Batch).unwrap(), vec![3]);
    assert_eq!(out.to_dims(AxisKind::Input).unwrap(), vec![5]);
    assert_eq!(out.to_dims(AxisKind::Output).unwrap(), vec![2]);
    assert!(out.is_fully_resolved());
}
