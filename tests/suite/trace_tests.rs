use tensorc::index::{AxisIndex, Symbol};
use tensorc::ll::{Code, Expr};
use tensorc::session::Session;
use tensorc::trace::{simplify::simplify_fixpoint, trace_and_simplify, virtualize, Settings};

fn sym(id: u64) -> Symbol {
    Symbol::new(id, None)
}

fn references_tensor(code: &Code, id: u64) -> bool {
    format!("{code:?}").contains(&format!("id: {id},"))
}

/// A singly-written, singly-read scratch tensor gets virtualized away
/// entirely: no `Set`/`Get` against it survives the pass.
#[test]
fn a_scratch_tensor_with_one_write_and_one_read_disappears_after_virtualization() {
    let write = Code::Set {
        ptr: sym(10),
        idcs: vec![AxisIndex::Iterator(sym(1))],
        expr: Expr::Constant(2.0),
    };
    let consumer = Code::Set {
        ptr: sym(30),
        idcs: vec![AxisIndex::Fixed(0)],
        expr: Expr::Get { ptr: sym(10), idcs: vec![AxisIndex::Fixed(0)] },
    };
    let program = Code::Lines(vec![write, consumer]);

    let mut session = Session::new();
    let result = trace_and_simplify(&program, &mut session, &Settings::new());

    assert!(!references_tensor(&result, 10));
    assert!(references_tensor(&result, 30));
}

#[test]
fn virtualizing_a_program_with_no_candidates_is_a_harmless_no_op() {
    let code = Code::Set {
        ptr: sym(30),
        idcs: vec![AxisIndex::Fixed(0)],
        expr: Expr::Constant(5.0),
    };
    let mut session = Session::new();
    let result = virtualize(&code, &mut session, &Settings::new());
    assert!(references_tensor(&result, 30));
}

#[test]
fn the_simplifier_is_idempotent_on_an_already_simplified_program() {
    let code = Code::Set {
        ptr: sym(1),
        idcs: vec![AxisIndex::Fixed(0)],
        expr: Expr::Binop(
            tensorc::hl::Binop::Add,
            Box::new(Expr::Get { ptr: sym(2), idcs: vec![AxisIndex::Fixed(0)] }),
            Box::new(Expr::Constant(0.0)),
        ),
    };
    let once = simplify_fixpoint(&code, false);
    let twice = simplify_fixpoint(&once, false);
    assert_eq!(format!("{once:?}"), format!("{twice:?}"));
}

#[test]
fn trace_and_simplify_unrolls_integer_pow_when_the_setting_is_on() {
    let code = Code::Set {
        ptr: sym(1),
        idcs: vec![AxisIndex::Fixed(0)],
        expr: Expr::Binop(
            tensorc::hl::Binop::ToPowOf,
            Box::new(Expr::Get { ptr: sym(2), idcs: vec![AxisIndex::Fixed(0)] }),
            Box::new(Expr::Constant(3.0)),
        ),
    };
    let mut session = Session::new();
    let settings = Settings { optimize_integer_pow: true, ..Settings::new() };
    let result = trace_and_simplify(&code, &mut session, &settings);
    assert!(format!("{result:?}").contains("Mul"));
    assert!(!format!("{result:?}").contains("ToPowOf"));
}

/// A 0-d tensor written once with a literal constant, but visited past
/// `max_visits` so it's demoted from virtualization (its write site stays
/// materialized): with `inline_constants` on, its `Get` still folds to the
/// proven literal during cleanup instead of staying a live `Get`.
#[test]
fn inline_constants_folds_a_scalar_proven_tensor_to_its_literal() {
    let write = Code::Set {
        ptr: sym(10),
        idcs: Vec::new(),
        expr: Expr::Constant(6.0),
    };
    let consumer = Code::Set {
        ptr: sym(30),
        idcs: vec![AxisIndex::Fixed(0)],
        expr: Expr::Get { ptr: sym(10), idcs: Vec::new() },
    };
    let program = Code::Lines(vec![write, consumer]);

    let mut session = Session::new();
    let settings = Settings {
        max_visits: 0,
        inline_constants: true,
        ..Settings::new()
    };
    let result = virtualize(&program, &mut session, &settings);
    assert!(format!("{result:?}").contains("Set { ptr: Symbol { id: 10"));
    assert!(format!("{result:?}").contains("Constant(6.0)"));
    assert!(!format!("{result:?}").contains("Get { ptr: Symbol { id: 10"));
}
