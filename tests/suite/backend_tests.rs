use tensorc::backend::{by_name, DeviceId};
use tensorc::buffer::{Buffer, InitOp, Precision};
use tensorc::hl::Binop;
use tensorc::index::{AxisIndex, Bindings, Symbol};
use tensorc::ll::{Code, Expr, TraceIt};
use tensorc::session::Session;

fn sym(id: u64) -> Symbol {
    Symbol::new(id, None)
}

/// `f(x) = 3x^2 - 4x + 5` evaluated elementwise over a 5-element tensor,
/// run through the compiled cpu-jit kernel.
#[test]
fn cpu_jit_evaluates_a_polynomial_over_every_element() {
    let mut backend = by_name("cpu-jit").unwrap();
    backend.initialize().unwrap();
    let device = backend.get_device(0).unwrap();
    let context = backend.init(device).unwrap();

    let mut session = Session::new();
    let xs = [-2.0, -1.0, 0.0, 1.0, 2.0];
    let x = Buffer::create(
        Precision::Double,
        vec![5],
        &InitOp::ConstantFill { values: xs.to_vec(), strict: true },
        &mut session,
    )
    .unwrap();
    backend.from_host(context, 1, &x).unwrap();
    let f = Buffer::create(Precision::Double, vec![5], &InitOp::RangeOverOffsets, &mut session).unwrap();
    backend.from_host(context, 2, &f).unwrap();

    let x_ref = AxisIndex::Iterator(sym(0));
    let quadratic = Expr::Binop(
        Binop::Mul,
        Box::new(Expr::Constant(3.0)),
        Box::new(Expr::Binop(
            Binop::ToPowOf,
            Box::new(Expr::Get { ptr: sym(1), idcs: vec![x_ref.clone()] }),
            Box::new(Expr::Constant(2.0)),
        )),
    );
    let linear = Expr::Binop(
        Binop::Mul,
        Box::new(Expr::Constant(-4.0)),
        Box::new(Expr::Get { ptr: sym(1), idcs: vec![x_ref.clone()] }),
    );
    let expr = Expr::Binop(
        Binop::Add,
        Box::new(Expr::Binop(Binop::Add, Box::new(quadratic), Box::new(linear))),
        Box::new(Expr::Constant(5.0)),
    );
    let code = Code::ForLoop {
        index: sym(0),
        from: 0,
        to: 5,
        body: Box::new(Code::Set { ptr: sym(2), idcs: vec![x_ref], expr }),
        trace_it: TraceIt::ProductSpace,
    };

    let compiled = backend.compile(context, Some("poly"), false, Bindings::empty(), &code).unwrap();
    compiled.schedule().run().unwrap();

    let mut host = Buffer::create(Precision::Double, vec![5], &InitOp::RangeOverOffsets, &mut session).unwrap();
    backend.to_host(context, 2, &mut host).unwrap();
    for (i, &v) in xs.iter().enumerate() {
        let expected = 3.0 * v * v - 4.0 * v + 5.0;
        let actual = host.get_as_float(&[i]).unwrap();
        assert!((actual - expected).abs() < 1e-9, "index {i}: {actual} vs {expected}");
    }
}

#[test]
fn cuda_backend_is_registered_but_every_device_operation_reports_unavailable() {
    let mut backend = by_name("cuda").unwrap();
    assert_eq!(backend.num_devices(), 0);
    assert!(backend.init(DeviceId(0)).is_err());
}
