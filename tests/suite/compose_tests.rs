use tensorc::backend::by_name;
use tensorc::buffer::{Buffer, InitOp, Precision};
use tensorc::compose::{grad_update, sgd_one, Parameter, SgdConfig, SgdState};
use tensorc::hl::{Binop, Code, FetchOp, TensorRef, Unop};
use tensorc::index::proj::ProjClasses;
use tensorc::index::Bindings;
use tensorc::ll::lower::to_low_level;
use tensorc::sched::parallel::ParallelUpdate;
use tensorc::sched::Scheduler;
use tensorc::session::Session;
use tensorc::shape::{derive_projections, row::Row, Dim, Projections};

/// A single scalar's elementwise projections: every operand is one
/// `size == 1` dim, so lowering resolves every index to `Fixed(0)` and no
/// loop is needed around the generated `Set`.
fn unit_projections(proj: &mut ProjClasses, session: &mut Session) -> Projections {
    let row = || Row::fixed(vec![Dim::concrete(1, proj.fresh())]);
    let lhs = row();
    let rhs_a = row();
    let rhs_b = row();
    derive_projections(&lhs, &[], &[(&rhs_a, &[]), (&rhs_b, &[])], proj, session, "unit").unwrap()
}

/// One plain SGD step (no momentum, no decay) against a single scalar
/// parameter, run through the cpu-jit backend: `w += neg_lr * grad`.
#[test]
fn one_sgd_step_updates_the_parameter_by_minus_lr_times_gradient() {
    let mut proj = ProjClasses::new();
    let mut session = Session::new();
    let projections = unit_projections(&mut proj, &mut session);

    let w = TensorRef::new(1, "w");
    let grad = TensorRef::new(2, "w.grad");
    let pg = TensorRef::new(3, "w.pg");
    let neg_lr = TensorRef::new(4, "neg_lr");

    let state = SgdState {
        parameter: Parameter { value: w.clone(), grad: grad.clone(), projections },
        delta: pg.clone(),
        velocity: None,
    };
    let config = SgdConfig { lr: neg_lr.clone(), momentum: None, weight_decay: None, nesterov: false };
    let code = sgd_one(&state, &config);
    let lowered = to_low_level(&code).expect("sgd_one should lower to LL code");

    let mut backend = by_name("cpu-jit").unwrap();
    backend.initialize().unwrap();
    let device = backend.get_device(0).unwrap();
    let context = backend.init(device).unwrap();

    let mut seed = |tensor_id: u64, value: f64| {
        let buf = Buffer::create(
            Precision::Double,
            vec![1],
            &InitOp::ConstantFill { values: vec![value], strict: true },
            &mut session,
        )
        .unwrap();
        backend.from_host(context, tensor_id, &buf).unwrap();
    };
    seed(1, 10.0); // w
    seed(2, 2.0); // grad
    seed(3, 0.0); // pg, scratch
    seed(4, -0.1); // neg_lr

    let compiled = backend.compile(context, Some("sgd_one"), false, Bindings::empty(), &lowered).unwrap();
    compiled.schedule().run().unwrap();

    let mut host = Buffer::create(Precision::Double, vec![1], &InitOp::RangeOverOffsets, &mut session).unwrap();
    backend.to_host(context, 1, &mut host).unwrap();
    let updated = host.get_as_float(&[0]).unwrap();
    assert!((updated - 9.8).abs() < 1e-9, "expected 9.8, got {updated}");
}

#[test]
fn zero_out_fetch_produces_a_code_tree_that_lowers_without_error() {
    let mut proj = ProjClasses::new();
    let mut session = Session::new();
    let projections = unit_projections(&mut proj, &mut session);

    let loss = TensorRef::new(0, "loss");
    let code = Code::Fetch { target: loss, op: FetchOp::Constant(0.0), projections };
    assert!(to_low_level(&code).is_ok());
}

fn seed(backend: &mut dyn tensorc::backend::Backend, ctx: tensorc::backend::ContextId, tensor_id: u64, value: f64, session: &mut Session) {
    let buf = Buffer::create(
        Precision::Double,
        vec![1],
        &InitOp::ConstantFill { values: vec![value], strict: true },
        session,
    )
    .unwrap();
    backend.from_host(ctx, tensor_id, &buf).unwrap();
}

/// Two "devices" (two cpu-jit contexts), each holding one sample of a
/// no-bias linear regression `y = w * x`. Every round computes each
/// device's local gradient through `grad_update`'s bprop slot, merges
/// the gradients onto device 0 via `ParallelUpdate`, takes one
/// `sgd_one` step there, and broadcasts the updated weight back out.
/// After enough rounds both contexts converge to the least-squares
/// optimum and agree exactly.
#[test]
fn parallel_update_converges_a_two_device_linear_regression_to_bit_identical_weights() {
    let mut proj = ProjClasses::new();
    let mut session = Session::new();
    let projections = unit_projections(&mut proj, &mut session);

    let w = TensorRef::new(1, "w");
    let grad = TensorRef::new(2, "w.grad");
    let pg = TensorRef::new(3, "w.pg");
    let neg_lr = TensorRef::new(4, "neg_lr");
    let x = TensorRef::new(5, "x");
    let neg_y = TensorRef::new(6, "neg_y");
    let diff = TensorRef::new(7, "diff");
    let loss = TensorRef::new(8, "loss");

    // bprop: diff = w*x; diff += neg_y; grad = diff*x — the gradient of
    // 0.5*(w*x - y)^2 with respect to w.
    let bprop = Code::Seq(vec![
        Code::AccumBinop {
            zero_out: true,
            accum: Binop::Arg2,
            op: Binop::Mul,
            lhs: diff.clone(),
            rhs1: w.clone(),
            rhs2: x.clone(),
            projections: projections.clone(),
        },
        Code::AccumUnop {
            zero_out: false,
            accum: Binop::Add,
            op: Unop::Identity,
            lhs: diff.clone(),
            rhs: neg_y.clone(),
            projections: projections.clone(),
        },
        Code::AccumBinop {
            zero_out: true,
            accum: Binop::Arg2,
            op: Binop::Mul,
            lhs: grad.clone(),
            rhs1: diff.clone(),
            rhs2: x.clone(),
            projections: projections.clone(),
        },
    ]);
    let parameter = Parameter { value: w.clone(), grad: grad.clone(), projections: projections.clone() };
    let (grad_code, _) = grad_update(&loss, &projections, Code::Noop, &[parameter.clone()], bprop);
    let grad_lowered = to_low_level(&grad_code).expect("grad computation should lower to LL code");

    let sgd_state = SgdState { parameter, delta: pg.clone(), velocity: None };
    let sgd_config = SgdConfig { lr: neg_lr.clone(), momentum: None, weight_decay: None, nesterov: false };
    let sgd_code = sgd_one(&sgd_state, &sgd_config);
    let sgd_lowered = to_low_level(&sgd_code).expect("sgd_one should lower to LL code");

    let mut backend = by_name("cpu-jit").unwrap();
    backend.initialize().unwrap();
    let device = backend.get_device(0).unwrap();
    let ctx0 = backend.init(device).unwrap();
    let ctx1 = backend.init(device).unwrap();

    // y = 2x + 1 sampled at x=1 (y=3) and x=2 (y=5); the least-squares
    // optimum for the no-bias model w*x is w* = 2.6.
    seed(&mut *backend, ctx0, 1, 0.0, &mut session); // w
    seed(&mut *backend, ctx0, 2, 0.0, &mut session); // grad
    seed(&mut *backend, ctx0, 3, 0.0, &mut session); // pg
    seed(&mut *backend, ctx0, 4, -0.05, &mut session); // neg_lr
    seed(&mut *backend, ctx0, 5, 1.0, &mut session); // x0
    seed(&mut *backend, ctx0, 6, -3.0, &mut session); // neg_y0
    seed(&mut *backend, ctx0, 7, 0.0, &mut session); // diff scratch
    seed(&mut *backend, ctx0, 8, 0.0, &mut session); // loss

    seed(&mut *backend, ctx1, 1, 0.0, &mut session); // w, kept in sync by broadcast
    seed(&mut *backend, ctx1, 2, 0.0, &mut session); // grad
    seed(&mut *backend, ctx1, 5, 2.0, &mut session); // x1
    seed(&mut *backend, ctx1, 6, -5.0, &mut session); // neg_y1
    seed(&mut *backend, ctx1, 7, 0.0, &mut session); // diff scratch
    seed(&mut *backend, ctx1, 8, 0.0, &mut session); // loss

    let grad_compiled_0 = backend.compile(ctx0, Some("grad"), false, Bindings::empty(), &grad_lowered).unwrap();
    let grad_compiled_1 = backend.compile(ctx1, Some("grad"), false, Bindings::empty(), &grad_lowered).unwrap();
    let sgd_compiled = backend.compile(ctx0, Some("sgd_one"), false, Bindings::empty(), &sgd_lowered).unwrap();

    {
        let scheduler = Scheduler::new(2);
        let mut update = ParallelUpdate::new(&mut *backend, &scheduler, vec![ctx0, ctx1], vec![2], vec![1]);
        update.precompile(2).unwrap();

        for _ in 0..50 {
            update
                .run(
                    2,
                    |device_idx, _combination| {
                        if device_idx == 0 {
                            grad_compiled_0.schedule().run()
                        } else {
                            grad_compiled_1.schedule().run()
                        }
                    },
                    || sgd_compiled.schedule().run(),
                    |_| {},
                )
                .unwrap();
        }
    }

    let mut host0 = Buffer::create(Precision::Double, vec![1], &InitOp::RangeOverOffsets, &mut session).unwrap();
    let mut host1 = Buffer::create(Precision::Double, vec![1], &InitOp::RangeOverOffsets, &mut session).unwrap();
    backend.to_host(ctx0, 1, &mut host0).unwrap();
    backend.to_host(ctx1, 1, &mut host1).unwrap();
    let w0 = host0.get_as_float(&[0]).unwrap();
    let w1 = host1.get_as_float(&[0]).unwrap();

    assert!((w0 - 2.6).abs() < 1e-3, "expected w to converge to 2.6, got {w0}");
    assert_eq!(w0, w1, "both devices must hold bit-identical parameters after broadcast");
}
