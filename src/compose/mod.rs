//! Assignment composer.
//!
//! Graph construction — how a loss's forward and backward IR is actually
//! assembled from user tensor expressions — is a front-end concern out of
//! scope here; these functions only assemble the small fixed-shape IR
//! idioms around that IR once it exists: zeroing gradients, seeding the
//! loss gradient, and textbook SGD.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::hl::{Binop, Code, FetchOp, TensorRef, Unop};
use crate::shape::Projections;

/// Whether a tensor's value must be visible to the host after a composed
/// step runs, or may stay device-resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hosted,
    DeviceOnly,
}

/// A trainable parameter: its value, its gradient accumulator, and the
/// elementwise iteration space they share.
#[derive(Clone)]
pub struct Parameter {
    pub value: TensorRef,
    pub grad: TensorRef,
    pub projections: Projections,
}

/// Per-parameter SGD scratch tensors, allocated by the caller.
pub struct SgdState {
    pub parameter: Parameter,
    /// Working step direction `pg`, recomputed every call.
    pub delta: TensorRef,
    /// Momentum buffer `b`. `None` disables momentum for this parameter.
    pub velocity: Option<TensorRef>,
}

/// SGD hyperparameters as 0-d tensors, since [`Binop`] only operates
/// between tensor operands. `lr` is expected to already hold the
/// *negative* learning rate: the IR has no subtraction, so the parameter
/// update is expressed as `value += lr * delta`.
pub struct SgdConfig {
    pub lr: TensorRef,
    pub momentum: Option<TensorRef>,
    pub weight_decay: Option<TensorRef>,
    pub nesterov: bool,
}

fn zero_fetch(target: &TensorRef, projections: Projections) -> Code {
    Code::Fetch {
        target: target.clone(),
        op: FetchOp::Constant(0.0),
        projections,
    }
}

/// `grad_update(loss)`: assembles `[loss_fwd, zero_grads, init_grad = 1,
/// bprop]` under block comments and reports that `loss` must be hosted.
/// The caller supplies `loss_fwd` and `bprop` already built (asserting the
/// loss is differentiable is the caller's job, since the differentiation
/// builder itself is out of scope); `parameters` are every leaf tensor
/// `bprop` accumulates into.
pub fn grad_update(
    loss: &TensorRef,
    loss_projections: &Projections,
    loss_fwd: Code,
    parameters: &[Parameter],
    bprop: Code,
) -> (Code, Visibility) {
    let zero_grads = Code::Par(
        parameters
            .iter()
            .map(|p| zero_fetch(&p.grad, p.projections.clone()))
            .collect(),
    );
    let init_grad = Code::Fetch {
        target: loss.clone(),
        op: FetchOp::Constant(1.0),
        projections: loss_projections.clone(),
    };
    let code = Code::BlockComment(
        String::from("grad_update"),
        Box::new(Code::Seq(alloc::vec![
            Code::BlockComment(String::from("forward"), Box::new(loss_fwd)),
            Code::BlockComment(String::from("zero_grads"), Box::new(zero_grads)),
            Code::BlockComment(String::from("init_grad"), Box::new(init_grad)),
            Code::BlockComment(String::from("bprop"), Box::new(bprop)),
        ])),
    );
    (code, Visibility::Hosted)
}

/// `sgd_one(p; lr, momentum, weight_decay, nesterov)`: decoupled weight
/// decay folded into the step direction, then an undampened momentum
/// buffer, then an optional Nesterov lookahead, then the parameter update.
pub fn sgd_one(state: &SgdState, config: &SgdConfig) -> Code {
    let p = &state.parameter;
    let proj = || p.projections.clone();
    let mut steps = Vec::new();

    steps.push(Code::AccumUnop {
        zero_out: true,
        accum: Binop::Arg2,
        op: Unop::Identity,
        lhs: state.delta.clone(),
        rhs: p.grad.clone(),
        projections: proj(),
    });

    if let Some(weight_decay) = &config.weight_decay {
        steps.push(Code::AccumBinop {
            zero_out: false,
            accum: Binop::Add,
            op: Binop::Mul,
            lhs: state.delta.clone(),
            rhs1: weight_decay.clone(),
            rhs2: p.value.clone(),
            projections: proj(),
        });
    }

    if let Some(velocity) = &state.velocity {
        let momentum = config
            .momentum
            .as_ref()
            .expect("a velocity tensor requires a momentum coefficient");

        // buf = momentum * buf
        steps.push(Code::AccumBinop {
            zero_out: true,
            accum: Binop::Arg2,
            op: Binop::Mul,
            lhs: velocity.clone(),
            rhs1: momentum.clone(),
            rhs2: velocity.clone(),
            projections: proj(),
        });
        // buf += pg
        steps.push(Code::AccumBinop {
            zero_out: false,
            accum: Binop::Add,
            op: Binop::Arg1,
            lhs: velocity.clone(),
            rhs1: state.delta.clone(),
            rhs2: state.delta.clone(),
            projections: proj(),
        });

        if config.nesterov {
            // pg += momentum * buf
            steps.push(Code::AccumBinop {
                zero_out: false,
                accum: Binop::Add,
                op: Binop::Mul,
                lhs: state.delta.clone(),
                rhs1: momentum.clone(),
                rhs2: velocity.clone(),
                projections: proj(),
            });
        } else {
            steps.push(Code::AccumUnop {
                zero_out: true,
                accum: Binop::Arg2,
                op: Unop::Identity,
                lhs: state.delta.clone(),
                rhs: velocity.clone(),
                projections: proj(),
            });
        }
    }

    // value += lr * pg  (lr already carries the sign)
    steps.push(Code::AccumBinop {
        zero_out: false,
        accum: Binop::Add,
        op: Binop::Mul,
        lhs: p.value.clone(),
        rhs1: config.lr.clone(),
        rhs2: state.delta.clone(),
        projections: proj(),
    });

    Code::BlockComment(String::from("sgd_one"), Box::new(Code::Seq(steps)))
}

/// `sgd_update(params; …)`: sequences [`sgd_one`] over every parameter.
pub fn sgd_update(states: &[SgdState], config: &SgdConfig) -> Code {
    Code::BlockComment(
        String::from("sgd_update"),
        Box::new(Code::Seq(states.iter().map(|s| sgd_one(s, config)).collect())),
    )
}

/// `forward(t)`: runs `code` to produce `t`. By default the result is
/// marked [`Visibility::Hosted`] because the caller reads it off the
/// host; pass `keep_device_only` when `t` only feeds further device-side
/// computation (e.g. an intermediate in a parameters-only subgraph) to
/// keep it [`Visibility::DeviceOnly`] instead, saving a host round trip.
pub fn forward(t: &TensorRef, code: Code, keep_device_only: bool) -> (Code, Visibility) {
    let visibility = if keep_device_only {
        Visibility::DeviceOnly
    } else {
        Visibility::Hosted
    };
    (
        Code::BlockComment(format!("forward({})", t.debug_name), Box::new(code)),
        visibility,
    )
}

/// Copies `tensor_id` from `context`'s device buffer to `host`, unless
/// `visibility` is [`Visibility::DeviceOnly`], in which case the device
/// value is left untouched and `host` is not written. Mirrors
/// [`crate::backend::Backend::to_host`]'s `bool` return: `false` means
/// nothing was copied, whether because the visibility forbade it or
/// because the backend itself reported the tensor absent.
#[cfg(feature = "std")]
pub fn sync_to_host(
    backend: &mut dyn crate::backend::Backend,
    context: crate::backend::ContextId,
    tensor_id: u64,
    host: &mut crate::buffer::Buffer,
    visibility: Visibility,
) -> crate::error::TensorcResult<bool> {
    if visibility == Visibility::DeviceOnly {
        return Ok(false);
    }
    backend.to_host(context, tensor_id, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_projections() -> Projections {
        Projections {
            product_space: Vec::new(),
            product_iterators: Vec::new(),
            lhs_dims: Vec::new(),
            rhs_dims: Vec::new(),
            project_lhs: Vec::new(),
            project_rhs: Vec::new(),
            debug_info: String::new(),
        }
    }

    fn tensor(id: u64, name: &str) -> TensorRef {
        TensorRef::new(id, name)
    }

    fn noop_code() -> Code {
        Code::Noop
    }

    #[test]
    fn grad_update_wraps_the_four_documented_blocks_in_order() {
        let loss = tensor(0, "loss");
        let param = Parameter {
            value: tensor(1, "w"),
            grad: tensor(2, "w.grad"),
            projections: empty_projections(),
        };
        let (code, visibility) = grad_update(&loss, &empty_projections(), noop_code(), &[param], noop_code());
        assert_eq!(visibility, Visibility::Hosted);
        match code {
            Code::BlockComment(label, body) => {
                assert_eq!(label, "grad_update");
                match *body {
                    Code::Seq(steps) => {
                        assert_eq!(steps.len(), 4);
                        let labels: Vec<&str> = steps
                            .iter()
                            .map(|s| match s {
                                Code::BlockComment(l, _) => l.as_str(),
                                _ => panic!("expected a labeled block"),
                            })
                            .collect();
                        assert_eq!(labels, ["forward", "zero_grads", "init_grad", "bprop"]);
                    }
                    _ => panic!("expected Seq"),
                }
            }
            _ => panic!("expected BlockComment"),
        }
    }

    #[test]
    fn sgd_one_without_momentum_or_decay_has_two_steps() {
        let state = SgdState {
            parameter: Parameter {
                value: tensor(1, "w"),
                grad: tensor(2, "w.grad"),
                projections: empty_projections(),
            },
            delta: tensor(3, "w.pg"),
            velocity: None,
        };
        let config = SgdConfig {
            lr: tensor(4, "neg_lr"),
            momentum: None,
            weight_decay: None,
            nesterov: false,
        };
        let code = sgd_one(&state, &config);
        match code {
            Code::BlockComment(label, body) => {
                assert_eq!(label, "sgd_one");
                match *body {
                    Code::Seq(steps) => assert_eq!(steps.len(), 2),
                    _ => panic!("expected Seq"),
                }
            }
            _ => panic!("expected BlockComment"),
        }
    }

    #[test]
    fn sgd_one_with_momentum_and_decay_adds_every_extra_step() {
        let state = SgdState {
            parameter: Parameter {
                value: tensor(1, "w"),
                grad: tensor(2, "w.grad"),
                projections: empty_projections(),
            },
            delta: tensor(3, "w.pg"),
            velocity: Some(tensor(5, "w.buf")),
        };
        let config = SgdConfig {
            lr: tensor(4, "neg_lr"),
            momentum: Some(tensor(6, "momentum")),
            weight_decay: Some(tensor(7, "weight_decay")),
            nesterov: true,
        };
        let code = sgd_one(&state, &config);
        match code {
            Code::BlockComment(_, body) => match *body {
                // init, weight_decay, buf *= momentum, buf += pg, pg += momentum*buf, value update
                Code::Seq(steps) => assert_eq!(steps.len(), 6),
                _ => panic!("expected Seq"),
            },
            _ => panic!("expected BlockComment"),
        }
    }

    #[test]
    fn sgd_update_sequences_one_block_per_parameter() {
        let make_state = |id: u64| SgdState {
            parameter: Parameter {
                value: tensor(id, "w"),
                grad: tensor(id + 1, "w.grad"),
                projections: empty_projections(),
            },
            delta: tensor(id + 2, "w.pg"),
            velocity: None,
        };
        let states = alloc::vec![make_state(0), make_state(10)];
        let config = SgdConfig {
            lr: tensor(99, "neg_lr"),
            momentum: None,
            weight_decay: None,
            nesterov: false,
        };
        let code = sgd_update(&states, &config);
        match code {
            Code::BlockComment(label, body) => {
                assert_eq!(label, "sgd_update");
                match *body {
                    Code::Seq(steps) => assert_eq!(steps.len(), 2),
                    _ => panic!("expected Seq"),
                }
            }
            _ => panic!("expected BlockComment"),
        }
    }

    #[test]
    fn forward_marks_the_tensor_hosted_by_default() {
        let t = tensor(1, "out");
        let (code, visibility) = forward(&t, noop_code(), false);
        assert_eq!(visibility, Visibility::Hosted);
        assert!(matches!(code, Code::BlockComment(_, _)));
    }

    #[test]
    fn forward_keeps_the_tensor_device_only_when_asked() {
        let t = tensor(1, "hidden");
        let (_, visibility) = forward(&t, noop_code(), true);
        assert_eq!(visibility, Visibility::DeviceOnly);
    }

    #[test]
    fn sync_to_host_skips_the_backend_for_device_only_tensors() {
        use crate::backend::cpu::CpuBackend;
        use crate::backend::{Backend, DeviceId};
        use crate::buffer::{Buffer, InitOp, Precision};
        use crate::session::Session;

        let mut backend = CpuBackend::new();
        backend.initialize().unwrap();
        let context = backend.init(DeviceId(0)).unwrap();
        let mut session = Session::new();
        let mut host = Buffer::create(Precision::Single, alloc::vec![1], &InitOp::RangeOverOffsets, &mut session).unwrap();

        let synced = sync_to_host(&mut backend, context, 1, &mut host, Visibility::DeviceOnly).unwrap();
        assert!(!synced);
    }
}
