//! `cpu-jit`: a reference backend that interprets optimized LL IR
//! directly against host buffers in a single in-process context. Stands
//! in for "a JIT" — it honors the full backend contract without emitting
//! native code.

use alloc::boxed::Box;
use alloc::vec::Vec;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use super::{Backend, Compiled, ContextId, DeviceId, Work};
use crate::buffer::Buffer;
use crate::error::{TensorcError, TensorcResult};
use crate::hl::Binop;
use crate::index::{AxisIndex, Bindings};
use crate::ll::{Code, Expr};

#[derive(Default)]
struct CpuContext {
    buffers: HashMap<u64, Buffer>,
}

/// Single in-process device: every context shares the one CPU, so
/// `num_devices` is always 1.
pub struct CpuBackend {
    initialized: bool,
    contexts: HashMap<u64, Arc<Mutex<CpuContext>>>,
    next_context: u64,
}

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend {
            initialized: false,
            contexts: HashMap::new(),
            next_context: 0,
        }
    }

    fn context(&self, id: ContextId) -> TensorcResult<Arc<Mutex<CpuContext>>> {
        self.contexts
            .get(&id.0)
            .cloned()
            .ok_or_else(|| TensorcError::invariant(alloc::format!("unknown cpu-jit context #{}", id.0)))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct CpuWork {
    context: Arc<Mutex<CpuContext>>,
    code: Arc<Code>,
    bindings: Bindings,
}

impl Work for CpuWork {
    fn run(&mut self) -> TensorcResult<()> {
        let mut ctx = self.context.lock().expect("cpu-jit context mutex poisoned");
        let mut env: HashMap<u64, usize> = HashMap::new();
        for binding in self.bindings.iter() {
            env.insert(binding.symbol.id, binding.get());
        }
        let mut locals: HashMap<u64, f64> = HashMap::new();
        exec_code(&self.code, &mut ctx, &mut env, &mut locals)
    }
}

fn eval_idx(idx: &AxisIndex, env: &HashMap<u64, usize>) -> TensorcResult<usize> {
    match idx {
        AxisIndex::Fixed(n) => Ok(*n),
        AxisIndex::Iterator(s) | AxisIndex::DynamicRecipient(s) | AxisIndex::FrozenRecipient(s) => env
            .get(&s.id)
            .copied()
            .ok_or_else(|| TensorcError::invariant(alloc::format!("unbound iterator `{s}` at kernel run time"))),
        AxisIndex::DynamicProvider { .. } => Err(TensorcError::invariant(
            "a Dynamic-provider index cannot itself be resolved to a concrete position",
        )),
    }
}

fn eval_idcs(idcs: &[AxisIndex], env: &HashMap<u64, usize>) -> TensorcResult<Vec<usize>> {
    idcs.iter().map(|i| eval_idx(i, env)).collect()
}

fn apply_binop(op: Binop, a: f64, b: f64) -> f64 {
    match op {
        Binop::Arg1 => a,
        Binop::Arg2 => b,
        Binop::Add => a + b,
        Binop::Mul => a * b,
        Binop::ToPowOf => powf(a, b),
        Binop::ReluGate => {
            if a > 0.0 {
                b
            } else {
                0.0
            }
        }
    }
}

#[cfg(feature = "std")]
fn powf(a: f64, b: f64) -> f64 {
    a.powf(b)
}

#[cfg(not(feature = "std"))]
fn powf(a: f64, b: f64) -> f64 {
    libm::pow(a, b)
}

fn apply_unop(op: crate::hl::Unop, a: f64) -> f64 {
    match op {
        crate::hl::Unop::Identity => a,
        crate::hl::Unop::Relu => a.max(0.0),
    }
}

fn eval_expr(
    expr: &Expr,
    ctx: &mut CpuContext,
    env: &mut HashMap<u64, usize>,
    locals: &mut HashMap<u64, f64>,
) -> TensorcResult<f64> {
    match expr {
        Expr::Constant(c) => Ok(*c),
        Expr::Get { ptr, idcs } => {
            let concrete = eval_idcs(idcs, env)?;
            let buf = ctx
                .buffers
                .get(&ptr.id)
                .ok_or_else(|| TensorcError::invariant(alloc::format!("tensor `{ptr}` has no cpu-jit buffer")))?;
            buf.get_as_float(&concrete)
        }
        Expr::GetLocal(id) => locals
            .get(id)
            .copied()
            .ok_or_else(|| TensorcError::invariant(alloc::format!("local scope #{id} read before set"))),
        Expr::GetGlobal(name) => Err(TensorcError::invariant(alloc::format!(
            "global `{name}` is not resolvable by cpu-jit"
        ))),
        Expr::LocalScope { id, body, .. } => {
            exec_code(body, ctx, env, locals)?;
            locals
                .get(id)
                .copied()
                .ok_or_else(|| TensorcError::invariant(alloc::format!("local scope #{id} never assigned")))
        }
        Expr::Binop(op, a, b) => {
            let a = eval_expr(a, ctx, env, locals)?;
            let b = eval_expr(b, ctx, env, locals)?;
            Ok(apply_binop(*op, a, b))
        }
        Expr::Unop(op, a) => Ok(apply_unop(*op, eval_expr(a, ctx, env, locals)?)),
    }
}

fn exec_code(
    code: &Code,
    ctx: &mut CpuContext,
    env: &mut HashMap<u64, usize>,
    locals: &mut HashMap<u64, f64>,
) -> TensorcResult<()> {
    match code {
        Code::Comment(_) => Ok(()),
        Code::Lines(lines) => {
            for line in lines {
                exec_code(line, ctx, env, locals)?;
            }
            Ok(())
        }
        Code::ForLoop {
            index, from, to, body, ..
        } => {
            for i in *from..*to {
                env.insert(index.id, i);
                exec_code(body, ctx, env, locals)?;
            }
            Ok(())
        }
        Code::ZeroOut(ptr) => {
            let buf = ctx
                .buffers
                .get_mut(&ptr.id)
                .ok_or_else(|| TensorcError::invariant(alloc::format!("tensor `{ptr}` has no cpu-jit buffer")))?;
            buf.try_fill_from_float(0.0)
        }
        Code::Set { ptr, idcs, expr } => {
            let value = eval_expr(expr, ctx, env, locals)?;
            let concrete = eval_idcs(idcs, env)?;
            let buf = ctx
                .buffers
                .get_mut(&ptr.id)
                .ok_or_else(|| TensorcError::invariant(alloc::format!("tensor `{ptr}` has no cpu-jit buffer")))?;
            buf.set_from_float(&concrete, value)
        }
        Code::SetLocal { scope, expr } => {
            let value = eval_expr(expr, ctx, env, locals)?;
            locals.insert(*scope, value);
            Ok(())
        }
        // No front-end in this implementation ever populates a real
        // Dynamic-provider value, so the recipient binding here is a
        // no-op; the body still executes under whatever iterators are
        // already bound.
        Code::DynamicIndices { body, slice, .. } => {
            exec_code(body, ctx, env, locals)?;
            if let Some(slice_code) = slice {
                exec_code(slice_code, ctx, env, locals)?;
            }
            Ok(())
        }
        Code::Rebalance { children, .. } => {
            for child in children {
                exec_code(child, ctx, env, locals)?;
            }
            Ok(())
        }
        Code::StagedCompilation(inner) => exec_code(inner, ctx, env, locals),
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu-jit"
    }

    fn initialize(&mut self) -> TensorcResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    unsafe fn unsafe_cleanup(&mut self) -> TensorcResult<()> {
        self.contexts.clear();
        self.initialized = false;
        Ok(())
    }

    fn init(&mut self, _device: DeviceId) -> TensorcResult<ContextId> {
        let id = self.next_context;
        self.next_context += 1;
        self.contexts.insert(id, Arc::new(Mutex::new(CpuContext::default())));
        Ok(ContextId(id))
    }

    fn finalize(&mut self, context: ContextId) -> TensorcResult<()> {
        self.contexts.remove(&context.0);
        Ok(())
    }

    fn compile(
        &mut self,
        context: ContextId,
        name: Option<&str>,
        verbose: bool,
        bindings: Bindings,
        code: &Code,
    ) -> TensorcResult<Compiled> {
        let ctx = self.context(context)?;
        if verbose {
            log::trace!(
                "cpu-jit compiling `{}`",
                name.unwrap_or("<anonymous>")
            );
        }
        let code = Arc::new(code.clone());
        let work: Arc<dyn Fn() -> Box<dyn Work> + Send + Sync> = {
            let ctx = ctx.clone();
            let code = code.clone();
            let bindings_for_run = bindings.clone();
            Arc::new(move || {
                Box::new(CpuWork {
                    context: ctx.clone(),
                    code: code.clone(),
                    bindings: bindings_for_run.clone(),
                }) as Box<dyn Work>
            })
        };
        Ok(Compiled {
            context,
            bindings,
            work,
        })
    }

    fn from_host(&mut self, context: ContextId, tensor_id: u64, host: &Buffer) -> TensorcResult<bool> {
        let Some(ctx) = self.contexts.get(&context.0) else {
            return Ok(false);
        };
        ctx.lock().expect("cpu-jit context mutex poisoned").buffers.insert(tensor_id, host.clone());
        Ok(true)
    }

    fn to_host(&mut self, context: ContextId, tensor_id: u64, host: &mut Buffer) -> TensorcResult<bool> {
        let Some(ctx) = self.contexts.get(&context.0) else {
            return Ok(false);
        };
        let guard = ctx.lock().expect("cpu-jit context mutex poisoned");
        let Some(buf) = guard.buffers.get(&tensor_id) else {
            return Ok(false);
        };
        *host = buf.clone();
        Ok(true)
    }

    fn merge(
        &mut self,
        tensor_id: u64,
        dst_ctx: ContextId,
        accum: Binop,
        src_ctx: ContextId,
        _name_suffix: Option<&str>,
    ) -> TensorcResult<Option<Compiled>> {
        let dst = self.context(dst_ctx)?;
        let src = self.context(src_ctx)?;
        let work: Arc<dyn Fn() -> Box<dyn Work> + Send + Sync> = Arc::new(move || {
            Box::new(MergeWork {
                dst: dst.clone(),
                src: src.clone(),
                tensor_id,
                accum,
            }) as Box<dyn Work>
        });
        Ok(Some(Compiled {
            context: dst_ctx,
            bindings: Bindings::empty(),
            work,
        }))
    }

    fn await_device(&mut self, _device: DeviceId) -> TensorcResult<()> {
        // Single-threaded in-process execution: every submitted Work has
        // already completed synchronously by the time run() returns.
        Ok(())
    }

    fn num_devices(&self) -> usize {
        1
    }

    fn get_device(&self, ordinal: usize) -> TensorcResult<DeviceId> {
        if ordinal == 0 {
            Ok(DeviceId(0))
        } else {
            Err(TensorcError::user_input(alloc::format!(
                "cpu-jit has 1 device, requested ordinal {ordinal}"
            )))
        }
    }

    fn get_ctx_device(&self, _context: ContextId) -> TensorcResult<DeviceId> {
        Ok(DeviceId(0))
    }

    fn to_ordinal(&self, device: DeviceId) -> usize {
        device.0 as usize
    }
}

struct MergeWork {
    dst: Arc<Mutex<CpuContext>>,
    src: Arc<Mutex<CpuContext>>,
    tensor_id: u64,
    accum: Binop,
}

impl Work for MergeWork {
    fn run(&mut self) -> TensorcResult<()> {
        let src_guard = self.src.lock().expect("cpu-jit context mutex poisoned");
        let src_buf = src_guard
            .buffers
            .get(&self.tensor_id)
            .ok_or_else(|| TensorcError::invariant("merge source tensor missing"))?
            .clone();
        drop(src_guard);
        let mut dst_guard = self.dst.lock().expect("cpu-jit context mutex poisoned");
        let dst_buf = dst_guard
            .buffers
            .get_mut(&self.tensor_id)
            .ok_or_else(|| TensorcError::invariant("merge destination tensor missing"))?;
        for offset in 0..dst_buf.len() {
            let idcs = linear_to_idcs(offset, dst_buf.dims());
            let a = dst_buf.get_as_float(&idcs)?;
            let b = src_buf.get_as_float(&idcs)?;
            dst_buf.set_from_float(&idcs, apply_binop(self.accum, a, b))?;
        }
        Ok(())
    }
}

fn linear_to_idcs(mut offset: usize, dims: &[usize]) -> Vec<usize> {
    let mut idcs = alloc::vec![0usize; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        idcs[i] = offset % dim;
        offset /= dim;
    }
    idcs
}
