//! Backend interface.
//!
//! A backend turns optimized LL IR plus static bindings into a compiled
//! kernel bound to one device context, and moves tensor data between host
//! buffers and that context.

#![cfg(feature = "std")]

pub mod cpu;
pub mod cuda;

use alloc::sync::Arc;

use crate::buffer::Buffer;
use crate::error::TensorcResult;
use crate::hl::Binop;
use crate::index::Bindings;
use crate::ll;

/// Opaque device handle, scoped to the backend that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

/// Opaque compiled-kernel context handle, scoped to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// A submittable unit of work. `run()` enqueues the kernel on its
/// context's device; for the reference CPU backend this executes
/// synchronously in place.
pub trait Work {
    fn run(&mut self) -> TensorcResult<()>;
}

/// The result of [`Backend::compile`]: a context-bound kernel plus the
/// (possibly backend-rewritten) bindings it closed over.
pub struct Compiled {
    pub context: ContextId,
    pub bindings: Bindings,
    pub work: Arc<dyn Fn() -> Box<dyn Work> + Send + Sync>,
}

impl Compiled {
    /// Builds one fresh [`Work`] handle for this compiled kernel.
    pub fn schedule(&self) -> Box<dyn Work> {
        (self.work)()
    }
}

/// The contract every execution backend implements. Two backends are
/// registered by name: `cpu-jit` ([`cpu::CpuBackend`]) and `cuda`
/// ([`cuda::CudaBackend`]).
pub trait Backend {
    fn name(&self) -> &'static str;

    fn initialize(&mut self) -> TensorcResult<()>;
    fn is_initialized(&self) -> bool;

    /// Releases every device resource this backend holds. Unsafe because
    /// callers must ensure no compiled kernel is still in flight.
    unsafe fn unsafe_cleanup(&mut self) -> TensorcResult<()>;

    fn init(&mut self, device: DeviceId) -> TensorcResult<ContextId>;
    fn finalize(&mut self, context: ContextId) -> TensorcResult<()>;

    fn compile(
        &mut self,
        context: ContextId,
        name: Option<&str>,
        verbose: bool,
        bindings: Bindings,
        code: &ll::Code,
    ) -> TensorcResult<Compiled>;

    /// Copies `tensor_id`'s data from `host` into `context`'s device
    /// buffer. Returns `false` (not an error) if the tensor isn't present
    /// in this context.
    fn from_host(&mut self, context: ContextId, tensor_id: u64, host: &Buffer) -> TensorcResult<bool>;

    /// Copies `tensor_id`'s data from `context`'s device buffer into
    /// `host`. Returns `false` if the tensor isn't present in this context.
    fn to_host(&mut self, context: ContextId, tensor_id: u64, host: &mut Buffer) -> TensorcResult<bool>;

    /// Compiles `dst = dst accum src` for `tensor_id`, pulling from
    /// `src_ctx`'s buffer. Returns `None` if no merge kernel is available
    /// between these two contexts (e.g. different backends).
    fn merge(
        &mut self,
        tensor_id: u64,
        dst_ctx: ContextId,
        accum: Binop,
        src_ctx: ContextId,
        name_suffix: Option<&str>,
    ) -> TensorcResult<Option<Compiled>>;

    fn await_device(&mut self, device: DeviceId) -> TensorcResult<()>;

    fn num_devices(&self) -> usize;
    fn get_device(&self, ordinal: usize) -> TensorcResult<DeviceId>;
    fn get_ctx_device(&self, context: ContextId) -> TensorcResult<DeviceId>;
    fn to_ordinal(&self, device: DeviceId) -> usize;
}

/// Constructs the backend registered under `name`. An unknown name is a
/// hard error at construction.
pub fn by_name(name: &str) -> TensorcResult<alloc::boxed::Box<dyn Backend>> {
    match name {
        "cpu-jit" => Ok(alloc::boxed::Box::new(cpu::CpuBackend::new())),
        "cuda" => Ok(alloc::boxed::Box::new(cuda::CudaBackend::new())),
        other => Err(crate::error::TensorcError::user_input(alloc::format!(
            "unknown backend `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_name_rejects_unknown_backends() {
        assert!(by_name("tpu-magic").is_err());
    }

    #[test]
    fn by_name_resolves_both_registered_backends() {
        assert!(by_name("cpu-jit").is_ok());
        assert!(by_name("cuda").is_ok());
    }

    #[test]
    fn device_and_context_ids_carry_their_ordinal() {
        let d = DeviceId(0);
        let c = ContextId(0);
        assert_eq!(d.0, c.0);
    }
}
