//! `cuda`: stub backend. Reports every device as unavailable, mirroring
//! how GPU-capable crates degrade gracefully when no toolchain/driver is
//! present at build time. GPU code emission is out of scope here; this
//! backend exists so `by_name("cuda")` resolves instead of hard-erroring
//! at backend selection, consistent with the framework recognizing the
//! name as a first-class citizen even where no device is ever reachable.

use super::{Backend, Compiled, ContextId, DeviceId};
use crate::buffer::Buffer;
use crate::error::{TensorcError, TensorcResult};
use crate::hl::Binop;
use crate::index::Bindings;
use crate::ll;

fn device_unavailable() -> TensorcError {
    TensorcError::compile(
        "cuda",
        "<device-probe>",
        "cuda device unavailable: no GPU toolchain compiled in",
    )
}

pub struct CudaBackend {
    initialized: bool,
}

impl CudaBackend {
    pub fn new() -> Self {
        CudaBackend { initialized: false }
    }
}

impl Default for CudaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn initialize(&mut self) -> TensorcResult<()> {
        self.initialized = true;
        log::warn!("cuda backend initialized with zero visible devices (stub)");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    unsafe fn unsafe_cleanup(&mut self) -> TensorcResult<()> {
        self.initialized = false;
        Ok(())
    }

    fn init(&mut self, _device: DeviceId) -> TensorcResult<ContextId> {
        Err(device_unavailable())
    }

    fn finalize(&mut self, _context: ContextId) -> TensorcResult<()> {
        Err(device_unavailable())
    }

    fn compile(
        &mut self,
        _context: ContextId,
        _name: Option<&str>,
        _verbose: bool,
        _bindings: Bindings,
        _code: &ll::Code,
    ) -> TensorcResult<Compiled> {
        Err(device_unavailable())
    }

    fn from_host(&mut self, _context: ContextId, _tensor_id: u64, _host: &Buffer) -> TensorcResult<bool> {
        Err(device_unavailable())
    }

    fn to_host(&mut self, _context: ContextId, _tensor_id: u64, _host: &mut Buffer) -> TensorcResult<bool> {
        Err(device_unavailable())
    }

    fn merge(
        &mut self,
        _tensor_id: u64,
        _dst_ctx: ContextId,
        _accum: Binop,
        _src_ctx: ContextId,
        _name_suffix: Option<&str>,
    ) -> TensorcResult<Option<Compiled>> {
        Err(device_unavailable())
    }

    fn await_device(&mut self, _device: DeviceId) -> TensorcResult<()> {
        Err(device_unavailable())
    }

    fn num_devices(&self) -> usize {
        0
    }

    fn get_device(&self, _ordinal: usize) -> TensorcResult<DeviceId> {
        Err(device_unavailable())
    }

    fn get_ctx_device(&self, _context: ContextId) -> TensorcResult<DeviceId> {
        Err(device_unavailable())
    }

    fn to_ordinal(&self, device: DeviceId) -> usize {
        device.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuda_backend_reports_zero_devices() {
        let backend = CudaBackend::new();
        assert_eq!(backend.num_devices(), 0);
    }

    #[test]
    fn init_always_reports_device_unavailable() {
        let mut backend = CudaBackend::new();
        let err = backend.init(DeviceId(0)).unwrap_err();
        assert!(alloc::format!("{err}").contains("unavailable"));
    }
}
