//! Error taxonomy for the whole crate.

use alloc::string::String;
use alloc::vec::Vec;

/// One entry in a shape-error trace: which structural level failed to unify.
///
/// Accumulated as unification unwinds so the final message can read like
/// `"Einsum <spec> / dim tail / label mismatch"`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum TraceEntry {
    #[cfg_attr(feature = "std", error("shape {debug_name} (#{id})"))]
    Shape { id: u64, debug_name: String },
    #[cfg_attr(feature = "std", error("{kind} row of shape #{shape_id}"))]
    Row { shape_id: u64, kind: &'static str },
    #[cfg_attr(feature = "std", error("dim: {description}"))]
    Dim { description: String },
    #[cfg_attr(feature = "std", error("index: {description}"))]
    Index { description: String },
}

/// Errors produced anywhere in the IR, optimizer, backends, or scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum TensorcError {
    /// Bad dims, non-divisible `Total-elems`, precision mismatch, unknown
    /// backend name, SGD on a non-parameter. Surfaced immediately, never
    /// retried.
    #[cfg_attr(feature = "std", error("invalid input: {message}"))]
    UserInput { message: String },

    /// Shape unification failure. `trace` lists the participating
    /// shapes/rows/dims/indices in unwind order.
    #[cfg_attr(feature = "std", error("{message}"))]
    Shape { message: String, trace: Vec<TraceEntry> },

    /// Failure reported by a backend while compiling optimized LL IR.
    #[cfg_attr(
        feature = "std",
        error("compile error in backend `{backend}` while compiling `{ir_name}`: {diagnostic}")
    )]
    Compile {
        backend: String,
        ir_name: String,
        diagnostic: String,
    },

    /// Out-of-bounds access or other host-resident kernel failure.
    #[cfg_attr(
        feature = "std",
        error("runtime error in tensor `{tensor}` at indices {indices:?}: {message}")
    )]
    Runtime {
        tensor: String,
        indices: Vec<usize>,
        message: String,
    },

    /// Violation of an internal invariant (e.g. a virtual tensor reached
    /// code emission). A bug, not a user error.
    #[cfg_attr(feature = "std", error("internal invariant violated: {message}"))]
    Invariant { message: String },
}

impl TensorcError {
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput {
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>, trace: Vec<TraceEntry>) -> Self {
        Self::Shape {
            message: message.into(),
            trace,
        }
    }

    pub fn compile(
        backend: impl Into<String>,
        ir_name: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self::Compile {
            backend: backend.into(),
            ir_name: ir_name.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn runtime(tensor: impl Into<String>, indices: Vec<usize>, message: impl Into<String>) -> Self {
        Self::Runtime {
            tensor: tensor.into(),
            indices,
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}

/// Result type used throughout the crate.
pub type TensorcResult<T> = core::result::Result<T, TensorcError>;
