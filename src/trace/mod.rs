//! Tracing: visit analysis, virtualization/inlining, algebraic simplification.

pub mod inline;
pub mod simplify;
pub mod visit;

use hashbrown::HashMap;

use crate::ll::Code;
use crate::session::Session;

pub use inline::VirtualizationOutcome;
pub use visit::{AccessRecord, TracedTensor, VisitState};

/// The five tunables governing passes 1–4, plus `optimize_integer_pow`
/// for pass 5's integer-power rewrite.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Keep device-only tensors off the host (consulted by `compose`'s
    /// host-sync helper, not by this module directly).
    pub enable_device_only: bool,
    /// Above this many non-recurrent accesses, a candidate is demoted to
    /// materialized.
    pub max_visits: u32,
    /// Replace `Get` of a scalar-proven tensor with its literal during
    /// cleanup.
    pub inline_constants: bool,
    /// Inline a candidate even when its write site sits under a
    /// `Dynamic-indices` wrapper.
    pub always_inline_dynamic_indexing: bool,
    /// Whether `Sample-num` axes block replication.
    pub sequential_minibatch: bool,
    /// Unroll `ToPowOf` with a scalar integer exponent into a product
    /// chain during pass 5.
    pub optimize_integer_pow: bool,
}

impl Settings {
    pub fn new() -> Self {
        Settings {
            enable_device_only: false,
            max_visits: 3,
            inline_constants: false,
            always_inline_dynamic_indexing: false,
            sequential_minibatch: true,
            optimize_integer_pow: false,
        }
    }

    /// Reads every setting from CLI/env preferences (`crate::session::pref*`),
    /// falling back to [`Settings::new`]'s defaults.
    #[cfg(feature = "std")]
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Settings {
            enable_device_only: crate::session::pref_bool("enable_device_only", defaults.enable_device_only),
            max_visits: crate::session::pref_usize("max_visits", defaults.max_visits as usize) as u32,
            inline_constants: crate::session::pref_bool("inline_constants", defaults.inline_constants),
            always_inline_dynamic_indexing: crate::session::pref_bool(
                "always_inline_dynamic_indexing",
                defaults.always_inline_dynamic_indexing,
            ),
            sequential_minibatch: crate::session::pref_bool("sequential_minibatch", defaults.sequential_minibatch),
            optimize_integer_pow: crate::session::pref_bool("optimize_integer_pow", defaults.optimize_integer_pow),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs passes 1–4 over one lowered program: visit, collect candidates,
/// inline eligible virtual tensors at their use sites, then drop their
/// now-dead original write sites (constant-folding scalar-proven ones
/// when `settings.inline_constants` is set).
pub fn virtualize(code: &Code, session: &mut Session, settings: &Settings) -> Code {
    let mut state = VisitState::new(settings.sequential_minibatch);
    visit::visit_code(&mut state, code);
    visit::finish_visit(&mut state);

    let candidates = inline::collect_candidates(&state, code, settings);
    let eligible: HashMap<u64, inline::Candidate> = candidates
        .into_iter()
        .filter_map(|(id, result)| result.ok().map(|c| (id, c)))
        .collect();

    let inlined = inline::inline_pass(code, &eligible, session);
    let virtualized_ids: alloc::vec::Vec<u64> = eligible.keys().copied().collect();

    let scalars: HashMap<u64, f64> = if settings.inline_constants {
        state
            .tensors
            .iter()
            .filter_map(|(&id, t)| t.scalar.map(|v| (id, v)))
            .collect()
    } else {
        HashMap::new()
    };
    inline::cleanup(&inlined, &virtualized_ids, &scalars)
}

/// Runs passes 1–5: [`virtualize`] followed by the algebraic simplifier
/// fixpoint.
pub fn trace_and_simplify(code: &Code, session: &mut Session, settings: &Settings) -> Code {
    let virtualized = virtualize(code, session, settings);
    simplify::simplify_fixpoint(&virtualized, settings.optimize_integer_pow)
}
