//! Session & configuration.
//!
//! Process-wide state — id allocators, the init-op RNG, and debug flags —
//! encapsulated into one explicit record instead of left as statics.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Default seed used when no `fixed-state-for-init` is requested.
///
/// Kept deterministic rather than reaching for OS entropy so the crate
/// stays usable under `no_std`. The init-op RNG is process-global and
/// seeds deterministically from this value, treating the default as the
/// unset case.
const DEFAULT_SEED: u64 = 0x5eed_5eed_5eed_5eed;

/// Explicit encapsulation of process-wide mutable state.
pub struct Session {
    next_tensor_id: u64,
    next_shape_id: u64,
    next_scope_id: u64,
    next_symbol_id: u64,
    rng: SmallRng,
    /// When set, the compile pipeline writes `.hlc`/`.llc` debug artifacts
    /// for each compiled kernel into the current directory.
    pub output_debug_files_in_run_directory: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Seeds the init-op RNG deterministically (`fixed-state-for-init`).
    pub fn with_seed(seed: u64) -> Self {
        Session {
            next_tensor_id: 0,
            next_shape_id: 0,
            next_scope_id: 0,
            next_symbol_id: 0,
            rng: SmallRng::seed_from_u64(seed),
            output_debug_files_in_run_directory: false,
        }
    }

    pub fn alloc_tensor_id(&mut self) -> u64 {
        let id = self.next_tensor_id;
        self.next_tensor_id += 1;
        id
    }

    pub fn alloc_shape_id(&mut self) -> u64 {
        let id = self.next_shape_id;
        self.next_shape_id += 1;
        id
    }

    pub fn alloc_scope_id(&mut self) -> u64 {
        let id = self.next_scope_id;
        self.next_scope_id += 1;
        id
    }

    pub fn alloc_symbol_id(&mut self) -> u64 {
        let id = self.next_symbol_id;
        self.next_symbol_id += 1;
        id
    }

    pub fn rng_mut(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the lookup variants for a preference name: `<name>`, upper-case,
/// and both prefixed with `ocannl_`/`OCANNL_`/`ocannl-`/`OCANNL-`.
fn env_variants(name: &str) -> Vec<String> {
    let upper = name.to_uppercase();
    alloc::vec![
        String::from(name),
        upper.clone(),
        format!("ocannl_{name}"),
        format!("OCANNL_{upper}"),
        format!("ocannl-{name}"),
        format!("OCANNL-{upper}"),
    ]
}

/// Builds the additional command-line variants: every env variant, with
/// leading `-`/`--` and trailing `_`/`-`/`=` optionally applied.
#[cfg(feature = "std")]
fn cli_variants(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    for base in env_variants(name) {
        for prefix in ["", "-", "--"] {
            for suffix in ["", "_", "-", "="] {
                out.push(format!("{prefix}{base}{suffix}"));
            }
        }
    }
    out
}

#[cfg(feature = "std")]
fn cli_lookup(name: &str) -> Option<String> {
    let variants = cli_variants(name);
    let args: Vec<String> = std::env::args().collect();
    for arg in &args {
        for variant in &variants {
            if let Some(rest) = arg.strip_prefix(variant.as_str()) {
                // Bare flag with no value attached: treat presence as "true".
                if variant.ends_with('=') {
                    return Some(String::from(rest));
                }
                if arg == variant {
                    return Some(String::from("true"));
                }
            }
        }
    }
    None
}

#[cfg(feature = "std")]
fn env_lookup(name: &str) -> Option<String> {
    for variant in env_variants(name) {
        if let Ok(value) = std::env::var(&variant) {
            return Some(value);
        }
    }
    None
}

/// Looks up a configuration preference: first command-line arguments,
/// then environment variables, then `default`.
#[cfg(feature = "std")]
pub fn pref(name: &str, default: Option<&str>) -> Option<String> {
    cli_lookup(name)
        .or_else(|| env_lookup(name))
        .or_else(|| default.map(String::from))
}

#[cfg(feature = "std")]
pub fn pref_bool(name: &str, default: bool) -> bool {
    match pref(name, None) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

#[cfg(feature = "std")]
pub fn pref_usize(name: &str, default: usize) -> usize {
    pref(name, None)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn env_variants_cover_ocannl_prefixes() {
        let variants = env_variants("debug");
        assert!(variants.contains(&String::from("debug")));
        assert!(variants.contains(&String::from("DEBUG")));
        assert!(variants.contains(&String::from("ocannl_debug")));
        assert!(variants.contains(&String::from("OCANNL_DEBUG")));
    }

    #[test]
    fn pref_falls_back_to_default() {
        assert_eq!(
            pref("definitely_not_set_xyz", Some("fallback")),
            Some(String::from("fallback"))
        );
    }

    #[test]
    fn id_allocators_are_monotonic() {
        let mut session = Session::new();
        assert_eq!(session.alloc_tensor_id(), 0);
        assert_eq!(session.alloc_tensor_id(), 1);
        assert_eq!(session.alloc_shape_id(), 0);
    }
}
