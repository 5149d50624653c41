//! Indexing & symbols (component B).

pub mod proj;

pub use proj::ProjId;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;

/// A dedicated flavor marks a symbol as not substitutable during inlining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Plain,
    TaskId,
    SampleNum,
    Frozen,
}

/// An iteration symbol: a unique id, an optional label, and a flavor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub id: u64,
    pub label: Option<String>,
    flavor_tag: u8,
}

impl Symbol {
    pub fn new(id: u64, label: Option<String>) -> Self {
        Symbol {
            id,
            label,
            flavor_tag: 0,
        }
    }

    pub fn with_flavor(id: u64, label: Option<String>, flavor: SymbolFlavor) -> Self {
        Symbol {
            id,
            label,
            flavor_tag: flavor as u8,
        }
    }

    pub fn flavor(&self) -> SymbolFlavor {
        match self.flavor_tag {
            1 => SymbolFlavor::TaskId,
            2 => SymbolFlavor::SampleNum,
            3 => SymbolFlavor::Frozen,
            _ => SymbolFlavor::Plain,
        }
    }

    /// Dedicated symbols (task-id, sample-num, frozen) are never
    /// substituted during inlining.
    pub fn is_dedicated(&self) -> bool {
        !matches!(self.flavor(), SymbolFlavor::Plain)
    }
}

impl core::fmt::Display for Symbol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label}"),
            None => write!(f, "i{}", self.id),
        }
    }
}

/// An axis-index as it appears on one side of a `Set`/`Get`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AxisIndex {
    /// A compile-time-fixed position.
    Fixed(usize),
    /// A bound loop iterator.
    Iterator(Symbol),
    /// Receives a runtime-computed index from a `Dynamic-provider`.
    DynamicRecipient(Symbol),
    /// Receives a runtime-computed index that must not be substituted.
    FrozenRecipient(Symbol),
    /// Computes indices at runtime and feeds them to a recipient.
    DynamicProvider {
        idcs: Vec<AxisIndex>,
        target_dims: Vec<usize>,
    },
}

impl AxisIndex {
    /// Iterator symbols referenced directly by this index (not descending
    /// into nested providers' own iterator use beyond one level, which
    /// mirrors how the visit pass only needs the immediately bound set).
    pub fn referenced_symbol(&self) -> Option<&Symbol> {
        match self {
            AxisIndex::Iterator(s) | AxisIndex::DynamicRecipient(s) | AxisIndex::FrozenRecipient(s) => {
                Some(s)
            }
            AxisIndex::Fixed(_) | AxisIndex::DynamicProvider { .. } => None,
        }
    }
}

/// A named mutable integer cell with an optional range, set by the
/// scheduler between kernel-launch submissions.
#[derive(Debug, Clone)]
pub struct StaticBinding {
    pub symbol: Symbol,
    pub range: Option<usize>,
    cell: Arc<AtomicUsize>,
}

impl StaticBinding {
    pub fn new(symbol: Symbol, range: Option<usize>) -> Self {
        StaticBinding {
            symbol,
            range,
            cell: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn get(&self) -> usize {
        self.cell.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: usize) {
        self.cell.store(value, Ordering::SeqCst);
    }

    /// A cheap clone of the mutable cell, so a compiled kernel can read
    /// the live value without holding the `StaticBinding` itself.
    pub fn cell(&self) -> Arc<AtomicUsize> {
        self.cell.clone()
    }
}

/// A set of static bindings composed by `empty_bindings`/`extend_bindings`
///.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    by_symbol: HashMap<u64, StaticBinding>,
}

impl Bindings {
    pub fn empty() -> Self {
        Bindings::default()
    }

    pub fn extend(&self, binding: StaticBinding) -> Self {
        let mut by_symbol = self.by_symbol.clone();
        by_symbol.insert(binding.symbol.id, binding);
        Bindings { by_symbol }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&StaticBinding> {
        self.by_symbol.get(&symbol.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StaticBinding> {
        self.by_symbol.values()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}
