//! Union-find over projection-equivalence-class ids.
//!
//! When unification proves two dims equal in size, their proj-ids are
//! unioned so the loop planner emits a single shared iterator for both.
//! A set of classes is local to one shape-update propagation step: only
//! dim/row substitutions are merged back into global state afterward, the
//! unions themselves are discarded.

use hashbrown::HashMap;

/// Identifies a projection-equivalence class. Two dims in the same class
/// share one loop iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjId(pub u64);

/// Union-find over [`ProjId`]s, scoped to a single propagation step.
#[derive(Debug, Default)]
pub struct ProjClasses {
    parent: HashMap<u64, u64>,
    rank: HashMap<u64, u32>,
    next: u64,
}

impl ProjClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, singleton equivalence class.
    pub fn fresh(&mut self) -> ProjId {
        let id = self.next;
        self.next += 1;
        self.parent.insert(id, id);
        self.rank.insert(id, 0);
        ProjId(id)
    }

    /// Registers a proj-id coming from elsewhere (e.g. a concrete dim
    /// built before this step began) as its own representative, if not
    /// already known.
    pub fn register(&mut self, id: ProjId) {
        self.parent.entry(id.0).or_insert(id.0);
        self.rank.entry(id.0).or_insert(0);
    }

    /// Finds the representative of `id`'s class, with path compression.
    pub fn find(&mut self, id: ProjId) -> ProjId {
        self.register(id);
        let mut root = id.0;
        while self.parent[&root] != root {
            root = self.parent[&root];
        }
        // Path compression.
        let mut cur = id.0;
        while self.parent[&cur] != root {
            let next = self.parent[&cur];
            self.parent.insert(cur, root);
            cur = next;
        }
        ProjId(root)
    }

    /// Unions the classes of `a` and `b` by rank.
    pub fn union(&mut self, a: ProjId, b: ProjId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let rank_a = self.rank[&ra.0];
        let rank_b = self.rank[&rb.0];
        if rank_a < rank_b {
            self.parent.insert(ra.0, rb.0);
        } else if rank_a > rank_b {
            self.parent.insert(rb.0, ra.0);
        } else {
            self.parent.insert(rb.0, ra.0);
            self.rank.insert(ra.0, rank_a + 1);
        }
    }

    /// True iff `a` and `b` are (now) in the same class.
    pub fn same_class(&mut self, a: ProjId, b: ProjId) -> bool {
        self.find(a) == self.find(b)
    }
}
