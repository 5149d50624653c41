//! Round-robin parallel update across a fixed number of device contexts.

use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use super::Scheduler;
use crate::backend::{Backend, Compiled, ContextId};
use crate::error::TensorcResult;
use crate::hl::Binop;

/// Splits `total` combinations into round sizes of at most `n`: every
/// round is full except possibly the last.
pub fn dry_run_rounds(total: usize, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let mut rounds = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        rounds.push(remaining.min(n));
        remaining -= remaining.min(n);
    }
    rounds
}

/// Pairwise-halving reduction schedule for `k` participants: pairs
/// `(from, to)` in the order they must run to fold everything into index 0.
pub fn merge_schedule(k: usize) -> Vec<(usize, usize)> {
    let mut schedule = Vec::new();
    let mut n = k;
    while n > 1 {
        let half = n.div_ceil(2);
        let fold_count = n - half;
        for i in 0..fold_count {
            schedule.push((half + i, i));
        }
        n = half;
    }
    schedule
}

/// Precompiled merge/broadcast kernels plus the round-robin dispatch loop
/// for `grad_update`/`sgd_update` across `n` device contexts.
pub struct ParallelUpdate<'a, B: Backend + ?Sized> {
    backend: &'a mut B,
    scheduler: &'a Scheduler,
    contexts: Vec<ContextId>,
    gradient_ids: Vec<u64>,
    value_ids: Vec<u64>,
    merge_cache: HashMap<(usize, usize, u64), Compiled>,
    broadcast_cache: HashMap<(usize, u64), Compiled>,
    needed_on_host: Vec<u64>,
}

impl<'a, B: Backend + ?Sized> ParallelUpdate<'a, B> {
    pub fn new(
        backend: &'a mut B,
        scheduler: &'a Scheduler,
        contexts: Vec<ContextId>,
        gradient_ids: Vec<u64>,
        value_ids: Vec<u64>,
    ) -> Self {
        ParallelUpdate {
            backend,
            scheduler,
            contexts,
            gradient_ids,
            value_ids,
            merge_cache: HashMap::new(),
            broadcast_cache: HashMap::new(),
            needed_on_host: Vec::new(),
        }
    }

    pub fn needed_on_host(&self) -> &[u64] {
        &self.needed_on_host
    }

    /// Pass 1/2/3: dry-runs the binding iteration to find which
    /// `(from, to)` pairs will be needed, then precompiles and caches the
    /// gradient-merge and parameter-broadcast kernels for those pairs.
    pub fn precompile(&mut self, total_combinations: usize) -> TensorcResult<()> {
        let n = self.contexts.len();
        let rounds = dry_run_rounds(total_combinations, n);

        let mut seen_merges = HashSet::new();
        for &k in &rounds {
            for (from, to) in merge_schedule(k) {
                for &grad in &self.gradient_ids {
                    if seen_merges.insert((from, to, grad)) {
                        let compiled = self.backend.merge(
                            grad,
                            self.contexts[to],
                            Binop::Add,
                            self.contexts[from],
                            None,
                        )?;
                        if let Some(compiled) = compiled {
                            self.merge_cache.insert((from, to, grad), compiled);
                        }
                    }
                }
            }
        }

        for to in 1..n {
            for &value in &self.value_ids {
                let compiled = self.backend.merge(value, self.contexts[to], Binop::Arg2, self.contexts[0], None)?;
                match compiled {
                    Some(compiled) => {
                        self.broadcast_cache.insert((to, value), compiled);
                    }
                    None => self.needed_on_host.push(value),
                }
            }
        }
        Ok(())
    }

    /// Dispatches one grad-update kernel per combination to device
    /// `pos mod n`, synchronizing after each complete (or final partial)
    /// round via [`Self::sync_round`].
    pub fn run<F, S>(&mut self, total_combinations: usize, mut submit_grad_update: F, mut sgd_update: S, mut post_sync: impl FnMut(usize)) -> TensorcResult<()>
    where
        F: FnMut(usize, usize) -> TensorcResult<()>,
        S: FnMut() -> TensorcResult<()>,
    {
        let n = self.contexts.len();
        if n == 0 {
            return Ok(());
        }
        let mut pos = 0usize;
        while pos < total_combinations {
            let round_start = pos;
            let round_end = (pos + n).min(total_combinations);
            for p in round_start..round_end {
                submit_grad_update(p % n, p)?;
            }
            let k = round_end - round_start;
            self.sync_round(k, &mut sgd_update)?;
            post_sync(k);
            pos = round_end;
        }
        Ok(())
    }

    /// One synchronization step: merge tree, sgd update on device 0, host
    /// fallback for any uncached broadcast, then broadcast parameters to
    /// devices `1..k`.
    fn sync_round<S>(&mut self, k: usize, sgd_update: &mut S) -> TensorcResult<()>
    where
        S: FnMut() -> TensorcResult<()>,
    {
        for (from, to) in merge_schedule(k) {
            self.scheduler.device(from).await_idle()?;
            for &grad in &self.gradient_ids.clone() {
                if let Some(compiled) = self.merge_cache.get(&(from, to, grad)) {
                    compiled.schedule().run()?;
                }
            }
        }

        sgd_update()?;
        self.scheduler.device(0).await_idle()?;

        for &value in &self.needed_on_host.clone() {
            let mut host = crate::buffer::Buffer::create(
                crate::buffer::Precision::Double,
                alloc::vec![0],
                &crate::buffer::InitOp::RangeOverOffsets,
                &mut crate::session::Session::new(),
            )?;
            self.backend.to_host(self.contexts[0], value, &mut host)?;
            for to in 1..k {
                self.backend.from_host(self.contexts[to], value, &host)?;
            }
        }

        for to in 1..k {
            for &value in &self.value_ids {
                if let Some(compiled) = self.broadcast_cache.get(&(to, value)) {
                    compiled.schedule().run()?;
                }
            }
        }
        Ok(())
    }
}
