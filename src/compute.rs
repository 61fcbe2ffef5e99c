//! Compute budgeting and the per-stage worker pool.
//!
//! Stages that shell out to aligners split their work into N partitions and
//! run one worker thread per partition. The split count and per-split core
//! allocation are derived once per stage from the sample's core/memory
//! budget; results are merged strictly by split index so output is
//! deterministic regardless of worker scheduling.

use crossbeam_channel::bounded;

use crate::error::Error;

/// Per-stage split plan: how many parallel partitions to run and how many
/// cores each partition's external tool may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeBudget {
    pub splits: usize,
    /// Cores allocated to each split, length == `splits`. Residual cores
    /// left over by integer division go to the first splits.
    pub cores: Vec<usize>,
}

impl ComputeBudget {
    /// Derive a split plan from the run-wide budget and a stage profile.
    ///
    /// Picks the largest split count that is at most `max_splits` and fits
    /// `mem_per_split_gb` per split into `max_mem_gb`; if that leaves fewer
    /// than `min_cores_per_split` cores per split, the split count is
    /// reduced until the minimum holds.
    pub fn plan(
        max_cpu: usize,
        max_mem_gb: usize,
        max_splits: usize,
        min_cores_per_split: usize,
        mem_per_split_gb: usize,
    ) -> ComputeBudget {
        let max_cpu = max_cpu.max(1);
        let min_cores = min_cores_per_split.max(1);

        let by_mem = if mem_per_split_gb == 0 {
            max_splits
        } else {
            max_mem_gb / mem_per_split_gb
        };
        let mut splits = max_splits.min(by_mem).max(1);
        let mut cores_per_split = (max_cpu / splits).max(1);

        if cores_per_split < min_cores {
            splits = (max_cpu / min_cores).max(1);
            cores_per_split = min_cores.min(max_cpu);
        }

        let mut cores = vec![cores_per_split; splits];
        let residual = max_cpu.saturating_sub(splits * cores_per_split);
        for c in cores.iter_mut().take(residual) {
            *c += 1;
        }

        ComputeBudget { splits, cores }
    }

    pub fn total_cores(&self) -> usize {
        self.cores.iter().sum()
    }
}

/// Run `f` over `jobs` on a bounded pool of `workers` OS threads.
///
/// Jobs are dispatched through a channel; results are collected and
/// returned in job-index order, not completion order. The first error
/// encountered is propagated after all workers have joined.
pub fn run_indexed<J, R, F>(jobs: Vec<J>, workers: usize, f: F) -> Result<Vec<R>, Error>
where
    J: Send,
    R: Send,
    F: Fn(usize, J) -> Result<R, Error> + Sync,
{
    let n = jobs.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.max(1).min(n);

    let (job_tx, job_rx) = bounded::<(usize, J)>(n);
    let (res_tx, res_rx) = bounded::<(usize, Result<R, Error>)>(n);

    for job in jobs.into_iter().enumerate() {
        // channel is sized to hold every job, send cannot block
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let f = &f;
            scope.spawn(move || {
                for (idx, job) in job_rx.iter() {
                    if res_tx.send((idx, f(idx, job))).is_err() {
                        return;
                    }
                }
            });
        }
    });
    drop(res_tx);

    let mut slots: Vec<Option<R>> = (0..n).map(|_| None).collect();
    for (idx, result) in res_rx.iter() {
        slots[idx] = Some(result?);
    }

    let mut out = Vec::with_capacity(n);
    for (idx, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(r) => out.push(r),
            None => {
                return Err(Error::Contract(format!(
                    "worker pool produced no result for split {idx}"
                )))
            }
        }
    }
    Ok(out)
}
