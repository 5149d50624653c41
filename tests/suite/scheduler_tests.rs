use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tensorc::error::TensorcError;
use tensorc::sched::parallel::{dry_run_rounds, merge_schedule};
use tensorc::sched::Scheduler;

#[test]
fn round_robin_dispatch_assigns_every_combination_exactly_once_per_device() {
    let n = 3;
    let scheduler = Scheduler::new(n);
    let per_device: Vec<Arc<AtomicUsize>> = (0..n).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let total_combinations = 10;
    for pos in 0..total_combinations {
        let counter = per_device[pos % n].clone();
        scheduler.device(pos % n).submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    scheduler.await_all().unwrap();

    let counts: Vec<usize> = per_device.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(counts.iter().sum::<usize>(), total_combinations);
    // 10 combinations over 3 devices: positions 0,3,6,9 -> device 0 (4),
    // 1,4,7 -> device 1 (3), 2,5,8 -> device 2 (3).
    assert_eq!(counts, vec![4, 3, 3]);
}

#[test]
fn merge_schedule_folds_every_participant_into_device_zero() {
    for k in 1..=8 {
        let schedule = merge_schedule(k);
        let mut alive: Vec<bool> = vec![true; k];
        for (from, to) in schedule {
            assert!(alive[from], "device {from} merged twice");
            alive[from] = false;
            assert!(alive[to], "merge target {to} already folded away");
        }
        let survivors = alive.iter().filter(|&&a| a).count();
        assert_eq!(survivors, 1);
        assert!(alive[0]);
    }
}

#[test]
fn dry_run_rounds_sum_to_the_total_combination_count() {
    let rounds = dry_run_rounds(17, 4);
    assert_eq!(rounds.iter().sum::<usize>(), 17);
    assert!(rounds[..rounds.len() - 1].iter().all(|&k| k == 4));
}

#[test]
fn a_failing_task_poisons_only_its_own_device() {
    let scheduler = Scheduler::new(2);
    scheduler.device(0).submit(|| Err(TensorcError::invariant("boom")));
    scheduler.device(1).submit(|| Ok(()));
    assert!(scheduler.device(0).await_idle().is_err());
    assert!(scheduler.device(1).await_idle().is_ok());
}
