//! Assembles the per-CPU scheduler (`sched`), buffer cache + indexed
//! inode (`fs`), and fork/join thread pool (`pool`) into the six end-to-
//! end scenarios spec.md §8 names, run as one batch through
//! `pilotos_support::testing` — the same shape the teacher's
//! `builtin-tests` feature runs instead of a host test runner (see
//! SPEC_FULL.md §1.1/§6.1). `sched`, `fs`, `pool`, and `mm` each carry
//! their own ordinary `#[cfg(test)]` unit tests; this crate exists only
//! to wire them together and exercise the scenarios that need more than
//! one of them at once.

pub mod scenarios;

use pilotos_support::testing::TestSuiteDesc;

pub fn all_suites() -> Vec<TestSuiteDesc> {
    vec![TestSuiteDesc {
        name: "spec_scenarios",
        cases: &[
            ("fair_split_two_nice_zero_tasks", scenarios::fair_split_two_nice_zero_tasks),
            ("nice_skew_extreme_ratio", scenarios::nice_skew_extreme_ratio),
            (
                "sleeper_bonus_preempts_then_rebalances",
                scenarios::sleeper_bonus_preempts_then_rebalances,
            ),
            (
                "sparse_inode_write_past_ten_mib",
                scenarios::sparse_inode_write_past_ten_mib,
            ),
            ("cache_eviction_under_pressure", scenarios::cache_eviction_under_pressure),
            (
                "fork_join_parallel_sum_matches_sequential",
                scenarios::fork_join_parallel_sum_matches_sequential,
            ),
        ],
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilotos_support::testing::run_all_suites;

    #[test]
    fn every_spec_scenario_passes() {
        let summary = run_all_suites(&all_suites());
        assert!(summary.all_passed(), "{:?}", summary.suites);
    }
}
