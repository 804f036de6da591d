//! Host entry point that runs spec.md §8's end-to-end scenarios as one
//! batch and reports a pass/fail summary, the same role the teacher's
//! `builtin-tests` kernel feature plays in place of a host test runner.

use pilotos_kernel::all_suites;
use pilotos_support::testing::run_all_suites;
use pilotos_support::{klog_error, klog_info};

fn main() {
    let summary = run_all_suites(&all_suites());
    for suite in &summary.suites {
        klog_info!("{suite}");
    }
    if summary.all_passed() {
        klog_info!(
            "all scenarios passed ({}/{})",
            summary.total_passed(),
            summary.total_cases()
        );
        std::process::exit(0);
    } else {
        klog_error!(
            "{} of {} scenario cases failed",
            summary.total_cases() - summary.total_passed(),
            summary.total_cases()
        );
        std::process::exit(1);
    }
}
