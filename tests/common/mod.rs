//! Common test utilities for perfview integration tests.
//!
//! Builders for `perf script` dump lines and a sample directory fixture
//! holding a short single-CPU trace.

use std::fs;
use std::path::Path;

pub fn switch_line(ts: f64, prev: (&str, i32), next: (&str, i32)) -> String {
    format!(
        "{} {} [000] {:.6}: sched:sched_switch: prev_comm={} prev_pid={} prev_prio=120 \
         prev_state=R ==> next_comm={} next_pid={} next_prio=120",
        prev.0, prev.1, ts, prev.0, prev.1, next.0, next.1
    )
}

pub fn wakeup_line(ts: f64, comm: &str, pid: i32) -> String {
    format!(
        "swapper/0 0 [000] {ts:.6}: sched:sched_wakeup: comm={comm} pid={pid} prio=120 target_cpu=000"
    )
}

pub fn idle_line(ts: f64, state: i64) -> String {
    format!("swapper/0 0 [000] {ts:.6}: power:cpu_idle: state={state} cpu_id=0")
}

pub fn irq_entry_line(ts: f64, irq: i32, name: &str) -> String {
    format!("app 10 [000] {ts:.6}: irq:irq_handler_entry: irq={irq} name={name}")
}

pub fn irq_exit_line(ts: f64, irq: i32) -> String {
    format!("app 10 [000] {ts:.6}: irq:irq_handler_exit: irq={irq} ret=handled")
}

pub fn probe_line(ts: f64, event: &str) -> String {
    format!("app 10 [000] {ts:.6}: probe_app:{event}: (55d1c0a3b1f0)")
}

pub fn write_dump(dir: &Path, file: &str, lines: &[String]) {
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(dir.join(file), contents).expect("Failed to write dump file");
}

/// A one-CPU trace:
///
/// - app (10) runs 1.00 - 1.25 with an eth0 IRQ at 1.17 - 1.18
/// - swapper/0 runs 1.25 - 1.50 and idles in state 1 from 1.30 to 1.40
/// - worker (11) is woken at 1.45 and runs 1.50 - 2.00
/// - probe `app:handle` is entered at 1.05 and 1.15 and returns at 1.10
///   and 1.22
pub fn write_sample_dir(dir: &Path) {
    write_dump(
        dir,
        "sched:sched_switch.dump",
        &[
            switch_line(1.0, ("swapper/0", 0), ("app", 10)),
            switch_line(1.25, ("app", 10), ("swapper/0", 0)),
            switch_line(1.5, ("swapper/0", 0), ("worker", 11)),
            switch_line(2.0, ("worker", 11), ("swapper/0", 0)),
        ],
    );
    write_dump(
        dir,
        "sched:sched_wakeup.dump",
        &[wakeup_line(1.45, "worker", 11)],
    );
    write_dump(
        dir,
        "power:cpu_idle.dump",
        &[idle_line(1.3, 1), idle_line(1.4, 4294967295)],
    );
    write_dump(
        dir,
        "irq:irq_handler_entry.dump",
        &[irq_entry_line(1.17, 24, "eth0")],
    );
    write_dump(dir, "irq:irq_handler_exit.dump", &[irq_exit_line(1.18, 24)]);
    write_dump(
        dir,
        "perf.data.probe_app:handle_entry.dump",
        &[
            probe_line(1.05, "handle_entry"),
            probe_line(1.15, "handle_entry"),
        ],
    );
    write_dump(
        dir,
        "perf.data.probe_app:handle_exit__return.dump",
        &[
            probe_line(1.10, "handle_exit__return"),
            probe_line(1.22, "handle_exit__return"),
        ],
    );
}
