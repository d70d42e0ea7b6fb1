//! Shared constants for trace processing.
//!
//! Event kind tags match the names `perf script` prints for each tracepoint.

use std::sync::LazyLock;

use regex::Regex;

pub const SCHED_SWITCH: &str = "sched:sched_switch";
pub const SCHED_STAT_RUNTIME: &str = "sched:sched_stat_runtime";
pub const SCHED_WAKING: &str = "sched:sched_waking";
pub const SCHED_WAKEUP: &str = "sched:sched_wakeup";
pub const SCHED_MIGRATE: &str = "sched:sched_migrate";
/// The kernel names the migrate tracepoint `sched_migrate_task`; both spellings
/// are accepted on import.
pub const SCHED_MIGRATE_TASK: &str = "sched:sched_migrate_task";
pub const IRQ_HANDLER_ENTRY: &str = "irq:irq_handler_entry";
pub const IRQ_HANDLER_EXIT: &str = "irq:irq_handler_exit";
pub const SOFTIRQ_RAISE: &str = "irq:softirq_raise";
pub const SOFTIRQ_EXIT: &str = "irq:softirq_exit";
pub const CPU_IDLE: &str = "power:cpu_idle";

/// `power:cpu_idle` state value reported when a CPU leaves an idle state
/// (`PWR_EVENT_EXIT`, i.e. `(u32)-1`).
pub const IDLE_EXIT_STATE: u32 = 4_294_967_295;

/// Idle buckets always reported, even when no episode was seen:
/// 0 = busy-idle, 1 = sleep state.
pub const MIN_IDLE_BUCKETS: usize = 2;

/// Highest idle state id accepted from `power:cpu_idle`.
pub const MAX_IDLE_STATE: u32 = 15;

pub const NS_PER_SEC: f64 = 1e9;
pub const MS_PER_SEC: f64 = 1e3;

/// Suffix of a probe's entry event name.
pub const PROBE_ENTRY_SUFFIX: &str = "_entry";
/// Suffix perf appends to a return probe's event name.
pub const PROBE_EXIT_SUFFIX: &str = "_exit__return";

/// Placeholder printed for statistics without any sample.
pub const NO_DATA: &str = "no Data";

/// One `perf script` line:
/// `<task> <tid> [<cpu>] <secs>.<frac>: <category:event>: <payload>`
///
/// The task name is matched lazily so that names containing spaces still
/// leave the tid as the last number before the cpu bracket.
pub static DUMP_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<task>.+?)\s+(?P<tid>\d+)\s+\[(?P<cpu>\d+)\]\s+(?P<ts>\d+(?:\.\d+)?):\s+(?P<event>\S+?):?(?:\s+(?P<payload>.*))?$",
    )
    .expect("Invalid dump line regex pattern")
});

/// The `key=` part of a tracepoint payload field. A value runs until the
/// next key, so comm values may contain spaces (`comm=Web Content pid=3301`).
pub static PAYLOAD_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s\[])(?P<key>[A-Za-z_][A-Za-z0-9_]*)=")
        .expect("Invalid payload field regex pattern")
});

/// Hex addresses printed in parentheses by uprobe/uretprobe events, e.g.
/// `(55d1c0a3b1f0)` or `(55d1c0a3b280 <- 55d1c0a3b1f0)`.
pub static PROBE_ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:0x)?([0-9a-fA-F]+)\)\s*$").expect("Invalid address regex"));

/// Dump file names of probe events:
/// `perf.data.probe_<executable>:<probe name>_entry.dump` and
/// `perf.data.probe_<executable>:<probe name>_exit__return.dump`.
pub static PROBE_DUMP_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^perf\.data\.probe_(?P<exe>[^:]+):(?P<name>.+?)(?:_entry|_exit__return)\.dump$")
        .expect("Invalid probe dump file regex pattern")
});
