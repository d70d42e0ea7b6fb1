//! Typed trace events.
//!
//! Every line of a `perf script` dump becomes one [`TraceEvent`]: the common
//! header fields shared by all tracepoints plus a kind-specific
//! [`EventPayload`]. Events of one kind are grouped into per-kind tables
//! ([`EventTables`]) which is the shape the importer produces and the
//! reconstruction passes consume.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;

use crate::trace::constants::{
    CPU_IDLE, IDLE_EXIT_STATE, IRQ_HANDLER_ENTRY, IRQ_HANDLER_EXIT, PROBE_ENTRY_SUFFIX,
    PROBE_EXIT_SUFFIX, SCHED_MIGRATE, SCHED_MIGRATE_TASK, SCHED_STAT_RUNTIME, SCHED_SWITCH,
    SCHED_WAKEUP, SCHED_WAKING, SOFTIRQ_EXIT, SOFTIRQ_RAISE,
};
use crate::trace::TaskKey;

/// Anything carrying a trace timestamp in seconds.
pub trait Timestamped {
    fn ts(&self) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SchedSwitch,
    SchedStatRuntime,
    SchedWaking,
    SchedWakeup,
    SchedMigrate,
    SoftirqRaise,
    SoftirqExit,
    IrqHandlerEntry,
    IrqHandlerExit,
    CpuIdle,
    ProbeEntry,
    ProbeExit,
}

impl EventKind {
    /// Kernel tracepoint kinds in the order their tables are concatenated
    /// before merging. Equal timestamps keep this order.
    pub const TRACEPOINTS: [EventKind; 10] = [
        EventKind::SchedMigrate,
        EventKind::SchedStatRuntime,
        EventKind::SchedSwitch,
        EventKind::SchedWakeup,
        EventKind::SchedWaking,
        EventKind::IrqHandlerEntry,
        EventKind::IrqHandlerExit,
        EventKind::SoftirqRaise,
        EventKind::SoftirqExit,
        EventKind::CpuIdle,
    ];

    /// The `perf script` tag of a kernel tracepoint kind. Probe kinds have
    /// per-probe names and return `None`.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            EventKind::SchedSwitch => Some(SCHED_SWITCH),
            EventKind::SchedStatRuntime => Some(SCHED_STAT_RUNTIME),
            EventKind::SchedWaking => Some(SCHED_WAKING),
            EventKind::SchedWakeup => Some(SCHED_WAKEUP),
            EventKind::SchedMigrate => Some(SCHED_MIGRATE),
            EventKind::SoftirqRaise => Some(SOFTIRQ_RAISE),
            EventKind::SoftirqExit => Some(SOFTIRQ_EXIT),
            EventKind::IrqHandlerEntry => Some(IRQ_HANDLER_ENTRY),
            EventKind::IrqHandlerExit => Some(IRQ_HANDLER_EXIT),
            EventKind::CpuIdle => Some(CPU_IDLE),
            EventKind::ProbeEntry | EventKind::ProbeExit => None,
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, EventKind::ProbeEntry | EventKind::ProbeExit)
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(tag: &str) -> Result<Self> {
        let kind = match tag {
            SCHED_SWITCH => EventKind::SchedSwitch,
            SCHED_STAT_RUNTIME => EventKind::SchedStatRuntime,
            SCHED_WAKING => EventKind::SchedWaking,
            SCHED_WAKEUP => EventKind::SchedWakeup,
            SCHED_MIGRATE | SCHED_MIGRATE_TASK => EventKind::SchedMigrate,
            SOFTIRQ_RAISE => EventKind::SoftirqRaise,
            SOFTIRQ_EXIT => EventKind::SoftirqExit,
            IRQ_HANDLER_ENTRY => EventKind::IrqHandlerEntry,
            IRQ_HANDLER_EXIT => EventKind::IrqHandlerExit,
            CPU_IDLE => EventKind::CpuIdle,
            t if t.ends_with(PROBE_EXIT_SUFFIX) => EventKind::ProbeExit,
            t if t.ends_with(PROBE_ENTRY_SUFFIX) => EventKind::ProbeEntry,
            _ => return Err(anyhow::anyhow!("Unknown trace event: {}", tag)),
        };
        Ok(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ProbeEntry => write!(f, "probe{}", PROBE_ENTRY_SUFFIX),
            EventKind::ProbeExit => write!(f, "probe{}", PROBE_EXIT_SUFFIX),
            kind => write!(f, "{}", kind.tag().unwrap_or("unknown")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SwitchPayload {
    pub prev_comm: String,
    pub prev_pid: i32,
    pub prev_prio: i32,
    pub prev_state: String,
    pub next_comm: String,
    pub next_pid: i32,
    pub next_prio: i32,
}

impl SwitchPayload {
    /// The task that starts running on the CPU at this switch.
    pub fn next_task(&self) -> TaskKey {
        TaskKey::new(&self.next_comm, self.next_pid)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatRuntimePayload {
    pub comm: String,
    pub pid: i32,
    pub runtime_ns: u64,
    pub vruntime_ns: u64,
}

/// Payload shared by `sched_waking` and `sched_wakeup`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WakePayload {
    pub comm: String,
    pub pid: i32,
    pub prio: i32,
    pub target_cpu: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MigratePayload {
    pub comm: String,
    pub pid: i32,
    pub prio: i32,
    pub orig_cpu: u32,
    pub dest_cpu: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IrqEntryPayload {
    pub irq: i32,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IrqExitPayload {
    pub irq: i32,
    pub ret: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SoftirqPayload {
    pub vec: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IdlePayload {
    pub state: u32,
    pub cpu_id: u32,
}

impl IdlePayload {
    /// True for the `(u32)-1` state perf reports when the CPU leaves idle.
    pub fn is_exit(&self) -> bool {
        self.state == IDLE_EXIT_STATE
    }
}

/// Payload of a user-space probe hit.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProbePayload {
    /// Full event name, e.g. `app:Worker__run_entry`.
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    SchedSwitch(SwitchPayload),
    SchedStatRuntime(StatRuntimePayload),
    SchedWaking(WakePayload),
    SchedWakeup(WakePayload),
    SchedMigrate(MigratePayload),
    SoftirqRaise(SoftirqPayload),
    SoftirqExit(SoftirqPayload),
    IrqHandlerEntry(IrqEntryPayload),
    IrqHandlerExit(IrqExitPayload),
    CpuIdle(IdlePayload),
    ProbeEntry(ProbePayload),
    ProbeExit(ProbePayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SchedSwitch(_) => EventKind::SchedSwitch,
            EventPayload::SchedStatRuntime(_) => EventKind::SchedStatRuntime,
            EventPayload::SchedWaking(_) => EventKind::SchedWaking,
            EventPayload::SchedWakeup(_) => EventKind::SchedWakeup,
            EventPayload::SchedMigrate(_) => EventKind::SchedMigrate,
            EventPayload::SoftirqRaise(_) => EventKind::SoftirqRaise,
            EventPayload::SoftirqExit(_) => EventKind::SoftirqExit,
            EventPayload::IrqHandlerEntry(_) => EventKind::IrqHandlerEntry,
            EventPayload::IrqHandlerExit(_) => EventKind::IrqHandlerExit,
            EventPayload::CpuIdle(_) => EventKind::CpuIdle,
            EventPayload::ProbeEntry(_) => EventKind::ProbeEntry,
            EventPayload::ProbeExit(_) => EventKind::ProbeExit,
        }
    }
}

/// One trace record.
///
/// `task`/`tid`/`cpu` are the header fields perf prints for every event: the
/// task that was current on `cpu` when the tracepoint fired.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceEvent {
    pub task: String,
    pub tid: i32,
    pub cpu: u32,
    /// Seconds on the trace clock.
    pub ts: f64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Timestamped for TraceEvent {
    fn ts(&self) -> f64 {
        self.ts
    }
}

impl TraceEvent {
    pub fn new(task: &str, tid: i32, cpu: u32, ts: f64, payload: EventPayload) -> Self {
        Self {
            task: task.to_string(),
            tid,
            cpu,
            ts,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Identity of the task named in the event header.
    pub fn task_key(&self) -> TaskKey {
        TaskKey::new(&self.task, self.tid)
    }

    /// A `sched_switch` on `cpu` from `prev` to `next`. The header task is
    /// the outgoing task, as perf prints it.
    pub fn sched_switch(cpu: u32, ts: f64, prev: (&str, i32), next: (&str, i32)) -> Self {
        Self::new(
            prev.0,
            prev.1,
            cpu,
            ts,
            EventPayload::SchedSwitch(SwitchPayload {
                prev_comm: prev.0.to_string(),
                prev_pid: prev.1,
                prev_prio: 120,
                prev_state: "R".to_string(),
                next_comm: next.0.to_string(),
                next_pid: next.1,
                next_prio: 120,
            }),
        )
    }

    pub fn stat_runtime(task: &str, tid: i32, cpu: u32, ts: f64, runtime_ns: u64) -> Self {
        Self::new(
            task,
            tid,
            cpu,
            ts,
            EventPayload::SchedStatRuntime(StatRuntimePayload {
                comm: task.to_string(),
                pid: tid,
                runtime_ns,
                vruntime_ns: 0,
            }),
        )
    }

    /// A `sched_waking` (or, with `woken`, `sched_wakeup`) for `target`.
    pub fn wake(cpu: u32, ts: f64, target: (&str, i32), woken: bool) -> Self {
        let payload = WakePayload {
            comm: target.0.to_string(),
            pid: target.1,
            prio: 120,
            target_cpu: cpu,
        };
        let payload = if woken {
            EventPayload::SchedWakeup(payload)
        } else {
            EventPayload::SchedWaking(payload)
        };
        Self::new(target.0, target.1, cpu, ts, payload)
    }

    pub fn irq_entry(cpu: u32, ts: f64, irq: i32, name: &str) -> Self {
        Self::new(
            "swapper/0",
            0,
            cpu,
            ts,
            EventPayload::IrqHandlerEntry(IrqEntryPayload {
                irq,
                name: name.to_string(),
            }),
        )
    }

    pub fn irq_exit(cpu: u32, ts: f64, irq: i32) -> Self {
        Self::new(
            "swapper/0",
            0,
            cpu,
            ts,
            EventPayload::IrqHandlerExit(IrqExitPayload {
                irq,
                ret: "handled".to_string(),
            }),
        )
    }

    pub fn cpu_idle(cpu: u32, ts: f64, state: u32) -> Self {
        Self::new(
            "swapper/0",
            0,
            cpu,
            ts,
            EventPayload::CpuIdle(IdlePayload { state, cpu_id: cpu }),
        )
    }
}

/// Per-kind event tables as produced by the importer.
///
/// A kind that was never inserted reads back as an empty table.
#[derive(Clone, Debug, Default)]
pub struct EventTables {
    tables: HashMap<EventKind, Vec<TraceEvent>>,
}

impl EventTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: EventKind, events: Vec<TraceEvent>) {
        self.tables.insert(kind, events);
    }

    /// Append a single event to the table of its own kind.
    pub fn push(&mut self, event: TraceEvent) {
        self.tables.entry(event.kind()).or_default().push(event);
    }

    pub fn get(&self, kind: EventKind) -> &[TraceEvent] {
        self.tables.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.tables.contains_key(&kind)
    }

    pub fn total_events(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_tag() {
        assert_eq!(
            "sched:sched_switch".parse::<EventKind>().unwrap(),
            EventKind::SchedSwitch
        );
        assert_eq!(
            "sched:sched_migrate_task".parse::<EventKind>().unwrap(),
            EventKind::SchedMigrate
        );
        assert_eq!(
            "power:cpu_idle".parse::<EventKind>().unwrap(),
            EventKind::CpuIdle
        );
        assert_eq!(
            "probe_app:Worker__run_entry".parse::<EventKind>().unwrap(),
            EventKind::ProbeEntry
        );
        assert_eq!(
            "probe_app:Worker__run_exit__return"
                .parse::<EventKind>()
                .unwrap(),
            EventKind::ProbeExit
        );
    }

    #[test]
    fn test_kind_from_tag_invalid() {
        assert!("sched:sched_process_exec".parse::<EventKind>().is_err());
        assert!("".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_tag_round_trip_for_tracepoints() {
        for kind in EventKind::TRACEPOINTS {
            let tag = kind.tag().unwrap();
            assert_eq!(tag.parse::<EventKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), tag);
        }
        assert!(EventKind::ProbeEntry.tag().is_none());
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let mut tables = EventTables::new();
        assert!(tables.get(EventKind::SchedSwitch).is_empty());
        assert!(!tables.contains(EventKind::SchedSwitch));

        tables.push(TraceEvent::sched_switch(0, 1.0, ("a", 1), ("b", 2)));
        tables.push(TraceEvent::cpu_idle(0, 1.5, 1));
        assert_eq!(tables.get(EventKind::SchedSwitch).len(), 1);
        assert_eq!(tables.get(EventKind::CpuIdle).len(), 1);
        assert_eq!(tables.total_events(), 2);
    }

    #[test]
    fn test_switch_next_task() {
        let event = TraceEvent::sched_switch(0, 1.0, ("a", 1), ("b", 2));
        let EventPayload::SchedSwitch(switch) = &event.payload else {
            panic!("expected switch payload");
        };
        assert_eq!(switch.next_task(), TaskKey::new("b", 2));
        assert_eq!(event.task_key(), TaskKey::new("a", 1));
    }

    #[test]
    fn test_idle_exit_state() {
        let event = TraceEvent::cpu_idle(0, 1.0, IDLE_EXIT_STATE);
        let EventPayload::CpuIdle(idle) = &event.payload else {
            panic!("expected idle payload");
        };
        assert!(idle.is_exit());
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = TraceEvent::irq_entry(1, 2.5, 42, "eth0");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "irq_handler_entry");
        assert_eq!(json["irq"], 42);
        assert_eq!(json["name"], "eth0");
        assert_eq!(json["cpu"], 1);
    }

    #[test]
    fn test_event_name_field_does_not_clash_with_kind() {
        let event = TraceEvent::new(
            "app",
            7,
            0,
            1.0,
            EventPayload::ProbeEntry(ProbePayload {
                event: "probe_app:poll_entry".to_string(),
                address: None,
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "probe_entry");
        assert_eq!(json["event"], "probe_app:poll_entry");
        assert!(json.get("address").is_none());
    }
}
