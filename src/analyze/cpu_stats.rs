use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use super::Analysis;
use crate::events::{EventPayload, TraceEvent};
use crate::trace::constants::MIN_IDLE_BUCKETS;
use crate::trace::{CpuSet, SwitchRecord, TaskSet};
use crate::utils::{percent_of, secs_to_ms};

/// Result of CPU stats analysis.
#[derive(Debug, Serialize)]
pub struct CpuStatsResult {
    pub summary: CpuStatsSummary,
    pub cpus: Vec<PerCpuStats>,
    /// Present only when the trace contains `power:cpu_idle` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle: Option<Vec<CpuIdleStats>>,
}

#[derive(Debug, Serialize)]
pub struct CpuStatsSummary {
    pub record_duration_seconds: f64,
    pub cpu_count: u32,
    pub switch_count: u64,
}

/// Busy time of one CPU, rounded for display.
#[derive(Debug, Serialize)]
pub struct PerCpuStats {
    pub cpu: u32,
    pub total_runtime_ms: f64,
    pub usage_pct: f64,
}

/// Time one CPU spent in each idle state, rounded for display.
///
/// `state_ms[i]` and `state_pct[i]` belong to idle state `i`; 0 is
/// busy-idle and 1 the sleep state. `idle_pct` covers all states together.
#[derive(Debug, Serialize)]
pub struct CpuIdleStats {
    pub cpu: u32,
    pub state_ms: Vec<f64>,
    pub state_pct: Vec<f64>,
    pub idle_pct: f64,
}

/// Project every task interval onto the CPU it ran on.
pub fn project_runtime(cpus: &mut CpuSet, tasks: &TaskSet) {
    for task in tasks.iter() {
        for interval in &task.intervals {
            cpus.get_or_create(interval.cpu)
                .add_runtime(&task.key, interval);
        }
    }
}

/// Copy raw `sched_switch` events into each CPU's switch log.
pub fn record_switches(cpus: &mut CpuSet, switches: &[TraceEvent]) {
    for event in switches {
        if let EventPayload::SchedSwitch(switch) = &event.payload {
            cpus.get_or_create(event.cpu).add_switch(SwitchRecord {
                ts: event.ts,
                prev_comm: switch.prev_comm.clone(),
                prev_prio: switch.prev_prio,
                next_comm: switch.next_comm.clone(),
                next_prio: switch.next_prio,
            });
        }
    }
}

/// Sum idle episodes per CPU and state.
///
/// A non-exit `cpu_idle` state opens an episode on its CPU; the exit state
/// closes it and credits the elapsed time to the state that was open. An
/// exit without an open episode, and an episode still open at the end, are
/// dropped.
pub fn account_idle(cpus: &mut CpuSet, idle_events: &[TraceEvent]) {
    // cpu -> (entered at, state)
    let mut open: HashMap<u32, (f64, u32)> = HashMap::new();

    for event in idle_events {
        let EventPayload::CpuIdle(idle) = &event.payload else {
            continue;
        };
        let cpu = cpus.get_or_create(event.cpu);
        if cpu.idle_states.len() < MIN_IDLE_BUCKETS {
            cpu.idle_states.resize(MIN_IDLE_BUCKETS, 0.0);
        }

        if !idle.is_exit() {
            open.insert(event.cpu, (event.ts, idle.state));
        } else if let Some((entered, state)) = open.remove(&event.cpu) {
            cpu.add_idle(state, event.ts - entered);
        } else {
            debug!(cpu = event.cpu, ts = event.ts, "idle exit without entry");
        }
    }

    for (cpu, (entered, state)) in open {
        debug!(cpu, entered, state, "idle episode still open at end of trace");
    }
}

/// Build the CPU set from reconstructed tasks plus the raw switch and idle
/// tables.
pub fn build_cpus(tasks: &TaskSet, switches: &[TraceEvent], idle: &[TraceEvent]) -> CpuSet {
    let mut cpus = CpuSet::new();
    project_runtime(&mut cpus, tasks);
    record_switches(&mut cpus, switches);
    account_idle(&mut cpus, idle);
    cpus
}

/// Derive sleep time and usage for every CPU.
pub fn finalize_cpus(cpus: &mut CpuSet, record_duration: f64) {
    for cpu in cpus.iter_mut() {
        cpu.finalize(record_duration);
    }
}

impl Analysis {
    /// Per-CPU busy time and idle-state breakdown.
    pub fn cpu_stats(&self) -> CpuStatsResult {
        let record_duration = self.record_duration;

        let cpus: Vec<PerCpuStats> = self
            .cpus
            .iter()
            .map(|cpu| PerCpuStats {
                cpu: cpu.number,
                total_runtime_ms: secs_to_ms(cpu.total_runtime),
                usage_pct: percent_of(cpu.total_runtime, record_duration),
            })
            .collect();

        let with_idle: Vec<_> = self
            .cpus
            .iter()
            .filter(|cpu| !cpu.idle_states.is_empty())
            .collect();
        let idle = if with_idle.is_empty() {
            None
        } else {
            let buckets = with_idle
                .iter()
                .map(|cpu| cpu.idle_states.len())
                .max()
                .unwrap_or(MIN_IDLE_BUCKETS);
            Some(
                with_idle
                    .iter()
                    .map(|cpu| {
                        let mut states = cpu.idle_states.clone();
                        states.resize(buckets, 0.0);
                        CpuIdleStats {
                            cpu: cpu.number,
                            state_ms: states.iter().map(|s| secs_to_ms(*s)).collect(),
                            state_pct: states
                                .iter()
                                .map(|s| percent_of(*s, record_duration))
                                .collect(),
                            idle_pct: percent_of(cpu.total_idle(), record_duration),
                        }
                    })
                    .collect(),
            )
        };

        CpuStatsResult {
            summary: CpuStatsSummary {
                record_duration_seconds: record_duration,
                cpu_count: u32::try_from(self.cpus.len()).unwrap_or(u32::MAX),
                switch_count: self.cpus.iter().map(|c| c.switches.len() as u64).sum(),
            },
            cpus,
            idle,
        }
    }
}
