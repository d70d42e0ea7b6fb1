//! Analysis over imported trace tables.
//!
//! [`Analysis::run`] drives the reconstruction passes in order (merge, task
//! runtime, wakeups, pid resolution, CPU timelines, probe correlation,
//! deltas) and keeps the resulting entity lists. Report-ready views are
//! produced by `cpu_stats`, `sched_stats` and `probe_stats`, which only read
//! the finished analysis.

mod cpu_stats;
mod probe_stats;
mod sched_stats;

pub use cpu_stats::{
    account_idle, build_cpus, finalize_cpus, project_runtime, record_switches, CpuIdleStats,
    CpuStatsResult, CpuStatsSummary, PerCpuStats,
};
pub use probe_stats::{
    collisions, compute_deltas, correlate_probe, extract_spans, parse_delta_pairs,
    source_counts, span_statistics, CollisionSummary, DeltaPair, ProbeDelta, ProbeDeltaSummary,
    ProbeStatsResult, ProbeSummary, SourceCount,
};
pub use sched_stats::{SchedStatsResult, SchedStatsSummary, TaskRuntimeStats, TaskWakeupStats};

use serde::Serialize;
use tracing::info;

use crate::errors::DeltaError;
use crate::events::{EventKind, EventTables};
use crate::merge::merge_tracepoints;
use crate::process::{resolve_pids, PidResolver};
use crate::sched::{count_wakeups, reconstruct_tasks, ReconstructOptions};
use crate::trace::{Cpu, Probe, Task};

/// Inputs to [`Analysis::run`] besides the event tables.
#[derive(Clone, Debug, Default)]
pub struct AnalyzeParams {
    /// Length of the recording in seconds. Percentages are 0 when this is
    /// not positive.
    pub record_duration: f64,
    pub reconstruct: ReconstructOptions,
    pub delta_pairs: Vec<DeltaPair>,
}

/// The reconstructed model of one trace.
#[derive(Debug, Default, Serialize)]
pub struct Analysis {
    pub record_duration: f64,
    /// In order of first reference.
    pub tasks: Vec<Task>,
    /// By cpu number.
    pub cpus: Vec<Cpu>,
    /// In the order they were discovered.
    pub probes: Vec<Probe>,
    pub deltas: Vec<ProbeDelta>,
}

impl Analysis {
    /// Run every pass over `tables`.
    ///
    /// `probes` must already carry their raw entry/return events. When a
    /// `pids` resolver is given, every task's tid is looked up through it.
    pub fn run(
        tables: &EventTables,
        mut probes: Vec<Probe>,
        params: &AnalyzeParams,
        pids: Option<&dyn PidResolver>,
    ) -> Result<Self, DeltaError> {
        let merged = merge_tracepoints(tables);

        let mut tasks = reconstruct_tasks(&merged, &params.reconstruct);
        count_wakeups(&mut tasks, tables.get(EventKind::SchedWakeup));
        if let Some(resolver) = pids {
            let resolved = resolve_pids(&mut tasks, resolver);
            info!(resolved, tasks = tasks.len(), "resolved task pids");
        }

        let switches = tables.get(EventKind::SchedSwitch);
        let irqs = tables.get(EventKind::IrqHandlerEntry);

        let mut cpus = build_cpus(&tasks, switches, tables.get(EventKind::CpuIdle));
        finalize_cpus(&mut cpus, params.record_duration);

        for probe in &mut probes {
            correlate_probe(probe, switches, irqs);
        }
        let deltas = compute_deltas(&probes, &params.delta_pairs)?;

        info!(
            tasks = tasks.len(),
            cpus = cpus.len(),
            probes = probes.len(),
            deltas = deltas.len(),
            "analysis complete"
        );

        Ok(Self {
            record_duration: params.record_duration,
            tasks: tasks.into_vec(),
            cpus: cpus.into_vec(),
            probes,
            deltas,
        })
    }
}
