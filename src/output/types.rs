//! Intermediate data structures for report output
//!
//! [`Report`] is the serializable view of a finished analysis. The text and
//! CSV writers flatten it into [`Table`]s first; the JSON writer serializes
//! it directly.

use serde::Serialize;

use crate::analyze::{
    Analysis, CpuStatsResult, ProbeStatsResult, SchedStatsResult, SourceCount,
};
use crate::trace::constants::NO_DATA;

/// Everything one `analyze` run reports.
#[derive(Debug, Serialize)]
pub struct Report {
    pub record_duration_seconds: f64,
    pub cpu: CpuStatsResult,
    pub sched: SchedStatsResult,
    /// Present when probe tracing was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ProbeStatsResult>,
}

impl Report {
    pub fn from_analysis(analysis: &Analysis, include_trace: bool) -> Self {
        Self {
            record_duration_seconds: analysis.record_duration,
            cpu: analysis.cpu_stats(),
            sched: analysis.sched_stats(),
            trace: include_trace.then(|| analysis.probe_stats()),
        }
    }

    /// The report as display tables, in print order.
    pub fn tables(&self) -> Vec<Table> {
        let mut tables = vec![self.task_table(), self.wakeup_table(), self.cpu_table()];
        if let Some(idle) = self.cpu_idle_table() {
            tables.push(idle);
        }
        if let Some(trace) = &self.trace {
            tables.push(probe_table(trace));
            if !trace.deltas.is_empty() {
                tables.push(delta_table(trace));
            }
        }
        tables
    }

    fn task_table(&self) -> Table {
        let mut table = Table::new(
            "Task Runtime",
            &[
                "Task",
                "TID",
                "PID",
                "Intervals",
                "Total [ms]",
                "Min [ms]",
                "Max [ms]",
                "Avg [ms]",
            ],
        );
        for task in &self.sched.tasks {
            table.rows.push(vec![
                task.name.clone(),
                task.tid.to_string(),
                pid_cell(task.pid),
                task.intervals.to_string(),
                ms_cell(task.total_runtime_ms),
                ms_cell(task.min_runtime_ms),
                ms_cell(task.max_runtime_ms),
                ms_cell(task.avg_runtime_ms),
            ]);
        }
        table
    }

    fn wakeup_table(&self) -> Table {
        let mut table = Table::new("Task Wakeups", &["Task", "TID", "PID", "Wakeups"]);
        for task in &self.sched.wakeups {
            table.rows.push(vec![
                task.name.clone(),
                task.tid.to_string(),
                pid_cell(task.pid),
                task.wakeups.to_string(),
            ]);
        }
        table
    }

    fn cpu_table(&self) -> Table {
        let title = format!(
            "CPU Usage (record duration {} s)",
            self.record_duration_seconds
        );
        let mut table = Table::new(&title, &["CPU", "Runtime [ms]", "Usage [%]"]);
        for cpu in &self.cpu.cpus {
            table.rows.push(vec![
                cpu.cpu.to_string(),
                ms_cell(cpu.total_runtime_ms),
                ms_cell(cpu.usage_pct),
            ]);
        }
        table
    }

    fn cpu_idle_table(&self) -> Option<Table> {
        let idle = self.cpu.idle.as_ref()?;
        let buckets = idle.first().map_or(0, |row| row.state_ms.len());

        let mut headers = vec!["CPU".to_string()];
        for state in 0..buckets {
            headers.push(format!("State {state} [ms]"));
            headers.push(format!("State {state} [%]"));
        }
        headers.push("Idle [%]".to_string());

        let mut table = Table {
            title: "CPU Idle States".to_string(),
            headers,
            rows: Vec::new(),
        };
        for row in idle {
            let mut cells = vec![row.cpu.to_string()];
            for (ms, pct) in row.state_ms.iter().zip(&row.state_pct) {
                cells.push(ms_cell(*ms));
                cells.push(ms_cell(*pct));
            }
            cells.push(ms_cell(row.idle_pct));
            table.rows.push(cells);
        }
        Some(table)
    }
}

fn probe_table(trace: &ProbeStatsResult) -> Table {
    let mut table = Table::new(
        "Probe Tracing",
        &[
            "Num",
            "Probe",
            "# Calls",
            "Min [ms]",
            "Max [ms]",
            "Median [ms]",
            "# CSW",
            "CSW",
            "CSW @ Max",
            "CSW @ Min",
            "# IRQ",
            "IRQ",
            "IRQ @ Max",
            "IRQ @ Min",
        ],
    );
    for probe in &trace.probes {
        let csw = &probe.context_switches;
        let irq = &probe.irqs;
        table.rows.push(vec![
            probe.index.to_string(),
            probe.probe.clone(),
            probe.calls.to_string(),
            optional_ms_cell(probe.min_ms),
            optional_ms_cell(probe.max_ms),
            optional_ms_cell(probe.median_ms),
            csw.count.to_string(),
            sources_cell(&csw.sources),
            sources_cell(&csw.at_max),
            sources_cell(&csw.at_min),
            irq.count.to_string(),
            sources_cell(&irq.sources),
            sources_cell(&irq.at_max),
            sources_cell(&irq.at_min),
        ]);
    }
    table
}

fn delta_table(trace: &ProbeStatsResult) -> Table {
    let mut table = Table::new(
        "Probe Entry Deltas",
        &["Probe 1", "Probe 2", "Pairs", "Deltas [ms]"],
    );
    for delta in &trace.deltas {
        let pairs = if delta.mismatched {
            format!("{} (span counts differ)", delta.deltas_ms.len())
        } else {
            delta.deltas_ms.len().to_string()
        };
        let deltas = if delta.deltas_ms.is_empty() {
            NO_DATA.to_string()
        } else {
            delta
                .deltas_ms
                .iter()
                .map(|d| ms_cell(*d))
                .collect::<Vec<_>>()
                .join(" ")
        };
        table.rows.push(vec![
            format!("{}: {}", delta.first, delta.first_function),
            format!("{}: {}", delta.second, delta.second_function),
            pairs,
            deltas,
        ]);
    }
    table
}

fn pid_cell(pid: Option<u32>) -> String {
    pid.map_or_else(|| "-".to_string(), |p| p.to_string())
}

fn ms_cell(value: f64) -> String {
    format!("{value:.3}")
}

fn optional_ms_cell(value: Option<f64>) -> String {
    value.map_or_else(|| NO_DATA.to_string(), ms_cell)
}

fn sources_cell(sources: &[SourceCount]) -> String {
    if sources.is_empty() {
        return NO_DATA.to_string();
    }
    sources
        .iter()
        .map(|s| format!("{}:{}", s.name, s.count))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A titled table of display strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(title: &str, headers: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }
}
