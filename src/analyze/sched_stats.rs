use serde::Serialize;

use super::Analysis;
use crate::utils::secs_to_ms;

/// Result of scheduler stats analysis.
#[derive(Debug, Serialize)]
pub struct SchedStatsResult {
    pub summary: SchedStatsSummary,
    /// Tasks that ran, by total runtime descending.
    pub tasks: Vec<TaskRuntimeStats>,
    /// Tasks that were woken, by wakeup count descending.
    pub wakeups: Vec<TaskWakeupStats>,
}

#[derive(Debug, Serialize)]
pub struct SchedStatsSummary {
    pub task_count: usize,
    pub interval_count: usize,
    pub total_wakeups: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskRuntimeStats {
    pub name: String,
    pub tid: i32,
    pub pid: Option<u32>,
    pub intervals: usize,
    pub total_runtime_ms: f64,
    pub min_runtime_ms: f64,
    pub max_runtime_ms: f64,
    pub avg_runtime_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct TaskWakeupStats {
    pub name: String,
    pub tid: i32,
    pub pid: Option<u32>,
    pub wakeups: u64,
}

impl Analysis {
    /// Per-task runtime and wakeup tables.
    pub fn sched_stats(&self) -> SchedStatsResult {
        let mut tasks: Vec<TaskRuntimeStats> = self
            .tasks
            .iter()
            .filter(|t| !t.intervals.is_empty())
            .map(|t| TaskRuntimeStats {
                name: t.key.name.clone(),
                tid: t.key.tid,
                pid: t.pid,
                intervals: t.intervals.len(),
                total_runtime_ms: secs_to_ms(t.total_runtime),
                min_runtime_ms: secs_to_ms(t.min_interval().unwrap_or_default()),
                max_runtime_ms: secs_to_ms(t.max_interval().unwrap_or_default()),
                avg_runtime_ms: secs_to_ms(t.avg_interval().unwrap_or_default()),
            })
            .collect();
        // Stable, so equal totals keep first-seen order.
        tasks.sort_by(|a, b| b.total_runtime_ms.total_cmp(&a.total_runtime_ms));

        let mut wakeups: Vec<TaskWakeupStats> = self
            .tasks
            .iter()
            .filter(|t| t.wakeups > 0)
            .map(|t| TaskWakeupStats {
                name: t.key.name.clone(),
                tid: t.key.tid,
                pid: t.pid,
                wakeups: t.wakeups,
            })
            .collect();
        wakeups.sort_by(|a, b| b.wakeups.cmp(&a.wakeups));

        SchedStatsResult {
            summary: SchedStatsSummary {
                task_count: self.tasks.len(),
                interval_count: self.tasks.iter().map(|t| t.intervals.len()).sum(),
                total_wakeups: self.tasks.iter().map(|t| t.wakeups).sum(),
            },
            tasks,
            wakeups,
        }
    }
}
