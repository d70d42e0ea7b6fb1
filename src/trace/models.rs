//! Entity structs built by the reconstruction passes.
//!
//! Tasks, CPUs and probes are created lazily the first time something refers
//! to them and are never removed during a run. Collections keep first-seen
//! order (tasks, probes) or key order (CPUs) so that repeated runs over the
//! same input produce identical output.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::events::TraceEvent;
use crate::trace::constants::MAX_IDLE_STATE;

/// Task identity.
///
/// Only the `(name, tid)` pair identifies a task: a tid seen under two
/// different names (e.g. across an `exec`) yields two tasks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub name: String,
    pub tid: i32,
}

impl TaskKey {
    pub fn new(name: &str, tid: i32) -> Self {
        Self {
            name: name.to_string(),
            tid,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tid)
    }
}

/// Time a task actually spent executing.
///
/// # Fields
/// - `start`: seconds on the trace clock
/// - `duration`: seconds, never negative
/// - `cpu`: CPU the interval is attributed to
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RuntimeInterval {
    pub start: f64,
    pub duration: f64,
    pub cpu: u32,
}

impl RuntimeInterval {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Task {
    pub key: TaskKey,
    /// Owning process, once resolved from a tid->pid mapping.
    pub pid: Option<u32>,
    pub intervals: Vec<RuntimeInterval>,
    pub total_runtime: f64,
    pub wakeups: u64,
}

impl Task {
    pub fn new(key: TaskKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn add_interval(&mut self, interval: RuntimeInterval) {
        self.total_runtime += interval.duration;
        self.intervals.push(interval);
    }

    pub fn min_interval(&self) -> Option<f64> {
        self.intervals.iter().map(|i| i.duration).reduce(f64::min)
    }

    pub fn max_interval(&self) -> Option<f64> {
        self.intervals.iter().map(|i| i.duration).reduce(f64::max)
    }

    pub fn avg_interval(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        let sum: f64 = self.intervals.iter().map(|i| i.duration).sum();
        Some(sum / self.intervals.len() as f64)
    }
}

/// Tasks keyed by `(name, tid)`, iterated in first-reference order.
#[derive(Clone, Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<TaskKey, usize>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the task for `key`, creating it on first reference.
    pub fn get_or_create(&mut self, key: &TaskKey) -> &mut Task {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.tasks.push(Task::new(key.clone()));
                self.index.insert(key.clone(), self.tasks.len() - 1);
                self.tasks.len() - 1
            }
        };
        &mut self.tasks[idx]
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Task> {
        self.index.get(key).map(|&idx| &self.tasks[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_vec(self) -> Vec<Task> {
        self.tasks
    }
}

/// A runtime interval projected onto the CPU it ran on.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CpuRuntimeEntry {
    pub task: TaskKey,
    pub start: f64,
    pub duration: f64,
}

/// A raw `sched_switch` as seen on one CPU.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SwitchRecord {
    pub ts: f64,
    pub prev_comm: String,
    pub prev_prio: i32,
    pub next_comm: String,
    pub next_prio: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Cpu {
    pub number: u32,
    pub runtime: Vec<CpuRuntimeEntry>,
    pub total_runtime: f64,
    /// Record duration minus busy time; set by [`Cpu::finalize`].
    pub total_sleeptime: f64,
    /// Fraction (0..=1) of the record the CPU was busy; set by [`Cpu::finalize`].
    pub usage: f64,
    pub switches: Vec<SwitchRecord>,
    /// Seconds spent per idle state, indexed by state id.
    pub idle_states: Vec<f64>,
}

impl Cpu {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    pub fn add_runtime(&mut self, task: &TaskKey, interval: &RuntimeInterval) {
        self.runtime.push(CpuRuntimeEntry {
            task: task.clone(),
            start: interval.start,
            duration: interval.duration,
        });
        self.total_runtime += interval.duration;
    }

    pub fn add_switch(&mut self, record: SwitchRecord) {
        self.switches.push(record);
    }

    /// Accumulate `duration` seconds into the bucket of idle `state`.
    pub fn add_idle(&mut self, state: u32, duration: f64) {
        if state > MAX_IDLE_STATE {
            warn!(cpu = self.number, state, "ignoring idle time of unknown state");
            return;
        }
        let idx = state as usize;
        if self.idle_states.len() <= idx {
            self.idle_states.resize(idx + 1, 0.0);
        }
        self.idle_states[idx] += duration;
    }

    pub fn total_idle(&self) -> f64 {
        self.idle_states.iter().sum()
    }

    /// Derive sleep time and usage once the record duration is known.
    pub fn finalize(&mut self, record_duration: f64) {
        self.total_sleeptime = record_duration - self.total_runtime;
        self.usage = if record_duration > 0.0 {
            self.total_runtime / record_duration
        } else {
            0.0
        };
    }
}

/// CPUs keyed by number, iterated in ascending order.
#[derive(Clone, Debug, Default)]
pub struct CpuSet {
    cpus: BTreeMap<u32, Cpu>,
}

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, number: u32) -> &mut Cpu {
        self.cpus.entry(number).or_insert_with(|| Cpu::new(number))
    }

    pub fn get(&self, number: u32) -> Option<&Cpu> {
        self.cpus.get(&number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cpu> {
        self.cpus.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Cpu> {
        self.cpus.values_mut()
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn into_vec(self) -> Vec<Cpu> {
        self.cpus.into_values().collect()
    }
}

/// Probe identity: one instrumented function of one executable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProbeKey {
    pub executable: String,
    pub namespace: String,
    pub function: String,
    pub arguments: String,
}

impl ProbeKey {
    /// The perf event name of this probe: `namespace__function`, or just
    /// `function` outside a namespace, keeping the last `max_len` characters.
    /// Nested namespaces are joined with `__` as well.
    pub fn event_name(&self, max_len: usize) -> String {
        let name = if self.namespace.is_empty() {
            self.function.clone()
        } else {
            format!("{}__{}", self.namespace.replace("::", "__"), self.function)
        };
        let len = name.chars().count();
        if len > max_len {
            name.chars().skip(len - max_len).collect()
        } else {
            name
        }
    }
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}::", self.namespace)?;
        }
        write!(f, "{}({})", self.function, self.arguments)
    }
}

/// One matched entry -> return pair of a probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ProbeSpan {
    pub entry: f64,
    pub exit: f64,
    pub duration: f64,
}

impl ProbeSpan {
    pub fn new(entry: f64, exit: f64) -> Self {
        Self {
            entry,
            exit,
            duration: exit - entry,
        }
    }

    /// Strict containment: events exactly on a boundary are not inside.
    pub fn contains(&self, ts: f64) -> bool {
        ts > self.entry && ts < self.exit
    }
}

/// Summary statistics over a probe's spans. Every value is `None` when the
/// probe has no span.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProbeStats {
    pub count: usize,
    pub min: Option<ProbeSpan>,
    pub max: Option<ProbeSpan>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

/// Events of one global table that fell inside a probe's spans.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CollisionSet {
    /// Inside any span.
    pub all: Vec<TraceEvent>,
    /// Inside the longest span only.
    pub at_max: Vec<TraceEvent>,
    /// Inside the shortest span only.
    pub at_min: Vec<TraceEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Probe {
    pub key: ProbeKey,
    /// Directory of the executable on the target, if known.
    pub executable_path: String,
    /// perf event name the probe was recorded under.
    pub probe_name: String,
    /// Entry and return events in time order.
    pub events: Vec<TraceEvent>,
    pub spans: Vec<ProbeSpan>,
    pub stats: ProbeStats,
    pub switch_collisions: CollisionSet,
    pub irq_collisions: CollisionSet,
}

impl Probe {
    pub fn new(key: ProbeKey, executable_path: &str, max_name_len: usize) -> Self {
        let probe_name = key.event_name(max_name_len);
        Self {
            key,
            executable_path: executable_path.to_string(),
            probe_name,
            ..Default::default()
        }
    }

    /// Entry timestamps of all spans, in order.
    pub fn span_entries(&self) -> Vec<f64> {
        self.spans.iter().map(|s| s.entry).collect()
    }
}
