//! Task runtime reconstruction.
//!
//! A single left-to-right scan over the merged event stream turns the
//! windows between consecutive `sched_switch` events into runtime intervals.
//! Time inside a window during which the task was not executing (a wakeup in
//! flight, an IRQ or softirq, the CPU idling) is summed up as a correction
//! and subtracted from the window length.
//!
//! The scan is written as an explicit state machine: [`step`] is a pure
//! function from `(state, cursor)` to the next `(state, cursor)` plus at most
//! one emitted interval, and [`scan_intervals`] just drives it to the end of
//! the stream.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::events::{EventPayload, StatRuntimePayload, TraceEvent};
use crate::trace::constants::NS_PER_SEC;
use crate::trace::{RuntimeInterval, TaskKey, TaskSet};

/// Options for [`reconstruct_tasks`].
#[derive(Clone, Debug, Default)]
pub struct ReconstructOptions {
    /// Scan each CPU's events separately so a window only closes on a switch
    /// of its own CPU. Wakeup pairs that cross CPUs then go unmatched.
    pub per_cpu_windows: bool,
}

/// An open window: the task switched in at `start` on `cpu`, with the
/// correction accumulated so far.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    pub owner: TaskKey,
    pub start: f64,
    pub cpu: u32,
    pub correction: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanState {
    AwaitingSwitch,
    InWindow(Window),
}

/// A task's interval produced by one transition.
pub type Emission = (TaskKey, RuntimeInterval);

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: ScanState,
    pub cursor: usize,
    pub emit: Option<Emission>,
}

impl Transition {
    fn advance(state: ScanState, cursor: usize) -> Self {
        Self {
            state,
            cursor,
            emit: None,
        }
    }
}

/// The interval a `sched_stat_runtime` event reports on its own.
fn stat_interval(event: &TraceEvent, stat: &StatRuntimePayload) -> Emission {
    (
        event.task_key(),
        RuntimeInterval {
            start: event.ts,
            duration: stat.runtime_ns as f64 / NS_PER_SEC,
            cpu: event.cpu,
        },
    )
}

/// Whether `event` opens a span that does not count as task runtime.
fn opens_correction(event: &TraceEvent) -> bool {
    match &event.payload {
        EventPayload::SchedWaking(_)
        | EventPayload::SoftirqRaise(_)
        | EventPayload::IrqHandlerEntry(_) => true,
        EventPayload::CpuIdle(idle) => !idle.is_exit(),
        _ => false,
    }
}

/// Whether `candidate` closes the correction span opened by `opener`.
///
/// - waking -> wakeup of the same pid (the wakeup may land on another CPU)
/// - softirq_raise -> softirq_exit of the same vector on the same CPU
/// - irq_handler_entry -> irq_handler_exit of the same irq on the same CPU
/// - cpu_idle (enter) -> cpu_idle exit on the same CPU
fn closes_correction(opener: &TraceEvent, candidate: &TraceEvent) -> bool {
    match (&opener.payload, &candidate.payload) {
        (EventPayload::SchedWaking(waking), EventPayload::SchedWakeup(wakeup)) => {
            waking.pid == wakeup.pid
        }
        (EventPayload::SoftirqRaise(raise), EventPayload::SoftirqExit(exit)) => {
            raise.vec == exit.vec && opener.cpu == candidate.cpu
        }
        (EventPayload::IrqHandlerEntry(entry), EventPayload::IrqHandlerExit(exit)) => {
            entry.irq == exit.irq && opener.cpu == candidate.cpu
        }
        (EventPayload::CpuIdle(_), EventPayload::CpuIdle(exit)) => {
            exit.is_exit() && opener.cpu == candidate.cpu
        }
        _ => false,
    }
}

/// Index of the event closing the correction opened at `opener`, searching
/// no further than the end of the stream.
fn find_closing(events: &[TraceEvent], opener: usize) -> Option<usize> {
    let open = &events[opener];
    events[opener + 1..]
        .iter()
        .position(|candidate| closes_correction(open, candidate))
        .map(|offset| opener + 1 + offset)
}

/// Index of the first `sched_switch` at or after `from`, or `events.len()`.
fn next_switch(events: &[TraceEvent], from: usize) -> usize {
    events[from.min(events.len())..]
        .iter()
        .position(|e| matches!(e.payload, EventPayload::SchedSwitch(_)))
        .map_or(events.len(), |offset| from + offset)
}

/// One transition of the scanner. Returns `None` once `cursor` has run off
/// the end of the stream.
pub fn step(events: &[TraceEvent], state: &ScanState, cursor: usize) -> Option<Transition> {
    let event = events.get(cursor)?;

    let transition = match state {
        ScanState::AwaitingSwitch => match &event.payload {
            EventPayload::SchedSwitch(switch) => Transition::advance(
                ScanState::InWindow(Window {
                    owner: switch.next_task(),
                    start: event.ts,
                    cpu: event.cpu,
                    correction: 0.0,
                }),
                cursor + 1,
            ),
            EventPayload::SchedStatRuntime(stat) => Transition {
                state: ScanState::AwaitingSwitch,
                cursor: cursor + 1,
                emit: Some(stat_interval(event, stat)),
            },
            _ => Transition::advance(ScanState::AwaitingSwitch, cursor + 1),
        },
        ScanState::InWindow(window) => match &event.payload {
            // The task accounted its own runtime: that interval is
            // authoritative and the rest of the window is skipped.
            EventPayload::SchedStatRuntime(stat) if event.task_key() == window.owner => {
                Transition {
                    state: ScanState::AwaitingSwitch,
                    cursor: next_switch(events, cursor + 1),
                    emit: Some(stat_interval(event, stat)),
                }
            }
            EventPayload::SchedStatRuntime(stat) => Transition {
                state: state.clone(),
                cursor: cursor + 1,
                emit: Some(stat_interval(event, stat)),
            },
            EventPayload::SchedSwitch(_) => {
                let mut duration = event.ts - window.correction - window.start;
                if duration < 0.0 {
                    debug!(
                        task = %window.owner,
                        start = window.start,
                        correction = window.correction,
                        "correction exceeds window, clamping interval to zero"
                    );
                    duration = 0.0;
                }
                // The closing switch is left under the cursor so that it
                // opens the next window.
                Transition {
                    state: ScanState::AwaitingSwitch,
                    cursor,
                    emit: Some((
                        window.owner.clone(),
                        RuntimeInterval {
                            start: window.start,
                            duration,
                            cpu: window.cpu,
                        },
                    )),
                }
            }
            _ if opens_correction(event) => match find_closing(events, cursor) {
                Some(close) => {
                    let mut window = window.clone();
                    window.correction += events[close].ts - event.ts;
                    Transition::advance(ScanState::InWindow(window), close + 1)
                }
                None => {
                    debug!(
                        kind = %event.kind(),
                        ts = event.ts,
                        cpu = event.cpu,
                        "unmatched correction event, ignoring"
                    );
                    Transition::advance(state.clone(), cursor + 1)
                }
            },
            _ => Transition::advance(state.clone(), cursor + 1),
        },
    };

    Some(transition)
}

/// Run the scanner over one time-ordered stream and return the emitted
/// intervals in emission order.
pub fn scan_intervals(events: &[TraceEvent]) -> Vec<Emission> {
    let mut emitted = Vec::new();
    let mut state = ScanState::AwaitingSwitch;
    let mut cursor = 0;

    while let Some(next) = step(events, &state, cursor) {
        emitted.extend(next.emit);
        state = next.state;
        cursor = next.cursor;
    }

    if let ScanState::InWindow(window) = state {
        debug!(
            task = %window.owner,
            start = window.start,
            "trace ended inside a window, discarding it"
        );
    }

    emitted
}

/// Reconstruct per-task runtime intervals from a merged, time-ordered
/// stream.
pub fn reconstruct_tasks(events: &[TraceEvent], options: &ReconstructOptions) -> TaskSet {
    let emitted = if options.per_cpu_windows {
        let mut per_cpu: BTreeMap<u32, Vec<TraceEvent>> = BTreeMap::new();
        for event in events {
            per_cpu.entry(event.cpu).or_default().push(event.clone());
        }
        let mut emitted: Vec<Emission> = per_cpu
            .values()
            .flat_map(|stream| scan_intervals(stream))
            .collect();
        emitted.sort_by(|a, b| a.1.start.total_cmp(&b.1.start));
        emitted
    } else {
        scan_intervals(events)
    };

    let mut tasks = TaskSet::new();
    for (key, interval) in &emitted {
        tasks.get_or_create(key).add_interval(*interval);
    }

    info!(
        events = events.len(),
        intervals = emitted.len(),
        tasks = tasks.len(),
        "reconstructed task runtime"
    );
    tasks
}

/// Count `sched_wakeup` events per woken task, creating tasks as needed.
pub fn count_wakeups(tasks: &mut TaskSet, wakeups: &[TraceEvent]) {
    for event in wakeups {
        if let EventPayload::SchedWakeup(wakeup) = &event.payload {
            tasks
                .get_or_create(&TaskKey::new(&wakeup.comm, wakeup.pid))
                .wakeups += 1;
        }
    }
}
