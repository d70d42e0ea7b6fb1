//! Merge per-kind event tables into a single time-ordered stream.
//!
//! Tables are concatenated in the order given and then stably sorted by
//! timestamp, so events with equal timestamps keep their table order and,
//! within a table, their row order. The reconstruction state machine relies
//! on that tiebreak.

use crate::events::{EventKind, EventTables, Timestamped, TraceEvent};

/// Concatenate `tables` and stably sort the result by timestamp.
pub fn merge_tables<'a, T, I>(tables: I) -> Vec<T>
where
    T: Timestamped + Clone + 'a,
    I: IntoIterator<Item = &'a [T]>,
{
    let mut merged: Vec<T> = tables
        .into_iter()
        .flat_map(|table| table.iter().cloned())
        .collect();
    // `sort_by` is a stable merge sort.
    merged.sort_by(|a, b| a.ts().total_cmp(&b.ts()));
    merged
}

/// Merge the tables of `kinds` (missing tables count as empty).
pub fn merge_kinds(tables: &EventTables, kinds: &[EventKind]) -> Vec<TraceEvent> {
    merge_tables(kinds.iter().map(|kind| tables.get(*kind)))
}

/// Merge every kernel tracepoint table in [`EventKind::TRACEPOINTS`] order.
pub fn merge_tracepoints(tables: &EventTables) -> Vec<TraceEvent> {
    merge_kinds(tables, &EventKind::TRACEPOINTS)
}

/// True if `events` is sorted by timestamp.
pub fn is_time_ordered<T: Timestamped>(events: &[T]) -> bool {
    events.windows(2).all(|w| w[0].ts() <= w[1].ts())
}
