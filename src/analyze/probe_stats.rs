//! Probe correlation: entry/return spans, their statistics, and the context
//! switches and interrupts that landed inside them.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use super::Analysis;
use crate::errors::DeltaError;
use crate::events::{EventKind, EventPayload, TraceEvent};
use crate::trace::{CollisionSet, Probe, ProbeSpan, ProbeStats};
use crate::utils::secs_to_ms;

/// Pair each entry event with the return event directly after it.
///
/// Anything else (an entry followed by another entry, a stray return) is
/// skipped one event at a time.
pub fn extract_spans(events: &[TraceEvent]) -> Vec<ProbeSpan> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < events.len() {
        let (current, next) = (&events[i], &events[i + 1]);
        if current.kind() == EventKind::ProbeEntry && next.kind() == EventKind::ProbeExit {
            spans.push(ProbeSpan::new(current.ts, next.ts));
            i += 2;
        } else {
            debug!(ts = current.ts, kind = %current.kind(), "unpaired probe event");
            i += 1;
        }
    }
    spans
}

/// Count, min, max, mean and median of span durations. Min and max keep the
/// first span on ties.
pub fn span_statistics(spans: &[ProbeSpan]) -> ProbeStats {
    let Some(first) = spans.first() else {
        return ProbeStats::default();
    };

    let mut min = *first;
    let mut max = *first;
    for span in &spans[1..] {
        if span.duration < min.duration {
            min = *span;
        }
        if span.duration > max.duration {
            max = *span;
        }
    }

    let mut durations: Vec<f64> = spans.iter().map(|s| s.duration).collect();
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    durations.sort_by(f64::total_cmp);
    let mid = durations.len() / 2;
    let median = if durations.len() % 2 == 0 {
        (durations[mid - 1] + durations[mid]) / 2.0
    } else {
        durations[mid]
    };

    ProbeStats {
        count: spans.len(),
        min: Some(min),
        max: Some(max),
        mean: Some(mean),
        median: Some(median),
    }
}

fn events_inside(span: &ProbeSpan, table: &[TraceEvent]) -> Vec<TraceEvent> {
    table
        .iter()
        .filter(|e| span.contains(e.ts))
        .cloned()
        .collect()
}

/// Rows of `table` strictly inside any span, the longest span and the
/// shortest span.
pub fn collisions(spans: &[ProbeSpan], stats: &ProbeStats, table: &[TraceEvent]) -> CollisionSet {
    let mut set = CollisionSet::default();
    for span in spans {
        set.all.extend(events_inside(span, table));
    }
    if let Some(max) = &stats.max {
        set.at_max = events_inside(max, table);
    }
    if let Some(min) = &stats.min {
        set.at_min = events_inside(min, table);
    }
    set
}

/// Fill in spans, statistics and collision sets of `probe` from its events.
pub fn correlate_probe(probe: &mut Probe, switches: &[TraceEvent], irqs: &[TraceEvent]) {
    probe.spans = extract_spans(&probe.events);
    probe.stats = span_statistics(&probe.spans);
    probe.switch_collisions = collisions(&probe.spans, &probe.stats, switches);
    probe.irq_collisions = collisions(&probe.spans, &probe.stats, irqs);
    debug!(
        probe = %probe.key,
        spans = probe.spans.len(),
        switches = probe.switch_collisions.all.len(),
        irqs = probe.irq_collisions.all.len(),
        "correlated probe"
    );
}

/// Occurrences of one collision source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub name: String,
    pub count: usize,
}

fn source_name(event: &TraceEvent) -> &str {
    match &event.payload {
        EventPayload::SchedSwitch(switch) => &switch.next_comm,
        EventPayload::IrqHandlerEntry(irq) => &irq.name,
        _ => &event.task,
    }
}

/// Collision events grouped by source: the incoming task for a context
/// switch, the handler name for an interrupt. Most frequent first, ties in
/// order of first appearance.
pub fn source_counts(events: &[TraceEvent]) -> Vec<SourceCount> {
    let mut counts: Vec<SourceCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for event in events {
        let name = source_name(event);
        match index.get(name) {
            Some(&idx) => counts[idx].count += 1,
            None => {
                index.insert(name, counts.len());
                counts.push(SourceCount {
                    name: name.to_string(),
                    count: 1,
                });
            }
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

/// Two probe indices to compute entry-time deltas between. Equal indices
/// compare a probe with itself (consecutive calls).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DeltaPair {
    pub first: usize,
    pub second: usize,
}

impl FromStr for DeltaPair {
    type Err = DeltaError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || DeltaError::InvalidPair {
            spec: spec.to_string(),
        };
        let (first, second) = spec.split_once(',').ok_or_else(invalid)?;
        Ok(DeltaPair {
            first: first.trim().parse().map_err(|_| invalid())?,
            second: second.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Parse `"a,b; c,d"` style lists. Blank entries are ignored.
pub fn parse_delta_pairs(spec: &str) -> Result<Vec<DeltaPair>, DeltaError> {
    spec.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DeltaPair::from_str)
        .collect()
}

/// Entry-time deltas for one [`DeltaPair`], in seconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProbeDelta {
    pub first: usize,
    pub second: usize,
    pub first_function: String,
    pub second_function: String,
    pub first_entries: Vec<f64>,
    pub second_entries: Vec<f64>,
    pub deltas: Vec<f64>,
    /// The two probes had a different number of spans and the longer list
    /// was cut to the shorter one.
    pub mismatched: bool,
}

/// Compute deltas for every pair.
///
/// A self-pair yields `entry[n+1] - entry[n]` over the probe's own spans. A
/// cross-pair yields `first.entry[i] - second.entry[i]` by position, bounded
/// by the shorter list.
pub fn compute_deltas(probes: &[Probe], pairs: &[DeltaPair]) -> Result<Vec<ProbeDelta>, DeltaError> {
    let lookup = |index: usize| {
        probes.get(index).ok_or(DeltaError::UnknownProbe {
            index,
            available: probes.len(),
        })
    };

    pairs
        .iter()
        .map(|pair| {
            let first = lookup(pair.first)?;
            let second = lookup(pair.second)?;
            let first_entries = first.span_entries();
            let second_entries = second.span_entries();

            let (deltas, mismatched) = if pair.first == pair.second {
                let deltas: Vec<f64> = first_entries.windows(2).map(|w| w[1] - w[0]).collect();
                (deltas, false)
            } else {
                let mismatched = first_entries.len() != second_entries.len();
                if mismatched {
                    warn!(
                        first = pair.first,
                        second = pair.second,
                        first_spans = first_entries.len(),
                        second_spans = second_entries.len(),
                        "probe span counts differ, pairing by position up to the shorter list"
                    );
                }
                let deltas: Vec<f64> = first_entries
                    .iter()
                    .zip(&second_entries)
                    .map(|(a, b)| a - b)
                    .collect();
                (deltas, mismatched)
            };

            Ok(ProbeDelta {
                first: pair.first,
                second: pair.second,
                first_function: first.key.function.clone(),
                second_function: second.key.function.clone(),
                first_entries,
                second_entries,
                deltas,
                mismatched,
            })
        })
        .collect()
}

/// Result of probe stats analysis.
#[derive(Debug, Serialize)]
pub struct ProbeStatsResult {
    pub probes: Vec<ProbeSummary>,
    pub deltas: Vec<ProbeDeltaSummary>,
}

/// Collision counts of one kind (context switch or interrupt).
#[derive(Debug, Serialize)]
pub struct CollisionSummary {
    pub count: usize,
    pub sources: Vec<SourceCount>,
    pub at_max: Vec<SourceCount>,
    pub at_min: Vec<SourceCount>,
}

impl From<&CollisionSet> for CollisionSummary {
    fn from(set: &CollisionSet) -> Self {
        Self {
            count: set.all.len(),
            sources: source_counts(&set.all),
            at_max: source_counts(&set.at_max),
            at_min: source_counts(&set.at_min),
        }
    }
}

/// One row of the probe table. Timing values are `None` when the probe never
/// completed a call.
#[derive(Debug, Serialize)]
pub struct ProbeSummary {
    pub index: usize,
    pub probe: String,
    pub function: String,
    pub calls: usize,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub context_switches: CollisionSummary,
    pub irqs: CollisionSummary,
}

#[derive(Debug, Serialize)]
pub struct ProbeDeltaSummary {
    pub first: usize,
    pub first_function: String,
    pub second: usize,
    pub second_function: String,
    pub deltas_ms: Vec<f64>,
    pub mismatched: bool,
}

impl Analysis {
    /// Probe table and requested deltas.
    pub fn probe_stats(&self) -> ProbeStatsResult {
        let probes = self
            .probes
            .iter()
            .enumerate()
            .map(|(index, probe)| ProbeSummary {
                index,
                probe: probe.key.to_string(),
                function: probe.key.function.clone(),
                calls: probe.stats.count,
                min_ms: probe.stats.min.map(|s| secs_to_ms(s.duration)),
                max_ms: probe.stats.max.map(|s| secs_to_ms(s.duration)),
                mean_ms: probe.stats.mean.map(secs_to_ms),
                median_ms: probe.stats.median.map(secs_to_ms),
                context_switches: CollisionSummary::from(&probe.switch_collisions),
                irqs: CollisionSummary::from(&probe.irq_collisions),
            })
            .collect();

        let deltas = self
            .deltas
            .iter()
            .map(|d| ProbeDeltaSummary {
                first: d.first,
                first_function: d.first_function.clone(),
                second: d.second,
                second_function: d.second_function.clone(),
                deltas_ms: d.deltas.iter().map(|s| secs_to_ms(*s)).collect(),
                mismatched: d.mismatched,
            })
            .collect();

        ProbeStatsResult { probes, deltas }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProbePayload;
    use crate::trace::ProbeKey;

    fn probe_event(ts: f64, entry: bool) -> TraceEvent {
        let payload = ProbePayload {
            event: if entry {
                "probe_app:work_entry".to_string()
            } else {
                "probe_app:work_exit__return".to_string()
            },
            address: None,
        };
        let payload = if entry {
            EventPayload::ProbeEntry(payload)
        } else {
            EventPayload::ProbeExit(payload)
        };
        TraceEvent::new("app", 100, 0, ts, payload)
    }

    fn probe_with(function: &str, calls: &[(f64, f64)]) -> Probe {
        let key = ProbeKey {
            executable: "app".to_string(),
            function: function.to_string(),
            ..Default::default()
        };
        let mut probe = Probe::new(key, "/usr/bin/", 64);
        for (entry, exit) in calls {
            probe.events.push(probe_event(*entry, true));
            probe.events.push(probe_event(*exit, false));
        }
        probe
    }

    #[test]
    fn test_extract_spans_skips_unpaired() {
        let events = vec![
            probe_event(0.0, false),
            probe_event(1.0, true),
            probe_event(2.0, true),
            probe_event(2.5, false),
            probe_event(3.0, false),
            probe_event(4.0, true),
        ];
        let spans = extract_spans(&events);
        assert_eq!(spans, vec![ProbeSpan::new(2.0, 2.5)]);
    }

    #[test]
    fn test_statistics_without_spans() {
        let stats = span_statistics(&[]);
        assert_eq!(stats.count, 0);
        assert!(stats.min.is_none());
        assert!(stats.max.is_none());
        assert!(stats.mean.is_none());
        assert!(stats.median.is_none());
    }

    #[test]
    fn test_statistics_ties_and_median() {
        let spans = vec![
            ProbeSpan::new(0.0, 2.0),
            ProbeSpan::new(3.0, 4.0),
            ProbeSpan::new(5.0, 7.0),
            ProbeSpan::new(8.0, 9.0),
        ];
        let stats = span_statistics(&spans);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min.unwrap().entry, 3.0);
        assert_eq!(stats.max.unwrap().entry, 0.0);
        assert_eq!(stats.mean, Some(1.5));
        assert_eq!(stats.median, Some(1.5));

        let odd = span_statistics(&spans[..3]);
        assert_eq!(odd.median, Some(2.0));
    }

    #[test]
    fn test_switch_inside_probe_span() {
        let mut probe = probe_with("work", &[(0.0, 0.002)]);
        let switches = vec![
            TraceEvent::sched_switch(0, 0.0, ("a", 1), ("boundary", 2)),
            TraceEvent::sched_switch(0, 0.001, ("a", 1), ("inside", 3)),
            TraceEvent::sched_switch(0, 0.002, ("a", 1), ("boundary", 2)),
        ];
        correlate_probe(&mut probe, &switches, &[]);

        assert_eq!(probe.switch_collisions.all.len(), 1);
        assert_eq!(probe.switch_collisions.at_max.len(), 1);
        assert_eq!(probe.switch_collisions.at_min.len(), 1);
        assert_eq!(probe.switch_collisions.all[0].ts, 0.001);
        assert!(probe.irq_collisions.all.is_empty());
    }

    #[test]
    fn test_collisions_at_max_and_min() {
        let mut probe = probe_with("work", &[(0.0, 1.0), (2.0, 2.1)]);
        let irqs = vec![
            TraceEvent::irq_entry(0, 0.5, 24, "eth0"),
            TraceEvent::irq_entry(0, 0.6, 24, "eth0"),
            TraceEvent::irq_entry(0, 1.5, 30, "nvme"),
            TraceEvent::irq_entry(0, 2.05, 30, "nvme"),
        ];
        correlate_probe(&mut probe, &[], &irqs);

        let irq = &probe.irq_collisions;
        assert_eq!(irq.all.len(), 3);
        assert_eq!(irq.at_max.len(), 2);
        assert_eq!(irq.at_min.len(), 1);
        assert_eq!(
            source_counts(&irq.all),
            vec![
                SourceCount {
                    name: "eth0".to_string(),
                    count: 2
                },
                SourceCount {
                    name: "nvme".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_source_counts_ties_keep_first_appearance() {
        let events = vec![
            TraceEvent::sched_switch(0, 0.1, ("x", 1), ("b", 2)),
            TraceEvent::sched_switch(0, 0.2, ("x", 1), ("a", 3)),
            TraceEvent::sched_switch(0, 0.3, ("x", 1), ("a", 3)),
            TraceEvent::sched_switch(0, 0.4, ("x", 1), ("b", 2)),
            TraceEvent::sched_switch(0, 0.5, ("x", 1), ("c", 4)),
        ];
        let names: Vec<_> = source_counts(&events)
            .into_iter()
            .map(|c| (c.name, c.count))
            .collect();
        assert_eq!(
            names,
            vec![
                ("b".to_string(), 2),
                ("a".to_string(), 2),
                ("c".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_parse_delta_pairs() {
        assert_eq!(
            parse_delta_pairs("0,1; 2, 2;").unwrap(),
            vec![
                DeltaPair {
                    first: 0,
                    second: 1
                },
                DeltaPair {
                    first: 2,
                    second: 2
                },
            ]
        );
        assert!(parse_delta_pairs("").unwrap().is_empty());
        assert_eq!(
            "1".parse::<DeltaPair>(),
            Err(DeltaError::InvalidPair {
                spec: "1".to_string()
            })
        );
        assert!("a,b".parse::<DeltaPair>().is_err());
    }

    #[test]
    fn test_self_pair_deltas() {
        let mut probe = probe_with("tick", &[(1.0, 1.1), (1.5, 1.6), (2.5, 2.6)]);
        correlate_probe(&mut probe, &[], &[]);
        let deltas = compute_deltas(&[probe], &[DeltaPair { first: 0, second: 0 }]).unwrap();
        assert_eq!(deltas[0].deltas, vec![0.5, 1.0]);
        assert!(!deltas[0].mismatched);
    }

    #[test]
    fn test_cross_pair_deltas_truncate_and_flag() {
        let mut a = probe_with("a", &[(2.0, 2.1), (4.0, 4.1), (6.0, 6.1)]);
        let mut b = probe_with("b", &[(1.0, 1.1), (3.5, 3.6)]);
        correlate_probe(&mut a, &[], &[]);
        correlate_probe(&mut b, &[], &[]);

        let deltas = compute_deltas(&[a, b], &[DeltaPair { first: 0, second: 1 }]).unwrap();
        let delta = &deltas[0];
        assert_eq!(delta.deltas, vec![1.0, 0.5]);
        assert!(delta.mismatched);
        assert_eq!(delta.first_function, "a");
        assert_eq!(delta.second_entries, vec![1.0, 3.5]);
    }

    #[test]
    fn test_unknown_probe_index() {
        let probe = probe_with("a", &[]);
        let err = compute_deltas(&[probe], &[DeltaPair { first: 0, second: 3 }]).unwrap_err();
        assert_eq!(
            err,
            DeltaError::UnknownProbe {
                index: 3,
                available: 1
            }
        );
    }

    #[test]
    fn test_probe_stats_report_without_calls() {
        let mut probe = probe_with("idle", &[]);
        correlate_probe(&mut probe, &[], &[]);
        let analysis = Analysis {
            probes: vec![probe],
            ..Default::default()
        };
        let stats = analysis.probe_stats();
        assert_eq!(stats.probes[0].calls, 0);
        assert!(stats.probes[0].min_ms.is_none());
        assert!(stats.probes[0].median_ms.is_none());
        assert_eq!(stats.probes[0].context_switches.count, 0);
    }
}
