//! `perf script` dump import.
//!
//! Each tracepoint is dumped to its own text file, one event per line:
//!
//! ```text
//!   app worker 1234 [002]  8123.456789: sched:sched_switch: prev_comm=app prev_pid=1234 ...
//! ```
//!
//! The header (task, tid, cpu, timestamp, event tag) is common to every
//! kind; the payload is a list of `key=value` fields specific to the kind.
//! Probe events carry the instruction address(es) in parentheses instead.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::errors::ImportError;
use crate::events::{
    EventKind, EventPayload, EventTables, IdlePayload, IrqEntryPayload, IrqExitPayload,
    MigratePayload, ProbePayload, SoftirqPayload, StatRuntimePayload, SwitchPayload, TraceEvent,
    WakePayload,
};
use crate::trace::constants::{
    DUMP_LINE_RE, IDLE_EXIT_STATE, MAX_IDLE_STATE, PAYLOAD_FIELD_RE, PROBE_ADDRESS_RE,
};

/// Why a single line could not be turned into an event.
#[derive(Debug, PartialEq)]
enum LineError {
    Malformed(String),
    UnknownEvent(String),
}

impl LineError {
    fn into_import_error(self, path: &Path, line: usize) -> ImportError {
        match self {
            LineError::Malformed(reason) => ImportError::Malformed {
                path: path.to_path_buf(),
                line,
                reason,
            },
            LineError::UnknownEvent(tag) => ImportError::UnknownEvent {
                path: path.to_path_buf(),
                line,
                tag,
            },
        }
    }
}

/// `key=value` fields of a tracepoint payload.
struct Fields<'a> {
    values: HashMap<&'a str, &'a str>,
}

impl<'a> Fields<'a> {
    fn parse(payload: &'a str) -> Self {
        // (key, start of the whole match, start of the value)
        let keys: Vec<(&str, usize, usize)> = PAYLOAD_FIELD_RE
            .captures_iter(payload)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((caps.name("key")?.as_str(), whole.start(), whole.end()))
            })
            .collect();

        let mut values = HashMap::with_capacity(keys.len());
        for (i, &(key, _, value_start)) in keys.iter().enumerate() {
            let value_end = keys.get(i + 1).map_or(payload.len(), |next| next.1);
            let value = payload[value_start..value_end].trim();
            let value = value.strip_suffix("==>").unwrap_or(value).trim_end();
            values.insert(key, value);
        }
        Self { values }
    }

    fn text(&self, key: &str) -> Result<String, LineError> {
        self.values
            .get(key)
            .map(|v| v.to_string())
            .ok_or_else(|| LineError::Malformed(format!("missing field '{key}'")))
    }

    fn number<T: FromStr>(&self, key: &str) -> Result<T, LineError> {
        let raw = self
            .values
            .get(key)
            .ok_or_else(|| LineError::Malformed(format!("missing field '{key}'")))?;
        // Units follow the number, e.g. `runtime=250000 [ns]`.
        let number = raw.split_whitespace().next().unwrap_or_default();
        number
            .parse()
            .map_err(|_| LineError::Malformed(format!("field '{key}' is not a number: {raw}")))
    }

    /// `power:cpu_idle` states are unsigned, but some kernels print the exit
    /// state as -1.
    fn state(&self, key: &str) -> Result<u32, LineError> {
        let state: i64 = self.number(key)?;
        match state {
            -1 => Ok(IDLE_EXIT_STATE),
            s if s == i64::from(IDLE_EXIT_STATE) => Ok(IDLE_EXIT_STATE),
            s if (0..=i64::from(MAX_IDLE_STATE)).contains(&s) => Ok(s as u32),
            s => Err(LineError::Malformed(format!("idle state out of range: {s}"))),
        }
    }
}

fn parse_payload(kind: EventKind, tag: &str, payload: &str) -> Result<EventPayload, LineError> {
    let fields = Fields::parse(payload);
    let parsed = match kind {
        EventKind::SchedSwitch => EventPayload::SchedSwitch(SwitchPayload {
            prev_comm: fields.text("prev_comm")?,
            prev_pid: fields.number("prev_pid")?,
            prev_prio: fields.number("prev_prio")?,
            prev_state: fields.text("prev_state")?,
            next_comm: fields.text("next_comm")?,
            next_pid: fields.number("next_pid")?,
            next_prio: fields.number("next_prio")?,
        }),
        EventKind::SchedStatRuntime => EventPayload::SchedStatRuntime(StatRuntimePayload {
            comm: fields.text("comm")?,
            pid: fields.number("pid")?,
            runtime_ns: fields.number("runtime")?,
            vruntime_ns: fields.number("vruntime")?,
        }),
        EventKind::SchedWaking | EventKind::SchedWakeup => {
            let wake = WakePayload {
                comm: fields.text("comm")?,
                pid: fields.number("pid")?,
                prio: fields.number("prio")?,
                target_cpu: fields.number("target_cpu")?,
            };
            if kind == EventKind::SchedWaking {
                EventPayload::SchedWaking(wake)
            } else {
                EventPayload::SchedWakeup(wake)
            }
        }
        EventKind::SchedMigrate => EventPayload::SchedMigrate(MigratePayload {
            comm: fields.text("comm")?,
            pid: fields.number("pid")?,
            prio: fields.number("prio")?,
            orig_cpu: fields.number("orig_cpu")?,
            dest_cpu: fields.number("dest_cpu")?,
        }),
        EventKind::SoftirqRaise | EventKind::SoftirqExit => {
            let softirq = SoftirqPayload {
                vec: fields.number("vec")?,
                action: fields
                    .text("action")
                    .ok()
                    .map(|a| a.trim_end_matches(']').to_string()),
            };
            if kind == EventKind::SoftirqRaise {
                EventPayload::SoftirqRaise(softirq)
            } else {
                EventPayload::SoftirqExit(softirq)
            }
        }
        EventKind::IrqHandlerEntry => EventPayload::IrqHandlerEntry(IrqEntryPayload {
            irq: fields.number("irq")?,
            name: fields.text("name")?,
        }),
        EventKind::IrqHandlerExit => EventPayload::IrqHandlerExit(IrqExitPayload {
            irq: fields.number("irq")?,
            ret: fields.text("ret")?,
        }),
        EventKind::CpuIdle => EventPayload::CpuIdle(IdlePayload {
            state: fields.state("state")?,
            cpu_id: fields.number("cpu_id")?,
        }),
        EventKind::ProbeEntry | EventKind::ProbeExit => {
            let address = PROBE_ADDRESS_RE
                .captures(payload)
                .and_then(|caps| u64::from_str_radix(&caps[1], 16).ok());
            let probe = ProbePayload {
                event: tag.to_string(),
                address,
            };
            if kind == EventKind::ProbeEntry {
                EventPayload::ProbeEntry(probe)
            } else {
                EventPayload::ProbeExit(probe)
            }
        }
    };
    Ok(parsed)
}

fn parse_line(line: &str) -> Result<TraceEvent, LineError> {
    let caps = DUMP_LINE_RE
        .captures(line)
        .ok_or_else(|| LineError::Malformed("not a perf script line".to_string()))?;

    let tag = &caps["event"];
    let kind: EventKind = tag
        .parse()
        .map_err(|_| LineError::UnknownEvent(tag.to_string()))?;

    let tid = caps["tid"]
        .parse()
        .map_err(|_| LineError::Malformed(format!("bad tid '{}'", &caps["tid"])))?;
    let cpu = caps["cpu"]
        .parse()
        .map_err(|_| LineError::Malformed(format!("bad cpu '{}'", &caps["cpu"])))?;
    let ts = caps["ts"]
        .parse()
        .map_err(|_| LineError::Malformed(format!("bad timestamp '{}'", &caps["ts"])))?;
    let payload = caps.name("payload").map_or("", |m| m.as_str());

    Ok(TraceEvent::new(
        caps["task"].trim(),
        tid,
        cpu,
        ts,
        parse_payload(kind, tag, payload)?,
    ))
}

/// Parse the contents of one dump file. Every event must be of `kind`;
/// blank lines are skipped.
pub fn parse_dump(path: &Path, contents: &str, kind: EventKind) -> Result<Vec<TraceEvent>, ImportError> {
    let mut events = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let event = parse_line(line).map_err(|e| e.into_import_error(path, lineno))?;
        if event.kind() != kind {
            return Err(ImportError::UnknownEvent {
                path: path.to_path_buf(),
                line: lineno,
                tag: event.kind().to_string(),
            });
        }
        events.push(event);
    }
    Ok(events)
}

/// Load the table of one kind from `path`. A missing file is an empty table.
pub fn load_table(path: &Path, kind: EventKind) -> Result<Vec<TraceEvent>, ImportError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), kind = %kind, "dump file not found, using an empty table");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(ImportError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let events = parse_dump(path, &contents, kind)?;
    debug!(path = %path.display(), events = events.len(), "loaded dump");
    Ok(events)
}

/// Load every kernel tracepoint table. `path_for` maps a kind to its dump
/// file.
pub fn load_tables<F>(path_for: F) -> Result<EventTables, ImportError>
where
    F: Fn(EventKind) -> Option<std::path::PathBuf>,
{
    let mut tables = EventTables::new();
    for kind in EventKind::TRACEPOINTS {
        if let Some(path) = path_for(kind) {
            tables.insert(kind, load_table(&path, kind)?);
        }
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(line: &str) -> TraceEvent {
        parse_line(line).unwrap()
    }

    #[test]
    fn test_parse_sched_switch() {
        let event = parse(
            "          <idle>     0 [001]  5143.381234: sched:sched_switch: prev_comm=swapper/1 \
             prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=app next_pid=4242 next_prio=120",
        );
        assert_eq!(event.task, "<idle>");
        assert_eq!(event.tid, 0);
        assert_eq!(event.cpu, 1);
        assert_eq!(event.ts, 5143.381234);
        let EventPayload::SchedSwitch(switch) = &event.payload else {
            panic!("expected switch");
        };
        assert_eq!(switch.prev_comm, "swapper/1");
        assert_eq!(switch.prev_state, "R");
        assert_eq!(switch.next_comm, "app");
        assert_eq!(switch.next_pid, 4242);
    }

    #[test]
    fn test_parse_task_name_with_spaces() {
        let event = parse(
            "  Web Content 3301 [000]  10.000100: sched:sched_stat_runtime: comm=Web pid=3301 \
             runtime=250000 [ns] vruntime=9000000 [ns]",
        );
        assert_eq!(event.task, "Web Content");
        assert_eq!(event.tid, 3301);
        let EventPayload::SchedStatRuntime(stat) = &event.payload else {
            panic!("expected stat_runtime");
        };
        assert_eq!(stat.comm, "Web Content");
        assert_eq!(stat.pid, 3301);
        assert_eq!(stat.runtime_ns, 250_000);
        assert_eq!(stat.vruntime_ns, 9_000_000);
    }

    #[test]
    fn test_parse_switch_comm_with_spaces() {
        let event = parse(
            "app 4242 [000] 10.0: sched:sched_switch: prev_comm=app prev_pid=4242 \
             prev_prio=120 prev_state=S ==> next_comm=Web Content next_pid=3301 next_prio=120",
        );
        let EventPayload::SchedSwitch(switch) = &event.payload else {
            panic!("expected switch");
        };
        assert_eq!(switch.prev_comm, "app");
        assert_eq!(switch.prev_state, "S");
        assert_eq!(switch.next_comm, "Web Content");
        assert_eq!(switch.next_pid, 3301);
        assert_eq!(switch.next_prio, 120);
    }

    #[test]
    fn test_comm_with_spaces_keeps_one_task_identity() {
        use crate::sched::{reconstruct_tasks, ReconstructOptions};

        let events: Vec<TraceEvent> = [
            "app 4242 [000] 10.0: sched:sched_switch: prev_comm=app prev_pid=4242 \
             prev_prio=120 prev_state=S ==> next_comm=Web Content next_pid=3301 next_prio=120",
            "Web Content 3301 [000] 10.1: sched:sched_stat_runtime: comm=Web Content \
             pid=3301 runtime=100000000 [ns] vruntime=9000000 [ns]",
            "Web Content 3301 [000] 10.2: sched:sched_switch: prev_comm=Web Content \
             prev_pid=3301 prev_prio=120 prev_state=S ==> next_comm=app next_pid=4242 \
             next_prio=120",
        ]
        .into_iter()
        .map(parse)
        .collect();

        let tasks = reconstruct_tasks(&events, &ReconstructOptions::default());
        let keys: Vec<(&str, i32)> = tasks.iter().map(|t| (t.key.name.as_str(), t.key.tid)).collect();
        assert_eq!(keys, vec![("Web Content", 3301)]);
        let web = tasks.iter().next().unwrap();
        assert!((web.total_runtime - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_wake_and_migrate() {
        let waking = parse(
            "app 10 [002] 1.5: sched:sched_waking: comm=worker pid=11 prio=120 target_cpu=003",
        );
        let EventPayload::SchedWaking(wake) = &waking.payload else {
            panic!("expected waking");
        };
        assert_eq!(wake.pid, 11);
        assert_eq!(wake.target_cpu, 3);

        let migrate = parse(
            "app 10 [002] 1.6: sched:sched_migrate_task: comm=worker pid=11 prio=120 \
             orig_cpu=2 dest_cpu=0",
        );
        assert_eq!(migrate.kind(), EventKind::SchedMigrate);
    }

    #[test]
    fn test_parse_irq_and_softirq() {
        let entry = parse("swapper/0 0 [000] 2.0: irq:irq_handler_entry: irq=24 name=eth0");
        let EventPayload::IrqHandlerEntry(irq) = &entry.payload else {
            panic!("expected irq entry");
        };
        assert_eq!(irq.irq, 24);
        assert_eq!(irq.name, "eth0");

        let raise = parse("swapper/0 0 [000] 2.1: irq:softirq_raise: vec=9 [action=RCU]");
        let EventPayload::SoftirqRaise(softirq) = &raise.payload else {
            panic!("expected softirq raise");
        };
        assert_eq!(softirq.vec, 9);
        assert_eq!(softirq.action.as_deref(), Some("RCU"));
    }

    #[test]
    fn test_parse_cpu_idle_exit_spellings() {
        for state in ["4294967295", "-1"] {
            let event = parse(&format!(
                "swapper/2 0 [002] 3.0: power:cpu_idle: state={state} cpu_id=2"
            ));
            let EventPayload::CpuIdle(idle) = &event.payload else {
                panic!("expected idle");
            };
            assert_eq!(idle.state, IDLE_EXIT_STATE);
            assert!(idle.is_exit());
        }
    }

    #[test]
    fn test_parse_cpu_idle_state_out_of_range() {
        for state in ["-2", "99999999999", "4294967294"] {
            let line = format!("swapper/2 0 [002] 3.0: power:cpu_idle: state={state} cpu_id=2");
            assert!(
                matches!(parse_line(&line), Err(LineError::Malformed(_))),
                "state {state} accepted"
            );
        }
        let event = parse(&format!(
            "swapper/2 0 [002] 3.0: power:cpu_idle: state={MAX_IDLE_STATE} cpu_id=2"
        ));
        let EventPayload::CpuIdle(idle) = &event.payload else {
            panic!("expected idle");
        };
        assert_eq!(idle.state, MAX_IDLE_STATE);
    }

    #[test]
    fn test_parse_probe_events() {
        let entry = parse("app 4242 [001] 7.25: probe_app:net__poll_entry: (55d1c0a3b1f0)");
        assert_eq!(entry.kind(), EventKind::ProbeEntry);
        let EventPayload::ProbeEntry(probe) = &entry.payload else {
            panic!("expected probe entry");
        };
        assert_eq!(probe.event, "probe_app:net__poll_entry");
        assert_eq!(probe.address, Some(0x55d1c0a3b1f0));

        let exit = parse(
            "app 4242 [001] 7.26: probe_app:net__poll_exit__return: (55d1c0a3b280 <- 55d1c0a3b1f0)",
        );
        assert_eq!(exit.kind(), EventKind::ProbeExit);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(
            parse_line("this is not a trace line"),
            Err(LineError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("app 1 [000] 1.0: sched:sched_switch: prev_comm=app"),
            Err(LineError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("app 1 [000] 1.0: irq:irq_handler_entry: irq=abc name=x"),
            Err(LineError::Malformed(_))
        ));
        assert_eq!(
            parse_line("app 1 [000] 1.0: sched:sched_process_exec: filename=/bin/sh"),
            Err(LineError::UnknownEvent("sched:sched_process_exec".to_string()))
        );
    }

    #[test]
    fn test_parse_dump_reports_line_number() {
        let path = PathBuf::from("irq:irq_handler_entry.dump");
        let contents = "swapper/0 0 [000] 2.0: irq:irq_handler_entry: irq=24 name=eth0\n\
                        \n\
                        garbage\n";
        let err = parse_dump(&path, contents, EventKind::IrqHandlerEntry).unwrap_err();
        assert!(matches!(err, ImportError::Malformed { line: 3, .. }));
    }

    #[test]
    fn test_parse_dump_rejects_other_kinds() {
        let path = PathBuf::from("power:cpu_idle.dump");
        let contents = "swapper/0 0 [000] 2.0: irq:irq_handler_entry: irq=24 name=eth0\n";
        let err = parse_dump(&path, contents, EventKind::CpuIdle).unwrap_err();
        assert!(matches!(err, ImportError::UnknownEvent { line: 1, .. }));
    }

    #[test]
    fn test_load_table_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let events = load_table(&dir.path().join("nope.dump"), EventKind::SchedSwitch).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_load_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("power:cpu_idle.dump"),
            "swapper/0 0 [000] 1.0: power:cpu_idle: state=1 cpu_id=0\n\
             swapper/0 0 [000] 1.5: power:cpu_idle: state=4294967295 cpu_id=0\n",
        )
        .unwrap();

        let tables = load_tables(|kind| {
            kind.tag()
                .map(|tag| dir.path().join(format!("{tag}.dump")))
        })
        .unwrap();
        assert_eq!(tables.get(EventKind::CpuIdle).len(), 2);
        assert!(tables.get(EventKind::SchedSwitch).is_empty());
        assert!(tables.contains(EventKind::SchedSwitch));
    }
}
