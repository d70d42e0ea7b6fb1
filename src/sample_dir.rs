//! Layout of a sample directory.
//!
//! A sample directory holds everything one recording produced: one dump file
//! per tracepoint, two dump files per probe, plus small text files carrying
//! the record duration and the tid->pid mapping.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::dump::{load_table, load_tables};
use crate::errors::ImportError;
use crate::events::{EventKind, EventTables};
use crate::merge::merge_tables;
use crate::process::PidMapping;
use crate::trace::constants::{PROBE_DUMP_FILE_RE, PROBE_ENTRY_SUFFIX, PROBE_EXIT_SUFFIX};
use crate::trace::{Probe, ProbeKey};

const INPUT_ARGS_HEADER: &str = "Input Args:";
const RECORD_DURATION_KEY: &str = "Record Duration:";
const TID_PID_HEADER: &str = "TID, PID mapping File:";

/// Paths inside one sample directory.
pub struct SampleDir {
    root: PathBuf,
    config: Config,
}

impl SampleDir {
    pub fn new(root: &Path, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            config: config.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dump file of a tracepoint kind. Probe kinds have one file per probe,
    /// see [`SampleDir::probe_dump_paths`].
    pub fn dump_path(&self, kind: EventKind) -> Option<PathBuf> {
        self.config.dump_file(kind).map(|name| self.root.join(name))
    }

    pub fn input_args_path(&self) -> PathBuf {
        self.root.join(&self.config.input_args_file)
    }

    pub fn tid_pid_path(&self) -> PathBuf {
        self.root.join(&self.config.tid_pid_file)
    }

    /// Entry and return dump files of `probe`.
    pub fn probe_dump_paths(&self, probe: &Probe) -> (PathBuf, PathBuf) {
        let base = format!("perf.data.probe_{}:{}", probe.key.executable, probe.probe_name);
        (
            self.root.join(format!("{base}{PROBE_ENTRY_SUFFIX}.dump")),
            self.root.join(format!("{base}{PROBE_EXIT_SUFFIX}.dump")),
        )
    }

    /// Load every tracepoint table. Missing files become empty tables.
    pub fn load_tables(&self) -> Result<EventTables, ImportError> {
        let tables = load_tables(|kind| self.dump_path(kind))?;
        info!(
            dir = %self.root.display(),
            events = tables.total_events(),
            "loaded tracepoint dumps"
        );
        Ok(tables)
    }

    /// Record duration persisted by an earlier run, if any.
    pub fn read_record_duration(&self) -> Result<Option<f64>> {
        let path = self.input_args_path();
        let Some(contents) = read_optional(&path)? else {
            return Ok(None);
        };
        for line in contents.lines() {
            if let Some(value) = line.trim().strip_prefix(RECORD_DURATION_KEY) {
                let secs: f64 = value.trim().parse().with_context(|| {
                    format!("Invalid record duration '{}' in {}", value.trim(), path.display())
                })?;
                return Ok(Some(secs));
            }
        }
        Ok(None)
    }

    pub fn write_record_duration(&self, secs: f64) -> Result<()> {
        let path = self.input_args_path();
        let contents = format!("{INPUT_ARGS_HEADER}\n{RECORD_DURATION_KEY} {secs}\n");
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// tid->pid mapping persisted next to the dumps, if any. Entries with
    /// pid 0 were never resolved and are left out.
    pub fn read_pid_mapping(&self) -> Result<Option<PidMapping>> {
        let path = self.tid_pid_path();
        let Some(contents) = read_optional(&path)? else {
            return Ok(None);
        };

        let mut mapping = PidMapping::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(TID_PID_HEADER) {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(tid), Some(pid), None) = (parts.next(), parts.next(), parts.next()) else {
                bail!("{}:{}: expected '<tid> <pid>'", path.display(), idx + 1);
            };
            let tid: i32 = tid
                .parse()
                .with_context(|| format!("{}:{}: invalid tid", path.display(), idx + 1))?;
            let pid: u32 = pid
                .parse()
                .with_context(|| format!("{}:{}: invalid pid", path.display(), idx + 1))?;
            if pid == 0 {
                debug!(tid, "skipping unresolved pid mapping entry");
                continue;
            }
            mapping.insert(tid, pid);
        }
        Ok(Some(mapping))
    }

    pub fn write_pid_mapping(&self, entries: &[(i32, u32)]) -> Result<()> {
        let path = self.tid_pid_path();
        let mut contents = format!("{TID_PID_HEADER}\n");
        for (tid, pid) in entries {
            contents.push_str(&format!("{tid} {pid}\n"));
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Probes for which dump files exist, one per distinct executable and
    /// probe name, sorted by file name.
    pub fn discover_probes(&self) -> Result<Vec<Probe>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read directory {}", self.root.display()))?;

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut seen = HashSet::new();
        let mut probes = Vec::new();
        for name in &names {
            let Some(caps) = PROBE_DUMP_FILE_RE.captures(name) else {
                continue;
            };
            let key = ProbeKey {
                executable: caps["exe"].to_string(),
                function: caps["name"].to_string(),
                ..Default::default()
            };
            if !seen.insert(key.clone()) {
                continue;
            }
            let mut probe = Probe::new(key, "", self.config.probe_max_function_len);
            probe.probe_name = caps["name"].to_string();
            probes.push(probe);
        }
        debug!(probes = probes.len(), "discovered probes from dump files");
        Ok(probes)
    }

    /// Load the entry and return events of each probe, merged into one
    /// time-ordered list.
    pub fn load_probe_events(&self, probes: &mut [Probe]) -> Result<(), ImportError> {
        for probe in probes.iter_mut() {
            let (entry_path, exit_path) = self.probe_dump_paths(probe);
            let entries = load_table(&entry_path, EventKind::ProbeEntry)?;
            let exits = load_table(&exit_path, EventKind::ProbeExit)?;
            probe.events = merge_tables([entries.as_slice(), exits.as_slice()]);
            debug!(probe = %probe.key, events = probe.events.len(), "loaded probe events");
        }
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Parse a probe list file.
///
/// ```text
/// # comment
/// executable = server
/// path = /usr/local/bin/
/// net::Poller::poll(int)
/// main()
/// ```
///
/// Only the last `::` separates namespace and function.
pub fn parse_probe_list(contents: &str, max_name_len: usize) -> Result<Vec<Probe>> {
    let mut lines = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let executable = header_value(lines.next(), "executable")?;
    let path = header_value(lines.next(), "path")?;

    let mut probes = Vec::new();
    for line in lines {
        let Some((qualified, rest)) = line.split_once('(') else {
            bail!("Invalid probe '{}', expected 'namespace::function(args)'", line);
        };
        let arguments = rest.split(')').next().unwrap_or_default();
        let (namespace, function) = match qualified.rsplit_once("::") {
            Some((ns, func)) => (ns, func),
            None => ("", qualified),
        };
        if function.is_empty() {
            bail!("Invalid probe '{}', missing function name", line);
        }
        let key = ProbeKey {
            executable: executable.clone(),
            namespace: namespace.to_string(),
            function: function.to_string(),
            arguments: arguments.to_string(),
        };
        probes.push(Probe::new(key, &path, max_name_len));
    }
    Ok(probes)
}

fn header_value(line: Option<&str>, key: &str) -> Result<String> {
    let Some(line) = line else {
        bail!("Probe list is missing the '{} = ...' line", key);
    };
    match line.split_once('=') {
        Some((k, v)) if k.trim() == key => Ok(v.trim().to_string()),
        _ => bail!("Expected '{} = ...' in probe list, found '{}'", key, line),
    }
}

/// Read and parse a probe list file.
pub fn load_probe_list(path: &Path, max_name_len: usize) -> Result<Vec<Probe>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read probe list {}", path.display()))?;
    parse_probe_list(&contents, max_name_len)
        .with_context(|| format!("Invalid probe list {}", path.display()))
}
