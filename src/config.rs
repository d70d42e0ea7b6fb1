//! Analysis configuration.
//!
//! Everything has a default, so a missing config file and `{}` behave the
//! same. A config file looks like:
//!
//! ```json
//! {
//!   "dump_files": {
//!     "sched:sched_switch": "switch.txt"
//!   },
//!   "input_args_file": "input_args.txt",
//!   "tid_pid_file": "tid_pid.txt",
//!   "probe_max_function_len": 64,
//!   "per_cpu_windows": false
//! }
//! ```
//!
//! `dump_files` only needs the kinds whose file name differs from the
//! default `<kind tag>.dump`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::events::EventKind;

pub const DEFAULT_INPUT_ARGS_FILE: &str = "input_args.txt";
pub const DEFAULT_TID_PID_FILE: &str = "tid_pid.txt";
pub const DEFAULT_PROBE_MAX_FUNCTION_LEN: usize = 64;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Event kind tag -> dump file name, overriding the default.
    pub dump_files: BTreeMap<String, String>,
    pub input_args_file: String,
    pub tid_pid_file: String,
    pub probe_max_function_len: usize,
    pub per_cpu_windows: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dump_files: BTreeMap::new(),
            input_args_file: DEFAULT_INPUT_ARGS_FILE.to_string(),
            tid_pid_file: DEFAULT_TID_PID_FILE.to_string(),
            probe_max_function_len: DEFAULT_PROBE_MAX_FUNCTION_LEN,
            per_cpu_windows: false,
        }
    }
}

impl Config {
    /// Dump file name for a tracepoint kind.
    pub fn dump_file(&self, kind: EventKind) -> Option<String> {
        let tag = kind.tag()?;
        Some(
            self.dump_files
                .get(tag)
                .cloned()
                .unwrap_or_else(|| format!("{tag}.dump")),
        )
    }

    pub fn load_config_from_json(buf: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(buf)?;
        for tag in config.dump_files.keys() {
            let kind: EventKind = tag.parse()?;
            if kind.is_probe() {
                anyhow::bail!("Probe dump files are discovered, not configured: {}", tag);
            }
        }
        if config.probe_max_function_len == 0 {
            anyhow::bail!("probe_max_function_len must be at least 1");
        }
        Ok(config)
    }

    pub fn load_config(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::load_config_from_json(&buf)
            .with_context(|| format!("Invalid config {}", path.display()))
    }
}
