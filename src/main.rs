//! perfview: reconstruct task, CPU and probe timelines from perf dumps
//!
//! `analyze` loads a sample directory of per-tracepoint dump files and
//! prints the runtime, wakeup, CPU and (optionally) probe reports.
//! `export-pids` writes the tid->pid mapping of the traced tasks so a later
//! `analyze` on another machine can still show pids.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use perfview::analyze::parse_delta_pairs;
use perfview::merge::merge_tracepoints;
use perfview::output::report_writer;
use perfview::process::{resolve_pids, tasks_pid_mapping, LocalPidResolver, PidResolver};
use perfview::sample_dir::load_probe_list;
use perfview::sched::{count_wakeups, reconstruct_tasks, ReconstructOptions};
use perfview::trace::Probe;
use perfview::{Analysis, AnalyzeParams, Config, EventKind, OutputFormat, Report, SampleDir};

#[derive(Parser)]
#[command(name = "perfview")]
#[command(about = "Reconstruct task, CPU and probe timelines from perf trace dumps")]
#[command(version)]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a sample directory and print the reports
    Analyze {
        /// Sample directory containing the dump files
        dir: PathBuf,

        /// Record duration in seconds, persisted to the sample directory
        #[arg(short, long)]
        record_duration: Option<f64>,

        /// Include the probe tracing report
        #[arg(short, long)]
        trace: bool,

        /// Probe list files (default: discover probes from dump files)
        #[arg(short, long, requires = "trace")]
        probes: Vec<PathBuf>,

        /// Probe index pairs to compute entry deltas for, e.g. "0,1; 2,2"
        #[arg(short, long, value_name = "A,B", requires = "trace")]
        delta: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resolve pids from the running system instead of the mapping file
        #[arg(long)]
        resolve_local_pids: bool,
    },
    /// Write the tid->pid mapping of the traced tasks, resolved locally
    ExportPids {
        /// Sample directory containing the dump files
        dir: PathBuf,
    },
}

fn init_log(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("failed to init logger: {e}");
    }
}

fn open_sample_dir(dir: &Path, config: &Config) -> Result<SampleDir> {
    if !dir.is_dir() {
        bail!("Sample directory not found: {}", dir.display());
    }
    Ok(SampleDir::new(dir, config))
}

fn record_duration(sample: &SampleDir, requested: Option<f64>) -> Result<f64> {
    if let Some(secs) = requested {
        if !secs.is_finite() || secs < 0.0 {
            bail!("Invalid record duration: {secs}");
        }
        sample.write_record_duration(secs)?;
        return Ok(secs);
    }
    match sample.read_record_duration()? {
        Some(secs) => Ok(secs),
        None => {
            warn!(
                "no record duration given or stored in {}, usage percentages will be 0",
                sample.input_args_path().display()
            );
            Ok(0.0)
        }
    }
}

fn load_probes(sample: &SampleDir, lists: &[PathBuf], config: &Config) -> Result<Vec<Probe>> {
    let mut probes = if lists.is_empty() {
        sample.discover_probes()?
    } else {
        let mut probes = Vec::new();
        for path in lists {
            probes.extend(load_probe_list(path, config.probe_max_function_len)?);
        }
        probes
    };
    sample.load_probe_events(&mut probes)?;
    info!(probes = probes.len(), "loaded probes");
    Ok(probes)
}

#[allow(clippy::too_many_arguments)]
fn run_analyze(
    config: &Config,
    dir: PathBuf,
    requested_duration: Option<f64>,
    trace: bool,
    probe_lists: Vec<PathBuf>,
    delta: Vec<String>,
    format: OutputFormat,
    output: Option<PathBuf>,
    resolve_local_pids: bool,
) -> Result<()> {
    let sample = open_sample_dir(&dir, config)?;

    let mut delta_pairs = Vec::new();
    for spec in &delta {
        delta_pairs.extend(parse_delta_pairs(spec)?);
    }

    let params = AnalyzeParams {
        record_duration: record_duration(&sample, requested_duration)?,
        reconstruct: ReconstructOptions {
            per_cpu_windows: config.per_cpu_windows,
        },
        delta_pairs,
    };

    let tables = sample.load_tables()?;
    let probes = if trace {
        load_probes(&sample, &probe_lists, config)?
    } else {
        Vec::new()
    };

    let stored_mapping = if resolve_local_pids {
        None
    } else {
        sample.read_pid_mapping()?
    };
    let resolver: Option<&dyn PidResolver> = if resolve_local_pids {
        Some(&LocalPidResolver)
    } else {
        stored_mapping.as_ref().map(|m| m as &dyn PidResolver)
    };

    let analysis = Analysis::run(&tables, probes, &params, resolver)?;
    let report = Report::from_analysis(&analysis, trace);

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            report_writer(format, BufWriter::new(file)).write_report(&report)?;
            eprintln!("Report written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = report_writer(format, stdout.lock());
            writer.write_report(&report)?;
        }
    }
    Ok(())
}

fn run_export_pids(config: &Config, dir: PathBuf) -> Result<()> {
    let sample = open_sample_dir(&dir, config)?;
    let tables = sample.load_tables()?;

    let merged = merge_tracepoints(&tables);
    let options = ReconstructOptions {
        per_cpu_windows: config.per_cpu_windows,
    };
    let mut tasks = reconstruct_tasks(&merged, &options);
    count_wakeups(&mut tasks, tables.get(EventKind::SchedWakeup));
    let resolved = resolve_pids(&mut tasks, &LocalPidResolver);

    let mut entries = tasks_pid_mapping(&tasks);
    entries.sort_by_key(|(tid, _)| *tid);
    entries.dedup_by_key(|(tid, _)| *tid);
    sample.write_pid_mapping(&entries)?;

    let mut stderr = io::stderr();
    writeln!(
        stderr,
        "Wrote {} tids ({} resolved) to {}",
        entries.len(),
        resolved,
        sample.tid_pid_path().display()
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Analyze {
            dir,
            record_duration,
            trace,
            probes,
            delta,
            format,
            output,
            resolve_local_pids,
        } => run_analyze(
            &config,
            dir,
            record_duration,
            trace,
            probes,
            delta,
            format,
            output,
            resolve_local_pids,
        ),
        Commands::ExportPids { dir } => run_export_pids(&config, dir),
    }
}
