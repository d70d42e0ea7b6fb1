//! perfview library - trace import, timeline reconstruction and reports.
//!
//! The `perfview` binary is a thin shell around this library: it loads a
//! sample directory of perf script dumps, runs the analysis and writes a
//! report.
//!
//! # Modules
//!
//! - [`dump`] - Parsing of per-tracepoint dump files into event tables
//! - [`sample_dir`] - Layout of a sample directory and its side files
//! - [`sched`] - Task runtime reconstruction from the merged event stream
//! - [`analyze`] - The full analysis pipeline and report views
//! - [`output`] - Text, CSV and JSON report writers
//!
//! # Example
//!
//! ```no_run
//! use perfview::{Analysis, AnalyzeParams, Config, SampleDir};
//! use std::path::Path;
//!
//! let config = Config::default();
//! let dir = SampleDir::new(Path::new("./sample"), &config);
//! let tables = dir.load_tables().expect("Failed to load dumps");
//!
//! let params = AnalyzeParams {
//!     record_duration: 5.0,
//!     ..Default::default()
//! };
//! let analysis = Analysis::run(&tables, Vec::new(), &params, None)
//!     .expect("Failed to analyze trace");
//! println!("{} tasks", analysis.tasks.len());
//! ```

pub mod analyze;
pub mod config;
pub mod dump;
pub mod errors;
pub mod events;
pub mod merge;
pub mod output;
pub mod process;
pub mod sample_dir;
pub mod sched;
pub mod trace;
pub mod utils;

// Re-export for convenience
pub use analyze::{Analysis, AnalyzeParams, DeltaPair};
pub use config::Config;
pub use errors::{DeltaError, ImportError};
pub use events::{EventKind, EventTables, TraceEvent};
pub use output::{OutputFormat, Report};
pub use sample_dir::SampleDir;
