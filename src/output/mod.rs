//! Report output formats
//!
//! The `ReportWriter` trait lets the CLI emit a [`Report`] without knowing
//! the format. Text and CSV both go through the flattened [`Table`] view so
//! they always show the same columns; JSON serializes the report model
//! itself and keeps full precision and structure.

mod types;

pub use types::*;

use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;

/// Widest a text column may get before its cells are cut.
const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
}

/// Trait for abstracting report output formats.
pub trait ReportWriter {
    fn write_report(&mut self, report: &Report) -> Result<()>;
}

/// Aligned text tables, columns separated by ` | `.
pub struct TextWriter<W: Write> {
    out: W,
}

impl<W: Write> TextWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ReportWriter for TextWriter<W> {
    fn write_report(&mut self, report: &Report) -> Result<()> {
        for (i, table) in report.tables().iter().enumerate() {
            if i > 0 {
                writeln!(self.out)?;
            }
            writeln!(self.out, "{}", table.title)?;
            write_table(&mut self.out, table)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width && width > 3 {
        let kept: String = value.chars().take(width - 3).collect();
        format!("{kept}...")
    } else {
        value.to_string()
    }
}

/// Print one table with a header row and a `-+-` separator line.
pub fn write_table(out: &mut dyn Write, table: &Table) -> Result<()> {
    if table.rows.is_empty() {
        writeln!(out, "(no results)")?;
        return Ok(());
    }

    let mut widths: Vec<usize> = table.headers.iter().map(|h| h.chars().count()).collect();
    for row in &table.rows {
        for (i, val) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(val.chars().count());
            }
        }
    }

    for w in &mut widths {
        *w = (*w).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = table
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    writeln!(out, "{}", header_line.join(" | ").trim_end())?;

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", sep.join("-+-"))?;

    for row in &table.rows {
        let row_line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let width = widths.get(i).copied().unwrap_or(MAX_COLUMN_WIDTH);
                format!("{:width$}", truncate(v, width))
            })
            .collect();
        writeln!(out, "{}", row_line.join(" | ").trim_end())?;
    }
    Ok(())
}

/// One CSV section per table, preceded by its title and separated by a
/// blank line.
pub struct CsvWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(values: &[String]) -> String {
    values
        .iter()
        .map(|v| csv_field(v))
        .collect::<Vec<_>>()
        .join(",")
}

impl<W: Write> ReportWriter for CsvWriter<W> {
    fn write_report(&mut self, report: &Report) -> Result<()> {
        for (i, table) in report.tables().iter().enumerate() {
            if i > 0 {
                writeln!(self.out)?;
            }
            writeln!(self.out, "{}", csv_field(&table.title))?;
            writeln!(self.out, "{}", csv_line(&table.headers))?;
            for row in &table.rows {
                writeln!(self.out, "{}", csv_line(row))?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// The report model as pretty-printed JSON.
pub struct JsonWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ReportWriter for JsonWriter<W> {
    fn write_report(&mut self, report: &Report) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.out, report)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// A writer for `format` over `out`.
pub fn report_writer<'a, W: Write + 'a>(
    format: OutputFormat,
    out: W,
) -> Box<dyn ReportWriter + 'a> {
    match format {
        OutputFormat::Table => Box::new(TextWriter::new(out)),
        OutputFormat::Csv => Box::new(CsvWriter::new(out)),
        OutputFormat::Json => Box::new(JsonWriter::new(out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{Analysis, AnalyzeParams};
    use crate::events::{EventKind, EventTables, TraceEvent};
    use crate::trace::constants::IDLE_EXIT_STATE;

    fn sample_report(include_trace: bool) -> Report {
        let mut tables = EventTables::new();
        tables.insert(
            EventKind::SchedSwitch,
            vec![
                TraceEvent::sched_switch(0, 0.0, ("swapper/0", 0), ("app, worker", 10)),
                TraceEvent::sched_switch(0, 0.25, ("app, worker", 10), ("swapper/0", 0)),
            ],
        );
        tables.insert(
            EventKind::CpuIdle,
            vec![
                TraceEvent::cpu_idle(0, 0.5, 1),
                TraceEvent::cpu_idle(0, 0.6, IDLE_EXIT_STATE),
            ],
        );
        let params = AnalyzeParams {
            record_duration: 1.0,
            ..Default::default()
        };
        let analysis = Analysis::run(&tables, Vec::new(), &params, None).unwrap();
        Report::from_analysis(&analysis, include_trace)
    }

    fn render(format: OutputFormat, report: &Report) -> String {
        let mut buf = Vec::new();
        report_writer(format, &mut buf).write_report(report).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_write_table() {
        let mut table = Table::new("T", &["A", "Long header"]);
        table.rows.push(vec!["x".to_string(), "1".to_string()]);
        let mut buf = Vec::new();
        write_table(&mut buf, &table).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "A | Long header\n--+------------\nx | 1\n");
    }

    #[test]
    fn test_write_empty_table() {
        let table = Table::new("T", &["A"]);
        let mut buf = Vec::new();
        write_table(&mut buf, &table).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "(no results)\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdefgh", 6), "abc...");
        assert_eq!(truncate("abc", 6), "abc");
    }

    #[test]
    fn test_text_report_sections() {
        let text = render(OutputFormat::Table, &sample_report(false));
        assert!(text.contains("Task Runtime"));
        assert!(text.contains("CPU Usage (record duration 1 s)"));
        assert!(text.contains("CPU Idle States"));
        assert!(text.contains("250.000"));
        assert!(!text.contains("Probe Tracing"));
    }

    #[test]
    fn test_csv_quotes_fields() {
        let csv = render(OutputFormat::Csv, &sample_report(false));
        assert!(csv.contains("\"app, worker\",10,-,1,250.000"));
        assert!(csv.contains("CPU,State 0 [ms],State 0 [%],State 1 [ms],State 1 [%],Idle [%]"));
        assert!(csv.contains("0,0.000,0.000,100.000,10.000,10.000"));
    }

    #[test]
    fn test_json_report() {
        let json = render(OutputFormat::Json, &sample_report(true));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["record_duration_seconds"], 1.0);
        assert_eq!(value["sched"]["tasks"][0]["name"], "app, worker");
        assert_eq!(value["cpu"]["idle"][0]["idle_pct"], 10.0);
        assert!(value["trace"]["probes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_json_omits_trace_when_not_requested() {
        let json = render(OutputFormat::Json, &sample_report(false));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("trace").is_none());
    }
}
