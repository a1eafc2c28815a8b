//! Report - exploration results for humans and for tools
//!
//! `Text` prints the outcome, the schedule that produced it and the
//! statistics. The JSON formats carry the same content as one object.

use crate::domain::scenario::{ExploreResult, Outcome, StatsSnapshot};
use crate::domain::types::ThreadId;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Output format of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable text
    #[default]
    Text,
    /// Compact JSON, one object per line
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Debug, Serialize)]
struct TransitionDoc {
    source: ThreadId,
    target: ThreadId,
    label: String,
    count: u32,
}

#[derive(Debug, Serialize)]
struct ReportDoc<'a> {
    scenario: &'a str,
    outcome: &'static str,
    success: bool,
    detail: String,
    runs: u64,
    transitions: Vec<TransitionDoc>,
    coverage: Vec<String>,
    stats: &'a StatsSnapshot,
}

impl<'a> ReportDoc<'a> {
    fn new(result: &'a ExploreResult) -> Self {
        let schedule = result.outcome.schedule();
        let transitions = schedule
            .map(|s| {
                s.transitions()
                    .into_iter()
                    .map(|t| TransitionDoc { source: t.source, target: t.target, label: t.label, count: t.count })
                    .collect()
            })
            .unwrap_or_default();
        let coverage = match &result.outcome {
            Outcome::Forall { coverage, .. } => coverage.iter().map(ToString::to_string).collect(),
            _ => schedule.map(|s| s.coverage().iter().map(ToString::to_string).collect()).unwrap_or_default(),
        };
        Self {
            scenario: &result.name,
            outcome: result.outcome.name(),
            success: result.is_success(),
            detail: result.outcome.to_string(),
            runs: result.runs,
            transitions,
            coverage,
            stats: &result.stats,
        }
    }
}

/// Render `result` in `format`.
///
/// # Errors
///
/// Serialization failures of the JSON formats.
pub fn render(result: &ExploreResult, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(render_text(result)),
        ReportFormat::Json => serde_json::to_string(&ReportDoc::new(result)),
        ReportFormat::JsonPretty => serde_json::to_string_pretty(&ReportDoc::new(result)),
    }
}

fn render_text(result: &ExploreResult) -> String {
    let mut out = String::new();
    let verdict = if result.is_success() { "PASSED" } else { "FAILED" };
    let _ = writeln!(out, "=== {} [{verdict}] ===", result.name);
    let _ = writeln!(out, "{}", result.outcome);
    let _ = writeln!(out, "runs: {}", result.runs);
    if let Some(schedule) = result.outcome.schedule() {
        let _ = write!(out, "{schedule}");
    }
    let _ = writeln!(out, "statistics:");
    let _ = write!(out, "{}", result.stats);
    out
}

/// Write the report of `result` to `out`, followed by a newline.
///
/// # Errors
///
/// I/O failures, and serialization failures mapped to `InvalidData`.
pub fn write_report<W: Write>(out: &mut W, result: &ExploreResult, format: ReportFormat) -> io::Result<()> {
    let text = render(result, format).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(out, "{}", text.trim_end())?;
    out.flush()
}
