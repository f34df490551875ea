//! Run results: per-directive records and the aggregate report.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::looping::LoopState;
use crate::core::types::{Directive, ExecutionStatus};

/// How a directive ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Skipped,
    Failed,
    Halted,
    /// Stopped because a sibling project failed or halted.
    Cancelled,
}

impl From<LoopState> for Outcome {
    fn from(state: LoopState) -> Self {
        match state {
            LoopState::Skipped => Self::Skipped,
            LoopState::Failed => Self::Failed,
            LoopState::Halted => Self::Halted,
            _ => Self::Done,
        }
    }
}

/// Result of one directive, or of a file that could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveRecord {
    pub project: String,
    pub file: PathBuf,
    pub lines: Vec<usize>,
    /// `None` for file-level failures.
    pub identifier: Option<String>,
    pub outcome: Outcome,
    pub status: ExecutionStatus,
    pub runs: u32,
    /// Raw exit code of the last command run.
    pub exit_code: Option<i32>,
    /// Commands of the last iteration, space-joined.
    pub commands: Vec<String>,
    pub error: Option<String>,
}

impl DirectiveRecord {
    pub fn for_directive(project: &str, file: &Path, directive: &Directive) -> Self {
        Self {
            project: project.to_string(),
            file: file.to_path_buf(),
            lines: directive.line_numbers.clone(),
            identifier: Some(directive.identifier.clone()),
            outcome: Outcome::Done,
            status: ExecutionStatus::Success,
            runs: 0,
            exit_code: None,
            commands: Vec::new(),
            error: None,
        }
    }

    pub fn file_failure(project: &str, file: &Path, error: impl ToString) -> Self {
        Self {
            project: project.to_string(),
            file: file.to_path_buf(),
            lines: Vec::new(),
            identifier: None,
            outcome: Outcome::Failed,
            status: ExecutionStatus::CaughtException,
            runs: 0,
            exit_code: None,
            commands: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    fn status_word(&self) -> &'static str {
        match (self.outcome, self.status) {
            (Outcome::Halted, _) => "HALTED",
            (Outcome::Cancelled, _) => "CANCELLED",
            (Outcome::Skipped, _) => "SKIPPED",
            (_, ExecutionStatus::ExternalCallFailed) => "FAILURE",
            (_, ExecutionStatus::CaughtException) => "ERROR",
            _ => "SUCCESS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    /// Run-level failure that prevented execution (dependency errors).
    pub error: Option<String>,
    pub records: Vec<DirectiveRecord>,
}

impl ExecutionReport {
    /// Aggregate records into the final status.
    ///
    /// A halt decides the status outright. Otherwise the first failing record
    /// wins under `halt_on_errors`, and the last one wins without it.
    /// Cancelled records keep the status of what actually ran, so a sibling's
    /// cancellation never counts as a failure.
    pub fn finish(
        started_at: DateTime<Utc>,
        records: Vec<DirectiveRecord>,
        halted: Option<i32>,
        error: Option<String>,
        halt_on_errors: bool,
    ) -> Self {
        let status = match (halted, &error) {
            (Some(code), _) => ExecutionStatus::Halted(code),
            (None, Some(_)) => ExecutionStatus::CaughtException,
            (None, None) => {
                let mut failures = records
                    .iter()
                    .map(|record| record.status)
                    .filter(|status| *status != ExecutionStatus::Success);
                let decisive = if halt_on_errors {
                    failures.next()
                } else {
                    failures.last()
                };
                decisive.unwrap_or(ExecutionStatus::Success)
            }
        };
        Self {
            started_at,
            stopped_at: Utc::now(),
            status,
            exit_code: status.exit_code(),
            error,
            records,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        let elapsed = self.stopped_at - self.started_at;
        elapsed.num_milliseconds() as f64 / 1000.0
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut payload = serde_json::to_string_pretty(self).context("serialize report")?;
        payload.push('\n');
        fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

const LINE_WIDTH: usize = 68;

/// One status line per record, with dry-run commands listed beneath.
pub fn render_record(record: &DirectiveRecord, dry_run: bool) -> String {
    let label = match &record.identifier {
        Some(identifier) => format!(
            "({identifier}) {} line {}",
            record.file.display(),
            record.lines.first().copied().unwrap_or_default()
        ),
        None => format!("{}", record.file.display()),
    };
    let word = record.status_word();
    let dots = LINE_WIDTH.saturating_sub(label.len() + word.len() + 2).max(3);
    let mut out = format!("{label} {} {word}", ".".repeat(dots));
    if dry_run {
        for command in &record.commands {
            out.push_str("\n    ");
            out.push_str(command);
        }
    }
    if let Some(error) = &record.error {
        out.push_str("\n    ");
        out.push_str(error);
    }
    out
}

pub fn render_summary(report: &ExecutionReport) -> String {
    let mut out = String::new();
    if let Some(error) = &report.error {
        out.push_str(error);
        out.push('\n');
    }
    let verdict = match report.status {
        ExecutionStatus::Success => "success".to_string(),
        ExecutionStatus::ExternalCallFailed => "an external command failed".to_string(),
        ExecutionStatus::CaughtException => "an error stopped the run".to_string(),
        ExecutionStatus::Halted(code) => format!("halted with status {code}"),
    };
    out.push_str(&format!(
        "Total: {:.2} seconds, {} directive(s), {verdict} (exit code {})",
        report.elapsed_secs(),
        report.records.iter().filter(|r| r.identifier.is_some()).count(),
        report.exit_code
    ));
    out
}
