//! Two-phase, execution-based validation of generated code.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::code::CodeBlock;
use crate::agent::sandbox::{ExecutionOutcome, ExecutionSandbox};
use crate::runtime::error::GraphResult;

/// Stack frames mentioning any of these belong to interpreter glue, not to
/// the user's snippet.
pub const BRIDGE_FRAME_MARKERS: &[&str] = &[
    "juliacall",
    "PythonCall",
    "pythoncall",
    "boot.jl",
    "loading.jl",
    "client.jl",
    "Base.MainInclude",
    "include_string",
    "exec_options",
    "_start()",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    /// Import statements run on their own.
    Imports,
    /// Imports followed by the code body.
    Execution,
}

impl ValidationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationPhase::Imports => "imports",
            ValidationPhase::Execution => "execution",
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            ValidationPhase::Imports => "import check",
            ValidationPhase::Execution => "execution check",
        }
    }
}

impl fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one validation call. `phase` is the last phase that ran.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub phase: ValidationPhase,
    pub failed: bool,
    pub message: String,
    pub stacktrace: Option<String>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            phase: ValidationPhase::Execution,
            failed: false,
            message: String::new(),
            stacktrace: None,
        }
    }

    pub fn failure(
        phase: ValidationPhase,
        message: impl Into<String>,
        stacktrace: Option<String>,
    ) -> Self {
        Self {
            phase,
            failed: true,
            message: message.into(),
            stacktrace,
        }
    }

    /// Feedback appended to the conversation after a failed check.
    pub fn error_report(&self) -> String {
        let mut report = format!(
            "Your solution failed the {}:\n{}",
            self.phase.label(),
            self.message
        );
        if let Some(trace) = &self.stacktrace {
            report.push_str("\n\nStacktrace:\n");
            report.push_str(trace);
        }
        report
    }
}

/// Runs a [`CodeBlock`] through an [`ExecutionSandbox`].
#[derive(Clone)]
pub struct Validator {
    sandbox: Arc<dyn ExecutionSandbox>,
    timeout: Duration,
    markers: Vec<String>,
}

impl Validator {
    pub fn new(sandbox: Arc<dyn ExecutionSandbox>, timeout: Duration) -> Self {
        Self {
            sandbox,
            timeout,
            markers: BRIDGE_FRAME_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    /// Import phase first; the execution phase only runs when imports pass.
    ///
    /// Returns `Err` only for fatal I/O failures of the sandbox. Other
    /// sandbox errors count as execution failures.
    pub fn validate(&self, block: &CodeBlock) -> GraphResult<ValidationResult> {
        if block.has_imports() {
            if let Some(failure) = self.run_phase(ValidationPhase::Imports, &block.imports)? {
                return Ok(failure);
            }
        }
        match self.run_phase(ValidationPhase::Execution, &block.combined_source())? {
            Some(failure) => Ok(failure),
            None => Ok(ValidationResult::passed()),
        }
    }

    fn run_phase(
        &self,
        phase: ValidationPhase,
        source: &str,
    ) -> GraphResult<Option<ValidationResult>> {
        debug!(%phase, "running validation phase");
        match self.sandbox.execute(source, self.timeout) {
            Ok(outcome) if outcome.succeeded => Ok(None),
            Ok(outcome) => Ok(Some(self.classify(phase, outcome))),
            Err(err) if err.is_fatal_io() => Err(err),
            Err(err) => {
                warn!(%phase, error = %err, "sandbox failure treated as execution failure");
                Ok(Some(ValidationResult::failure(
                    ValidationPhase::Execution,
                    format!("sandbox failure: {err}"),
                    None,
                )))
            }
        }
    }

    fn classify(&self, phase: ValidationPhase, outcome: ExecutionOutcome) -> ValidationResult {
        let message = outcome
            .error_message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("{} failed without an error message", phase.label()));
        let stacktrace = outcome
            .stacktrace
            .as_deref()
            .and_then(|trace| filter_stacktrace(trace, &self.markers));
        ValidationResult::failure(phase, message, stacktrace)
    }
}

/// Drop stack frames that mention any marker.
///
/// A frame is a `[n] ...` line plus the indented lines that follow it. Lines
/// outside numbered frames are judged one by one. Returns `None` when
/// nothing is left.
pub fn filter_stacktrace<S: AsRef<str>>(trace: &str, markers: &[S]) -> Option<String> {
    let is_noise = |line: &str| markers.iter().any(|m| line.contains(m.as_ref()));

    let mut frames: Vec<Vec<&str>> = Vec::new();
    for line in trace.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let starts_frame = line.trim_start().starts_with('[');
        let continuation = !starts_frame && line.starts_with(char::is_whitespace);
        match frames.last_mut() {
            Some(frame) if continuation => frame.push(line),
            _ => frames.push(vec![line]),
        }
    }

    let kept: Vec<&str> = frames
        .into_iter()
        .filter(|frame| !frame.iter().any(|line| is_noise(line)))
        .flatten()
        .collect();
    (!kept.is_empty()).then(|| kept.join("\n"))
}
