// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use crate::engine::Summary;
use crate::types::{Outcome, OutcomeKind, Target};
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Per-host results with captured output, then a summary
    Normal,
    /// Only hosts that did not succeed, then a summary
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Report one finished host.
    pub fn host(&self, target: &Target, outcome: &Outcome) {
        match self.mode {
            OutputMode::Normal => print!("{}", render_host(target, outcome, true)),
            OutputMode::Quiet => {
                if !outcome.is_success() {
                    print!("{}", render_host(target, outcome, false));
                }
            }
            OutputMode::Json => {
                let event = HostEvent::new(target, outcome);
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print the closing summary for a run.
    pub fn summary(&self, summary: &Summary) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                print!("{}", render_summary(summary, self.elapsed_secs()));
            }
            OutputMode::Json => {
                let event = SummaryEvent {
                    event: "summary",
                    succeeded: summary.succeeded,
                    warned: summary.warned,
                    failed: summary.failed,
                    duration_secs: self.start_time.map(|_| self.elapsed_secs()),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = ErrorEvent {
                    event: "error",
                    message,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

fn render_host(target: &Target, outcome: &Outcome, with_output: bool) -> String {
    let status = match outcome.kind() {
        OutcomeKind::Success => "success".to_string(),
        OutcomeKind::Warning => format!("warning: {outcome}"),
        OutcomeKind::Failure => format!("failure: {outcome}"),
    };
    let mut text = format!("[{}] {}\n", target.id(), status);

    if with_output {
        if let Some(output) = outcome.command_output() {
            push_stream(&mut text, &output.stdout);
            push_stream(&mut text, &output.stderr);
            if output.truncated {
                text.push_str("(output truncated)\n");
            }
        }
    }
    text
}

fn push_stream(text: &mut String, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    text.push_str(&String::from_utf8_lossy(bytes));
    if !text.ends_with('\n') {
        text.push('\n');
    }
}

fn render_summary(summary: &Summary, elapsed: f64) -> String {
    let mut text = String::new();
    for (label, count) in [
        ("success", summary.succeeded),
        ("warning", summary.warned),
        ("failure", summary.failed),
    ] {
        if count > 0 {
            text.push_str(&format!("{label}: {count} {}\n", hosts(count)));
        }
    }
    if elapsed > 0.0 {
        text.push_str(&format!("finished in {:.1}s\n", elapsed));
    }
    text
}

fn hosts(count: usize) -> &'static str {
    if count == 1 { "host" } else { "hosts" }
}

#[derive(Serialize)]
struct HostEvent {
    event: &'static str,
    target: String,
    outcome: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
}

impl HostEvent {
    fn new(target: &Target, outcome: &Outcome) -> Self {
        let output = outcome.command_output();
        Self {
            event: "host",
            target: target.id().to_string(),
            outcome: outcome.label(),
            message: outcome.to_string(),
            exit_code: output.and_then(|o| o.exit_code),
            stdout: output.map(|o| o.stdout_lossy()),
            stderr: output.map(|o| o.stderr_lossy()),
            bytes: match outcome {
                Outcome::Transferred { bytes } => Some(*bytes),
                _ => None,
            },
        }
    }
}

#[derive(Serialize)]
struct SummaryEvent {
    event: &'static str,
    succeeded: usize,
    warned: usize,
    failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct ErrorEvent<'a> {
    event: &'a str,
    message: &'a str,
}
