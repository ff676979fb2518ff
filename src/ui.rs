// src/ui.rs

//! Operator interaction and report formatting

use crate::error::Result;
use crate::request::RecoverMode;
use crate::transaction::{StepKind, TransactionPlan};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Source of yes/no answers
///
/// A closed input is never an answer: it must be reported as `false`.
pub trait Confirm {
    fn confirm(&self, question: &str) -> Result<bool>;

    /// Pick how to resolve a leftover journal; `None` means abort
    fn choose_recovery(&self, journal: &Path) -> Result<Option<RecoverMode>>;
}

impl<T: Confirm + ?Sized> Confirm for &T {
    fn confirm(&self, question: &str) -> Result<bool> {
        (**self).confirm(question)
    }

    fn choose_recovery(&self, journal: &Path) -> Result<Option<RecoverMode>> {
        (**self).choose_recovery(journal)
    }
}

/// How long a prompt waits for an answer before giving up
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Interactive prompt on stdin/stdout
///
/// No answer within `timeout` counts like a closed input.
#[derive(Debug)]
pub struct TerminalPrompt {
    pub timeout: Duration,
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self {
            timeout: PROMPT_TIMEOUT,
        }
    }
}

impl TerminalPrompt {
    fn read_answer(&self, prompt: &str) -> Result<Option<String>> {
        print!("{}", prompt);
        io::stdout().flush()?;

        let answer = answer_within(self.timeout, || {
            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            Ok((read > 0).then_some(line))
        })?;
        match answer {
            Some(line) => Ok(Some(line.trim().to_lowercase())),
            None => {
                println!();
                Ok(None)
            }
        }
    }
}

/// Run a blocking read on its own thread, waiting at most `timeout`
///
/// A reader still blocked after the timeout is left behind; `None` covers
/// both a timeout and end of input.
fn answer_within<F>(timeout: Duration, read: F) -> Result<Option<String>>
where
    F: FnOnce() -> io::Result<Option<String>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read());
    });
    match rx.recv_timeout(timeout) {
        Ok(answer) => Ok(answer?),
        Err(RecvTimeoutError::Timeout) => {
            warn!("no answer after {}s, aborting", timeout.as_secs());
            Ok(None)
        }
        Err(RecvTimeoutError::Disconnected) => Ok(None),
    }
}

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        match self.read_answer(&format!(":: {} [Y/n] ", question))? {
            None => Ok(false),
            Some(answer) => Ok(answer.is_empty() || answer == "y" || answer == "yes"),
        }
    }

    fn choose_recovery(&self, journal: &Path) -> Result<Option<RecoverMode>> {
        println!(":: an interrupted transaction was found ({})", journal.display());
        let answer = self.read_answer(":: [r]esume, roll [b]ack or [a]bort? ")?;
        Ok(match answer.as_deref() {
            Some("r") | Some("resume") => Some(RecoverMode::Resume),
            Some("b") | Some("rollback") => Some(RecoverMode::Rollback),
            _ => None,
        })
    }
}

/// `--noconfirm`: every question is answered yes; recovery still needs an
/// explicit `--recover`
#[derive(Debug, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(true)
    }

    fn choose_recovery(&self, _journal: &Path) -> Result<Option<RecoverMode>> {
        Ok(None)
    }
}

/// Human readable size, pacman style
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn format_size_delta(delta: i64) -> String {
    if delta < 0 {
        format!("-{}", format_size(delta.unsigned_abs()))
    } else {
        format_size(delta as u64)
    }
}

/// The confirmation report of a plan
pub fn render_plan(plan: &TransactionPlan) -> String {
    let mut out = String::new();

    let removals: Vec<String> = plan.removals().map(|s| s.record.display_name()).collect();
    if !removals.is_empty() {
        out.push_str(&format!("Packages to remove ({}): {}\n", removals.len(), removals.join("  ")));
    }

    let installs: Vec<String> = plan
        .installs()
        .map(|s| match (&s.kind, &s.previous) {
            (StepKind::Upgrade, Some(previous)) if previous.version != s.record.version => {
                format!("{}-{} -> {}", s.record.name, previous.version, s.record.version)
            }
            _ => s.record.display_name(),
        })
        .collect();
    if !installs.is_empty() {
        out.push_str(&format!("Packages ({}): {}\n", installs.len(), installs.join("  ")));
    }

    if plan.download_size > 0 {
        out.push_str(&format!("Total Download Size:  {}\n", format_size(plan.download_size)));
    }
    out.push_str(&format!(
        "Net Upgrade Size:     {}\n",
        format_size_delta(plan.install_size_delta)
    ));

    for conflict in &plan.overwrites {
        out.push_str(&format!("Overwriting: {}\n", conflict));
    }

    out
}
