//! Failure advisor: decides when a finished command deserves help, asks the
//! advisor for a fix and offers to run it in the live shell.

use std::io;

use crate::config::Config;
use crate::marker::Marker;
use crate::query::{Advisor, Suggestion};
use crate::spinner::SpinnerGuard;

/// Exit status a shell reports after Ctrl-C.
pub const INTERRUPTED_EXIT_CODE: i64 = 130;
/// Characters of recent output included in a query.
pub const RECENT_OUTPUT_CHARS: usize = 2048;

pub const AUTO_RUN_PROMPT: &str = "Run suggested command? [y/N] (Esc rejects): ";

const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub fn qualifies(exit_code: i64, command: &str) -> bool {
    exit_code != 0 && exit_code != INTERRUPTED_EXIT_CODE && !command.trim().is_empty()
}

pub fn accepts(byte: u8) -> bool {
    byte == b'y' || byte == b'Y'
}

pub fn build_query(command: &str, recent_output: &str) -> String {
    let mut query = format!("fix this command: {}", command.trim());
    if !recent_output.trim().is_empty() {
        query.push_str("\n\nTerminal output:\n");
        query.push_str(recent_output);
    }
    query
}

pub fn query_words(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_string).collect()
}

/// The real terminal as seen while advising: output to the user, single
/// bytes from the user, and bytes injected into the child shell.
pub trait PromptTerminal {
    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// `Ok(None)` on end-of-stream.
    fn read_input_byte(&mut self) -> io::Result<Option<u8>>;
    fn inject(&mut self, bytes: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceOutcome {
    NotQualified,
    /// The advisor failed; the error was shown inline.
    Failed,
    /// Shown, with auto-run disabled by configuration.
    Suggested,
    Declined,
    Injected,
}

pub fn render_suggestion(suggestion: &Suggestion, show_explanation: bool) -> String {
    let mut out = format!(
        "\r\n{BOLD}tutr suggests:{RESET}\r\n  {}\r\n",
        suggestion.command
    );
    if show_explanation {
        if !suggestion.explanation.is_empty() {
            out.push_str(&format!("  {DIM}{}{RESET}\r\n", suggestion.explanation));
        }
        if let Some(source) = &suggestion.source {
            out.push_str(&format!("  {DIM}source: {source}{RESET}\r\n"));
        }
    }
    out
}

pub fn render_error(err: &anyhow::Error) -> String {
    let message = format!("{err:#}").replace('\n', "\r\n");
    format!("\r\n{RED}tutr error: {message}{RESET}\r\n")
}

/// Show the prompt and read one byte. Only `y`/`Y` injects `command` followed
/// by a newline; anything else, end-of-stream included, declines.
pub fn prompt_auto_run(term: &mut impl PromptTerminal, command: &str) -> io::Result<bool> {
    term.write_output(AUTO_RUN_PROMPT.as_bytes())?;
    let answer = term.read_input_byte()?;
    if answer.is_some_and(accepts) {
        term.write_output(b"y\r\n")?;
        let mut line = command.as_bytes().to_vec();
        line.push(b'\n');
        term.inject(&line)?;
        Ok(true)
    } else {
        term.write_output(b"\r\n")?;
        Ok(false)
    }
}

pub struct FailureAdvisor<A: Advisor> {
    advisor: A,
    config: Config,
    spinner: bool,
}

impl<A: Advisor> FailureAdvisor<A> {
    pub fn new(advisor: A, config: Config) -> Self {
        Self {
            advisor,
            config,
            spinner: true,
        }
    }

    pub fn without_spinner(mut self) -> Self {
        self.spinner = false;
        self
    }

    pub fn advisor(&self) -> &A {
        &self.advisor
    }

    /// Handle one marker. Advisor errors are rendered and swallowed; only
    /// terminal I/O errors are returned.
    pub fn handle_marker(
        &mut self,
        marker: &Marker,
        recent_output: &str,
        term: &mut impl PromptTerminal,
    ) -> io::Result<AdviceOutcome> {
        if !qualifies(marker.exit_code, &marker.command) {
            return Ok(AdviceOutcome::NotQualified);
        }
        tracing::debug!(
            "advising on `{}` (exit {})",
            marker.command,
            marker.exit_code
        );

        let words = query_words(&build_query(&marker.command, recent_output));
        let result = {
            let _spinner = self.spinner.then(SpinnerGuard::new);
            self.advisor.advise(&words, &self.config)
        };

        let suggestion = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("advisor failed: {e:#}");
                term.write_output(render_error(&e).as_bytes())?;
                return Ok(AdviceOutcome::Failed);
            }
        };

        term.write_output(
            render_suggestion(&suggestion, self.config.display.show_explanation).as_bytes(),
        )?;

        if self.config.execution.no_execute {
            return Ok(AdviceOutcome::Suggested);
        }
        if prompt_auto_run(term, &suggestion.command)? {
            Ok(AdviceOutcome::Injected)
        } else {
            Ok(AdviceOutcome::Declined)
        }
    }
}
