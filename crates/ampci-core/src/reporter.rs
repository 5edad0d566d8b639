//! Human-readable console progress for CI logs.
//!
//! CI logs are read by people scrolling a web page, so progress lines are
//! short, prefixed with the name of the check that emitted them and
//! colorized when the output is a terminal. Structured events go through
//! `tracing` separately; this is only the human-facing channel.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::timer::format_elapsed;

/// ANSI styles used in console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Bold,
    Cyan,
    Green,
    Red,
    Yellow,
    BoldYellow,
    BoldRed,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Bold => "1",
            Style::Cyan => "36",
            Style::Green => "32",
            Style::Red => "31",
            Style::Yellow => "33",
            Style::BoldYellow => "1;33",
            Style::BoldRed => "1;31",
        }
    }
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Prefixed console writer shared by everything that reports progress.
///
/// Cloning is cheap; clones write to the same sink.
#[derive(Clone)]
pub struct Reporter {
    prefix: String,
    color: bool,
    sink: Sink,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("prefix", &self.prefix)
            .field("color", &self.color)
            .finish()
    }
}

impl Reporter {
    /// Report to stdout, with color when stdout is a terminal.
    pub fn stdout(prefix: impl Into<String>) -> Self {
        let color = io::stdout().is_terminal();
        Self::with_sink(prefix, io::stdout(), color)
    }

    /// Report to an arbitrary writer.
    pub fn with_sink(prefix: impl Into<String>, sink: impl Write + Send + 'static, color: bool) -> Self {
        Self {
            prefix: prefix.into(),
            color,
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Same sink, different prefix.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            color: self.color,
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Apply a style if color output is enabled.
    pub fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", style.code(), text)
        } else {
            text.to_string()
        }
    }

    pub fn cyan(&self, text: &str) -> String {
        self.paint(text, Style::Cyan)
    }

    pub fn green(&self, text: &str) -> String {
        self.paint(text, Style::Green)
    }

    pub fn red(&self, text: &str) -> String {
        self.paint(text, Style::Red)
    }

    /// Write one prefixed line.
    pub fn info(&self, message: &str) {
        let prefix = self.paint(&self.prefix, Style::BoldYellow);
        self.write_line(&format!("{prefix} {message}"));
    }

    /// A blank line followed by a prefixed line, used to open a new section.
    pub fn section(&self, message: &str) {
        self.write_line("");
        self.info(message);
    }

    /// `<prefix> Running <label>...`
    pub fn starting(&self, label: &str) {
        self.section(&format!("Running {}...", self.cyan(label)));
    }

    /// `<prefix> Done running <label> Total time: <m>m <s>s`
    pub fn done(&self, label: &str, elapsed: Duration) {
        self.info(&format!(
            "Done running {} Total time: {}",
            self.cyan(label),
            self.green(&format_elapsed(elapsed))
        ));
    }

    /// Red diagnostic naming the phase that failed.
    pub fn failure(&self, phase: &str, error: &dyn std::fmt::Display) {
        let prefix = self.paint(&self.prefix, Style::BoldYellow);
        let label = self.paint("ERROR:", Style::BoldRed);
        let message = self.red(&format!("{phase} failed: {error}"));
        self.write_line(&format!("{prefix} {label} {message}"));
    }

    fn write_line(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(sink, "{line}").ok();
        sink.flush().ok();
    }
}
