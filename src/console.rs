//! Terminal output of the command line client.
//!
//! Status lines carry a short tag (`[OK]`, `[ERROR]`, ...); listings print
//! one `label : value` line per field. Colors are only used on a TTY and
//! never when `NO_COLOR` is set.

use chrono::{DateTime, Local};
use std::io::{self, IsTerminal};

/// SGR parameters for each kind of output.
mod sgr {
    pub const INFO: &str = "1;34";
    pub const OK: &str = "1;32";
    pub const ERROR: &str = "1;31";
    pub const HEADING: &str = "1;35";
    pub const HIGHLIGHT: &str = "1;36";
    pub const MUTED: &str = "2;90";
}

/// Width of the label column in record listings.
const LABEL_WIDTH: usize = 10;

/// Status line kinds and their tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Info,
    Ok,
    Error,
}

impl Status {
    fn tag(self) -> (&'static str, &'static str) {
        match self {
            Status::Info => ("INFO", sgr::INFO),
            Status::Ok => ("OK", sgr::OK),
            Status::Error => ("ERROR", sgr::ERROR),
        }
    }
}

#[derive(Debug, Default)]
pub struct Console {
    colors: bool,
}

impl Console {
    /// Colors only when stdout is a terminal and `NO_COLOR` is unset.
    pub fn new() -> Self {
        Self {
            colors: std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal(),
        }
    }

    fn paint(&self, text: &str, sgr: &str) -> String {
        if self.colors {
            format!("\x1b[{}m{}\x1b[0m", sgr, text)
        } else {
            text.to_string()
        }
    }

    fn status_line(&self, status: Status, message: &str) -> String {
        let (tag, sgr) = status.tag();
        format!("[{}] {}", self.paint(tag, sgr), message)
    }

    pub fn info(&self, message: &str) {
        println!("{}", self.status_line(Status::Info, message));
    }

    pub fn success(&self, message: &str) {
        println!("{}", self.status_line(Status::Ok, message));
    }

    /// Error lines go to stderr.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.status_line(Status::Error, message));
    }

    /// Blank line followed by a bold heading.
    pub fn section(&self, heading: &str) {
        println!();
        println!("{}", self.paint(heading, sgr::HEADING));
    }

    pub fn muted(&self, text: &str) -> String {
        self.paint(text, sgr::MUTED)
    }

    fn label(&self, label: &str) -> String {
        self.muted(&format!("{:<width$}", label, width = LABEL_WIDTH))
    }

    /// One field of the current record.
    pub fn field(&self, label: &str, value: &str) {
        println!("{} : {}", self.label(label), value);
    }

    /// Starts a new record with its highlighted id.
    pub fn record(&self, label: &str, id: &str) {
        println!();
        println!(
            "{} : {}",
            self.label(label),
            self.paint(id, sgr::HIGHLIGHT)
        );
    }

    pub fn count(&self, n: usize) -> String {
        self.paint(&n.to_string(), sgr::OK)
    }
}

/// Formats epoch milliseconds as local date and time; out-of-range values
/// are printed raw.
pub fn timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(&Local).format("%c").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// `word`, with an `s` unless `n` is one.
pub fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}
