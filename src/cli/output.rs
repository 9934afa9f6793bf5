use crate::cli::args::RevealOutput;
use owo_colors::OwoColorize;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    /// Text the server wrote to its stderr.
    Server,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Server => "Server",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

struct SinkState {
    entries: Vec<LogEntry>,
    revealed: bool,
    policy: RevealOutput,
    color: bool,
    terminal: Box<dyn Write + Send>,
}

impl SinkState {
    fn print(&mut self, entry: &LogEntry, channel: &str) {
        let tag = format!("[{channel} {}]", entry.level);
        let line = if self.color {
            match entry.level {
                LogLevel::Error => format!("{} {}", tag.red().bold(), entry.message),
                LogLevel::Warn => format!("{} {}", tag.yellow(), entry.message),
                LogLevel::Info => format!("{} {}", tag.green(), entry.message),
                LogLevel::Server => format!("{} {}", tag.dimmed(), entry.message),
            }
        } else {
            format!("{tag} {}", entry.message)
        };
        let _ = writeln!(self.terminal, "{line}");
    }
}

/// The named, append-only output channel every lifecycle event goes through.
///
/// Entries are always recorded. They reach the terminal only once the channel
/// is revealed, either up front (developer flag, `--reveal-output always`) or
/// on the first error entry under [`RevealOutput::Error`]. Revealing replays
/// everything recorded so far, so nothing is lost.
#[derive(Clone)]
pub struct LogSink {
    name: Arc<str>,
    state: Arc<Mutex<SinkState>>,
}

impl LogSink {
    /// Sink printing to stderr, colored when the terminal supports it.
    pub fn stderr(name: &str, policy: RevealOutput) -> Self {
        let color = supports_color::on(supports_color::Stream::Stderr).is_some();
        Self::with_terminal(name, policy, color, Box::new(std::io::stderr()))
    }

    /// Sink whose terminal output is discarded; entries are still recorded.
    pub fn detached(name: &str, policy: RevealOutput) -> Self {
        Self::with_terminal(name, policy, false, Box::new(std::io::sink()))
    }

    pub fn with_terminal(
        name: &str,
        policy: RevealOutput,
        color: bool,
        terminal: Box<dyn Write + Send>,
    ) -> Self {
        let state = SinkState {
            entries: Vec::new(),
            revealed: policy == RevealOutput::Always,
            policy,
            color,
            terminal,
        };
        Self { name: Arc::from(name), state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(LogLevel::Error, message.into());
    }

    pub fn server(&self, message: impl Into<String>) {
        self.append(LogLevel::Server, message.into());
    }

    pub fn append(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => tracing::error!(channel = %self.name, "{message}"),
            LogLevel::Warn => tracing::warn!(channel = %self.name, "{message}"),
            LogLevel::Info => tracing::info!(channel = %self.name, "{message}"),
            LogLevel::Server => tracing::debug!(channel = %self.name, "{message}"),
        }

        let entry = LogEntry { level, message };
        let mut state = self.lock();
        state.entries.push(entry.clone());

        if state.revealed {
            state.print(&entry, &self.name);
        } else if level == LogLevel::Error && state.policy == RevealOutput::Error {
            drop(state);
            self.reveal();
        }
    }

    /// Make the channel visible, replaying what was recorded while hidden.
    pub fn reveal(&self) {
        let mut state = self.lock();
        if state.revealed || state.policy == RevealOutput::Never {
            return;
        }
        state.revealed = true;
        let backlog = state.entries.clone();
        for entry in &backlog {
            state.print(entry, &self.name);
        }
    }

    pub fn is_revealed(&self) -> bool {
        self.lock().revealed
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lock().entries.iter().filter(|e| e.level == level).count()
    }
}
