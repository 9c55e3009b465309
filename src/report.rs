//! Event reporting for the download workflow.
//!
//! The workflow never talks to a log sink directly: it emits events through
//! a [`Reporter`]. The binary uses [`TracingReporter`], which forwards to
//! `tracing`; tests use [`MemoryReporter`] and inspect what was reported.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use tracing::Level;

/// Structured context attached to a reported event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    /// POP3 message number.
    pub message: Option<u32>,
    /// Attachment filename.
    pub filename: Option<String>,
    /// Path on disk.
    pub path: Option<PathBuf>,
    /// Rendered error.
    pub error: Option<String>,
}

impl LogContext {
    /// Context for one message.
    pub fn message(number: u32) -> Self {
        Self {
            message: Some(number),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    pub fn with_error(mut self, error: &dyn std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Sink for workflow events.
pub trait Reporter {
    fn log(&self, level: Level, message: &str, context: &LogContext);
}

/// Forwards events to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

macro_rules! emit {
    ($level:expr, $message:expr, $ctx:expr, $path:expr) => {
        tracing::event!(
            $level,
            msg = $ctx.message,
            filename = $ctx.filename.as_deref(),
            path = $path,
            error = $ctx.error.as_deref(),
            "{}",
            $message
        )
    };
}

impl Reporter for TracingReporter {
    fn log(&self, level: Level, message: &str, context: &LogContext) {
        let path = context.path.as_ref().map(|p| p.display().to_string());
        let path = path.as_deref();
        if level == Level::ERROR {
            emit!(Level::ERROR, message, context, path);
        } else if level == Level::WARN {
            emit!(Level::WARN, message, context, path);
        } else if level == Level::INFO {
            emit!(Level::INFO, message, context, path);
        } else if level == Level::DEBUG {
            emit!(Level::DEBUG, message, context, path);
        } else {
            emit!(Level::TRACE, message, context, path);
        }
    }
}

/// One event captured by [`MemoryReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub context: LogContext,
}

/// Keeps every reported event in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: RefCell<Vec<LogEntry>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Events at exactly `level`.
    pub fn at_level(&self, level: Level) -> Vec<LogEntry> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    /// `true` if any event at `level` has a message containing `needle`
    /// (case-insensitive).
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.entries
            .borrow()
            .iter()
            .any(|e| e.level == level && e.message.to_lowercase().contains(&needle))
    }
}

impl Reporter for MemoryReporter {
    fn log(&self, level: Level, message: &str, context: &LogContext) {
        self.entries.borrow_mut().push(LogEntry {
            level,
            message: message.to_string(),
            context: context.clone(),
        });
    }
}
