//! Crate-wide error type for structural failures (kernel plumbing, adapter
//! I/O, channel loss). User code errors never surface here — they travel as
//! data on `ExecutionResult`/events (see `cell` and `orchestrator::events`).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookError {
    pub kind: ErrorKind,
    pub message: String,
    pub help: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// A register would introduce a cycle in the dependency graph.
    Cycle,
    /// Syntax error surfaced outside the normal cell-execution path (e.g.
    /// extractor-adjacent plumbing); ordinary syntax errors from running a
    /// cell are carried in `ExecutionResult::error`, not this type.
    Syntax,
    /// Runtime error surfaced outside the normal cell-execution path.
    Runtime,
    /// Storage/subscription adapter failure.
    Adapter,
    /// The kernel's output channel closed unexpectedly.
    KernelDied,
    /// I/O error (process spawn, channel read/write).
    Io,
    /// JSON encode/decode failure on the kernel wire protocol.
    Conversion,
}

impl NotebookError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn cycle(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle, path)
    }

    pub fn kernel_died() -> Self {
        Self::new(ErrorKind::KernelDied, "kernel lost").with_help(
            "the kernel process exited or its output channel closed; the notebook's orchestrator has torn down and must be resubscribed to restart it",
        )
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Adapter, message)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ErrorKind::Cycle => "Cycle",
            ErrorKind::Syntax => "Syntax",
            ErrorKind::Runtime => "Runtime",
            ErrorKind::Adapter => "Adapter",
            ErrorKind::KernelDied => "KernelDied",
            ErrorKind::Io => "Io",
            ErrorKind::Conversion => "Conversion",
        }
    }
}

impl fmt::Display for NotebookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind_name(), self.message)?;
        if let Some(help) = &self.help {
            write!(f, " (help: {help})")?;
        }
        Ok(())
    }
}

impl std::error::Error for NotebookError {}

impl From<anyhow::Error> for NotebookError {
    fn from(err: anyhow::Error) -> Self {
        NotebookError::new(ErrorKind::Runtime, err.to_string())
    }
}

impl From<std::io::Error> for NotebookError {
    fn from(err: std::io::Error) -> Self {
        NotebookError::new(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_json::Error> for NotebookError {
    fn from(err: serde_json::Error) -> Self {
        NotebookError::new(ErrorKind::Conversion, format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_help() {
        let err = NotebookError::kernel_died();
        let formatted = err.to_string();
        assert!(formatted.contains("KernelDied"));
        assert!(formatted.contains("help:"));
    }

    #[test]
    fn cycle_carries_path() {
        let err = NotebookError::cycle("b -> a -> b");
        assert_eq!(err.kind, ErrorKind::Cycle);
        assert!(err.message.contains("b -> a -> b"));
    }
}
