//! The parent-process side of the kernel boundary: spawns the
//! `notebook-kernel` binary as a genuine OS subprocess and speaks
//! newline-delimited JSON over its stdin/stdout (§4.5, §6 "Kernel IPC").
//! A closed output channel is unrecoverable kernel death (§7.5); this type
//! only detects that condition, the orchestrator decides what to do about it.

use super::{KernelRequest, KernelResponse};
use crate::error::NotebookError;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{error, info};

pub struct KernelHandle {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
}

impl KernelHandle {
    /// Spawns the kernel worker binary. `kernel_binary` defaults to the
    /// current executable (the worker is a `[[bin]]` target in the same
    /// crate, see `bin/notebook_kernel.rs`) unless overridden by
    /// `KernelConfig::kernel_binary_override`.
    pub async fn spawn(kernel_binary: &std::path::Path) -> Result<Self, NotebookError> {
        let mut child = Command::new(kernel_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NotebookError::adapter("kernel subprocess has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NotebookError::adapter("kernel subprocess has no stdout"))?;

        info!("kernel subprocess spawned");
        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        })
    }

    /// Sends one request line. The kernel's single input channel is
    /// ordered, so callers must serialize their own access (the
    /// orchestrator's per-notebook lock already guarantees this, §5).
    pub async fn send(&self, request: &KernelRequest) -> Result<(), NotebookError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(NotebookError::from)
    }

    /// Reads one response line. Returns `Ok(None)` on a closed channel —
    /// the caller (orchestrator) treats that as kernel death.
    pub async fn recv(&self) -> Result<Option<KernelResponse>, NotebookError> {
        let mut stdout = self.stdout.lock().await;
        let mut line = String::new();
        let bytes_read = stdout.read_line(&mut line).await?;
        if bytes_read == 0 {
            error!("kernel output channel closed");
            return Ok(None);
        }
        let response = serde_json::from_str(line.trim_end())?;
        Ok(Some(response))
    }

    pub async fn shutdown(&self) {
        let _ = self.send(&KernelRequest::Shutdown).await;
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}
