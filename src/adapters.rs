//! External interface shapes (§6). Concrete transport, wire format, file
//! layout, and CLI are out of scope (§1) — only the storage boundary a
//! gateway implementation would plug into is specified here. The request
//! shapes of §6 (`subscribe`, `edit_cell`, `run_cell`, ...) are the public
//! methods on `orchestrator::Orchestrator` directly; a gateway calls those.

use crate::cell::CellKind;
use crate::error::NotebookError;
use async_trait::async_trait;

pub type CellTuple = (String, CellKind, String);

/// A notebook's durable state: its display name, optional database
/// connection string, and ordered cell list.
#[derive(Debug, Clone, Default)]
pub struct NotebookSnapshot {
    pub name: String,
    pub database_connection: Option<String>,
    pub cells: Vec<CellTuple>,
}

/// Consumed by the orchestrator. Contract: durable, atomic per-notebook
/// write; cell ordering preserved.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn load(&self, notebook_id: &str) -> Result<NotebookSnapshot, NotebookError>;
    async fn save(&self, notebook_id: &str, snapshot: &NotebookSnapshot) -> Result<(), NotebookError>;
}
