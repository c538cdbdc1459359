//! Subscription adapter events (§6). Each event is associated with a
//! notebook and broadcast to all current subscribers of that notebook.

use crate::cell::{CellKind, Output, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotebookEvent {
    CellRegistered {
        cell_id: String,
        reads: Vec<String>,
        writes: Vec<String>,
        status: RegisterStatus,
        error: Option<String>,
        diagnostics: Vec<String>,
    },
    CellStatus {
        cell_id: String,
        status: Status,
    },
    CellStdout {
        cell_id: String,
        data: String,
    },
    CellOutput {
        cell_id: String,
        output: Output,
    },
    CellError {
        cell_id: String,
        error: String,
    },
    CellCreated {
        cell_id: String,
        kind: CellKind,
        source: String,
        index: usize,
    },
    CellDeleted {
        cell_id: String,
    },
    DatabaseConfigured {
        status: String,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterStatus {
    Ok,
    Blocked,
}
