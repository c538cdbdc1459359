//! Core data model: cells, output bundles, and execution results (§3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type CellId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Python,
    Sql,
}

/// A user-authored code cell. Identity (`id`) is stable across edits;
/// `source` is mutable. Derived attributes (reads/writes/status/outputs)
/// are owned by the kernel, not the cell itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub source: String,
}

impl Cell {
    pub fn new(id: impl Into<CellId>, kind: CellKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            source: source.into(),
        }
    }
}

/// A single rich-output value produced by the MIME converter or the
/// executor's table-shaped SQL result (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub mime_type: String,
    pub data: OutputData,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// `data` is a UTF-8 string for text/image (image already base-64 encoded),
/// otherwise a structured JSON-compatible value (table, chart spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputData {
    Text(String),
    Structured(serde_json::Value),
}

impl Output {
    pub fn text(mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: OutputData::Text(text.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn structured(mime_type: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: OutputData::Structured(value),
            metadata: BTreeMap::new(),
        }
    }

    pub fn plain_text(text: impl Into<String>) -> Self {
        Self::text("text/plain", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Running,
    Success,
    Error,
    Blocked,
}

/// Outcome of running one cell within a cascade (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub cell_id: CellId,
    pub status: Status,
    pub stdout: String,
    pub outputs: Vec<Output>,
    pub error: Option<String>,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    /// True only for the final result in a cascade.
    pub is_last: bool,
}

impl ExecutionResult {
    pub fn blocked(cell_id: impl Into<CellId>, reads: Vec<String>, writes: Vec<String>, is_last: bool) -> Self {
        Self {
            cell_id: cell_id.into(),
            status: Status::Blocked,
            stdout: String::new(),
            outputs: Vec::new(),
            error: Some("upstream dependency failed".to_string()),
            reads,
            writes,
            is_last,
        }
    }
}
