//! Kernel Process (K, §4.5-4.6). Owns the user namespace, the dependency
//! graph, and the cell registry for the lifetime of one subprocess. This
//! module is the in-process state machine; `process` wraps it behind the
//! actual OS subprocess boundary, and `src/bin/notebook_kernel.rs` is the
//! binary that runs this state machine as the child process's main loop.

pub mod process;

use crate::cell::{CellKind, ExecutionResult, Status};
use crate::executor;
use crate::executor::sql::{SqlConnector, SqlxConnector};
use crate::extractor;
use crate::graph::{CycleCheck, DependencyGraph};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

pub type CellId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelRequest {
    Register {
        cell_id: CellId,
        source: String,
        kind: CellKind,
    },
    Execute {
        cell_id: CellId,
        source: String,
        kind: CellKind,
    },
    Deregister {
        cell_id: CellId,
    },
    ConfigureDatabase {
        connection_string: Option<String>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelResponse {
    RegisterResult {
        cell_id: CellId,
        status: String,
        reads: Vec<String>,
        writes: Vec<String>,
        cycle: Option<String>,
        diagnostics: Vec<String>,
    },
    ExecutionResult(ExecutionResult),
    DeregisterResult {
        cell_id: CellId,
    },
    DatabaseConfigured {
        status: String,
        error: Option<String>,
    },
}

/// Long-lived kernel state: `{namespace, graph, registry}` (§4.5).
/// Owned solely by the kernel's single-threaded loop; no internal
/// synchronization needed (§9).
pub struct KernelState {
    namespace: Py<PyDict>,
    graph: DependencyGraph,
    registry: HashMap<CellId, (String, CellKind)>,
    connection_string: Option<String>,
    connector: Option<Box<dyn SqlConnector>>,
}

impl KernelState {
    pub fn new(py: Python<'_>) -> Self {
        Self {
            namespace: PyDict::new(py).unbind(),
            graph: DependencyGraph::new(),
            registry: HashMap::new(),
            connection_string: None,
            connector: None,
        }
    }

    pub async fn handle(&mut self, request: KernelRequest) -> Vec<KernelResponse> {
        match request {
            KernelRequest::Register {
                cell_id,
                source,
                kind,
            } => vec![self.register(&cell_id, &source, kind)],
            KernelRequest::Execute {
                cell_id,
                source,
                kind,
            } => self.execute(&cell_id, &source, kind).await,
            KernelRequest::Deregister { cell_id } => {
                debug!(cell_id = %cell_id, "deregister");
                self.graph.remove_cell(&cell_id);
                self.registry.remove(&cell_id);
                vec![KernelResponse::DeregisterResult { cell_id }]
            }
            KernelRequest::ConfigureDatabase { connection_string } => {
                self.configure_database(connection_string).await
            }
            KernelRequest::Shutdown => Vec::new(),
        }
    }

    fn register(&mut self, cell_id: &str, source: &str, kind: CellKind) -> KernelResponse {
        debug!(cell_id = %cell_id, ?kind, "register");
        let deps = extractor::extract(kind, source);
        match self.graph.would_create_cycle(cell_id, &deps.reads, &deps.writes) {
            CycleCheck::WouldCycle(path) => {
                let cycle = path.join(" -> ");
                warn!(cell_id = %cell_id, cycle = %cycle, "register rejected: would create cycle");
                KernelResponse::RegisterResult {
                    cell_id: cell_id.to_string(),
                    status: "error".to_string(),
                    reads: Vec::new(),
                    writes: Vec::new(),
                    cycle: Some(cycle),
                    diagnostics: Vec::new(),
                }
            }
            CycleCheck::Ok => {
                let diagnostics = self
                    .graph
                    .update_cell(cell_id, deps.reads.clone(), deps.writes.clone());
                self.registry
                    .insert(cell_id.to_string(), (source.to_string(), kind));
                KernelResponse::RegisterResult {
                    cell_id: cell_id.to_string(),
                    status: "ok".to_string(),
                    reads: deps.reads.into_iter().collect(),
                    writes: deps.writes.into_iter().collect(),
                    cycle: None,
                    diagnostics,
                }
            }
        }
    }

    async fn execute(&mut self, cell_id: &str, source: &str, kind: CellKind) -> Vec<KernelResponse> {
        debug!(cell_id = %cell_id, ?kind, "execute");
        let needs_register = match self.registry.get(cell_id) {
            Some((registered_source, _)) => registered_source != source,
            None => true,
        };

        if needs_register {
            match self.register(cell_id, source, kind) {
                KernelResponse::RegisterResult {
                    cycle: Some(cycle), ..
                } => {
                    let result = ExecutionResult {
                        cell_id: cell_id.to_string(),
                        status: Status::Error,
                        stdout: String::new(),
                        outputs: Vec::new(),
                        error: Some(cycle),
                        reads: Vec::new(),
                        writes: Vec::new(),
                        is_last: true,
                    };
                    return vec![KernelResponse::ExecutionResult(result)];
                }
                _ => {}
            }
        }

        let order = self.graph.cascade_order(cell_id);
        let mut tainted: HashSet<CellId> = HashSet::new();
        let mut responses = Vec::with_capacity(order.len());
        let last_index = order.len().saturating_sub(1);

        for (i, current) in order.iter().enumerate() {
            let is_last = i == last_index;
            let upstream_failed = self
                .graph
                .direct_dependencies(current)
                .iter()
                .any(|dep| tainted.contains(dep));

            let (reads, writes) = self.graph.reads_writes(current).unwrap_or_default();

            if upstream_failed {
                tainted.insert(current.clone());
                responses.push(KernelResponse::ExecutionResult(ExecutionResult::blocked(
                    current.clone(),
                    reads,
                    writes,
                    is_last,
                )));
                continue;
            }

            let Some((registered_source, registered_kind)) = self.registry.get(current).cloned()
            else {
                tainted.insert(current.clone());
                responses.push(KernelResponse::ExecutionResult(ExecutionResult::blocked(
                    current.clone(),
                    reads,
                    writes,
                    is_last,
                )));
                continue;
            };

            let (stdout, outputs, error) = self
                .run_one(current, &registered_source, registered_kind, &reads)
                .await;

            let status = if error.is_some() {
                tainted.insert(current.clone());
                Status::Error
            } else {
                Status::Success
            };

            responses.push(KernelResponse::ExecutionResult(ExecutionResult {
                cell_id: current.clone(),
                status,
                stdout,
                outputs,
                error,
                reads,
                writes,
                is_last,
            }));
        }

        responses
    }

    async fn run_one(
        &mut self,
        _cell_id: &str,
        source: &str,
        kind: CellKind,
        reads: &[String],
    ) -> (String, Vec<crate::cell::Output>, Option<String>) {
        match kind {
            CellKind::Python => {
                let namespace = self.namespace.clone();
                Python::with_gil(|py| {
                    let ns = namespace.bind(py);
                    executor::python::execute_python(py, source, ns)
                })
            }
            CellKind::Sql => {
                let namespace_strings = self.snapshot_namespace_strings(reads);
                executor::sql::execute_sql(
                    source,
                    self.connection_string.as_deref(),
                    self.connector.as_deref(),
                    &namespace_strings,
                )
                .await
            }
        }
    }

    fn snapshot_namespace_strings(&self, names: &[String]) -> HashMap<String, String> {
        Python::with_gil(|py| {
            let ns = self.namespace.bind(py);
            let mut out = HashMap::new();
            for name in names {
                if let Ok(Some(value)) = ns.get_item(name) {
                    if let Ok(text) = value.str() {
                        out.insert(name.clone(), text.to_string());
                    }
                }
            }
            out
        })
    }

    async fn configure_database(&mut self, connection_string: Option<String>) -> Vec<KernelResponse> {
        match &connection_string {
            Some(conn) => match SqlxConnector::connect(conn).await {
                Ok(connector) => {
                    self.connector = Some(Box::new(connector));
                    self.connection_string = connection_string;
                    vec![KernelResponse::DatabaseConfigured {
                        status: "ok".to_string(),
                        error: None,
                    }]
                }
                Err(e) => vec![KernelResponse::DatabaseConfigured {
                    status: "error".to_string(),
                    error: Some(e),
                }],
            },
            None => {
                self.connector = None;
                self.connection_string = None;
                vec![KernelResponse::DatabaseConfigured {
                    status: "ok".to_string(),
                    error: None,
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_execute_simple_chain() {
        pyo3::prepare_freethreaded_python();
        let mut state = Python::with_gil(KernelState::new);

        state
            .handle(KernelRequest::Register {
                cell_id: "a".to_string(),
                source: "x = 10".to_string(),
                kind: CellKind::Python,
            })
            .await;
        state
            .handle(KernelRequest::Register {
                cell_id: "b".to_string(),
                source: "y = x * 2".to_string(),
                kind: CellKind::Python,
            })
            .await;

        let responses = state
            .handle(KernelRequest::Execute {
                cell_id: "a".to_string(),
                source: "x = 10".to_string(),
                kind: CellKind::Python,
            })
            .await;

        assert_eq!(responses.len(), 2);
        let KernelResponse::ExecutionResult(last) = responses.last().unwrap() else {
            panic!("expected execution result");
        };
        assert!(last.is_last);
        assert_eq!(last.cell_id, "b");
        assert_eq!(last.status, Status::Success);
    }

    #[tokio::test]
    async fn cycle_rejected_on_register() {
        pyo3::prepare_freethreaded_python();
        let mut state = Python::with_gil(KernelState::new);

        state
            .handle(KernelRequest::Register {
                cell_id: "a".to_string(),
                source: "x = y".to_string(),
                kind: CellKind::Python,
            })
            .await;

        let responses = state
            .handle(KernelRequest::Register {
                cell_id: "b".to_string(),
                source: "y = x".to_string(),
                kind: CellKind::Python,
            })
            .await;

        let KernelResponse::RegisterResult { status, cycle, .. } = &responses[0] else {
            panic!("expected register result");
        };
        assert_eq!(status, "error");
        assert!(cycle.is_some());
    }

    #[tokio::test]
    async fn failure_blocks_dependent() {
        pyo3::prepare_freethreaded_python();
        let mut state = Python::with_gil(KernelState::new);

        state
            .handle(KernelRequest::Register {
                cell_id: "a".to_string(),
                source: "x = 1 / 0".to_string(),
                kind: CellKind::Python,
            })
            .await;
        state
            .handle(KernelRequest::Register {
                cell_id: "b".to_string(),
                source: "y = x + 1".to_string(),
                kind: CellKind::Python,
            })
            .await;

        let responses = state
            .handle(KernelRequest::Execute {
                cell_id: "a".to_string(),
                source: "x = 1 / 0".to_string(),
                kind: CellKind::Python,
            })
            .await;

        assert_eq!(responses.len(), 2);
        let KernelResponse::ExecutionResult(b_result) = &responses[1] else {
            panic!("expected execution result");
        };
        assert_eq!(b_result.status, Status::Blocked);
        assert_eq!(b_result.error.as_deref(), Some("upstream dependency failed"));
    }
}
