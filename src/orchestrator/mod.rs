//! Orchestrator (O, §4.7, §5). One instance per live notebook subscription:
//! owns the kernel lifecycle, mediates edits and runs, enforces
//! per-notebook serialization of mutations, persists cell source, and fans
//! out results to subscribers. Grounded on the broadcast-fanout and
//! lock-across-cascade pattern in `venus-server`'s `NotebookSession`,
//! replumbed onto this spec's kernel-as-subprocess design.

pub mod events;

use crate::adapters::{NotebookSnapshot, StorageAdapter};
use crate::cell::{CellKind, Status};
use crate::config::{KernelConfig, OrchestratorConfig};
use crate::error::NotebookError;
use crate::kernel::process::KernelHandle;
use crate::kernel::{KernelRequest, KernelResponse};
use events::{NotebookEvent, RegisterStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct CellEntry {
    id: String,
    kind: CellKind,
    source: String,
}

/// Per-notebook orchestrator. Everything behind `state` is mutated only
/// while `lock` is held (§5 "Shared-resource policy").
pub struct Orchestrator {
    notebook_id: String,
    lock: Mutex<()>,
    state: Mutex<OrchestratorState>,
    tx: broadcast::Sender<NotebookEvent>,
    subscriber_count: AtomicUsize,
    storage: Arc<dyn StorageAdapter>,
    kernel_config: KernelConfig,
}

struct OrchestratorState {
    cells: Vec<CellEntry>,
    database_connection: Option<String>,
    kernel: Option<KernelHandle>,
}

impl Orchestrator {
    pub fn new(notebook_id: impl Into<String>, storage: Arc<dyn StorageAdapter>, config: OrchestratorConfig) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            notebook_id: notebook_id.into(),
            lock: Mutex::new(()),
            state: Mutex::new(OrchestratorState {
                cells: Vec::new(),
                database_connection: None,
                kernel: None,
            }),
            tx,
            subscriber_count: AtomicUsize::new(0),
            storage,
            kernel_config: config.kernel,
        })
    }

    /// Spawns the kernel on first subscription and loads the notebook.
    #[instrument(skip(self), fields(notebook_id = %self.notebook_id))]
    pub async fn subscribe(self: &Arc<Self>) -> Result<broadcast::Receiver<NotebookEvent>, NotebookError> {
        let receiver = self.tx.subscribe();
        if self.subscriber_count.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("first subscriber: spawning kernel");
            self.spawn_kernel_and_load().await?;
        }
        Ok(receiver)
    }

    /// Shuts down the kernel on last unsubscribe.
    #[instrument(skip(self), fields(notebook_id = %self.notebook_id))]
    pub async fn unsubscribe(self: &Arc<Self>) {
        if self.subscriber_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("last subscriber left: shutting down kernel");
            let _guard = self.lock.lock().await;
            let mut state = self.state.lock().await;
            if let Some(kernel) = state.kernel.take() {
                kernel.shutdown().await;
            }
        }
    }

    async fn spawn_kernel_and_load(self: &Arc<Self>) -> Result<(), NotebookError> {
        let _guard = self.lock.lock().await;

        let binary = self.kernel_config.kernel_binary()?;
        let kernel = KernelHandle::spawn(&binary).await?;

        let snapshot = self.storage.load(&self.notebook_id).await?;

        {
            let mut state = self.state.lock().await;
            state.kernel = Some(kernel);
            state.database_connection = snapshot.database_connection.clone();
            state.cells = snapshot
                .cells
                .iter()
                .map(|(id, kind, source)| CellEntry {
                    id: id.clone(),
                    kind: *kind,
                    source: source.clone(),
                })
                .collect();
        }

        if let Some(connection) = snapshot.database_connection {
            self.send_and_drain(KernelRequest::ConfigureDatabase {
                connection_string: Some(connection),
            })
            .await?;
        }

        for (id, kind, source) in &snapshot.cells {
            self.send_and_drain(KernelRequest::Register {
                cell_id: id.clone(),
                source: source.clone(),
                kind: *kind,
            })
            .await?;
        }

        Ok(())
    }

    /// On a code-change request: update in-memory source, persist, register
    /// with the kernel, and fan out the result (§4.7 "Edit handling").
    #[instrument(skip(self, new_source), fields(notebook_id = %self.notebook_id))]
    pub async fn edit_cell(self: &Arc<Self>, cell_id: &str, new_source: &str) -> Result<(), NotebookError> {
        let _guard = self.lock.lock().await;

        let kind = {
            let mut state = self.state.lock().await;
            let Some(entry) = state.cells.iter_mut().find(|c| c.id == cell_id) else {
                return Err(NotebookError::adapter(format!("unknown cell {cell_id}")));
            };
            entry.source = new_source.to_string();
            entry.kind
        };

        self.persist().await?;

        let responses = self
            .send_and_drain(KernelRequest::Register {
                cell_id: cell_id.to_string(),
                source: new_source.to_string(),
                kind,
            })
            .await?;

        for response in responses {
            self.emit_register_result(response);
        }

        Ok(())
    }

    /// Explicit CRUD: adds a brand-new cell, persists, and registers it.
    #[instrument(skip(self, source), fields(notebook_id = %self.notebook_id))]
    pub async fn register_cell(self: &Arc<Self>, cell_id: &str, source: &str, kind: CellKind) -> Result<(), NotebookError> {
        let _guard = self.lock.lock().await;

        let created = {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.cells.iter_mut().find(|c| c.id == cell_id) {
                entry.kind = kind;
                entry.source = source.to_string();
                None
            } else {
                state.cells.push(CellEntry {
                    id: cell_id.to_string(),
                    kind,
                    source: source.to_string(),
                });
                Some(state.cells.len() - 1)
            }
        };

        self.persist().await?;

        if let Some(index) = created {
            self.emit(NotebookEvent::CellCreated {
                cell_id: cell_id.to_string(),
                kind,
                source: source.to_string(),
                index,
            });
        }

        let responses = self
            .send_and_drain(KernelRequest::Register {
                cell_id: cell_id.to_string(),
                source: source.to_string(),
                kind,
            })
            .await?;

        for response in responses {
            self.emit_register_result(response);
        }

        Ok(())
    }

    /// Turns a kernel `RegisterResult` into a `cell_registered` event
    /// (shared by `edit_cell` and `register_cell`, §6).
    fn emit_register_result(&self, response: KernelResponse) {
        if let KernelResponse::RegisterResult {
            cell_id,
            status,
            reads,
            writes,
            cycle,
            diagnostics,
        } = response
        {
            let register_status = if status == "ok" {
                RegisterStatus::Ok
            } else {
                RegisterStatus::Blocked
            };
            self.emit(NotebookEvent::CellRegistered {
                cell_id,
                reads,
                writes,
                status: register_status,
                error: cycle,
                diagnostics,
            });
        }
    }

    /// Explicit CRUD: removes a cell entirely.
    #[instrument(skip(self), fields(notebook_id = %self.notebook_id))]
    pub async fn deregister_cell(self: &Arc<Self>, cell_id: &str) -> Result<(), NotebookError> {
        let _guard = self.lock.lock().await;

        {
            let mut state = self.state.lock().await;
            state.cells.retain(|c| c.id != cell_id);
        }

        self.persist().await?;

        self.send_and_drain(KernelRequest::Deregister {
            cell_id: cell_id.to_string(),
        })
        .await?;

        self.emit(NotebookEvent::CellDeleted {
            cell_id: cell_id.to_string(),
        });

        Ok(())
    }

    /// On a run request: implicitly register if needed, then execute and
    /// stream every `execution_result` as status/stdout/outputs/error
    /// events until `is_last=true` (§4.7 "Run handling").
    #[instrument(skip(self), fields(notebook_id = %self.notebook_id))]
    pub async fn run_cell(self: &Arc<Self>, cell_id: &str) -> Result<(), NotebookError> {
        let _guard = self.lock.lock().await;

        let (source, kind) = {
            let state = self.state.lock().await;
            let Some(entry) = state.cells.iter().find(|c| c.id == cell_id) else {
                return Err(NotebookError::adapter(format!("unknown cell {cell_id}")));
            };
            (entry.source.clone(), entry.kind)
        };

        let responses = self
            .send_and_drain(KernelRequest::Execute {
                cell_id: cell_id.to_string(),
                source,
                kind,
            })
            .await?;

        for response in responses {
            let KernelResponse::ExecutionResult(result) = response else {
                continue;
            };
            self.emit(NotebookEvent::CellStatus {
                cell_id: result.cell_id.clone(),
                status: result.status,
            });
            if !result.stdout.is_empty() {
                self.emit(NotebookEvent::CellStdout {
                    cell_id: result.cell_id.clone(),
                    data: result.stdout.clone(),
                });
            }
            for output in result.outputs {
                self.emit(NotebookEvent::CellOutput {
                    cell_id: result.cell_id.clone(),
                    output,
                });
            }
            if matches!(result.status, Status::Error | Status::Blocked) {
                if let Some(error) = result.error {
                    self.emit(NotebookEvent::CellError {
                        cell_id: result.cell_id.clone(),
                        error,
                    });
                }
            }
        }

        Ok(())
    }

    #[instrument(skip(self, connection_string), fields(notebook_id = %self.notebook_id))]
    pub async fn configure_database(self: &Arc<Self>, connection_string: Option<String>) -> Result<(), NotebookError> {
        let _guard = self.lock.lock().await;

        {
            let mut state = self.state.lock().await;
            state.database_connection = connection_string.clone();
        }
        self.persist().await?;

        let responses = self
            .send_and_drain(KernelRequest::ConfigureDatabase {
                connection_string,
            })
            .await?;

        for response in responses {
            if let KernelResponse::DatabaseConfigured { status, error } = response {
                self.emit(NotebookEvent::DatabaseConfigured { status, error });
            }
        }

        Ok(())
    }

    async fn persist(&self) -> Result<(), NotebookError> {
        let state = self.state.lock().await;
        let snapshot = NotebookSnapshot {
            name: self.notebook_id.clone(),
            database_connection: state.database_connection.clone(),
            cells: state
                .cells
                .iter()
                .map(|c| (c.id.clone(), c.kind, c.source.clone()))
                .collect(),
        };
        drop(state);
        self.storage.save(&self.notebook_id, &snapshot).await
    }

    /// Sends one request and reads responses until the kernel's reply
    /// stream is exhausted (a single response for register/deregister/
    /// configure_database; a cascade of `is_last`-terminated responses for
    /// execute). A closed channel is kernel death (§7.5): tear down.
    async fn send_and_drain(&self, request: KernelRequest) -> Result<Vec<KernelResponse>, NotebookError> {
        let is_execute = matches!(request, KernelRequest::Execute { .. });

        let mut state = self.state.lock().await;
        let Some(kernel) = state.kernel.as_ref() else {
            return Err(NotebookError::adapter("kernel not running"));
        };
        kernel.send(&request).await?;

        let mut responses = Vec::new();
        loop {
            match kernel.recv().await {
                Ok(Some(response)) => {
                    let is_last = matches!(
                        &response,
                        KernelResponse::ExecutionResult(r) if r.is_last
                    );
                    responses.push(response);
                    if !is_execute || is_last {
                        break;
                    }
                }
                Ok(None) => {
                    warn!("kernel output channel closed mid-request");
                    state.kernel = None;
                    drop(state);
                    self.emit(NotebookEvent::CellError {
                        cell_id: String::new(),
                        error: "kernel lost".to_string(),
                    });
                    return Err(NotebookError::kernel_died());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }

    fn emit(&self, event: NotebookEvent) {
        // Fanout is best-effort: a `send` error here only means there are
        // currently no subscribers, which is not a failure (§4.7 "Fanout").
        let _ = self.tx.send(event);
    }
}

/// Manages the spawn-on-first-subscribe / shutdown-on-last-unsubscribe
/// lifecycle across many concurrently live notebooks.
pub struct OrchestratorRegistry {
    orchestrators: Mutex<HashMap<String, Arc<Orchestrator>>>,
    storage: Arc<dyn StorageAdapter>,
    config: OrchestratorConfig,
}

impl OrchestratorRegistry {
    pub fn new(storage: Arc<dyn StorageAdapter>, config: OrchestratorConfig) -> Self {
        Self {
            orchestrators: Mutex::new(HashMap::new()),
            storage,
            config,
        }
    }

    pub async fn get_or_create(&self, notebook_id: &str) -> Arc<Orchestrator> {
        let mut orchestrators = self.orchestrators.lock().await;
        orchestrators
            .entry(notebook_id.to_string())
            .or_insert_with(|| {
                Orchestrator::new(notebook_id, self.storage.clone(), self.config.clone())
            })
            .clone()
    }
}
