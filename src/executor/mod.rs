//! Code Executor (L4, §4.4). Two independent executors dispatched by
//! `CellKind`; neither mutates the dependency graph — a failed execution
//! simply reports `error` and the cascade continues with `blocked`
//! dependents (§4.6).

pub mod python;
pub mod sql;

use crate::cell::Output;

/// `(stdout, outputs, error)` — the contract shared by both executors
/// (§4.4). `error` folds in any stderr content per the Python contract's
/// step 7; the SQL executor never produces stderr so its `error` is purely
/// the driver/template failure text.
pub type ExecutionOutcome = (String, Vec<Output>, Option<String>);
