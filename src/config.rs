//! Plain configuration structs (no config-file crate — the teacher crate
//! has none either, and timeouts/cancellation are explicit non-goals, so
//! there's nothing else to configure).

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    /// Path to the kernel worker binary. Defaults to the current
    /// executable (the worker ships as a `[[bin]]` target in this crate).
    pub kernel_binary_override: Option<PathBuf>,
}

impl KernelConfig {
    pub fn kernel_binary(&self) -> std::io::Result<PathBuf> {
        match &self.kernel_binary_override {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub kernel: KernelConfig,
}
