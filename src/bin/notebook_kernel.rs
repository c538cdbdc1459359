//! Kernel worker binary (§4.5). Reads newline-delimited `KernelRequest` JSON
//! from stdin, drives an in-process `KernelState`, and writes one
//! newline-delimited `KernelResponse` per line to stdout for every response
//! the request produces. Exits when stdin closes or a `shutdown` request is
//! received.

use pyo3::Python;
use reactive_notebook::kernel::{KernelRequest, KernelState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    pyo3::prepare_freethreaded_python();
    let mut state = Python::with_gil(KernelState::new);

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Ok(Some(line)) = reader.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let request: KernelRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed kernel request");
                continue;
            }
        };

        let is_shutdown = matches!(request, KernelRequest::Shutdown);
        let responses = state.handle(request).await;
        for response in responses {
            let mut out_line = serde_json::to_string(&response).expect("response is JSON-safe");
            out_line.push('\n');
            if stdout.write_all(out_line.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = stdout.flush().await;

        if is_shutdown {
            break;
        }
    }
}
