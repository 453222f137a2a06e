//! Outbound writer task.
//!
//! Receives JSON values from the bounded outbound queue, serialises each to a
//! single line, and writes it to the agent's stdin. On `close` the task drains
//! whatever is already queued and then drops the writer, which the agent
//! observes as EOF on its stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Writer task body.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("failed to serialise outbound message: …")`
/// - [`AppError::TransportClosed`]`("write failed: …")` when the agent's
///   stdin is gone.
pub async fn run_writer<W>(
    label: String,
    stdin: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    close: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(label, "writer: queue closed, stopping");
                    break;
                };
                write_line(&label, &mut stdin, &value).await?;
            }

            () = close.cancelled() => {
                while let Ok(value) = msg_rx.try_recv() {
                    write_line(&label, &mut stdin, &value).await?;
                }
                debug!(label, "writer: close requested, queue drained");
                break;
            }
        }
    }

    stdin
        .shutdown()
        .await
        .map_err(|e| AppError::TransportClosed(format!("write failed: {e}")))?;
    Ok(())
}

async fn write_line<W>(label: &str, stdin: &mut W, value: &serde_json::Value) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut bytes = serde_json::to_vec(value)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;
    bytes.push(b'\n');

    stdin.write_all(&bytes).await.map_err(|e| {
        warn!(label, error = %e, "writer: write to stdin failed");
        AppError::TransportClosed(format!("write failed: {e}"))
    })?;
    stdin
        .flush()
        .await
        .map_err(|e| AppError::TransportClosed(format!("flush failed: {e}")))
}
