//! Inbound reader task.
//!
//! Drives a [`FramedRead`] over the agent's stdout, decodes each line with
//! [`parse_inbound_line`], and forwards the results as [`TransportEvent`]s in
//! arrival order. Malformed lines become [`TransportEvent::Violation`] and the
//! stream keeps going; only EOF or an I/O error ends it, and both go through
//! the shared [`ClosedLatch`] so the session sees exactly one close.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::{AcpCodec, Frame};
use crate::acp::message::parse_inbound_line;
use crate::acp::transport::{ClosedLatch, ExitInfo, TransportEvent};

/// How long EOF waits for the exit monitor to report a status code.
const EXIT_STATUS_GRACE: Duration = Duration::from_millis(250);

/// Reader task body.
///
/// `exit_rx`, when present, is the exit monitor's status channel; on EOF the
/// reader waits briefly for it so the close event can carry the exit code.
/// `done` is cancelled when the reader stops so the exit monitor knows the
/// stream has been drained.
#[allow(clippy::too_many_arguments)] // Internal plumbing wired up by `Transport`.
pub async fn run_reader<R>(
    label: String,
    stdout: R,
    max_line_bytes: usize,
    event_tx: mpsc::Sender<TransportEvent>,
    latch: ClosedLatch,
    exit_rx: Option<watch::Receiver<Option<ExitInfo>>>,
    cancel: CancellationToken,
    done: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, AcpCodec::with_max_length(max_line_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(label, "reader: EOF");
                        done.cancel();
                        let exit = wait_for_exit(exit_rx).await;
                        let reason = exit.as_ref().map_or_else(
                            || "stream closed".to_owned(),
                            ExitInfo::describe,
                        );
                        latch.close(exit.and_then(|e| e.code), reason).await;
                        return;
                    }

                    Some(Ok(Frame::Oversized)) => {
                        let reason = format!("line too long: exceeded {max_line_bytes} bytes");
                        warn!(label, %reason, "reader: framing violation, skipping");
                        if event_tx
                            .send(TransportEvent::Violation { reason, raw: String::new() })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }

                    Some(Err(err)) => {
                        warn!(label, %err, "reader: stream error, stopping");
                        done.cancel();
                        latch.close(None, format!("stream error: {err}")).await;
                        return;
                    }

                    Some(Ok(Frame::Line(line))) => {
                        if !forward_line(&label, &line, &event_tx).await {
                            debug!(label, "reader: event channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    done.cancel();
}

/// Decode `line` and send the results; returns `false` if the receiver is gone.
async fn forward_line(label: &str, line: &str, event_tx: &mpsc::Sender<TransportEvent>) -> bool {
    match parse_inbound_line(line) {
        Ok(messages) => {
            for message in messages {
                if event_tx.send(TransportEvent::Message(message)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(err) => {
            warn!(label, error = %err, raw_line = %line, "reader: parse error, skipping line");
            event_tx
                .send(TransportEvent::Violation {
                    reason: err.to_string(),
                    raw: line.to_owned(),
                })
                .await
                .is_ok()
        }
    }
}

async fn wait_for_exit(exit_rx: Option<watch::Receiver<Option<ExitInfo>>>) -> Option<ExitInfo> {
    let mut rx = exit_rx?;
    let waited = tokio::time::timeout(EXIT_STATUS_GRACE, rx.wait_for(Option::is_some)).await;
    match waited {
        Ok(Ok(status)) => status.clone(),
        _ => None,
    }
}
