//! Newline-delimited JSON bridge between a host process and the command
//! channel.
//!
//! Every input line is one `CommandEnvelope`. Lines are submitted to the
//! router in the order they are read, and each response is written the
//! moment it is ready. Responses may therefore come back out of order; the
//! host matches them by `request_id`. Events share the output stream. Logs
//! never go to stdout.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::host::channel::{HostCommandClient, HostCommandServer, PendingResponse};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};

/// `request_id` used when a line cannot be parsed as an envelope.
pub const PARSE_ERROR_ID: &str = "parse-error";

/// How long responses still in flight get once input has ended.
const RESPONSE_GRACE: Duration = Duration::from_secs(2);

/// Serve the command channel over the process's stdin and stdout until
/// stdin closes or `runtime.stop` is answered.
pub async fn run_stdio_bridge(
    client: HostCommandClient,
    server: HostCommandServer,
) -> Result<()> {
    serve(
        client,
        server,
        BufReader::new(tokio::io::stdin()),
        BufWriter::new(tokio::io::stdout()),
    )
    .await
}

/// Serve the command channel over any line reader and writer.
pub async fn serve<R, W>(
    client: HostCommandClient,
    server: HostCommandServer,
    input: R,
    output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let out = JsonLines::new(output);
    let router = tokio::spawn(server.run());
    let events = tokio::spawn(forward_events(client.subscribe_events(), out.clone()));

    let mut responders = JoinSet::new();
    let read_result = read_commands(&client, input, &out, &mut responders).await;
    drop(client);

    let settled = tokio::time::timeout(RESPONSE_GRACE, async {
        while responders.join_next().await.is_some() {}
    })
    .await;
    if settled.is_err() {
        warn!(
            outstanding = responders.len(),
            "input closed with commands still running; their responses are dropped"
        );
        responders.abort_all();
        while responders.join_next().await.is_some() {}
    }

    events.abort();
    let _ = events.await;
    let _ = router.await;
    read_result
}

async fn read_commands<R, W>(
    client: &HostCommandClient,
    input: R,
    out: &JsonLines<W>,
    responders: &mut JoinSet<()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SyncError::Channel(format!("failed to read command input: {e}")))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, raw_line = %line, "unparseable command line");
                out.emit(&ResponseEnvelope::error(
                    PARSE_ERROR_ID,
                    format!("failed to parse command envelope: {e}"),
                ))
                .await?;
                continue;
            }
        };

        let request_id = envelope.request_id.clone();
        let shutting_down = envelope.command == CommandName::RuntimeStop;
        let pending = match client.submit(envelope).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(%request_id, error = %e, "command rejected");
                out.emit(&ResponseEnvelope::error(request_id, e.to_string()))
                    .await?;
                continue;
            }
        };

        if shutting_down {
            out.emit(&settle(pending).await).await?;
            info!("runtime.stop answered; closing bridge");
            return Ok(());
        }

        let out = out.clone();
        responders.spawn(async move {
            let response = settle(pending).await;
            if let Err(e) = out.emit(&response).await {
                warn!(request_id = %response.request_id, error = %e, "response not written");
            }
        });
    }

    info!("command input closed; closing bridge");
    Ok(())
}

/// Wait for a response, turning a failed command into an error envelope
/// that still carries the caller's `request_id`.
async fn settle(pending: PendingResponse) -> ResponseEnvelope {
    let request_id = pending.request_id().to_owned();
    match pending.recv().await {
        Ok(response) => response,
        Err(e) => {
            warn!(%request_id, error = %e, "host command failed");
            ResponseEnvelope::error(request_id, e.to_string())
        }
    }
}

async fn forward_events<W>(mut events: broadcast::Receiver<EventEnvelope>, out: JsonLines<W>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = out.emit(&event).await {
                    warn!(error = %e, "event stream closed");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "host is reading too slowly; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event channel closed");
                break;
            }
        }
    }
}

/// One JSON document per line, shared by every writer of the output.
struct JsonLines<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for JsonLines<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W: AsyncWrite + Unpin> JsonLines<W> {
    fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    async fn emit<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| SyncError::Host(format!("cannot encode outgoing message: {e}")))?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| SyncError::Channel(format!("failed to write output line: {e}")))?;
        out.flush()
            .await
            .map_err(|e| SyncError::Channel(format!("failed to flush output: {e}")))
    }
}
