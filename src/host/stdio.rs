//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through the `HostCommandServer` router, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{ReloaderError, Result};
use crate::host::channel::{HostCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::host::registry::TabRegistry;
use crate::service::ReloaderService;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};

/// Default request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

type SharedWriter = Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;

/// Run the stdin/stdout JSON bridge until stdin closes or a `runtime.stop`
/// command is received.
pub async fn run_stdio_bridge(
    service: Arc<ReloaderService>,
    registry: Arc<TabRegistry>,
    event_tx: broadcast::Sender<EventEnvelope>,
) -> Result<()> {
    run_bridge(
        service,
        registry,
        event_tx,
        BufReader::new(tokio::io::stdin()),
        Box::new(tokio::io::stdout()),
    )
    .await
}

/// Run the bridge over arbitrary line-oriented streams.
///
/// Three tasks operate in parallel:
///
/// 1. **Reader** -- reads JSON lines, dispatches each `CommandEnvelope`
///    through the host command client, and writes the response.
///    Backup and restore are awaited on their own task so the reader keeps
///    going while they run.
/// 2. **Event forwarder** -- writes broadcast `EventEnvelope` messages.
/// 3. **Server** -- runs the `HostCommandServer` router loop.
pub async fn run_bridge<R>(
    service: Arc<ReloaderService>,
    registry: Arc<TabRegistry>,
    event_tx: broadcast::Sender<EventEnvelope>,
    reader: R,
    output: Box<dyn AsyncWrite + Send + Unpin>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let (client, server) = command_channel(REQUEST_CAPACITY, event_tx, service, registry);
    let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(output)));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                    Ok(json) => {
                        if let Err(e) = write_line(&event_writer, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write event envelope; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let reader_result = run_reader(client, reader, Arc::clone(&writer)).await;

    // The reader dropped its client; in-flight long commands hold clones
    // and finish before the server exits.
    let _ = server_handle.await;
    event_handle.abort();
    let _ = event_handle.await;

    reader_result
}

async fn run_reader<R>(client: HostCommandClient, mut reader: R, writer: SharedWriter) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ReloaderError::Channel(format!("failed to read from stdin: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_line = %trimmed,
                    "failed to parse command envelope from stdin"
                );
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let command = envelope.command;
        if command.is_long_running() {
            let client = client.clone();
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let response = dispatch(&client, envelope).await;
                if let Err(e) = write_response(&writer, &response).await {
                    tracing::warn!(error = %e, "failed to write long-running command response");
                }
            });
            continue;
        }

        let response = dispatch(&client, envelope).await;
        write_response(&writer, &response).await?;

        if command == CommandName::RuntimeStop {
            tracing::info!("runtime.stop received; shutting down stdio bridge");
            break;
        }
    }

    Ok(())
}

async fn dispatch(client: &HostCommandClient, envelope: CommandEnvelope) -> ResponseEnvelope {
    let request_id = envelope.request_id.clone();
    match client.send(envelope).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "host command dispatch failed");
            ResponseEnvelope::error(request_id, format!("dispatch failed: {e}"))
        }
    }
}

async fn write_response(writer: &SharedWriter, response: &ResponseEnvelope) -> Result<()> {
    let json = serde_json::to_string(response).map_err(|e| {
        ReloaderError::Host(format!("failed to serialize response envelope: {e}"))
    })?;
    write_line(writer, &json).await
}

/// Write a single JSON line and flush.
async fn write_line(writer: &SharedWriter, json: &str) -> Result<()> {
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| ReloaderError::Channel(format!("failed to write to stdout: {e}")))?;
    w.write_all(b"\n")
        .await
        .map_err(|e| ReloaderError::Channel(format!("failed to write newline to stdout: {e}")))?;
    w.flush()
        .await
        .map_err(|e| ReloaderError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}
