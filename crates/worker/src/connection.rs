//! Orchestrator event channel.
//!
//! Maintains a WebSocket connection to the orchestrator: announces the
//! worker's identity on every (re)connect, forwards inbound requests to
//! the worker's control flow, and drains the outbound message queue.
//! Messages queued while disconnected are delivered after the next
//! announce.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use transcode_core::identity::WorkerIdentity;
use transcode_core::protocol::{parse_inbound, InboundMessage, OutboundMessage};

use crate::error::ConnectionError;
use crate::reconnect::ReconnectConfig;
use crate::worker::WorkerEvent;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Why a session ended without a transport error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Shutdown was requested or the worker stopped producing messages.
    Shutdown,
    /// The orchestrator closed the connection.
    Closed,
}

pub struct OrchestratorClient {
    url: String,
    identity: WorkerIdentity,
    reconnect: ReconnectConfig,
}

impl OrchestratorClient {
    pub fn new(url: impl Into<String>, identity: WorkerIdentity) -> Self {
        Self {
            url: url.into(),
            identity,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Keep the orchestrator connection alive until `cancel` fires or the
    /// outbound queue is closed.
    pub async fn run(
        &self,
        events: mpsc::UnboundedSender<WorkerEvent>,
        mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        cancel: CancellationToken,
    ) {
        let mut delay = self.reconnect.initial_delay;
        let mut pending: Option<OutboundMessage> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::info!(url = %self.url, attempt, "Connecting to orchestrator");

            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    tracing::info!(worker_id = %self.identity.worker_id, "Orchestrator connection established");
                    attempt = 0;
                    delay = self.reconnect.initial_delay;

                    let end = self
                        .run_session(ws_stream, &events, &mut outbound, &mut pending, &cancel)
                        .await;
                    let _ = events.send(WorkerEvent::Disconnected);

                    match end {
                        Ok(SessionEnd::Shutdown) => break,
                        Ok(SessionEnd::Closed) => {
                            tracing::warn!("Orchestrator closed the connection, reconnecting");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Orchestrator session failed, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Connection attempt {attempt} failed",
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.reconnect.next_delay(delay);
        }

        tracing::info!("Orchestrator connection stopped");
    }

    /// Drive one connected session.
    async fn run_session(
        &self,
        ws_stream: WsStream,
        events: &mpsc::UnboundedSender<WorkerEvent>,
        outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        pending: &mut Option<OutboundMessage>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, ConnectionError> {
        let (mut sink, mut stream) = ws_stream.split();

        let announce = OutboundMessage::Announce(self.identity.clone())
            .to_json()
            .map_err(ConnectionError::Encode)?;
        sink.send(Message::Text(announce)).await?;
        tracing::info!(worker_id = %self.identity.worker_id, host = %self.identity.host, "Announced to orchestrator");

        // Flush the backlog before the worker resumes. Load reports queued
        // before the reconnect are stale.
        while let Some(message) = pending.take().or_else(|| outbound.try_recv().ok()) {
            if let OutboundMessage::Stats(_) = message {
                tracing::debug!("Dropping stats queued before reconnect");
                continue;
            }
            deliver(&mut sink, message, pending).await?;
        }

        if events.send(WorkerEvent::Connected).is_err() {
            return Ok(SessionEnd::Shutdown);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                message = outbound.recv() => {
                    match message {
                        Some(message) => deliver(&mut sink, message, pending).await?,
                        None => return Ok(SessionEnd::Shutdown),
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => handle_incoming(events, &text),
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Handled automatically by tungstenite.
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Orchestrator sent close frame");
                            return Ok(SessionEnd::Closed);
                        }
                        Some(Ok(_)) => {
                            // Binary / Frame, ignore.
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Closed),
                    }
                }
            }
        }
    }
}

/// Send one queued message, keeping it for the next session if the
/// transport fails.
async fn deliver<S>(
    sink: &mut S,
    message: OutboundMessage,
    pending: &mut Option<OutboundMessage>,
) -> Result<(), ConnectionError>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(event = message.event_name(), error = %e, "Dropping unencodable message");
            return Ok(());
        }
    };

    tracing::debug!(event = message.event_name(), "Sending message");
    if let Err(e) = sink.send(Message::Text(text)).await {
        *pending = Some(message);
        return Err(e.into());
    }
    Ok(())
}

/// Parse an inbound text frame and forward it to the worker.
fn handle_incoming(events: &mpsc::UnboundedSender<WorkerEvent>, text: &str) {
    let event = match parse_inbound(text) {
        Ok(InboundMessage::TaskRequest(request)) => {
            tracing::debug!(task_id = %request.task_id, "Received task request");
            WorkerEvent::TaskRequest(request)
        }
        Ok(InboundMessage::TaskKill(request)) => {
            tracing::debug!(task_id = %request.task_id, "Received kill request");
            WorkerEvent::TaskKill(request)
        }
        Err(e) => {
            tracing::warn!(error = %e, raw = %text, "Unknown or malformed incoming message");
            return;
        }
    };

    if events.send(event).is_err() {
        tracing::debug!("Worker stopped, dropping inbound message");
    }
}
