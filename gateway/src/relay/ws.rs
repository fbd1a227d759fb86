//! WebSocket handler for client connections.
//!
//! Each accepted client gets one task that owns both legs of its session.
//! The task multiplexes the two legs with `select!`, so every event of a
//! session is handled in order and the close cascade cannot interleave with
//! a forward.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as ClientMessage, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message as BackendMessage},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

use super::frame::{LegDown, LegEvent};
use super::session::{Cascade, Leg, RelaySession};
use super::stats::RelayStats;
use crate::config::BackendConfig;
use crate::error::{RelayError, Result};
use crate::AppState;

type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    tracing::debug!("Client connection attempt from {}", addr);
    ws.on_upgrade(move |socket| handle_client(socket, state, addr))
}

/// Run one relay session to completion.
async fn handle_client(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let _active = state.stats.session_opened();
    let mut session = RelaySession::new();
    let id = session.id();
    let backend_config = &state.config.backend;

    let (client_tx, mut client_rx) = socket.split();

    let backend = match establish(backend_config, &mut client_rx, id).await {
        Ok(backend) => backend,
        Err(e) => {
            let failed = if e.is_upstream() {
                state.stats.upstream_failed();
                tracing::error!(session = %id, client = %addr, "Closing client: {}", e);
                Leg::Backend
            } else {
                tracing::info!(session = %id, client = %addr, "{}", e);
                Leg::Client
            };
            session.leg_down(failed, LegDown::Error(e.to_string()));
            // No handshake: dropping the halves closes the client socket.
            drop((client_tx, client_rx));
            session.finish();
            return;
        }
    };

    tracing::info!(
        session = %id,
        client = %addr,
        backend = %backend_config.ws_url,
        "Relay session established"
    );

    let (backend_tx, mut backend_rx) = backend.split();
    let mut to_client = LegWriter::spawn(client_tx);
    let mut to_backend = LegWriter::spawn(backend_tx);

    let cascade = pump(
        &mut session,
        &state.stats,
        &mut client_rx,
        &mut backend_rx,
        &mut to_client,
        &mut to_backend,
    )
    .await;

    tracing::info!(
        session = %id,
        client = %addr,
        "{} leg {}, terminating {} leg",
        cascade.origin,
        cascade.reason,
        cascade.terminate
    );

    // Forceful close of both legs: the writers are aborted even if stuck on
    // an unresponsive peer, and the sockets are dropped without a closing
    // handshake.
    to_client.close().await;
    to_backend.close().await;
    drop((backend_rx, client_rx));
    session.finish();

    let (to_backend, to_client) = session.forwarded();
    tracing::info!(
        session = %id,
        client = %addr,
        to_backend,
        to_client,
        duration_ms = session.elapsed_ms() as u64,
        "Relay session closed"
    );
}

/// Open the backend leg.
///
/// The client leg keeps being read while the connection opens: data frames
/// that arrive in the meantime are dropped, and a client that leaves aborts
/// the attempt (the pending connection is dropped with it).
async fn establish<R>(backend: &BackendConfig, client_rx: &mut R, session: Uuid) -> Result<BackendStream>
where
    R: Stream<Item = std::result::Result<ClientMessage, axum::Error>> + Unpin,
{
    let connect = timeout(backend.connect_timeout(), connect_async(backend.ws_url.as_str()));
    tokio::pin!(connect);

    loop {
        tokio::select! {
            result = &mut connect => {
                return match result {
                    Ok(Ok((stream, _response))) => Ok(stream),
                    Ok(Err(source)) => Err(RelayError::UpstreamUnavailable {
                        url: backend.ws_url.clone(),
                        source,
                    }),
                    Err(_) => Err(RelayError::UpstreamTimeout {
                        url: backend.ws_url.clone(),
                        timeout: backend.connect_timeout(),
                    }),
                };
            }

            item = client_rx.next() => match LegEvent::from_client(item) {
                LegEvent::Frame(frame) => {
                    tracing::debug!(
                        session = %session,
                        bytes = frame.len(),
                        "Dropping client frame, backend leg not open yet"
                    );
                }
                LegEvent::Control => {}
                LegEvent::Down(reason) => {
                    tracing::debug!(session = %session, "Client leg {} during establish", reason);
                    return Err(RelayError::ClientGone);
                }
            }
        }
    }
}

/// Frames queued per leg while its peer is slow to read. Beyond this the
/// leg counts as not accepting frames and new ones are dropped.
const WRITE_BUFFER: usize = 32;

/// Write half of a leg, owned by its own task.
///
/// The session loop only hands frames over with `try_send`, so a peer that
/// stops reading never keeps the loop from seeing the other leg go down.
struct LegWriter<M> {
    frames: mpsc::Sender<M>,
    task: JoinHandle<std::result::Result<(), String>>,
    finished: bool,
}

impl<M: Send + 'static> LegWriter<M> {
    fn spawn<S>(sink: S) -> Self
    where
        S: Sink<M> + Send + Unpin + 'static,
        S::Error: Display,
    {
        let (frames, rx) = mpsc::channel(WRITE_BUFFER);
        let task = tokio::spawn(write_leg(sink, rx));
        Self {
            frames,
            task,
            finished: false,
        }
    }

    /// Hand a frame to the writer. False when it was dropped.
    fn forward(&self, msg: M) -> bool {
        self.frames.try_send(msg).is_ok()
    }

    /// The writer stopped on a write error.
    async fn failed(&mut self) -> LegDown {
        if self.finished {
            return std::future::pending().await;
        }
        let result = (&mut self.task).await;
        self.finished = true;
        match result {
            Ok(Ok(())) => LegDown::Dropped,
            Ok(Err(e)) => LegDown::Error(e),
            Err(e) => LegDown::Error(e.to_string()),
        }
    }

    async fn close(self) {
        if self.finished {
            return;
        }
        self.task.abort();
        // Cancelled or finished in the meantime: either way the sink is gone.
        let _ = self.task.await;
    }
}

async fn write_leg<S, M>(mut sink: S, mut frames: mpsc::Receiver<M>) -> std::result::Result<(), String>
where
    S: Sink<M> + Unpin,
    S::Error: Display,
{
    while let Some(msg) = frames.recv().await {
        sink.send(msg).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Forward frames until one leg goes down.
async fn pump<CR, BR>(
    session: &mut RelaySession,
    stats: &RelayStats,
    client_rx: &mut CR,
    backend_rx: &mut BR,
    to_client: &mut LegWriter<ClientMessage>,
    to_backend: &mut LegWriter<BackendMessage>,
) -> Cascade
where
    CR: Stream<Item = std::result::Result<ClientMessage, axum::Error>> + Unpin,
    BR: Stream<Item = std::result::Result<BackendMessage, tungstenite::Error>> + Unpin,
{
    loop {
        let (from, event) = tokio::select! {
            item = client_rx.next() => (Leg::Client, LegEvent::from_client(item)),
            item = backend_rx.next() => (Leg::Backend, LegEvent::from_backend(item)),
            // A writer only ends when its leg failed on write.
            reason = to_client.failed() => (Leg::Client, LegEvent::Down(reason)),
            reason = to_backend.failed() => (Leg::Backend, LegEvent::Down(reason)),
        };

        let reason = match event {
            LegEvent::Control => continue,
            LegEvent::Down(reason) => reason,
            LegEvent::Frame(frame) => {
                if !session.can_forward() {
                    continue;
                }
                let len = frame.len();
                let handed_off = match from {
                    Leg::Client => to_backend.forward(frame.into_backend()),
                    Leg::Backend => to_client.forward(frame.into_client()),
                };
                if handed_off {
                    session.record_forwarded(from);
                    stats.frame_forwarded(from);
                    tracing::trace!(session = %session.id(), "Forwarded frame from {} leg", from);
                } else {
                    tracing::debug!(
                        session = %session.id(),
                        bytes = len,
                        "Dropping frame, {} leg is not accepting writes",
                        from.opposite()
                    );
                }
                continue;
            }
        };

        if let Some(cascade) = session.leg_down(from, reason) {
            return cascade;
        }
    }
}
