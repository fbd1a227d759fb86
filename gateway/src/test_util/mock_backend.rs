//! In-process stand-in for the chat backend.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
pub struct MockBackendOptions {
    /// Send every data frame straight back.
    pub echo: bool,
    /// Wait this long after the TCP accept before completing the WebSocket handshake.
    pub handshake_delay: Duration,
    /// Complete the handshake, then never read from the socket.
    pub stalled: bool,
}

impl Default for MockBackendOptions {
    fn default() -> Self {
        Self {
            echo: true,
            handshake_delay: Duration::ZERO,
            stalled: false,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    open: AtomicUsize,
    accepted: AtomicUsize,
    received: Mutex<Vec<Message>>,
}

/// WebSocket server counting its open connections.
pub struct MockBackend {
    addr: SocketAddr,
    counters: Arc<Counters>,
    kill: broadcast::Sender<()>,
    push: broadcast::Sender<Message>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::start_with(MockBackendOptions::default()).await
    }

    pub async fn start_with(options: MockBackendOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = Arc::new(Counters::default());
        let (kill, _) = broadcast::channel(4);
        let (push, _) = broadcast::channel(64);

        let task = {
            let counters = counters.clone();
            let kill = kill.clone();
            let push = push.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(handle_connection(
                        stream,
                        options.clone(),
                        counters.clone(),
                        kill.subscribe(),
                        push.subscribe(),
                    ));
                }
            })
        };

        Self {
            addr,
            counters,
            kill,
            push,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connections whose handshake completed and that are still open.
    pub fn open_connections(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Handshakes completed since start.
    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Data frames received, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.counters.received.lock().unwrap().clone()
    }

    /// Send a frame to every open connection.
    pub fn push(&self, frame: Message) {
        let _ = self.push.send(frame);
    }

    /// Drop every open connection without a close frame.
    pub fn disconnect_all(&self) {
        let _ = self.kill.send(());
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.kill.send(());
    }
}

async fn handle_connection(
    stream: TcpStream,
    options: MockBackendOptions,
    counters: Arc<Counters>,
    mut kill: broadcast::Receiver<()>,
    mut push: broadcast::Receiver<Message>,
) {
    if !options.handshake_delay.is_zero() {
        tokio::time::sleep(options.handshake_delay).await;
    }
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    counters.accepted.fetch_add(1, Ordering::SeqCst);
    counters.open.fetch_add(1, Ordering::SeqCst);

    if options.stalled {
        // Writes from the peer pile up in the socket buffers.
        let _ = kill.recv().await;
        drop(ws);
        counters.open.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    let (mut tx, mut rx) = ws.split();
    loop {
        tokio::select! {
            _ = kill.recv() => break,

            Ok(frame) = push.recv() => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            item = rx.next() => match item {
                Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                    counters.received.lock().unwrap().push(msg.clone());
                    if options.echo && tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    counters.open.fetch_sub(1, Ordering::SeqCst);
}
