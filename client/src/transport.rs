//! Physical connections to the gateway.
//!
//! A [`Connector`] opens one connection per call and hands back a [`Link`]:
//! a pair of channels to a task that owns the socket. The reconnection
//! manager only ever sees links, so it can be driven by an in-memory
//! [`Peer`] as well as by a real WebSocket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, http::Uri, Message},
    MaybeTlsStream, WebSocketStream,
};

/// Failure to open a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Worth retrying: refused, reset, timed out, server unavailable.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Retrying cannot help: malformed URL or the server rejected the request.
    #[error("endpoint unusable: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match &e {
            tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_) => {
                TransportError::Fatal(e.to_string())
            }
            tungstenite::Error::Http(response) if response.status().is_client_error() => {
                TransportError::Fatal(format!("HTTP {}", response.status()))
            }
            _ => TransportError::Connect(e.to_string()),
        }
    }
}

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Binary(Vec<u8>),
    /// The connection is gone. `clean` when the server completed a close handshake.
    Closed { clean: bool },
}

/// Owner side of an open connection.
///
/// Dropping the link (and every sender obtained from it) closes the
/// connection cleanly.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Transport side of a [`Link`].
#[derive(Debug)]
pub struct Peer {
    /// Payloads the owner sent.
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// Events reported to the owner.
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

impl Link {
    pub fn pair() -> (Link, Peer) {
        let (outbound, inbound) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Link {
                outbound,
                events: events_rx,
            },
            Peer {
                inbound,
                events: events_tx,
            },
        )
    }

    /// Handle for writing text frames to this connection only.
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    /// Next event. A transport that vanished without reporting counts as an unclean close.
    pub async fn next_event(&mut self) -> LinkEvent {
        self.events
            .recv()
            .await
            .unwrap_or(LinkEvent::Closed { clean: false })
    }
}

impl Peer {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(LinkEvent::Text(text.into())).is_ok()
    }

    pub fn close(&self, clean: bool) -> bool {
        self.events.send(LinkEvent::Closed { clean }).is_ok()
    }
}

/// Opens connections to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;

    /// Open a fresh connection.
    async fn connect(&self) -> Result<Link, TransportError>;
}

/// WebSocket connector backed by tokio-tungstenite.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        check_scheme(&self.url)?;
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (link, peer) = Link::pair();
        tokio::spawn(pump(stream, peer));
        Ok(link)
    }
}

/// Reject anything but `ws://` and `wss://` before dialing.
fn check_scheme(url: &str) -> Result<(), TransportError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| TransportError::Fatal(format!("invalid URL {}: {}", url, e)))?;
    match uri.scheme_str() {
        Some("ws") | Some("wss") => Ok(()),
        Some(other) => Err(TransportError::Fatal(format!(
            "unsupported URL scheme {}, expected ws or wss",
            other
        ))),
        None => Err(TransportError::Fatal(format!("URL {} has no scheme", url))),
    }
}

/// Move frames between the socket and the link until either side ends.
async fn pump(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, peer: Peer) {
    let Peer { mut inbound, events } = peer;
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            item = read.next() => {
                let event = match item {
                    Some(Ok(Message::Text(text))) => LinkEvent::Text(text),
                    Some(Ok(Message::Binary(data))) => LinkEvent::Binary(data),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!("Gateway sent close frame: {:?}", frame);
                        let _ = events.send(LinkEvent::Closed { clean: true });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!("Gateway connection lost: {}", e);
                        let _ = events.send(LinkEvent::Closed { clean: false });
                        return;
                    }
                    None => {
                        let _ = events.send(LinkEvent::Closed { clean: false });
                        return;
                    }
                };
                if events.send(event).is_err() {
                    // Owner is gone.
                    return;
                }
            }

            outbound = inbound.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::debug!("Write to gateway failed: {}", e);
                        let _ = events.send(LinkEvent::Closed { clean: false });
                        return;
                    }
                }
                None => {
                    // Owner closed the link.
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_pair_carries_both_directions() {
        let (mut link, mut peer) = Link::pair();

        link.sender().send("hello".to_string()).unwrap();
        assert_eq!(peer.inbound.recv().await.as_deref(), Some("hello"));

        assert!(peer.send_text("reply"));
        assert_eq!(link.next_event().await, LinkEvent::Text("reply".to_string()));
    }

    #[tokio::test]
    async fn test_vanished_peer_is_unclean_close() {
        let (mut link, peer) = Link::pair();
        drop(peer);
        assert_eq!(link.next_event().await, LinkEvent::Closed { clean: false });
    }

    #[tokio::test]
    async fn test_dropping_link_closes_peer_inbound() {
        let (link, mut peer) = Link::pair();
        drop(link);
        assert!(peer.inbound.recv().await.is_none());
    }

    #[test]
    fn test_error_classification() {
        let refused = tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(!TransportError::from(refused).is_terminal());

        let bad_url = tungstenite::Error::Url(tungstenite::error::UrlError::UnsupportedUrlScheme);
        assert!(TransportError::from(bad_url).is_terminal());
    }

    #[tokio::test]
    async fn test_connect_refused_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(format!("ws://{}/", addr));
        let err = connector.connect().await.unwrap_err();
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_connect_bad_scheme_is_terminal() {
        // A listener is up, so the scheme check alone decides the outcome.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = WsConnector::new(format!("http://{}/", addr));
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_terminal(), "{}", err);
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn test_check_scheme() {
        assert!(check_scheme("ws://localhost:3001").is_ok());
        assert!(check_scheme("wss://chat.example.com/ws").is_ok());
        assert!(check_scheme("http://localhost:3001").unwrap_err().is_terminal());
        assert!(check_scheme("localhost:3001").unwrap_err().is_terminal());
        assert!(check_scheme("not a url").unwrap_err().is_terminal());
    }
}
