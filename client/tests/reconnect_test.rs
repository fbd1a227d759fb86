//! Reconnection manager tests.
//!
//! Most tests drive the manager through a scripted connector on a paused
//! clock, so backoff delays can be checked exactly. The last one runs the
//! real client against a gateway and a mock backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;

use loanbot_client::{
    ClientError, ConnectionStatus, Connector, Link, LinkEvent, Peer, ReconnectPolicy,
    ReconnectionManager, TransportError, WsConnector,
};
use loanbot_common::{BotMessage, DecodeError};
use loanbot_gateway::test_util::{eventually, spawn_gateway, MockBackend};

const WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
enum Step {
    Refuse,
    Accept,
    Fatal,
}

/// Connector following a fixed script. Refuses once the script runs out.
struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    fn new(steps: &[Step]) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            attempts: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peers_rx)
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Milliseconds between consecutive attempts.
    fn gaps_ms(&self) -> Vec<u64> {
        self.attempts()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn endpoint(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Refuse);
        match step {
            Step::Refuse => Err(TransportError::Connect("connection refused".to_string())),
            Step::Fatal => Err(TransportError::Fatal("HTTP 404 Not Found".to_string())),
            Step::Accept => {
                let (link, peer) = Link::pair();
                self.peers.send(peer).unwrap();
                Ok(link)
            }
        }
    }
}

async fn wait_for_status(manager: &ReconnectionManager, status: ConnectionStatus) {
    let mut rx = manager.subscribe_state();
    timeout(WAIT, rx.wait_for(|s| s.status == status))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", status))
        .unwrap();
}

/// Wait until a retry has been scheduled after `attempts` failed attempts.
async fn wait_for_retry(manager: &ReconnectionManager, attempts: u32) {
    let mut rx = manager.subscribe_state();
    timeout(
        WAIT,
        rx.wait_for(|s| s.status == ConnectionStatus::Disconnected && s.attempt_count == attempts),
    )
    .await
    .expect("timed out waiting for retry")
    .unwrap();
}

async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

fn assert_gaps(actual: &[u64], expected: &[u64]) {
    assert_eq!(actual.len(), expected.len(), "gaps: {:?}", actual);
    for (a, e) in actual.iter().zip(expected) {
        assert!(a >= e && *a <= e + 2, "gaps {:?}, expected {:?}", actual, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_until_ceiling_then_errors() {
    let (connector, _peers) = ScriptedConnector::new(&[]);
    let manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    wait_for_status(&manager, ConnectionStatus::Errored).await;

    // Initial attempt plus five reconnection attempts.
    assert_eq!(connector.attempts().len(), 6);
    assert_gaps(&connector.gaps_ms(), &[1000, 2000, 4000, 8000, 10_000]);
    assert_eq!(
        manager.last_error(),
        Some(ClientError::RetriesExhausted { attempts: 5 })
    );

    // Errored is sticky: nothing else is tried.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts().len(), 6);
    assert_eq!(manager.status(), ConnectionStatus::Errored);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_backoff() {
    let (connector, mut peers) =
        ScriptedConnector::new(&[Step::Refuse, Step::Refuse, Step::Accept, Step::Accept]);
    let manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    let peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    let state = manager.state();
    assert_eq!(state.attempt_count, 0);
    assert_eq!(state.current_delay, Duration::from_millis(1000));

    peer.close(false);
    let _second = next_peer(&mut peers).await;

    assert_gaps(&connector.gaps_ms(), &[1000, 2000, 1000]);
    wait_for_status(&manager, ConnectionStatus::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_vanished_transport_counts_as_unclean() {
    let (connector, mut peers) = ScriptedConnector::new(&[Step::Accept, Step::Accept]);
    let manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    let peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    drop(peer);

    let _second = next_peer(&mut peers).await;
    assert_eq!(connector.attempts().len(), 2);
    assert_gaps(&connector.gaps_ms(), &[1000]);
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_stays_disconnected() {
    let (connector, mut peers) = ScriptedConnector::new(&[Step::Accept]);
    let manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    let peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    peer.close(true);

    wait_for_status(&manager, ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts().len(), 1);
    assert_eq!(manager.state().attempt_count, 0);
    assert_eq!(manager.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let (connector, _peers) = ScriptedConnector::new(&[]);
    let mut manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    wait_for_retry(&manager, 1).await;
    manager.shutdown().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts().len(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_drop_cancels_pending_retry() {
    let (connector, _peers) = ScriptedConnector::new(&[]);
    let manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());
    let mut states = manager.subscribe_state();

    wait_for_retry(&manager, 1).await;
    drop(manager);

    // The driver task ends, which closes the state channel.
    timeout(WAIT, async { while states.changed().await.is_ok() {} })
        .await
        .expect("driver kept running after drop");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_open_connection() {
    let (connector, mut peers) = ScriptedConnector::new(&[Step::Accept]);
    let mut manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    let mut peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    manager.shutdown().await;

    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert!(peer.inbound.recv().await.is_none());
    assert!(manager.send("anyone there?").is_err());
}

#[tokio::test(start_paused = true)]
async fn test_send_refused_while_not_connected() {
    let (connector, _peers) = ScriptedConnector::new(&[]);
    let manager = ReconnectionManager::start(connector, ReconnectPolicy::default());

    wait_for_retry(&manager, 1).await;
    let err = manager.send("hello").unwrap_err();

    assert_eq!(err, ClientError::NotConnected(ConnectionStatus::Disconnected));
    assert_eq!(manager.last_error(), Some(err));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_send_reaches_open_connection() {
    let (connector, mut peers) = ScriptedConnector::new(&[Step::Accept]);
    let manager = ReconnectionManager::start(connector, ReconnectPolicy::default());

    let mut peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    manager.send(r#"{"message":"I need a car loan"}"#).unwrap();
    assert_eq!(
        peer.inbound.recv().await.as_deref(),
        Some(r#"{"message":"I need a car loan"}"#)
    );
    assert_eq!(manager.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_decoded_messages_and_decode_errors() {
    let (connector, mut peers) = ScriptedConnector::new(&[Step::Accept]);
    let manager = ReconnectionManager::start(connector, ReconnectPolicy::default());
    let mut messages = manager.subscribe_messages();
    let mut errors = manager.subscribe_errors();

    let peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    peer.send_text(r#"{"type":"chat","data":{"content":"Hi! How much do you need?"}}"#);
    timeout(WAIT, messages.wait_for(|m| m.is_some())).await.unwrap().unwrap();
    let chat = BotMessage::Chat {
        content: "Hi! How much do you need?".to_string(),
    };
    assert_eq!(manager.last_message(), Some(chat.clone()));

    peer.send_text(r#"{"foo":"bar"}"#);
    timeout(WAIT, errors.wait_for(|e| e.is_some())).await.unwrap().unwrap();
    assert!(matches!(
        manager.last_error(),
        Some(ClientError::Decode(DecodeError::UnknownShape(_)))
    ));
    assert_eq!(manager.last_message(), Some(chat.clone()));

    peer.events.send(LinkEvent::Binary(vec![1, 2, 3])).unwrap();
    timeout(
        WAIT,
        errors.wait_for(|e| *e == Some(ClientError::Decode(DecodeError::BinaryFrame))),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(manager.last_message(), Some(chat));
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    peer.send_text(
        r#"{"type":"lenders","data":{"match_score":91.5,"top_lenders":[{"name":"Acme Credit","interest_rate":6.9,"reason":"Lowest APR"}]}}"#,
    );
    timeout(
        WAIT,
        messages.wait_for(|m| matches!(m, Some(BotMessage::LenderRecommendation { .. }))),
    )
    .await
    .unwrap()
    .unwrap();
    match manager.last_message() {
        Some(BotMessage::LenderRecommendation { match_score, lenders }) => {
            assert_eq!(match_score, 91.5);
            assert_eq!(lenders.len(), 1);
            assert_eq!(lenders[0].name, "Acme Credit");
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_transport_error_is_terminal() {
    let (connector, _peers) = ScriptedConnector::new(&[Step::Fatal]);
    let manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    wait_for_status(&manager, ConnectionStatus::Errored).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts().len(), 1);
    assert!(matches!(manager.last_error(), Some(ClientError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn test_restart_leaves_errored() {
    let (connector, mut peers) = ScriptedConnector::new(&[Step::Fatal, Step::Accept]);
    let mut manager = ReconnectionManager::start(connector.clone(), ReconnectPolicy::default());

    wait_for_status(&manager, ConnectionStatus::Errored).await;
    manager.restart().await;

    let _peer = next_peer(&mut peers).await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    assert_eq!(connector.attempts().len(), 2);
    assert_eq!(manager.last_error(), None);
    assert_eq!(manager.state().attempt_count, 0);
}

#[tokio::test]
async fn test_client_recovers_through_gateway() {
    let limit = Duration::from_secs(5);
    let backend = MockBackend::start().await;
    let (addr, _state) = spawn_gateway(&backend.url()).await;

    let policy = ReconnectPolicy {
        base_delay_ms: 50,
        max_delay_ms: 200,
        max_attempts: 5,
    };
    let connector = Arc::new(WsConnector::new(format!("ws://{}/", addr)));
    let mut manager = ReconnectionManager::start(connector, policy);
    let mut messages = manager.subscribe_messages();

    // Frames sent before the gateway reaches the backend are dropped.
    assert!(eventually(limit, || backend.open_connections() == 1).await);
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let hello = BotMessage::Chat {
        content: "hello".to_string(),
    };
    manager.send(hello.encode()).unwrap();
    timeout(limit, messages.wait_for(|m| m.as_ref() == Some(&hello)))
        .await
        .unwrap()
        .unwrap();

    // Backend goes away: the gateway drops the client, which reconnects on its own.
    backend.disconnect_all();
    assert!(eventually(limit, || backend.accepted() == 2).await);
    assert!(eventually(limit, || backend.open_connections() == 1).await);
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let again = BotMessage::Chat {
        content: "hello again".to_string(),
    };
    manager.send(again.encode()).unwrap();
    timeout(limit, messages.wait_for(|m| m.as_ref() == Some(&again)))
        .await
        .unwrap()
        .unwrap();

    backend.push(Message::Text("not json".to_string()));
    assert!(
        eventually(limit, || matches!(
            manager.last_error(),
            Some(ClientError::Decode(DecodeError::InvalidJson(_)))
        ))
        .await
    );

    manager.shutdown().await;
    assert!(eventually(limit, || backend.open_connections() == 0).await);
}
