use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MAX_TOPICS_PER_CONNECTION, WS_PING_INTERVAL_SECS};
use crate::error::{AppError, Result};
use crate::types::Topic;
use crate::ws::messages::{build_listen_msg, build_ping_msg};
use crate::ws::router::{Deduplicator, EventRouter, FrameOutcome};

#[derive(Debug)]
pub enum ConnCommand {
    Listen(Topic),
}

/// Bookkeeping for one socket, shared between the pool and the socket task.
#[derive(Debug, Default)]
struct ConnectionState {
    topics: Vec<Topic>,
    /// Accepted before the socket opened; flushed on open.
    pending_topics: Vec<Topic>,
    opened: bool,
    closed: bool,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

/// Pool-side view of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    state: Arc<Mutex<ConnectionState>>,
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
}

impl ConnectionHandle {
    pub fn new(id: u64) -> (Self, mpsc::UnboundedReceiver<ConnCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = Self { id, state: Arc::new(Mutex::new(ConnectionState::default())), cmd_tx };
        (handle, cmd_rx)
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    pub fn is_full(&self) -> bool {
        self.topic_count() >= MAX_TOPICS_PER_CONNECTION
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Records ownership; the LISTEN goes out now if the socket is open, else on open.
    pub fn add_topic(&self, topic: Topic) {
        let mut state = self.lock();
        state.topics.push(topic.clone());
        if state.opened {
            let _ = self.cmd_tx.send(ConnCommand::Listen(topic));
        } else {
            state.pending_topics.push(topic);
        }
    }

    /// Marks the connection closed and hands its topics back. Empty on every later call.
    pub fn take_topics(&self) -> Vec<Topic> {
        let mut state = self.lock();
        state.closed = true;
        state.pending_topics.clear();
        std::mem::take(&mut state.topics)
    }

    fn mark_opened(&self) -> Vec<Topic> {
        let mut state = self.lock();
        state.opened = true;
        std::mem::take(&mut state.pending_topics)
    }

    fn record_ping(&self) {
        self.lock().last_ping = Some(Instant::now());
    }

    fn record_pong(&self) {
        self.lock().last_pong = Some(Instant::now());
    }

    /// `(last_ping, last_pong)`; informational only, the socket close is authoritative.
    pub fn keepalive(&self) -> (Option<Instant>, Option<Instant>) {
        let state = self.lock();
        (state.last_ping, state.last_pong)
    }
}

/// Socket task for one pub/sub connection.
pub struct WsConnection {
    handle: ConnectionHandle,
    cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
    ws_url: String,
    auth_token: String,
    router: Arc<EventRouter>,
    shutdown: CancellationToken,
}

impl WsConnection {
    pub fn new(
        handle: ConnectionHandle,
        cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
        ws_url: String,
        auth_token: String,
        router: Arc<EventRouter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { handle, cmd_rx, ws_url, auth_token, router, shutdown }
    }

    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// Runs until the socket closes, errors, or the server asks for a reconnect.
    pub async fn run(mut self) -> Result<()> {
        let id = self.handle.id;
        info!(conn = id, "WS connecting to {}", self.ws_url);
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let pending = self.handle.mark_opened();
        write.send(Message::Text(build_ping_msg())).await?;
        self.handle.record_ping();
        for topic in &pending {
            write.send(Message::Text(build_listen_msg(topic, &self.auth_token))).await?;
        }
        info!(conn = id, "WS opened, listening to {} topic(s)", pending.len());

        let mut dedup = Deduplicator::new();
        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.router.handle_frame(&text, &mut dedup, Instant::now()).await {
                                FrameOutcome::Continue => {}
                                FrameOutcome::Pong => self.handle.record_pong(),
                                FrameOutcome::Reconnect(reason) => {
                                    return Err(AppError::Protocol(reason));
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!(conn = id, "WS ping");
                    write.send(Message::Text(build_ping_msg())).await?;
                    self.handle.record_ping();
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCommand::Listen(topic)) => {
                            write.send(Message::Text(build_listen_msg(&topic, &self.auth_token))).await?;
                            debug!(conn = id, %topic, "WS listen");
                        }
                        None => {
                            warn!(conn = id, "command channel dropped");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
