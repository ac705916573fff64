use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RECONNECT_DELAY_SECS;
use crate::types::Topic;
use crate::ws::connection::{ConnCommand, ConnectionHandle, WsConnection};
use crate::ws::router::EventRouter;

type NewConnection = (ConnectionHandle, mpsc::UnboundedReceiver<ConnCommand>);

/// Connection selection state. Every mutation happens under the pool mutex so that
/// "pick current or create" and the topic append are one step.
#[derive(Default)]
struct PoolInner {
    current: Option<ConnectionHandle>,
    live: HashMap<u64, ConnectionHandle>,
    next_id: u64,
}

impl PoolInner {
    /// Places `topic` on the current connection, creating one when there is none,
    /// it is full, or it died. Returns the new connection for the caller to start.
    fn assign(&mut self, topic: Topic) -> Option<NewConnection> {
        let reusable = self
            .current
            .as_ref()
            .filter(|c| !c.is_full() && !c.is_closed())
            .cloned();

        match reusable {
            Some(conn) => {
                conn.add_topic(topic);
                None
            }
            None => {
                self.next_id += 1;
                let (conn, rx) = ConnectionHandle::new(self.next_id);
                conn.add_topic(topic);
                self.live.insert(conn.id, conn.clone());
                self.current = Some(conn.clone());
                Some((conn, rx))
            }
        }
    }

    /// Drops a dead connection and takes ownership of its topics.
    fn retire(&mut self, conn_id: u64) -> Vec<Topic> {
        let Some(conn) = self.live.remove(&conn_id) else {
            return Vec::new();
        };
        if self.current.as_ref().is_some_and(|c| c.id == conn_id) {
            self.current = None;
        }
        conn.take_topics()
    }
}

/// Shards topics over pub/sub connections of at most 50 topics each.
pub struct WsPool {
    inner: Mutex<PoolInner>,
    ws_url: String,
    auth_token: String,
    router: Arc<EventRouter>,
    shutdown: CancellationToken,
}

impl WsPool {
    pub fn new(
        ws_url: String,
        auth_token: String,
        router: Arc<EventRouter>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner::default()),
            ws_url,
            auth_token,
            router,
            shutdown,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connection_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Subscribes `topic` on some connection, starting a new one when needed.
    pub fn submit(self: &Arc<Self>, topic: Topic) {
        let created = self.lock().assign(topic);
        if let Some((conn, rx)) = created {
            self.spawn_connection(conn, rx);
        }
    }

    fn spawn_connection(self: &Arc<Self>, conn: ConnectionHandle, rx: mpsc::UnboundedReceiver<ConnCommand>) {
        let pool = Arc::clone(self);
        let task = WsConnection::new(
            conn,
            rx,
            self.ws_url.clone(),
            self.auth_token.clone(),
            Arc::clone(&self.router),
            self.shutdown.clone(),
        );
        tokio::spawn(async move {
            let conn_id = task.id();
            match task.run().await {
                Ok(()) => info!(conn = conn_id, "WS connection closed"),
                Err(e) => warn!(conn = conn_id, "WS connection error: {e}"),
            }
            pool.handle_disconnect(conn_id).await;
        });
    }

    /// Waits the fixed backoff, then resubmits every topic the dead connection owned.
    async fn handle_disconnect(self: &Arc<Self>, conn_id: u64) {
        for topic in self.reclaim(conn_id).await {
            self.submit(topic);
        }
    }

    /// Retires the connection and hands back its topics once the backoff has run.
    /// Empty when the connection was already retired or the pool shut down.
    async fn reclaim(&self, conn_id: u64) -> Vec<Topic> {
        let (topics, keepalive) = {
            let mut inner = self.lock();
            let keepalive = inner.live.get(&conn_id).map(|c| c.keepalive());
            (inner.retire(conn_id), keepalive)
        };
        if self.shutdown.is_cancelled() || topics.is_empty() {
            return Vec::new();
        }

        if let Some((last_ping, last_pong)) = keepalive {
            info!(
                conn = conn_id,
                last_ping_secs = ?last_ping.map(|t| t.elapsed().as_secs()),
                last_pong_secs = ?last_pong.map(|t| t.elapsed().as_secs()),
                "WS reconnecting {} topic(s) in {RECONNECT_DELAY_SECS}s",
                topics.len()
            );
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => Vec::new(),
            _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => topics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bet::{BetEngine, BetSettings};
    use crate::config::MAX_TOPICS_PER_CONNECTION;
    use crate::prediction::PredictionTracker;
    use crate::refresh::ChannelRefresher;
    use crate::state::ChannelStore;
    use crate::testing::FakeApi;
    use crate::types::TopicKind;
    use crate::ws::router::RouterSettings;

    fn topic(i: usize) -> Topic {
        Topic::channel(TopicKind::VideoPlayback, &i.to_string())
    }

    fn pool(shutdown: CancellationToken) -> Arc<WsPool> {
        let api = FakeApi::new();
        let store = ChannelStore::new(Vec::new());
        let refresher = Arc::new(ChannelRefresher::new(store.clone(), api.clone()));
        let predictions =
            PredictionTracker::new(store.clone(), api.clone(), BetEngine::new(BetSettings::default()), shutdown.clone());
        let router = Arc::new(EventRouter::new(store, api, refresher, predictions, RouterSettings::default()));
        WsPool::new("ws://127.0.0.1:1".to_string(), "token".to_string(), router, shutdown)
    }

    /// Three topics on one connection; returns its id.
    fn seed(pool: &WsPool) -> u64 {
        let (conn, _rx) = pool.lock().assign(topic(0)).unwrap();
        for i in 1..3 {
            assert!(pool.lock().assign(topic(i)).is_none());
        }
        conn.id
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn shards_topics_at_fifty_per_connection() {
        let mut inner = PoolInner::default();
        let mut created = Vec::new();
        for i in 0..120 {
            if let Some((conn, _rx)) = inner.assign(topic(i)) {
                created.push(conn);
            }
        }

        assert_eq!(created.len(), 3);
        assert_eq!(
            created.iter().map(|c| c.topic_count()).collect::<Vec<_>>(),
            vec![MAX_TOPICS_PER_CONNECTION, MAX_TOPICS_PER_CONNECTION, 20]
        );
    }

    #[test]
    fn retired_topics_are_handed_back_exactly_once() {
        let mut inner = PoolInner::default();
        let (first, _rx) = inner.assign(topic(0)).unwrap();
        for i in 1..5 {
            assert!(inner.assign(topic(i)).is_none());
        }

        let topics = inner.retire(first.id);
        assert_eq!(topics.len(), 5);
        assert!(inner.retire(first.id).is_empty());
        assert!(inner.current.is_none());

        // resubmission lands on a fresh connection
        let mut fresh = Vec::new();
        for t in topics {
            if let Some((conn, _rx)) = inner.assign(t) {
                fresh.push(conn);
            }
        }
        assert_eq!(fresh.len(), 1);
        assert_ne!(fresh[0].id, first.id);
        assert_eq!(fresh[0].topic_count(), 5);
    }

    #[test]
    fn retiring_an_older_connection_keeps_current() {
        let mut inner = PoolInner::default();
        let (first, _rx1) = inner.assign(topic(0)).unwrap();
        for i in 1..MAX_TOPICS_PER_CONNECTION {
            inner.assign(topic(i));
        }
        let (second, _rx2) = inner.assign(topic(100)).unwrap();

        assert_eq!(inner.retire(first.id).len(), MAX_TOPICS_PER_CONNECTION);
        assert_eq!(inner.current.as_ref().map(|c| c.id), Some(second.id));
        assert!(inner.assign(topic(101)).is_none());
        assert_eq!(second.topic_count(), 2);
    }

    #[test]
    fn closed_current_is_replaced() {
        let mut inner = PoolInner::default();
        let (first, _rx) = inner.assign(topic(0)).unwrap();
        first.take_topics();
        assert!(inner.assign(topic(1)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn topics_come_back_after_the_fixed_backoff() {
        let pool = pool(CancellationToken::new());
        let conn_id = seed(&pool);

        let task = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.reclaim(conn_id).await }
        });
        settle().await;
        assert_eq!(pool.connection_count(), 0, "retired right away");

        tokio::time::advance(Duration::from_secs(RECONNECT_DELAY_SECS - 1)).await;
        settle().await;
        assert!(!task.is_finished());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert!(task.is_finished());
        assert_eq!(task.await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_disconnect_hands_topics_back_once() {
        let pool = pool(CancellationToken::new());
        let conn_id = seed(&pool);

        let first = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.reclaim(conn_id).await }
        });
        settle().await;

        let started = tokio::time::Instant::now();
        assert!(pool.reclaim(conn_id).await.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO, "no backoff without topics");

        tokio::time::advance(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        assert_eq!(first.await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_resubmits_nothing() {
        let shutdown = CancellationToken::new();
        let pool = pool(shutdown.clone());
        let conn_id = seed(&pool);

        let task = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.handle_disconnect(conn_id).await }
        });
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;

        let started = tokio::time::Instant::now();
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(pool.connection_count(), 0);
        assert!(pool.lock().current.is_none());
    }
}
