use crate::config::LiveConfig;
use crate::feed::model::FeedSnapshot;
use crate::live::merger::UpdateMerger;
use crate::live::message::{parse_push_frame, PushMessage};
use crate::metrics::SharedMetrics;
use futures::StreamExt;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Normal closure, requested by this side.
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal closure, the stream ended or errored without a goodbye.
pub const CLOSE_ABNORMAL: u16 = 1006;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    fn gauge_value(&self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast to subscribers of the live channel.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Subscription accepted by the server.
    Connected { client_id: Option<String> },
    /// Full snapshot received and merged into the cache.
    Snapshot(FeedSnapshot),
    /// Incremental update received and merged into the cache.
    Update(FeedSnapshot),
    /// Error reported by the server over the channel.
    ChannelError { message: String },
    /// Channel closed; 1000 is a manual close, 1006 an abnormal one.
    Disconnected { code: u16 },
    /// A reconnect attempt has been scheduled after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// All reconnect attempts exhausted; the channel stays down.
    GaveUp { attempts: u32 },
}

enum StreamOutcome {
    /// The cancellation token fired.
    Cancelled,
    /// The stream ended or failed; the caller decides whether to retry.
    Lost,
}

struct LiveShared {
    http: Client,
    push_url: String,
    config: LiveConfig,
    merger: UpdateMerger,
    metrics: SharedMetrics,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<LiveEvent>,
}

struct Session {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client for the server's push channel.
///
/// `connect` spawns a background task that owns the whole lifecycle:
/// connect, stream, reconnect with exponential backoff, give up. State
/// is observable through a watch channel and decoded messages are
/// broadcast as [`LiveEvent`]s. `disconnect` cancels the task and waits
/// for it to finish.
pub struct LiveClient {
    shared: Arc<LiveShared>,
    session: Mutex<Option<Session>>,
}

impl LiveClient {
    pub fn new(
        push_url: String,
        config: LiveConfig,
        merger: UpdateMerger,
        metrics: SharedMetrics,
    ) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(LiveShared {
                http,
                push_url,
                config,
                merger,
                metrics,
                state_tx,
                events_tx,
            }),
            session: Mutex::new(None),
        }
    }

    /// Start the channel. A second call while the task is still running
    /// is a no-op.
    pub async fn connect(&self) {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Live channel already running");
                return;
            }
        }

        let token = CancellationToken::new();
        let shared = self.shared.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            run_channel(shared, task_token).await;
        });
        *session = Some(Session { token, handle });
    }

    /// Stop the channel. Cancels any in-flight stream and any pending
    /// reconnect timer, then waits for the task to exit.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.token.cancel();
            if let Err(e) = session.handle.await {
                warn!(error = %e, "Live channel task failed to shut down cleanly");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to channel events. Slow subscribers may miss events;
    /// the cache itself is always current.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.shared.events_tx.subscribe()
    }
}

async fn run_channel(shared: Arc<LiveShared>, token: CancellationToken) {
    let mut failures: u32 = 0;

    loop {
        if failures > 0 {
            if failures >= shared.config.max_attempts {
                warn!(attempts = failures, "Live channel exhausted its reconnect attempts");
                shared.set_state(ConnectionState::Disconnected);
                shared.emit(LiveEvent::GaveUp { attempts: failures });
                return;
            }

            let delay = reconnect_delay(&shared.config, failures - 1);
            shared.set_state(ConnectionState::Reconnecting);
            shared.metrics.record_reconnect();
            shared.emit(LiveEvent::ReconnectScheduled {
                attempt: failures,
                delay,
            });
            info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Scheduling live channel reconnect"
            );

            tokio::select! {
                _ = token.cancelled() => {
                    shared.close(CLOSE_NORMAL);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        shared.set_state(ConnectionState::Connecting);
        match shared.stream_once(&token, &mut failures).await {
            StreamOutcome::Cancelled => {
                shared.close(CLOSE_NORMAL);
                return;
            }
            StreamOutcome::Lost => {
                if *shared.state_tx.borrow() == ConnectionState::Connected {
                    shared.emit(LiveEvent::Disconnected {
                        code: CLOSE_ABNORMAL,
                    });
                }
                failures += 1;
            }
        }
    }
}

/// Backoff for the given number of elapsed failures: the base delay
/// doubled per failure, capped at the configured maximum.
fn reconnect_delay(config: &LiveConfig, exponent: u32) -> Duration {
    let base = config.base_delay.as_millis() as u64;
    let max = config.max_delay.as_millis() as u64;
    let delay = base
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(max);
    Duration::from_millis(delay)
}

impl LiveShared {
    /// One connection attempt: subscribe, then pump frames until the
    /// stream ends, errors, or the token fires.
    async fn stream_once(&self, token: &CancellationToken, failures: &mut u32) -> StreamOutcome {
        info!(url = %self.push_url, "Connecting to live channel");

        let response = tokio::select! {
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            result = self.http.get(&self.push_url).send() => match result {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(status = %r.status(), "Live channel rejected the subscription");
                    return StreamOutcome::Lost;
                }
                Err(e) => {
                    warn!(error = %e, "Live channel connection failed");
                    return StreamOutcome::Lost;
                }
            }
        };

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => return StreamOutcome::Cancelled,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some((data, remaining)) = parse_push_frame(&buffer) {
                            buffer = remaining;
                            if data.is_empty() {
                                continue;
                            }
                            self.handle_message(&data, failures).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Live channel stream error");
                        return StreamOutcome::Lost;
                    }
                    None => {
                        info!("Live channel stream ended");
                        return StreamOutcome::Lost;
                    }
                }
            }
        }
    }

    /// Decode one frame and act on it. A frame that does not decode is
    /// dropped; the connection stays up.
    async fn handle_message(&self, data: &str, failures: &mut u32) {
        let message = match PushMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_push_message("malformed");
                warn!(error = %e, "Dropping malformed push message");
                return;
            }
        };
        self.metrics.record_push_message(message.kind());

        match message {
            PushMessage::ConnectionEstablished { client_id } => {
                *failures = 0;
                self.set_state(ConnectionState::Connected);
                info!(
                    client_id = client_id.as_deref().unwrap_or("unknown"),
                    "Live channel established"
                );
                self.emit(LiveEvent::Connected { client_id });
            }
            PushMessage::InitialData { data } => {
                let written = self.merger.apply(&data).await;
                debug!(written, summary = %data.summary(), "Merged initial snapshot");
                self.emit(LiveEvent::Snapshot(data));
            }
            PushMessage::LiveUpdate { data } => {
                let written = self.merger.apply(&data).await;
                debug!(written, summary = %data.summary(), "Merged live update");
                self.emit(LiveEvent::Update(data));
            }
            PushMessage::Error { message } => {
                warn!(message = %message, "Live channel reported an error");
                self.emit(LiveEvent::ChannelError { message });
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
        self.metrics.set_connection_state(state.gauge_value());
    }

    fn emit(&self, event: LiveEvent) {
        // Nobody listening is fine; the cache is the source of truth.
        let _ = self.events_tx.send(event);
    }

    fn close(&self, code: u16) {
        self.set_state(ConnectionState::Disconnected);
        self.emit(LiveEvent::Disconnected { code });
        info!(code, "Live channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{CacheKey, DataKind};
    use crate::cache::store::TtlStore;
    use crate::config::CacheConfig;
    use crate::metrics::create_metrics;

    // Nothing listens on this port, so every attempt fails fast.
    const DEAD_URL: &str = "http://127.0.0.1:1/api/news/stream";

    fn test_client(config: LiveConfig) -> (LiveClient, TtlStore) {
        let store = TtlStore::new();
        let metrics = create_metrics();
        let merger = UpdateMerger::new(store.clone(), CacheConfig::default(), metrics.clone());
        let client = LiveClient::new(DEAD_URL.to_string(), config, merger, metrics);
        (client, store)
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let config = LiveConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        };

        let delays: Vec<u64> = (0..7)
            .map(|n| reconnect_delay(&config, n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn backoff_does_not_overflow_on_large_exponents() {
        let config = LiveConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        };
        assert_eq!(reconnect_delay(&config, 200), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn gives_up_after_the_configured_attempts() {
        let (client, _store) = test_client(LiveConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
            max_attempts: 3,
        });
        let mut events = client.subscribe();

        client.connect().await;

        let mut scheduled = Vec::new();
        let mut gave_up = None;
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Ok(LiveEvent::ReconnectScheduled { attempt, delay })) => {
                    scheduled.push((attempt, delay));
                }
                Ok(Ok(LiveEvent::GaveUp { attempts })) => {
                    gave_up = Some(attempts);
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }

        assert_eq!(
            scheduled,
            vec![
                (1, Duration::from_millis(5)),
                (2, Duration::from_millis(10)),
            ]
        );
        assert_eq!(gave_up, Some(3));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_cancels_a_pending_reconnect() {
        let (client, _store) = test_client(LiveConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(120),
            max_attempts: 5,
        });
        let mut events = client.subscribe();
        let mut states = client.watch_state();

        client.connect().await;

        // The first attempt fails fast, leaving a 60s reconnect timer.
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Reconnecting),
        )
        .await
        .expect("never reached reconnecting")
        .expect("state channel closed");

        tokio::time::timeout(Duration::from_secs(2), client.disconnect())
            .await
            .expect("disconnect did not cancel the timer");
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let mut saw_manual_close = false;
        while let Ok(event) = events.try_recv() {
            if let LiveEvent::Disconnected { code } = event {
                assert_eq!(code, CLOSE_NORMAL);
                saw_manual_close = true;
            }
        }
        assert!(saw_manual_close);
    }

    #[tokio::test]
    async fn connect_twice_keeps_one_task() {
        let (client, _store) = test_client(LiveConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(120),
            max_attempts: 5,
        });

        client.connect().await;
        client.connect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn messages_drive_state_and_the_cache() {
        let (client, store) = test_client(LiveConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        });
        let mut events = client.subscribe();
        let shared = &client.shared;
        let mut failures = 3;

        shared
            .handle_message(
                r#"{"type": "connection_established", "client_id": "c1"}"#,
                &mut failures,
            )
            .await;
        assert_eq!(failures, 0);
        assert!(client.is_connected());
        assert!(matches!(
            events.try_recv(),
            Ok(LiveEvent::Connected { client_id: Some(_) })
        ));

        shared
            .handle_message(
                r#"{"type": "initial_data", "data": {"latest_news": [{"id": "n1", "title": "t"}]}}"#,
                &mut failures,
            )
            .await;
        assert!(matches!(events.try_recv(), Ok(LiveEvent::Snapshot(_))));
        assert!(store.peek(&CacheKey::root(DataKind::LatestNews)).await.is_some());

        // A malformed frame is dropped without touching anything.
        shared.handle_message("not json at all", &mut failures).await;
        assert!(events.try_recv().is_err());
        assert_eq!(client.state(), ConnectionState::Connected);

        shared
            .handle_message(r#"{"type": "error", "message": "backend hiccup"}"#, &mut failures)
            .await;
        assert!(matches!(
            events.try_recv(),
            Ok(LiveEvent::ChannelError { .. })
        ));
    }
}
