//! Stream Controller
//!
//! Caller-facing API over the cache and subscriptions, plus lifecycle of the
//! background feed sessions (one tokio task per category).
//!
//! # Lifecycle
//!
//! ```text
//! STOPPED --start()--> STARTING --> RUNNING --stop()--> STOPPING --> STOPPED
//! ```
//!
//! `start()` while STARTING/RUNNING and `stop()` while STOPPED are no-ops.
//! `start()` while STOPPING is rejected so sessions are never launched on
//! top of ones still shutting down.
//!
//! Shutdown runs in its own task: a `stop()` future that is dropped early
//! still ends in STOPPED, and a later `stop()` waits for the same shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::feed_state::{ConnectionState, FeedHealth, FeedState};
use super::session::{FeedSession, SessionContext};
use crate::application::ports::{EventSink, FeedError, FeedProvider};
use crate::domain::cache::{CacheStats, EventCache};
use crate::domain::streaming::{Category, InvalidCategory, MarketEvent, Symbol};
use crate::domain::subscription::{SubscriptionSet, TotalSubscriptionStats};
use crate::infrastructure::config::SessionSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Controller timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Sleep between feed session poll cycles.
    pub poll_interval: Duration,
    /// How long `stop()` waits for sessions before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl From<&SessionSettings> for ControllerConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            shutdown_grace: settings.shutdown_grace,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControllerState {
    /// No sessions running.
    Stopped,
    /// Sessions are being launched.
    Starting,
    /// Sessions are running.
    Running,
    /// Sessions are being shut down.
    Stopping,
}

impl ControllerState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// Controller errors surfaced synchronously to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// Category name not recognized.
    #[error(transparent)]
    InvalidCategory(#[from] InvalidCategory),

    /// `start()` called while a `stop()` is still in progress.
    #[error("controller is shutting down")]
    ShuttingDown,
}

type SessionTask = (Category, JoinHandle<Result<(), FeedError>>);

struct Lifecycle {
    state: ControllerState,
    cancel: CancellationToken,
    tasks: Vec<SessionTask>,
    /// Cancelled once the in-flight shutdown reaches STOPPED.
    stopped: CancellationToken,
}

// =============================================================================
// Controller
// =============================================================================

/// Live market data cache and subscription manager.
///
/// Constructed once by the composition root and shared via `Arc`.
/// `subscribe` and `get` only touch in-memory state and never wait on the
/// network; they are safe to call from any thread, running or not.
pub struct StreamController {
    config: ControllerConfig,
    provider: Arc<dyn FeedProvider>,
    context: SessionContext,
    feed_states: [Arc<FeedState>; 3],
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl StreamController {
    /// Create a stopped controller.
    #[must_use]
    pub fn new(config: ControllerConfig, provider: Arc<dyn FeedProvider>) -> Self {
        Self {
            config,
            provider,
            context: SessionContext {
                cache: Arc::new(EventCache::new()),
                subscriptions: Arc::new(SubscriptionSet::new()),
                sink: None,
            },
            feed_states: [
                Arc::new(FeedState::new(Category::Greeks)),
                Arc::new(FeedState::new(Category::Trade)),
                Arc::new(FeedState::new(Category::Quote)),
            ],
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: ControllerState::Stopped,
                cancel: CancellationToken::new(),
                tasks: Vec::new(),
                stopped: CancellationToken::new(),
            })),
        }
    }

    /// Forward every drained event batch to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.context.sink = Some(sink);
        self
    }

    // -------------------------------------------------------------------------
    // Caller API
    // -------------------------------------------------------------------------

    /// Request streaming of `symbols` in `category`.
    ///
    /// Returns the symbols that were not already subscribed. Upstream
    /// forwarding happens on the session's next poll cycle, or after the
    /// next `start()` if the controller is stopped.
    pub fn subscribe<S: AsRef<str>>(&self, category: Category, symbols: &[S]) -> HashSet<Symbol> {
        let added = self
            .context
            .subscriptions
            .request_subscribe(category, symbols);

        if !added.is_empty() {
            tracing::debug!(
                category = %category,
                added = added.len(),
                "Subscription request recorded"
            );
        }

        added
    }

    /// Like [`subscribe`](Self::subscribe), with the category given by name.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::InvalidCategory` for an unknown name.
    pub fn subscribe_named<S: AsRef<str>>(
        &self,
        category: &str,
        symbols: &[S],
    ) -> Result<HashSet<Symbol>, ControllerError> {
        let category = category.parse::<Category>()?;
        Ok(self.subscribe(category, symbols))
    }

    /// Latest cached events for `symbols` in `category`.
    ///
    /// Symbols without an event yet are omitted. Never blocks on the network.
    #[must_use]
    pub fn get<S: AsRef<str>>(&self, category: Category, symbols: &[S]) -> Vec<MarketEvent> {
        self.context.cache.get(category, symbols)
    }

    /// Like [`get`](Self::get), with the category given by name.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::InvalidCategory` for an unknown name.
    pub fn get_named<S: AsRef<str>>(
        &self,
        category: &str,
        symbols: &[S],
    ) -> Result<Vec<MarketEvent>, ControllerError> {
        let category = category.parse::<Category>()?;
        Ok(self.get(category, symbols))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Launch one feed session per category.
    ///
    /// No-op if already starting or running. Must be called within a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::ShuttingDown` if a `stop()` is in progress.
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle.lock();

        match lifecycle.state {
            ControllerState::Starting | ControllerState::Running => return Ok(()),
            ControllerState::Stopping => return Err(ControllerError::ShuttingDown),
            ControllerState::Stopped => {}
        }

        lifecycle.state = ControllerState::Starting;
        let cancel = CancellationToken::new();

        let tasks: Vec<_> = Category::all()
            .iter()
            .map(|&category| {
                let session = FeedSession::new(
                    category,
                    self.context.clone(),
                    Arc::clone(self.feed_state(category)),
                    self.config.poll_interval,
                    cancel.clone(),
                );
                let provider = Arc::clone(&self.provider);
                (category, tokio::spawn(session.run(provider)))
            })
            .collect();

        lifecycle.cancel = cancel;
        lifecycle.tasks = tasks;
        lifecycle.state = ControllerState::Running;
        metrics::set_sessions_running(lifecycle.tasks.len());

        tracing::info!(
            sessions = lifecycle.tasks.len(),
            poll_interval = ?self.config.poll_interval,
            "Stream controller started"
        );

        Ok(())
    }

    /// Signal all sessions to stop and wait for them.
    ///
    /// Sessions still running after the grace period are aborted and their
    /// feeds marked disconnected. The cache is left intact. No-op if already
    /// stopped; joins the in-flight shutdown if one is running.
    pub async fn stop(&self) {
        let stopped = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ControllerState::Stopped => return,
                ControllerState::Stopping => lifecycle.stopped.clone(),
                ControllerState::Starting | ControllerState::Running => {
                    self.begin_shutdown(&mut lifecycle)
                }
            }
        };

        stopped.cancelled().await;
    }

    fn begin_shutdown(&self, lifecycle: &mut Lifecycle) -> CancellationToken {
        lifecycle.state = ControllerState::Stopping;
        let stopped = CancellationToken::new();
        lifecycle.stopped = stopped.clone();

        tracing::info!(
            grace_secs = self.config.shutdown_grace.as_secs(),
            "Stopping stream controller"
        );
        lifecycle.cancel.cancel();

        let sessions = std::mem::take(&mut lifecycle.tasks)
            .into_iter()
            .map(|(category, task)| (Arc::clone(self.feed_state(category)), category, task))
            .collect();

        tokio::spawn(shutdown_sessions(
            sessions,
            self.config.shutdown_grace,
            Arc::clone(&self.lifecycle),
            stopped.clone(),
        ));

        stopped
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.lifecycle.lock().state
    }

    /// Health of one category's feed session.
    #[must_use]
    pub fn health(&self, category: Category) -> FeedHealth {
        self.feed_state(category).snapshot()
    }

    /// Controller-wide status snapshot.
    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state(),
            feeds: self.feed_states.iter().map(|s| s.snapshot()).collect(),
            cache: self.context.cache.stats(),
            subscriptions: self.context.subscriptions.total_stats(),
        }
    }

    /// The shared latest-event cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<EventCache> {
        &self.context.cache
    }

    /// The shared subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionSet> {
        &self.context.subscriptions
    }

    fn feed_state(&self, category: Category) -> &Arc<FeedState> {
        match category {
            Category::Greeks => &self.feed_states[0],
            Category::Trade => &self.feed_states[1],
            Category::Quote => &self.feed_states[2],
        }
    }
}

/// Wait for sessions until `grace` elapses, abort the rest, then mark the
/// controller STOPPED.
async fn shutdown_sessions(
    sessions: Vec<(Arc<FeedState>, Category, JoinHandle<Result<(), FeedError>>)>,
    grace: Duration,
    lifecycle: Arc<Mutex<Lifecycle>>,
    stopped: CancellationToken,
) {
    let deadline = tokio::time::Instant::now() + grace;

    for (feed_state, category, mut task) in sessions {
        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                tracing::debug!(
                    category = %category,
                    error = %e,
                    "Session had already failed"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(category = %category, error = %e, "Session task failed");
                feed_state.set_state(ConnectionState::Disconnected);
            }
            Err(_) => {
                tracing::warn!(category = %category, "Session did not stop in time, aborting");
                task.abort();
                let _ = task.await;
                feed_state.set_state(ConnectionState::Disconnected);
            }
        }
    }

    metrics::set_sessions_running(0);
    lifecycle.lock().state = ControllerState::Stopped;
    stopped.cancel();
    tracing::info!("Stream controller stopped");
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    /// Lifecycle state.
    pub state: ControllerState,
    /// Per-category feed health.
    pub feeds: Vec<FeedHealth>,
    /// Cached event counts.
    pub cache: CacheStats,
    /// Subscription counts.
    pub subscriptions: TotalSubscriptionStats,
}

impl ControllerStatus {
    /// Number of categories currently streaming.
    #[must_use]
    pub fn connected_feeds(&self) -> usize {
        self.feeds
            .iter()
            .filter(|f| f.state == ConnectionState::Connected)
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::FeedHandle;

    struct IdleHandle;

    #[async_trait]
    impl FeedHandle for IdleHandle {
        async fn subscribe(&mut self, _symbols: &[Symbol]) -> Result<(), FeedError> {
            Ok(())
        }

        async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError> {
            Ok(vec![])
        }

        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct CountingProvider {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl FeedProvider for CountingProvider {
        async fn open_session(
            &self,
            _category: Category,
        ) -> Result<Box<dyn FeedHandle>, FeedError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(IdleHandle))
        }
    }

    fn controller() -> (StreamController, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider::default());
        let config = ControllerConfig {
            poll_interval: Duration::from_millis(5),
            shutdown_grace: Duration::from_secs(1),
        };
        (
            StreamController::new(config, Arc::clone(&provider) as Arc<dyn FeedProvider>),
            provider,
        )
    }

    #[test]
    fn default_config_values() {
        let config = ControllerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn subscribe_named_rejects_unknown_category() {
        let (controller, _) = controller();

        let err = controller.subscribe_named("candle", &["AAPL"]).unwrap_err();

        assert!(matches!(err, ControllerError::InvalidCategory(_)));
        assert_eq!(
            controller.subscriptions().total_stats(),
            TotalSubscriptionStats::default()
        );
    }

    #[test]
    fn get_named_parses_category() {
        let (controller, _) = controller();

        assert!(controller.get_named("quote", &["AAPL"]).unwrap().is_empty());
        assert!(controller.get_named("bars", &["AAPL"]).is_err());
    }

    #[test]
    fn subscribe_while_stopped_queues_pending() {
        let (controller, _) = controller();

        let added = controller.subscribe(Category::Quote, &["AAPL", "NVDA"]);

        assert_eq!(added.len(), 2);
        assert_eq!(controller.subscriptions().pending(Category::Quote).len(), 2);
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let (controller, provider) = controller();

        controller.stop().await;

        assert_eq!(controller.state(), ControllerState::Stopped);
        assert_eq!(provider.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_twice_opens_each_session_once() {
        let (controller, provider) = controller();

        controller.start().unwrap();
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(controller.state(), ControllerState::Running);
        assert_eq!(provider.opened.load(Ordering::SeqCst), 3);

        controller.stop().await;
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn status_reports_connected_feeds() {
        let (controller, _) = controller();

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = controller.status();
        assert_eq!(status.state, ControllerState::Running);
        assert_eq!(status.connected_feeds(), 3);

        controller.stop().await;

        for category in Category::all() {
            assert_eq!(
                controller.health(*category).state,
                ConnectionState::Disconnected
            );
        }
    }

    #[tokio::test]
    async fn restart_after_stop_opens_new_sessions() {
        let (controller, provider) = controller();

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.stop().await;
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(provider.opened.load(Ordering::SeqCst), 6);

        controller.stop().await;
    }

    struct StuckCloseHandle;

    #[async_trait]
    impl FeedHandle for StuckCloseHandle {
        async fn subscribe(&mut self, _symbols: &[Symbol]) -> Result<(), FeedError> {
            Ok(())
        }

        async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError> {
            Ok(vec![])
        }

        async fn close(&mut self) {
            std::future::pending::<()>().await;
        }
    }

    struct StuckCloseProvider;

    #[async_trait]
    impl FeedProvider for StuckCloseProvider {
        async fn open_session(
            &self,
            _category: Category,
        ) -> Result<Box<dyn FeedHandle>, FeedError> {
            Ok(Box::new(StuckCloseHandle))
        }
    }

    fn stuck_controller() -> StreamController {
        let config = ControllerConfig {
            poll_interval: Duration::from_millis(5),
            shutdown_grace: Duration::from_millis(200),
        };
        StreamController::new(config, Arc::new(StuckCloseProvider))
    }

    #[tokio::test]
    async fn abandoned_stop_still_reaches_stopped() {
        let controller = stuck_controller();
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let dropped = tokio::time::timeout(Duration::from_millis(10), controller.stop()).await;
        assert!(dropped.is_err());
        assert_eq!(controller.state(), ControllerState::Stopping);
        assert_eq!(controller.start(), Err(ControllerError::ShuttingDown));

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(controller.state(), ControllerState::Stopped);
        controller.start().unwrap();
        assert_eq!(controller.state(), ControllerState::Running);
    }

    #[tokio::test]
    async fn second_stop_waits_for_inflight_shutdown() {
        let controller = stuck_controller();
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = tokio::time::timeout(Duration::from_millis(10), controller.stop()).await;
        controller.stop().await;

        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn sessions_aborted_after_grace_report_disconnected() {
        let controller = stuck_controller();
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.status().connected_feeds(), 3);

        controller.stop().await;

        let status = controller.status();
        assert_eq!(status.state, ControllerState::Stopped);
        assert_eq!(status.connected_feeds(), 0);
        for category in Category::all() {
            assert_eq!(
                controller.health(*category).state,
                ConnectionState::Disconnected
            );
        }
    }

    #[test]
    fn controller_state_names() {
        assert_eq!(ControllerState::Stopped.as_str(), "stopped");
        assert_eq!(ControllerState::Running.as_str(), "running");
        assert_eq!(
            serde_json::to_string(&ControllerState::Stopping).unwrap(),
            "\"STOPPING\""
        );
    }
}
