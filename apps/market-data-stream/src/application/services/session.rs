//! Feed Session
//!
//! Owns the upstream connection for one category. Each cycle forwards newly
//! requested symbols, drains available events into the cache (and the
//! optional sink), then sleeps for the poll interval or until cancelled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::feed_state::{ConnectionState, FeedState};
use crate::application::ports::{EventSink, FeedError, FeedHandle, FeedProvider};
use crate::domain::cache::EventCache;
use crate::domain::streaming::{Category, Symbol};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::metrics;

/// Shared state a session reads from and writes to.
#[derive(Clone)]
pub struct SessionContext {
    /// Latest-event cache the session writes into.
    pub cache: Arc<EventCache>,
    /// Subscription bookkeeping the session drains.
    pub subscriptions: Arc<SubscriptionSet>,
    /// Optional persistence sink for drained batches.
    pub sink: Option<Arc<dyn EventSink>>,
}

/// Runs one category's upstream session until cancelled or the connection
/// is lost.
pub struct FeedSession {
    category: Category,
    session_id: Uuid,
    context: SessionContext,
    feed_state: Arc<FeedState>,
    poll_interval: Duration,
    cancel: CancellationToken,
    forwarded: usize,
}

impl FeedSession {
    /// Create a session for `category`.
    #[must_use]
    pub fn new(
        category: Category,
        context: SessionContext,
        feed_state: Arc<FeedState>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            category,
            session_id: Uuid::new_v4(),
            context,
            feed_state,
            poll_interval,
            cancel,
            forwarded: 0,
        }
    }

    /// Open the upstream session and run the poll loop.
    ///
    /// Returns `Ok(())` when cancelled.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ConnectionLost` if the upstream connection could
    /// not be opened or dropped while streaming. The feed state is set to
    /// `Error` before returning; the cache keeps its last contents.
    pub async fn run(mut self, provider: Arc<dyn FeedProvider>) -> Result<(), FeedError> {
        self.feed_state.set_state(ConnectionState::Connecting);
        tracing::info!(
            category = %self.category,
            session_id = %self.session_id,
            "Opening feed session"
        );

        let opened = tokio::select! {
            () = self.cancel.cancelled() => {
                self.feed_state.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
            opened = provider.open_session(self.category) => opened,
        };

        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        self.feed_state.set_state(ConnectionState::Connected);
        self.feed_state.set_subscription_count(0);

        // A fresh upstream session knows nothing; stream everything so far.
        let initial = self.context.subscriptions.resync(self.category);

        let result = self.stream(handle.as_mut(), initial).await;
        handle.close().await;

        match result {
            Ok(()) => {
                self.feed_state.set_state(ConnectionState::Disconnected);
                tracing::info!(
                    category = %self.category,
                    session_id = %self.session_id,
                    forwarded = self.forwarded,
                    "Feed session stopped"
                );
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn stream(
        &mut self,
        handle: &mut dyn FeedHandle,
        initial: HashSet<Symbol>,
    ) -> Result<(), FeedError> {
        self.forward(handle, initial).await?;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let started = Instant::now();

            let pending = self.context.subscriptions.drain_pending(self.category);
            self.forward(handle, pending).await?;
            self.drain_events(handle).await?;

            metrics::record_poll_cycle(self.category, started.elapsed());

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Issue an upstream subscribe for `symbols`.
    ///
    /// A transient failure puts the symbols back into pending for the next
    /// cycle; only a lost connection is returned as an error.
    async fn forward(
        &mut self,
        handle: &mut dyn FeedHandle,
        symbols: HashSet<Symbol>,
    ) -> Result<(), FeedError> {
        if symbols.is_empty() {
            return Ok(());
        }

        let mut batch: Vec<Symbol> = symbols.into_iter().collect();
        batch.sort_unstable();

        let result = tokio::select! {
            () = self.cancel.cancelled() => {
                // Left pending; a new session resyncs the full set.
                self.context.subscriptions.requeue(self.category, batch);
                return Ok(());
            }
            result = handle.subscribe(&batch) => result,
        };

        match result {
            Ok(()) => {
                self.forwarded += batch.len();
                self.feed_state.set_subscription_count(self.forwarded);
                metrics::record_symbols_forwarded(self.category, batch.len());
                metrics::set_subscribed_symbols(
                    self.category,
                    self.context
                        .subscriptions
                        .stats(self.category)
                        .subscribed_count,
                );
                tracing::debug!(
                    category = %self.category,
                    count = batch.len(),
                    "Forwarded symbols upstream"
                );
                Ok(())
            }
            Err(e @ FeedError::SubscribeFailed(_)) => {
                let count = batch.len();
                self.context.subscriptions.requeue(self.category, batch);
                self.feed_state.increment_subscribe_failures();
                metrics::record_feed_error(self.category, e.kind());
                tracing::warn!(
                    category = %self.category,
                    count,
                    error = %e,
                    "Upstream subscribe failed, retrying next cycle"
                );
                Ok(())
            }
            Err(e) => {
                // Keep the symbols so a restarted session still sees them.
                self.context.subscriptions.requeue(self.category, batch);
                Err(e)
            }
        }
    }

    async fn drain_events(&self, handle: &mut dyn FeedHandle) -> Result<(), FeedError> {
        let events = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            events = handle.poll_events() => events?,
        };
        if events.is_empty() {
            return Ok(());
        }

        let count = events.len();

        // The cache never waits on the sink.
        let applied = self.context.cache.put_all(events.iter().cloned());
        self.feed_state.record_events(count);
        metrics::record_events_received(self.category, count);
        metrics::record_events_cached(self.category, applied);

        if let Some(sink) = &self.context.sink {
            let persisted = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                persisted = sink.persist(self.category, &events) => persisted,
            };
            if let Err(e) = persisted {
                metrics::record_sink_failure(self.category);
                tracing::warn!(
                    category = %self.category,
                    count,
                    error = %e,
                    "Failed to persist events"
                );
            }
        }

        Ok(())
    }

    fn fail(&self, error: &FeedError) {
        self.feed_state.set_error(error.to_string());
        metrics::record_feed_error(self.category, error.kind());
        if error.is_fatal() {
            metrics::record_connection_lost(self.category);
        }
        tracing::error!(
            category = %self.category,
            session_id = %self.session_id,
            error = %error,
            "Feed session terminated"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::SinkError;
    use crate::domain::streaming::{MarketEvent, QuoteEvent};

    #[derive(Default)]
    struct Script {
        subscribe_results: VecDeque<Result<(), FeedError>>,
        poll_results: VecDeque<Result<Vec<MarketEvent>, FeedError>>,
        subscribed: Vec<Vec<Symbol>>,
        closed: bool,
    }

    struct ScriptedHandle(Arc<Mutex<Script>>);

    #[async_trait]
    impl FeedHandle for ScriptedHandle {
        async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
            let mut script = self.0.lock();
            script.subscribed.push(symbols.to_vec());
            script.subscribe_results.pop_front().unwrap_or(Ok(()))
        }

        async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError> {
            self.0.lock().poll_results.pop_front().unwrap_or(Ok(vec![]))
        }

        async fn close(&mut self) {
            self.0.lock().closed = true;
        }
    }

    struct ScriptedProvider(Arc<Mutex<Script>>);

    #[async_trait]
    impl FeedProvider for ScriptedProvider {
        async fn open_session(
            &self,
            _category: Category,
        ) -> Result<Box<dyn FeedHandle>, FeedError> {
            Ok(Box::new(ScriptedHandle(Arc::clone(&self.0))))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl FeedProvider for FailingProvider {
        async fn open_session(
            &self,
            _category: Category,
        ) -> Result<Box<dyn FeedHandle>, FeedError> {
            Err(FeedError::ConnectionLost("refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn persist(
            &self,
            _category: Category,
            events: &[MarketEvent],
        ) -> Result<(), SinkError> {
            self.batches.lock().push(events.len());
            if self.fail {
                return Err(SinkError::WriteFailed("disk full".to_string()));
            }
            Ok(())
        }
    }

    struct SlowSink {
        delay: Duration,
        batches: Mutex<usize>,
    }

    #[async_trait]
    impl EventSink for SlowSink {
        async fn persist(
            &self,
            _category: Category,
            _events: &[MarketEvent],
        ) -> Result<(), SinkError> {
            tokio::time::sleep(self.delay).await;
            *self.batches.lock() += 1;
            Ok(())
        }
    }

    /// Handle whose upstream subscribe never completes.
    struct StalledHandle {
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl FeedHandle for StalledHandle {
        async fn subscribe(&mut self, _symbols: &[Symbol]) -> Result<(), FeedError> {
            std::future::pending().await
        }

        async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError> {
            std::future::pending().await
        }

        async fn close(&mut self) {
            *self.closed.lock() = true;
        }
    }

    struct StalledProvider {
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl FeedProvider for StalledProvider {
        async fn open_session(
            &self,
            _category: Category,
        ) -> Result<Box<dyn FeedHandle>, FeedError> {
            Ok(Box::new(StalledHandle {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn quote(symbol: &str) -> MarketEvent {
        MarketEvent::Quote(QuoteEvent {
            symbol: symbol.to_string(),
            bid_price: Decimal::from(10),
            bid_size: Decimal::ONE,
            ask_price: Decimal::from(11),
            ask_size: Decimal::ONE,
            bid_exchange: None,
            ask_exchange: None,
            timestamp: Utc::now(),
        })
    }

    fn context(sink: Option<Arc<dyn EventSink>>) -> SessionContext {
        SessionContext {
            cache: Arc::new(EventCache::new()),
            subscriptions: Arc::new(SubscriptionSet::new()),
            sink,
        }
    }

    fn session(
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> (FeedSession, Arc<FeedState>) {
        let state = Arc::new(FeedState::new(Category::Quote));
        let session = FeedSession::new(
            Category::Quote,
            context.clone(),
            Arc::clone(&state),
            Duration::from_millis(5),
            cancel.clone(),
        );
        (session, state)
    }

    async fn run_briefly(
        session: FeedSession,
        provider: Arc<dyn FeedProvider>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        let task = tokio::spawn(session.run(provider));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap()
    }

    #[tokio::test]
    async fn forwards_pending_and_caches_events() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().poll_results.push_back(Ok(vec![quote("IBM")]));
        let ctx = context(None);
        ctx.subscriptions.request_subscribe(Category::Quote, &["IBM"]);

        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));

        run_briefly(session, provider, cancel).await.unwrap();

        let script = script.lock();
        assert_eq!(script.subscribed, vec![vec!["IBM".to_string()]]);
        assert!(script.closed);
        assert_eq!(ctx.cache.get(Category::Quote, &["IBM"]).len(), 1);
        assert_eq!(state.get_state(), ConnectionState::Disconnected);
        assert_eq!(state.get_events_received(), 1);
    }

    #[tokio::test]
    async fn subscribe_failure_is_retried() {
        let script = Arc::new(Mutex::new(Script::default()));
        script
            .lock()
            .subscribe_results
            .push_back(Err(FeedError::SubscribeFailed("busy".to_string())));
        let ctx = context(None);
        ctx.subscriptions.request_subscribe(Category::Quote, &["AAPL"]);

        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));

        run_briefly(session, provider, cancel).await.unwrap();

        let script = script.lock();
        assert_eq!(script.subscribed.len(), 2);
        assert_eq!(script.subscribed[1], vec!["AAPL".to_string()]);
        assert!(ctx.subscriptions.pending(Category::Quote).is_empty());
        assert_eq!(state.snapshot().subscribe_failures, 1);
    }

    #[tokio::test]
    async fn connection_lost_stops_session_and_keeps_cache() {
        let script = Arc::new(Mutex::new(Script::default()));
        {
            let mut s = script.lock();
            s.poll_results.push_back(Ok(vec![quote("IBM")]));
            s.poll_results
                .push_back(Err(FeedError::ConnectionLost("eof".to_string())));
        }
        let ctx = context(None);

        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));

        let result = tokio::time::timeout(Duration::from_secs(2), session.run(provider))
            .await
            .unwrap();

        assert_eq!(result, Err(FeedError::ConnectionLost("eof".to_string())));
        assert_eq!(state.get_state(), ConnectionState::Error);
        assert!(script.lock().closed);
        assert_eq!(ctx.cache.get(Category::Quote, &["IBM"]).len(), 1);
    }

    #[tokio::test]
    async fn connection_lost_during_subscribe_keeps_symbols_pending() {
        let script = Arc::new(Mutex::new(Script::default()));
        script
            .lock()
            .subscribe_results
            .push_back(Err(FeedError::ConnectionLost("reset".to_string())));
        let ctx = context(None);
        ctx.subscriptions.request_subscribe(Category::Quote, &["AAPL"]);

        let cancel = CancellationToken::new();
        let (session, _state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));

        let result = session.run(provider).await;

        assert!(result.is_err());
        assert!(ctx.subscriptions.pending(Category::Quote).contains("AAPL"));
    }

    #[tokio::test]
    async fn open_failure_sets_error_state() {
        let ctx = context(None);
        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);

        let result = session.run(Arc::new(FailingProvider)).await;

        assert!(matches!(result, Err(FeedError::ConnectionLost(_))));
        assert_eq!(state.get_state(), ConnectionState::Error);
        assert_eq!(
            state.get_error().as_deref(),
            Some("upstream connection lost: refused")
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_immediately() {
        let script = Arc::new(Mutex::new(Script::default()));
        let ctx = context(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));

        session.run(provider).await.unwrap();

        assert_eq!(state.get_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn sink_receives_batches_and_failures_are_not_fatal() {
        let script = Arc::new(Mutex::new(Script::default()));
        {
            let mut s = script.lock();
            s.poll_results.push_back(Ok(vec![quote("A"), quote("B")]));
            s.poll_results.push_back(Ok(vec![quote("C")]));
        }
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let ctx = context(Some(Arc::clone(&sink) as Arc<dyn EventSink>));

        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));

        run_briefly(session, provider, cancel).await.unwrap();

        assert_eq!(*sink.batches.lock(), vec![2, 1]);
        assert_eq!(ctx.cache.len(Category::Quote), 3);
        assert_eq!(state.get_events_received(), 3);
    }

    #[tokio::test]
    async fn slow_sink_does_not_delay_cache() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().poll_results.push_back(Ok(vec![quote("IBM")]));
        let sink = Arc::new(SlowSink {
            delay: Duration::from_secs(2),
            batches: Mutex::new(0),
        });
        let ctx = context(Some(Arc::clone(&sink) as Arc<dyn EventSink>));
        ctx.subscriptions.request_subscribe(Category::Quote, &["IBM"]);

        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(ScriptedProvider(Arc::clone(&script)));
        let task = tokio::spawn(session.run(provider));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.cache.get(Category::Quote, &["IBM"]).len(), 1);
        assert_eq!(state.get_events_received(), 1);
        assert_eq!(*sink.batches.lock(), 0);

        // Cancellation also interrupts the pending write.
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());
        assert!(script.lock().closed);
    }

    #[tokio::test]
    async fn cancel_interrupts_stalled_subscribe_and_closes_handle() {
        let closed = Arc::new(Mutex::new(false));
        let ctx = context(None);
        ctx.subscriptions.request_subscribe(Category::Quote, &["AAPL"]);

        let cancel = CancellationToken::new();
        let (session, state) = session(&ctx, &cancel);
        let provider: Arc<dyn FeedProvider> = Arc::new(StalledProvider {
            closed: Arc::clone(&closed),
        });
        let task = tokio::spawn(session.run(provider));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(state.get_state(), ConnectionState::Connected);
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());
        assert!(*closed.lock());
        assert_eq!(state.get_state(), ConnectionState::Disconnected);
        assert!(ctx.subscriptions.pending(Category::Quote).contains("AAPL"));
    }
}
