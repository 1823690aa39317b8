//! Publish/subscribe dispatcher
//!
//! Each subscriber owns an unbounded queue drained by its own tokio task, so
//! `publish` never waits on a handler and a subscriber sees events in
//! publication order. Handler errors and panics are contained in that task
//! and reported back on the bus as `ErrorOccurred`.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;

use super::{ErrorOrigin, Event, EventKind, EventPayload};
use crate::Result;
use crate::engine::SessionId;

/// Events kept for [`EventBus::history`]
const DEFAULT_MAX_HISTORY: usize = 1000;

/// Receives events from the bus
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event
    ///
    /// # Errors
    ///
    /// A returned error is logged and republished as `ErrorOccurred`
    async fn handle(&self, event: Arc<Event>) -> Result<()>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        (self.0)(event)
    }
}

/// Wrap a closure as a shareable handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Cancellation token returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Clone)]
enum Filter {
    Kinds(Vec<EventKind>),
    All,
}

impl Filter {
    fn matches(&self, kind: EventKind) -> bool {
        match self {
            Self::Kinds(kinds) => kinds.contains(&kind),
            Self::All => true,
        }
    }
}

struct Subscriber {
    token: SubscriptionToken,
    filter: Filter,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

struct Inner {
    next_seq: AtomicU64,
    next_token: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    history: Mutex<VecDeque<Arc<Event>>>,
    max_history: usize,
}

/// Cloneable handle to a shared event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("next_seq", &self.inner.next_seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus keeping the last 1000 events
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(DEFAULT_MAX_HISTORY)
    }

    /// Create a bus keeping the last `max_history` events
    #[must_use]
    pub fn with_history(max_history: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_seq: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::with_capacity(max_history.min(DEFAULT_MAX_HISTORY))),
                max_history,
            }),
        }
    }

    /// Subscribe `handler` to one event kind
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        self.add_subscriber(Filter::Kinds(vec![kind]), handler)
    }

    /// Subscribe `handler` to several kinds through a single ordered queue
    pub fn subscribe_many(
        &self,
        kinds: &[EventKind],
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionToken {
        self.add_subscriber(Filter::Kinds(kinds.to_vec()), handler)
    }

    /// Subscribe `handler` to every event
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        self.add_subscriber(Filter::All, handler)
    }

    /// Remove a subscription
    ///
    /// Idempotent: returns `false` if the token was already removed. Events
    /// queued before the call may still reach the handler.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.token != token);
        let removed = subscribers.len() != before;
        if removed {
            tracing::debug!(token = token.0, "unsubscribed");
        }
        removed
    }

    /// Publish an event that belongs to no particular session
    pub fn publish(&self, payload: EventPayload) -> Arc<Event> {
        self.publish_with(None, payload)
    }

    /// Publish an event tagged with a session
    pub fn publish_session(&self, session_id: SessionId, payload: EventPayload) -> Arc<Event> {
        self.publish_with(Some(session_id), payload)
    }

    fn publish_with(&self, session_id: Option<SessionId>, payload: EventPayload) -> Arc<Event> {
        // Sequence numbers are assigned and recorded under the subscriber
        // lock so queue and history order always match sequence order.
        let mut subscribers = self.subscribers();
        let event = Arc::new(Event {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            session_id,
            payload,
            timestamp: Utc::now(),
        });

        tracing::trace!(%event, "publishing");

        let kind = event.kind();
        subscribers.retain(|s| {
            if !s.filter.matches(kind) {
                return true;
            }
            let delivered = s.tx.send(Arc::clone(&event)).is_ok();
            if !delivered {
                tracing::debug!(token = s.token.0, "dropping closed subscriber");
            }
            delivered
        });
        self.record(&event);
        drop(subscribers);

        event
    }

    /// Most recent `limit` events, oldest first
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Arc<Event>> {
        let history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn add_subscriber(&self, filter: Filter, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        let token = SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(deliver(Arc::downgrade(&self.inner), token, rx, handler));

        tracing::debug!(token = token.0, ?filter, "subscribed");
        self.subscribers().push(Subscriber { token, filter, tx });
        token
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, event: &Arc<Event>) {
        if self.inner.max_history == 0 {
            return;
        }
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if history.len() == self.inner.max_history {
            history.pop_front();
        }
        history.push_back(Arc::clone(event));
    }
}

/// Drain one subscriber's queue
async fn deliver(
    bus: Weak<Inner>,
    token: SubscriptionToken,
    mut rx: mpsc::UnboundedReceiver<Arc<Event>>,
    handler: Arc<dyn EventHandler>,
) {
    while let Some(event) = rx.recv().await {
        let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&event)))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        tracing::error!(token = token.0, %event, error = %failure, "event handler failed");

        // Never report a failure to handle a failure report
        if event.kind() == EventKind::ErrorOccurred {
            continue;
        }
        let Some(inner) = bus.upgrade() else {
            break;
        };
        EventBus { inner }.publish_with(
            event.session_id,
            EventPayload::ErrorOccurred {
                origin: ErrorOrigin::Bus,
                message: format!("handler for {} failed: {failure}", event.kind()),
            },
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Error;

    fn transcript(text: &str) -> EventPayload {
        EventPayload::TranscriptReady {
            text: text.to_string(),
        }
    }

    fn recorder(bus: &EventBus, kind: EventKind) -> (SubscriptionToken, mpsc::UnboundedReceiver<Arc<Event>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = bus.subscribe(
            kind,
            handler_fn(move |event| {
                let _ = tx.send(event);
                Ok(())
            }),
        );
        (token, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Arc<Event>>) -> Arc<Event> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn delivers_in_publication_order() {
        let bus = EventBus::new();
        let (_, mut rx) = recorder(&bus, EventKind::TranscriptReady);

        for i in 0..50 {
            bus.publish(transcript(&i.to_string()));
        }

        let mut last = 0;
        for i in 0..50 {
            let event = next(&mut rx).await;
            assert!(event.seq > last);
            last = event.seq;
            assert_eq!(event.payload, transcript(&i.to_string()));
        }
    }

    #[tokio::test]
    async fn only_matching_kinds_are_delivered() {
        let bus = EventBus::new();
        let (_, mut rx) = recorder(&bus, EventKind::WakeDetected);

        bus.publish(transcript("ignored"));
        bus.publish(EventPayload::WakeDetected {
            wake_word: "jetson".to_string(),
        });

        assert_eq!(next(&mut rx).await.kind(), EventKind::WakeDetected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (token, _rx) = recorder(&bus, EventKind::Shutdown);
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_does_not_wait_for_slow_handlers() {
        let bus = EventBus::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        bus.subscribe(
            EventKind::Shutdown,
            handler_fn(move |_| {
                // Blocks the subscriber task, never the publisher
                let _ = release_rx
                    .lock()
                    .map(|rx| rx.recv_timeout(Duration::from_millis(200)));
                Ok(())
            }),
        );

        let started = std::time::Instant::now();
        for _ in 0..10 {
            bus.publish(EventPayload::Shutdown);
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        drop(release_tx);
    }

    #[tokio::test]
    async fn failing_handler_is_isolated_and_reported() {
        let bus = EventBus::new();
        let (_, mut errors) = recorder(&bus, EventKind::ErrorOccurred);
        bus.subscribe(
            EventKind::TranscriptReady,
            handler_fn(|_| Err(Error::EventHandler("boom".to_string()))),
        );
        bus.subscribe(
            EventKind::TranscriptReady,
            handler_fn(|_| panic!("handler exploded")),
        );
        let (_, mut healthy) = recorder(&bus, EventKind::TranscriptReady);

        bus.publish(transcript("one"));
        bus.publish(transcript("two"));

        assert_eq!(next(&mut healthy).await.payload, transcript("one"));
        assert_eq!(next(&mut healthy).await.payload, transcript("two"));

        let mut messages = Vec::new();
        for _ in 0..4 {
            match &next(&mut errors).await.payload {
                EventPayload::ErrorOccurred { origin, message } => {
                    assert_eq!(*origin, ErrorOrigin::Bus);
                    messages.push(message.clone());
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
        assert!(messages.iter().any(|m| m.contains("boom")));
        assert!(messages.iter().any(|m| m.contains("handler exploded")));
    }

    #[tokio::test]
    async fn failing_error_handler_does_not_loop() {
        let bus = EventBus::new();
        bus.subscribe(
            EventKind::ErrorOccurred,
            handler_fn(|_| Err(Error::EventHandler("still broken".to_string()))),
        );

        bus.publish(EventPayload::speech_error("mic"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(bus.history(100).len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded_and_oldest_first() {
        let bus = EventBus::with_history(3);
        for i in 0..5 {
            bus.publish(transcript(&i.to_string()));
        }

        let history = bus.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].payload, transcript("2"));
        assert_eq!(history[2].payload, transcript("4"));

        let last = bus.history(1);
        assert_eq!(last[0].payload, transcript("4"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn history_follows_seq_under_concurrent_publishers() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2000;

        let bus = EventBus::with_history(THREADS * PER_THREAD);
        let (_, mut rx) = recorder(&bus, EventKind::TranscriptReady);

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let bus = bus.clone();
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        bus.publish(transcript(&format!("{t}-{i}")));
                    }
                });
            }
        });

        let history = bus.history(THREADS * PER_THREAD);
        assert_eq!(history.len(), THREADS * PER_THREAD);
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));

        let mut last = None;
        for _ in 0..THREADS * PER_THREAD {
            let seq = next(&mut rx).await.seq;
            assert!(last.is_none_or(|prev| prev < seq));
            last = Some(seq);
        }
    }

    #[tokio::test]
    async fn session_tag_is_preserved() {
        let bus = EventBus::new();
        let id = SessionId::new();
        let event = bus.publish_session(id, EventPayload::Shutdown);
        assert_eq!(event.session_id, Some(id));
    }
}
