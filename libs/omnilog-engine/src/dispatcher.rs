use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use omnilog_api::{HandleContext, IngestError, now_ms};

use crate::buffer::{LaneReceiver, Slot};
use crate::policy::FailurePolicy;
use crate::routing::RoutingTable;

/// Result of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Failed(IngestError),
}

/// Pipeline counters, shared by all lanes.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    acknowledged: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub acknowledged: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
        }
    }
}

/// Sequential consumer of one buffer lane.
///
/// Messages are handled one at a time in the order they were enqueued. Every
/// dequeued message is acknowledged exactly once after its handler returns,
/// whatever the handler returned.
pub struct Dispatcher {
    lane: usize,
    routes: Arc<RoutingTable>,
    policy: FailurePolicy,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        lane: usize,
        routes: Arc<RoutingTable>,
        policy: FailurePolicy,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            lane,
            routes,
            policy,
            stats,
        }
    }

    /// Run until cancelled or until every sender is gone.
    ///
    /// Cancellation is observed between messages only: a message already
    /// dequeued is handled and acknowledged before the loop exits.
    pub async fn run(self, mut rx: LaneReceiver, token: CancellationToken) {
        tracing::info!(lane = self.lane, "dispatcher started");

        loop {
            let slot = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                slot = rx.recv() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
            };
            self.dispatch(slot).await;
        }

        tracing::info!(lane = self.lane, "dispatcher stopped");
    }

    /// Route, handle and acknowledge one message.
    pub async fn dispatch(&self, slot: Slot) -> DispatchOutcome {
        let Slot { message, permit } = slot;
        let (event, ack) = message.into_parts();
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let ctx = HandleContext::new(self.lane, now_ms());
        let handler = self.routes.resolve(&event.event_type);
        tracing::debug!(
            lane = self.lane,
            event_id = %event.id,
            event_type = %event.event_type,
            handler = handler.name(),
            registered = self.routes.is_registered(&event.event_type),
            "dispatching event"
        );

        // A panicking handler counts as a failed one; the lane keeps running.
        let result = match AssertUnwindSafe(handler.handle(&ctx, &event))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(IngestError::logic(format!(
                "handler '{}' panicked: {}",
                handler.name(),
                panic_message(panic.as_ref())
            ))),
        };
        let elapsed_ms = now_ms() - ctx.received_at_ms;

        let outcome = match result {
            Ok(()) => {
                tracing::debug!(
                    lane = self.lane,
                    event_id = %event.id,
                    handler = handler.name(),
                    elapsed_ms,
                    "event handled"
                );
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Handled
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    lane = self.lane,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    handler = handler.name(),
                    elapsed_ms,
                    error = %e,
                    "event handling failed"
                );
                if self.policy.on_failure(self.lane, handler.name(), &event, &e).await {
                    self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                }
                DispatchOutcome::Failed(e)
            }
        };

        ack.done();
        self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
        // Frees the buffer slot only once the message is acknowledged.
        drop(permit);

        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    use serde_json::Map;
    use tokio::sync::Mutex;
    use tracing_test::traced_test;

    use omnilog_api::{Event, EventHandler, InboundMessage};

    use super::*;
    use crate::buffer::{PartitionKey, bounded};
    use crate::policy::MemoryDeadLetterSink;

    /// Records handled event ids; fails events whose id starts with "fail"
    /// and panics on ids starting with "panic".
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn handle<'a>(
            &'a self,
            _ctx: &'a HandleContext,
            event: &'a Event,
        ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
            Box::pin(async move {
                self.seen.lock().await.push(event.id.clone());
                if event.id.starts_with("panic") {
                    panic!("handler exploded on {}", event.id);
                }
                if event.id.starts_with("fail") {
                    Err(IngestError::storage("boom"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn counted(id: &str, event_type: &str, acks: &Arc<AtomicUsize>) -> InboundMessage {
        let acks = acks.clone();
        InboundMessage::new(Event::new(id, event_type, Map::new()), move || {
            acks.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn dispatcher(
        known: Arc<Recorder>,
        fallback: Arc<Recorder>,
        policy: FailurePolicy,
    ) -> (Dispatcher, Arc<DispatchStats>) {
        let routes = RoutingTable::builder(fallback)
            .route("log_created", known)
            .build()
            .unwrap();
        let stats = Arc::new(DispatchStats::default());
        (
            Dispatcher::new(0, Arc::new(routes), policy, stats.clone()),
            stats,
        )
    }

    #[traced_test]
    #[tokio::test]
    async fn routes_by_type_and_acks_every_message() {
        let known = Arc::new(Recorder::default());
        let fallback = Arc::new(Recorder::default());
        let (d, stats) = dispatcher(known.clone(), fallback.clone(), FailurePolicy::AckAlways);
        let (tx, mut rxs) = bounded(4, 1, PartitionKey::EventType);
        let acks = Arc::new(AtomicUsize::new(0));

        tx.send(counted("e1", "log_created", &acks)).await.unwrap();
        tx.send(counted("e2", "unknown_type", &acks)).await.unwrap();

        for _ in 0..2 {
            let slot = rxs[0].recv().await.unwrap();
            assert_eq!(d.dispatch(slot).await, DispatchOutcome::Handled);
        }

        assert_eq!(*known.seen.lock().await, vec!["e1"]);
        assert_eq!(*fallback.seen.lock().await, vec!["e2"]);
        assert_eq!(acks.load(Ordering::SeqCst), 2);
        assert_eq!(tx.available(), 4);
        assert_eq!(stats.snapshot().handled, 2);
        assert!(logs_contain("registered=true"));
        assert!(logs_contain("registered=false"));
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_handler_is_still_acknowledged() {
        let known = Arc::new(Recorder::default());
        let (d, stats) = dispatcher(known, Arc::new(Recorder::default()), FailurePolicy::AckAlways);
        let (tx, mut rxs) = bounded(1, 1, PartitionKey::EventType);
        let acks = Arc::new(AtomicUsize::new(0));

        tx.send(counted("fail-1", "log_created", &acks)).await.unwrap();
        let outcome = d.dispatch(rxs[0].recv().await.unwrap()).await;

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(tx.available(), 1);
        let snap = stats.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.acknowledged, 1);
        assert!(logs_contain("event handling failed"));
    }

    #[tokio::test]
    async fn dead_letter_policy_records_failure_before_ack() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (d, stats) = dispatcher(
            Arc::new(Recorder::default()),
            Arc::new(Recorder::default()),
            FailurePolicy::DeadLetter(sink.clone()),
        );
        let (tx, mut rxs) = bounded(2, 1, PartitionKey::EventType);
        let acks = Arc::new(AtomicUsize::new(0));

        tx.send(counted("fail-7", "log_created", &acks)).await.unwrap();
        d.dispatch(rxs[0].recv().await.unwrap()).await;

        let letters = sink.letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].event.id, "fail-7");
        assert_eq!(letters[0].handler, "recorder");
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn run_handles_in_order_and_stops_when_senders_drop() {
        let known = Arc::new(Recorder::default());
        let fallback = Arc::new(Recorder::default());
        let (d, stats) = dispatcher(known.clone(), fallback, FailurePolicy::AckAlways);
        let (tx, mut rxs) = bounded(8, 1, PartitionKey::EventType);
        let acks = Arc::new(AtomicUsize::new(0));

        for id in ["a", "b", "fail-c", "d"] {
            tx.send(counted(id, "log_created", &acks)).await.unwrap();
        }
        drop(tx);

        d.run(rxs.remove(0), CancellationToken::new()).await;

        assert_eq!(*known.seen.lock().await, vec!["a", "b", "fail-c", "d"]);
        assert_eq!(acks.load(Ordering::SeqCst), 4);
        let snap = stats.snapshot();
        assert_eq!(snap.received, 4);
        assert_eq!(snap.handled, 3);
        assert_eq!(snap.failed, 1);
    }

    #[tokio::test]
    async fn cancelled_dispatcher_exits_without_dequeuing() {
        let known = Arc::new(Recorder::default());
        let fallback = Arc::new(Recorder::default());
        let (d, _stats) = dispatcher(known.clone(), fallback, FailurePolicy::AckAlways);
        let (tx, mut rxs) = bounded(2, 1, PartitionKey::EventType);
        let acks = Arc::new(AtomicUsize::new(0));
        tx.send(counted("e1", "log_created", &acks)).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        d.run(rxs.remove(0), token).await;

        assert!(known.seen.lock().await.is_empty());
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn panicking_handler_is_acked_and_lane_keeps_running() {
        let known = Arc::new(Recorder::default());
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let (d, stats) = dispatcher(
            known.clone(),
            Arc::new(Recorder::default()),
            FailurePolicy::DeadLetter(sink.clone()),
        );
        let (tx, mut rxs) = bounded(4, 1, PartitionKey::EventType);
        let acks = Arc::new(AtomicUsize::new(0));

        tx.send(counted("panic-1", "log_created", &acks)).await.unwrap();
        tx.send(counted("after", "log_created", &acks)).await.unwrap();
        drop(tx);

        d.run(rxs.remove(0), CancellationToken::new()).await;

        assert_eq!(*known.seen.lock().await, vec!["panic-1", "after"]);
        assert_eq!(acks.load(Ordering::SeqCst), 2);
        let snap = stats.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.handled, 1);
        assert_eq!(snap.dead_lettered, 1);

        let letters = sink.letters().await;
        assert_eq!(letters[0].event.id, "panic-1");
        assert_eq!(letters[0].error_kind, "Logic");
        assert!(letters[0].error.contains("handler exploded on panic-1"));
        assert!(logs_contain("panicked"));
    }
}
