use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerClient, Subscription};
use crate::buffer::bounded;
use crate::config::ConsumerConfig;
use crate::dispatcher::{DispatchStats, Dispatcher, StatsSnapshot};
use crate::error::EngineError;
use crate::policy::FailurePolicy;
use crate::routing::RoutingTable;

/// Everything the consumer needs, assembled at wiring time.
pub struct ConsumerOptions {
    pub config: ConsumerConfig,
    pub broker: Arc<dyn BrokerClient>,
    pub routes: Arc<RoutingTable>,
    pub failure_policy: FailurePolicy,
}

/// Per-lane join handle.
struct LaneSlot {
    lane: usize,
    handle: JoinHandle<()>,
}

/// The ingestion pipeline: broker subscription, event buffer and dispatcher lanes.
pub struct Consumer {
    options: ConsumerOptions,
    stats: Arc<DispatchStats>,
    token: Option<CancellationToken>,
    lanes: Vec<LaneSlot>,
    broker_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.options.config)
            .field("routes", &self.options.routes)
            .field("policy", &self.options.failure_policy)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl Consumer {
    pub fn new(options: ConsumerOptions) -> Self {
        Self {
            options,
            stats: Arc::new(DispatchStats::default()),
            token: None,
            lanes: Vec::new(),
            broker_task: None,
        }
    }

    /// Start the pipeline under `parent`.
    ///
    /// A disabled consumer logs a warning and returns without subscribing.
    /// A failed subscription stops the already spawned lanes and is returned;
    /// the caller treats it as fatal.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<(), EngineError> {
        let config = &self.options.config;
        if self.token.is_some() {
            return Err(EngineError::Config("consumer already started".into()));
        }
        if !config.enabled {
            tracing::warn!(
                group = %config.group,
                topics = ?config.topics,
                "consumer is disabled, not subscribing"
            );
            return Ok(());
        }
        config.validate()?;

        let token = parent.child_token();
        let (sender, receivers) = bounded(config.max_records, config.lanes, config.partition_by);
        let lane_count = sender.lane_count();

        for rx in receivers {
            let lane = rx.lane();
            let dispatcher = Dispatcher::new(
                lane,
                self.options.routes.clone(),
                self.options.failure_policy.clone(),
                self.stats.clone(),
            );
            let handle = tokio::spawn(dispatcher.run(rx, token.clone()));
            self.lanes.push(LaneSlot { lane, handle });
        }

        let subscription = Subscription {
            group: config.group.clone(),
            topics: config.topics.clone(),
            max_in_flight: config.max_records,
        };

        match self
            .options
            .broker
            .subscribe(&subscription, sender, token.clone())
            .await
        {
            Ok(handle) => {
                self.broker_task = Some(handle);
                self.token = Some(token);
                tracing::info!(
                    broker = self.options.broker.name(),
                    group = %subscription.group,
                    topics = ?subscription.topics,
                    max_records = subscription.max_in_flight,
                    lanes = lane_count,
                    routes = ?self.options.routes.event_types(),
                    "consumer started"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    broker = self.options.broker.name(),
                    topics = ?subscription.topics,
                    error = %e,
                    "subscription failed"
                );
                token.cancel();
                self.join_lanes().await;
                Err(EngineError::Subscription {
                    topics: subscription.topics,
                    source: e,
                })
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Graceful shutdown: stop dequeuing, wait for in-flight handler calls,
    /// then stop the broker client.
    ///
    /// Messages still buffered when the lanes stop are dropped unacknowledged.
    pub async fn shutdown(mut self) -> StatsSnapshot {
        if let Some(token) = &self.token {
            token.cancel();
        }
        self.join_lanes().await;
        if let Some(handle) = self.broker_task.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "broker task failed");
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            received = stats.received,
            handled = stats.handled,
            failed = stats.failed,
            dead_lettered = stats.dead_lettered,
            acknowledged = stats.acknowledged,
            "consumer shut down"
        );
        stats
    }

    async fn join_lanes(&mut self) {
        for slot in self.lanes.drain(..) {
            if let Err(e) = slot.handle.await {
                tracing::error!(lane = slot.lane, error = %e, "dispatcher lane failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use omnilog_api::Event;
    use serde_json::Map;
    use tracing_test::traced_test;

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::workers::DefaultWorker;

    fn options(broker: Arc<dyn BrokerClient>, enabled: bool) -> ConsumerOptions {
        ConsumerOptions {
            config: ConsumerConfig {
                enabled,
                group: "omnilogger".into(),
                topics: vec!["logs".into()],
                max_records: 4,
                ..Default::default()
            },
            broker,
            routes: Arc::new(RoutingTable::builder(Arc::new(DefaultWorker)).build().unwrap()),
            failure_policy: FailurePolicy::AckAlways,
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn disabled_consumer_never_subscribes() {
        let broker = Arc::new(MemoryBroker::new());
        let mut consumer = Consumer::new(options(broker.clone(), false));

        consumer.start(&CancellationToken::new()).await.unwrap();

        assert!(!consumer.is_running());
        assert!(!broker.is_subscribed().await);
        assert!(logs_contain("consumer is disabled"));
    }

    #[tokio::test]
    async fn subscription_failure_is_returned() {
        let broker = Arc::new(MemoryBroker::failing("broker unreachable"));
        let mut consumer = Consumer::new(options(broker, true));

        let err = consumer.start(&CancellationToken::new()).await.unwrap_err();

        match err {
            EngineError::Subscription { topics, source } => {
                assert_eq!(topics, vec!["logs"]);
                assert_eq!(source.message, "broker unreachable");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!consumer.is_running());
    }

    #[traced_test]
    #[tokio::test]
    async fn start_twice_is_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let mut opts = options(broker, true);
        opts.config.lanes = 2;
        let mut consumer = Consumer::new(opts);
        let token = CancellationToken::new();

        consumer.start(&token).await.unwrap();
        assert!(logs_contain("lanes=2"));
        assert!(consumer.start(&token).await.is_err());
        consumer.shutdown().await;
    }

    #[tokio::test]
    async fn parent_cancellation_stops_the_pipeline() {
        let broker = Arc::new(MemoryBroker::new());
        let mut consumer = Consumer::new(options(broker.clone(), true));
        let parent = CancellationToken::new();
        consumer.start(&parent).await.unwrap();

        broker.publish("logs", Event::new("e2", "unknown_type", Map::new())).await.unwrap();
        parent.cancel();
        assert!(!consumer.is_running());

        let stats = consumer.shutdown().await;
        assert_eq!(stats.received, stats.acknowledged);
        assert!(!broker.is_subscribed().await);
    }
}
