use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use omnilog_api::{Event, InboundMessage, IngestError};

use super::{BrokerClient, Subscription};
use crate::buffer::{BufferSender, TrySendError};

struct Route {
    topics: Vec<String>,
    output: BufferSender,
}

/// In-process broker.
///
/// `publish` hands the event straight to the subscribed pipeline and returns
/// once it sits in the buffer, so a full buffer blocks the publisher.
/// Acknowledged event ids are recorded in order.
pub struct MemoryBroker {
    route: Arc<RwLock<Option<Route>>>,
    acked: Arc<Mutex<Vec<String>>>,
    fail_with: Option<String>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            route: Arc::new(RwLock::new(None)),
            acked: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    /// A broker whose `subscribe` always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Deliver `event` on `topic`, waiting for buffer space.
    pub async fn publish(&self, topic: &str, event: Event) -> Result<(), IngestError> {
        let output = self.output_for(topic).await?;
        output.send(self.message(event)).await.map_err(|e| not_delivered(&e.0.event))
    }

    /// Deliver without waiting; fails when the buffer is full.
    pub async fn try_publish(&self, topic: &str, event: Event) -> Result<(), IngestError> {
        let output = self.output_for(topic).await?;
        output.try_send(self.message(event)).map_err(|e| match e {
            TrySendError::Full(m) => {
                IngestError::broker(format!("buffer full, event '{}' rejected", m.event.id))
            }
            TrySendError::Closed(m) => not_delivered(&m.event),
        })
    }

    pub async fn is_subscribed(&self) -> bool {
        self.route.read().await.is_some()
    }

    /// Ids of acknowledged events, in acknowledgment order.
    pub fn acked(&self) -> Vec<String> {
        match self.acked.lock() {
            Ok(acked) => acked.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn ack_count(&self) -> usize {
        self.acked().len()
    }

    async fn output_for(&self, topic: &str) -> Result<BufferSender, IngestError> {
        match self.route.read().await.as_ref() {
            Some(route) if route.topics.iter().any(|t| t == topic) => Ok(route.output.clone()),
            Some(_) => Err(IngestError::broker(format!("topic '{topic}' has no subscriber"))),
            None => Err(IngestError::broker("no active subscription")),
        }
    }

    fn message(&self, event: Event) -> InboundMessage {
        let acked = self.acked.clone();
        let id = event.id.clone();
        InboundMessage::new(event, move || match acked.lock() {
            Ok(mut acked) => acked.push(id),
            Err(poisoned) => poisoned.into_inner().push(id),
        })
    }
}

impl BrokerClient for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    fn subscribe<'a>(
        &'a self,
        subscription: &'a Subscription,
        output: BufferSender,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, IngestError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(reason) = &self.fail_with {
                return Err(IngestError::broker(reason.clone()));
            }

            let mut route = self.route.write().await;
            if route.is_some() {
                return Err(IngestError::broker("memory broker already has a subscriber"));
            }
            *route = Some(Route {
                topics: subscription.topics.clone(),
                output: output.clone(),
            });
            drop(route);

            tracing::info!(
                broker = self.name(),
                group = %subscription.group,
                topics = ?subscription.topics,
                max_in_flight = subscription.max_in_flight,
                "subscribed"
            );

            let route = self.route.clone();
            Ok(tokio::spawn(async move {
                token.cancelled().await;
                route.write().await.take();
                output.close();
                tracing::debug!("memory broker subscription closed");
            }))
        })
    }
}

fn not_delivered(event: &Event) -> IngestError {
    IngestError::broker(format!("pipeline stopped, event '{}' not delivered", event.id))
}
