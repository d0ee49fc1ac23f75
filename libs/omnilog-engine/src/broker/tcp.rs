use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use omnilog_api::{Event, InboundMessage, IngestError};

use super::{BrokerClient, Subscription};
use crate::buffer::BufferSender;

#[derive(Serialize)]
struct AckLine<'a> {
    ack: &'a str,
}

/// Line-delimited JSON broker endpoint.
///
/// Producers connect over TCP and write one JSON [`Event`] per line. When the
/// pipeline acknowledges an event, `{"ack":"<id>"}` is written back on the
/// connection it arrived on. Topics are not part of the line protocol: every
/// connection feeds the subscription.
pub struct TcpLineBroker {
    listen: String,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpLineBroker {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            local_addr: Mutex::new(None),
        }
    }

    /// Address actually bound, once subscribed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.local_addr.lock() {
            Ok(addr) => *addr,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl BrokerClient for TcpLineBroker {
    fn name(&self) -> &str {
        "tcp-line"
    }

    fn subscribe<'a>(
        &'a self,
        subscription: &'a Subscription,
        output: BufferSender,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<JoinHandle<()>, IngestError>> + Send + 'a>> {
        Box::pin(async move {
            let listener = TcpListener::bind(&self.listen)
                .await
                .map_err(|e| IngestError::broker(format!("bind {}: {e}", self.listen)))?;
            let addr = listener.local_addr()?;
            match self.local_addr.lock() {
                Ok(mut slot) => *slot = Some(addr),
                Err(poisoned) => *poisoned.into_inner() = Some(addr),
            }

            tracing::info!(
                broker = self.name(),
                addr = %addr,
                group = %subscription.group,
                max_in_flight = subscription.max_in_flight,
                "tcp broker listening"
            );

            let ack_capacity = subscription.max_in_flight.max(1);
            Ok(tokio::spawn(accept_loop(listener, output, ack_capacity, token)))
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    output: BufferSender,
    ack_capacity: usize,
    token: CancellationToken,
) {
    let connections = TaskTracker::new();

    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "tcp broker client connected");
                connections.spawn(connection(
                    stream,
                    peer,
                    output.clone(),
                    ack_capacity,
                    token.clone(),
                ));
            }
            Err(e) => tracing::warn!(error = %e, "tcp broker accept failed"),
        }
    }

    output.close();
    connections.close();
    connections.wait().await;
    tracing::info!("tcp broker stopped");
}

async fn connection(
    stream: TcpStream,
    peer: SocketAddr,
    output: BufferSender,
    ack_capacity: usize,
    token: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (ack_tx, mut ack_rx) = mpsc::channel::<String>(ack_capacity);

    let writer = tokio::spawn(async move {
        while let Some(id) = ack_rx.recv().await {
            let mut line = match serde_json::to_vec(&AckLine { ack: &id }) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(event_id = %id, error = %e, "failed to encode ack");
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = write_half.write_all(&line).await {
                tracing::warn!(peer = %peer, error = %e, "failed to write ack, closing writer");
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "tcp broker read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "malformed event line, skipping");
                continue;
            }
        };

        let ack_tx = ack_tx.clone();
        let id = event.id.clone();
        let message = InboundMessage::new(event, move || {
            queue_ack(&ack_tx, peer, id);
        });

        // Blocks while the buffer is full, which stops reading from the socket.
        if let Err(e) = output.send(message).await {
            tracing::warn!(
                peer = %peer,
                event_id = %e.0.event.id,
                "pipeline stopped, closing connection"
            );
            break;
        }
    }

    // The writer ends once every pending ack handle is consumed or dropped.
    drop(ack_tx);
    let _ = writer.await;
    tracing::info!(peer = %peer, "tcp broker client disconnected");
}

/// Hand an ack line to the connection writer without waiting.
///
/// The queue holds at most `max_in_flight` lines. A peer that stops reading
/// acks loses the overflow instead of growing the queue; the producer sees
/// those events as unacknowledged. Returns false when the ack was dropped.
fn queue_ack(ack_tx: &mpsc::Sender<String>, peer: SocketAddr, id: String) -> bool {
    match ack_tx.try_send(id) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(id)) => {
            tracing::warn!(peer = %peer, event_id = %id, "ack queue full, dropping ack");
            false
        }
        // Peer disconnected or the writer failed; nothing left to tell it.
        Err(mpsc::error::TrySendError::Closed(id)) => {
            tracing::debug!(peer = %peer, event_id = %id, "connection gone, dropping ack");
            false
        }
    }
}
