//! The resilient outbound broadcaster.
//!
//! A bounded FIFO with a single writer task. Enqueueing copies the message
//! and never blocks; on overflow the oldest entry is dropped so the queue
//! prefers fresh consensus state over stale. Delivery order is enqueue
//! order; a send failure leaves the head in place and backs off
//! exponentially, waking early on a new enqueue, a client change or
//! cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use nhb_api::relay::{OutboundSink, RelayClient};

/// One queued wire envelope.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Wire type tag.
    pub msg_type: u16,
    /// Defensive copy of the payload.
    pub payload: Vec<u8>,
    /// When the message was enqueued.
    pub enqueued_at: Instant,
    seq: u64,
}

struct Inner {
    queue: Mutex<VecDeque<OutboundMessage>>,
    capacity: usize,
    notify: Notify,
    client: Mutex<Option<Arc<dyn RelayClient>>>,
    base_delay: Duration,
    max_delay: Duration,
    next_seq: AtomicU64,
}

/// Single-writer FIFO between the engine and the peer transport.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    /// A broadcaster with the given queue capacity and retry delays.
    pub fn new(capacity: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Broadcaster {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
                capacity,
                notify: Notify::new(),
                client: Mutex::new(None),
                base_delay,
                max_delay,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Installs or clears the transport. The writer observes the change at
    /// its next wake-up (monotonic handoff).
    pub fn set_client(&self, client: Option<Arc<dyn RelayClient>>) {
        let attached = client.is_some();
        *self.inner.client.lock() = client;
        self.inner.notify.notify_one();
        if attached {
            info!(target: "relay", "transport client attached");
        } else {
            debug!(target: "relay", "transport client cleared");
        }
    }

    /// Messages currently queued.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Copy of the queued messages, oldest first. Test and debug aid.
    pub fn queue_snapshot(&self) -> Vec<OutboundMessage> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    fn enqueue(&self, msg_type: u16, payload: &[u8]) {
        let message = OutboundMessage {
            msg_type,
            payload: payload.to_vec(),
            enqueued_at: Instant::now(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                if let Some(dropped) = queue.pop_front() {
                    warn!(
                        target: "relay",
                        msg_type = dropped.msg_type,
                        queued = queue.len(),
                        "outbound queue overflow; dropped oldest"
                    );
                }
            }
            queue.push_back(message);
        }
        self.inner.notify.notify_one();
    }

    /// Runs the writer loop until cancelled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut delay = self.inner.base_delay;
        loop {
            if *shutdown.borrow() {
                return;
            }
            let head = self.inner.queue.lock().front().cloned();
            let client = self.inner.client.lock().clone();

            let (message, client) = match (head, client) {
                (Some(message), Some(client)) => (message, client),
                _ => {
                    // Nothing to do: wait for an enqueue, a client change
                    // or cancellation.
                    tokio::select! {
                        _ = self.inner.notify.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            match client.send(message.msg_type, &message.payload).await {
                Ok(()) => {
                    delay = self.inner.base_delay;
                    let mut queue = self.inner.queue.lock();
                    // The head may have been displaced by overflow while the
                    // send was in flight; only pop the message we delivered.
                    if queue.front().map(|m| m.seq) == Some(message.seq) {
                        queue.pop_front();
                    }
                }
                Err(e) => {
                    debug!(target: "relay", error = %e, delay_ms = delay.as_millis() as u64, "send failed; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.inner.notify.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                    delay = (delay * 2).min(self.inner.max_delay);
                }
            }
        }
    }
}

impl OutboundSink for Broadcaster {
    fn broadcast(&self, msg_type: u16, payload: &[u8]) {
        self.enqueue(msg_type, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nhb_types::error::RelayError;

    /// Captures sends; optionally fails permanently from a given index.
    struct MockClient {
        delivered: Mutex<Vec<(u16, Vec<u8>)>>,
        fail_from: Option<usize>,
    }

    impl MockClient {
        fn new(fail_from: Option<usize>) -> Arc<Self> {
            Arc::new(MockClient {
                delivered: Mutex::new(Vec::new()),
                fail_from,
            })
        }
    }

    #[async_trait]
    impl RelayClient for MockClient {
        async fn send(&self, msg_type: u16, payload: &[u8]) -> Result<(), RelayError> {
            let mut delivered = self.delivered.lock();
            if let Some(limit) = self.fail_from {
                if delivered.len() >= limit {
                    return Err(RelayError::StreamClosed("simulated failure".to_string()));
                }
            }
            delivered.push((msg_type, payload.to_vec()));
            Ok(())
        }
    }

    fn fast_broadcaster(capacity: usize) -> Broadcaster {
        Broadcaster::new(
            capacity,
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn overflow_keeps_most_recent() {
        let broadcaster = fast_broadcaster(4);
        for i in 0u16..10 {
            broadcaster.broadcast(i, &[i as u8]);
        }
        let snapshot = broadcaster.queue_snapshot();
        assert_eq!(snapshot.len(), 4);
        let kept: Vec<u16> = snapshot.iter().map(|m| m.msg_type).collect();
        assert_eq!(kept, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn queued_messages_deliver_in_order_once_client_attaches() {
        let broadcaster = fast_broadcaster(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let writer = {
            let b = broadcaster.clone();
            tokio::spawn(async move { b.run(shutdown_rx).await })
        };

        for i in 0u16..10 {
            broadcaster.broadcast(i, &[i as u8]);
        }
        settle().await;
        assert_eq!(broadcaster.queue_len(), 10);

        let client = MockClient::new(None);
        broadcaster.set_client(Some(client.clone()));
        settle().await;

        let delivered = client.delivered.lock();
        assert_eq!(delivered.len(), 10);
        let order: Vec<u16> = delivered.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, (0..10).collect::<Vec<u16>>());
        drop(delivered);

        shutdown_tx.send(true).unwrap();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn failed_sends_retry_on_next_client_in_order() {
        let broadcaster = fast_broadcaster(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let writer = {
            let b = broadcaster.clone();
            tokio::spawn(async move { b.run(shutdown_rx).await })
        };

        for i in 0u16..10 {
            broadcaster.broadcast(i, &[i as u8]);
        }
        // C1 accepts two messages then fails permanently.
        let c1 = MockClient::new(Some(2));
        broadcaster.set_client(Some(c1.clone()));
        settle().await;
        assert_eq!(c1.delivered.lock().len(), 2);

        // C2 receives everything C1 never delivered, still in order.
        let c2 = MockClient::new(None);
        broadcaster.set_client(Some(c2.clone()));
        settle().await;

        let order: Vec<u16> = c2.delivered.lock().iter().map(|(t, _)| *t).collect();
        assert_eq!(order, (2..10).collect::<Vec<u16>>());
        assert_eq!(broadcaster.queue_len(), 0);

        shutdown_tx.send(true).unwrap();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_never_blocks_without_client() {
        let broadcaster = fast_broadcaster(2);
        // No writer task, no client: enqueueing still returns immediately.
        for i in 0u16..100 {
            broadcaster.broadcast(i, b"payload");
        }
        assert_eq!(broadcaster.queue_len(), 2);
    }
}
