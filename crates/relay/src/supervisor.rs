//! The peer-stream supervisor.
//!
//! Maintains the single logical bidirectional stream to the out-of-process
//! peer relay: dial with a bounded timeout, hand the connected stream to
//! the broadcaster, route inbound envelopes into the node, and on any
//! termination back off exponentially before redialling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Endpoint;
use tracing::{debug, info, warn};

use nhb_api::chain::ConsensusApi;
use nhb_api::relay::RelayClient;
use nhb_ipc::relay::peer_relay_client::PeerRelayClient;
use nhb_ipc::relay::Envelope;
use nhb_types::config::NetworkSecurity;
use nhb_types::error::RelayError;

use crate::broadcaster::Broadcaster;
use crate::security::configure_endpoint;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Outbound half of a connected relay stream.
struct StreamRelayClient {
    tx: mpsc::Sender<Envelope>,
}

#[async_trait]
impl RelayClient for StreamRelayClient {
    async fn send(&self, msg_type: u16, payload: &[u8]) -> Result<(), RelayError> {
        self.tx
            .send(Envelope {
                msg_type: u32::from(msg_type),
                payload: payload.to_vec(),
            })
            .await
            .map_err(|_| RelayError::StreamClosed("outbound stream closed".to_string()))
    }
}

/// Supervises the upstream relay connection.
pub struct PeerStreamSupervisor {
    endpoint: String,
    security: NetworkSecurity,
    runtime_allow_insecure: bool,
    dial_timeout: Duration,
    node: Arc<dyn ConsensusApi>,
    broadcaster: Broadcaster,
}

impl PeerStreamSupervisor {
    /// A supervisor for the given relay endpoint.
    pub fn new(
        endpoint: String,
        security: NetworkSecurity,
        runtime_allow_insecure: bool,
        dial_timeout: Duration,
        node: Arc<dyn ConsensusApi>,
        broadcaster: Broadcaster,
    ) -> Self {
        PeerStreamSupervisor {
            endpoint,
            security,
            runtime_allow_insecure,
            dial_timeout,
            node,
            broadcaster,
        }
    }

    /// Runs the dial/stream/backoff loop until cancelled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BACKOFF_BASE;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.connect_and_serve(&mut shutdown).await {
                Ok(()) => {
                    // A stream was established and later ended; start the
                    // backoff ladder over.
                    backoff = BACKOFF_BASE;
                }
                Err(RelayError::InsecureRefused(reason)) => {
                    // Configuration error, not a transient fault. Startup
                    // validation should have caught this; stop retrying.
                    warn!(target: "relay", %reason, "refusing insecure dial; supervisor exiting");
                    return;
                }
                Err(e) => {
                    debug!(target: "relay", error = %e, backoff_ms = backoff.as_millis() as u64, "dial failed");
                }
            }
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {}
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    async fn connect_and_serve(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let endpoint = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| RelayError::Dial(format!("bad endpoint {}: {e}", self.endpoint)))?
            .connect_timeout(self.dial_timeout);
        let endpoint = configure_endpoint(
            endpoint,
            &self.endpoint,
            &self.security,
            self.runtime_allow_insecure,
        )
        .await?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| RelayError::Dial(e.to_string()))?;

        let mut client = PeerRelayClient::new(channel);
        let (tx, rx) = mpsc::channel::<Envelope>(64);
        let response = client
            .channel(ReceiverStream::new(rx))
            .await
            .map_err(|e| RelayError::Dial(format!("open stream: {e}")))?;
        let mut inbound = response.into_inner();

        info!(target: "relay", endpoint = %self.endpoint, "peer relay stream established");
        self.broadcaster
            .set_client(Some(Arc::new(StreamRelayClient { tx })));

        let outcome = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                message = inbound.message() => match message {
                    Ok(Some(envelope)) => {
                        let msg_type = envelope.msg_type as u16;
                        if let Err(e) = self
                            .node
                            .process_network_message(msg_type, &envelope.payload)
                            .await
                        {
                            // Bad peer input is logged and dropped; it never
                            // tears the stream down.
                            debug!(target: "relay", msg_type, error = %e, "inbound message rejected");
                        }
                    }
                    Ok(None) => {
                        warn!(target: "relay", "peer relay closed the stream");
                        break Ok(());
                    }
                    Err(status) => {
                        warn!(target: "relay", error = %status, "peer relay stream failed");
                        break Ok(());
                    }
                },
            }
        };

        self.broadcaster.set_client(None);
        outcome
    }
}
