//! Outbound transport seams.

use async_trait::async_trait;

use nhb_types::error::RelayError;

/// A connected transport able to deliver one wire envelope.
///
/// Implementations are installed on the broadcaster by the peer-stream
/// supervisor and replaced wholesale on reconnect (monotonic handoff).
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Delivers one envelope. An error leaves the message queued for retry.
    async fn send(&self, msg_type: u16, payload: &[u8]) -> Result<(), RelayError>;
}

/// The engine-facing side of the broadcaster: non-blocking, never fails.
pub trait OutboundSink: Send + Sync {
    /// Enqueues a defensive copy of the message for eventual delivery.
    fn broadcast(&self, msg_type: u16, payload: &[u8]);
}
