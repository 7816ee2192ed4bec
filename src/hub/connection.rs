use std::fmt;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::message::HubMessage;

/// Identifier the hub assigns to each registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A realtime client the hub can push messages to.
///
/// Transports (WebSocket, SSE, ...) implement this for their socket type.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, message: &HubMessage) -> Result<()>;
}

/// Connection backed by a bounded channel; the transport drains the receiver.
///
/// A full channel counts as a failed send, so a client that stops reading is
/// dropped instead of buffering without limit.
pub struct ChannelConnection {
    tx: mpsc::Sender<HubMessage>,
}

impl ChannelConnection {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send(&self, message: &HubMessage) -> Result<()> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("client is not keeping up"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("client went away"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_connection_delivers() {
        let (conn, mut rx) = ChannelConnection::new(4);
        conn.send(&HubMessage::no_data()).await.unwrap();
        assert_eq!(rx.recv().await, Some(HubMessage::no_data()));
    }

    #[tokio::test]
    async fn test_channel_connection_full_or_closed_fails() {
        let (conn, rx) = ChannelConnection::new(1);
        conn.send(&HubMessage::no_data()).await.unwrap();
        assert!(conn.send(&HubMessage::no_data()).await.is_err());

        drop(rx);
        assert!(conn.send(&HubMessage::no_data()).await.is_err());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }
}
