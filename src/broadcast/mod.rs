//! Broadcast router
//!
//! Every connected display gets a bounded outbound queue. Dispatchers send a
//! message once and the router fans it out to every client; a client whose
//! queue is full misses the message rather than stalling the pipeline.

mod messages;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

pub use messages::{ClientMessage, SpeakPhase};
pub use registry::{DeviceRecord, DeviceRegistration, DeviceRegistry};

/// Per-client outbound queue depth
const CLIENT_QUEUE_DEPTH: usize = 256;

/// Who receives a broadcast
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    All,
    /// Everyone except the connection that caused the message
    AllExcept(&'a str),
}

#[derive(Default)]
struct RouterState {
    clients: HashMap<String, mpsc::Sender<String>>,
    devices: DeviceRegistry,
}

/// Fan-out of client messages to connected displays
#[derive(Clone, Default)]
pub struct BroadcastRouter {
    state: Arc<RwLock<RouterState>>,
}

impl BroadcastRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new connection and hand back its outbound queue
    pub async fn connect(&self) -> (String, mpsc::Receiver<String>) {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        self.state.write().await.clients.insert(connection_id.clone(), tx);
        tracing::debug!(connection_id = %connection_id, "display connected");
        (connection_id, rx)
    }

    /// Drop a connection and whatever device it registered
    pub async fn disconnect(&self, connection_id: &str) {
        let mut state = self.state.write().await;
        state.clients.remove(connection_id);
        if let Some(device) = state.devices.unregister(connection_id) {
            tracing::info!(device_id = %device.device_id, "display device disconnected");
        }
    }

    /// Register the device behind a connection
    ///
    /// Returns `None` if the connection is no longer open.
    pub async fn register_device(
        &self,
        connection_id: &str,
        registration: DeviceRegistration,
    ) -> Option<DeviceRecord> {
        let mut state = self.state.write().await;
        if !state.clients.contains_key(connection_id) {
            return None;
        }
        let record = state.devices.register(connection_id, registration);
        tracing::info!(
            device_id = %record.device_id,
            streaming = record.streaming_mode,
            "display device registered"
        );
        Some(record)
    }

    /// Toggle chunk streaming for a connection's device
    pub async fn set_streaming_mode(&self, connection_id: &str, enabled: bool) -> bool {
        self.state
            .write()
            .await
            .devices
            .set_streaming_mode(connection_id, enabled)
    }

    /// Whether replies for this device should be chunk-streamed
    ///
    /// Unknown or absent devices get the cached-file path.
    pub async fn streaming_mode(&self, device_id: Option<&str>) -> bool {
        let Some(device_id) = device_id else {
            return false;
        };
        self.state
            .read()
            .await
            .devices
            .find_by_device(device_id)
            .is_some_and(|d| d.streaming_mode)
    }

    /// Device registered on a connection, if any
    pub async fn device_for_connection(&self, connection_id: &str) -> Option<DeviceRecord> {
        self.state.read().await.devices.get(connection_id).cloned()
    }

    /// Snapshot of all registered devices
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        let state = self.state.read().await;
        let mut devices: Vec<DeviceRecord> = state.devices.list().into_iter().cloned().collect();
        devices.sort_by_key(|d| d.connected_at);
        devices
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    /// Send a message to an audience; returns how many clients accepted it
    pub async fn send(
        &self,
        audience: Audience<'_>,
        message: &ClientMessage,
        audio_device: Option<&str>,
    ) -> usize {
        let payload = match message.to_json(audio_device) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "failed to serialize client message");
                return 0;
            }
        };

        let state = self.state.read().await;
        let mut delivered = 0;
        for (connection_id, tx) in &state.clients {
            if let Audience::AllExcept(excluded) = audience
                && excluded == connection_id
            {
                continue;
            }
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        kind = message.kind(),
                        "display queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %connection_id, "display queue closed");
                }
            }
        }
        delivered
    }

    /// Send a message to every client
    pub async fn send_all(&self, message: &ClientMessage, audio_device: Option<&str>) -> usize {
        self.send(Audience::All, message, audio_device).await
    }

    /// Send a message to one connection
    pub async fn send_to(&self, connection_id: &str, message: &ClientMessage) -> bool {
        let payload = match message.to_json(None) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "failed to serialize client message");
                return false;
            }
        };
        let state = self.state.read().await;
        state
            .clients
            .get(connection_id)
            .is_some_and(|tx| tx.try_send(payload).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(device_id: &str, streaming_mode: bool) -> DeviceRegistration {
        DeviceRegistration {
            device_id: device_id.to_string(),
            device_type: None,
            name: None,
            streaming_mode,
        }
    }

    #[tokio::test]
    async fn send_all_reaches_every_client() {
        let router = BroadcastRouter::new();
        let (_a, mut rx_a) = router.connect().await;
        let (_b, mut rx_b) = router.connect().await;

        let delivered = router.send_all(&ClientMessage::Pong, None).await;
        assert_eq!(delivered, 2);
        assert!(rx_a.recv().await.unwrap().contains("pong"));
        assert!(rx_b.recv().await.unwrap().contains("pong"));
    }

    #[tokio::test]
    async fn all_except_skips_originator() {
        let router = BroadcastRouter::new();
        let (a, mut rx_a) = router.connect().await;
        let (_b, mut rx_b) = router.connect().await;

        let msg = ClientMessage::UserTranscript {
            text: "hello".to_string(),
        };
        assert_eq!(router.send(Audience::AllExcept(&a), &msg, None).await, 1);
        assert!(rx_b.recv().await.unwrap().contains("user_transcript"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let router = BroadcastRouter::new();
        let (_a, _rx_a) = router.connect().await;

        for _ in 0..CLIENT_QUEUE_DEPTH {
            assert_eq!(router.send_all(&ClientMessage::Pong, None).await, 1);
        }
        assert_eq!(router.send_all(&ClientMessage::Pong, None).await, 0);
    }

    #[tokio::test]
    async fn streaming_mode_follows_registration() {
        let router = BroadcastRouter::new();
        let (conn, _rx) = router.connect().await;

        assert!(!router.streaming_mode(Some("tablet")).await);
        router.register_device(&conn, registration("tablet", false)).await.unwrap();
        assert!(!router.streaming_mode(Some("tablet")).await);

        assert!(router.set_streaming_mode(&conn, true).await);
        assert!(router.streaming_mode(Some("tablet")).await);
        assert!(!router.streaming_mode(None).await);
    }

    #[tokio::test]
    async fn disconnect_forgets_device() {
        let router = BroadcastRouter::new();
        let (conn, _rx) = router.connect().await;
        router.register_device(&conn, registration("tablet", true)).await.unwrap();
        assert_eq!(router.devices().await.len(), 1);

        router.disconnect(&conn).await;
        assert!(router.devices().await.is_empty());
        assert_eq!(router.client_count().await, 0);
        assert!(router.register_device(&conn, registration("tablet", true)).await.is_none());
    }
}
