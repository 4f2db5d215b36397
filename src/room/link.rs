//! The streaming transport talks to a room only through these traits
//!
//! [`RoomClient`] is the NATS implementation; [`NatsConnector`] opens one.

use anyhow::Result;
use futures::stream::BoxStream;
use std::sync::Arc;

use super::client::RoomClient;
use super::messages::RoomEvent;
use crate::audio::AudioFrame;

/// Raw message payloads from one room subject; ends when the connection does
pub type PayloadStream = BoxStream<'static, Vec<u8>>;

/// A joined room
#[async_trait::async_trait]
pub trait RoomLink: Send + Sync {
    fn participant_id(&self) -> &str;

    /// Room lifecycle and transcript events
    async fn subscribe_events(&self) -> Result<PayloadStream>;

    /// The bot's audio frames
    async fn subscribe_remote_audio(&self) -> Result<PayloadStream>;

    /// Announce a lifecycle event of our own (join / leave)
    async fn publish_event(&self, event: &RoomEvent) -> Result<()>;

    /// Publish one microphone frame
    async fn publish_audio_frame(&self, frame: &AudioFrame, sequence: u32, is_final: bool) -> Result<()>;

    /// Flush pending publishes
    async fn close(&self) -> Result<()>;
}

/// Opens a [`RoomLink`] from negotiated credentials
#[async_trait::async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(&self, room_url: &str, token: &str, participant_id: String) -> Result<Arc<dyn RoomLink>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NatsConnector;

#[async_trait::async_trait]
impl RoomConnector for NatsConnector {
    async fn connect(&self, room_url: &str, token: &str, participant_id: String) -> Result<Arc<dyn RoomLink>> {
        let client = RoomClient::connect(room_url, token, participant_id).await?;
        Ok(Arc::new(client))
    }
}
