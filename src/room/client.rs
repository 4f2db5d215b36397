use anyhow::{bail, Context, Result};
use async_nats::Client;
use futures::StreamExt;
use tracing::{debug, info};

use super::link::{PayloadStream, RoomLink};
use super::messages::{AudioFrameMessage, RoomEvent};
use crate::audio::AudioFrame;

/// Server and room name parsed from a `room_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAddress {
    /// e.g. `nats://voice.example.com:4222`
    pub server: String,
    /// Subject-safe room name
    pub room: String,
}

impl RoomAddress {
    /// Parse `nats://host[:port]/<room>`
    pub fn parse(room_url: &str) -> Result<Self> {
        let url = url::Url::parse(room_url)
            .with_context(|| format!("Invalid room URL: {}", room_url))?;

        match url.scheme() {
            "nats" | "tls" | "ws" | "wss" => {}
            other => bail!("Unsupported room URL scheme: {}", other),
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .with_context(|| format!("Room URL has no host: {}", room_url))?;
        let port = url.port().unwrap_or(4222);

        let room = url.path().trim_matches('/').to_string();
        if room.is_empty() {
            bail!("Room URL has no room name: {}", room_url);
        }
        // Anything else could split or wildcard the subject (or arrive percent-encoded)
        if !room
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("Room name is not subject-safe: {}", room);
        }

        Ok(Self {
            server: format!("{}://{}:{}", url.scheme(), host, port),
            room,
        })
    }

    pub fn events_subject(&self) -> String {
        format!("room.{}.events", self.room)
    }

    pub fn client_audio_subject(&self) -> String {
        format!("room.{}.client.audio", self.room)
    }

    pub fn bot_audio_subject(&self) -> String {
        format!("room.{}.bot.audio", self.room)
    }
}

/// Connection to one streaming room
pub struct RoomClient {
    client: Client,
    address: RoomAddress,
    participant_id: String,
}

impl RoomClient {
    /// Join the room's server with the negotiated token
    pub async fn connect(room_url: &str, token: &str, participant_id: String) -> Result<Self> {
        let address = RoomAddress::parse(room_url)?;
        info!("Connecting to room {} at {}", address.room, address.server);

        let client = async_nats::ConnectOptions::with_token(token.to_string())
            .connect(address.server.as_str())
            .await
            .context("Failed to connect to room server")?;

        info!("Connected to room {}", address.room);

        Ok(Self {
            client,
            address,
            participant_id,
        })
    }

    pub fn address(&self) -> &RoomAddress {
        &self.address
    }

    async fn subscribe_payloads(&self, subject: String, what: &'static str) -> Result<PayloadStream> {
        info!("Subscribing to {} on {}", what, subject);

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .with_context(|| format!("Failed to subscribe to {}", what))?;

        Ok(subscriber.map(|message| message.payload.to_vec()).boxed())
    }
}

#[async_trait::async_trait]
impl RoomLink for RoomClient {
    fn participant_id(&self) -> &str {
        &self.participant_id
    }

    async fn subscribe_events(&self) -> Result<PayloadStream> {
        self.subscribe_payloads(self.address.events_subject(), "room events")
            .await
    }

    async fn subscribe_remote_audio(&self) -> Result<PayloadStream> {
        self.subscribe_payloads(self.address.bot_audio_subject(), "remote audio")
            .await
    }

    async fn publish_audio_frame(&self, frame: &AudioFrame, sequence: u32, is_final: bool) -> Result<()> {
        let subject = self.address.client_audio_subject();
        let message = AudioFrameMessage::from_frame(&self.participant_id, frame, sequence, is_final);
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish audio frame")?;

        debug!(
            "Published audio frame to {} (seq={}, samples={}, final={})",
            subject,
            sequence,
            frame.samples.len(),
            is_final
        );

        Ok(())
    }

    async fn publish_event(&self, event: &RoomEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(self.address.events_subject(), payload.into())
            .await
            .context("Failed to publish room event")?;
        Ok(())
    }

    /// Flush pending publishes; the connection closes when dropped
    async fn close(&self) -> Result<()> {
        info!("Leaving room {}", self.address.room);
        self.client.flush().await.context("Failed to flush room connection")?;
        Ok(())
    }
}
