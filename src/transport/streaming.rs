// Streaming transport: a persistent audio room with server-side turn detection
//
// The microphone is published continuously; the bot's audio and transcripts
// arrive on the room's subjects. There is no explicit turn boundary.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EventSink, JoinOutcome, Transport, TransportContext, TransportEvent, TurnOutcome};
use crate::api::VoiceApi;
use crate::audio::{AudioFrame, AudioResources};
use crate::error::{SessionError, SessionResult};
use crate::room::{
    AudioFrameMessage, NatsConnector, Participant, PayloadStream, RoomAddress, RoomConnector, RoomEvent,
    RoomLink, TrackKind,
};
use crate::session::{Message, TransportKind};

/// Remote frames buffered ahead of playback
const TRACK_BUFFER: usize = 64;

/// What the transport does in response to one room event
#[derive(Debug)]
pub enum RoomReaction {
    Emit(TransportEvent),
    /// Start playing the bot's audio; speaking is reported once frames play
    OpenRemoteTrack,
    /// Bot audio ended; speaking stops when the buffered frames drain
    CloseRemoteTrack,
}

impl RoomReaction {
    /// Map a room event onto transport behaviour
    ///
    /// `local_id` is our own participant id; `greeting` is announced when
    /// someone else joins.
    pub fn react(event: &RoomEvent, local_id: &str, greeting: Option<&str>) -> Vec<RoomReaction> {
        match event {
            RoomEvent::ParticipantJoined { participant } if participant.id != local_id => {
                info!("Participant joined: {}", participant.id);
                greeting
                    .map(|line| RoomReaction::Emit(TransportEvent::Message(Message::ai(line))))
                    .into_iter()
                    .collect()
            }
            RoomEvent::ParticipantJoined { .. } => Vec::new(),
            RoomEvent::ParticipantLeft { participant } if participant.id == local_id => {
                info!("Removed from room");
                vec![RoomReaction::Emit(TransportEvent::Closed)]
            }
            RoomEvent::ParticipantLeft { participant } => {
                info!("Participant left: {}", participant.id);
                Vec::new()
            }
            RoomEvent::TrackStarted { participant, kind } => {
                if *kind != TrackKind::Audio || participant.id == local_id {
                    return Vec::new();
                }
                vec![RoomReaction::OpenRemoteTrack]
            }
            RoomEvent::TrackStopped { participant, kind } => {
                if *kind != TrackKind::Audio || participant.id == local_id {
                    return Vec::new();
                }
                vec![RoomReaction::CloseRemoteTrack]
            }
            RoomEvent::Transcript { role, content } => {
                if content.trim().is_empty() {
                    return Vec::new();
                }
                let message = if role == "user" {
                    Message::user(content.clone())
                } else {
                    Message::ai(content.clone())
                };
                vec![RoomReaction::Emit(TransportEvent::Message(message))]
            }
            RoomEvent::Error { message } => {
                error!("Room error: {}", message);
                vec![RoomReaction::Emit(TransportEvent::Failed(SessionError::Transport(
                    message.clone(),
                )))]
            }
        }
    }
}

/// Audio-room conversation with continuous capture
pub struct StreamingTransport {
    api: VoiceApi,
    greeting: Option<String>,
    connector: Arc<dyn RoomConnector>,
    /// Room name as soon as the backend issued one, so `leave` can delete it
    room_name: Mutex<Option<String>>,
    joined: Mutex<Option<JoinedRoom>>,
}

struct JoinedRoom {
    client: Arc<dyn RoomLink>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Sender for the remote track currently playing
type TrackSlot = Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>;

impl StreamingTransport {
    pub fn new(api: VoiceApi, greeting: Option<String>) -> Self {
        Self::with_connector(api, greeting, Arc::new(NatsConnector))
    }

    /// Reach rooms through something other than NATS
    pub fn with_connector(api: VoiceApi, greeting: Option<String>, connector: Arc<dyn RoomConnector>) -> Self {
        Self {
            api,
            greeting,
            connector,
            room_name: Mutex::new(None),
            joined: Mutex::new(None),
        }
    }

    pub fn room_name(&self) -> Option<String> {
        self.room_name.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    async fn join(&self, context: TransportContext) -> SessionResult<JoinOutcome> {
        let TransportContext {
            session,
            media,
            events,
            cancel,
        } = context;

        info!("Requesting room for {} ({})", session.id, session.mode);

        let credentials = self
            .api
            .create_room(session.mode)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        let address = RoomAddress::parse(&credentials.room_url)
            .map_err(|e| SessionError::Negotiation(format!("{:#}", e)))?;
        *self.room_name.lock().unwrap_or_else(|e| e.into_inner()) = Some(address.room.clone());

        let transport_err = |e: anyhow::Error| SessionError::Transport(format!("{:#}", e));

        let client = self
            .connector
            .connect(&credentials.room_url, &credentials.token, session.id.clone())
            .await
            .map_err(transport_err)?;
        let room_events = client.subscribe_events().await.map_err(transport_err)?;
        let remote_audio = client.subscribe_remote_audio().await.map_err(transport_err)?;

        client
            .publish_event(&RoomEvent::ParticipantJoined {
                participant: Participant {
                    id: session.id.clone(),
                    name: None,
                },
            })
            .await
            .map_err(transport_err)?;

        media.set_voice_listener(events.voice_listener());

        let cancel = cancel.child_token();
        let track: TrackSlot = Arc::new(Mutex::new(None));
        let watch = RoomWatch::new(events, cancel.clone());

        let tasks = vec![
            spawn_uplink(Arc::clone(&client), Arc::clone(&media), cancel.clone()),
            spawn_remote_audio(remote_audio, Arc::clone(&track), watch.clone()),
            spawn_room_events(
                room_events,
                session.id.clone(),
                self.greeting.clone(),
                track,
                media,
                watch,
            ),
        ];

        *self.joined.lock().unwrap_or_else(|e| e.into_inner()) = Some(JoinedRoom {
            client,
            tasks,
            cancel,
        });

        info!("Joined room {}", address.room);

        Ok(JoinOutcome {
            opening_line: None,
            room: Some(address.room),
        })
    }

    /// Turn detection happens on the server
    async fn start_recording(&self) -> SessionResult<()> {
        debug!("start_recording ignored: streaming room is always listening");
        Ok(())
    }

    async fn stop_recording(&self) -> SessionResult<TurnOutcome> {
        debug!("stop_recording ignored: streaming room is always listening");
        Ok(TurnOutcome::default())
    }

    async fn send_text(&self, _text: &str) -> SessionResult<TurnOutcome> {
        Err(SessionError::Unsupported("text turns in a streaming room"))
    }

    async fn leave(&self) -> SessionResult<()> {
        let joined = self.joined.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(joined) = joined {
            joined.cancel.cancel();
            for task in &joined.tasks {
                task.abort();
            }

            let participant = Participant {
                id: joined.client.participant_id().to_string(),
                name: None,
            };
            if let Err(e) = joined
                .client
                .publish_event(&RoomEvent::ParticipantLeft { participant })
                .await
            {
                warn!("Failed to announce leaving: {:#}", e);
            }
            if let Err(e) = joined.client.close().await {
                warn!("Failed to close room connection: {:#}", e);
            }
        }

        let room = self.room_name.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(room) = room {
            if let Err(e) = self.api.delete_room(&room).await {
                warn!("Failed to delete room {}: {}", room, e);
            }
        }

        Ok(())
    }
}

/// Publish every input frame (silenced while muted)
fn spawn_uplink(
    client: Arc<dyn RoomLink>,
    media: Arc<AudioResources>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut input = media.subscribe_input();

    tokio::spawn(async move {
        let mut sequence: u32 = 0;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = input.recv() => frame,
            };

            match frame {
                Ok(frame) => {
                    if let Err(e) = client.publish_audio_frame(&frame, sequence, false).await {
                        warn!("Failed to publish audio frame: {:#}", e);
                    }
                    sequence = sequence.wrapping_add(1);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Uplink lagged, {} frames dropped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Uplink stopped after {} frames", sequence);
    })
}

/// Shared by the subscription loops so a lost connection is reported once
#[derive(Clone)]
struct RoomWatch {
    events: EventSink,
    cancel: CancellationToken,
    lost: Arc<AtomicBool>,
}

impl RoomWatch {
    fn new(events: EventSink, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A subscription ended without us leaving
    fn connection_closed(&self) {
        if self.cancel.is_cancelled() || self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Room connection closed");
        // Stops the other loop and the uplink
        self.cancel.cancel();
        self.events.emit(TransportEvent::Failed(SessionError::Transport(
            "room connection closed".to_string(),
        )));
    }
}

/// Route the bot's audio frames into whichever track is open
fn spawn_remote_audio(mut payloads: PayloadStream, track: TrackSlot, watch: RoomWatch) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = std::time::Instant::now();

        loop {
            let payload = tokio::select! {
                _ = watch.cancel.cancelled() => return,
                payload = payloads.next() => payload,
            };

            let Some(payload) = payload else {
                break;
            };

            let frame = match serde_json::from_slice::<AudioFrameMessage>(&payload)
                .map_err(anyhow::Error::from)
                .and_then(|m| m.to_frame(started.elapsed().as_millis() as u64))
            {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping malformed remote audio: {:#}", e);
                    continue;
                }
            };

            let sender = track.lock().unwrap_or_else(|e| e.into_inner()).clone();
            match sender {
                Some(sender) => {
                    if sender.try_send(frame).is_err() {
                        debug!("Remote track full or closed, frame dropped");
                    }
                }
                None => debug!("Remote audio with no open track"),
            }
        }

        watch.connection_closed();
    })
}

fn spawn_room_events(
    mut payloads: PayloadStream,
    local_id: String,
    greeting: Option<String>,
    track: TrackSlot,
    media: Arc<AudioResources>,
    watch: RoomWatch,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let events = &watch.events;

        loop {
            let payload = tokio::select! {
                _ = watch.cancel.cancelled() => return,
                payload = payloads.next() => payload,
            };

            let Some(payload) = payload else {
                break;
            };

            let event = match serde_json::from_slice::<RoomEvent>(&payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Ignoring unrecognised room event: {}", e);
                    continue;
                }
            };

            for reaction in RoomReaction::react(&event, &local_id, greeting.as_deref()) {
                match reaction {
                    RoomReaction::Emit(event) => events.emit(event),
                    RoomReaction::OpenRemoteTrack => open_track(&track, &media, events),
                    RoomReaction::CloseRemoteTrack => {
                        track.lock().unwrap_or_else(|e| e.into_inner()).take();
                    }
                }
            }
        }

        watch.connection_closed();
    })
}

/// Attach a fresh track to the output; replaces any previous one
fn open_track(track: &TrackSlot, media: &Arc<AudioResources>, events: &EventSink) {
    let (tx, rx) = mpsc::channel(TRACK_BUFFER);
    *track.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

    let media = Arc::clone(media);
    let events = events.clone();
    tokio::spawn(async move {
        match media.play_track(rx).await {
            Ok(()) | Err(SessionError::Cancelled) => {}
            Err(e) => {
                warn!("Remote track playback failed: {}", e);
                events.emit(TransportEvent::Failed(e));
            }
        }
    });
}
