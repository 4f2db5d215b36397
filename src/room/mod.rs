pub mod client;
pub mod link;
pub mod messages;

pub use client::{RoomAddress, RoomClient};
pub use link::{NatsConnector, PayloadStream, RoomConnector, RoomLink};
pub use messages::{AudioFrameMessage, Participant, RoomEvent, TrackKind};
