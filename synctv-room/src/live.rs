//! Live-stream channel hand-off
//!
//! Ingest and transcoding live elsewhere; rooms only look channels up.

use std::sync::Arc;

use crate::{models::RoomId, Result};

/// Opaque handle to a live ingest channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub room_id: RoomId,
    pub name: String,
}

pub trait LiveChannelProvider: Send + Sync {
    /// Fails with `NotFound` when no such channel exists for the room
    fn get_channel(&self, room_id: &RoomId, channel_name: &str) -> Result<Arc<Channel>>;
}
