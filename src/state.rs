use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use crate::queue::PlaybackQueue;
use crate::types::PlaybackState;

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub playback: PlaybackState,
    pub queue: PlaybackQueue,
    /// A live radio stream owns the player playlist
    pub radio_active: bool,
    /// Last-write cache of "now playing" data supplied by the UI
    pub now_playing: Option<Value>,
}

pub type SharedState = Arc<RwLock<EngineState>>;

pub fn create_state() -> SharedState {
    Arc::new(RwLock::new(EngineState::default()))
}
