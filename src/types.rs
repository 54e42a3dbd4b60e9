use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    Stopped,
}

/// UI-visible copy of the player state; eventually consistent with the subprocess
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    /// Target volume (0-100); fades ramp towards it without changing it
    pub volume: u8,
    pub muted: bool,
    pub speed: f64,
    pub position_secs: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            volume: 100,
            muted: false,
            speed: 1.0,
            position_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSlot {
    /// 0 = current, 1 = next
    pub position: u8,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Output device as listed by the player (`audio-device-list`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
