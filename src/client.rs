use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ErrorKind, MpvError, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::ipc::Connection;
use crate::types::AudioDevice;

/// How `loadfile` treats the existing playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    Append,
}

impl LoadMode {
    fn as_str(self) -> &'static str {
        match self {
            LoadMode::Replace => "replace",
            LoadMode::Append => "append",
        }
    }
}

/// Command surface of one player instance.
///
/// Each call is independent: a failure is logged with its action name, published
/// as an [`PlayerEvent::Error`] and returned, but never affects other commands.
#[derive(Clone)]
pub struct MpvClient {
    conn: Arc<Connection>,
    bus: EventBus,
}

impl MpvClient {
    pub fn new(conn: Connection, bus: EventBus) -> Self {
        Self {
            conn: Arc::new(conn),
            bus,
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.conn.is_closed()
    }

    async fn dispatch(&self, action: &'static str, command: Vec<Value>) -> Result<Value> {
        log::debug!("{}: {:?}", action, command);
        match self.conn.request(command).await {
            Ok(data) => Ok(data),
            Err(e) => Err(self.report(action, e)),
        }
    }

    fn report(&self, action: &str, error: MpvError) -> MpvError {
        log::error!("Player command '{}' failed: {}", action, error);
        self.bus.emit(PlayerEvent::Error {
            action: action.to_string(),
            message: error.kind().describe().to_string(),
        });
        error
    }

    /// Like `get_property`, but failures are only logged at debug level.
    /// Used by periodic polling where a missing value is routine.
    pub(crate) async fn probe_property(&self, name: &str) -> Option<Value> {
        match self.conn.request(vec![json!("get_property"), json!(name)]).await {
            Ok(data) => Some(data),
            Err(e) => {
                log::debug!("Polling '{}' failed: {}", name, e);
                None
            }
        }
    }

    pub async fn get_property(&self, name: &str) -> Result<Value> {
        self.dispatch("get_property", vec![json!("get_property"), json!(name)])
            .await
    }

    pub async fn set_property(&self, name: &str, value: Value) -> Result<()> {
        self.dispatch("set_property", vec![json!("set_property"), json!(name), value])
            .await
            .map(drop)
    }

    pub async fn observe_property(&self, id: u64, name: &str) -> Result<()> {
        self.dispatch(
            "observe_property",
            vec![json!("observe_property"), json!(id), json!(name)],
        )
        .await
        .map(drop)
    }

    pub async fn play(&self) -> Result<()> {
        self.dispatch("play", vec![json!("set_property"), json!("pause"), json!(false)])
            .await
            .map(drop)
    }

    pub async fn pause(&self) -> Result<()> {
        self.dispatch("pause", vec![json!("set_property"), json!("pause"), json!(true)])
            .await
            .map(drop)
    }

    pub async fn stop(&self) -> Result<()> {
        self.dispatch("stop", vec![json!("stop")]).await.map(drop)
    }

    pub async fn next(&self) -> Result<()> {
        self.dispatch("next", vec![json!("playlist-next")]).await.map(drop)
    }

    pub async fn previous(&self) -> Result<()> {
        self.dispatch("previous", vec![json!("playlist-prev")]).await.map(drop)
    }

    pub async fn seek_relative(&self, seconds: f64) -> Result<()> {
        self.dispatch(
            "seek_relative",
            vec![json!("seek"), json!(seconds), json!("relative")],
        )
        .await
        .map(drop)
    }

    pub async fn seek_absolute(&self, seconds: f64) -> Result<()> {
        self.dispatch(
            "seek_absolute",
            vec![json!("seek"), json!(seconds.max(0.0)), json!("absolute")],
        )
        .await
        .map(drop)
    }

    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        let volume = volume.min(100);
        self.dispatch(
            "set_volume",
            vec![json!("set_property"), json!("volume"), json!(volume)],
        )
        .await
        .map(drop)
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        self.dispatch("set_mute", vec![json!("set_property"), json!("mute"), json!(muted)])
            .await
            .map(drop)
    }

    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.dispatch("set_speed", vec![json!("set_property"), json!("speed"), json!(speed)])
            .await
            .map(drop)
    }

    /// Apply every property; one bad entry does not stop the rest.
    /// Returns the first failure, if any.
    pub async fn set_properties(&self, properties: &BTreeMap<String, Value>) -> Result<()> {
        let mut first_error = None;
        for (name, value) in properties {
            if let Err(e) = self.set_property(name, value.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn load(&self, url: &str, mode: LoadMode) -> Result<()> {
        match self
            .conn
            .request(vec![json!("loadfile"), json!(url), json!(mode.as_str())])
            .await
        {
            Ok(_) => {
                log::debug!("load: {} ({})", url, mode.as_str());
                Ok(())
            }
            Err(e) => {
                let e = match e.kind() {
                    ErrorKind::NotRunning | ErrorKind::Timeout | ErrorKind::SendFailed => e,
                    _ => MpvError::new(ErrorKind::LoadFailed, format!("{}: {}", url, e.detail())),
                };
                Err(self.report("load", e))
            }
        }
    }

    pub async fn playlist_remove(&self, index: i64) -> Result<()> {
        self.dispatch("playlist_remove", vec![json!("playlist-remove"), json!(index)])
            .await
            .map(drop)
    }

    pub async fn playlist_clear(&self) -> Result<()> {
        self.dispatch("playlist_clear", vec![json!("playlist-clear")])
            .await
            .map(drop)
    }

    pub async fn playlist_count(&self) -> Result<i64> {
        let data = self.get_property("playlist-count").await?;
        data.as_i64().ok_or_else(|| {
            self.report(
                "playlist_count",
                MpvError::new(ErrorKind::UnsupportedProtocol, format!("unexpected value {}", data)),
            )
        })
    }

    pub async fn get_time(&self) -> Result<f64> {
        let data = self.get_property("time-pos").await?;
        Ok(data.as_f64().unwrap_or(0.0))
    }

    /// Raw tag map of the current file or stream
    pub async fn get_metadata(&self) -> Result<Value> {
        self.get_property("metadata").await
    }

    pub async fn get_audio_devices(&self) -> Result<Vec<AudioDevice>> {
        let data = self.get_property("audio-device-list").await?;
        serde_json::from_value(data).map_err(|e| {
            self.report(
                "get_audio_devices",
                MpvError::new(ErrorKind::UnsupportedProtocol, e.to_string()),
            )
        })
    }

    pub async fn quit(&self) -> Result<()> {
        match self.conn.request(vec![json!("quit")]).await {
            Ok(_) => Ok(()),
            // The player may close the channel before it manages to reply
            Err(e) if e.kind() == ErrorKind::NotRunning => {
                log::debug!("quit: channel closed while quitting");
                Ok(())
            }
            Err(e) => Err(self.report("quit", e)),
        }
    }
}
