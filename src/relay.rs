//! Forwards player events to the UI bus and derives queue rotation from
//! raw playlist position changes.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::MpvClient;
use crate::error::Result;
use crate::events::{EventBus, PlayerEvent};
use crate::ipc::RawEvent;
use crate::state::SharedState;
use crate::types::PlaybackStatus;

/// Properties the relay subscribes to, with their observer ids
const OBSERVED: &[(u64, &str)] = &[
    (1, "playlist-pos"),
    (2, "pause"),
    (3, "idle-active"),
    (4, "mute"),
    (5, "speed"),
];

pub(crate) async fn observe_properties(client: &MpvClient) -> Result<()> {
    for (id, name) in OBSERVED {
        client.observe_property(*id, name).await?;
    }
    Ok(())
}

/// Tasks forwarding one player instance's events; aborted on teardown
pub(crate) struct RelayTasks {
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl RelayTasks {
    pub(crate) fn abort(&self) {
        self.pump.abort();
        self.ticker.abort();
    }
}

#[derive(Clone)]
pub(crate) struct Relay {
    client: MpvClient,
    state: SharedState,
    bus: EventBus,
}

impl Relay {
    pub(crate) fn new(client: MpvClient, state: SharedState, bus: EventBus) -> Self {
        Self { client, state, bus }
    }

    pub(crate) fn spawn(self, events: mpsc::UnboundedReceiver<RawEvent>, tick: Duration) -> RelayTasks {
        let ticker = tokio::spawn(self.clone().poll_time(tick));
        let pump = tokio::spawn(self.pump(events));
        RelayTasks { pump, ticker }
    }

    async fn pump(self, mut events: mpsc::UnboundedReceiver<RawEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        log::warn!("Player event stream ended");
    }

    pub(crate) async fn handle_event(&self, event: RawEvent) {
        match event.event.as_str() {
            "property-change" => match event.name.as_deref() {
                Some(name) => self.property_changed(name, event.data).await,
                None => log::warn!("property-change event without a name"),
            },
            "end-file" => log::debug!("Player finished a file: {:?}", event.reason),
            "start-file" | "file-loaded" | "playback-restart" | "seek" => {
                log::debug!("Player event: {}", event.event)
            }
            other => log::trace!("Ignoring player event: {}", other),
        }
    }

    async fn property_changed(&self, name: &str, value: Value) {
        self.bus.emit(PlayerEvent::Status {
            property: name.to_string(),
            value: value.clone(),
        });

        match name {
            "playlist-pos" => self.playlist_position_changed(value.as_i64()).await,
            "pause" => match value.as_bool() {
                Some(true) => {
                    self.set_status(PlaybackStatus::Paused);
                    self.bus.emit(PlayerEvent::Paused);
                }
                Some(false) => {
                    self.set_status(PlaybackStatus::Playing);
                    self.bus.emit(PlayerEvent::Resumed);
                }
                None => {}
            },
            "idle-active" => {
                if value.as_bool() == Some(true) {
                    self.set_status(PlaybackStatus::Stopped);
                    self.bus.emit(PlayerEvent::Stopped);
                }
            }
            "mute" => {
                if let Some(muted) = value.as_bool() {
                    self.state.write().playback.muted = muted;
                }
            }
            "speed" => {
                if let Some(speed) = value.as_f64() {
                    self.state.write().playback.speed = speed;
                }
            }
            _ => {}
        }
    }

    async fn playlist_position_changed(&self, position: Option<i64>) {
        match position {
            // Playlist exhausted: nothing was prefetched, so there is no track to
            // rotate into. Pause only; no AutoNext.
            Some(-1) => {
                log::debug!("Playlist exhausted, pausing");
                self.set_status(PlaybackStatus::Paused);
                let _ = self.client.pause().await;
            }
            Some(0) | None => {}
            Some(position) => {
                let current = self.state.write().queue.advance();
                log::info!("Player advanced to position {}, now playing {:?}", position, current);
                self.bus.emit(PlayerEvent::AutoNext { current });
            }
        }
    }

    fn set_status(&self, status: PlaybackStatus) {
        self.state.write().playback.status = status;
    }

    async fn poll_time(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.state.read().playback.status != PlaybackStatus::Playing {
                continue;
            }
            if let Some(seconds) = self.client.probe_property("time-pos").await.and_then(|v| v.as_f64()) {
                self.state.write().playback.position_secs = seconds;
                self.bus.emit(PlayerEvent::TimePosition { seconds });
            }
        }
    }
}
