use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::client::MpvClient;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::fade::{apply_status, FadeJob, Fader};
use crate::metadata::{parse_stream_metadata, tags_from_value};
use crate::process::{Launcher, SystemLauncher};
use crate::queue::{PlaybackQueue, QueueController};
use crate::shutdown::{ExitTrigger, ShutdownGuard, ShutdownPhase};
use crate::state::{create_state, SharedState};
use crate::supervisor::{RestartOutcome, Supervisor};
use crate::types::{AudioDevice, PlaybackState, PlaybackStatus, StreamMetadata};

/// Everything the UI layer talks to
pub struct Engine {
    config: RwLock<EngineConfig>,
    state: SharedState,
    bus: EventBus,
    supervisor: Supervisor,
    queue: QueueController,
    fader: Fader,
    shutdown: ShutdownGuard,
}

impl Engine {
    pub fn new(config: EngineConfig, launcher: Arc<dyn Launcher>) -> Self {
        let state = create_state();
        let bus = EventBus::new();
        Self {
            config: RwLock::new(config),
            supervisor: Supervisor::new(launcher, state.clone(), bus.clone()),
            queue: QueueController::new(state.clone()),
            fader: Fader::new(),
            shutdown: ShutdownGuard::new(),
            state,
            bus,
        }
    }

    pub fn with_system_launcher(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(SystemLauncher))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state.read().playback.clone()
    }

    pub fn queue(&self) -> PlaybackQueue {
        self.state.read().queue.clone()
    }

    pub fn active_fades(&self) -> usize {
        self.fader.active_jobs()
    }

    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    fn client(&self, action: &str) -> Result<MpvClient> {
        self.supervisor.client().map_err(|e| {
            log::warn!("{}: {}", action, e);
            self.bus.emit(PlayerEvent::Error {
                action: action.to_string(),
                message: e.kind().describe().to_string(),
            });
            e
        })
    }

    // ----- lifecycle -----

    /// Start the player. Returns false (after signalling fallback) if every attempt failed.
    pub async fn initialize(&self) -> bool {
        let config = self.config();
        self.start_with_retries(&config, 0).await
    }

    /// Restart with a new (or the current) configuration
    pub async fn restart(&self, config: Option<EngineConfig>) -> bool {
        if let Some(config) = config {
            *self.config.write() = config;
        }
        let config = self.config();
        self.fader.cancel();

        match self.supervisor.restart(&config).await {
            Ok(RestartOutcome::Started) => {
                self.on_started().await;
                true
            }
            Ok(RestartOutcome::Superseded) => false,
            Err(e) => {
                log::error!("Restart failed: {}", e);
                self.start_with_retries(&config, 1).await
            }
        }
    }

    async fn start_with_retries(&self, config: &EngineConfig, failed: u32) -> bool {
        let attempts = config.start_retries.max(1);
        for attempt in (failed + 1)..=attempts {
            match self.supervisor.start(config).await {
                Ok(()) => {
                    self.on_started().await;
                    return true;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyRunning && self.supervisor.is_running() => {
                    log::info!("Player already running, nothing to start");
                    return true;
                }
                Err(e) => log::error!("Failed to start player (attempt {}/{}): {}", attempt, attempts, e),
            }
        }
        log::error!("Giving up on the player subprocess, signalling fallback");
        self.bus.emit(PlayerEvent::Fallback { is_error: true });
        false
    }

    async fn on_started(&self) {
        self.bus.emit(PlayerEvent::Fallback { is_error: false });
        if let Ok(client) = self.supervisor.client() {
            self.restore_playback(&client).await;
            self.queue.repopulate(&client).await;
        }
    }

    /// A fresh instance starts at mpv defaults; bring it back to the last known settings.
    /// Properties pinned in the config win.
    async fn restore_playback(&self, client: &MpvClient) {
        let playback = self.playback_state();
        let pinned = self.config.read().properties.clone();
        if !pinned.contains_key("volume") {
            let _ = client.set_volume(playback.volume).await;
        }
        if !pinned.contains_key("mute") {
            let _ = client.set_mute(playback.muted).await;
        }
        if !pinned.contains_key("speed") {
            let _ = client.set_speed(playback.speed).await;
        }
    }

    /// Stop the player subprocess. Safe to call when nothing runs.
    pub async fn quit(&self) {
        self.fader.cancel();
        let config = self.config();
        self.supervisor.stop(&config).await;
        self.state.write().playback.status = PlaybackStatus::Idle;
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Single exit path for signals, process exit and quit requests.
    /// Returns whether this call performed the cleanup.
    pub async fn shutdown(&self, trigger: ExitTrigger) -> bool {
        if !self.shutdown.try_begin(trigger) {
            return false;
        }
        self.fader.cancel();
        let config = self.config();
        self.supervisor.stop(&config).await;
        self.shutdown.finish();
        true
    }

    /// Non-async variant for the panic hook. Also runs while an async shutdown
    /// is in progress, since that one will not get to finish after a panic.
    pub fn emergency_shutdown(&self, trigger: ExitTrigger) {
        let claimed = self.shutdown.try_begin(trigger);
        if !claimed && self.shutdown.is_done() {
            return;
        }
        self.fader.cancel();
        self.supervisor.kill_now();
        if claimed {
            self.shutdown.finish();
        }
    }

    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.shutdown.phase()
    }

    // ----- transport -----

    pub async fn play(&self) -> Result<()> {
        self.transition(PlaybackStatus::Playing).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.transition(PlaybackStatus::Paused).await
    }

    async fn transition(&self, target: PlaybackStatus) -> Result<()> {
        let action = if target == PlaybackStatus::Playing { "play" } else { "pause" };
        let client = self.client(action)?;
        let config = self.config();
        let volume = self.state.read().playback.volume;

        if config.fade_on_status_change {
            let job = match target {
                PlaybackStatus::Playing => {
                    FadeJob::fade_in(volume, config.fade_duration(), config.fade_interval())
                }
                _ => FadeJob::fade_out(volume, config.fade_duration(), config.fade_interval()),
            };
            self.fader.start(client, self.state.clone(), job).await;
        } else {
            self.fader.cancel();
            let snap = if target == PlaybackStatus::Playing { volume } else { 0 };
            let _ = client.set_volume(snap).await;
            apply_status(&client, &self.state, target).await;
        }
        Ok(())
    }

    /// Stop playback; a no-op when nothing runs
    pub async fn stop(&self) -> Result<()> {
        self.fader.cancel();
        let Ok(client) = self.supervisor.client() else {
            log::debug!("stop: no player instance");
            return Ok(());
        };
        client.stop().await?;
        self.state.write().playback.status = PlaybackStatus::Stopped;
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.client("next")?.next().await
    }

    pub async fn previous(&self) -> Result<()> {
        self.client("previous")?.previous().await
    }

    pub async fn seek_relative(&self, seconds: f64) -> Result<()> {
        self.client("seek_relative")?.seek_relative(seconds).await
    }

    pub async fn seek_absolute(&self, seconds: f64) -> Result<()> {
        self.client("seek_absolute")?.seek_absolute(seconds).await
    }

    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        let volume = volume.min(100);
        self.state.write().playback.volume = volume;
        self.client("set_volume")?.set_volume(volume).await
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        self.client("set_mute")?.set_mute(muted).await?;
        self.state.write().playback.muted = muted;
        Ok(())
    }

    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.client("set_speed")?.set_speed(speed).await?;
        self.state.write().playback.speed = speed;
        Ok(())
    }

    pub async fn set_properties(&self, properties: &BTreeMap<String, Value>) -> Result<()> {
        self.client("set_properties")?.set_properties(properties).await
    }

    // ----- queue -----

    pub async fn set_queue(
        &self,
        current: Option<String>,
        next: Option<String>,
        force_pause: Option<bool>,
    ) -> Result<()> {
        let client = self.client("set_queue")?;
        if force_pause.is_some() {
            // An explicit play/pause replaces whatever a running ramp would end on
            self.fader.cancel();
        }
        self.queue.set_queue(&client, current, next, force_pause).await;
        Ok(())
    }

    pub async fn set_queue_next(&self, url: Option<String>) -> Result<()> {
        let client = self.client("set_queue_next")?;
        self.queue.set_queue_next(&client, url).await;
        Ok(())
    }

    pub async fn auto_next(&self, url: Option<String>) -> Result<()> {
        let client = self.client("auto_next")?;
        self.queue.auto_next(&client, url).await;
        Ok(())
    }

    /// While a radio stream is active the queue commands are ignored
    pub fn set_radio_active(&self, active: bool) {
        log::info!("Radio mode {}", if active { "on" } else { "off" });
        self.state.write().radio_active = active;
    }

    pub fn set_fade_enabled(&self, enabled: bool) {
        self.config.write().fade_on_status_change = enabled;
    }

    // ----- queries -----

    pub async fn get_time(&self) -> Result<f64> {
        let seconds = self.client("get_time")?.get_time().await?;
        self.state.write().playback.position_secs = seconds;
        Ok(seconds)
    }

    /// Raw tag map reported by the player
    pub async fn get_metadata(&self) -> Result<Value> {
        self.client("get_metadata")?.get_metadata().await
    }

    pub async fn stream_metadata(&self) -> Result<StreamMetadata> {
        let raw = self.get_metadata().await?;
        Ok(parse_stream_metadata(&tags_from_value(&raw)))
    }

    /// Lists output devices, starting a temporary player if none is running
    pub async fn get_audio_devices(&self) -> Result<Vec<AudioDevice>> {
        if self.supervisor.is_running() {
            return self.client("get_audio_devices")?.get_audio_devices().await;
        }

        let config = self.config();
        log::info!("No player running, starting a temporary one to list audio devices");
        let probe = self.supervisor.spawn_probe(&config).await.map_err(|e| {
            log::error!("Failed to start temporary player: {}", e);
            e
        })?;
        let devices = probe.client().get_audio_devices().await;
        probe.shutdown(&config).await;
        devices
    }

    pub fn update_metadata(&self, data: Value) {
        self.state.write().now_playing = Some(data);
    }

    pub fn current_metadata(&self) -> Option<Value> {
        self.state.read().now_playing.clone()
    }
}
