use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::MpvClient;
use crate::config::{ChannelAddress, EngineConfig, LaunchConfig};
use crate::error::{ErrorKind, MpvError, Result};
use crate::events::EventBus;
use crate::ipc::{BoxedStream, Connection, RawEvent};
use crate::process::{remove_channel_file, Launcher, PlayerProcess};
use crate::relay::{self, Relay, RelayTasks};
use crate::state::SharedState;

/// Process shared between its handle and the teardown bookkeeping; locked only briefly
type SharedProcess = Arc<Mutex<Box<dyn PlayerProcess>>>;

/// A running player instance. Only the supervisor creates or destroys it.
pub struct PlayerHandle {
    pid: Option<u32>,
    address: ChannelAddress,
    process: SharedProcess,
    client: MpvClient,
    relay: Option<RelayTasks>,
}

impl PlayerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Started,
    /// A newer stop or restart took over while this one was waiting
    Superseded,
}

/// Owns the lifecycle of the player subprocess; at most one live handle.
pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    state: SharedState,
    bus: EventBus,
    handle: Mutex<Option<PlayerHandle>>,
    /// Instances being torn down; still reachable by `kill_now`
    retiring: Mutex<Vec<(SharedProcess, ChannelAddress)>>,
    /// Serializes start/stop/restart so an old instance is gone before a new one binds
    lifecycle: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    host_pid: u32,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>, state: SharedState, bus: EventBus) -> Self {
        Self {
            launcher,
            state,
            bus,
            handle: Mutex::new(None),
            retiring: Mutex::new(Vec::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            host_pid: std::process::id(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_running(&self) -> bool {
        let guard = self.handle.lock();
        match guard.as_ref() {
            Some(handle) => handle.process.lock().is_alive(),
            None => false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.lock().as_ref().and_then(|h| h.pid)
    }

    /// Command client of the live instance
    pub fn client(&self) -> Result<MpvClient> {
        self.handle
            .lock()
            .as_ref()
            .map(|h| h.client.clone())
            .ok_or_else(MpvError::not_running)
    }

    /// Launch the player and bring up its control channel and event relay
    pub async fn start(&self, config: &EngineConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked(config).await
    }

    async fn start_locked(&self, config: &EngineConfig) -> Result<()> {
        if let Some(mut stale) = self.take_dead_handle()? {
            log::warn!("Previous player {:?} died, clearing its handle", stale.pid);
            if let Some(relay) = stale.relay.take() {
                relay.abort();
            }
            remove_channel_file(&stale.address);
        }

        let generation = self.generation();
        let launch = LaunchConfig::build(config, ChannelAddress::for_process(self.host_pid));
        let (process, client, events) = self.launch(&launch, config).await?;
        let pid = process.id();
        let process: SharedProcess = Arc::new(Mutex::new(process));

        if self.generation() != generation {
            log::info!("Start superseded by a newer stop or restart, discarding instance");
            quit_or_kill(&client, &process, &launch.address, config).await;
            return Err(MpvError::new(ErrorKind::NotRunning, "start cancelled"));
        }

        let relay = Relay::new(client.clone(), self.state.clone(), self.bus.clone())
            .spawn(events, config.time_update_interval());

        let handle = PlayerHandle {
            pid,
            address: launch.address.clone(),
            process,
            client,
            relay: Some(relay),
        };
        log::info!("Player running with PID {:?} on {}", handle.pid, handle.address);

        let rejected = {
            let mut slot = self.handle.lock();
            if slot.is_some() {
                Some(handle)
            } else {
                *slot = Some(handle);
                None
            }
        };
        if let Some(handle) = rejected {
            // A concurrent start won the race; this one never becomes visible
            self.retire(handle, config).await;
            return Err(MpvError::new(
                ErrorKind::AlreadyRunning,
                "another start completed first",
            ));
        }
        Ok(())
    }

    /// Take the handle if its process has died; error if it is still alive
    fn take_dead_handle(&self) -> Result<Option<PlayerHandle>> {
        let mut slot = self.handle.lock();
        let alive = match slot.as_ref() {
            Some(handle) => handle.process.lock().is_alive(),
            None => return Ok(None),
        };
        if alive {
            Err(MpvError::new(
                ErrorKind::AlreadyRunning,
                "a player instance is already supervised",
            ))
        } else {
            Ok(slot.take())
        }
    }

    /// Spawn, connect, handshake and configure a player at `launch.address`.
    /// On failure the spawned process is killed before returning.
    async fn launch(
        &self,
        launch: &LaunchConfig,
        config: &EngineConfig,
    ) -> Result<(Box<dyn PlayerProcess>, MpvClient, mpsc::UnboundedReceiver<RawEvent>)> {
        // A previous crash may have left the socket file behind
        remove_channel_file(&launch.address);

        let mut process = self.launcher.spawn(launch).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                MpvError::new(ErrorKind::BinaryNotFound, format!("{:?}", launch.binary))
            } else {
                MpvError::new(ErrorKind::InvalidArgument, format!("{:?}: {}", launch.binary, e))
            }
        })?;

        let stream = match self.connect(process.as_mut(), &launch.address, config).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to connect to player: {}", e);
                kill_process(process.as_mut(), &launch.address);
                return Err(e);
            }
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let conn = Connection::open(stream, event_tx, config.command_timeout());
        let client = MpvClient::new(conn, self.bus.clone());

        let ready = async {
            let version = client.get_property("mpv-version").await?;
            log::info!("Control channel live ({})", version);
            if !launch.properties.is_empty() {
                // Individual failures are already logged; keep going
                let _ = client.set_properties(&launch.properties).await;
            }
            relay::observe_properties(&client).await
        };
        if let Err(e) = ready.await {
            log::error!("Player handshake failed: {}", e);
            kill_process(process.as_mut(), &launch.address);
            return Err(MpvError::new(ErrorKind::BindFailed, e.to_string()));
        }

        Ok((process, client, event_rx))
    }

    async fn connect(
        &self,
        process: &mut dyn PlayerProcess,
        address: &ChannelAddress,
        config: &EngineConfig,
    ) -> Result<BoxedStream> {
        let attempts = config.start_attempts.max(1);
        for attempt in 1..=attempts {
            match self.launcher.connect(address).await {
                Ok(stream) => {
                    log::debug!("Connected to {} after {} attempt(s)", address, attempt);
                    return Ok(stream);
                }
                Err(e) => {
                    if !process.is_alive() {
                        return Err(MpvError::new(
                            ErrorKind::BindFailed,
                            format!("player exited before opening {}: {}", address, e),
                        ));
                    }
                    log::debug!("Control channel not ready (attempt {}/{}): {}", attempt, attempts, e);
                }
            }
            tokio::time::sleep(config.start_poll_interval()).await;
        }
        Err(MpvError::new(
            ErrorKind::Timeout,
            format!("control channel {} not available after {} attempts", address, attempts),
        ))
    }

    /// Stop the current instance (if any), wait for it to go away, start a new one
    pub async fn restart(&self, config: &EngineConfig) -> Result<RestartOutcome> {
        let generation = self.bump_generation();
        log::info!("Restarting player (generation {})", generation);
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(handle) = self.take_handle() {
            let _ = handle.client.stop().await;
            self.retire(handle, config).await;
        }

        if self.generation() != generation {
            log::info!("Restart {} superseded, not starting", generation);
            return Ok(RestartOutcome::Superseded);
        }

        self.start_locked(config).await?;
        Ok(RestartOutcome::Started)
    }

    /// Graceful quit with forceful fallback. Never fails; no-op without a handle.
    pub async fn stop(&self, config: &EngineConfig) {
        self.bump_generation();
        let _lifecycle = self.lifecycle.lock().await;
        match self.take_handle() {
            Some(handle) => self.retire(handle, config).await,
            None => log::debug!("stop: no player instance"),
        }
    }

    /// Synchronous teardown for paths that cannot await (panic hook).
    /// Also kills instances an async stop or restart is still waiting on.
    pub fn kill_now(&self) {
        self.bump_generation();
        match self.handle.try_lock() {
            Some(mut guard) => {
                if let Some(mut handle) = guard.take() {
                    if let Some(relay) = handle.relay.take() {
                        relay.abort();
                    }
                    kill_shared(&handle.process, &handle.address);
                }
            }
            None => log::warn!("kill_now: handle is locked, skipping"),
        }

        match self.retiring.try_lock() {
            Some(retiring) => {
                for (process, address) in retiring.iter() {
                    kill_shared(process, address);
                }
            }
            None => log::warn!("kill_now: teardown list is locked, skipping"),
        }
    }

    fn take_handle(&self) -> Option<PlayerHandle> {
        self.handle.lock().take()
    }

    async fn retire(&self, mut handle: PlayerHandle, config: &EngineConfig) {
        log::info!("Stopping player process {:?}...", handle.pid);
        if let Some(relay) = handle.relay.take() {
            relay.abort();
        }

        self.retiring
            .lock()
            .push((handle.process.clone(), handle.address.clone()));
        quit_or_kill(&handle.client, &handle.process, &handle.address, config).await;
        self.retiring
            .lock()
            .retain(|(process, _)| !Arc::ptr_eq(process, &handle.process));
    }

    /// Launch a throwaway instance at a separate address
    pub async fn spawn_probe(&self, config: &EngineConfig) -> Result<ProbeInstance> {
        let launch = LaunchConfig::build(config, ChannelAddress::probe_for_process(self.host_pid));
        let (process, client, _events) = self.launch(&launch, config).await?;
        Ok(ProbeInstance {
            process: Some(Arc::new(Mutex::new(process))),
            client,
            address: launch.address,
        })
    }
}

/// Ask the player to quit, wait (bounded) for it to exit, kill it if it does not
async fn quit_or_kill(
    client: &MpvClient,
    process: &SharedProcess,
    address: &ChannelAddress,
    config: &EngineConfig,
) {
    let killed = match client.quit().await {
        Ok(()) => false,
        Err(e) => {
            log::warn!("Graceful quit failed ({}), killing player", e);
            kill_shared(process, address);
            true
        }
    };

    if wait_for_exit(process, config.exit_poll_attempts, config.exit_poll_interval()).await {
        log::info!("Player process exited");
        remove_channel_file(address);
    } else if killed {
        let pid = process.lock().id();
        log::error!("Player process {:?} is still alive after being killed", pid);
    } else {
        log::warn!(
            "Player didn't stop after {} checks, killing...",
            config.exit_poll_attempts
        );
        kill_shared(process, address);
    }
}

/// Poll until the process exits or the attempts run out. Returns whether it exited.
async fn wait_for_exit(process: &SharedProcess, attempts: u32, interval: Duration) -> bool {
    for _ in 0..attempts {
        if !process.lock().is_alive() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    let alive = process.lock().is_alive();
    !alive
}

fn kill_shared(process: &SharedProcess, address: &ChannelAddress) {
    // Never block: the panic hook may run on a thread that holds this lock
    match process.try_lock() {
        Some(mut process) => kill_process(process.as_mut(), address),
        None => log::warn!("Player process is locked, not killing it from here"),
    }
}

fn kill_process(process: &mut dyn PlayerProcess, address: &ChannelAddress) {
    if let Err(e) = process.kill() {
        log::error!("Failed to kill player process {:?}: {}", process.id(), e);
    }
    remove_channel_file(address);
}

/// Player started only to answer one query; killed when dropped
pub struct ProbeInstance {
    process: Option<SharedProcess>,
    client: MpvClient,
    address: ChannelAddress,
}

impl ProbeInstance {
    pub fn client(&self) -> &MpvClient {
        &self.client
    }

    pub async fn shutdown(mut self, config: &EngineConfig) {
        if let Some(process) = self.process.take() {
            quit_or_kill(&self.client, &process, &self.address, config).await;
        }
    }
}

impl Drop for ProbeInstance {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            log::warn!("Probe instance dropped without shutdown, killing it");
            kill_shared(&process, &self.address);
        }
    }
}
