#![allow(dead_code)]

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{broadcast, mpsc};

use mpv_engine::{
    BoxedStream, ChannelAddress, Engine, EngineConfig, LaunchConfig, Launcher, PlayerEvent,
    PlayerProcess,
};

#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Spawning fails as if the binary were missing
    pub fail_spawn: bool,
    /// `quit` is acknowledged but the process keeps running until killed
    pub hang_on_quit: bool,
    /// `quit` is rejected with an error reply
    pub reject_quit: bool,
}

#[derive(Default)]
struct Shared {
    options: FakeOptions,
    commands: Mutex<Vec<Vec<Value>>>,
    launches: Mutex<Vec<LaunchConfig>>,
    pending: Mutex<Option<DuplexStream>>,
    push: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    playlist: Mutex<Arc<Mutex<Vec<String>>>>,
    processes: Mutex<Vec<Arc<AtomicBool>>>,
    metadata: Mutex<Value>,
    spawns: AtomicUsize,
    kills: AtomicUsize,
    next_pid: AtomicU32,
}

/// In-memory stand-in for the player binary and its control channel
#[derive(Clone)]
pub struct FakeLauncher {
    shared: Arc<Shared>,
}

impl FakeLauncher {
    pub fn new(options: FakeOptions) -> Self {
        let shared = Shared {
            options,
            metadata: Mutex::new(json!({"icy-title": "Stereolab - French Disko"})),
            next_pid: AtomicU32::new(4000),
            ..Default::default()
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn commands(&self) -> Vec<Vec<Value>> {
        self.shared.commands.lock().clone()
    }

    /// Commands that change player state, without queries and subscriptions
    pub fn mutations(&self) -> Vec<Vec<Value>> {
        self.commands()
            .into_iter()
            .filter(|cmd| {
                !matches!(
                    cmd.first().and_then(Value::as_str),
                    Some("get_property") | Some("observe_property")
                )
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.shared.commands.lock().clear();
    }

    pub fn launches(&self) -> Vec<LaunchConfig> {
        self.shared.launches.lock().clone()
    }

    pub fn spawns(&self) -> usize {
        self.shared.spawns.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.shared.kills.load(Ordering::SeqCst)
    }

    /// Number of spawned processes still alive
    pub fn alive(&self) -> usize {
        self.shared
            .processes
            .lock()
            .iter()
            .filter(|alive| alive.load(Ordering::SeqCst))
            .count()
    }

    pub fn set_metadata(&self, metadata: Value) {
        *self.shared.metadata.lock() = metadata;
    }

    /// Playlist of the most recently spawned player
    pub fn playlist(&self) -> Vec<String> {
        let playlist = self.shared.playlist.lock().clone();
        let entries = playlist.lock().clone();
        entries
    }

    /// Push an unsolicited event from the most recently spawned player
    pub fn push_event(&self, event: Value) {
        if let Some(push) = self.shared.push.lock().as_ref() {
            let _ = push.send(event);
        }
    }
}

impl Launcher for FakeLauncher {
    fn spawn(&self, launch: &LaunchConfig) -> io::Result<Box<dyn PlayerProcess>> {
        self.shared.spawns.fetch_add(1, Ordering::SeqCst);
        self.shared.launches.lock().push(launch.clone());
        if self.shared.options.fail_spawn {
            return Err(io::Error::new(io::ErrorKind::NotFound, "mpv not found"));
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.shared.processes.lock().push(alive.clone());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        *self.shared.pending.lock() = Some(client);
        *self.shared.push.lock() = Some(push_tx);
        let playlist = Arc::new(Mutex::new(Vec::new()));
        *self.shared.playlist.lock() = playlist.clone();

        tokio::spawn(serve(self.shared.clone(), server, push_rx, alive.clone(), playlist));

        Ok(Box::new(FakeProcess {
            pid: self.shared.next_pid.fetch_add(1, Ordering::SeqCst),
            alive,
            shared: self.shared.clone(),
        }))
    }

    fn connect<'a>(&'a self, _address: &'a ChannelAddress) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            match self.shared.pending.lock().take() {
                Some(stream) => Ok(Box::new(stream) as BoxedStream),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no listener")),
            }
        })
    }
}

struct FakeProcess {
    pid: u32,
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl PlayerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.shared.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

async fn serve(
    shared: Arc<Shared>,
    stream: DuplexStream,
    mut push: mpsc::UnboundedReceiver<Value>,
    alive: Arc<AtomicBool>,
    playlist: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(request) = serde_json::from_str::<Value>(&line) else { continue };
                let id = request["request_id"].clone();
                let command: Vec<Value> = request["command"].as_array().cloned().unwrap_or_default();
                shared.commands.lock().push(command.clone());

                let name = command.first().and_then(Value::as_str).unwrap_or_default();
                let result = respond(&shared, &mut playlist.lock(), name, &command);
                let reply = match result {
                    Ok(data) => json!({"request_id": id, "error": "success", "data": data}),
                    Err(error) => json!({"request_id": id, "error": error}),
                };
                let exits = name == "quit" && !shared.options.reject_quit && !shared.options.hang_on_quit;
                if exits {
                    alive.store(false, Ordering::SeqCst);
                }
                if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() || exits {
                    break;
                }
            }
            Some(event) = push.recv() => {
                if write.write_all(format!("{}\n", event).as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn respond(shared: &Shared, playlist: &mut Vec<String>, name: &str, command: &[Value]) -> Result<Value, &'static str> {
    let arg = |index: usize| command.get(index).cloned().unwrap_or(Value::Null);

    match name {
        "get_property" => match arg(1).as_str().unwrap_or_default() {
            "mpv-version" => Ok(json!("mpv 0.38.0")),
            "playlist-count" => Ok(json!(playlist.len())),
            "time-pos" => Ok(json!(42.5)),
            "metadata" => Ok(shared.metadata.lock().clone()),
            "audio-device-list" => Ok(json!([
                {"name": "auto", "description": "Autoselect device"},
                {"name": "alsa/default", "description": "Default (alsa)"}
            ])),
            _ => Err("property unavailable"),
        },
        "loadfile" => {
            let url = arg(1).as_str().unwrap_or_default().to_string();
            if url.starts_with("broken://") {
                return Err("error running command");
            }
            match arg(2).as_str() {
                Some("append") => playlist.push(url),
                _ => *playlist = vec![url],
            }
            Ok(Value::Null)
        }
        "playlist-remove" => {
            let index = arg(1).as_u64().unwrap_or(u64::MAX) as usize;
            if index < playlist.len() {
                playlist.remove(index);
                Ok(Value::Null)
            } else {
                Err("invalid parameter")
            }
        }
        "playlist-clear" => {
            playlist.truncate(1);
            Ok(Value::Null)
        }
        "quit" if shared.options.reject_quit => Err("error running command"),
        _ => Ok(Value::Null),
    }
}

/// Short timings so tests do not sit in poll loops
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        fade_on_status_change: false,
        start_attempts: 5,
        start_poll_interval_ms: 10,
        exit_poll_attempts: 20,
        exit_poll_interval_ms: 100,
        time_update_interval_ms: 60_000,
        ..EngineConfig::default()
    }
}

pub fn engine_with(options: FakeOptions, config: EngineConfig) -> (FakeLauncher, Arc<Engine>) {
    let launcher = FakeLauncher::new(options);
    let engine = Engine::new(config, Arc::new(launcher.clone()));
    (launcher, Arc::new(engine))
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for<F>(events: &mut broadcast::Receiver<PlayerEvent>, mut pred: F) -> PlayerEvent
where
    F: FnMut(&PlayerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Volumes the engine set, in order
pub fn volumes(commands: &[Vec<Value>]) -> Vec<u64> {
    commands
        .iter()
        .filter(|cmd| cmd.len() == 3 && cmd[0] == "set_property" && cmd[1] == "volume")
        .filter_map(|cmd| cmd[2].as_u64())
        .collect()
}
