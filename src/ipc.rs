//! JSON IPC transport: newline-delimited requests, replies and pushed events.

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ErrorKind, MpvError, Result};

/// Any bidirectional byte stream the player can be reached through
pub trait IpcStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IpcStream for T {}

pub type BoxedStream = Box<dyn IpcStream>;

/// Unsolicited message pushed by the player
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    request_id: u64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    data: Value,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// A live control channel. Writes are serialized, so requests reach the
/// player in the order they were issued.
pub struct Connection {
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Take ownership of `stream`; pushed events are forwarded to `events`.
    pub fn open(stream: BoxedStream, events: mpsc::UnboundedSender<RawEvent>, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(Self::read_loop(
            read_half,
            pending.clone(),
            closed.clone(),
            events,
        ));

        Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            timeout,
            reader,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its reply
    pub async fn request(&self, command: Vec<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(MpvError::new(ErrorKind::NotRunning, "control channel closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // The reader may have drained the map just before the insert
        if self.is_closed() {
            self.pending.lock().remove(&id);
            return Err(MpvError::new(ErrorKind::NotRunning, "control channel closed"));
        }

        let mut line = json!({ "command": command, "request_id": id }).to_string();
        line.push('\n');

        let write_result = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = write_result {
            self.pending.lock().remove(&id);
            return Err(MpvError::new(ErrorKind::SendFailed, e.to_string()));
        }

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(MpvError::new(ErrorKind::NotRunning, "control channel closed"));
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(MpvError::new(
                    ErrorKind::Timeout,
                    format!("no reply within {}ms", self.timeout.as_millis()),
                ));
            }
        };

        if reply.error.is_empty() || reply.error == "success" {
            Ok(reply.data)
        } else {
            Err(MpvError::new(ErrorKind::from_reply(&reply.error), reply.error))
        }
    }

    async fn read_loop(
        read_half: ReadHalf<BoxedStream>,
        pending: Pending,
        closed: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<RawEvent>,
    ) {
        let mut lines = BufReader::new(read_half).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    Self::dispatch_line(&line, &pending, &events);
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Error reading control channel: {}", e);
                    break;
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with a closed-channel error
        pending.lock().clear();
        log::debug!("Control channel reader stopped");
    }

    fn dispatch_line(line: &str, pending: &Pending, events: &mpsc::UnboundedSender<RawEvent>) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                log::error!("Failed to parse control channel message: {} - {}", e, line);
                return;
            }
        };

        if value.get("event").is_some() {
            match serde_json::from_value::<RawEvent>(value) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        log::debug!("Event receiver gone, dropping player event");
                    }
                }
                Err(e) => log::error!("Malformed player event: {} - {}", e, line),
            }
            return;
        }

        match serde_json::from_value::<Reply>(value) {
            Ok(reply) => match pending.lock().remove(&reply.request_id) {
                Some(waiter) => {
                    let _ = waiter.send(reply);
                }
                None => log::debug!("Reply for unknown request {}", reply.request_id),
            },
            Err(e) => log::warn!("Unrecognised control channel message: {} - {}", e, line),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
