//! Line-oriented JSON bridge between the engine and a UI process.
//!
//! Commands arrive one JSON object per line on stdin; events and replies
//! leave one JSON object per line on stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::error::MpvError;
use crate::events::PlayerEvent;
use crate::shutdown::ExitTrigger;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    SeekRelative { seconds: f64 },
    SeekAbsolute { seconds: f64 },
    SetVolume { volume: u8 },
    SetMute { muted: bool },
    SetSpeed { speed: f64 },
    SetProperties { properties: BTreeMap<String, Value> },
    SetQueue {
        #[serde(default)]
        current: Option<String>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        force_pause: Option<bool>,
    },
    SetQueueNext {
        #[serde(default)]
        url: Option<String>,
    },
    AutoNext {
        #[serde(default)]
        url: Option<String>,
    },
    GetTime,
    GetMetadata,
    GetStreamMetadata,
    GetAudioDevices,
    UpdateMetadata { data: Value },
    GetCachedMetadata,
    SetRadio { active: bool },
    SetFade { enabled: bool },
    IsRunning,
    Restart,
    Quit,
    Exit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Event(PlayerEvent),
    Reply {
        #[serde(rename = "type")]
        kind: &'static str,
        command: String,
        ok: bool,
        #[serde(skip_serializing_if = "Value::is_null")]
        data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Outgoing {
    fn reply(command: &str, result: Result<Value, MpvError>) -> Self {
        let (ok, data, error) = match result {
            Ok(data) => (true, data, None),
            Err(e) => (false, Value::Null, Some(e.to_string())),
        };
        Outgoing::Reply {
            kind: "reply",
            command: command.to_string(),
            ok,
            data,
            error,
        }
    }
}

/// What the read loop should do after a command
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Bridge {
    engine: Arc<Engine>,
    out: mpsc::UnboundedSender<Outgoing>,
}

impl Bridge {
    pub fn new(engine: Arc<Engine>, out: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { engine, out }
    }

    /// Forward bus events into the outgoing stream until the bus closes or the task is aborted
    pub fn forward_events(
        mut events: broadcast::Receiver<PlayerEvent>,
        out: mpsc::UnboundedSender<Outgoing>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if out.send(Outgoing::Event(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("UI bridge lagged, {} events missed", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            log::debug!("Event forwarder stopped");
        })
    }

    /// Serialize outgoing messages, one per line. Returns once every sender is
    /// gone and the queue is drained.
    pub async fn write_outgoing<W: AsyncWrite + Unpin>(mut rx: mpsc::UnboundedReceiver<Outgoing>, mut writer: W) {
        while let Some(message) = rx.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Failed to serialize outgoing message: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                log::error!("Error writing to stdout: {}", e);
                break;
            }
            let _ = writer.flush().await;
        }
    }

    /// Read commands until EOF, an `exit` command or an exit trigger
    pub async fn run<R: AsyncBufRead + Unpin>(
        &self,
        reader: R,
        mut exit_triggers: mpsc::UnboundedReceiver<ExitTrigger>,
    ) -> ExitTrigger {
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                trigger = exit_triggers.recv() => {
                    return trigger.unwrap_or(ExitTrigger::Exit);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        log::debug!("UI command: {}", line);
                        match serde_json::from_str::<UiCommand>(&line) {
                            Ok(command) => {
                                if self.handle(command).await == Flow::Exit {
                                    return ExitTrigger::Quit;
                                }
                            }
                            Err(e) => {
                                log::error!("Failed to parse UI command: {} - {}", e, line);
                            }
                        }
                    }
                    Ok(None) => {
                        log::info!("UI input closed");
                        return ExitTrigger::Exit;
                    }
                    Err(e) => {
                        log::error!("Error reading UI input: {}", e);
                        return ExitTrigger::Exit;
                    }
                }
            }
        }
    }

    fn send(&self, message: Outgoing) {
        if self.out.send(message).is_err() {
            log::warn!("Output writer gone, dropping reply");
        }
    }

    fn reply_unit(&self, command: &str, result: Result<(), MpvError>) {
        self.send(Outgoing::reply(command, result.map(|_| Value::Null)));
    }

    async fn handle(&self, command: UiCommand) -> Flow {
        let engine = &self.engine;
        match command {
            UiCommand::Play => self.reply_unit("play", engine.play().await),
            UiCommand::Pause => self.reply_unit("pause", engine.pause().await),
            UiCommand::Stop => self.reply_unit("stop", engine.stop().await),
            UiCommand::Next => self.reply_unit("next", engine.next().await),
            UiCommand::Previous => self.reply_unit("previous", engine.previous().await),
            UiCommand::SeekRelative { seconds } => {
                self.reply_unit("seek_relative", engine.seek_relative(seconds).await)
            }
            UiCommand::SeekAbsolute { seconds } => {
                self.reply_unit("seek_absolute", engine.seek_absolute(seconds).await)
            }
            UiCommand::SetVolume { volume } => {
                self.reply_unit("set_volume", engine.set_volume(volume).await)
            }
            UiCommand::SetMute { muted } => self.reply_unit("set_mute", engine.set_mute(muted).await),
            UiCommand::SetSpeed { speed } => {
                self.reply_unit("set_speed", engine.set_speed(speed).await)
            }
            UiCommand::SetProperties { properties } => {
                self.reply_unit("set_properties", engine.set_properties(&properties).await)
            }
            UiCommand::SetQueue {
                current,
                next,
                force_pause,
            } => self.reply_unit(
                "set_queue",
                engine.set_queue(current, next, force_pause).await,
            ),
            UiCommand::SetQueueNext { url } => {
                self.reply_unit("set_queue_next", engine.set_queue_next(url).await)
            }
            UiCommand::AutoNext { url } => self.reply_unit("auto_next", engine.auto_next(url).await),
            UiCommand::GetTime => {
                let result = engine.get_time().await.map(Value::from);
                self.send(Outgoing::reply("get_time", result));
            }
            UiCommand::GetMetadata => {
                self.send(Outgoing::reply("get_metadata", engine.get_metadata().await));
            }
            UiCommand::GetStreamMetadata => {
                let result = engine
                    .stream_metadata()
                    .await
                    .map(|meta| serde_json::to_value(meta).unwrap_or(Value::Null));
                self.send(Outgoing::reply("get_stream_metadata", result));
            }
            UiCommand::GetAudioDevices => {
                let result = engine
                    .get_audio_devices()
                    .await
                    .map(|devices| serde_json::to_value(devices).unwrap_or(Value::Null));
                self.send(Outgoing::reply("get_audio_devices", result));
            }
            UiCommand::UpdateMetadata { data } => {
                engine.update_metadata(data);
                self.reply_unit("update_metadata", Ok(()));
            }
            UiCommand::GetCachedMetadata => {
                let data = engine.current_metadata().unwrap_or(Value::Null);
                self.send(Outgoing::reply("get_cached_metadata", Ok(data)));
            }
            UiCommand::SetRadio { active } => {
                engine.set_radio_active(active);
                self.reply_unit("set_radio", Ok(()));
            }
            UiCommand::SetFade { enabled } => {
                engine.set_fade_enabled(enabled);
                self.reply_unit("set_fade", Ok(()));
            }
            UiCommand::IsRunning => {
                self.send(Outgoing::reply("is_running", Ok(Value::from(engine.is_running()))));
            }
            UiCommand::Restart => {
                let started = engine.restart(None).await;
                self.send(Outgoing::reply("restart", Ok(Value::from(started))));
            }
            UiCommand::Quit => {
                engine.quit().await;
                self.reply_unit("quit", Ok(()));
            }
            UiCommand::Exit => return Flow::Exit,
        }
        Flow::Continue
    }
}
