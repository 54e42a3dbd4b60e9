//! Out-of-process playback engine driving an mpv subprocess over its JSON IPC channel.

pub mod bridge;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fade;
pub mod ipc;
pub mod metadata;
pub mod process;
pub mod queue;
mod relay;
pub mod shutdown;
pub mod state;
pub mod supervisor;
pub mod types;

pub use config::{ChannelAddress, EngineConfig, LaunchConfig};
pub use engine::Engine;
pub use error::{ErrorKind, MpvError};
pub use events::PlayerEvent;
pub use ipc::{BoxedStream, IpcStream};
pub use process::{Launcher, PlayerProcess, SystemLauncher};
pub use shutdown::{ExitTrigger, ShutdownPhase};
pub use types::{AudioDevice, PlaybackState, PlaybackStatus, StreamMetadata};
