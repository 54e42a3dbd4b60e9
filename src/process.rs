use futures::future::BoxFuture;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::{ChannelAddress, LaunchConfig};
use crate::ipc::BoxedStream;

/// A spawned player subprocess
pub trait PlayerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Whether the process is still running
    fn is_alive(&mut self) -> bool;

    /// Forcefully terminate the process
    fn kill(&mut self) -> io::Result<()>;
}

/// Spawns player processes and connects to their control channels.
pub trait Launcher: Send + Sync {
    fn spawn(&self, launch: &LaunchConfig) -> io::Result<Box<dyn PlayerProcess>>;

    fn connect<'a>(&'a self, address: &'a ChannelAddress) -> BoxFuture<'a, io::Result<BoxedStream>>;
}

/// Launches the real binary and connects over a Unix socket or named pipe
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn spawn(&self, launch: &LaunchConfig) -> io::Result<Box<dyn PlayerProcess>> {
        log::info!("Spawning player: {:?} {}", launch.binary, launch.args.join(" "));

        let mut child = Command::new(&launch.binary)
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        log::info!("Player process spawned with PID: {:?}", child.id());

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if !line.trim().is_empty() {
                                log::info!("[mpv] {}", line);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::error!("Error reading player stderr: {}", e);
                            break;
                        }
                    }
                }
                log::debug!("Player stderr reader stopped");
            });
        }

        Ok(Box::new(ChildProcess { child }))
    }

    fn connect<'a>(&'a self, address: &'a ChannelAddress) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            #[cfg(unix)]
            {
                let stream = tokio::net::UnixStream::connect(address.as_path()).await?;
                Ok(Box::new(stream) as BoxedStream)
            }

            #[cfg(windows)]
            {
                let pipe = tokio::net::windows::named_pipe::ClientOptions::new()
                    .open(address.as_path())?;
                Ok(Box::new(pipe) as BoxedStream)
            }
        })
    }
}

struct ChildProcess {
    child: Child,
}

impl PlayerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("Player process exited with status: {:?}", status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::error!("Error checking player status: {}", e);
                false
            }
        }
    }

    #[cfg(unix)]
    fn kill(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => {
                log::info!("Sending SIGKILL to player process {}", pid);
                kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))
            }
            // Already reaped
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) -> io::Result<()> {
        log::info!("Killing player process {:?}", self.child.id());
        self.child.start_kill()
    }
}

/// Remove the socket file left behind by a killed player
pub fn remove_channel_file(address: &ChannelAddress) {
    if !address.is_filesystem_backed() {
        return;
    }
    match std::fs::remove_file(address.as_path()) {
        Ok(()) => log::debug!("Removed control channel file {}", address),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove control channel file {}: {}", address, e),
    }
}
