//! Volume ramps on play/pause transitions.
//!
//! Play is applied as the ramp starts so the fade-in is audible immediately;
//! pause is applied only after the ramp has rung down.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::MpvClient;
use crate::state::SharedState;
use crate::types::PlaybackStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeJob {
    pub from: u8,
    pub to: u8,
    pub duration: Duration,
    pub interval: Duration,
    pub target: PlaybackStatus,
}

impl FadeJob {
    pub fn fade_in(volume: u8, duration: Duration, interval: Duration) -> Self {
        Self {
            from: 0,
            to: volume,
            duration,
            interval,
            target: PlaybackStatus::Playing,
        }
    }

    pub fn fade_out(volume: u8, duration: Duration, interval: Duration) -> Self {
        Self {
            from: volume,
            to: 0,
            duration,
            interval,
            target: PlaybackStatus::Paused,
        }
    }

    pub fn steps(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        ((self.duration.as_millis() / interval) as u32).max(1)
    }

    /// Volume after `step` of `steps()` steps
    pub fn volume_at(&self, step: u32) -> u8 {
        let steps = self.steps();
        let step = step.min(steps) as f64;
        let from = self.from as f64;
        let to = self.to as f64;
        (from + (to - from) * step / steps as f64).round().clamp(0.0, 100.0) as u8
    }
}

/// Decrements the active-job counter however the job ends (finish or abort)
struct ActiveJob(Arc<AtomicUsize>);

impl ActiveJob {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs at most one fade job at a time
#[derive(Default)]
pub struct Fader {
    job: Mutex<Option<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
}

impl Fader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ramps currently stepping
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        if let Some(job) = self.job.lock().take() {
            job.abort();
            log::debug!("Cancelled in-flight fade");
        }
    }

    /// Abort the running ramp and wait until its task is gone
    async fn settle(&self) {
        let previous = self.job.lock().take();
        if let Some(previous) = previous {
            previous.abort();
            let _ = previous.await;
        }
    }

    /// Replace any running ramp with `job`
    pub async fn start(&self, client: MpvClient, state: SharedState, job: FadeJob) {
        self.settle().await;

        // Snap to the new start point so an interrupted ramp does not click
        let _ = client.set_volume(job.from).await;
        if job.target == PlaybackStatus::Playing {
            apply_status(&client, &state, PlaybackStatus::Playing).await;
        }

        log::debug!(
            "Fading {} -> {} over {:?} ({} steps)",
            job.from,
            job.to,
            job.duration,
            job.steps()
        );

        let guard = ActiveJob::enter(&self.active);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run_ramp(&client, &job).await;
            if job.target == PlaybackStatus::Paused {
                apply_status(&client, &state, PlaybackStatus::Paused).await;
            }
        });

        if let Some(previous) = self.job.lock().replace(handle) {
            previous.abort();
        }
    }
}

async fn run_ramp(client: &MpvClient, job: &FadeJob) {
    let mut ticker = tokio::time::interval(job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    for step in 1..=job.steps() {
        ticker.tick().await;
        let _ = client.set_volume(job.volume_at(step)).await;
    }
}

/// Set the status on the player and in the shared state
pub(crate) async fn apply_status(client: &MpvClient, state: &SharedState, status: PlaybackStatus) {
    let result = match status {
        PlaybackStatus::Playing => client.play().await,
        PlaybackStatus::Paused => client.pause().await,
        PlaybackStatus::Stopped => client.stop().await,
        PlaybackStatus::Idle => Ok(()),
    };
    if result.is_ok() {
        state.write().playback.status = status;
    }
}
