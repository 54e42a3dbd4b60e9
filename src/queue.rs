//! Two-slot gapless queue.
//!
//! Slot 0 is what is audible; slot 1 is prefetched by the player and becomes
//! slot 0 on its own when the current track ends. The player playlist mirrors
//! the model: position 0 = current, position 1 = next.

use tokio::sync::Mutex;

use crate::client::{LoadMode, MpvClient};
use crate::state::SharedState;
use crate::types::{PlaybackStatus, QueueSlot};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackQueue {
    current: Option<String>,
    next: Option<String>,
}

impl PlaybackQueue {
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }

    pub fn slots(&self) -> Vec<QueueSlot> {
        [&self.current, &self.next]
            .into_iter()
            .enumerate()
            .filter_map(|(position, url)| {
                url.as_ref().map(|url| QueueSlot {
                    position: position as u8,
                    url: url.clone(),
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.next = None;
    }

    pub(crate) fn set_current(&mut self, url: Option<String>) {
        self.current = url;
        self.next = None;
    }

    pub(crate) fn set_next(&mut self, url: Option<String>) {
        // A next slot without a current one would be audible, not prefetched
        if self.current.is_some() {
            self.next = url;
        }
    }

    /// The player moved into the prefetched track. Returns the new current URL.
    pub(crate) fn advance(&mut self) -> Option<String> {
        if self.next.is_some() {
            self.current = self.next.take();
        }
        self.current.clone()
    }
}

/// Translates queue intents into player commands.
///
/// Mutations are serialized: a second `set_queue` waits until every command
/// of the first one has completed or failed.
pub struct QueueController {
    state: SharedState,
    lock: Mutex<()>,
}

impl QueueController {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            lock: Mutex::new(()),
        }
    }

    fn radio_active(&self, action: &str) -> bool {
        let active = self.state.read().radio_active;
        if active {
            log::debug!("{}: skipped, a radio stream owns the queue", action);
        }
        active
    }

    pub async fn set_queue(
        &self,
        client: &MpvClient,
        current: Option<String>,
        next: Option<String>,
        force_pause: Option<bool>,
    ) {
        if self.radio_active("set_queue") {
            return;
        }
        let _guard = self.lock.lock().await;

        if current.is_none() && next.is_none() {
            let _ = client.playlist_clear().await;
            // playlist-clear keeps the playing entry; drop it as well
            if let Ok(count) = client.playlist_count().await {
                if count > 0 {
                    let _ = client.playlist_remove(0).await;
                }
            }
            let _ = client.pause().await;
            self.state.write().queue.clear();
            return;
        }

        if let Some(url) = current {
            match client.load(&url, LoadMode::Replace).await {
                Ok(()) => {
                    self.state.write().queue.set_current(Some(url));
                    if let Some(url) = next {
                        if client.load(&url, LoadMode::Append).await.is_ok() {
                            self.state.write().queue.set_next(Some(url));
                        }
                    }
                }
                Err(e) => {
                    // The old playlist is still loaded; appending would grow it past two entries
                    log::warn!("Falling back to play after failed load: {}", e);
                    self.resume(client).await;
                }
            }
        }

        match force_pause {
            Some(true) => {
                if client.pause().await.is_ok() {
                    self.state.write().playback.status = PlaybackStatus::Paused;
                }
            }
            Some(false) => self.resume(client).await,
            None => {}
        }
    }

    /// Unpause at the target volume; a faded-out pause leaves the player at zero
    async fn resume(&self, client: &MpvClient) {
        let volume = self.state.read().playback.volume;
        let _ = client.set_volume(volume).await;
        if client.play().await.is_ok() {
            self.state.write().playback.status = PlaybackStatus::Playing;
        }
    }

    /// Replace the prefetched slot without touching the current one
    pub async fn set_queue_next(&self, client: &MpvClient, url: Option<String>) {
        if self.radio_active("set_queue_next") {
            return;
        }
        let _guard = self.lock.lock().await;

        let count = match client.playlist_count().await {
            Ok(count) => count,
            Err(_) => return,
        };
        if count == 0 {
            log::debug!("set_queue_next: player playlist is empty, nothing to prefetch behind");
            return;
        }
        if count > 1 {
            if client.playlist_remove(1).await.is_err() {
                return;
            }
            self.state.write().queue.set_next(None);
        }
        if let Some(url) = url {
            if client.load(&url, LoadMode::Append).await.is_ok() {
                self.state.write().queue.set_next(Some(url));
            }
        }
    }

    /// The player advanced on its own: drop the finished track and prefetch `url`
    pub async fn auto_next(&self, client: &MpvClient, url: Option<String>) {
        if self.radio_active("auto_next") {
            return;
        }
        let _guard = self.lock.lock().await;

        if client.playlist_remove(0).await.is_err() {
            log::warn!("auto_next: could not drop the finished track, pausing");
            let _ = client.pause().await;
        }
        if let Some(url) = url {
            if client.load(&url, LoadMode::Append).await.is_ok() {
                self.state.write().queue.set_next(Some(url));
            }
        }
    }

    /// Reload the last known slots into a fresh player instance, paused
    pub async fn repopulate(&self, client: &MpvClient) {
        let (current, next) = {
            let state = self.state.read();
            if state.radio_active {
                log::debug!("Skipping queue repopulation, radio stream active");
                return;
            }
            (
                state.queue.current().map(str::to_string),
                state.queue.next().map(str::to_string),
            )
        };
        if current.is_none() {
            return;
        }
        log::info!("Restoring queue: current={:?} next={:?}", current, next);
        self.set_queue(client, current, next, Some(true)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_requires_current() {
        let mut queue = PlaybackQueue::default();
        queue.set_next(Some("b.flac".into()));
        assert!(queue.is_empty());

        queue.set_current(Some("a.flac".into()));
        queue.set_next(Some("b.flac".into()));
        assert_eq!(
            queue.slots(),
            vec![
                QueueSlot { position: 0, url: "a.flac".into() },
                QueueSlot { position: 1, url: "b.flac".into() },
            ]
        );
    }

    #[test]
    fn setting_current_drops_stale_next() {
        let mut queue = PlaybackQueue::default();
        queue.set_current(Some("a.flac".into()));
        queue.set_next(Some("b.flac".into()));
        queue.set_current(Some("c.flac".into()));
        assert_eq!(queue.current(), Some("c.flac"));
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn advance_rotates_slots() {
        let mut queue = PlaybackQueue::default();
        queue.set_current(Some("a.flac".into()));
        queue.set_next(Some("b.flac".into()));

        assert_eq!(queue.advance().as_deref(), Some("b.flac"));
        assert_eq!(queue.current(), Some("b.flac"));
        assert_eq!(queue.next(), None);

        // Nothing prefetched: current stays put
        assert_eq!(queue.advance().as_deref(), Some("b.flac"));
    }

    #[test]
    fn never_more_than_two_slots() {
        let mut queue = PlaybackQueue::default();
        let urls = ["a", "b", "c", "d", "e", "f"];
        for (i, url) in urls.iter().enumerate() {
            match i % 3 {
                0 => queue.set_current(Some(url.to_string())),
                1 => queue.set_next(Some(url.to_string())),
                _ => {
                    queue.advance();
                }
            }
            assert!(queue.len() <= 2);
        }
    }
}
