//! Per-page playback state machine.
//!
//! A [`PlaybackUnit`] wraps one playable video resource:
//!
//! ```text
//! Unloaded --bind--> Loading --load ok--> Ready  (transport: Paused)
//!                            --load err-> Failed
//! Ready: Paused --play--> Playing --pause--> Paused
//!                          Playing --end of media--> Ended (or back to start when looping)
//! any --release--> Unloaded
//! ```
//!
//! Units never talk to each other or to the controller directly. Loads and
//! progress ticks run as tokio tasks that post [`CarouselEvent`]s back to the
//! control loop, and state changes the outside world cares about are queued
//! as [`PlaybackEvent`]s that the owner drains after every call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::errors::MediaError;
use crate::events::{CarouselEvent, EventSender};
use crate::media_pipeline::MediaLoader;
use crate::model::{MediaInfo, MediaSource};

/// How often a playing unit reports its remaining time.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Shared by every unit, so an event can only ever match the unit that sent it.
static GENERATIONS: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    GENERATIONS.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Paused,
    Playing,
    Ended,
}

/// Notifications a unit publishes to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    PlayingChanged(bool),
    /// Whole seconds left, rounded down.
    RemainingTimeChanged(u64),
    /// Emitted once per play-through; never while looping.
    PlaybackEnded,
    MutedChanged(bool),
}

pub struct PlaybackUnit {
    page: usize,
    source: Option<MediaSource>,
    load_state: LoadState,
    transport: TransportState,
    muted: bool,
    looping: bool,
    duration: Duration,
    /// Position accumulated up to the last pause.
    elapsed: Duration,
    /// Set while playing.
    resumed_at: Option<Instant>,
    /// `play()` arrived while loading.
    play_requested: bool,
    load_generation: u64,
    tick_generation: u64,
    load_task: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    last_error: Option<String>,
    loader: Arc<dyn MediaLoader>,
    events: EventSender,
    outbox: Vec<PlaybackEvent>,
}

impl PlaybackUnit {
    /// Creates an unloaded, muted unit for `page`.
    pub fn new(page: usize, loader: Arc<dyn MediaLoader>, events: EventSender) -> Self {
        trace!("Creating playback unit for page {}", page);
        Self {
            page,
            source: None,
            load_state: LoadState::Unloaded,
            transport: TransportState::Paused,
            muted: true,
            looping: false,
            duration: Duration::ZERO,
            elapsed: Duration::ZERO,
            resumed_at: None,
            play_requested: false,
            load_generation: 0,
            tick_generation: 0,
            load_task: None,
            ticker: None,
            last_error: None,
            loader,
            events,
            outbox: Vec::new(),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn transport(&self) -> TransportState {
        self.transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport == TransportState::Playing
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Whether the visibility resolver may pick this unit. Failed and
    /// unloaded units behave as if the page had no video.
    pub fn is_playable(&self) -> bool {
        matches!(self.load_state, LoadState::Loading | LoadState::Ready)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        let running = self.resumed_at.map_or(Duration::ZERO, |t| t.elapsed());
        (self.elapsed + running).min(self.duration)
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Takes the notifications queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Binds the unit to `source`, optionally asking it to play once ready.
    ///
    /// Rebinding the resource that is already loaded is a no-op apart from
    /// honouring `play`. Anything else cancels the previous load, releases
    /// the previous resource and starts a new load.
    pub fn bind(&mut self, source: MediaSource, play: bool) {
        if self.source.as_ref() == Some(&source) {
            match self.load_state {
                LoadState::Ready => {
                    trace!("Page {}: '{}' already loaded, skipping reload.", self.page, source);
                    if play {
                        self.play();
                    }
                    return;
                }
                LoadState::Loading => {
                    trace!("Page {}: '{}' already loading.", self.page, source);
                    self.play_requested |= play;
                    return;
                }
                LoadState::Unloaded | LoadState::Failed => {}
            }
        }

        self.release();
        self.load_generation = next_generation();
        self.load_state = LoadState::Loading;
        self.play_requested = play;
        self.last_error = None;

        let generation = self.load_generation;
        let page = self.page;
        let events = self.events.clone();
        let loader = self.loader.clone();
        let target = source.clone();
        debug!("Page {}: loading '{}' (generation {}).", page, source, generation);
        self.source = Some(source);
        self.load_task = Some(tokio::spawn(async move {
            // The loader runs as its own task so a panic inside it still
            // produces a completion.
            let inner = tokio::spawn(async move { loader.load(&target).await });
            let abort = inner.abort_handle();
            let _guard = AbortOnDrop(abort);
            let result = match inner.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Page {}: load task for generation {} failed: {}", page, generation, e);
                    Err(MediaError::TaskJoin(format!("Load task for page {} failed: {}", page, e)))
                }
            };
            // The control loop may already be gone; nothing to report then.
            let _ = events.send(CarouselEvent::LoadFinished { page, generation, result });
        }));
    }

    /// Applies the outcome of the load started for `generation`.
    pub fn on_load_finished(&mut self, generation: u64, result: Result<MediaInfo, MediaError>) {
        if generation != self.load_generation || self.load_state != LoadState::Loading {
            debug!(
                "Page {}: dropping stale load result (generation {}, current {}).",
                self.page, generation, self.load_generation
            );
            return;
        }
        self.load_task = None;
        let id = self.source.as_ref().map(MediaSource::identifier).unwrap_or_default();
        match result {
            Ok(info) => {
                info!("Page {}: '{}' ready, duration {:.1}s.", self.page, id, info.duration.as_secs_f64());
                self.duration = info.duration;
                self.elapsed = Duration::ZERO;
                self.resumed_at = None;
                self.transport = TransportState::Paused;
                self.load_state = LoadState::Ready;
                if std::mem::take(&mut self.play_requested) {
                    self.play();
                }
            }
            Err(e) => {
                error!("Page {}: failed to load '{}': {}", self.page, id, e);
                self.last_error = Some(e.to_string());
                self.load_state = LoadState::Failed;
                self.play_requested = false;
            }
        }
    }

    /// Starts or resumes playback. A no-op while already playing; deferred
    /// until ready while loading; restarts from the top after the end.
    pub fn play(&mut self) {
        match self.load_state {
            LoadState::Loading => {
                self.play_requested = true;
                return;
            }
            LoadState::Ready => {}
            LoadState::Unloaded | LoadState::Failed => {
                trace!("Page {}: play ignored in {:?}.", self.page, self.load_state);
                return;
            }
        }
        match self.transport {
            TransportState::Playing => return,
            TransportState::Ended => self.elapsed = Duration::ZERO,
            TransportState::Paused => {}
        }
        debug!("Page {}: playing from {:.1}s.", self.page, self.elapsed.as_secs_f64());
        self.transport = TransportState::Playing;
        self.resumed_at = Some(Instant::now());
        self.start_ticker();
        self.outbox.push(PlaybackEvent::PlayingChanged(true));
        self.outbox.push(PlaybackEvent::RemainingTimeChanged(self.remaining().as_secs()));
    }

    /// Pauses playback and drops any deferred play request.
    pub fn pause(&mut self) {
        self.play_requested = false;
        if self.transport != TransportState::Playing {
            return;
        }
        self.elapsed = self.elapsed();
        self.resumed_at = None;
        self.stop_ticker();
        self.transport = TransportState::Paused;
        debug!("Page {}: paused at {:.1}s.", self.page, self.elapsed.as_secs_f64());
        self.outbox.push(PlaybackEvent::PlayingChanged(false));
    }

    pub fn mute(&mut self) {
        self.set_muted(true);
    }

    pub fn unmute(&mut self) {
        self.set_muted(false);
    }

    pub fn toggle_mute(&mut self) {
        self.set_muted(!self.muted);
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            self.muted = muted;
            self.outbox.push(PlaybackEvent::MutedChanged(muted));
        }
    }

    /// Handles a progress tick from the ticker started for `generation`.
    pub fn on_progress(&mut self, generation: u64) {
        if generation != self.tick_generation || self.transport != TransportState::Playing {
            trace!("Page {}: dropping stale progress tick.", self.page);
            return;
        }
        if self.elapsed() >= self.duration {
            self.reached_end();
        } else {
            self.outbox.push(PlaybackEvent::RemainingTimeChanged(self.remaining().as_secs()));
        }
    }

    /// End of media while playing: loop back to the start, or stop in
    /// `Ended` and publish `PlaybackEnded`.
    pub fn reached_end(&mut self) {
        if self.transport != TransportState::Playing {
            return;
        }
        if self.looping {
            debug!("Page {}: looping back to start.", self.page);
            self.elapsed = Duration::ZERO;
            self.resumed_at = Some(Instant::now());
            self.start_ticker();
            self.outbox.push(PlaybackEvent::RemainingTimeChanged(self.remaining().as_secs()));
            return;
        }
        info!("Page {}: playback ended.", self.page);
        self.stop_ticker();
        self.elapsed = Duration::ZERO;
        self.resumed_at = None;
        self.transport = TransportState::Ended;
        self.outbox.push(PlaybackEvent::PlaybackEnded);
    }

    /// Cancels any in-flight load, stops progress reporting and returns to
    /// `Unloaded`. Results of the cancelled load are ignored if they still arrive.
    pub fn release(&mut self) {
        let was_playing = self.transport == TransportState::Playing;
        if let Some(task) = self.load_task.take() {
            debug!("Page {}: cancelling in-flight load.", self.page);
            task.abort();
        }
        self.stop_ticker();
        self.load_generation = next_generation();
        if let Some(source) = self.source.take() {
            trace!("Page {}: released '{}'.", self.page, source);
        }
        self.load_state = LoadState::Unloaded;
        self.transport = TransportState::Paused;
        self.duration = Duration::ZERO;
        self.elapsed = Duration::ZERO;
        self.resumed_at = None;
        self.play_requested = false;
        if was_playing {
            self.outbox.push(PlaybackEvent::PlayingChanged(false));
        }
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        let generation = self.tick_generation;
        let page = self.page;
        let events = self.events.clone();
        let end_at = Instant::now() + self.remaining();
        self.ticker = Some(tokio::spawn(async move {
            let mut next = Instant::now() + PROGRESS_INTERVAL;
            loop {
                let wake = next.min(end_at);
                tokio::time::sleep_until(wake).await;
                if events.send(CarouselEvent::Progress { page, generation }).is_err() {
                    break;
                }
                if wake >= end_at {
                    break;
                }
                next += PROGRESS_INTERVAL;
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.tick_generation = next_generation();
    }
}

/// Aborts the loader task when the outer load task is cancelled.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Drop for PlaybackUnit {
    fn drop(&mut self) {
        if self.load_task.is_some() || self.ticker.is_some() {
            warn!("Page {}: playback unit dropped without release, aborting its tasks.", self.page);
        }
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl std::fmt::Debug for PlaybackUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackUnit")
            .field("page", &self.page)
            .field("source", &self.source)
            .field("load_state", &self.load_state)
            .field("transport", &self.transport)
            .field("muted", &self.muted)
            .field("looping", &self.looping)
            .field("duration", &self.duration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use crate::media_pipeline::LoadFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    struct FixedLoader {
        duration: Option<Duration>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl MediaLoader for FixedLoader {
        fn load(&self, _source: &MediaSource) -> LoadFuture<MediaInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let duration = self.duration;
            let delay = self.delay;
            Box::pin(async move {
                sleep(delay).await;
                duration
                    .map(|duration| MediaInfo { duration })
                    .ok_or_else(|| MediaError::Generic("decoder refused the stream".into()))
            })
        }
    }

    fn unit_with(duration: Option<Duration>) -> (PlaybackUnit, EventReceiver, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = FixedLoader { duration, delay: Duration::from_millis(100), calls: calls.clone() };
        (PlaybackUnit::new(0, Arc::new(loader), tx), rx, calls)
    }

    fn source(name: &str) -> MediaSource {
        MediaSource::remote(&format!("https://cdn.example.com/{}.mp4", name)).unwrap()
    }

    /// Lets virtual time pass, then feeds every queued event to the unit.
    async fn pump(unit: &mut PlaybackUnit, rx: &mut EventReceiver, wait: Duration) {
        sleep(wait).await;
        while let Ok(event) = rx.try_recv() {
            match event {
                CarouselEvent::LoadFinished { generation, result, .. } => unit.on_load_finished(generation, result),
                CarouselEvent::Progress { generation, .. } => unit.on_progress(generation),
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn play_requested_while_loading_starts_once_ready() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(10)));
        unit.bind(source("a"), false);
        unit.play();
        assert_eq!(unit.load_state(), LoadState::Loading);
        assert!(!unit.is_playing());

        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        assert_eq!(unit.load_state(), LoadState::Ready);
        assert!(unit.is_playing());
        assert!(unit.is_muted());
        assert_eq!(
            unit.drain_events(),
            vec![PlaybackEvent::PlayingChanged(true), PlaybackEvent::RemainingTimeChanged(10)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn play_is_idempotent() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(10)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.drain_events();

        unit.play();
        unit.play();
        assert!(unit.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_play_does_not_reload() {
        let (mut unit, mut rx, calls) = unit_with(Some(Duration::from_secs(10)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;

        unit.pause();
        assert_eq!(unit.transport(), TransportState::Paused);
        unit.bind(source("a"), true);
        assert!(unit.is_playing());
        assert_eq!(unit.load_state(), LoadState::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_when_not_playing_is_silent() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(10)));
        unit.bind(source("a"), false);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.pause();
        assert!(unit.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_remaining_time_rounded_down() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(3)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.drain_events();

        // Ticks land at 0.5s, 1.0s and 1.5s of playback; each is read 0.1s later.
        pump(&mut unit, &mut rx, Duration::from_millis(600)).await;
        assert_eq!(unit.drain_events(), vec![PlaybackEvent::RemainingTimeChanged(2)]);
        pump(&mut unit, &mut rx, PROGRESS_INTERVAL).await;
        assert_eq!(unit.drain_events(), vec![PlaybackEvent::RemainingTimeChanged(1)]);
        pump(&mut unit, &mut rx, PROGRESS_INTERVAL).await;
        assert_eq!(unit.drain_events(), vec![PlaybackEvent::RemainingTimeChanged(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn ends_exactly_once() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(2)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.drain_events();

        pump(&mut unit, &mut rx, Duration::from_secs(3)).await;
        let events = unit.drain_events();
        assert_eq!(events.iter().filter(|e| **e == PlaybackEvent::PlaybackEnded).count(), 1);
        assert_eq!(unit.transport(), TransportState::Ended);

        unit.reached_end();
        pump(&mut unit, &mut rx, Duration::from_secs(3)).await;
        assert!(unit.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn looping_unit_never_ends() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(1)));
        unit.set_looping(true);
        unit.bind(source("a"), true);
        for _ in 0..10 {
            pump(&mut unit, &mut rx, Duration::from_millis(250)).await;
        }
        assert!(unit.is_playing());
        assert!(!unit.drain_events().contains(&PlaybackEvent::PlaybackEnded));
    }

    #[tokio::test(start_paused = true)]
    async fn play_after_end_restarts_from_the_top() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(1)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        pump(&mut unit, &mut rx, Duration::from_millis(1500)).await;
        assert_eq!(unit.transport(), TransportState::Ended);

        unit.play();
        assert!(unit.is_playing());
        assert_eq!(unit.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn load_failure_leaves_unit_failed_and_unplayable() {
        let (mut unit, mut rx, _) = unit_with(None);
        unit.bind(source("broken"), true);
        assert!(unit.is_playable());
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;

        assert_eq!(unit.load_state(), LoadState::Failed);
        assert!(!unit.is_playable());
        assert!(unit.last_error().unwrap().contains("decoder refused"));
        unit.play();
        assert!(!unit.is_playing());
        assert!(unit.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_failed_source_retries() {
        let (mut unit, mut rx, calls) = unit_with(None);
        unit.bind(source("broken"), false);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.bind(source("broken"), false);
        assert_eq!(unit.load_state(), LoadState::Loading);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct PanickingLoader;

    impl MediaLoader for PanickingLoader {
        fn load(&self, _source: &MediaSource) -> LoadFuture<MediaInfo> {
            Box::pin(async { panic!("box walk overflowed") })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_loader_resolves_to_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut unit = PlaybackUnit::new(0, Arc::new(PanickingLoader), tx);
        unit.bind(source("corrupt"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(50)).await;

        assert_eq!(unit.load_state(), LoadState::Failed);
        assert!(!unit.is_playable());
        assert!(unit.last_error().unwrap().contains("Load task for page 0 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_source_mid_load_drops_the_first_result() {
        let (mut unit, mut rx, calls) = unit_with(Some(Duration::from_secs(4)));
        unit.bind(source("a"), false);
        sleep(Duration::from_millis(50)).await;
        unit.bind(source("b"), false);
        pump(&mut unit, &mut rx, Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(unit.source(), Some(&source("b")));
        assert_eq!(unit.load_state(), LoadState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn release_cancels_load_and_ignores_late_completion() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(4)));
        unit.bind(source("a"), true);
        unit.release();
        assert_eq!(unit.load_state(), LoadState::Unloaded);

        pump(&mut unit, &mut rx, Duration::from_secs(1)).await;
        assert_eq!(unit.load_state(), LoadState::Unloaded);
        assert!(!unit.is_playing());
        assert!(unit.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mute_is_orthogonal_to_transport() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(4)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.drain_events();

        unit.unmute();
        unit.mute();
        unit.mute();
        unit.toggle_mute();
        assert!(unit.is_playing());
        assert_eq!(
            unit.drain_events(),
            vec![
                PlaybackEvent::MutedChanged(false),
                PlaybackEvent::MutedChanged(true),
                PlaybackEvent::MutedChanged(false)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn release_while_playing_reports_stop() {
        let (mut unit, mut rx, _) = unit_with(Some(Duration::from_secs(4)));
        unit.bind(source("a"), true);
        pump(&mut unit, &mut rx, Duration::from_millis(150)).await;
        unit.drain_events();

        unit.release();
        assert_eq!(unit.drain_events(), vec![PlaybackEvent::PlayingChanged(false)]);
    }
}
