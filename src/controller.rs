//! The carousel's state machine.
//!
//! `CarouselController` owns the page list, every page's `PlaybackUnit` and
//! the auto-advance scheduler. It is driven one [`CarouselEvent`] at a time
//! by the runtime loop, so a visibility change, the play/pause calls it
//! triggers and the timer re-arm that follows are applied as one step.
//!
//! Units are created lazily, only for video pages the host reports as
//! visible, and released again once they drift more than
//! `recycle_distance` pages away from everything on screen.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::config::CarouselConfig;
use crate::errors::CarouselError;
use crate::events::{CarouselCommand, CarouselEvent, CarouselNotification, EventSender, NotificationSender};
use crate::media_pipeline::{ImageLoader, MediaLoader};
use crate::model::{CarouselPhase, MediaItem, MediaSource};
use crate::playback::{LoadState, PlaybackEvent, PlaybackUnit, TransportState};
use crate::scheduler::{AdvanceMode, AutoAdvanceScheduler};
use crate::visibility::{select_playable, VisibilitySnapshot};

/// Queryable state of one playback unit.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitStatus {
    pub page: usize,
    pub source: String,
    pub load_state: LoadState,
    pub transport: TransportState,
    pub muted: bool,
    pub looping: bool,
    pub duration: Duration,
    pub remaining: Duration,
    pub last_error: Option<String>,
}

/// Snapshot of the whole carousel, returned for `CarouselCommand::Status`.
#[derive(Clone, Debug, PartialEq)]
pub struct CarouselStatus {
    pub phase: CarouselPhase,
    pub attached: bool,
    pub host_visible: bool,
    pub page_count: usize,
    pub current_page: usize,
    pub visible_pages: Vec<usize>,
    pub playing_page: Option<usize>,
    pub advance_mode: AdvanceMode,
    pub timer_period: Option<Duration>,
    /// Generation of the armed timer, if one is armed.
    pub timer_generation: Option<u64>,
    /// Units in page order; pages without a live unit are absent.
    pub units: Vec<UnitStatus>,
}

impl CarouselStatus {
    pub fn unit(&self, page: usize) -> Option<&UnitStatus> {
        self.units.iter().find(|u| u.page == page)
    }

    pub fn playing_count(&self) -> usize {
        self.units.iter().filter(|u| u.transport == TransportState::Playing).count()
    }
}

struct Page {
    video: Option<MediaSource>,
    image: Option<MediaSource>,
    unit: Option<PlaybackUnit>,
    image_requested: bool,
}

impl Page {
    fn resolve(index: usize, item: &MediaItem) -> Self {
        let video = item.video_source().unwrap_or_else(|e| {
            report_mismatch(index, item, e.to_string());
            None
        });
        let image = item.image_source().unwrap_or_else(|e| {
            report_mismatch(index, item, e.to_string());
            None
        });
        Self { video, image, unit: None, image_requested: false }
    }
}

fn report_mismatch(page: usize, item: &MediaItem, reason: String) {
    warn!("{} [{}]", CarouselError::ResourceMismatch { page, reason }, item.kind());
}

pub struct CarouselController {
    pages: Vec<Page>,
    current_page: usize,
    phase: CarouselPhase,
    attached: bool,
    host_visible: bool,
    visible: Vec<usize>,
    last_snapshot: Option<VisibilitySnapshot>,
    playing_page: Option<usize>,
    video_loop: bool,
    recycle_distance: usize,
    scheduler: AutoAdvanceScheduler,
    loader: Arc<dyn MediaLoader>,
    image_loader: Arc<dyn ImageLoader>,
    events: EventSender,
    notifications: NotificationSender,
}

impl CarouselController {
    pub fn new(
        config: &CarouselConfig,
        loader: Arc<dyn MediaLoader>,
        image_loader: Arc<dyn ImageLoader>,
        events: EventSender,
        notifications: NotificationSender,
    ) -> Self {
        let scheduler = AutoAdvanceScheduler::new(config.interval, config.page_intervals.clone(), events.clone());
        Self {
            pages: Vec::new(),
            current_page: 0,
            phase: CarouselPhase::Idle,
            attached: true,
            host_visible: true,
            visible: Vec::new(),
            last_snapshot: None,
            playing_page: None,
            video_loop: config.video_loop,
            recycle_distance: config.recycle_distance,
            scheduler,
            loader,
            image_loader,
            events,
            notifications,
        }
    }

    pub fn phase(&self) -> CarouselPhase {
        self.phase
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn playing_page(&self) -> Option<usize> {
        self.playing_page
    }

    /// Applies one event. Returns `false` once the loop should stop.
    pub fn handle_event(&mut self, event: CarouselEvent) -> bool {
        match event {
            CarouselEvent::Command(command) => return self.handle_command(command),
            CarouselEvent::LoadFinished { page, generation, result } => {
                let failed = result.is_err();
                if !self.with_unit(page, |unit| unit.on_load_finished(generation, result)) {
                    debug!("Dropping load result for page {}: no playback unit.", page);
                } else if failed && !self.is_playable(page) {
                    // The page drops out of the candidates; another may take its place.
                    self.apply_selection();
                }
            }
            CarouselEvent::Progress { page, generation } => {
                if !self.with_unit(page, |unit| unit.on_progress(generation)) {
                    trace!("Dropping progress tick for page {}: no playback unit.", page);
                }
            }
            CarouselEvent::Tick { generation } => self.on_tick(generation),
        }
        true
    }

    fn handle_command(&mut self, command: CarouselCommand) -> bool {
        match command {
            CarouselCommand::SetPages(items) => self.set_pages(items),
            CarouselCommand::ReplacePage { page, item } => self.replace_page(page, item),
            CarouselCommand::VisibilityChanged(snapshot) => self.handle_visibility(snapshot),
            CarouselCommand::SelectPage(page) => self.select_page(page),
            CarouselCommand::ItemTapped(page) => {
                if page < self.pages.len() {
                    self.notify(CarouselNotification::PageSelected(page));
                } else {
                    warn!("Ignoring tap on page {} of {}.", page, self.pages.len());
                }
            }
            CarouselCommand::ToggleMute(page) => {
                if !self.with_unit(page, PlaybackUnit::toggle_mute) {
                    debug!("Mute toggle for page {} ignored: no playback unit.", page);
                }
            }
            CarouselCommand::EndOfMedia(page) => {
                if !self.with_unit(page, PlaybackUnit::reached_end) {
                    debug!("End of media for page {} ignored: no playback unit.", page);
                }
            }
            CarouselCommand::SetInterval(secs) => {
                self.scheduler.set_interval(secs, self.current_page);
                self.hold_timer();
            }
            CarouselCommand::SetPageIntervals(intervals) => {
                self.scheduler.set_page_intervals(intervals, self.current_page);
                self.hold_timer();
            }
            CarouselCommand::SetLoop(looping) => {
                debug!("Video looping {}.", if looping { "enabled" } else { "disabled" });
                self.video_loop = looping;
                for unit in self.pages.iter_mut().filter_map(|p| p.unit.as_mut()) {
                    unit.set_looping(looping);
                }
            }
            CarouselCommand::SetHostVisible(visible) => self.set_host_visible(visible),
            CarouselCommand::Attach => self.attach(),
            CarouselCommand::Detach => self.detach(),
            CarouselCommand::Status(reply) => {
                if reply.send(self.status()).is_err() {
                    debug!("Status requester went away before the reply.");
                }
            }
            CarouselCommand::Shutdown => {
                info!("Carousel shutting down.");
                self.detach();
                return false;
            }
        }
        true
    }

    pub fn status(&self) -> CarouselStatus {
        let units = self
            .pages
            .iter()
            .filter_map(|p| p.unit.as_ref())
            .map(|unit| UnitStatus {
                page: unit.page(),
                source: unit.source().map(MediaSource::identifier).unwrap_or_default(),
                load_state: unit.load_state(),
                transport: unit.transport(),
                muted: unit.is_muted(),
                looping: unit.is_looping(),
                duration: unit.duration(),
                remaining: unit.remaining(),
                last_error: unit.last_error().map(str::to_string),
            })
            .collect();
        CarouselStatus {
            phase: self.phase,
            attached: self.attached,
            host_visible: self.host_visible,
            page_count: self.pages.len(),
            current_page: self.current_page,
            visible_pages: self.visible.clone(),
            playing_page: self.playing_page,
            advance_mode: self.scheduler.mode(),
            timer_period: self.scheduler.timer().map(|t| t.period()),
            timer_generation: self.scheduler.timer().map(|t| t.generation()),
            units,
        }
    }

    fn set_pages(&mut self, items: Vec<MediaItem>) {
        info!("Assigning {} page(s).", items.len());
        let mut previous = std::mem::take(&mut self.pages).into_iter();
        let mut retired = Vec::new();
        let mut rebind = Vec::new();
        let mut pages = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let mut page = Page::resolve(index, &item);
            if let Some(old) = previous.next() {
                if old.image == page.image {
                    page.image_requested = old.image_requested;
                }
                if let Some(mut unit) = old.unit {
                    if page.video.is_some() {
                        unit.set_looping(self.video_loop);
                        page.unit = Some(unit);
                        rebind.push(index);
                    } else {
                        retired.push((index, unit));
                    }
                }
            }
            pages.push(page);
        }
        let start = pages.len();
        for (offset, old) in previous.enumerate() {
            if let Some(unit) = old.unit {
                retired.push((start + offset, unit));
            }
        }
        self.pages = pages;

        let count = self.pages.len();
        self.visible.retain(|&page| page < count);
        self.set_current_page(self.current_page.min(count.saturating_sub(1)));
        for (page, unit) in retired {
            self.retire(page, unit);
        }
        // Same source: no reload, a playing unit keeps playing. A failed
        // unit gets a fresh attempt; a different source replaces the old one.
        for page in rebind {
            if let Some(source) = self.pages[page].video.clone() {
                self.with_unit(page, |unit| unit.bind(source, false));
            }
        }

        self.notify(CarouselNotification::PageCountChanged(count));
        self.update_phase();
        self.scheduler.set_page_count(count, self.current_page);
        self.hold_timer();
        self.prepare_visible_pages();
        self.apply_selection();
    }

    fn replace_page(&mut self, page: usize, item: MediaItem) {
        if page >= self.pages.len() {
            warn!("Ignoring replacement of page {} of {}.", page, self.pages.len());
            return;
        }
        debug!("Replacing page {} with {} item.", page, item.kind());
        let mut fresh = Page::resolve(page, &item);
        let old = &mut self.pages[page];
        if old.image == fresh.image {
            fresh.image_requested = old.image_requested;
        }
        fresh.unit = old.unit.take();
        self.pages[page] = fresh;

        match self.pages[page].video.clone() {
            Some(source) => {
                self.with_unit(page, |unit| unit.bind(source, false));
            }
            None => {
                if let Some(unit) = self.pages[page].unit.take() {
                    self.retire(page, unit);
                }
            }
        }
        if self.visible.contains(&page) {
            self.prepare_visible_pages();
            self.apply_selection();
        }
    }

    fn handle_visibility(&mut self, snapshot: VisibilitySnapshot) {
        if !self.attached {
            debug!("Ignoring visibility change while detached.");
            return;
        }
        let count = self.pages.len();
        self.visible = snapshot.visible_indices().into_iter().filter(|&page| page < count).collect();
        let between_pages = snapshot.is_between_pages();
        let settled = snapshot.settled_page().filter(|&page| page < count);
        trace!("Visible pages {:?}, settled on {:?}.", self.visible, settled);
        self.last_snapshot = Some(snapshot);

        self.recycle_units();
        self.prepare_visible_pages();
        if between_pages {
            debug!("Scroll offset between pages, restarting auto-advance.");
            self.rearm();
        }
        self.apply_selection();

        if let Some(page) = settled {
            if page != self.current_page {
                self.set_current_page(page);
                self.rearm();
            }
        }
    }

    fn select_page(&mut self, page: usize) {
        if page >= self.pages.len() {
            warn!("Ignoring selection of page {} of {}.", page, self.pages.len());
            return;
        }
        debug!("Page {} selected by the host.", page);
        self.set_current_page(page);
        self.notify(CarouselNotification::ScrollToPage(page));
        self.rearm();
    }

    fn set_host_visible(&mut self, visible: bool) {
        if self.host_visible == visible {
            return;
        }
        self.host_visible = visible;
        if visible {
            info!("Host view appeared, resuming selection.");
            self.apply_selection();
        } else {
            info!("Host view disappeared, pausing all playback.");
            for page in 0..self.pages.len() {
                self.with_unit(page, |unit| {
                    unit.pause();
                    unit.mute();
                });
            }
        }
    }

    fn attach(&mut self) {
        if self.attached {
            return;
        }
        info!("Carousel attached.");
        self.attached = true;
        self.update_phase();
        self.rearm();
    }

    /// Disarms the timer and releases every unit, cancelling in-flight loads.
    fn detach(&mut self) {
        if !self.attached {
            return;
        }
        info!("Carousel detached.");
        self.attached = false;
        self.scheduler.disarm();
        for page in 0..self.pages.len() {
            self.pages[page].image_requested = false;
            if let Some(unit) = self.pages[page].unit.take() {
                self.retire(page, unit);
            }
        }
        self.visible.clear();
        self.last_snapshot = None;
        self.playing_page = None;
        self.update_phase();
    }

    fn on_tick(&mut self, generation: u64) {
        if !self.scheduler.accept_tick(generation) {
            trace!("Dropping stale auto-advance tick (generation {}).", generation);
            return;
        }
        if !self.attached {
            return;
        }
        self.advance();
        // The global timer keeps its cadence; per-page timers take the
        // destination page's interval.
        if self.scheduler.is_per_page() {
            self.rearm();
        }
    }

    /// Moves to the next page, wrapping around after the last.
    fn advance(&mut self) {
        if self.pages.is_empty() {
            return;
        }
        let next = (self.current_page + 1) % self.pages.len();
        info!("Advancing from page {} to page {}.", self.current_page, next);
        self.set_current_page(next);
        self.notify(CarouselNotification::ScrollToPage(next));
    }

    fn set_current_page(&mut self, page: usize) {
        if self.current_page != page {
            self.current_page = page;
            self.notify(CarouselNotification::CurrentPageChanged(page));
        }
    }

    /// Plays the selected page's unit; pauses and mutes all others.
    fn apply_selection(&mut self) {
        if !self.attached || !self.host_visible {
            return;
        }
        let selected = match self.last_snapshot.as_ref() {
            Some(snapshot) => select_playable(&self.visible, |page| self.is_playable(page), snapshot),
            None => return,
        };
        for page in 0..self.pages.len() {
            if Some(page) != selected {
                self.with_unit(page, |unit| {
                    unit.pause();
                    unit.mute();
                });
            }
        }
        if let Some(page) = selected {
            trace!("Page {} selected for playback.", page);
            self.with_unit(page, PlaybackUnit::play);
        }
    }

    fn is_playable(&self, page: usize) -> bool {
        self.pages
            .get(page)
            .and_then(|p| p.unit.as_ref())
            .map_or(false, PlaybackUnit::is_playable)
    }

    fn prepare_visible_pages(&mut self) {
        if !self.attached {
            return;
        }
        let visible = self.visible.clone();
        for page in visible {
            self.ensure_unit(page);
            self.request_image(page);
        }
    }

    /// Creates and binds a unit for a visible video page that has none.
    /// Existing units, failed ones included, are left alone.
    fn ensure_unit(&mut self, page: usize) {
        let Some(entry) = self.pages.get_mut(page) else { return };
        if entry.unit.is_some() {
            return;
        }
        let Some(source) = entry.video.clone() else { return };
        let mut unit = PlaybackUnit::new(page, Arc::clone(&self.loader), self.events.clone());
        unit.set_looping(self.video_loop);
        unit.bind(source, false);
        entry.unit = Some(unit);
    }

    fn request_image(&mut self, page: usize) {
        let Some(entry) = self.pages.get_mut(page) else { return };
        if entry.image_requested {
            return;
        }
        let Some(source) = entry.image.clone() else { return };
        entry.image_requested = true;

        debug!("Page {}: fetching image '{}'.", page, source);
        let future = self.image_loader.load_image(&source);
        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            match future.await {
                Ok(image) => {
                    let _ = notifications.send(CarouselNotification::ImageReady { page, image: Arc::new(image) });
                }
                Err(e) => error!("Page {}: failed to load image '{}': {}", page, source, e),
            }
        });
    }

    fn recycle_units(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        for page in 0..self.pages.len() {
            let far = self.visible.iter().all(|&v| v.abs_diff(page) > self.recycle_distance);
            if !far {
                continue;
            }
            if let Some(unit) = self.pages[page].unit.take() {
                debug!("Page {}: recycling playback unit.", page);
                self.retire(page, unit);
            }
        }
    }

    fn retire(&mut self, page: usize, mut unit: PlaybackUnit) {
        unit.release();
        let events = unit.drain_events();
        drop(unit);
        self.dispatch(page, events);
    }

    /// Runs `f` on the page's unit and processes what it emitted.
    /// Returns `false` when the page has no unit.
    fn with_unit<F: FnOnce(&mut PlaybackUnit)>(&mut self, page: usize, f: F) -> bool {
        let events = match self.pages.get_mut(page).and_then(|p| p.unit.as_mut()) {
            Some(unit) => {
                f(unit);
                unit.drain_events()
            }
            None => return false,
        };
        self.dispatch(page, events);
        true
    }

    fn dispatch(&mut self, page: usize, events: Vec<PlaybackEvent>) {
        for event in events {
            self.notify(CarouselNotification::Playback { page, event: event.clone() });
            match event {
                PlaybackEvent::PlayingChanged(true) => {
                    if let Some(other) = self.playing_page.filter(|&other| other != page) {
                        warn!("Page {} started while page {} was playing; pausing page {}.", page, other, other);
                        self.with_unit(other, PlaybackUnit::pause);
                    }
                    self.playing_page = Some(page);
                    if self.scheduler.suspends_for_playback() && self.scheduler.is_armed() {
                        debug!("Auto-advance suspended while page {} plays.", page);
                        self.scheduler.disarm();
                    }
                }
                PlaybackEvent::PlayingChanged(false) => {
                    if self.playing_page == Some(page) {
                        self.playing_page = None;
                    }
                    if self.scheduler.suspends_for_playback() {
                        self.rearm();
                    }
                }
                PlaybackEvent::PlaybackEnded => {
                    if self.playing_page == Some(page) {
                        self.playing_page = None;
                    }
                    if self.attached {
                        self.advance();
                        self.rearm();
                    }
                }
                PlaybackEvent::RemainingTimeChanged(_) | PlaybackEvent::MutedChanged(_) => {}
            }
        }
    }

    /// Restarts the timer for the current page unless playback holds it.
    fn rearm(&mut self) {
        if self.timer_held() {
            self.scheduler.disarm();
        } else {
            self.scheduler.restart(self.current_page);
        }
    }

    /// Re-applies the hold after the scheduler re-armed itself.
    fn hold_timer(&mut self) {
        if self.timer_held() {
            self.scheduler.disarm();
        }
    }

    fn timer_held(&self) -> bool {
        !self.attached || (self.scheduler.suspends_for_playback() && self.playing_page.is_some())
    }

    fn update_phase(&mut self) {
        let phase = if self.attached && !self.pages.is_empty() { CarouselPhase::Active } else { CarouselPhase::Idle };
        if phase != self.phase {
            info!("Carousel phase {:?} -> {:?}.", self.phase, phase);
            self.phase = phase;
        }
    }

    fn notify(&self, notification: CarouselNotification) {
        trace!("Notification: {:?}", notification);
        // Nobody listening is not an error for the carousel.
        let _ = self.notifications.send(notification);
    }
}

impl std::fmt::Debug for CarouselController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarouselController")
            .field("page_count", &self.pages.len())
            .field("current_page", &self.current_page)
            .field("phase", &self.phase)
            .field("attached", &self.attached)
            .field("playing_page", &self.playing_page)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
