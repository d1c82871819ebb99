//! Auto-advance timer.
//!
//! The scheduler owns at most one live [`TimerHandle`]. Arming always
//! cancels the previous timer first, and every tick carries the generation
//! of the timer that produced it, so a tick that was already queued when its
//! timer got cancelled is recognised and dropped.
//!
//! Two modes exist. With only a global interval the timer repeats at that
//! cadence and is suspended while a video plays. Once a per-page interval
//! list is configured, the dwell time comes from the page being landed on and
//! playback no longer suspends the timer.

use std::time::Duration;

use log::{debug, trace, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::errors::CarouselError;
use crate::events::{CarouselEvent, EventSender};

/// The active auto-advance timer. Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    period: Duration,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// How the configured intervals resolve right now.
#[derive(Clone, Debug, PartialEq)]
pub enum AdvanceMode {
    Disabled,
    Global(Duration),
    PerPage(Vec<Duration>),
}

#[derive(Debug)]
pub struct AutoAdvanceScheduler {
    /// Global interval in seconds; `<= 0` disables.
    interval: f64,
    /// Per-page intervals in seconds, indexed by page.
    page_intervals: Vec<f64>,
    page_count: usize,
    timer: Option<TimerHandle>,
    generation: u64,
    events: EventSender,
}

impl AutoAdvanceScheduler {
    pub fn new(interval: f64, page_intervals: Vec<f64>, events: EventSender) -> Self {
        Self { interval, page_intervals, page_count: 0, timer: None, generation: 0, events }
    }

    /// Replaces the global interval and re-evaluates the timer for `page`.
    pub fn set_interval(&mut self, secs: f64, page: usize) {
        debug!("Auto-advance interval set to {}s.", secs);
        self.interval = secs;
        self.restart(page);
    }

    /// Replaces the per-page interval list and re-evaluates the timer for `page`.
    pub fn set_page_intervals(&mut self, intervals: Vec<f64>, page: usize) {
        debug!("Per-page auto-advance intervals set to {:?}.", intervals);
        self.page_intervals = intervals;
        self.restart(page);
    }

    /// Records a new page count and re-evaluates the timer for `page`.
    pub fn set_page_count(&mut self, count: usize, page: usize) {
        self.page_count = count;
        self.restart(page);
    }

    pub fn is_per_page(&self) -> bool {
        !self.page_intervals.is_empty()
    }

    /// True when a playing video should hold the timer back.
    pub fn suspends_for_playback(&self) -> bool {
        !self.is_per_page()
    }

    pub fn mode(&self) -> AdvanceMode {
        if self.is_per_page() {
            let periods: Vec<Duration> =
                self.page_intervals.iter().filter_map(|&secs| period_from_secs(secs)).collect();
            if periods.len() == self.page_intervals.len() && periods.len() == self.page_count {
                return AdvanceMode::PerPage(periods);
            }
            return AdvanceMode::Disabled;
        }
        match period_from_secs(self.interval) {
            Some(period) => AdvanceMode::Global(period),
            None => AdvanceMode::Disabled,
        }
    }

    /// The dwell time for `page`, or `None` when the scheduler must stay disarmed.
    pub fn period_for(&self, page: usize) -> Result<Option<Duration>, CarouselError> {
        if self.page_count < 2 {
            return Ok(None);
        }
        if self.is_per_page() {
            if self.page_intervals.len() != self.page_count {
                return Err(CarouselError::SchedulerMisconfiguration {
                    page_count: self.page_count,
                    intervals: self.page_intervals.len(),
                });
            }
            return Ok(self.page_intervals.get(page).and_then(|&secs| period_from_secs(secs)));
        }
        Ok(period_from_secs(self.interval))
    }

    /// Cancels the current timer and starts a repeating one with `period`.
    pub fn arm(&mut self, period: Duration) {
        self.disarm();
        if period.is_zero() {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let events = self.events.clone();
        let armed_at = Instant::now();
        let task = tokio::spawn(async move {
            let mut next = armed_at + period;
            loop {
                tokio::time::sleep_until(next).await;
                if events.send(CarouselEvent::Tick { generation }).is_err() {
                    break;
                }
                next += period;
            }
        });
        debug!("Auto-advance armed: every {:.2}s (generation {}).", period.as_secs_f64(), generation);
        self.timer = Some(TimerHandle { generation, period, task });
    }

    /// Cancels the current timer, if any.
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            trace!("Auto-advance disarmed (generation {}).", timer.generation);
        }
    }

    /// Disarms, then re-arms with the interval that applies to `page`.
    pub fn restart(&mut self, page: usize) {
        self.disarm();
        match self.period_for(page) {
            Ok(Some(period)) => self.arm(period),
            Ok(None) => trace!("Auto-advance stays disarmed for page {}.", page),
            Err(e) => warn!("{}", e),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn timer(&self) -> Option<&TimerHandle> {
        self.timer.as_ref()
    }

    /// Number of timers armed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True only for ticks of the currently armed timer.
    pub fn accept_tick(&self, generation: u64) -> bool {
        self.timer.as_ref().map_or(false, |t| t.generation == generation)
    }
}

fn period_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}
