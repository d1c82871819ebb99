//! Messages flowing into and out of the carousel's control loop.
//!
//! Everything that can change carousel state arrives as a [`CarouselEvent`]
//! on a single channel: commands from the host or embedding application,
//! load completions and progress ticks from playback units, and ticks from
//! the auto-advance timer. Outbound facts leave as [`CarouselNotification`]s.

use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::{mpsc, oneshot};

use crate::controller::CarouselStatus;
use crate::errors::MediaError;
use crate::model::{MediaInfo, MediaItem};
use crate::playback::PlaybackEvent;
use crate::visibility::VisibilitySnapshot;

pub type EventSender = mpsc::UnboundedSender<CarouselEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<CarouselEvent>;
pub type NotificationSender = mpsc::UnboundedSender<CarouselNotification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<CarouselNotification>;

/// Input to the control loop.
#[derive(Debug)]
pub enum CarouselEvent {
    Command(CarouselCommand),
    /// A unit's asynchronous load finished. Stale generations are dropped.
    LoadFinished { page: usize, generation: u64, result: Result<MediaInfo, MediaError> },
    /// Periodic progress tick of a playing unit.
    Progress { page: usize, generation: u64 },
    /// Auto-advance timer fired.
    Tick { generation: u64 },
}

/// Requests from the host view or the embedding application.
#[derive(Debug)]
pub enum CarouselCommand {
    /// Replace the whole page list.
    SetPages(Vec<MediaItem>),
    /// Rebind a single page to new content.
    ReplacePage { page: usize, item: MediaItem },
    /// The host's scroll/layout notifier reported a new set of visible pages.
    VisibilityChanged(VisibilitySnapshot),
    /// The page indicator (or the host) moved to a page.
    SelectPage(usize),
    /// The user tapped a page.
    ItemTapped(usize),
    ToggleMute(usize),
    /// A host-side player reached the end of the page's video.
    EndOfMedia(usize),
    /// Global auto-advance interval in seconds; 0 disables.
    SetInterval(f64),
    /// Per-page auto-advance intervals in seconds.
    SetPageIntervals(Vec<f64>),
    SetLoop(bool),
    /// The host view appeared or disappeared without being torn down.
    SetHostVisible(bool),
    Attach,
    Detach,
    Status(oneshot::Sender<CarouselStatus>),
    Shutdown,
}

/// Output for the host view and the embedding application.
#[derive(Debug, Clone)]
pub enum CarouselNotification {
    /// The page indicator should show `n` pages.
    PageCountChanged(usize),
    /// The page indicator should highlight this page.
    CurrentPageChanged(usize),
    /// The host should scroll to this page.
    ScrollToPage(usize),
    /// The user tapped this page.
    PageSelected(usize),
    /// Forwarded from a page's playback unit (mute icon, remaining time, ...).
    Playback { page: usize, event: PlaybackEvent },
    /// A page's still image finished loading.
    ImageReady { page: usize, image: Arc<RgbaImage> },
}
