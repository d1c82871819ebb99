//! Playback scheduling core for a horizontally paging media carousel.
//!
//! Pages are images, videos, or a video stacked over an image. At most one
//! video plays at a time: the lowest-indexed page whose media area is fully
//! inside the viewport. An auto-advance timer moves the carousel on, either
//! at a global cadence that waits for playing videos or with a dwell time
//! chosen by the page being landed on.
//!
//! The crate owns no display surface. A host feeds it visibility snapshots
//! and commands through a [`CarouselHandle`] and reacts to the
//! [`CarouselNotification`]s it emits.

pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod media_pipeline;
pub mod model;
pub mod playback;
pub mod probe;
pub mod runtime;
pub mod scheduler;
pub mod visibility;

pub use config::{load_config, load_pages, parse_config, CarouselConfig};
pub use controller::{CarouselController, CarouselStatus, UnitStatus};
pub use errors::{CarouselError, ConfigError, MediaError};
pub use events::{CarouselCommand, CarouselEvent, CarouselNotification};
pub use media_pipeline::{FetchImageLoader, HeaderProbeLoader, ImageLoader, LoadFuture, MediaLoader};
pub use model::{CarouselPhase, MediaInfo, MediaItem, MediaSource};
pub use playback::{LoadState, PlaybackEvent, PlaybackUnit, TransportState};
pub use runtime::{Carousel, CarouselHandle};
pub use scheduler::{AdvanceMode, AutoAdvanceScheduler, TimerHandle};
pub use visibility::{select_playable, Containment, Rect, VisiblePage, VisibilitySnapshot};

#[cfg(feature = "ffmpeg")]
pub use media_pipeline::FfmpegLoader;
