//! Defines the custom error types used throughout the `media_carousel` crate.
//!
//! Errors are grouped by concern: configuration loading, media loading
//! (probing videos, fetching images), and the carousel-level taxonomy that
//! the controller logs when a page cannot take part in playback. None of
//! them are fatal to a running carousel; they are logged and reflected in
//! per-page state instead.

use std::error::Error as StdError;
use std::fmt;

// --- ConfigError ---
/// Errors related to carousel configuration loading and parsing.
#[must_use = "a configuration error should be handled or propagated"]
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O error occurred while trying to read a configuration or page file.
    Io(std::io::Error),
    /// An error occurred while parsing the configuration or page file content.
    Parse(String),
    /// A required configuration key was missing from the file.
    MissingKey(String),
    /// A key was present but its value could not be used.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Configuration parse error: {}", e),
            ConfigError::MissingKey(key) => write!(f, "Missing configuration key: '{}'", key),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value '{}' for configuration key '{}'", value, key)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

// --- MediaError ---
/// Errors related to loading media: probing a video resource or fetching an image.
#[must_use = "a media error should be handled or propagated"]
#[derive(Debug)]
pub enum MediaError {
    /// An I/O error occurred while reading a local media file.
    Io(std::io::Error),
    /// An error occurred while downloading remote media content.
    Download(reqwest::Error),
    /// An error occurred during image decoding via the `image` crate.
    Image(image::ImageError),
    /// The URL or path supplied for a page is malformed.
    InvalidSource(String),
    /// The media container is not one the loader understands.
    UnsupportedFormat(String),
    /// The container was recognised but its header is damaged or incomplete.
    Probe(String),
    /// A blocking load task panicked or was cancelled before producing a result.
    TaskJoin(String),
    /// An error occurred inside libav while probing a video.
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(ffmpeg_next::Error),
    /// A generic media-related error.
    Generic(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Io(e) => write!(f, "Media I/O error: {}", e),
            MediaError::Download(e) => write!(f, "Media download error: {}", e),
            MediaError::Image(e) => write!(f, "Image processing error: {}", e),
            MediaError::InvalidSource(s) => write!(f, "Invalid media source: {}", s),
            MediaError::UnsupportedFormat(s) => write!(f, "Unsupported media format: {}", s),
            MediaError::Probe(s) => write!(f, "Media header error: {}", s),
            MediaError::TaskJoin(s) => write!(f, "Media load task failed: {}", s),
            #[cfg(feature = "ffmpeg")]
            MediaError::Ffmpeg(e) => write!(f, "FFmpeg error: {}", e),
            MediaError::Generic(s) => write!(f, "Media error: {}", s),
        }
    }
}

impl StdError for MediaError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            MediaError::Io(e) => Some(e),
            MediaError::Download(e) => Some(e),
            MediaError::Image(e) => Some(e),
            #[cfg(feature = "ffmpeg")]
            MediaError::Ffmpeg(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self { MediaError::Io(err) }
}
impl From<reqwest::Error> for MediaError {
    fn from(err: reqwest::Error) -> Self { MediaError::Download(err) }
}
impl From<image::ImageError> for MediaError {
    fn from(err: image::ImageError) -> Self { MediaError::Image(err) }
}
#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for MediaError {
    fn from(err: ffmpeg_next::Error) -> Self { MediaError::Ffmpeg(err) }
}

// --- CarouselError (Top-level error enum) ---
/// A top-level error type covering everything the carousel can report.
///
/// `ResourceMismatch` and `SchedulerMisconfiguration` are produced by the
/// controller and scheduler and only ever logged; the carousel carries on
/// without the offending page or timer.
#[must_use = "a carousel error should be handled or propagated"]
#[derive(Debug)]
pub enum CarouselError {
    Config(ConfigError),
    Media(MediaError),
    /// A page's URL or path could not be turned into a playable source.
    ResourceMismatch { page: usize, reason: String },
    /// The per-page interval list does not line up with the page list.
    SchedulerMisconfiguration { page_count: usize, intervals: usize },
    Generic(String),
}

impl fmt::Display for CarouselError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarouselError::Config(e) => write!(f, "Carousel Configuration Error: {}", e),
            CarouselError::Media(e) => write!(f, "Carousel Media Error: {}", e),
            CarouselError::ResourceMismatch { page, reason } => {
                write!(f, "Page {} skipped, unusable media source: {}", page, reason)
            }
            CarouselError::SchedulerMisconfiguration { page_count, intervals } => write!(
                f,
                "Auto-advance disabled: {} per-page interval(s) configured for {} page(s)",
                intervals, page_count
            ),
            CarouselError::Generic(s) => write!(f, "Carousel Error: {}", s),
        }
    }
}

impl StdError for CarouselError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CarouselError::Config(e) => Some(e),
            CarouselError::Media(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CarouselError {
    fn from(err: ConfigError) -> Self { CarouselError::Config(err) }
}
impl From<MediaError> for CarouselError {
    fn from(err: MediaError) -> Self { CarouselError::Media(err) }
}
