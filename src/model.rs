//! Defines the core data structures used by the carousel.
//!
//! `MediaItem` describes what a page shows and is deserialized from the page
//! list file. `MediaSource` is the validated, loadable form of a URL or path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use super::errors::MediaError;

/// Content of a single carousel page. Immutable once constructed; the
/// position in the page list defines the page index.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaItem {
    RemoteVideo { url: String },
    LocalVideo { path: PathBuf },
    RemoteImage { url: String },
    /// An image on disk. `url` is used when `path` is empty.
    LocalImage {
        path: PathBuf,
        #[serde(default)]
        url: Option<String>,
    },
    /// A video stacked above an image, both remote.
    StackedRemote { video_url: String, image_url: String },
    /// A video stacked above an image, both on disk.
    StackedLocal { video_path: PathBuf, image_path: PathBuf },
}

impl MediaItem {
    /// Short name of the variant, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            MediaItem::RemoteVideo { .. } => "remote_video",
            MediaItem::LocalVideo { .. } => "local_video",
            MediaItem::RemoteImage { .. } => "remote_image",
            MediaItem::LocalImage { .. } => "local_image",
            MediaItem::StackedRemote { .. } => "stacked_remote",
            MediaItem::StackedLocal { .. } => "stacked_local",
        }
    }

    /// True if this page carries a video and therefore gets a `PlaybackUnit`.
    pub fn has_video(&self) -> bool {
        matches!(
            self,
            MediaItem::RemoteVideo { .. }
                | MediaItem::LocalVideo { .. }
                | MediaItem::StackedRemote { .. }
                | MediaItem::StackedLocal { .. }
        )
    }

    /// Resolves the playable video resource of this page.
    ///
    /// Returns `Ok(None)` for image-only pages and `Err(MediaError::InvalidSource)`
    /// when the URL or path is malformed.
    pub fn video_source(&self) -> Result<Option<MediaSource>, MediaError> {
        match self {
            MediaItem::RemoteVideo { url } => MediaSource::remote(url).map(Some),
            MediaItem::LocalVideo { path } => MediaSource::file(path).map(Some),
            MediaItem::StackedRemote { video_url, .. } => MediaSource::remote(video_url).map(Some),
            MediaItem::StackedLocal { video_path, .. } => MediaSource::file(video_path).map(Some),
            MediaItem::RemoteImage { .. } | MediaItem::LocalImage { .. } => Ok(None),
        }
    }

    /// Resolves the still image of this page, if it has one.
    pub fn image_source(&self) -> Result<Option<MediaSource>, MediaError> {
        match self {
            MediaItem::RemoteImage { url } => MediaSource::remote(url).map(Some),
            MediaItem::LocalImage { path, url } => {
                if !path.as_os_str().is_empty() {
                    MediaSource::file(path).map(Some)
                } else if let Some(url) = url {
                    MediaSource::remote(url).map(Some)
                } else {
                    Err(MediaError::InvalidSource("local image with neither path nor url".into()))
                }
            }
            MediaItem::StackedRemote { image_url, .. } => MediaSource::remote(image_url).map(Some),
            MediaItem::StackedLocal { image_path, .. } => MediaSource::file(image_path).map(Some),
            MediaItem::RemoteVideo { .. } | MediaItem::LocalVideo { .. } => Ok(None),
        }
    }
}

/// A validated media resource: either an http(s) URL or a local file path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MediaSource {
    Remote(Url),
    File(PathBuf),
}

impl MediaSource {
    /// Parses a remote URL. Characters that are not allowed in a URL
    /// (spaces, non-ASCII) are percent-encoded by the parser.
    pub fn remote(raw: &str) -> Result<Self, MediaError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MediaError::InvalidSource("empty url".into()));
        }
        let url = Url::parse(trimmed)
            .map_err(|e| MediaError::InvalidSource(format!("'{}': {}", trimmed, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(MediaSource::Remote(url)),
            other => Err(MediaError::InvalidSource(format!(
                "'{}': unsupported scheme '{}'",
                trimmed, other
            ))),
        }
    }

    /// Wraps a local file path. Only the empty path is rejected here; a
    /// missing file is a load failure, not a malformed source.
    pub fn file(path: &Path) -> Result<Self, MediaError> {
        if path.as_os_str().is_empty() {
            return Err(MediaError::InvalidSource("empty file path".into()));
        }
        Ok(MediaSource::File(path.to_path_buf()))
    }

    /// Identifier used in logs and status reports.
    pub fn identifier(&self) -> String {
        match self {
            MediaSource::Remote(url) => url.as_str().to_string(),
            MediaSource::File(path) => path.display().to_string(),
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

/// What a successful video load reports back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MediaInfo {
    pub duration: Duration,
}

/// Overall state of the carousel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CarouselPhase {
    /// No pages, or detached from the host.
    Idle,
    /// Pages assigned and attached; playback and auto-advance are live.
    Active,
}
