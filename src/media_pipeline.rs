//! Loads media for the carousel.
//!
//! This module is responsible for:
//! - Defining the loader seams the controller talks to (`MediaLoader` for
//!   videos, `ImageLoader` for still images).
//! - Probing video durations, either from the MP4 header (`HeaderProbeLoader`)
//!   or through libav when built with the `ffmpeg` feature (`FfmpegLoader`).
//! - Fetching and decoding still images from disk or over HTTP.

use std::future::Future;
use std::io::Cursor;
use std::path::PathBuf;
use std::pin::Pin;

use image::RgbaImage;
use log::{debug, error, info, trace};
use reqwest::Client as ReqwestClient;
use url::Url;

use super::errors::MediaError;
use super::model::{MediaInfo, MediaSource};
use super::probe;

/// Boxed future returned by loaders. Dropping it (or aborting the task that
/// drives it) cancels the load.
pub type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<T, MediaError>> + Send + 'static>>;

/// Prepares a video resource for playback and reports its duration.
pub trait MediaLoader: Send + Sync {
    fn load(&self, source: &MediaSource) -> LoadFuture<MediaInfo>;
}

/// Fetches and decodes a page's still image.
pub trait ImageLoader: Send + Sync {
    fn load_image(&self, source: &MediaSource) -> LoadFuture<RgbaImage>;
}

/// Default number of leading bytes fetched when probing a remote video.
pub const DEFAULT_PROBE_BYTES: u64 = 1024 * 1024;

/// Reads the duration straight from the MP4 `moov/mvhd` header.
///
/// Local files are walked on the blocking pool. Remote files are fetched
/// with a ranged GET covering the first `probe_bytes` bytes, so the header
/// has to sit near the front of the file ("fast start").
#[derive(Clone, Debug)]
pub struct HeaderProbeLoader {
    client: ReqwestClient,
    probe_bytes: u64,
}

impl HeaderProbeLoader {
    pub fn new(client: ReqwestClient, probe_bytes: u64) -> Self {
        Self { client, probe_bytes: probe_bytes.max(1) }
    }
}

impl MediaLoader for HeaderProbeLoader {
    fn load(&self, source: &MediaSource) -> LoadFuture<MediaInfo> {
        match source {
            MediaSource::File(path) => Box::pin(probe_local_file(path.clone())),
            MediaSource::Remote(url) => {
                Box::pin(probe_remote(self.client.clone(), url.clone(), self.probe_bytes))
            }
        }
    }
}

async fn probe_local_file(path: PathBuf) -> Result<MediaInfo, MediaError> {
    debug!("Probing local video: {}", path.display());
    let display = path.display().to_string();
    let duration = tokio::task::spawn_blocking(move || -> Result<std::time::Duration, MediaError> {
        let mut file = std::fs::File::open(&path)?;
        probe::read_movie_duration(&mut file)
    })
    .await
    .map_err(|e| {
        error!("Tokio task join error while probing {}: {}", display, e);
        MediaError::TaskJoin(format!("Probe task for {} failed: {}", display, e))
    })??;
    info!("Probed {}: {:.2}s", display, duration.as_secs_f64());
    Ok(MediaInfo { duration })
}

async fn probe_remote(client: ReqwestClient, url: Url, probe_bytes: u64) -> Result<MediaInfo, MediaError> {
    debug!("Probing remote video: {} (first {} bytes)", url, probe_bytes);
    let response = client
        .get(url.clone())
        .header(reqwest::header::RANGE, format!("bytes=0-{}", probe_bytes - 1))
        .send()
        .await
        .map_err(|e| {
            error!("Request error probing {}: {:?}", url, e);
            MediaError::Download(e)
        })?;

    let mut response = response.error_for_status().map_err(|e| {
        let status = e.status().unwrap_or_default();
        error!("HTTP error {} probing {}: {}", status, url, e);
        MediaError::Download(e)
    })?;

    // Servers that ignore the Range header send the whole file; stop reading
    // once the probe window is full.
    let limit = usize::try_from(probe_bytes).unwrap_or(usize::MAX);
    let mut head = Vec::new();
    while head.len() < limit {
        match response.chunk().await.map_err(MediaError::Download)? {
            Some(chunk) => head.extend_from_slice(&chunk),
            None => break,
        }
    }
    head.truncate(limit);
    trace!("Fetched {} header bytes from {}", head.len(), url);

    let duration = probe::read_movie_duration(&mut Cursor::new(head))?;
    info!("Probed {}: {:.2}s", url, duration.as_secs_f64());
    Ok(MediaInfo { duration })
}

/// Probes videos through libav, which understands every container FFmpeg does.
#[cfg(feature = "ffmpeg")]
#[derive(Clone, Debug, Default)]
pub struct FfmpegLoader;

#[cfg(feature = "ffmpeg")]
impl MediaLoader for FfmpegLoader {
    fn load(&self, source: &MediaSource) -> LoadFuture<MediaInfo> {
        let location = source.identifier();
        Box::pin(async move {
            let label = location.clone();
            tokio::task::spawn_blocking(move || -> Result<MediaInfo, MediaError> {
                ffmpeg_next::init()?;
                let context = ffmpeg_next::format::input(&location)?;
                let micros = context.duration();
                if micros <= 0 {
                    return Err(MediaError::Probe(format!("{} reports no duration", location)));
                }
                let duration = std::time::Duration::from_micros(micros as u64);
                info!("FFmpeg probed {}: {:.2}s", location, duration.as_secs_f64());
                Ok(MediaInfo { duration })
            })
            .await
            .map_err(|e| {
                error!("Tokio task join error while probing {}: {}", label, e);
                MediaError::TaskJoin(format!("FFmpeg task for {} failed: {}", label, e))
            })?
        })
    }
}

/// Fetches still images over HTTP or from disk and decodes them to RGBA.
#[derive(Clone, Debug)]
pub struct FetchImageLoader {
    client: ReqwestClient,
}

impl FetchImageLoader {
    pub fn new(client: ReqwestClient) -> Self {
        Self { client }
    }
}

impl ImageLoader for FetchImageLoader {
    fn load_image(&self, source: &MediaSource) -> LoadFuture<RgbaImage> {
        let client = self.client.clone();
        let source = source.clone();
        Box::pin(async move {
            let bytes = match &source {
                MediaSource::Remote(url) => fetch_bytes(&client, url).await?,
                MediaSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
                    error!("Error reading image file {}: {}", path.display(), e);
                    MediaError::Io(e)
                })?,
            };
            let id = source.identifier();
            tokio::task::spawn_blocking(move || decode_image(&bytes))
                .await
                .map_err(|e| {
                    error!("Tokio task join error decoding {}: {}", id, e);
                    MediaError::TaskJoin(format!("Decode task for {} failed: {}", id, e))
                })?
        })
    }
}

async fn fetch_bytes(client: &ReqwestClient, url: &Url) -> Result<Vec<u8>, MediaError> {
    let response = client.get(url.clone()).send().await.map_err(|e| {
        error!("Request error fetching image {}: {:?}", url, e);
        MediaError::Download(e)
    })?;
    let response = response.error_for_status().map_err(|e| {
        let status = e.status().unwrap_or_default();
        error!("HTTP error {} fetching image {}: {}", status, url, e);
        MediaError::Download(e)
    })?;
    let bytes = response.bytes().await.map_err(|e| {
        error!("Error reading image bytes from {}: {:?}", url, e);
        MediaError::Download(e)
    })?;
    Ok(bytes.to_vec())
}

/// Decodes an encoded image (PNG or JPEG) into an RGBA buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, MediaError> {
    let img = image::load_from_memory(bytes)?;
    trace!("Decoded image: {}x{}", img.width(), img.height());
    Ok(img.to_rgba8())
}
