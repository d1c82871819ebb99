//! Headless driver for the carousel.
//!
//! Loads the configuration and page list, then runs the carousel against a
//! simulated host: a single full-screen viewport that jumps to whatever page
//! the carousel asks for. Everything the carousel reports is logged.

use std::sync::Arc;

use log::{debug, error, info, warn};
use reqwest::Client as ReqwestClient;

use media_carousel::config::{self, DEFAULT_CONFIG_PATH};
use media_carousel::{
    Carousel, CarouselError, CarouselHandle, CarouselNotification, FetchImageLoader, MediaLoader, PlaybackEvent, Rect,
    VisibilitySnapshot,
};

const VIEWPORT_WIDTH: f32 = 1920.0;
const VIEWPORT_HEIGHT: f32 = 1080.0;

#[cfg(feature = "ffmpeg")]
fn build_loader(_client: &ReqwestClient, _probe_bytes: u64) -> Arc<dyn MediaLoader> {
    Arc::new(media_carousel::FfmpegLoader)
}

#[cfg(not(feature = "ffmpeg"))]
fn build_loader(client: &ReqwestClient, probe_bytes: u64) -> Arc<dyn MediaLoader> {
    Arc::new(media_carousel::HeaderProbeLoader::new(client.clone(), probe_bytes))
}

fn show_page(handle: &CarouselHandle, page: usize) -> Result<(), CarouselError> {
    let viewport = Rect::new(0.0, 0.0, VIEWPORT_WIDTH, VIEWPORT_HEIGHT);
    handle.visibility_changed(VisibilitySnapshot::settled(page, viewport))
}

#[tokio::main]
async fn main() -> Result<(), CarouselError> {
    env_logger::init();
    info!("Starting media_carousel...");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let carousel_config = config::load_config(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        CarouselError::from(e)
    })?;
    let pages = config::load_pages(&carousel_config.pages_path)?;
    let video_pages = pages.iter().filter(|page| page.has_video()).count();
    info!("{} of {} page(s) carry a video.", video_pages, pages.len());

    let http_client = ReqwestClient::new();
    let loader = build_loader(&http_client, carousel_config.probe_bytes);
    let image_loader = Arc::new(FetchImageLoader::new(http_client));

    let (carousel, handle, mut notifications) = Carousel::new(&carousel_config, loader, image_loader);
    let control_loop = tokio::spawn(carousel.run());

    handle.set_pages(pages)?;
    show_page(&handle, 0)?;

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                match notification {
                    CarouselNotification::ScrollToPage(page) => {
                        debug!("Host scrolling to page {}.", page);
                        show_page(&handle, page)?;
                    }
                    CarouselNotification::CurrentPageChanged(page) => info!("Now showing page {}.", page),
                    CarouselNotification::PageCountChanged(count) => info!("Carousel has {} page(s).", count),
                    CarouselNotification::PageSelected(page) => info!("Page {} tapped.", page),
                    CarouselNotification::ImageReady { page, image } => {
                        info!("Page {}: image ready ({}x{}).", page, image.width(), image.height());
                    }
                    CarouselNotification::Playback { page, event: PlaybackEvent::RemainingTimeChanged(secs) } => {
                        debug!("Page {}: {}s remaining.", page, secs);
                    }
                    CarouselNotification::Playback { page, event } => info!("Page {}: {:?}", page, event),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Interrupt received, shutting down.");
                handle.shutdown()?;
                break;
            }
        }
    }

    control_loop.await.map_err(|e| CarouselError::Generic(format!("Control loop task failed: {}", e)))?;
    info!("media_carousel stopped.");
    Ok(())
}
