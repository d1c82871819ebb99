//! End-to-end scenarios driven through `CarouselHandle`, on tokio's paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use media_carousel::events::NotificationReceiver;
use media_carousel::{
    AdvanceMode, Carousel, CarouselConfig, CarouselHandle, CarouselNotification, CarouselPhase, ImageLoader, LoadFuture, LoadState,
    MediaError, MediaInfo, MediaItem, MediaLoader, MediaSource, PlaybackEvent, Rect, TransportState, VisiblePage,
    VisibilitySnapshot,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const DEFAULT_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Per-url load behaviour; anything unscripted loads a 10s video in 200ms.
#[derive(Default)]
struct ScriptedLoader {
    scripts: HashMap<String, (Duration, Result<Duration, String>)>,
    /// Urls whose load panics, as a decoder would on a corrupt header.
    panics: Vec<String>,
    calls: AtomicUsize,
    completed: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    fn script(mut self, url: &str, delay: Duration, outcome: Result<Duration, &str>) -> Self {
        self.scripts.insert(url.to_string(), (delay, outcome.map_err(str::to_string)));
        self
    }

    fn panic_on(mut self, url: &str) -> Self {
        self.panics.push(url.to_string());
        self
    }
}

impl MediaLoader for ScriptedLoader {
    fn load(&self, source: &MediaSource) -> LoadFuture<MediaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics.contains(&source.identifier()) {
            let id = source.identifier();
            return Box::pin(async move { panic!("attempt to add with overflow while probing {}", id) });
        }
        let (delay, outcome) =
            self.scripts.get(&source.identifier()).cloned().unwrap_or((DEFAULT_DELAY, Ok(DEFAULT_DURATION)));
        let completed = self.completed.clone();
        Box::pin(async move {
            sleep(delay).await;
            completed.fetch_add(1, Ordering::SeqCst);
            outcome.map(|duration| MediaInfo { duration }).map_err(MediaError::Generic)
        })
    }
}

struct BlankImages;

impl ImageLoader for BlankImages {
    fn load_image(&self, _source: &MediaSource) -> LoadFuture<RgbaImage> {
        Box::pin(async { Ok(RgbaImage::new(1, 1)) })
    }
}

fn url(name: &str) -> String {
    format!("https://cdn.example.com/{}", name)
}

fn video(name: &str) -> MediaItem {
    MediaItem::RemoteVideo { url: url(name) }
}

fn image(name: &str) -> MediaItem {
    MediaItem::RemoteImage { url: url(name) }
}

fn viewport() -> Rect {
    Rect::new(0.0, 0.0, 1920.0, 1080.0)
}

fn settled(page: usize) -> VisibilitySnapshot {
    VisibilitySnapshot::settled(page, viewport())
}

/// Half-way between `page` and `page + 1`.
fn halfway(page: usize) -> VisibilitySnapshot {
    VisibilitySnapshot::scrolled((page as f32 + 0.5) * 1920.0, &[page, page + 1], viewport())
}

/// Every listed page shrunk into a 400px column of one wide viewport.
fn side_by_side(indices: &[usize]) -> VisibilitySnapshot {
    VisibilitySnapshot {
        viewport: viewport(),
        pages: indices
            .iter()
            .map(|&index| VisiblePage { index, frame: Rect::new(index as f32 * 400.0, 0.0, 400.0, 300.0) })
            .collect(),
        scroll_offset: 0.0,
        page_extent: 0.0,
    }
}

struct Running {
    handle: CarouselHandle,
    notifications: NotificationReceiver,
    task: JoinHandle<()>,
}

impl Running {
    fn notes(&mut self) -> Vec<CarouselNotification> {
        let mut out = Vec::new();
        while let Ok(note) = self.notifications.try_recv() {
            out.push(note);
        }
        out
    }

    async fn stop(self) {
        self.handle.shutdown().unwrap();
        self.task.await.unwrap();
    }
}

fn start(config: CarouselConfig, loader: Arc<ScriptedLoader>) -> Running {
    let (carousel, handle, notifications) = Carousel::new(&config, loader, Arc::new(BlankImages));
    let task = tokio::spawn(carousel.run());
    Running { handle, notifications, task }
}

fn playback_events(notes: &[CarouselNotification], page: usize) -> Vec<PlaybackEvent> {
    notes
        .iter()
        .filter_map(|n| match n {
            CarouselNotification::Playback { page: p, event } if *p == page => Some(event.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn global_interval_waits_for_the_video_then_moves_on() {
    let loader = Arc::new(ScriptedLoader::default());
    let mut run = start(CarouselConfig { interval: 5.0, ..Default::default() }, loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![image("a.jpg"), video("b.mp4"), image("c.jpg")]).unwrap();
    handle.visibility_changed(settled(0)).unwrap();
    let before = handle.status().await.unwrap();
    assert_eq!(before.timer_period, Some(Duration::from_secs(5)));

    handle.visibility_changed(halfway(0)).unwrap();
    let during = handle.status().await.unwrap();
    assert!(during.timer_generation.unwrap() > before.timer_generation.unwrap());
    assert_eq!(during.playing_page, None);

    handle.visibility_changed(settled(1)).unwrap();
    sleep(Duration::from_millis(300)).await;
    let playing = handle.status().await.unwrap();
    assert_eq!(playing.current_page, 1);
    assert_eq!(playing.playing_page, Some(1));
    assert_eq!(playing.timer_period, None);

    sleep(Duration::from_millis(8_700)).await;
    assert_eq!(handle.status().await.unwrap().current_page, 1);

    sleep(Duration::from_secs(2)).await;
    let after = handle.status().await.unwrap();
    assert_eq!(after.current_page, 2);
    assert_eq!(after.playing_page, None);
    assert_eq!(after.timer_period, Some(Duration::from_secs(5)));
    assert_eq!(after.unit(1).unwrap().transport, TransportState::Ended);

    let notes = run.notes();
    assert!(playback_events(&notes, 1).contains(&PlaybackEvent::PlaybackEnded));
    assert!(notes.iter().any(|n| matches!(n, CarouselNotification::ScrollToPage(2))));
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn per_page_intervals_follow_the_destination_page() {
    let loader = Arc::new(ScriptedLoader::default());
    let config = CarouselConfig { page_intervals: vec![3.0, 5.0, 7.0], ..Default::default() };
    let mut run = start(config, loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![image("a.jpg"), image("b.jpg"), image("c.jpg")]).unwrap();
    assert_eq!(handle.status().await.unwrap().timer_period, Some(Duration::from_secs(3)));

    handle.visibility_changed(halfway(1)).unwrap();
    handle.visibility_changed(settled(2)).unwrap();
    let landed = handle.status().await.unwrap();
    assert_eq!(landed.current_page, 2);
    assert_eq!(landed.timer_period, Some(Duration::from_secs(7)));

    sleep(Duration::from_millis(7_100)).await;
    let wrapped = handle.status().await.unwrap();
    assert_eq!(wrapped.current_page, 0);
    assert_eq!(wrapped.timer_period, Some(Duration::from_secs(3)));
    assert!(run.notes().iter().any(|n| matches!(n, CarouselNotification::ScrollToPage(0))));
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_page_gives_way_to_the_next_playable_one() {
    let loader = Arc::new(
        ScriptedLoader::default().script(&url("broken.mp4"), Duration::from_millis(100), Err("HTTP 404")),
    );
    let run = start(CarouselConfig::default(), loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![video("broken.mp4"), video("fine.mp4")]).unwrap();
    handle.visibility_changed(side_by_side(&[0, 1])).unwrap();
    sleep(Duration::from_millis(500)).await;

    let status = handle.status().await.unwrap();
    let failed = status.unit(0).unwrap();
    assert_eq!(failed.load_state, LoadState::Failed);
    assert!(failed.last_error.as_deref().unwrap().contains("HTTP 404"));
    assert_eq!(status.playing_page, Some(1));
    assert_eq!(status.phase, CarouselPhase::Active);

    // Still passed over on later layout passes; no automatic retry.
    handle.visibility_changed(side_by_side(&[0, 1])).unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.unit(0).unwrap().load_state, LoadState::Failed);
    assert_eq!(status.playing_page, Some(1));
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_load_fails_the_page_instead_of_blocking_the_next() {
    let loader = Arc::new(ScriptedLoader::default().panic_on(&url("broken.mp4")));
    let run = start(CarouselConfig::default(), loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![video("broken.mp4"), video("fine.mp4")]).unwrap();
    handle.visibility_changed(side_by_side(&[0, 1])).unwrap();
    sleep(Duration::from_millis(500)).await;

    let status = handle.status().await.unwrap();
    let failed = status.unit(0).unwrap();
    assert_eq!(failed.load_state, LoadState::Failed);
    assert!(failed.last_error.as_deref().unwrap().contains("Load task for page 0 failed"));
    assert_eq!(status.playing_page, Some(1));
    assert_eq!(status.unit(1).unwrap().transport, TransportState::Playing);
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn per_page_timer_keeps_running_while_a_video_plays() {
    let loader = Arc::new(ScriptedLoader::default());
    let config = CarouselConfig { page_intervals: vec![3.0, 5.0], ..Default::default() };
    let mut run = start(config, loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![video("a.mp4"), image("b.jpg")]).unwrap();
    handle.visibility_changed(settled(0)).unwrap();
    sleep(Duration::from_millis(300)).await;
    let playing = handle.status().await.unwrap();
    assert_eq!(playing.playing_page, Some(0));
    assert_eq!(playing.timer_period, Some(Duration::from_secs(3)));
    assert_eq!(
        playing.advance_mode,
        AdvanceMode::PerPage(vec![Duration::from_secs(3), Duration::from_secs(5)])
    );
    let armed = playing.timer_generation;

    sleep(Duration::from_millis(1_500)).await;
    let still = handle.status().await.unwrap();
    assert_eq!(still.current_page, 0);
    assert_eq!(still.timer_generation, armed);

    sleep(Duration::from_millis(1_300)).await;
    let moved = handle.status().await.unwrap();
    assert_eq!(moved.current_page, 1);
    assert_eq!(moved.timer_period, Some(Duration::from_secs(5)));
    assert!(run.notes().iter().any(|n| matches!(n, CarouselNotification::ScrollToPage(1))));
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reassigning_the_same_pages_keeps_the_video_playing() {
    let loader = Arc::new(ScriptedLoader::default());
    let mut run = start(CarouselConfig::default(), loader.clone());
    let handle = run.handle.clone();
    let pages = vec![video("a.mp4"), image("b.jpg")];

    handle.set_pages(pages.clone()).unwrap();
    handle.visibility_changed(settled(0)).unwrap();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.status().await.unwrap().playing_page, Some(0));
    run.notes();

    handle.set_pages(pages).unwrap();
    sleep(Duration::from_millis(300)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.playing_page, Some(0));
    assert_eq!(status.unit(0).unwrap().transport, TransportState::Playing);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    let changes: Vec<PlaybackEvent> = playback_events(&run.notes(), 0)
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::PlayingChanged(_)))
        .collect();
    assert!(changes.is_empty(), "{changes:?}");
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn detaching_mid_load_discards_the_load() {
    let loader = Arc::new(ScriptedLoader::default().script(
        &url("slow.mp4"),
        Duration::from_secs(1),
        Ok(Duration::from_secs(4)),
    ));
    let run = start(CarouselConfig { interval: 5.0, ..Default::default() }, loader.clone());
    let handle = run.handle.clone();

    handle.set_pages(vec![video("slow.mp4"), image("b.jpg")]).unwrap();
    handle.visibility_changed(settled(0)).unwrap();
    sleep(Duration::from_millis(100)).await;
    handle.detach().unwrap();

    sleep(Duration::from_secs(3)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, CarouselPhase::Idle);
    assert!(status.units.is_empty());
    assert_eq!(status.playing_page, None);
    assert_eq!(status.timer_generation, None);
    assert_eq!(loader.completed.load(Ordering::SeqCst), 0);

    handle.attach().unwrap();
    handle.visibility_changed(settled(0)).unwrap();
    sleep(Duration::from_millis(1_100)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.playing_page, Some(0));
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_video_plays() {
    let loader = Arc::new(ScriptedLoader::default());
    let config = CarouselConfig { interval: 2.0, recycle_distance: 4, ..Default::default() };
    let run = start(config, loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![video("a.mp4"), video("b.mp4"), video("c.mp4"), video("d.mp4")]).unwrap();
    let layouts = [
        side_by_side(&[0, 1, 2, 3]),
        halfway(1),
        side_by_side(&[2, 3]),
        settled(3),
        side_by_side(&[1, 2]),
        halfway(2),
        settled(0),
        side_by_side(&[0, 3]),
    ];
    for layout in layouts {
        handle.visibility_changed(layout).unwrap();
        let status = handle.status().await.unwrap();
        assert!(status.playing_count() <= 1, "{status:?}");
        sleep(Duration::from_millis(700)).await;
        let status = handle.status().await.unwrap();
        assert!(status.playing_count() <= 1, "{status:?}");
    }
    run.stop().await;
}

#[tokio::test(start_paused = true)]
async fn indicator_selection_scrolls_and_rearms() {
    let loader = Arc::new(ScriptedLoader::default());
    let config = CarouselConfig { page_intervals: vec![3.0, 5.0, 7.0], ..Default::default() };
    let mut run = start(config, loader);
    let handle = run.handle.clone();

    handle.set_pages(vec![image("a.jpg"), image("b.jpg"), image("c.jpg")]).unwrap();
    handle.select_page(1).unwrap();
    handle.select_page(9).unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.current_page, 1);
    assert_eq!(status.timer_period, Some(Duration::from_secs(5)));

    let notes = run.notes();
    assert!(notes.iter().any(|n| matches!(n, CarouselNotification::CurrentPageChanged(1))));
    assert!(notes.iter().any(|n| matches!(n, CarouselNotification::ScrollToPage(1))));
    assert!(!notes.iter().any(|n| matches!(n, CarouselNotification::ScrollToPage(9))));

    // A list that does not match the page count disarms instead of misindexing.
    handle.set_page_intervals(vec![3.0, 5.0]).unwrap();
    assert_eq!(handle.status().await.unwrap().timer_period, None);
    run.stop().await;
}
