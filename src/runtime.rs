//! The carousel's control loop and the handle used to talk to it.
//!
//! [`Carousel::run`] drains a single event channel on one task. Loads,
//! progress tickers and the auto-advance timer run as their own tasks but
//! only ever post events into that channel, so all state changes happen in
//! one place and in arrival order.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::config::CarouselConfig;
use crate::controller::{CarouselController, CarouselStatus};
use crate::errors::CarouselError;
use crate::events::{CarouselCommand, CarouselEvent, EventReceiver, EventSender, NotificationReceiver};
use crate::media_pipeline::{ImageLoader, MediaLoader};
use crate::model::MediaItem;
use crate::visibility::VisibilitySnapshot;

/// Owns the controller and the receiving end of its event channel.
#[derive(Debug)]
pub struct Carousel {
    controller: CarouselController,
    events: EventReceiver,
}

impl Carousel {
    /// Builds a carousel and returns it together with a command handle and
    /// the stream of notifications for the host and embedding application.
    pub fn new(
        config: &CarouselConfig,
        loader: Arc<dyn MediaLoader>,
        image_loader: Arc<dyn ImageLoader>,
    ) -> (Self, CarouselHandle, NotificationReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let controller = CarouselController::new(config, loader, image_loader, event_tx.clone(), notification_tx);
        let handle = CarouselHandle { events: event_tx };
        (Self { controller, events: event_rx }, handle, notification_rx)
    }

    /// Processes events until `Shutdown` arrives. Must run inside a tokio runtime.
    pub async fn run(mut self) {
        info!("Carousel control loop started.");
        // The controller holds a sender itself, so the channel never closes
        // on its own; `Shutdown` is the only way out.
        while let Some(event) = self.events.recv().await {
            if !self.controller.handle_event(event) {
                break;
            }
        }
        info!("Carousel control loop stopped.");
    }
}

/// Cloneable sender of commands into a running [`Carousel`].
#[derive(Clone, Debug)]
pub struct CarouselHandle {
    events: EventSender,
}

impl CarouselHandle {
    fn send(&self, command: CarouselCommand) -> Result<(), CarouselError> {
        self.events.send(CarouselEvent::Command(command)).map_err(|e| {
            warn!("Carousel loop is gone, dropping command: {:?}", e.0);
            CarouselError::Generic("carousel control loop has stopped".into())
        })
    }

    pub fn set_pages(&self, pages: Vec<MediaItem>) -> Result<(), CarouselError> {
        self.send(CarouselCommand::SetPages(pages))
    }

    pub fn replace_page(&self, page: usize, item: MediaItem) -> Result<(), CarouselError> {
        self.send(CarouselCommand::ReplacePage { page, item })
    }

    pub fn visibility_changed(&self, snapshot: VisibilitySnapshot) -> Result<(), CarouselError> {
        self.send(CarouselCommand::VisibilityChanged(snapshot))
    }

    pub fn select_page(&self, page: usize) -> Result<(), CarouselError> {
        self.send(CarouselCommand::SelectPage(page))
    }

    pub fn item_tapped(&self, page: usize) -> Result<(), CarouselError> {
        self.send(CarouselCommand::ItemTapped(page))
    }

    pub fn toggle_mute(&self, page: usize) -> Result<(), CarouselError> {
        self.send(CarouselCommand::ToggleMute(page))
    }

    pub fn end_of_media(&self, page: usize) -> Result<(), CarouselError> {
        self.send(CarouselCommand::EndOfMedia(page))
    }

    pub fn set_interval(&self, secs: f64) -> Result<(), CarouselError> {
        self.send(CarouselCommand::SetInterval(secs))
    }

    pub fn set_page_intervals(&self, intervals: Vec<f64>) -> Result<(), CarouselError> {
        self.send(CarouselCommand::SetPageIntervals(intervals))
    }

    pub fn set_loop(&self, looping: bool) -> Result<(), CarouselError> {
        self.send(CarouselCommand::SetLoop(looping))
    }

    pub fn set_host_visible(&self, visible: bool) -> Result<(), CarouselError> {
        self.send(CarouselCommand::SetHostVisible(visible))
    }

    pub fn attach(&self) -> Result<(), CarouselError> {
        self.send(CarouselCommand::Attach)
    }

    pub fn detach(&self) -> Result<(), CarouselError> {
        self.send(CarouselCommand::Detach)
    }

    /// Asks the loop for a status snapshot. Answered after every command sent
    /// before it has been applied.
    pub async fn status(&self) -> Result<CarouselStatus, CarouselError> {
        let (reply, response) = oneshot::channel();
        self.send(CarouselCommand::Status(reply))?;
        response.await.map_err(|_| CarouselError::Generic("carousel stopped before answering".into()))
    }

    /// Detaches and stops the loop.
    pub fn shutdown(&self) -> Result<(), CarouselError> {
        debug!("Requesting carousel shutdown.");
        self.send(CarouselCommand::Shutdown)
    }
}
