//! Selects the single page allowed to play from what the host reports as visible.
//!
//! The host describes the on-screen pages as a [`VisibilitySnapshot`]: the
//! viewport rectangle, the frame of every visible page's video area in the
//! same coordinate space, and the current scroll offset. The resolver itself
//! only sees a [`Containment`] predicate, so it can be exercised without any
//! display surface.

use log::trace;

/// Tolerance used for geometric and page-offset comparisons.
const EPSILON: f32 = 1e-3;

/// An axis-aligned rectangle in host coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// True when `other` lies entirely inside `self` (edges included).
    /// Overlapping is not enough.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x - EPSILON
            && other.y >= self.y - EPSILON
            && other.max_x() <= self.max_x() + EPSILON
            && other.max_y() <= self.max_y() + EPSILON
    }
}

/// Decides whether a page's video area is fully inside the viewport.
pub trait Containment {
    fn is_fully_contained(&self, page: usize) -> bool;
}

impl<F> Containment for F
where
    F: Fn(usize) -> bool,
{
    fn is_fully_contained(&self, page: usize) -> bool {
        self(page)
    }
}

/// One on-screen page and the frame of its media area.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisiblePage {
    pub index: usize,
    pub frame: Rect,
}

/// What the host's scroll/layout notifier reports after each layout pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilitySnapshot {
    pub viewport: Rect,
    pub pages: Vec<VisiblePage>,
    /// Scroll offset along the paging axis.
    pub scroll_offset: f32,
    /// Width of one page along the paging axis.
    pub page_extent: f32,
}

impl VisibilitySnapshot {
    /// Snapshot of a carousel resting on `page`, with pages laid out side by
    /// side and each one exactly as large as `viewport`.
    pub fn settled(page: usize, viewport: Rect) -> Self {
        let offset = page as f32 * viewport.width;
        Self::scrolled(offset, &[page], viewport)
    }

    /// Snapshot for an arbitrary scroll offset over side-by-side pages.
    /// `visible` lists the pages the host has on screen.
    pub fn scrolled(scroll_offset: f32, visible: &[usize], viewport: Rect) -> Self {
        let pages = visible
            .iter()
            .map(|&index| VisiblePage {
                index,
                frame: Rect::new(
                    viewport.x + index as f32 * viewport.width - scroll_offset,
                    viewport.y,
                    viewport.width,
                    viewport.height,
                ),
            })
            .collect();
        Self { viewport, pages, scroll_offset, page_extent: viewport.width }
    }

    /// Indices of the visible pages, ascending and without duplicates.
    pub fn visible_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.pages.iter().map(|p| p.index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Fractional page position, or `None` when the page extent is unknown
    /// or the offset is not a finite number.
    pub fn page_position(&self) -> Option<f32> {
        if self.page_extent <= 0.0 {
            return None;
        }
        let position = self.scroll_offset / self.page_extent;
        position.is_finite().then_some(position)
    }

    /// The page the scroll offset rests on, if it is aligned to a page boundary.
    pub fn settled_page(&self) -> Option<usize> {
        let position = self.page_position()?;
        let rounded = position.round();
        if rounded < 0.0 || (position - rounded).abs() > EPSILON {
            return None;
        }
        Some(rounded as usize)
    }

    /// True while the offset sits between two page boundaries.
    pub fn is_between_pages(&self) -> bool {
        self.page_position().is_some() && self.settled_page().is_none()
    }
}

impl Containment for VisibilitySnapshot {
    fn is_fully_contained(&self, page: usize) -> bool {
        self.pages
            .iter()
            .find(|p| p.index == page)
            .map_or(false, |p| self.viewport.contains_rect(&p.frame))
    }
}

/// Picks the page whose video should play.
///
/// Candidates are the visible pages for which `playable` holds (a live,
/// non-failed `PlaybackUnit`). The lowest index whose area is fully
/// contained wins; if none is fully contained nothing plays.
pub fn select_playable<P, C>(visible: &[usize], playable: P, containment: &C) -> Option<usize>
where
    P: Fn(usize) -> bool,
    C: Containment + ?Sized,
{
    let mut ordered = visible.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    let selected = ordered
        .into_iter()
        .filter(|&page| playable(page))
        .find(|&page| containment.is_fully_contained(page));
    trace!("Visibility resolver: visible={:?}, selected={:?}", visible, selected);
    selected
}
