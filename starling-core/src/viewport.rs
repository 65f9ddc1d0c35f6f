//! Geometry and bookkeeping for a virtualized track list.
//!
//! The list is laid out as fixed-height rows. [`ViewportTracker`] follows the scroll position
//! and the containers the host has realized, and turns them into [`TrackerEvent`]s for the
//! prefetch controller. Scroll and resize bursts are debounced into one
//! [`TrackerEvent::ViewportChanged`].

use std::{
    collections::HashMap,
    ops::Range,
    time::{Duration, Instant},
};

use starling_state::TrackId;

/// A vertical span in list content coordinates (pixels from the top of the first row).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpan {
    pub start: f64,
    pub end: f64,
}

/// Where a row sits in the list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemBounds {
    pub top: f64,
    pub bottom: f64,
}

/// Whether `item` overlaps `window` at all. Used by both loading and eviction so the two
/// can never disagree about what is in range.
pub fn intersects(window: PixelSpan, item: ItemBounds) -> bool {
    item.top < window.end && item.bottom > window.start
}

/// The visible part of the list plus the preload margin around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportWindow {
    pub scroll_offset: f64,
    pub viewport_height: f64,
    pub item_height: f64,
    pub item_count: usize,
    /// Multiple of `viewport_height` added above and below the visible span.
    pub preload_factor: f64,
}
impl ViewportWindow {
    pub fn visible_span(&self) -> PixelSpan {
        PixelSpan {
            start: self.scroll_offset,
            end: self.scroll_offset + self.viewport_height.max(0.0),
        }
    }

    pub fn extended_span(&self) -> PixelSpan {
        let margin = self.viewport_height.max(0.0) * self.preload_factor.max(0.0);
        let visible = self.visible_span();
        PixelSpan {
            start: visible.start - margin,
            end: visible.end + margin,
        }
    }

    pub fn item_bounds(&self, index: usize) -> ItemBounds {
        let top = index as f64 * self.item_height;
        ItemBounds {
            top,
            bottom: top + self.item_height,
        }
    }

    /// Indices of the rows on screen.
    pub fn visible_range(&self) -> Range<usize> {
        self.range_for(self.visible_span())
    }

    /// Indices of the rows that should have art resident.
    pub fn extended_range(&self) -> Range<usize> {
        self.range_for(self.extended_span())
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.item_count && intersects(self.extended_span(), self.item_bounds(index))
    }

    fn range_for(&self, span: PixelSpan) -> Range<usize> {
        if self.item_count == 0 || self.item_height <= 0.0 || span.end <= span.start {
            return 0..0;
        }
        let estimate = |offset: f64| (offset.max(0.0) / self.item_height) as usize;
        let mut first = estimate(span.start).min(self.item_count);
        let mut last = estimate(span.end).saturating_add(1).min(self.item_count);

        // The division can land a row off either way for fractional heights; settle the
        // edges with the same test `contains` uses.
        while first > 0 && intersects(span, self.item_bounds(first - 1)) {
            first -= 1;
        }
        while first < last && !intersects(span, self.item_bounds(first)) {
            first += 1;
        }
        while last < self.item_count && intersects(span, self.item_bounds(last)) {
            last += 1;
        }
        while last > first && !intersects(span, self.item_bounds(last - 1)) {
            last -= 1;
        }
        first..last
    }
}

/// Identifies a recyclable row container. Hosts reuse the same container for different
/// tracks as the list scrolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// A container for this track was realized inside the window.
    ShouldLoad(TrackId),
    /// A container for this track went away (or was recycled for another track).
    ReleaseCandidate(TrackId),
    /// The scroll position or viewport size settled.
    ViewportChanged(ViewportWindow),
}

#[derive(Debug, Clone)]
struct Realized {
    index: usize,
    track_id: TrackId,
}

/// Collapses a burst of changes into one, emitted once no change has arrived for `delay`.
#[derive(Debug, Clone)]
struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}
impl Debouncer {
    fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct ViewportTracker {
    window: ViewportWindow,
    containers: HashMap<ContainerId, Realized>,
    debounce: Debouncer,
    pending: Vec<TrackerEvent>,
}
impl ViewportTracker {
    pub fn new(item_height: f64, preload_factor: f64, debounce: Duration) -> Self {
        Self {
            window: ViewportWindow {
                scroll_offset: 0.0,
                viewport_height: 0.0,
                item_height,
                item_count: 0,
                preload_factor,
            },
            containers: HashMap::new(),
            debounce: Debouncer {
                delay: debounce,
                deadline: None,
            },
            pending: vec![],
        }
    }

    pub fn window(&self) -> &ViewportWindow {
        &self.window
    }

    /// Changes become visible to [`Self::poll`] only after the debounce delay.
    pub fn scroll_to(&mut self, offset: f64, now: Instant) {
        if self.window.scroll_offset != offset {
            self.window.scroll_offset = offset;
            self.debounce.touch(now);
        }
    }

    pub fn resize(&mut self, viewport_height: f64, now: Instant) {
        if self.window.viewport_height != viewport_height {
            self.window.viewport_height = viewport_height;
            self.debounce.touch(now);
        }
    }

    pub fn set_item_count(&mut self, item_count: usize, now: Instant) {
        if self.window.item_count != item_count {
            self.window.item_count = item_count;
            self.debounce.touch(now);
        }
    }

    pub fn set_item_height(&mut self, item_height: f64, now: Instant) {
        if self.window.item_height != item_height {
            self.window.item_height = item_height;
            self.debounce.touch(now);
        }
    }

    /// The host bound `track_id` at row `index` to `container`. If the container was still
    /// showing another track, that track becomes a release candidate first.
    pub fn realize(&mut self, container: ContainerId, index: usize, track_id: TrackId) {
        if let Some(previous) = self.containers.get(&container) {
            if previous.track_id == track_id && previous.index == index {
                return;
            }
            if previous.track_id != track_id {
                self.pending
                    .push(TrackerEvent::ReleaseCandidate(previous.track_id.clone()));
            }
        }

        if intersects(self.window.extended_span(), self.window.item_bounds(index)) {
            self.pending.push(TrackerEvent::ShouldLoad(track_id.clone()));
        } else {
            tracing::trace!("Deferring load for {track_id} at row {index}");
        }
        self.containers
            .insert(container, Realized { index, track_id });
    }

    pub fn derealize(&mut self, container: ContainerId) {
        if let Some(realized) = self.containers.remove(&container) {
            self.pending
                .push(TrackerEvent::ReleaseCandidate(realized.track_id));
        }
    }

    /// Tracks currently bound to a realized container, with their rows.
    pub fn realized_tracks(&self) -> impl Iterator<Item = (usize, &TrackId)> {
        self.containers.values().map(|r| (r.index, &r.track_id))
    }

    /// Drains container events, followed by a viewport change if one has settled.
    pub fn poll(&mut self, now: Instant) -> Vec<TrackerEvent> {
        let mut events = std::mem::take(&mut self.pending);
        if self.debounce.fire(now) {
            events.push(TrackerEvent::ViewportChanged(self.window));
        }
        events
    }

    /// Forces a viewport change on the next poll, bypassing the debounce delay.
    pub fn invalidate(&mut self) {
        self.debounce.deadline = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(scroll_offset: f64, viewport_height: f64) -> ViewportWindow {
        ViewportWindow {
            scroll_offset,
            viewport_height,
            item_height: 10.0,
            item_count: 200,
            preload_factor: 1.5,
        }
    }

    fn id(i: usize) -> TrackId {
        TrackId::new(format!("t{i}"))
    }

    #[test]
    fn test_intersects_edges() {
        let span = PixelSpan {
            start: 100.0,
            end: 200.0,
        };
        let at = |top: f64| ItemBounds {
            top,
            bottom: top + 10.0,
        };
        assert!(intersects(span, at(95.0)));
        assert!(intersects(span, at(150.0)));
        assert!(intersects(span, at(195.0)));
        // Touching an edge is not overlapping.
        assert!(!intersects(span, at(90.0)));
        assert!(!intersects(span, at(200.0)));
    }

    #[test]
    fn test_visible_and_extended_ranges() {
        let window = window(400.0, 200.0);
        assert_eq!(window.visible_range(), 40..60);
        // 1.5 screens either side.
        assert_eq!(window.extended_range(), 10..90);
        assert!(window.contains(10));
        assert!(window.contains(89));
        assert!(!window.contains(9));
        assert!(!window.contains(90));
    }

    #[test]
    fn test_ranges_are_clamped() {
        assert_eq!(window(0.0, 200.0).extended_range(), 0..50);
        assert_eq!(window(1900.0, 200.0).visible_range(), 190..200);
        assert_eq!(window(1900.0, 200.0).extended_range(), 160..200);
        assert!(!window(0.0, 200.0).contains(200));

        let empty = ViewportWindow {
            item_count: 0,
            ..window(0.0, 200.0)
        };
        assert_eq!(empty.extended_range(), 0..0);
        assert_eq!(window(0.0, 0.0).visible_range(), 0..0);
    }

    #[test]
    fn test_fractional_row_heights_agree_with_contains() {
        let item_height = 48.7;
        let window = ViewportWindow {
            scroll_offset: 0.0,
            viewport_height: 3.0 * item_height,
            item_height,
            item_count: 200,
            preload_factor: 0.0,
        };
        assert_eq!(window.visible_range(), 0..3);

        for step in 0..400 {
            for preload_factor in [0.0, 0.5, 1.5] {
                let window = ViewportWindow {
                    scroll_offset: step as f64 * item_height / 4.0,
                    preload_factor,
                    ..window
                };
                let expected: Vec<usize> = (0..200).filter(|&i| window.contains(i)).collect();
                assert_eq!(
                    window.extended_range().collect::<Vec<_>>(),
                    expected,
                    "offset {}",
                    window.scroll_offset
                );
            }
        }
    }

    #[test]
    fn test_partial_rows_count_as_visible() {
        assert_eq!(window(405.0, 200.0).visible_range(), 40..61);
    }

    #[test]
    fn test_scroll_burst_is_debounced() {
        let start = Instant::now();
        let delay = Duration::from_millis(50);
        let mut tracker = ViewportTracker::new(10.0, 1.5, delay);
        tracker.resize(200.0, start);
        tracker.set_item_count(200, start);

        for step in 1..=10u64 {
            let now = start + Duration::from_millis(step * 10);
            tracker.scroll_to(step as f64 * 40.0, now);
            assert!(tracker.poll(now).is_empty());
        }

        let last = start + Duration::from_millis(100);
        assert!(tracker.poll(last + Duration::from_millis(49)).is_empty());
        let events = tracker.poll(last + delay);
        assert_eq!(events.len(), 1);
        let TrackerEvent::ViewportChanged(window) = &events[0] else {
            panic!("expected a viewport change, got {events:?}");
        };
        assert_eq!(window.scroll_offset, 400.0);
        assert_eq!(window.visible_range(), 40..60);

        // Nothing more until something changes.
        assert!(tracker.poll(last + delay * 10).is_empty());
        tracker.scroll_to(400.0, last + delay * 10);
        assert!(tracker.poll(last + delay * 20).is_empty());
    }

    #[test]
    fn test_realize_inside_and_outside_window() {
        let now = Instant::now();
        let mut tracker = ViewportTracker::new(10.0, 1.5, Duration::ZERO);
        tracker.resize(200.0, now);
        tracker.set_item_count(200, now);
        tracker.scroll_to(400.0, now);
        tracker.poll(now);

        tracker.realize(ContainerId(1), 45, id(45));
        tracker.realize(ContainerId(2), 150, id(150));
        assert_eq!(tracker.poll(now), vec![TrackerEvent::ShouldLoad(id(45))]);

        let mut realized: Vec<_> = tracker.realized_tracks().map(|(i, _)| i).collect();
        realized.sort();
        assert_eq!(realized, vec![45, 150]);
    }

    #[test]
    fn test_recycled_container_releases_previous_track() {
        let now = Instant::now();
        let mut tracker = ViewportTracker::new(10.0, 1.5, Duration::ZERO);
        tracker.resize(200.0, now);
        tracker.set_item_count(200, now);
        tracker.poll(now);

        tracker.realize(ContainerId(7), 3, id(3));
        tracker.realize(ContainerId(7), 3, id(3));
        tracker.realize(ContainerId(7), 4, id(4));
        tracker.derealize(ContainerId(7));
        tracker.derealize(ContainerId(7));

        assert_eq!(
            tracker.poll(now),
            vec![
                TrackerEvent::ShouldLoad(id(3)),
                TrackerEvent::ReleaseCandidate(id(3)),
                TrackerEvent::ShouldLoad(id(4)),
                TrackerEvent::ReleaseCandidate(id(4)),
            ]
        );
        assert_eq!(tracker.realized_tracks().count(), 0);
    }

    #[test]
    fn test_invalidate_fires_immediately() {
        let mut tracker = ViewportTracker::new(10.0, 1.5, Duration::from_secs(60));
        tracker.invalidate();
        assert!(matches!(
            tracker.poll(Instant::now()).as_slice(),
            [TrackerEvent::ViewportChanged(_)]
        ));
    }
}
