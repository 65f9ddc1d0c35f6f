//! Decides which tracks keep art in memory as the list scrolls.
//!
//! The controller lives on the UI thread and is driven by [`ViewportTracker`] events. Loads
//! are handed to the [`WorkerPool`]; releases happen inline, since they only drop references.
//! Container events and viewport changes both go through [`TrackArt::reserve`] and
//! [`TrackArt::release_all`], so a track is never decoded twice at once however it was
//! requested, and a queued load that is evicted before it starts never runs.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use starling_state::{ArtVariant, TrackId};

use crate::{
    config::Config,
    library::{ActiveTrackProvider, ArtLibrary, LibrarySource},
    resource::TrackArt,
    viewport::{TrackerEvent, ViewportTracker, ViewportWindow},
    worker::WorkerPool,
};

/// What a round of prefetching did, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Tracks a thumbnail load was queued for.
    pub loads: Vec<TrackId>,
    pub releases: Vec<TrackId>,
    /// Tracks that left the window but were kept because they are playing.
    pub retained: Vec<TrackId>,
}
impl PrefetchReport {
    pub fn is_empty(&self) -> bool {
        self.loads.is_empty() && self.releases.is_empty() && self.retained.is_empty()
    }

    fn merge(&mut self, other: PrefetchReport) {
        self.loads.extend(other.loads);
        self.releases.extend(other.releases);
        self.retained.extend(other.retained);
    }
}

pub struct PrefetchController {
    library: ArtLibrary,
    workers: WorkerPool,
    active: Arc<dyn ActiveTrackProvider>,
    window: Option<ViewportWindow>,
    /// Tracks this controller has asked to load and not yet released.
    resident: HashSet<TrackId>,
    last_active: Option<PathBuf>,
}
impl PrefetchController {
    pub fn new(library: ArtLibrary, active: Arc<dyn ActiveTrackProvider>, config: &Config) -> Self {
        Self {
            library,
            workers: WorkerPool::new(config.max_concurrent_loads),
            active,
            window: None,
            resident: HashSet::new(),
            last_active: None,
        }
    }

    pub fn library(&self) -> &ArtLibrary {
        &self.library
    }

    /// Reload the track list. Resident tracks that disappeared are forgotten along with their art.
    pub fn refresh_library(&mut self, source: &dyn LibrarySource) {
        self.library.refresh(source);
        let library = &self.library;
        self.resident.retain(|id| library.index_of(id).is_some());
    }

    /// The art resource for a track, e.g. for a detail view that wants the original.
    pub fn art(&self, id: &TrackId) -> Option<Arc<TrackArt>> {
        self.library.art(id)
    }

    pub fn resident_tracks(&self) -> impl Iterator<Item = &TrackId> {
        self.resident.iter()
    }

    pub fn window(&self) -> Option<&ViewportWindow> {
        self.window.as_ref()
    }

    /// Loads queued or running.
    pub fn pending_loads(&self) -> usize {
        self.workers.outstanding()
    }

    /// Blocks until every queued load has finished. Must not be called from the thread the
    /// pipeline decodes on, or the loads can never complete.
    pub fn wait_idle(&self) {
        self.workers.wait_idle();
    }

    /// Handle everything `tracker` has for us. Call once per frame.
    pub fn pump(&mut self, tracker: &mut ViewportTracker, now: Instant) -> PrefetchReport {
        let mut report = self.sync_active_track();
        for event in tracker.poll(now) {
            report.merge(self.handle(event));
        }
        if !report.is_empty() {
            tracing::debug!(
                "Prefetch: {} loads, {} releases, {} retained",
                report.loads.len(),
                report.releases.len(),
                report.retained.len()
            );
        }
        report
    }

    pub fn handle(&mut self, event: TrackerEvent) -> PrefetchReport {
        match event {
            TrackerEvent::ShouldLoad(id) => {
                let mut report = PrefetchReport::default();
                if self.request_load(&id) {
                    report.loads.push(id);
                }
                report
            }
            TrackerEvent::ReleaseCandidate(id) => self.release_candidate(id),
            TrackerEvent::ViewportChanged(window) => self.viewport_changed(window),
        }
    }

    /// Load everything in the extended window that lacks a thumbnail, and release resident
    /// tracks that have left it, except the one playing.
    pub fn viewport_changed(&mut self, window: ViewportWindow) -> PrefetchReport {
        self.window = Some(window);
        let mut report = PrefetchReport::default();

        for index in window.extended_range() {
            let Some(id) = self.library.track(index).map(|track| track.id.clone()) else {
                break;
            };
            if self.request_load(&id) {
                report.loads.push(id);
            }
        }

        let leaving: Vec<TrackId> = self
            .resident
            .iter()
            .filter(|id| !self.in_window(id))
            .cloned()
            .collect();
        for id in leaving {
            report.merge(self.evict(id));
        }

        tracing::debug!(
            "Viewport at rows {:?} (prefetching {:?}); {} tracks resident",
            window.visible_range(),
            window.extended_range(),
            self.resident.len()
        );
        report
    }

    /// A container stopped showing `id`. Only release it if it is also out of the window.
    pub fn release_candidate(&mut self, id: TrackId) -> PrefetchReport {
        if self.in_window(&id) {
            return PrefetchReport::default();
        }
        self.evict(id)
    }

    /// Notice a change of playing track. The previous track's art is released if nothing
    /// else is keeping it.
    pub fn sync_active_track(&mut self) -> PrefetchReport {
        let current = self.active.active_track_path();
        if current == self.last_active {
            return PrefetchReport::default();
        }

        let previous = std::mem::replace(&mut self.last_active, current);
        let Some(previous_id) = previous
            .and_then(|path| self.library.index_of_path(&path))
            .and_then(|index| self.library.track(index))
            .map(|track| track.id.clone())
        else {
            return PrefetchReport::default();
        };

        if self.resident.contains(&previous_id) && !self.in_window(&previous_id) {
            tracing::debug!("{previous_id} is no longer playing, releasing its art");
            self.evict(previous_id)
        } else {
            PrefetchReport::default()
        }
    }

    /// Queue a thumbnail load for `id`. Returns whether a job was queued.
    fn request_load(&mut self, id: &TrackId) -> bool {
        let Some(art) = self.library.art(id) else {
            return false;
        };
        self.resident.insert(id.clone());
        // Claimed now rather than when a worker picks it up, so an eviction in between
        // cancels the job instead of leaving an untracked thumbnail behind.
        if !art.reserve(ArtVariant::Thumbnail) {
            return false;
        }

        self.workers.spawn_blocking(move || {
            art.run_reserved(ArtVariant::Thumbnail);
        });
        true
    }

    fn evict(&mut self, id: TrackId) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        if self.is_active(&id) {
            tracing::debug!("Keeping art for {id} while it is playing");
            report.retained.push(id);
            return report;
        }

        self.resident.remove(&id);
        if let Some(art) = self.library.existing_art(&id) {
            art.release_all();
        }
        report.releases.push(id);
        report
    }

    fn in_window(&self, id: &TrackId) -> bool {
        match (self.window, self.library.index_of(id)) {
            (Some(window), Some(index)) => window.contains(index),
            _ => false,
        }
    }

    fn is_active(&self, id: &TrackId) -> bool {
        let Some(active) = self.active.active_track_path() else {
            return false;
        };
        self.library
            .index_of(id)
            .and_then(|index| self.library.track(index))
            .is_some_and(|track| track.path == active)
    }
}
