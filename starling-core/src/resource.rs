//! Per-track cover art held in memory.
//!
//! Each [`TrackArt`] owns up to two decoded variants plus the raw bytes they were decoded
//! from. All mutation goes through its `ensure_*`/`release_*` methods, which guarantee at most
//! one load per variant in flight at a time.

use std::{
    path::Path,
    sync::{Arc, Mutex, mpsc::Sender},
};

use starling_state::{ArtVariant, Track, TrackId};

use crate::{
    decode::DecodedImage,
    pipeline::{ArtOrigin, ArtPipeline},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtEventKind {
    Loaded,
    /// A load finished without producing an image; the default art applies.
    Missing,
    Released,
}

/// A change to a track's in-memory art, for observers that repaint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtEvent {
    pub track_id: TrackId,
    pub variant: ArtVariant,
    pub kind: ArtEventKind,
}

/// What an `ensure_*` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyLoaded,
    /// Another call is loading this variant; nothing was started.
    InFlight,
    /// A previous load found no art. Cleared by releasing.
    Unavailable,
    Loaded(ArtOrigin),
    Missing,
    /// The variant was released while the load ran, so its result was dropped.
    Discarded,
}

/// What the renderer should draw for a track.
#[derive(Debug, Clone)]
pub enum ArtView<'a> {
    Decoded(DecodedImage),
    Default(&'a Path),
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Idle,
    Loading {
        /// Set when a release arrives mid-load.
        released: bool,
        /// Set when an ensure arrives after such a release; the result is kept after all.
        wanted: bool,
    },
    Loaded(DecodedImage),
    Unavailable,
}

#[derive(Debug, Default)]
struct Inner {
    raw_bytes: Option<Arc<[u8]>>,
    thumbnail: Slot,
    original: Slot,
}
impl Inner {
    fn slot_mut(&mut self, variant: ArtVariant) -> &mut Slot {
        match variant {
            ArtVariant::Thumbnail => &mut self.thumbnail,
            ArtVariant::Original => &mut self.original,
        }
    }

    fn slot(&self, variant: ArtVariant) -> &Slot {
        match variant {
            ArtVariant::Thumbnail => &self.thumbnail,
            ArtVariant::Original => &self.original,
        }
    }
}

pub struct TrackArt {
    track: Track,
    pipeline: Arc<ArtPipeline>,
    inner: Mutex<Inner>,
    events: Option<Sender<ArtEvent>>,
}
impl TrackArt {
    pub fn new(track: Track, pipeline: Arc<ArtPipeline>, events: Option<Sender<ArtEvent>>) -> Self {
        Self {
            track,
            pipeline,
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn ensure_thumbnail_loaded(&self) -> EnsureOutcome {
        self.ensure_loaded(ArtVariant::Thumbnail)
    }

    /// Loads the full-resolution image. Only call this when something is about to show it.
    pub fn ensure_original_loaded(&self) -> EnsureOutcome {
        self.ensure_loaded(ArtVariant::Original)
    }

    /// Loads `variant` unless it is loaded or already loading. Blocks until the decode has
    /// run on the UI thread.
    pub fn ensure_loaded(&self, variant: ArtVariant) -> EnsureOutcome {
        let held_bytes = {
            let mut inner = self.inner.lock().unwrap();
            match inner.slot_mut(variant) {
                Slot::Loaded(_) => return EnsureOutcome::AlreadyLoaded,
                Slot::Unavailable => return EnsureOutcome::Unavailable,
                Slot::Loading { released, wanted } => {
                    if *released {
                        *wanted = true;
                    }
                    return EnsureOutcome::InFlight;
                }
                slot @ Slot::Idle => {
                    *slot = Slot::Loading {
                        released: false,
                        wanted: false,
                    };
                }
            }
            inner.raw_bytes.clone()
        };

        self.finish_load(variant, held_bytes)
    }

    /// Claims `variant` for a load that will run later through [`Self::run_reserved`], so
    /// releases and other `ensure_*` calls see it as in flight while it waits for a worker.
    /// Returns false if nothing needs to run.
    pub fn reserve(&self, variant: ArtVariant) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.slot_mut(variant) {
            slot @ Slot::Idle => {
                *slot = Slot::Loading {
                    released: false,
                    wanted: false,
                };
                true
            }
            Slot::Loading { released, wanted } => {
                if *released {
                    *wanted = true;
                }
                false
            }
            Slot::Loaded(_) | Slot::Unavailable => false,
        }
    }

    /// Runs a load claimed by [`Self::reserve`]. If the variant was released while waiting,
    /// nothing is loaded.
    pub fn run_reserved(&self, variant: ArtVariant) -> EnsureOutcome {
        let held_bytes = {
            let mut inner = self.inner.lock().unwrap();
            let slot = inner.slot_mut(variant);
            match slot {
                Slot::Loading {
                    released: true,
                    wanted: false,
                } => {
                    *slot = Slot::Idle;
                    tracing::debug!(
                        "Skipping queued {variant} load for {}, released before it started",
                        self.track.path().display()
                    );
                    return EnsureOutcome::Discarded;
                }
                Slot::Loading { .. } => {}
                Slot::Loaded(_) => return EnsureOutcome::AlreadyLoaded,
                Slot::Unavailable => return EnsureOutcome::Unavailable,
                Slot::Idle => {
                    drop(inner);
                    return self.ensure_loaded(variant);
                }
            }
            inner.raw_bytes.clone()
        };

        self.finish_load(variant, held_bytes)
    }

    /// Loads a variant whose slot this call has moved to `Loading`, then settles the slot.
    fn finish_load(&self, variant: ArtVariant, held_bytes: Option<Arc<[u8]>>) -> EnsureOutcome {
        let result = self
            .pipeline
            .load_art(self.track.path(), variant, held_bytes);

        let (outcome, event) = {
            let mut inner = self.inner.lock().unwrap();
            let keep = match inner.slot(variant) {
                Slot::Loading { released, wanted } => !released || *wanted,
                // Only the call that claimed the slot moves it out of `Loading`.
                _ => false,
            };

            match result {
                _ if !keep => {
                    *inner.slot_mut(variant) = Slot::Idle;
                    tracing::debug!(
                        "Discarding {variant} for {} released during load",
                        self.track.path().display()
                    );
                    (EnsureOutcome::Discarded, None)
                }
                Some(art) => {
                    *inner.slot_mut(variant) = Slot::Loaded(art.image);
                    inner.raw_bytes = Some(art.bytes);
                    (EnsureOutcome::Loaded(art.origin), Some(ArtEventKind::Loaded))
                }
                None => {
                    *inner.slot_mut(variant) = Slot::Unavailable;
                    (EnsureOutcome::Missing, Some(ArtEventKind::Missing))
                }
            }
        };

        if let Some(kind) = event {
            self.notify(variant, kind);
        }
        outcome
    }

    pub fn release_thumbnail(&self) -> bool {
        self.release(ArtVariant::Thumbnail)
    }

    pub fn release_original(&self) -> bool {
        self.release(ArtVariant::Original)
    }

    /// Drops both variants and the raw bytes. The disk cache is untouched, so the next
    /// load is served from there.
    pub fn release_all(&self) -> bool {
        let thumbnail = self.release(ArtVariant::Thumbnail);
        let original = self.release(ArtVariant::Original);
        let bytes = self.inner.lock().unwrap().raw_bytes.take().is_some();
        thumbnail || original || bytes
    }

    /// Drops a decoded variant. Returns whether anything was held. Idempotent.
    pub fn release(&self, variant: ArtVariant) -> bool {
        let released_image = {
            let mut inner = self.inner.lock().unwrap();
            let slot = inner.slot_mut(variant);
            match slot {
                Slot::Idle => return false,
                Slot::Loading { released, wanted } => {
                    *released = true;
                    *wanted = false;
                    return false;
                }
                Slot::Unavailable => {
                    *slot = Slot::Idle;
                    return false;
                }
                Slot::Loaded(_) => std::mem::take(slot),
            }
        };
        drop(released_image);
        self.notify(variant, ArtEventKind::Released);
        true
    }

    pub fn thumbnail(&self) -> Option<DecodedImage> {
        self.image(ArtVariant::Thumbnail)
    }

    pub fn original(&self) -> Option<DecodedImage> {
        self.image(ArtVariant::Original)
    }

    pub fn image(&self, variant: ArtVariant) -> Option<DecodedImage> {
        match self.inner.lock().unwrap().slot(variant) {
            Slot::Loaded(image) => Some(image.clone()),
            _ => None,
        }
    }

    pub fn is_loaded(&self, variant: ArtVariant) -> bool {
        matches!(self.inner.lock().unwrap().slot(variant), Slot::Loaded(_))
    }

    pub fn is_loading(&self, variant: ArtVariant) -> bool {
        matches!(
            self.inner.lock().unwrap().slot(variant),
            Slot::Loading { .. }
        )
    }

    /// Whether an `ensure_*` call for `variant` would start a load right now.
    pub fn needs_load(&self, variant: ArtVariant) -> bool {
        matches!(self.inner.lock().unwrap().slot(variant), Slot::Idle)
    }

    pub fn has_raw_bytes(&self) -> bool {
        self.inner.lock().unwrap().raw_bytes.is_some()
    }

    /// The thumbnail if loaded, otherwise the default art.
    pub fn thumbnail_or_default(&self) -> ArtView<'_> {
        match self.thumbnail() {
            Some(image) => ArtView::Decoded(image),
            None => ArtView::Default(self.pipeline.default_art()),
        }
    }

    fn notify(&self, variant: ArtVariant, kind: ArtEventKind) {
        if let Some(events) = &self.events {
            // Nobody listening is fine.
            let _ = events.send(ArtEvent {
                track_id: self.track.id.clone(),
                variant,
                kind,
            });
        }
    }
}
impl std::fmt::Debug for TrackArt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackArt")
            .field("track", &self.track.id)
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        decode::tests::jpeg_bytes,
        pipeline::tests::{FakePictures, test_config},
        ui_thread::UiThread,
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        _ui: UiThread,
        pictures: Arc<FakePictures>,
        pipeline: Arc<ArtPipeline>,
    }
    impl Fixture {
        fn new(pictures: FakePictures) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let ui = UiThread::spawn();
            let pictures = Arc::new(pictures);
            let pipeline = Arc::new(ArtPipeline::new(
                &test_config(dir.path()),
                pictures.clone(),
                ui.handle(),
            ));
            Self {
                _dir: dir,
                _ui: ui,
                pictures,
                pipeline,
            }
        }

        fn art(&self, path: &str, events: Option<Sender<ArtEvent>>) -> TrackArt {
            self.pictures.insert(path, jpeg_bytes(320, 240));
            TrackArt::new(
                Track::new(TrackId::new(path), path),
                self.pipeline.clone(),
                events,
            )
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let start = std::time::Instant::now();
        while !condition() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_thumbnail_load_and_reload_from_disk() {
        let fixture = Fixture::new(FakePictures::default());
        let art = fixture.art("/music/a.flac", None);

        assert_eq!(
            art.ensure_thumbnail_loaded(),
            EnsureOutcome::Loaded(ArtOrigin::Container)
        );
        let thumbnail = art.thumbnail().unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (160, 120));
        assert!(art.has_raw_bytes());
        assert_eq!(art.ensure_thumbnail_loaded(), EnsureOutcome::AlreadyLoaded);

        assert!(art.release_all());
        assert!(art.thumbnail().is_none());
        assert!(!art.has_raw_bytes());

        assert_eq!(
            art.ensure_thumbnail_loaded(),
            EnsureOutcome::Loaded(ArtOrigin::DiskCache)
        );
        assert_eq!(fixture.pictures.extractions(), 1);
    }

    #[test]
    fn test_releasing_one_variant_keeps_bytes_for_the_next_load() {
        let fixture = Fixture::new(FakePictures::default());
        let art = fixture.art("/music/b.flac", None);

        art.ensure_thumbnail_loaded();
        assert!(art.release_thumbnail());
        assert_eq!(
            art.ensure_thumbnail_loaded(),
            EnsureOutcome::Loaded(ArtOrigin::Memory)
        );
    }

    #[test]
    fn test_original_is_independent_of_thumbnail() {
        let fixture = Fixture::new(FakePictures::default());
        let art = fixture.art("/music/c.flac", None);

        assert_eq!(
            art.ensure_original_loaded(),
            EnsureOutcome::Loaded(ArtOrigin::Container)
        );
        assert!(art.thumbnail().is_none());
        let original = art.original().unwrap();
        assert_eq!((original.width(), original.height()), (320, 240));

        art.ensure_thumbnail_loaded();
        assert!(art.release_original());
        assert!(art.original().is_none());
        assert!(art.thumbnail().is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let fixture = Fixture::new(FakePictures::default());
        let art = fixture.art("/music/d.flac", None);

        assert!(!art.release_all());
        art.ensure_thumbnail_loaded();
        assert!(art.release_all());
        assert!(!art.release_all());
        assert!(!art.release_thumbnail());
    }

    #[test]
    fn test_concurrent_ensure_loads_once() {
        let fixture = Fixture::new(FakePictures::with_delay(Duration::from_millis(100)));
        let art = Arc::new(fixture.art("/music/e.flac", None));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let art = art.clone();
                std::thread::spawn(move || art.ensure_thumbnail_loaded())
            })
            .collect();
        let mut outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        outcomes.sort_by_key(|o| matches!(o, EnsureOutcome::InFlight));

        assert_eq!(
            outcomes,
            vec![
                EnsureOutcome::Loaded(ArtOrigin::Container),
                EnsureOutcome::InFlight
            ]
        );
        assert_eq!(fixture.pictures.extractions(), 1);
        assert!(art.thumbnail().is_some());
    }

    #[test]
    fn test_release_during_load_discards_result() {
        let fixture = Fixture::new(FakePictures::with_delay(Duration::from_millis(100)));
        let art = Arc::new(fixture.art("/music/f.flac", None));

        let loader = std::thread::spawn({
            let art = art.clone();
            move || art.ensure_thumbnail_loaded()
        });
        wait_until(|| art.is_loading(ArtVariant::Thumbnail));
        art.release_all();
        // Still one load in flight; a second request must not start another.
        assert!(art.is_loading(ArtVariant::Thumbnail));

        assert_eq!(loader.join().unwrap(), EnsureOutcome::Discarded);
        assert!(art.thumbnail().is_none());
        assert!(!art.has_raw_bytes());
        assert!(!art.is_loading(ArtVariant::Thumbnail));
    }

    #[test]
    fn test_rerequest_after_release_keeps_result() {
        let fixture = Fixture::new(FakePictures::with_delay(Duration::from_millis(100)));
        let art = Arc::new(fixture.art("/music/g.flac", None));

        let loader = std::thread::spawn({
            let art = art.clone();
            move || art.ensure_thumbnail_loaded()
        });
        wait_until(|| art.is_loading(ArtVariant::Thumbnail));
        art.release_thumbnail();
        assert_eq!(art.ensure_thumbnail_loaded(), EnsureOutcome::InFlight);

        assert_eq!(
            loader.join().unwrap(),
            EnsureOutcome::Loaded(ArtOrigin::Container)
        );
        assert!(art.thumbnail().is_some());
        assert_eq!(fixture.pictures.extractions(), 1);
    }

    #[test]
    fn test_missing_art_is_remembered_until_release() {
        let fixture = Fixture::new(FakePictures::default());
        let art = TrackArt::new(
            Track::new(TrackId::new("bare"), "/music/bare.flac"),
            fixture.pipeline.clone(),
            None,
        );

        assert_eq!(art.ensure_thumbnail_loaded(), EnsureOutcome::Missing);
        assert_eq!(art.ensure_thumbnail_loaded(), EnsureOutcome::Unavailable);
        assert_eq!(fixture.pictures.extractions(), 1);
        assert!(matches!(
            art.thumbnail_or_default(),
            ArtView::Default(path) if path == Path::new("assets/no-album-art.png")
        ));

        art.release_all();
        assert_eq!(art.ensure_thumbnail_loaded(), EnsureOutcome::Missing);
        assert_eq!(fixture.pictures.extractions(), 2);
    }

    #[test]
    fn test_events_follow_transitions() {
        let fixture = Fixture::new(FakePictures::default());
        let (tx, rx) = std::sync::mpsc::channel();
        let art = fixture.art("/music/h.flac", Some(tx));

        art.ensure_thumbnail_loaded();
        art.ensure_thumbnail_loaded();
        art.release_all();

        let kinds: Vec<_> = rx.try_iter().map(|e| (e.variant, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (ArtVariant::Thumbnail, ArtEventKind::Loaded),
                (ArtVariant::Thumbnail, ArtEventKind::Released),
            ]
        );
        assert!(matches!(art.thumbnail_or_default(), ArtView::Default(_)));
    }

    #[test]
    fn test_reserved_load_released_before_it_runs_is_skipped() {
        let fixture = Fixture::new(FakePictures::default());
        let art = fixture.art("/music/queued.flac", None);

        assert!(art.reserve(ArtVariant::Thumbnail));
        assert!(!art.reserve(ArtVariant::Thumbnail));
        assert_eq!(art.ensure_thumbnail_loaded(), EnsureOutcome::InFlight);

        assert!(!art.release_all());
        assert_eq!(
            art.run_reserved(ArtVariant::Thumbnail),
            EnsureOutcome::Discarded
        );
        assert_eq!(fixture.pictures.extractions(), 0);
        assert!(art.thumbnail().is_none());
        assert!(!art.has_raw_bytes());
        assert!(art.needs_load(ArtVariant::Thumbnail));
    }

    #[test]
    fn test_reserved_load_wanted_again_after_release_runs() {
        let fixture = Fixture::new(FakePictures::default());
        let art = fixture.art("/music/requeued.flac", None);

        assert!(art.reserve(ArtVariant::Thumbnail));
        art.release_thumbnail();
        // Scrolled back before the worker got to it: the queued job still counts.
        assert!(!art.reserve(ArtVariant::Thumbnail));

        assert_eq!(
            art.run_reserved(ArtVariant::Thumbnail),
            EnsureOutcome::Loaded(ArtOrigin::Container)
        );
        assert!(art.thumbnail().is_some());
        assert_eq!(
            art.run_reserved(ArtVariant::Thumbnail),
            EnsureOutcome::AlreadyLoaded
        );
        assert_eq!(fixture.pictures.extractions(), 1);
    }
}
