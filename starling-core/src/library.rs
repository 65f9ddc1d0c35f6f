//! The tracks backing the list view, and the art resources attached to them.
//!
//! The library itself is owned by the host; the art subsystem only sees it through
//! [`LibrarySource`] and [`ActiveTrackProvider`].

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock, mpsc::Sender},
};

use starling_state::{Track, TrackId};

use crate::{
    pipeline::ArtPipeline,
    resource::{ArtEvent, TrackArt},
};

/// Supplies the tracks shown in the list, in display order.
pub trait LibrarySource: Send + Sync {
    fn tracks(&self) -> Vec<Track>;
}
impl LibrarySource for Vec<Track> {
    fn tracks(&self) -> Vec<Track> {
        self.clone()
    }
}

/// Reports which track is currently selected for playback.
pub trait ActiveTrackProvider: Send + Sync {
    fn active_track_path(&self) -> Option<PathBuf>;
}

/// An [`ActiveTrackProvider`] the player can update directly.
#[derive(Debug, Clone, Default)]
pub struct SharedActiveTrack(Arc<RwLock<Option<PathBuf>>>);
impl SharedActiveTrack {
    pub fn set(&self, path: Option<PathBuf>) {
        *self.0.write().unwrap() = path;
    }
}
impl ActiveTrackProvider for SharedActiveTrack {
    fn active_track_path(&self) -> Option<PathBuf> {
        self.0.read().unwrap().clone()
    }
}

/// The ordered track list plus one [`TrackArt`] per track, created on first use.
pub struct ArtLibrary {
    pipeline: Arc<ArtPipeline>,
    events: Option<Sender<ArtEvent>>,
    tracks: Vec<Track>,
    index_by_id: HashMap<TrackId, usize>,
    arts: RwLock<HashMap<TrackId, Arc<TrackArt>>>,
}
impl ArtLibrary {
    pub fn new(pipeline: Arc<ArtPipeline>, events: Option<Sender<ArtEvent>>) -> Self {
        Self {
            pipeline,
            events,
            tracks: vec![],
            index_by_id: HashMap::new(),
            arts: RwLock::new(HashMap::new()),
        }
    }

    pub fn pipeline(&self) -> &Arc<ArtPipeline> {
        &self.pipeline
    }

    /// Replace the track list with whatever `source` currently holds. Art for tracks that
    /// are no longer present is dropped; art for tracks that remain is kept.
    pub fn refresh(&mut self, source: &dyn LibrarySource) {
        self.tracks = source.tracks();
        self.index_by_id = self
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| (track.id.clone(), index))
            .collect();

        let mut arts = self.arts.write().unwrap();
        let before = arts.len();
        arts.retain(|id, _| self.index_by_id.contains_key(id));
        tracing::debug!(
            "Library refreshed with {} tracks; dropped art for {} removed tracks",
            self.tracks.len(),
            before - arts.len()
        );
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn index_of(&self, id: &TrackId) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    pub fn index_of_path(&self, path: &Path) -> Option<usize> {
        self.tracks.iter().position(|track| track.path == path)
    }

    /// The art resource for `id`, creating it if the track is in the library.
    pub fn art(&self, id: &TrackId) -> Option<Arc<TrackArt>> {
        if let Some(art) = self.arts.read().unwrap().get(id) {
            return Some(art.clone());
        }

        let track = self.tracks.get(self.index_of(id)?)?.clone();
        let mut arts = self.arts.write().unwrap();
        Some(
            arts.entry(id.clone())
                .or_insert_with(|| {
                    Arc::new(TrackArt::new(
                        track,
                        self.pipeline.clone(),
                        self.events.clone(),
                    ))
                })
                .clone(),
        )
    }

    /// The art resource for `id` if one has been created. Never creates one.
    pub fn existing_art(&self, id: &TrackId) -> Option<Arc<TrackArt>> {
        self.arts.read().unwrap().get(id).cloned()
    }
}
