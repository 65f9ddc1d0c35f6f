//! Cover art for a scrolling music library: a disk and memory cache, the extract/decode
//! pipeline that fills it, and the prefetcher that keeps memory bounded to what is on screen.
pub use starling_state;

pub mod config;
pub use config::{Config, ConfigError};

pub mod decode;
pub use decode::DecodedImage;

pub mod disk_cache;
pub use disk_cache::{CacheStats, DiskCache, RetryPolicy};

pub mod library;
pub use library::{ActiveTrackProvider, ArtLibrary, LibrarySource, SharedActiveTrack};

pub mod picture;
pub use picture::{LoftyPictures, PictureSource};

pub mod pipeline;
pub use pipeline::{ArtOrigin, ArtPipeline, LoadedArt};

pub mod prefetch;
pub use prefetch::{PrefetchController, PrefetchReport};

pub mod resource;
pub use resource::{ArtEvent, ArtEventKind, ArtView, EnsureOutcome, TrackArt};

pub mod ui_thread;
pub use ui_thread::{UiHandle, UiQueue, UiThread};

pub mod viewport;
pub use viewport::{ContainerId, TrackerEvent, ViewportTracker, ViewportWindow};

pub mod worker;
pub use worker::WorkerPool;
