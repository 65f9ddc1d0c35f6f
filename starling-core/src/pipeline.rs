use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use starling_state::{ArtVariant, Track};

use crate::{
    config::Config,
    decode::{self, DecodeStrategy, DecodedImage},
    disk_cache::DiskCache,
    picture::PictureSource,
    ui_thread::UiHandle,
};

/// Where a loaded image's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtOrigin {
    /// Raw bytes already held by the track's resource.
    Memory,
    DiskCache,
    /// Extracted from the audio file's embedded picture.
    Container,
}

#[derive(Debug, Clone)]
pub struct LoadedArt {
    pub image: DecodedImage,
    pub bytes: Arc<[u8]>,
    pub origin: ArtOrigin,
}

/// Turns a track into a decoded bitmap: disk cache first, then the audio container.
///
/// Decoding is marshalled onto the UI thread through `ui`; every other step runs on the caller.
pub struct ArtPipeline {
    disk: DiskCache,
    pictures: Arc<dyn PictureSource>,
    ui: UiHandle,
    thumbnail_max_width: u32,
    default_art: PathBuf,
    strategies: Arc<[DecodeStrategy]>,
}
impl ArtPipeline {
    pub fn new(config: &Config, pictures: Arc<dyn PictureSource>, ui: UiHandle) -> Self {
        Self {
            disk: DiskCache::new(&config.cache_dir, config.retry_policy()),
            pictures,
            ui,
            thumbnail_max_width: config.thumbnail_max_width,
            default_art: config.default_art.clone(),
            strategies: DecodeStrategy::CHAIN.into(),
        }
    }

    /// Replace the decode fallback chain.
    pub fn with_strategies(mut self, strategies: impl Into<Arc<[DecodeStrategy]>>) -> Self {
        self.strategies = strategies.into();
        self
    }

    pub fn disk_cache(&self) -> &DiskCache {
        &self.disk
    }

    /// Image to show when a track has no usable art.
    pub fn default_art(&self) -> &Path {
        &self.default_art
    }

    pub fn max_width(&self, variant: ArtVariant) -> Option<u32> {
        match variant {
            ArtVariant::Thumbnail => Some(self.thumbnail_max_width),
            ArtVariant::Original => None,
        }
    }

    /// Decoded art for `track`, or `None` if there is none to be had.
    pub fn load(&self, track: &Track, variant: ArtVariant) -> Option<DecodedImage> {
        self.load_art(track.path(), variant, None).map(|art| art.image)
    }

    /// Like [`Self::load`], but tries `held_bytes` before touching the disk, and
    /// reports the bytes and where they came from.
    pub fn load_art(
        &self,
        track_path: &Path,
        variant: ArtVariant,
        held_bytes: Option<Arc<[u8]>>,
    ) -> Option<LoadedArt> {
        if let Some(bytes) = held_bytes
            && let Some(image) = self.decode(bytes.clone(), variant)
        {
            return Some(LoadedArt {
                image,
                bytes,
                origin: ArtOrigin::Memory,
            });
        }

        if let Some(bytes) = self.disk.try_read(track_path) {
            let bytes: Arc<[u8]> = bytes.into();
            if let Some(image) = self.decode(bytes.clone(), variant) {
                return Some(LoadedArt {
                    image,
                    bytes,
                    origin: ArtOrigin::DiskCache,
                });
            }
            tracing::debug!(
                "Cached art for {} is unusable, extracting again",
                track_path.display()
            );
        }

        let Some(bytes) = self.extract(track_path) else {
            tracing::debug!("No usable art for {}", track_path.display());
            return None;
        };
        let image = self.decode(bytes.clone(), variant)?;
        Some(LoadedArt {
            image,
            bytes,
            origin: ArtOrigin::Container,
        })
    }

    /// Extract the embedded picture and, if it looks like an image, persist it to the disk cache.
    pub fn extract(&self, track_path: &Path) -> Option<Arc<[u8]>> {
        let bytes = self.pictures.extract_first_picture(track_path)?;
        if decode::validate(&bytes).is_none() {
            tracing::debug!(
                "Embedded picture in {} is not a recognised image ({} bytes)",
                track_path.display(),
                bytes.len()
            );
            return None;
        }
        // Best-effort; the decoded image is returned whether or not this lands.
        self.disk.write(track_path, &bytes);
        Some(bytes.into())
    }

    /// Validate `bytes` here, then decode on the UI thread and wait for the result.
    pub fn decode(&self, bytes: Arc<[u8]>, variant: ArtVariant) -> Option<DecodedImage> {
        if decode::validate(&bytes).is_none() {
            tracing::debug!("Rejecting {} bytes that don't look like an image", bytes.len());
            return None;
        }

        let max_width = self.max_width(variant);
        let strategies = self.strategies.clone();
        let decoded = self
            .ui
            .invoke(move || {
                decode::validate(&bytes)
                    .and_then(|input| decode::decode_with(input, max_width, &strategies))
            })
            .flatten();
        if decoded.is_none() {
            tracing::debug!("All decode strategies failed for {variant}");
        }
        decoded
    }
}
