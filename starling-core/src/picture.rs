use std::path::Path;

use lofty::file::TaggedFileExt;

/// Reads the embedded picture out of an audio container.
///
/// Implementations must not fail loudly: a missing, unsupported or corrupt file is
/// simply a file without a picture.
pub trait PictureSource: Send + Sync {
    fn extract_first_picture(&self, file_path: &Path) -> Option<Vec<u8>>;
}

/// [`PictureSource`] backed by `lofty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyPictures;
impl PictureSource for LoftyPictures {
    fn extract_first_picture(&self, file_path: &Path) -> Option<Vec<u8>> {
        let tagged_file = match lofty::read_from_path(file_path) {
            Ok(tagged_file) => tagged_file,
            Err(e) => {
                tracing::debug!("Failed to read tags from {}: {e}", file_path.display());
                return None;
            }
        };

        // The primary tag wins; otherwise take whatever tag carries a picture first.
        let picture = tagged_file
            .primary_tag()
            .and_then(|tag| tag.pictures().first())
            .or_else(|| {
                tagged_file
                    .tags()
                    .iter()
                    .find_map(|tag| tag.pictures().first())
            });

        match picture {
            Some(picture) if !picture.data().is_empty() => Some(picture.data().to_vec()),
            _ => {
                tracing::debug!("No embedded picture in {}", file_path.display());
                None
            }
        }
    }
}
