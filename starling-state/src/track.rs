use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A track ID, as handed out by the library service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub SmolStr);
impl TrackId {
    /// Create a track ID from anything string-like.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }
}
impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A track, as the art subsystem cares about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// The track ID
    pub id: TrackId,
    /// The audio file the track was read from. This doubles as the disk cache key.
    pub path: PathBuf,
    /// The track title, if known
    #[serde(default)]
    pub title: Option<String>,
}
impl Track {
    /// Create a track with no title.
    pub fn new(id: TrackId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            title: None,
        }
    }

    /// The audio file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The title if present, otherwise the file stem.
    pub fn display_name(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.id.to_string())
        })
    }
}
