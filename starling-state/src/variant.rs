use serde::{Deserialize, Serialize};

/// The two resolutions a track's cover art is held at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtVariant {
    /// Prescaled, memory-bounded image used when rendering lists.
    Thumbnail,
    /// Full-resolution image used by detail views.
    Original,
}
impl ArtVariant {
    /// A short lowercase name, used in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtVariant::Thumbnail => "thumbnail",
            ArtVariant::Original => "original",
        }
    }
}
impl std::fmt::Display for ArtVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
