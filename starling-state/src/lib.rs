//! Representations of the library entities that `starling` attaches cover art to.
//!
//! Separated out so that the library service and the art subsystem can share them
//! without depending on each other.
#![deny(missing_docs)]

mod track;
pub use track::{Track, TrackId};

mod variant;
pub use variant::ArtVariant;
