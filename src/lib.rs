//! Workspace umbrella crate.
//!
//! Host applications can depend on `endless-sound` directly and get the full
//! cache surface without wiring each workspace crate individually.

pub use sound_cache::*;
