//! TOML render profiles for the `multipass` renderer.
//!
//! A profile names the passes of a document, where their sources come from,
//! how each pass binds its four channels and which image files make up the
//! texture catalog. `LoadedProfile::document` produces the pass list handed to
//! `Orchestrator::load_document`.
mod loader;
mod manifest;

pub use loader::{LoadedProfile, ProfileError};
pub use manifest::{
    ChannelEntry, ChannelEntryError, ChannelKind, PassEntry, PowerSetting, Profile,
    RenderSettings, TaggedChannel, TextureEntry,
};
