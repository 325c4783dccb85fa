//! Domain services shared by the HTTP handlers through [`crate::state::AppState`].

pub mod characters;
pub mod conversation;
pub mod downloads;
pub mod registry;
pub mod sessions;
