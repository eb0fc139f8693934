pub mod api;
pub mod bulletin;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod evidence;
pub mod intents;
pub mod locks;
pub mod mcp;
pub mod models;
pub mod pattern;
pub mod sessions;
pub mod warden;

pub use error::{Result, WardenError};
pub use warden::{BuildOutcome, Collaborators, Warden};
