pub mod beats;
pub mod cache;
pub mod chords;
pub mod config;
pub mod db;
pub mod detect;
pub mod lyrics;
pub mod merge;
pub mod model;
pub mod pipeline;

/// Application name for XDG paths
pub const APP_NAME: &str = "chordsheet";
