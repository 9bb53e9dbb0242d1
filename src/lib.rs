#![forbid(unsafe_code)]

//! Viral video tracking toolkit.
//!
//! The library turns raw per-video counters (views, subscribers, upload
//! time) into bounded, comparable scores and ranks batches of videos inside
//! a trailing time window. The binaries wrap it in an HTTP backend and an
//! offline CLI.

pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod metadata;
pub mod ranking;
pub mod scoring;
pub mod window;
pub mod youtube;

pub use error::{ScoringError, ScoringResult};
pub use metadata::{ScoredVideo, VideoMetadata};
pub use ranking::{QueryScope, RankOptions, ViralScorer};
pub use window::TimeWindow;
