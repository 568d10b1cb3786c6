//! Core library of the multi-band tempo tracker.
//!
//! A [`TempoTracker`] is instantiated per frequency band with the BPM range
//! plausible for that band. The driver calls [`TempoTracker::process`] once
//! per frame with a timestamp and an amplitude buffer, then lets the
//! secondary modules ([`LevelMeter`], [`KickDetector`]) read the tracker.
//! Data only flows from tracker to module; every component is a plain
//! synchronous state machine without global state.

pub mod config;
pub mod error;
pub mod kick;
pub mod level;
pub mod spectrum;
pub mod tracker;

pub use config::{BandConfig, EngineConfig, KickConfig, LevelConfig, TrackerConfig};
pub use error::{MalformedFrame, Result, TempoError};
pub use kick::KickDetector;
pub use level::LevelMeter;
pub use spectrum::SpectrumAnalyzer;
pub use tracker::{
    fold_into_range, CandidateVote, FrameOutcome, QuantizedBpm, TempoSummary, TempoTracker,
};
