use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, TempoError};

/// Sub-band count used when a tracker or meter is built without an explicit
/// configuration.
pub const DEFAULT_SUB_BANDS: usize = 16;

/// Top-level configuration for a multi-band setup: the band ranges the driver
/// instantiates trackers for, plus the shared tuning of every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bands: Vec<BandConfig>,
    pub tracker: TrackerConfig,
    pub level: LevelConfig,
    pub kick: KickConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                BandConfig::new("low", 48.0, 95.0),
                BandConfig::new("mid", 85.0, 169.0),
                BandConfig::new("high", 150.0, 280.0),
            ],
            tracker: TrackerConfig::default(),
            level: LevelConfig::default(),
            kick: KickConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields fall back to their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bands.is_empty() {
            return Err(TempoError::config("at least one band is required"));
        }
        for band in &self.bands {
            validate_bpm_range(band.bpm_low, band.bpm_high)?;
        }
        self.tracker.validate()?;
        self.level.validate()?;
        self.kick.validate()?;
        if self.kick.kick_threshold <= self.tracker.onset_threshold {
            return Err(TempoError::config(format!(
                "kick_threshold ({}) must exceed onset_threshold ({})",
                self.kick.kick_threshold, self.tracker.onset_threshold
            )));
        }
        Ok(())
    }
}

/// A named BPM range one tracker instance covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandConfig {
    pub name: String,
    pub bpm_low: f32,
    pub bpm_high: f32,
}

impl BandConfig {
    pub fn new(name: impl Into<String>, bpm_low: f32, bpm_high: f32) -> Self {
        Self {
            name: name.into(),
            bpm_low,
            bpm_high,
        }
    }
}

/// Tuning of the onset detector and the candidate vote table.
///
/// Per-call rates (`vote_decay`, `range_smoothing`) assume frames arrive at
/// roughly 60 per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of past frame energies the onset baseline averages over.
    pub history_len: usize,
    /// Relative rise over the baseline required for an onset (0.5 = +50%).
    pub onset_threshold: f32,
    /// Frames quieter than this never produce an onset.
    pub min_energy: f32,
    /// Fraction of the fastest plausible beat period during which no new
    /// onset may be declared.
    pub refractory_ratio: f32,
    /// Maximum halving/doubling steps when folding a tempo into range.
    pub max_fold_attempts: u32,
    /// Multiplier applied to every vote weight on each call.
    pub vote_decay: f32,
    /// Votes lighter than this are dropped from the table.
    pub prune_epsilon: f32,
    /// Capacity of the candidate arena.
    pub max_candidates: usize,
    /// Share of a vote that goes to the half-tempo alias.
    pub alt_vote_fraction: f32,
    /// Relative width of the neighbourhood around the winner that the refined
    /// tempo and the confidence are computed from.
    pub cluster_width: f32,
    /// Half-width of the consistency band, relative to the winner.
    pub consistency_width: f32,
    /// Vote multiplier for candidates outside the consistency band.
    pub consistency_penalty: f32,
    /// Per-call smoothing rate of the consistency band.
    pub range_smoothing: f32,
    /// Number of contiguous sub-bands each buffer is split into.
    pub sub_bands: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_len: 8,
            onset_threshold: 0.5,
            min_energy: 1.0e-3,
            refractory_ratio: 0.9,
            max_fold_attempts: 3,
            vote_decay: 0.999,
            prune_epsilon: 1.0e-3,
            max_candidates: 128,
            alt_vote_fraction: 0.5,
            cluster_width: 0.06,
            consistency_width: 0.1,
            consistency_penalty: 0.5,
            range_smoothing: 0.02,
            sub_bands: DEFAULT_SUB_BANDS,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_len == 0 {
            return Err(TempoError::config("history_len must be at least 1"));
        }
        if self.sub_bands == 0 {
            return Err(TempoError::config("sub_bands must be at least 1"));
        }
        if self.max_candidates < 2 {
            return Err(TempoError::config("max_candidates must be at least 2"));
        }
        if !(self.vote_decay > 0.0 && self.vote_decay < 1.0) {
            return Err(TempoError::config("vote_decay must lie in (0, 1)"));
        }
        if !(self.range_smoothing > 0.0 && self.range_smoothing <= 1.0) {
            return Err(TempoError::config("range_smoothing must lie in (0, 1]"));
        }
        if !(self.consistency_penalty > 0.0 && self.consistency_penalty <= 1.0) {
            return Err(TempoError::config(
                "consistency_penalty must lie in (0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.alt_vote_fraction) {
            return Err(TempoError::config("alt_vote_fraction must lie in [0, 1)"));
        }
        if !(self.refractory_ratio > 0.0 && self.refractory_ratio <= 1.0) {
            return Err(TempoError::config("refractory_ratio must lie in (0, 1]"));
        }
        let positive = [
            ("onset_threshold", self.onset_threshold),
            ("prune_epsilon", self.prune_epsilon),
            ("cluster_width", self.cluster_width),
            ("consistency_width", self.consistency_width),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TempoError::config(format!("{name} must be positive")));
            }
        }
        if !(self.min_energy.is_finite() && self.min_energy >= 0.0) {
            return Err(TempoError::config("min_energy must not be negative"));
        }
        Ok(())
    }
}

/// Envelope follower settings for [`crate::LevelMeter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Fraction of a rise applied per call (1.0 = jump straight to the peak).
    pub attack: f32,
    /// Release time constant in seconds.
    pub release_secs: f32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            attack: 0.6,
            release_secs: 0.3,
        }
    }
}

impl LevelConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.attack > 0.0 && self.attack <= 1.0) {
            return Err(TempoError::config("attack must lie in (0, 1]"));
        }
        if !(self.release_secs.is_finite() && self.release_secs > 0.0) {
            return Err(TempoError::config("release_secs must be positive"));
        }
        Ok(())
    }
}

/// Settings for [`crate::KickDetector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KickConfig {
    /// Relative onset strength a kick needs; must exceed the tracker's
    /// onset threshold.
    pub kick_threshold: f32,
    /// Minimum seconds between two kicks.
    pub cooldown_secs: f32,
}

impl Default for KickConfig {
    fn default() -> Self {
        Self {
            kick_threshold: 2.0,
            cooldown_secs: 0.15,
        }
    }
}

impl KickConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.kick_threshold.is_finite() && self.kick_threshold > 0.0) {
            return Err(TempoError::config("kick_threshold must be positive"));
        }
        if !(self.cooldown_secs.is_finite() && self.cooldown_secs >= 0.0) {
            return Err(TempoError::config("cooldown_secs must not be negative"));
        }
        Ok(())
    }
}

pub(crate) fn validate_bpm_range(low: f32, high: f32) -> Result<()> {
    if !(low.is_finite() && high.is_finite()) {
        return Err(TempoError::config(format!(
            "bpm range {low}..{high} must be finite"
        )));
    }
    if low <= 0.0 {
        return Err(TempoError::config(format!(
            "bpm_low must be positive, got {low}"
        )));
    }
    if low >= high {
        return Err(TempoError::config(format!(
            "bpm_low ({low}) must be below bpm_high ({high})"
        )));
    }
    Ok(())
}
