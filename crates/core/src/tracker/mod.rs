//! Onset-voting tempo tracker for a single band.
//!
//! Every call measures the frame energy, compares it against a short rolling
//! baseline and, on a sharp enough rise, turns the gap since the previous
//! onset into a BPM candidate. Candidates are folded into the tracker's BPM
//! range, quantized to tenths and accumulated in a decaying vote table whose
//! heaviest key is the reported tempo.

use serde::{Deserialize, Serialize};

mod candidates;
mod history;

pub use candidates::{CandidateVote, QuantizedBpm};

use candidates::CandidateTable;
use history::EnergyHistory;

use crate::{config::validate_bpm_range, MalformedFrame, Result, TrackerConfig};

/// What a single [`TempoTracker::process`] call did with its frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Well-formed frame without an onset.
    Quiet,
    /// An onset was accepted. `candidate` is the folded tempo it voted for;
    /// `None` for the very first onset or when the interval could not be
    /// folded into range.
    Onset { candidate: Option<QuantizedBpm> },
    /// The frame was ignored apart from decaying the vote table.
    Skipped(MalformedFrame),
}

impl FrameOutcome {
    pub fn is_onset(&self) -> bool {
        matches!(self, Self::Onset { .. })
    }

    /// Returns `true` when the frame added a vote to the candidate table.
    pub fn voted(&self) -> bool {
        matches!(self, Self::Onset { candidate: Some(_) })
    }
}

/// Serializable snapshot of a tracker, meant for diagnostics and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoSummary {
    pub bpm_range: (f32, f32),
    pub winner_bpm: Option<QuantizedBpm>,
    pub winner_bpm_alt: Option<QuantizedBpm>,
    pub refined_bpm: Option<QuantizedBpm>,
    pub confidence: f32,
    pub moving_average_range: Option<(f32, f32)>,
    pub onset_count: u64,
    pub beat_count: u64,
    pub candidate_votes: Vec<CandidateVote>,
}

/// Tempo estimator for one band, parameterised by a plausible BPM range.
#[derive(Debug, Clone)]
pub struct TempoTracker {
    bpm_range_low: f32,
    bpm_range_high: f32,
    config: TrackerConfig,
    last_timestamp: Option<f32>,
    last_update: f32,
    last_onset_time: Option<f32>,
    energy_history: EnergyHistory,
    frame_energy: f32,
    band_energies: Vec<f32>,
    onset_strength: f32,
    onset_detected: bool,
    onset_count: u64,
    votes: CandidateTable,
    winner_bpm: Option<QuantizedBpm>,
    winner_bpm_alt: Option<QuantizedBpm>,
    refined_bpm: Option<QuantizedBpm>,
    winner_weight: f32,
    moving_average_range: Option<(f32, f32)>,
    beat_timer: f32,
    quarter_count: u64,
}

impl TempoTracker {
    /// Creates a tracker for `bpm_low..=bpm_high` with the default tuning.
    pub fn new(bpm_low: f32, bpm_high: f32) -> Result<Self> {
        Self::with_config(bpm_low, bpm_high, TrackerConfig::default())
    }

    /// Creates a tracker with explicit tuning. Fails with
    /// [`crate::TempoError::Configuration`] for an empty or inverted range or
    /// out-of-bounds tuning values.
    pub fn with_config(bpm_low: f32, bpm_high: f32, config: TrackerConfig) -> Result<Self> {
        validate_bpm_range(bpm_low, bpm_high)?;
        config.validate()?;

        Ok(Self {
            bpm_range_low: bpm_low,
            bpm_range_high: bpm_high,
            last_timestamp: None,
            last_update: 0.0,
            last_onset_time: None,
            energy_history: EnergyHistory::new(config.history_len),
            frame_energy: 0.0,
            band_energies: vec![0.0; config.sub_bands],
            onset_strength: 0.0,
            onset_detected: false,
            onset_count: 0,
            votes: CandidateTable::with_capacity(config.max_candidates),
            winner_bpm: None,
            winner_bpm_alt: None,
            refined_bpm: None,
            winner_weight: 0.0,
            moving_average_range: None,
            beat_timer: 0.0,
            quarter_count: 0,
            config,
        })
    }

    /// Clears the accumulated state while preserving configuration.
    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.last_update = 0.0;
        self.last_onset_time = None;
        self.energy_history.clear();
        self.frame_energy = 0.0;
        self.band_energies.fill(0.0);
        self.onset_strength = 0.0;
        self.onset_detected = false;
        self.onset_count = 0;
        self.votes.clear();
        self.winner_bpm = None;
        self.winner_bpm_alt = None;
        self.refined_bpm = None;
        self.winner_weight = 0.0;
        self.moving_average_range = None;
        self.beat_timer = 0.0;
        self.quarter_count = 0;
    }

    /// Consumes one frame. Callers must supply exactly one call per logical
    /// frame: repeating a frame double counts its votes.
    pub fn process(&mut self, timestamp: f32, buffer: &[f32]) -> FrameOutcome {
        self.onset_detected = false;
        self.onset_strength = 0.0;
        self.votes.decay(self.config.vote_decay, self.config.prune_epsilon);

        if let Err(reason) = self.check_frame(timestamp, buffer) {
            tracing::debug!(%reason, timestamp, "skipping malformed frame");
            self.last_update = 0.0;
            self.update_winner();
            return FrameOutcome::Skipped(reason);
        }

        let dt = self
            .last_timestamp
            .map(|previous| timestamp - previous)
            .unwrap_or(0.0);
        self.last_update = dt;
        self.last_timestamp = Some(timestamp);

        self.measure(buffer);
        let baseline = self.energy_history.mean();
        self.energy_history.push(self.frame_energy);

        let outcome = match baseline {
            Some(baseline) => self.detect_onset(timestamp, baseline),
            None => FrameOutcome::Quiet,
        };

        self.update_winner();
        self.update_moving_average_range();
        self.advance_beat_clock(dt);
        outcome
    }

    fn check_frame(
        &self,
        timestamp: f32,
        buffer: &[f32],
    ) -> std::result::Result<(), MalformedFrame> {
        if buffer.is_empty() {
            return Err(MalformedFrame::EmptyBuffer);
        }
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(MalformedFrame::InvalidTimestamp(timestamp));
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp < previous {
                return Err(MalformedFrame::NonMonotonicTimestamp {
                    previous,
                    current: timestamp,
                });
            }
        }
        if buffer.iter().any(|sample| !sample.is_finite()) {
            return Err(MalformedFrame::NonFiniteSamples);
        }
        Ok(())
    }

    /// Mean absolute amplitude of the whole buffer and of each contiguous
    /// sub-band.
    fn measure(&mut self, buffer: &[f32]) {
        let len = buffer.len();
        let bands = self.band_energies.len();
        let mut total = 0.0;

        for (band, energy) in self.band_energies.iter_mut().enumerate() {
            let range = &buffer[band * len / bands..(band + 1) * len / bands];
            let sum: f32 = range.iter().map(|sample| sample.abs()).sum();
            total += sum;
            *energy = if range.is_empty() {
                0.0
            } else {
                sum / range.len() as f32
            };
        }

        self.frame_energy = total / len as f32;
    }

    fn detect_onset(&mut self, timestamp: f32, baseline: f32) -> FrameOutcome {
        let energy = self.frame_energy;
        let floor = baseline.max(self.config.min_energy).max(f32::EPSILON);
        self.onset_strength = ((energy - baseline) / floor).max(0.0);

        let rising = energy > baseline * (1.0 + self.config.onset_threshold)
            && energy > self.config.min_energy;
        if !rising {
            return FrameOutcome::Quiet;
        }
        if let Some(last) = self.last_onset_time {
            if timestamp - last < self.refractory_interval() {
                return FrameOutcome::Quiet;
            }
        }

        let previous = self.last_onset_time.replace(timestamp);
        self.onset_detected = true;
        self.onset_count += 1;

        let candidate =
            previous.and_then(|previous| self.candidate_for_interval(timestamp - previous));
        if let Some(bpm) = candidate {
            self.cast_vote(bpm);
        }

        tracing::debug!(
            timestamp,
            strength = self.onset_strength,
            candidate = ?candidate.map(|bpm| bpm.bpm()),
            "onset"
        );
        FrameOutcome::Onset { candidate }
    }

    fn candidate_for_interval(&self, interval: f32) -> Option<QuantizedBpm> {
        if interval <= 0.0 {
            return None;
        }
        fold_into_range(
            60.0 / interval,
            self.bpm_range_low,
            self.bpm_range_high,
            self.config.max_fold_attempts,
        )
        .and_then(QuantizedBpm::from_bpm)
    }

    fn cast_vote(&mut self, bpm: QuantizedBpm) {
        let mut weight = 1.0;
        if let Some((low, high)) = self.moving_average_range {
            let value = bpm.bpm();
            if value < low || value > high {
                weight *= self.config.consistency_penalty;
            }
        }

        self.votes.add(bpm, weight);
        if let Some(half) = QuantizedBpm::from_bpm(bpm.bpm() / 2.0) {
            self.votes.add(half, weight * self.config.alt_vote_fraction);
        }
    }

    fn update_winner(&mut self) {
        let Some(heaviest) = self.votes.heaviest() else {
            self.winner_weight = 0.0;
            return;
        };
        let winner = heaviest.bpm;

        if self.winner_bpm != Some(winner) {
            tracing::trace!(
                from = ?self.winner_bpm.map(|bpm| bpm.bpm()),
                to = winner.bpm(),
                "winner changed"
            );
        }
        self.winner_bpm = Some(winner);

        let bpm = winner.bpm();
        self.winner_bpm_alt = [bpm / 2.0, bpm * 2.0]
            .into_iter()
            .filter_map(|alias| self.votes.heaviest_near(alias))
            .filter(|alias| alias.bpm != winner)
            .max_by(|a, b| a.weight.total_cmp(&b.weight).then(b.bpm.cmp(&a.bpm)))
            .map(|alias| alias.bpm);

        let neighbourhood = self.votes.cluster_around(bpm, self.config.cluster_width);
        self.winner_weight = neighbourhood.map_or(heaviest.weight, |cluster| cluster.weight);
        self.refined_bpm = neighbourhood.map(|cluster| cluster.centre);
    }

    fn update_moving_average_range(&mut self) {
        let Some(winner) = self.winner_bpm else {
            return;
        };
        let bpm = winner.bpm();
        let delta = bpm * self.config.consistency_width;
        let (target_low, target_high) = (bpm - delta, bpm + delta);
        let rate = self.config.range_smoothing;

        self.moving_average_range = Some(match self.moving_average_range {
            None => (target_low, target_high),
            Some((low, high)) => (
                low + (target_low - low) * rate,
                high + (target_high - high) * rate,
            ),
        });
    }

    fn advance_beat_clock(&mut self, dt: f32) {
        let Some(winner) = self.winner_bpm else {
            return;
        };
        let quarter = winner.period() / 4.0;
        self.beat_timer += dt;
        if self.beat_timer >= quarter {
            let ticks = (self.beat_timer / quarter).floor();
            self.beat_timer -= ticks * quarter;
            self.quarter_count += ticks as u64;
        }
    }

    /// Minimum time between two onsets: a fraction of the fastest plausible
    /// beat period.
    pub fn refractory_interval(&self) -> f32 {
        self.config.refractory_ratio * 60.0 / self.bpm_range_high
    }

    pub fn bpm_range(&self) -> (f32, f32) {
        (self.bpm_range_low, self.bpm_range_high)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn winner_bpm(&self) -> Option<QuantizedBpm> {
        self.winner_bpm
    }

    /// Octave alias (half or double tempo) of the winner that holds the most
    /// votes.
    pub fn winner_bpm_alt(&self) -> Option<QuantizedBpm> {
        self.winner_bpm_alt
    }

    /// Period-weighted centre of the votes around the winner.
    ///
    /// Frame-quantized intervals split one tempo across neighbouring keys
    /// (26 and 27 frames of 16 ms for 140 BPM); averaging their periods
    /// recovers the tempo between them.
    pub fn refined_bpm(&self) -> Option<QuantizedBpm> {
        self.refined_bpm
    }

    pub fn candidate_votes(&self) -> &[CandidateVote] {
        self.votes.as_slice()
    }

    pub fn total_vote_weight(&self) -> f32 {
        self.votes.total_weight()
    }

    /// Share of the total vote weight held by the winner's neighbourhood.
    pub fn confidence(&self) -> f32 {
        let total = self.votes.total_weight();
        if total <= 0.0 {
            0.0
        } else {
            (self.winner_weight / total).clamp(0.0, 1.0)
        }
    }

    pub fn moving_average_range(&self) -> Option<(f32, f32)> {
        self.moving_average_range
    }

    pub fn last_timestamp(&self) -> Option<f32> {
        self.last_timestamp
    }

    /// Seconds between the last two well-formed frames.
    pub fn last_update(&self) -> f32 {
        self.last_update
    }

    pub fn last_onset_time(&self) -> Option<f32> {
        self.last_onset_time
    }

    pub fn frame_energy(&self) -> f32 {
        self.frame_energy
    }

    pub fn band_energies(&self) -> &[f32] {
        &self.band_energies
    }

    /// Relative rise of the last frame over its baseline.
    pub fn onset_strength(&self) -> f32 {
        self.onset_strength
    }

    /// Whether the most recent call accepted an onset.
    pub fn onset_detected(&self) -> bool {
        self.onset_detected
    }

    pub fn onset_count(&self) -> u64 {
        self.onset_count
    }

    pub fn quarter_count(&self) -> u64 {
        self.quarter_count
    }

    pub fn half_count(&self) -> u64 {
        self.quarter_count / 2
    }

    pub fn beat_count(&self) -> u64 {
        self.quarter_count / 4
    }

    /// Position inside the current beat in `[0, 1)`, or `None` before a
    /// tempo is known.
    pub fn beat_phase(&self) -> Option<f32> {
        let period = self.winner_bpm?.period();
        let quarter = period / 4.0;
        let elapsed = (self.quarter_count % 4) as f32 * quarter + self.beat_timer;
        Some((elapsed / period).clamp(0.0, 1.0 - f32::EPSILON))
    }

    pub fn summary(&self) -> TempoSummary {
        let mut candidate_votes = self.votes.as_slice().to_vec();
        candidate_votes.sort_by_key(|vote| vote.bpm);
        TempoSummary {
            bpm_range: self.bpm_range(),
            winner_bpm: self.winner_bpm,
            winner_bpm_alt: self.winner_bpm_alt,
            refined_bpm: self.refined_bpm,
            confidence: self.confidence(),
            moving_average_range: self.moving_average_range,
            onset_count: self.onset_count,
            beat_count: self.beat_count(),
            candidate_votes,
        }
    }
}

/// Doubles or halves `bpm` until it lands inside `low..=high`, giving up after
/// `max_attempts` steps.
pub fn fold_into_range(bpm: f32, low: f32, high: f32, max_attempts: u32) -> Option<f32> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return None;
    }
    let mut folded = bpm;
    for _ in 0..max_attempts {
        if folded < low {
            folded *= 2.0;
        } else if folded > high {
            folded /= 2.0;
        } else {
            return Some(folded);
        }
    }
    (low..=high).contains(&folded).then_some(folded)
}
