use crate::{KickConfig, Result, TempoTracker};

/// Flags strong onsets of a [`TempoTracker`] as kicks.
///
/// The flag only describes the most recent `process` call. A tracker onset
/// is considered once, so calling `process` twice on an unchanged tracker
/// cannot fire twice.
#[derive(Debug, Clone, Default)]
pub struct KickDetector {
    config: KickConfig,
    is_kick: bool,
    seen_onsets: u64,
    last_kick_time: Option<f32>,
    kick_count: u64,
}

impl KickDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`crate::TempoError::Configuration`] for a non-positive
    /// threshold or a negative cooldown.
    pub fn with_config(config: KickConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn process(&mut self, tracker: &TempoTracker) {
        self.is_kick = false;

        let fresh_onset = tracker.onset_count() != self.seen_onsets;
        self.seen_onsets = tracker.onset_count();
        if !fresh_onset || !tracker.onset_detected() {
            return;
        }
        if tracker.onset_strength() < self.config.kick_threshold {
            return;
        }

        let Some(now) = tracker.last_onset_time() else {
            return;
        };
        let cooled_down = self
            .last_kick_time
            .map(|last| now - last >= self.config.cooldown_secs)
            .unwrap_or(true);
        if cooled_down {
            self.is_kick = true;
            self.last_kick_time = Some(now);
            self.kick_count += 1;
            tracing::trace!(time = now, strength = tracker.onset_strength(), "kick");
        }
    }

    /// Whether the last processed frame carried a kick.
    pub fn is_kick(&self) -> bool {
        self.is_kick
    }

    pub fn kick_count(&self) -> u64 {
        self.kick_count
    }

    /// Clears the latch and the cooldown. The last seen onset is kept so an
    /// onset reported before the reset cannot fire afterwards.
    pub fn reset(&mut self) {
        self.is_kick = false;
        self.last_kick_time = None;
        self.kick_count = 0;
    }
}
