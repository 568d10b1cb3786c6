use crate::{config::DEFAULT_SUB_BANDS, LevelConfig, Result, TempoError, TempoTracker};

/// Smoothed per sub-band signal levels derived from a [`TempoTracker`].
///
/// Levels jump towards louder input by `attack` per call and fall back with
/// an exponential release driven by the tracker's frame interval, so they
/// decay monotonically between onsets.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    config: LevelConfig,
    levels: Vec<f32>,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_SUB_BANDS)
    }
}

impl LevelMeter {
    pub fn new(sub_bands: usize) -> Self {
        Self {
            config: LevelConfig::default(),
            levels: vec![0.0; sub_bands],
        }
    }

    /// Creates a meter with explicit ballistics. Fails with
    /// [`TempoError::Configuration`] when the envelope settings are out of
    /// range or no sub-band is requested.
    pub fn with_config(sub_bands: usize, config: LevelConfig) -> Result<Self> {
        if sub_bands == 0 {
            return Err(TempoError::config("level meter needs at least one sub-band"));
        }
        config.validate()?;
        Ok(Self {
            config,
            levels: vec![0.0; sub_bands],
        })
    }

    /// Follows the tracker's latest sub-band energies. Bands the tracker does
    /// not provide are left untouched.
    pub fn process(&mut self, tracker: &TempoTracker) {
        let release = 1.0 - (-tracker.last_update().max(0.0) / self.config.release_secs).exp();
        for (level, &energy) in self.levels.iter_mut().zip(tracker.band_energies()) {
            let rate = if energy > *level {
                self.config.attack
            } else {
                release
            };
            *level = (*level + (energy - *level) * rate).max(0.0);
        }
    }

    /// Returns the smoothed level of sub-band `index`.
    pub fn get_level(&self, index: usize) -> Result<f32> {
        self.levels
            .get(index)
            .copied()
            .ok_or(TempoError::OutOfRange {
                index,
                len: self.levels.len(),
            })
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    pub fn sub_bands(&self) -> usize {
        self.levels.len()
    }

    /// Loudest sub-band level.
    pub fn peak(&self) -> f32 {
        self.levels.iter().copied().fold(0.0, f32::max)
    }

    pub fn reset(&mut self) {
        self.levels.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackerConfig;

    fn tracker(sub_bands: usize) -> TempoTracker {
        let config = TrackerConfig {
            sub_bands,
            ..Default::default()
        };
        TempoTracker::with_config(85.0, 169.0, config).unwrap()
    }

    #[test]
    fn rejects_indices_past_band_count() {
        let meter = LevelMeter::new(4);
        assert_eq!(meter.get_level(3).unwrap(), 0.0);
        let err = meter.get_level(4).unwrap_err();
        assert!(matches!(err, TempoError::OutOfRange { index: 4, len: 4 }));
        assert!(LevelMeter::default().get_level(DEFAULT_SUB_BANDS).is_err());
    }

    #[test]
    fn attacks_fast_and_releases_slowly() {
        let mut tracker = tracker(2);
        let mut meter = LevelMeter::new(2);

        tracker.process(0.0, &[0.0, 0.0, 2.0, 2.0]);
        meter.process(&tracker);
        let attacked = meter.get_level(1).unwrap();
        assert!((attacked - 1.2).abs() < 1e-6);
        assert_eq!(meter.get_level(0).unwrap(), 0.0);

        let mut previous = attacked;
        for i in 1..20 {
            tracker.process(i as f32 * 0.016, &[0.0; 4]);
            meter.process(&tracker);
            let level = meter.get_level(1).unwrap();
            assert!(level < previous, "release must be monotone");
            assert!(level >= 0.0);
            previous = level;
        }
        // 19 frames of 16 ms against a 0.3 s release keep a good share.
        assert!(previous > 0.3 * attacked);
    }

    #[test]
    fn levels_never_go_negative() {
        let mut tracker = tracker(4);
        let mut meter = LevelMeter::new(4);
        for i in 0..200 {
            let sample = if i % 10 == 0 { -3.0 } else { 0.0 };
            tracker.process(i as f32 * 0.016, &[sample; 8]);
            meter.process(&tracker);
            assert!(meter.levels().iter().all(|level| *level >= 0.0));
        }
        assert!(meter.peak() >= 0.0);
        meter.reset();
        assert_eq!(meter.peak(), 0.0);
    }

    #[test]
    fn invalid_ballistics_are_rejected() {
        let config = LevelConfig {
            attack: -1.0,
            release_secs: 0.0,
        };
        let err = LevelMeter::with_config(2, config).unwrap_err();
        assert!(matches!(err, TempoError::Configuration(_)));
        assert!(LevelMeter::with_config(0, LevelConfig::default()).is_err());

        let mut tracker = tracker(2);
        let mut meter = LevelMeter::with_config(2, LevelConfig::default()).unwrap();
        for i in 0..10 {
            tracker.process(i as f32 * 0.016, &[5.0; 4]);
            meter.process(&tracker);
        }
        assert!(meter.get_level(0).unwrap() > 4.0);
    }

    #[test]
    fn extra_meter_bands_stay_silent() {
        let mut tracker = tracker(2);
        let mut meter = LevelMeter::new(3);
        tracker.process(0.0, &[1.0; 4]);
        meter.process(&tracker);
        assert!(meter.get_level(1).unwrap() > 0.0);
        assert_eq!(meter.get_level(2).unwrap(), 0.0);
    }
}
