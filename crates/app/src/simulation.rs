use std::f32::consts::PI;

use clap::ValueEnum;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::Serialize;
use tempo_tracker_core::{
    EngineConfig, KickDetector, LevelMeter, QuantizedBpm, Result, SpectrumAnalyzer, TempoError,
    TempoSummary, TempoTracker,
};

const SAMPLE_RATE: f32 = 48_000.0;
const NOISE_BINS: usize = 1024;

/// How the per-frame amplitude buffers are synthesised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    /// Two fixed random buffers standing in for a spectrum: a quiet one and a
    /// louder one played while a beat is active.
    Noise,
    /// Time-domain clicks over a noise floor, turned into magnitude spectra.
    Spectrum,
}

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub bpm: f32,
    pub seconds: f32,
    pub frame_ms: f32,
    /// Per-interval variation as a fraction of the period.
    pub jitter: f32,
    pub seed: u64,
    pub source: SignalSource,
    /// Share of each beat period the signal stays loud, per band index.
    pub duty_cycles: Vec<f32>,
    /// Band whose tracker drives the level meter and the kick detector.
    pub monitored_band: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            bpm: 145.5,
            seconds: 30.0,
            frame_ms: 16.0,
            jitter: 0.0,
            seed: 1,
            source: SignalSource::Noise,
            duty_cycles: vec![0.1, 0.2, 0.5],
            monitored_band: 1,
        }
    }
}

impl SimulationSettings {
    fn validate(&self, bands: usize) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(TempoError::config("simulated bpm must be positive"));
        }
        if !(self.frame_ms.is_finite() && self.frame_ms > 0.0) {
            return Err(TempoError::config("frame length must be positive"));
        }
        if !(self.seconds.is_finite() && self.seconds > 0.0) {
            return Err(TempoError::config("duration must be positive"));
        }
        if !(0.0..0.5).contains(&self.jitter) {
            return Err(TempoError::config("jitter must lie in [0, 0.5)"));
        }
        if self.monitored_band >= bands {
            return Err(TempoError::OutOfRange {
                index: self.monitored_band,
                len: bands,
            });
        }
        Ok(())
    }

    fn duty(&self, band: usize) -> f32 {
        self.duty_cycles.get(band).copied().unwrap_or(0.2)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BandResult {
    pub name: String,
    pub result: String,
    pub summary: TempoSummary,
}

/// Everything a run produced, ready to be dumped as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationLog {
    pub bpm_sim: f32,
    pub source: SignalSource,
    pub total_calls: usize,
    pub kicks: u64,
    pub peak_level: f32,
    pub bands: Vec<BandResult>,
}

/// Beat start times with optional jitter, generated lazily.
struct BeatSchedule {
    period: f32,
    jitter: f32,
    current: Option<f32>,
    next: f32,
}

impl BeatSchedule {
    fn new(bpm: f32, jitter: f32) -> Self {
        Self {
            period: 60.0 / bpm,
            jitter,
            current: None,
            next: 0.0,
        }
    }

    /// Moves to the beat active at `t` and returns the seconds since it
    /// started.
    fn since_beat(&mut self, t: f32, rng: &mut SmallRng) -> Option<f32> {
        while t >= self.next {
            let current = self.next;
            self.current = Some(current);
            let offset = if self.jitter > 0.0 {
                rng.random_range(-self.jitter..=self.jitter) * self.period
            } else {
                0.0
            };
            self.next = (current + self.period + offset).max(current + f32::EPSILON);
        }
        self.current.map(|start| t - start)
    }
}

/// Synthesises one frame for a band given how long the current beat has
/// been running.
trait FrameSource {
    fn frame(&mut self, since_beat: Option<f32>, loud_for: f32) -> Result<&[f32]>;
}

struct NoiseSource {
    quiet: Vec<f32>,
    loud: Vec<f32>,
}

impl NoiseSource {
    fn new(rng: &mut SmallRng) -> Self {
        let quiet = (0..NOISE_BINS)
            .map(|_| (rng.random::<f32>() * 2.0).floor())
            .collect();
        let loud = (0..NOISE_BINS)
            .map(|i| {
                let scale = if i < NOISE_BINS / 2 { 10.0 } else { 2.0 };
                (rng.random::<f32>() * scale).floor()
            })
            .collect();
        Self { quiet, loud }
    }
}

impl FrameSource for NoiseSource {
    fn frame(&mut self, since_beat: Option<f32>, loud_for: f32) -> Result<&[f32]> {
        let loud = since_beat.is_some_and(|elapsed| elapsed < loud_for);
        Ok(if loud { &self.loud } else { &self.quiet })
    }
}

struct ClickSource {
    rng: SmallRng,
    block: Vec<f32>,
    frame_secs: f32,
    analyzer: SpectrumAnalyzer,
}

impl ClickSource {
    fn new(seed: u64, frame_secs: f32) -> Self {
        let len = ((frame_secs * SAMPLE_RATE) as usize).max(2);
        Self {
            rng: SmallRng::seed_from_u64(seed),
            block: vec![0.0; len],
            frame_secs,
            analyzer: SpectrumAnalyzer::new(),
        }
    }
}

impl FrameSource for ClickSource {
    fn frame(&mut self, since_beat: Option<f32>, loud_for: f32) -> Result<&[f32]> {
        let step = self.frame_secs / self.block.len() as f32;
        // Clicks decay faster for bands with a short duty cycle.
        let decay = (loud_for * 0.25).max(0.005);
        for (index, sample) in self.block.iter_mut().enumerate() {
            let noise = self.rng.random_range(-1.0_f32..=1.0);
            let mut value = 0.02 * noise;
            if let Some(elapsed) = since_beat {
                let t = elapsed + index as f32 * step;
                if t < loud_for {
                    let envelope = (-t / decay).exp();
                    value += envelope * (0.8 * noise + 0.5 * (2.0 * PI * 55.0 * t).sin());
                }
            }
            *sample = value;
        }
        self.analyzer.magnitudes(&self.block)
    }
}

/// Drives one tracker per configured band through a simulated beat train,
/// with the level meter and kick detector following the monitored band.
pub fn run(config: &EngineConfig, settings: &SimulationSettings) -> Result<SimulationLog> {
    config.validate()?;
    settings.validate(config.bands.len())?;

    let mut trackers = config
        .bands
        .iter()
        .map(|band| {
            TempoTracker::with_config(band.bpm_low, band.bpm_high, config.tracker.clone())
        })
        .collect::<Result<Vec<_>>>()?;
    let mut meter = LevelMeter::with_config(config.tracker.sub_bands, config.level.clone())?;
    let mut kick = KickDetector::with_config(config.kick.clone())?;

    let mut rng = SmallRng::seed_from_u64(settings.seed);
    let frame_secs = settings.frame_ms / 1000.0;
    let mut source: Box<dyn FrameSource> = match settings.source {
        SignalSource::Noise => Box::new(NoiseSource::new(&mut rng)),
        SignalSource::Spectrum => Box::new(ClickSource::new(settings.seed, frame_secs)),
    };
    let mut schedule = BeatSchedule::new(settings.bpm, settings.jitter);
    let period = 60.0 / settings.bpm;

    tracing::info!(
        bpm = settings.bpm,
        seconds = settings.seconds,
        source = ?settings.source,
        "starting simulation"
    );

    let total_calls = (settings.seconds / frame_secs).ceil() as usize;
    let mut peak_level = 0.0_f32;
    for call in 0..total_calls {
        let t = call as f32 * frame_secs;
        let since_beat = schedule.since_beat(t, &mut rng);

        for (band, tracker) in trackers.iter_mut().enumerate() {
            let buffer = source.frame(since_beat, settings.duty(band) * period)?;
            tracker.process(t, buffer);
        }

        let monitored = &trackers[settings.monitored_band];
        meter.process(monitored);
        kick.process(monitored);
        peak_level = peak_level.max(meter.peak());
        if kick.is_kick() {
            tracing::debug!(time = t, "kick");
        }
    }

    let bands = config
        .bands
        .iter()
        .zip(&trackers)
        .map(|(band, tracker)| {
            let result = describe(tracker);
            tracing::info!(
                band = %band.name,
                %result,
                confidence = tracker.confidence(),
                "band finished"
            );
            BandResult {
                name: band.name.clone(),
                result,
                summary: tracker.summary(),
            }
        })
        .collect();

    Ok(SimulationLog {
        bpm_sim: settings.bpm,
        source: settings.source,
        total_calls,
        kicks: kick.kick_count(),
        peak_level,
        bands,
    })
}

fn describe(tracker: &TempoTracker) -> String {
    let show = |bpm: Option<QuantizedBpm>| {
        bpm.map(|bpm| format!("{bpm} BPM"))
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "{} / {}",
        show(tracker.winner_bpm()),
        show(tracker.winner_bpm_alt())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band_bpm(log: &SimulationLog, name: &str) -> f32 {
        log.bands
            .iter()
            .find(|band| band.name == name)
            .and_then(|band| band.summary.winner_bpm)
            .map(|bpm| bpm.bpm())
            .unwrap_or_else(|| panic!("band {name} has no tempo"))
    }

    #[test]
    fn noise_run_tracks_simulated_tempo() {
        let log = run(&EngineConfig::default(), &SimulationSettings::default()).unwrap();
        assert_eq!(log.total_calls, 1875);
        assert!((band_bpm(&log, "mid") - 145.5).abs() <= 1.5);
        assert!(log.kicks > 20);
        assert!(log.bands[1].result.contains("BPM"));
    }

    #[test]
    fn spectrum_run_detects_onsets() {
        let settings = SimulationSettings {
            bpm: 120.0,
            seconds: 15.0,
            source: SignalSource::Spectrum,
            ..Default::default()
        };
        let log = run(&EngineConfig::default(), &settings).unwrap();
        let mid = &log.bands[1].summary;
        assert!(mid.onset_count >= 20, "onsets {}", mid.onset_count);
        assert!((band_bpm(&log, "mid") - 120.0).abs() <= 2.0);
    }

    #[test]
    fn rejects_unknown_monitored_band() {
        let settings = SimulationSettings {
            monitored_band: 3,
            ..Default::default()
        };
        let err = run(&EngineConfig::default(), &settings).unwrap_err();
        assert!(matches!(err, TempoError::OutOfRange { index: 3, len: 3 }));
    }

    #[test]
    fn jittered_schedule_keeps_beats_ordered() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut schedule = BeatSchedule::new(120.0, 0.1);
        let mut last_start = None;
        for i in 0..2000 {
            let t = i as f32 * 0.01;
            let since = schedule.since_beat(t, &mut rng).unwrap();
            assert!(since >= 0.0);
            let start = t - since;
            if let Some(previous) = last_start {
                assert!(start >= previous);
            }
            last_start = Some(start);
        }
    }

    #[test]
    fn log_serializes_to_json() {
        let settings = SimulationSettings {
            seconds: 2.0,
            ..Default::default()
        };
        let log = run(&EngineConfig::default(), &settings).unwrap();
        let json = serde_json::to_string_pretty(&log).unwrap();
        assert!(json.contains("\"bpm_sim\""));
        assert!(json.contains("\"source\": \"noise\""));
    }
}
