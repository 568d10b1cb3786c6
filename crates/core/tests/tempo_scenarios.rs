use rand::{rngs::SmallRng, Rng, SeedableRng};
use tempo_tracker_core::{KickDetector, LevelMeter, TempoTracker};

const FRAME: f32 = 0.016;
const BUFFER_LEN: usize = 1024;

/// Noise buffers in the style of a crude spectrum: the "hit" buffer carries
/// much more energy in its lower half.
struct NoiseBuffers {
    quiet: Vec<f32>,
    hit: Vec<f32>,
}

impl NoiseBuffers {
    fn new(rng: &mut SmallRng) -> Self {
        let quiet = (0..BUFFER_LEN)
            .map(|_| (rng.random::<f32>() * 2.0).floor())
            .collect();
        let hit = (0..BUFFER_LEN)
            .map(|i| {
                let scale = if i < BUFFER_LEN / 2 { 10.0 } else { 2.0 };
                (rng.random::<f32>() * scale).floor()
            })
            .collect();
        Self { quiet, hit }
    }
}

/// Beat onsets at `bpm` where every inter-onset interval is stretched or
/// squeezed by up to `jitter` of a period.
struct JitteredBeats {
    onsets: Vec<f32>,
    period: f32,
}

impl JitteredBeats {
    fn new(bpm: f32, seconds: f32, jitter: f32, rng: &mut SmallRng) -> Self {
        let period = 60.0 / bpm;
        let mut onsets = vec![0.0_f32];
        let mut last = 0.0_f32;
        while last < seconds + period {
            let offset = if jitter > 0.0 {
                rng.random_range(-jitter..=jitter) * period
            } else {
                0.0
            };
            last += period + offset;
            onsets.push(last);
        }
        Self { onsets, period }
    }

    fn is_hit(&self, t: f32, duty: f32) -> bool {
        let width = duty * self.period;
        self.onsets
            .iter()
            .take_while(|onset| **onset <= t)
            .any(|onset| t - onset < width)
    }
}

#[test]
fn jittered_140_bpm_settles_by_ten_seconds() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let buffers = NoiseBuffers::new(&mut rng);
    let beats = JitteredBeats::new(140.0, 30.0, 0.02, &mut rng);
    let mut tracker = TempoTracker::new(85.0, 169.0).unwrap();

    let frames = (30.0 / FRAME) as usize;
    for i in 0..frames {
        let t = i as f32 * FRAME;
        let buffer = if beats.is_hit(t, 0.2) {
            &buffers.hit
        } else {
            &buffers.quiet
        };
        tracker.process(t, buffer);

        if t >= 10.0 {
            let winner = tracker.winner_bpm().expect("tempo known by 10 s").bpm();
            assert!(
                (138.0..=142.0).contains(&winner),
                "winner {winner} left [138, 142] at {t:.2} s"
            );
        }
    }
    assert!(tracker.onset_count() > 60);
}

#[test]
fn silence_never_votes_or_kicks() {
    let mut trackers = [
        TempoTracker::new(48.0, 95.0).unwrap(),
        TempoTracker::new(85.0, 169.0).unwrap(),
        TempoTracker::new(150.0, 280.0).unwrap(),
    ];
    let mut meter = LevelMeter::default();
    let mut kick = KickDetector::new();
    let silence = vec![0.0_f32; BUFFER_LEN];

    for i in 0..(60.0 / FRAME) as usize {
        let t = i as f32 * FRAME;
        for tracker in &mut trackers {
            assert!(!tracker.process(t, &silence).is_onset());
            assert_eq!(tracker.total_vote_weight(), 0.0);
        }
        meter.process(&trackers[1]);
        kick.process(&trackers[1]);
        assert!(!kick.is_kick());
        assert_eq!(meter.get_level(0).unwrap(), 0.0);
    }

    for tracker in &trackers {
        assert!(tracker.candidate_votes().is_empty());
        assert_eq!(tracker.winner_bpm(), None);
    }
    assert_eq!(kick.kick_count(), 0);
}

#[test]
fn three_band_harness_agrees_on_tempo() {
    let mut rng = SmallRng::seed_from_u64(42);
    let buffers = NoiseBuffers::new(&mut rng);
    let beats = JitteredBeats::new(145.5, 30.0, 0.0, &mut rng);

    let mut low = TempoTracker::new(48.0, 95.0).unwrap();
    let mut mid = TempoTracker::new(85.0, 169.0).unwrap();
    let mut high = TempoTracker::new(150.0, 280.0).unwrap();
    let mut meter = LevelMeter::default();
    let mut kick = KickDetector::new();
    let mut peak_level = 0.0_f32;

    for i in 0..(30.0 / FRAME) as usize {
        let t = i as f32 * FRAME;
        let pick = |duty| {
            if beats.is_hit(t, duty) {
                &buffers.hit
            } else {
                &buffers.quiet
            }
        };
        low.process(t, pick(0.1));
        mid.process(t, pick(0.2));
        high.process(t, pick(0.5));

        meter.process(&mid);
        kick.process(&mid);
        peak_level = peak_level.max(meter.get_level(0).unwrap());
    }

    let mid_bpm = mid.winner_bpm().unwrap().bpm();
    assert!((mid_bpm - 145.5).abs() <= 1.5, "mid {mid_bpm}");
    // The slow band only sees every other beat.
    let low_bpm = low.winner_bpm().unwrap().bpm();
    assert!((low_bpm - 72.75).abs() <= 1.5, "low {low_bpm}");

    assert!(kick.kick_count() > 20);
    assert!(peak_level > 1.0);
    assert!(meter.get_level(16).is_err());
}
