use std::fmt;

use serde::{Deserialize, Serialize};

/// A tempo stored at one-decimal fixed point (tenths of a BPM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuantizedBpm(u32);

impl QuantizedBpm {
    /// Rounds `bpm` to the nearest tenth. Returns `None` for values that do
    /// not describe a tempo.
    pub fn from_bpm(bpm: f32) -> Option<Self> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return None;
        }
        let tenths = (bpm * 10.0).round();
        if tenths < 1.0 || tenths > u32::MAX as f32 {
            return None;
        }
        Some(Self(tenths as u32))
    }

    pub const fn from_tenths(tenths: u32) -> Self {
        Self(tenths)
    }

    pub const fn tenths(self) -> u32 {
        self.0
    }

    pub fn bpm(self) -> f32 {
        self.0 as f32 / 10.0
    }

    /// Beat period in seconds.
    pub fn period(self) -> f32 {
        60.0 / self.bpm()
    }
}

impl fmt::Display for QuantizedBpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// One slot of the vote arena.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateVote {
    pub bpm: QuantizedBpm,
    pub weight: f32,
}

/// Result of pooling the votes around a tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Cluster {
    pub centre: QuantizedBpm,
    pub weight: f32,
}

/// Fixed-capacity arena of weighted BPM candidates.
///
/// Keys are unique. The table never grows past its capacity: light slots are
/// pruned on every decay and, when full, the lightest slot makes room for a
/// new key.
#[derive(Debug, Clone)]
pub(crate) struct CandidateTable {
    slots: Vec<CandidateVote>,
    capacity: usize,
}

impl CandidateTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn as_slice(&self) -> &[CandidateVote] {
        &self.slots
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn total_weight(&self) -> f32 {
        self.slots.iter().map(|slot| slot.weight).sum()
    }

    #[cfg(test)]
    pub fn weight_of(&self, bpm: QuantizedBpm) -> f32 {
        self.slots
            .iter()
            .find(|slot| slot.bpm == bpm)
            .map(|slot| slot.weight)
            .unwrap_or(0.0)
    }

    pub fn add(&mut self, bpm: QuantizedBpm, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.bpm == bpm) {
            slot.weight += weight;
            return;
        }
        if self.slots.len() >= self.capacity {
            let lightest = self
                .slots
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.weight.total_cmp(&b.weight))
                .map(|(index, _)| index);
            if let Some(index) = lightest {
                self.slots.swap_remove(index);
            }
        }
        self.slots.push(CandidateVote { bpm, weight });
    }

    /// Scales every weight by `factor` and drops slots lighter than `epsilon`.
    pub fn decay(&mut self, factor: f32, epsilon: f32) {
        for slot in &mut self.slots {
            slot.weight *= factor;
        }
        self.slots.retain(|slot| slot.weight >= epsilon);
    }

    /// The slot with the largest weight. Ties go to the slower tempo so the
    /// pick does not depend on slot order.
    pub fn heaviest(&self) -> Option<CandidateVote> {
        self.heaviest_where(|_| true)
    }

    /// The heaviest slot within one quantization step of `bpm`.
    pub fn heaviest_near(&self, bpm: f32) -> Option<CandidateVote> {
        let tenths = bpm * 10.0;
        self.heaviest_where(|slot| (slot.bpm.tenths() as f32 - tenths).abs() <= 1.0)
    }

    fn heaviest_where(&self, keep: impl Fn(&CandidateVote) -> bool) -> Option<CandidateVote> {
        self.slots
            .iter()
            .filter(|slot| keep(slot))
            .max_by(|a, b| a.weight.total_cmp(&b.weight).then(b.bpm.cmp(&a.bpm)))
            .copied()
    }

    /// Refines the cluster centred near `bpm`, or `None` when no vote lies in
    /// its neighbourhood.
    pub fn cluster_around(&self, bpm: f32, width: f32) -> Option<Cluster> {
        let mut centre = bpm;
        let mut weight = 0.0;
        for _ in 0..4 {
            let mut period_sum = 0.0;
            weight = 0.0;
            for slot in self.slots.iter().filter(|slot| within(slot.bpm.bpm(), centre, width)) {
                period_sum += slot.bpm.period() * slot.weight;
                weight += slot.weight;
            }
            if weight <= 0.0 {
                return None;
            }
            let next = 60.0 * weight / period_sum;
            let settled = (next - centre).abs() < 0.01;
            centre = next;
            if settled {
                break;
            }
        }
        QuantizedBpm::from_bpm(centre).map(|centre| Cluster { centre, weight })
    }
}

fn within(value: f32, centre: f32, width: f32) -> bool {
    (value - centre).abs() <= centre * width
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(bpm: f32) -> QuantizedBpm {
        QuantizedBpm::from_bpm(bpm).unwrap()
    }

    #[test]
    fn quantizes_to_one_decimal() {
        assert_eq!(q(138.888).tenths(), 1389);
        assert_eq!(q(140.04).to_string(), "140.0");
        assert_eq!(QuantizedBpm::from_tenths(725).to_string(), "72.5");
        assert!(QuantizedBpm::from_bpm(0.0).is_none());
        assert!(QuantizedBpm::from_bpm(f32::NAN).is_none());
    }

    #[test]
    fn votes_accumulate_per_key() {
        let mut table = CandidateTable::with_capacity(8);
        table.add(q(120.0), 1.0);
        table.add(q(120.0), 0.5);
        table.add(q(60.0), 0.5);
        assert_eq!(table.as_slice().len(), 2);
        assert!((table.weight_of(q(120.0)) - 1.5).abs() < 1e-6);
        assert!((table.total_weight() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn decay_prunes_light_slots() {
        let mut table = CandidateTable::with_capacity(8);
        table.add(q(120.0), 1.0);
        table.add(q(90.0), 0.0015);
        table.decay(0.5, 1.0e-3);
        assert_eq!(table.as_slice().len(), 1);
        assert!((table.weight_of(q(120.0)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn full_arena_evicts_lightest() {
        let mut table = CandidateTable::with_capacity(2);
        table.add(q(100.0), 3.0);
        table.add(q(110.0), 0.2);
        table.add(q(120.0), 1.0);
        assert_eq!(table.as_slice().len(), 2);
        assert_eq!(table.weight_of(q(110.0)), 0.0);
        assert!(table.weight_of(q(120.0)) > 0.0);
    }

    #[test]
    fn heaviest_slot_wins_over_a_denser_neighbourhood() {
        let mut table = CandidateTable::with_capacity(8);
        table.add(q(100.0), 1.2);
        table.add(q(139.0), 0.8);
        table.add(q(141.0), 0.8);
        assert_eq!(table.heaviest().unwrap().bpm, q(100.0));
    }

    #[test]
    fn equal_weights_prefer_the_slower_tempo() {
        let mut table = CandidateTable::with_capacity(8);
        table.add(q(150.0), 1.0);
        table.add(q(75.0), 1.0);
        table.add(q(120.0), 1.0);
        assert_eq!(table.heaviest().unwrap().bpm, q(75.0));
    }

    #[test]
    fn alias_lookup_allows_one_step_of_rounding() {
        let mut table = CandidateTable::with_capacity(8);
        table.add(q(69.4), 0.3);
        table.add(q(69.5), 0.6);
        table.add(q(69.8), 2.0);
        // Half of 138.9 is 69.45.
        assert_eq!(table.heaviest_near(69.45).unwrap().bpm, q(69.5));
        assert!(table.heaviest_near(72.0).is_none());
    }

    #[test]
    fn cluster_centre_averages_periods() {
        // 27- and 26-frame intervals at 16 ms, mixed roughly 4:1.
        let mut table = CandidateTable::with_capacity(8);
        table.add(q(138.9), 0.786);
        table.add(q(144.2), 0.214);
        let cluster = table.cluster_around(138.9, 0.06).unwrap();
        assert!((cluster.centre.bpm() - 140.0).abs() < 0.3, "{}", cluster.centre);
        assert!((cluster.weight - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_neighbourhood_has_no_cluster() {
        let mut table = CandidateTable::with_capacity(4);
        table.add(q(140.0), 1.0);
        assert!(table.cluster_around(280.0, 0.06).is_none());
        assert!(CandidateTable::with_capacity(4).heaviest().is_none());
    }
}
