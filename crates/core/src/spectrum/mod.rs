use std::{f32::consts::TAU, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{Result, TempoError};

/// Turns time-domain blocks into magnitude spectra a [`crate::TempoTracker`]
/// can consume as its amplitude buffer.
///
/// The tracker does not need a spectrum; this is a convenience for drivers
/// that start from raw audio. Plans are cached per block size.
pub struct SpectrumAnalyzer {
    planner: RealFftPlanner<f32>,
    plan: Option<BlockPlan>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            plan: None,
            magnitudes: Vec::new(),
        }
    }

    /// Returns the Hann-windowed magnitude spectrum of `samples`, normalised
    /// by the block length. The slice holds `samples.len() / 2 + 1` bins.
    pub fn magnitudes(&mut self, samples: &[f32]) -> Result<&[f32]> {
        if samples.len() < 2 {
            return Err(TempoError::InvalidInput(
                "spectrum requires blocks with at least two samples",
            ));
        }

        let plan = match self.plan.take() {
            Some(plan) if plan.block_len() == samples.len() => self.plan.insert(plan),
            _ => self
                .plan
                .insert(BlockPlan::new(&mut self.planner, samples.len())),
        };

        for ((slot, sample), weight) in plan.input.iter_mut().zip(samples).zip(&plan.window) {
            *slot = sample * weight;
        }
        plan.fft
            .process_with_scratch(&mut plan.input, &mut plan.bins, &mut plan.scratch)
            .map_err(|_| TempoError::InvalidInput("fft buffers do not match the plan"))?;

        self.magnitudes.clear();
        self.magnitudes.extend(plan.bins.iter().map(|c| c.norm()));
        Ok(&self.magnitudes)
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("block_len", &self.plan.as_ref().map(BlockPlan::block_len))
            .finish()
    }
}

/// Forward transform for one block size. The window carries the `1 / len`
/// normalisation so the magnitudes need no extra pass.
struct BlockPlan {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    bins: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl BlockPlan {
    fn new(planner: &mut RealFftPlanner<f32>, len: usize) -> Self {
        let fft = planner.plan_fft_forward(len);
        let span = (len - 1) as f32;
        let window = (0..len)
            .map(|n| (0.5 - 0.5 * (TAU * n as f32 / span).cos()) / len as f32)
            .collect();
        Self {
            window,
            input: fft.make_input_vec(),
            bins: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            fft,
        }
    }

    fn block_len(&self) -> usize {
        self.window.len()
    }
}
