use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{AudioConfig, InputEvent, InputKind, InputMeta, RouterError, Result};

/// Input id of audio band `index`.
pub fn band_input_id(index: usize) -> String {
    format!("audio_{index}")
}

/// Splits sample blocks into logarithmically spaced frequency bands and
/// publishes one smoothed level per band as an `audio` input.
pub struct AudioAnalyser {
    bands: usize,
    smoothing: f32,
    gain: f32,
    levels: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AudioAnalyser {
    pub fn new(config: &AudioConfig) -> Self {
        let bands = config.bands.max(1);
        Self {
            bands,
            smoothing: config.smoothing.clamp(0.0, 0.99),
            gain: config.gain.max(0.0),
            levels: vec![0.0; bands],
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Current smoothed band levels, in [0, 1].
    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    pub fn reset(&mut self) {
        self.levels.iter_mut().for_each(|level| *level = 0.0);
    }

    /// Analyses one block and returns an input event per band.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<Vec<InputEvent>> {
        if samples.len() < 2 * self.bands {
            return Err(RouterError::InvalidInput(
                "audio blocks need at least two samples per band",
            ));
        }

        let bands = self.bands;
        let peaks = self.band_peaks(samples)?;
        for (level, peak) in self.levels.iter_mut().zip(peaks) {
            let target = (peak * self.gain).clamp(0.0, 1.0);
            *level = *level * self.smoothing + target * (1.0 - self.smoothing);
        }

        Ok((0..bands)
            .map(|index| {
                InputEvent::new(
                    band_input_id(index),
                    f64::from(self.levels[index]),
                    InputMeta::of(InputKind::Audio),
                )
            })
            .collect())
    }

    /// Peak normalised magnitude in each band. A full-scale sine reads ~1.
    fn band_peaks(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let len = samples.len();
        let bands = self.bands;
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = len as f32 / 4.0;
        let edges = band_edges(fft.spectrum.len() - 1, bands);
        Ok(edges
            .windows(2)
            .map(|range| {
                fft.spectrum[range[0]..range[1]]
                    .iter()
                    .map(|bin| bin.norm() / scale)
                    .fold(0.0_f32, f32::max)
            })
            .collect())
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let stale = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);
        if stale {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft
            .get_or_insert_with(|| FftResources::plan(planner, size))
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for AudioAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioAnalyser")
            .field("bands", &self.bands)
            .field("smoothing", &self.smoothing)
            .field("gain", &self.gain)
            .field("levels", &self.levels)
            .finish()
    }
}

/// Bin boundaries of `bands` log-spaced bands over bins `1..=last_bin`.
/// Every band holds at least one bin.
fn band_edges(last_bin: usize, bands: usize) -> Vec<usize> {
    let top = last_bin.max(bands) as f32;
    let mut edges = Vec::with_capacity(bands + 1);
    edges.push(1);
    for index in 1..bands {
        let edge = top.powf(index as f32 / bands as f32).floor() as usize;
        let previous = edges[index - 1];
        edges.push(edge.max(previous + 1));
    }
    edges.push((last_bin + 1).max(edges[bands - 1] + 1));
    edges
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
