//! Mel power spectrogram and its rasterization to an RGB image.
//!
//! Frames are centered (zero padded by `n_fft / 2`), windowed with a periodic
//! Hann window, and projected onto a Slaney-style mel filterbank with area
//! normalization.

use image::{Rgb, RgbImage};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

pub const DEFAULT_N_FFT: usize = 2048;
pub const DEFAULT_HOP_LENGTH: usize = 512;
pub const DEFAULT_N_MELS: usize = 128;
pub const AMIN: f32 = 1e-10;
pub const TOP_DB: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrogramConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl SpectrogramConfig {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            n_fft: DEFAULT_N_FFT,
            hop_length: DEFAULT_HOP_LENGTH,
            n_mels: DEFAULT_N_MELS,
        }
    }
}

pub struct MelSpectrogram {
    config: SpectrogramConfig,
    window: Vec<f32>,
    filters: Vec<Vec<f32>>,
    centers_hz: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl MelSpectrogram {
    pub fn new(config: SpectrogramConfig) -> Self {
        let n_fft = config.n_fft;
        let window = (0..n_fft)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n_fft as f32).cos())
            .collect();
        let (filters, centers_hz) = mel_filterbank(config.sample_rate, n_fft, config.n_mels);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);

        Self {
            config,
            window,
            filters,
            centers_hz,
            fft,
        }
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Center frequency of each mel band, low to high.
    pub fn center_frequencies(&self) -> &[f32] {
        &self.centers_hz
    }

    /// Mel power per frame: `result[frame][mel]`.
    pub fn power(&self, signal: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;

        let mut padded = vec![0.0f32; signal.len() + 2 * pad];
        padded[pad..pad + signal.len()].copy_from_slice(signal);

        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let n_bins = n_fft / 2 + 1;

        let mut buffer = vec![Complex32::default(); n_fft];
        let mut scratch = vec![Complex32::default(); self.fft.get_inplace_scratch_len()];
        let mut spectrum = vec![0.0f32; n_bins];
        let mut frames = Vec::with_capacity(n_frames);

        for frame in 0..n_frames {
            let start = frame * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex32::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            for (bin, value) in spectrum.iter_mut().enumerate() {
                *value = buffer[bin].norm_sqr();
            }

            let mel: Vec<f32> = self
                .filters
                .iter()
                .map(|weights| weights.iter().zip(&spectrum).map(|(w, p)| w * p).sum())
                .collect();
            frames.push(mel);
        }

        frames
    }
}

/// Converts power to decibels relative to the peak, floored `TOP_DB` below it.
pub fn power_to_db(power: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let peak = power
        .iter()
        .flatten()
        .copied()
        .fold(0.0f32, f32::max);
    let ref_db = 10.0 * peak.max(AMIN).log10();

    let mut db: Vec<Vec<f32>> = power
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|&p| 10.0 * p.max(AMIN).log10() - ref_db)
                .collect()
        })
        .collect();

    let max_db = db
        .iter()
        .flatten()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    let floor = max_db - TOP_DB;
    for value in db.iter_mut().flatten() {
        *value = value.max(floor);
    }
    db
}

/// Paints `db[frame][mel]` into a `width x height` image: time runs left to
/// right, frequency bottom to top. Values are scaled between the clip's own
/// minimum and maximum.
pub fn rasterize(db: &[Vec<f32>], width: u32, height: u32) -> RgbImage {
    let mut image = RgbImage::new(width, height);
    let n_frames = db.len();
    let n_mels = db.first().map_or(0, Vec::len);
    if n_frames == 0 || n_mels == 0 {
        return image;
    }

    let (vmin, vmax) = db
        .iter()
        .flatten()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = vmax - vmin;

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let frame = (x as usize * n_frames / width as usize).min(n_frames - 1);
        let row_from_bottom = (height - 1 - y) as usize;
        let mel = (row_from_bottom * n_mels / height as usize).min(n_mels - 1);
        let t = if span > f32::EPSILON {
            (db[frame][mel] - vmin) / span
        } else {
            0.0
        };
        *pixel = Rgb(magma(t));
    }

    image
}

const MAGMA_STOPS: [[f32; 3]; 9] = [
    [0.0, 0.0, 4.0],
    [28.0, 16.0, 68.0],
    [79.0, 18.0, 123.0],
    [129.0, 37.0, 129.0],
    [181.0, 54.0, 122.0],
    [229.0, 80.0, 100.0],
    [251.0, 135.0, 97.0],
    [254.0, 194.0, 135.0],
    [252.0, 253.0, 191.0],
];

/// Piecewise-linear approximation of the magma colormap for `t` in `[0, 1]`.
fn magma(t: f32) -> [u8; 3] {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (MAGMA_STOPS.len() - 1) as f32;
    let lo = (scaled.floor() as usize).min(MAGMA_STOPS.len() - 2);
    let frac = scaled - lo as f32;
    let (a, b) = (MAGMA_STOPS[lo], MAGMA_STOPS[lo + 1]);
    [0, 1, 2].map(|c| (a[c] + (b[c] - a[c]) * frac).round().clamp(0.0, 255.0) as u8)
}

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular filters between 0 Hz and Nyquist, each normalized by its
/// bandwidth. Returns the filters and the band center frequencies.
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> (Vec<Vec<f32>>, Vec<f32>) {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f32 / 2.0;
    let fft_freqs: Vec<f32> = (0..n_bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_max = hz_to_mel(nyquist);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let filters = (0..n_mels)
        .map(|m| {
            let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect();

    let centers = hz_points[1..=n_mels].to_vec();
    (filters, centers)
}
