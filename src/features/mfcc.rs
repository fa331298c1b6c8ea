//! # MFCC Extraction
//!
//! Turns a [`Waveform`] into a `[n_mfcc × n_frames]` [`FeatureMatrix`] with the same
//! conventions librosa uses by default:
//!
//! 1. Centered STFT: the signal is zero-padded by `n_fft / 2` on both sides and
//!    windowed with a periodic Hann window every `hop_length` samples.
//! 2. Power spectrum `|X|²`.
//! 3. Slaney-scale mel filterbank with Slaney area normalisation.
//! 4. `power_to_db` with `ref = 1.0`, `amin = 1e-10`, `top_db = 80`.
//! 5. Orthonormal DCT-II over the mel axis, first `n_mfcc` coefficients kept.
//!
//! The frame count is `1 + len / hop_length`.
//!
//! The filterbank, window and DCT basis are computed once in
//! [`MfccExtractor::new`]. Extraction is then a fixed sequence of float operations, so
//! identical input gives bit-identical output.

use crate::audio::Waveform;
use crate::config::FeatureConfig;
use crate::features::FeatureMatrix;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

const AMIN: f32 = 1e-10;
const TOP_DB: f32 = 80.0;

pub struct MfccExtractor {
    params: FeatureConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// `[n_mels × (n_fft/2 + 1)]`, row-major.
    mel_basis: Vec<f32>,
    /// `[n_mfcc × n_mels]`, row-major.
    dct_basis: Vec<f32>,
}

impl fmt::Debug for MfccExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfccExtractor")
            .field("params", &self.params)
            .finish()
    }
}

impl MfccExtractor {
    pub fn new(params: FeatureConfig) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(params.n_fft);
        let window = hann_window(params.n_fft);
        let mel_basis = mel_filterbank(params.sample_rate, params.n_fft, params.n_mels);
        let dct_basis = dct_ortho_basis(params.n_mfcc, params.n_mels);

        Self {
            params,
            fft,
            window,
            mel_basis,
            dct_basis,
        }
    }

    pub fn params(&self) -> &FeatureConfig {
        &self.params
    }

    /// Number of frames produced for `n_samples` input samples.
    pub fn frame_count(&self, n_samples: usize) -> usize {
        1 + n_samples / self.params.hop_length
    }

    pub fn extract(&self, waveform: &Waveform) -> FeatureMatrix {
        let n_fft = self.params.n_fft;
        let n_bins = n_fft / 2 + 1;
        let n_mels = self.params.n_mels;
        let n_mfcc = self.params.n_mfcc;
        let hop = self.params.hop_length;

        // the right side takes the extra sample when n_fft is odd
        let pad = n_fft / 2;
        let mut padded = vec![0f32; waveform.samples.len() + pad + (n_fft - pad)];
        padded[pad..pad + waveform.samples.len()].copy_from_slice(&waveform.samples);

        let n_frames = self.frame_count(waveform.samples.len());

        // mel power spectrogram in dB, [n_frames × n_mels]
        let mut mel_db = vec![0f32; n_frames * n_mels];
        let mut buffer = vec![Complex::new(0f32, 0f32); n_fft];
        let mut power = vec![0f32; n_bins];

        for frame in 0..n_frames {
            let start = frame * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (bin, p) in power.iter_mut().enumerate() {
                *p = buffer[bin].norm_sqr();
            }

            let out = &mut mel_db[frame * n_mels..(frame + 1) * n_mels];
            for (m, value) in out.iter_mut().enumerate() {
                let weights = &self.mel_basis[m * n_bins..(m + 1) * n_bins];
                let energy: f32 = weights.iter().zip(&power).map(|(w, p)| w * p).sum();
                *value = 10.0 * energy.max(AMIN).log10();
            }
        }

        let peak = mel_db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - TOP_DB;
        for value in mel_db.iter_mut() {
            *value = value.max(floor);
        }

        let mut data = vec![0f32; n_mfcc * n_frames];
        for k in 0..n_mfcc {
            let basis = &self.dct_basis[k * n_mels..(k + 1) * n_mels];
            for frame in 0..n_frames {
                let mels = &mel_db[frame * n_mels..(frame + 1) * n_mels];
                data[k * n_frames + frame] = basis.iter().zip(mels).map(|(b, x)| b * x).sum();
            }
        }

        FeatureMatrix::new(n_mfcc, n_frames, data)
            .unwrap_or_else(|| FeatureMatrix::zeros(n_mfcc, n_frames))
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos()) as f32)
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Triangular Slaney filters from 0 Hz to Nyquist, area-normalised.
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<f32> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|i| i as f64 * nyquist / (n_bins - 1) as f64)
        .collect();

    let mel_max = hz_to_mel(nyquist);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut weights = vec![0f32; n_mels * n_bins];
    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (right - left);
        for (bin, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            let w = lower.min(upper).max(0.0);
            weights[m * n_bins + bin] = (w * enorm) as f32;
        }
    }
    weights
}

fn dct_ortho_basis(n_out: usize, n_in: usize) -> Vec<f32> {
    let mut basis = vec![0f32; n_out * n_in];
    for k in 0..n_out {
        let scale = if k == 0 {
            (1.0 / n_in as f64).sqrt()
        } else {
            (2.0 / n_in as f64).sqrt()
        };
        for n in 0..n_in {
            let angle = PI * k as f64 * (2 * n + 1) as f64 / (2 * n_in) as f64;
            basis[k * n_in + n] = (scale * angle.cos()) as f32;
        }
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(seconds: f32, sample_rate: u32, freq: f32) -> Waveform {
        let n = (seconds * sample_rate as f32) as usize;
        let samples = (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        Waveform::new(samples, sample_rate)
    }

    #[test]
    fn test_two_and_a_half_seconds_gives_76_frames() {
        let extractor = MfccExtractor::new(FeatureConfig::default());
        let matrix = extractor.extract(&tone(2.5, 24_000, 440.0));
        assert_eq!(matrix.shape(), (13, 76));
        assert!(matrix.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_odd_window_stays_in_bounds() {
        let extractor = MfccExtractor::new(FeatureConfig {
            n_fft: 2047,
            ..FeatureConfig::default()
        });
        let matrix = extractor.extract(&tone(0.5, 24_000, 440.0));
        assert_eq!(matrix.shape(), (13, extractor.frame_count(12_000)));
        assert!(matrix.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_extraction_is_bit_identical() {
        let extractor = MfccExtractor::new(FeatureConfig::default());
        let waveform = tone(1.0, 24_000, 220.0);
        let first = extractor.extract(&waveform);
        let second = extractor.extract(&waveform);
        let first_bits: Vec<u32> = first.data().iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.data().iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_filterbank_rows_are_nonnegative_and_nonempty() {
        let fb = mel_filterbank(24_000, 2048, 128);
        let n_bins = 1025;
        for m in 0..128 {
            let row = &fb[m * n_bins..(m + 1) * n_bins];
            assert!(row.iter().all(|w| *w >= 0.0));
            assert!(row.iter().any(|w| *w > 0.0), "mel band {} is empty", m);
        }
    }

    #[test]
    fn test_dct_basis_is_orthonormal() {
        let n = 16;
        let basis = dct_ortho_basis(n, n);
        for a in 0..n {
            for b in 0..n {
                let dot: f32 = (0..n).map(|i| basis[a * n + i] * basis[b * n + i]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_mel_scale_roundtrip_is_monotonic() {
        let mut previous = -1.0;
        for hz in [0.0, 200.0, 999.0, 1000.0, 4000.0, 12_000.0] {
            let mel = hz_to_mel(hz);
            assert!(mel > previous);
            assert!((mel_to_hz(mel) - hz).abs() < 1e-6);
            previous = mel;
        }
    }
}
