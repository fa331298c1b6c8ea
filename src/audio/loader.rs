//! # Waveform Loading
//!
//! Decodes any container/codec symphonia understands, averages channels down to
//! mono and resamples to the pipeline's fixed rate.
//!
//! ## Resampling
//! Band-limited sinc interpolation (rubato `SincFixedIn`). The input is fed in fixed
//! chunks and the tail is flushed with empty partial calls. The resampler's own delay
//! is cut from the front, and the result is truncated to exactly
//! `ceil(len × target / source)` samples. The same input therefore always yields the
//! same output length, whatever the chunking.

use crate::audio::Waveform;
use crate::error::PipelineError;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct WaveformLoader {
    target_rate: u32,
}

impl WaveformLoader {
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Read `path` into a mono waveform at the target rate.
    ///
    /// Fails with `io_error` when the file is missing or cannot be decoded.
    pub fn load(&self, path: &Path) -> Result<Waveform, PipelineError> {
        let (samples, source_rate) = decode_mono(path)?;
        debug!(
            path = %path.display(),
            samples = samples.len(),
            source_rate,
            target_rate = self.target_rate,
            "decoded audio"
        );

        let samples = resample(&samples, source_rate, self.target_rate)
            .map_err(|e| PipelineError::io(path, format!("resampling failed: {}", e)))?;
        Ok(Waveform::new(samples, self.target_rate))
    }
}

fn decode_mono(path: &Path) -> Result<(Vec<f32>, u32), PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PipelineError::io(path, format!("unrecognised format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PipelineError::io(path, "no audio track"))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::io(path, "unknown sample rate"))?;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::io(path, format!("unsupported codec: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(PipelineError::io(path, e)),
        };
        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    Ok((downmix(&interleaved, channels), sample_rate))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio from `from_hz` to `to_hz`.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> anyhow::Result<Vec<f32>> {
    if from_hz == 0 || to_hz == 0 {
        anyhow::bail!("invalid sample rates: {} -> {}", from_hz, to_hz);
    }
    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let expected = (samples.len() as f64 * ratio).ceil() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)?;
    let delay = resampler.output_delay();

    let mut output: Vec<f32> = Vec::with_capacity(expected + delay);
    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let out = resampler.process(&vec![chunk.to_vec()], None)?;
        output.extend_from_slice(&out[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let out = resampler.process_partial(Some(&vec![rest.to_vec()]), None)?;
        output.extend_from_slice(&out[0]);
    }

    // Each flush emits at most one chunk worth of output, bound the loop accordingly.
    let max_flushes = (delay + expected) / RESAMPLE_CHUNK.max(1) + 4;
    let mut flushes = 0;
    while output.len() < delay + expected && flushes < max_flushes {
        let out = resampler.process_partial::<Vec<f32>>(None, None)?;
        output.extend_from_slice(&out[0]);
        flushes += 1;
    }

    let mut trimmed: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    trimmed.resize(expected, 0.0);
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::write_tone_wav;

    #[test]
    fn test_load_resamples_to_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 48_000, 1.0, 0.0, 0.0);

        let waveform = WaveformLoader::new(24_000).load(&path).unwrap();
        assert_eq!(waveform.sample_rate, 24_000);
        assert_eq!(waveform.len(), 24_000);
        let peak = waveform.samples.iter().fold(0f32, |acc, v| acc.max(v.abs()));
        assert!(peak > 0.2 && peak < 1.0, "peak {}", peak);
    }

    #[test]
    fn test_load_keeps_native_rate_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 24_000, 0.5, 0.0, 0.0);

        let waveform = WaveformLoader::new(24_000).load(&path).unwrap();
        assert_eq!(waveform.len(), 12_000);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = WaveformLoader::new(24_000)
            .load(Path::new("/definitely/not/here.wav"))
            .unwrap_err();
        assert_eq!(err.kind(), "io_error");
    }

    #[test]
    fn test_garbage_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let err = WaveformLoader::new(24_000).load(&path).unwrap_err();
        assert_eq!(err.kind(), "io_error");
    }

    #[test]
    fn test_downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_resample_length_is_exact() {
        let input = vec![0.1f32; 4410];
        let out = resample(&input, 44_100, 24_000).unwrap();
        assert_eq!(out.len(), 2400);
    }
}
