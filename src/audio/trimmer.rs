//! # Silence Trimming
//!
//! Strips leading and trailing silence from request-time uploads before features are
//! extracted.
//!
//! Non-WAV uploads are first converted with an external tool (`ffmpeg` by default).
//! Loudness is then measured in fixed chunks (10 ms by default) as dBFS,
//! `20·log10(rms)` with full scale at 1.0. The scan advances from the front while a
//! chunk stays below the threshold, and again from the back. The slice in between is
//! written out in the input's own sample format.
//!
//! If nothing exceeds the threshold both cutoffs meet and the result holds zero
//! frames. Callers turn that into `empty_audio`.

use crate::config::TrimConfig;
use crate::error::PipelineError;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wav::BitDepth;

/// Result of trimming one file.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimOutcome {
    /// The trimmed WAV.
    pub path: PathBuf,
    pub sample_rate: u32,
    pub leading_frames: usize,
    pub trailing_frames: usize,
    pub kept_frames: usize,
}

#[derive(Debug, Clone)]
pub struct SilenceTrimmer {
    config: TrimConfig,
}

impl SilenceTrimmer {
    pub fn new(config: TrimConfig) -> Self {
        Self { config }
    }

    /// Trim `input` and write the result to `output`, or over the WAV version of
    /// `input` when no output is given.
    pub fn trim(&self, input: &Path, output: Option<&Path>) -> Result<TrimOutcome, PipelineError> {
        let wav_path = if is_wav(input) {
            input.to_path_buf()
        } else {
            let target = input.with_extension("wav");
            self.convert(input, &target)?;
            target
        };

        let file = File::open(&wav_path).map_err(|e| PipelineError::io(&wav_path, e))?;
        let mut reader = BufReader::new(file);
        let (header, data) =
            wav::read(&mut reader).map_err(|e| PipelineError::io(&wav_path, e))?;

        let sample_rate = header.sampling_rate;
        let channels = usize::from(header.channel_count.max(1));
        let normalized = normalized_samples(&data);
        let total_frames = normalized.len() / channels;
        let chunk_frames =
            ((sample_rate as u64 * self.config.chunk_ms as u64) / 1000).max(1) as usize;

        let threshold = self.config.threshold_dbfs;
        let leading = leading_silence(&normalized, channels, chunk_frames, threshold);
        let trailing = trailing_silence(&normalized, channels, chunk_frames, threshold);
        let (start, end) = if leading + trailing >= total_frames {
            (0, 0)
        } else {
            (leading, total_frames - trailing)
        };

        let target = output.map(Path::to_path_buf).unwrap_or_else(|| wav_path.clone());
        let sliced = slice_frames(&data, channels, start, end);
        write_wav_atomically(&target, header, &sliced)?;

        let outcome = TrimOutcome {
            path: target,
            sample_rate,
            leading_frames: leading.min(total_frames),
            trailing_frames: trailing.min(total_frames),
            kept_frames: end - start,
        };
        debug!(
            input = %input.display(),
            leading = outcome.leading_frames,
            trailing = outcome.trailing_frames,
            kept = outcome.kept_frames,
            "trimmed silence"
        );
        Ok(outcome)
    }

    /// Run the external converter with a deadline. The child is killed on timeout.
    fn convert(&self, input: &Path, target: &Path) -> Result<(), PipelineError> {
        if !input.exists() {
            return Err(PipelineError::io(input, "file not found"));
        }
        info!(input = %input.display(), converter = %self.config.converter, "converting to wav");

        let mut child = Command::new(&self.config.converter)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::conversion(
                    input,
                    format!("cannot start '{}': {}", self.config.converter, e),
                )
            })?;

        let timeout = Duration::from_secs(self.config.conversion_timeout_secs);
        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(input = %input.display(), "converter exceeded its deadline, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PipelineError::timeout(
                        format!("conversion of {}", input.display()),
                        timeout,
                    ));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(e) => return Err(PipelineError::conversion(input, e)),
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(PipelineError::conversion(
                input,
                format!("{} exited with {}: {}", self.config.converter, status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Interleaved samples scaled to `[-1, 1]`.
fn normalized_samples(data: &BitDepth) -> Vec<f32> {
    match data {
        BitDepth::Eight(v) => v.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        BitDepth::Sixteen(v) => v.iter().map(|&s| s as f32 / 32768.0).collect(),
        BitDepth::TwentyFour(v) => v.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        BitDepth::ThirtyTwoFloat(v) => v.clone(),
        BitDepth::Empty => Vec::new(),
    }
}

/// Loudness of interleaved samples in dBFS. Digital silence is `-inf`.
pub fn dbfs(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }
    let mean_square =
        samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64;
    let rms = mean_square.sqrt();
    if rms == 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

/// Frames of silence at the start, in whole chunks. May overshoot the total length
/// when everything is silent.
fn leading_silence(samples: &[f32], channels: usize, chunk_frames: usize, threshold: f64) -> usize {
    let total_frames = samples.len() / channels;
    let mut cut = 0;
    while cut < total_frames {
        let end = (cut + chunk_frames).min(total_frames);
        if dbfs(&samples[cut * channels..end * channels]) >= threshold {
            break;
        }
        cut += chunk_frames;
    }
    cut
}

fn trailing_silence(samples: &[f32], channels: usize, chunk_frames: usize, threshold: f64) -> usize {
    let total_frames = samples.len() / channels;
    let mut cut = 0;
    while cut < total_frames {
        let end = total_frames - cut;
        let start = end.saturating_sub(chunk_frames);
        if dbfs(&samples[start * channels..end * channels]) >= threshold {
            break;
        }
        cut += chunk_frames;
    }
    cut
}

fn slice_frames(data: &BitDepth, channels: usize, start: usize, end: usize) -> BitDepth {
    let range = start * channels..end * channels;
    match data {
        BitDepth::Eight(v) => BitDepth::Eight(v[range].to_vec()),
        BitDepth::Sixteen(v) => BitDepth::Sixteen(v[range].to_vec()),
        BitDepth::TwentyFour(v) => BitDepth::TwentyFour(v[range].to_vec()),
        BitDepth::ThirtyTwoFloat(v) => BitDepth::ThirtyTwoFloat(v[range].to_vec()),
        BitDepth::Empty => BitDepth::Empty,
    }
}

fn write_wav_atomically(
    target: &Path,
    header: wav::Header,
    data: &BitDepth,
) -> Result<(), PipelineError> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(target, e))?;
    wav::write(header, data, tmp.as_file_mut()).map_err(|e| PipelineError::io(target, e))?;
    tmp.persist(target)
        .map_err(|e| PipelineError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::write_tone_wav;

    fn trimmer() -> SilenceTrimmer {
        SilenceTrimmer::new(TrimConfig::default())
    }

    #[test]
    fn test_strips_leading_and_trailing_silence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("padded.wav");
        let output = dir.path().join("trimmed.wav");
        write_tone_wav(&input, 24_000, 1.0, 0.5, 0.5);

        let outcome = trimmer().trim(&input, Some(&output)).unwrap();
        assert_eq!(outcome.leading_frames, 12_000);
        assert_eq!(outcome.trailing_frames, 12_000);
        assert_eq!(outcome.kept_frames, 24_000);
        assert_eq!(outcome.path, output);

        let (_, data) = wav::read(&mut File::open(&output).unwrap()).unwrap();
        assert_eq!(normalized_samples(&data).len(), 24_000);

        // the source is untouched when an explicit output is given
        let (_, original) = wav::read(&mut File::open(&input).unwrap()).unwrap();
        assert_eq!(normalized_samples(&original).len(), 48_000);
    }

    #[test]
    fn test_overwrites_input_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.wav");
        write_tone_wav(&input, 24_000, 0.5, 0.25, 0.0);

        let outcome = trimmer().trim(&input, None).unwrap();
        assert_eq!(outcome.path, input);
        assert_eq!(outcome.kept_frames, 12_000);
    }

    #[test]
    fn test_all_silent_input_keeps_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("silence.wav");
        write_tone_wav(&input, 24_000, 0.0, 1.0, 0.0);

        let outcome = trimmer().trim(&input, None).unwrap();
        assert_eq!(outcome.kept_frames, 0);
    }

    #[test]
    fn test_missing_converter_is_conversion_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp3");
        std::fs::write(&input, b"ID3 not really an mp3").unwrap();

        let trimmer = SilenceTrimmer::new(TrimConfig {
            converter: "no-such-converter-binary".to_string(),
            ..TrimConfig::default()
        });
        let err = trimmer.trim(&input, None).unwrap_err();
        assert_eq!(err.kind(), "conversion_error");
    }

    #[test]
    fn test_missing_wav_is_io_error() {
        let err = trimmer()
            .trim(Path::new("/no/such/dir/clip.wav"), None)
            .unwrap_err();
        assert_eq!(err.kind(), "io_error");
    }

    #[test]
    fn test_dbfs_reference_points() {
        assert_eq!(dbfs(&[0.0; 8]), f64::NEG_INFINITY);
        assert!((dbfs(&[1.0, -1.0]) - 0.0).abs() < 1e-9);
        assert!((dbfs(&[0.1; 4]) + 20.0).abs() < 1e-9);
    }
}
