//! WAV fixtures for unit tests.

use std::fs::File;
use std::path::Path;

const WAV_FORMAT_PCM: u16 = 1;

/// Write a 16-bit mono WAV: silence, a 440 Hz tone at half scale, silence.
pub fn write_tone_wav(
    path: &Path,
    sample_rate: u32,
    tone_secs: f32,
    leading_silence_secs: f32,
    trailing_silence_secs: f32,
) {
    let frames = |secs: f32| (secs * sample_rate as f32).round() as usize;
    let mut samples = vec![0i16; frames(leading_silence_secs)];
    samples.extend((0..frames(tone_secs)).map(|i| {
        let t = i as f32 / sample_rate as f32;
        (0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16
    }));
    samples.extend(std::iter::repeat(0i16).take(frames(trailing_silence_secs)));

    let header = wav::Header::new(WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut file = File::create(path).unwrap();
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file).unwrap();
}
