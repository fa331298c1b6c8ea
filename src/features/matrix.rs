//! # Feature Matrices and Segments
//!
//! A [`FeatureMatrix`] is a row-major `[n_coefficients × n_frames]` block of MFCCs.
//! A [`Segment`] is the same thing with a fixed frame count.
//!
//! The binary codec is what the on-disk cache stores. Layout, little-endian:
//!
//! | field            | type          |
//! |------------------|---------------|
//! | magic            | `b"MFCC"`     |
//! | version          | `u8`          |
//! | n_coefficients   | `u32`         |
//! | n_frames         | `u32`         |
//! | values           | `f32` × rows·cols, row-major |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

const MAGIC: &[u8; 4] = b"MFCC";
const VERSION: u8 = 1;
/// Bytes before the values: magic, version and two `u32` dimensions.
pub const HEADER_LEN: u64 = 4 + 1 + 4 + 4;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_coefficients: usize,
    n_frames: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Build a matrix from row-major values.
    ///
    /// Returns `None` when `data` does not hold exactly `n_coefficients × n_frames` values.
    pub fn new(n_coefficients: usize, n_frames: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != n_coefficients * n_frames {
            return None;
        }
        Some(Self {
            n_coefficients,
            n_frames,
            data,
        })
    }

    pub fn zeros(n_coefficients: usize, n_frames: usize) -> Self {
        Self {
            n_coefficients,
            n_frames,
            data: vec![0.0; n_coefficients * n_frames],
        }
    }

    pub fn n_coefficients(&self) -> usize {
        self.n_coefficients
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_coefficients, self.n_frames)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, coefficient: usize, frame: usize) -> f32 {
        self.data[coefficient * self.n_frames + frame]
    }

    /// Copy out the frame columns `[start, start + width)` as a segment.
    pub fn slice_frames(&self, start: usize, width: usize) -> Segment {
        let mut data = Vec::with_capacity(self.n_coefficients * width);
        for row in self.data.chunks_exact(self.n_frames.max(1)).take(self.n_coefficients) {
            data.extend_from_slice(&row[start..start + width]);
        }
        Segment {
            n_coefficients: self.n_coefficients,
            width,
            data,
        }
    }

    /// Encode the matrix. Non-finite values are refused so the cache never stores them.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "feature matrix holds non-finite values",
            ));
        }
        writer.write_all(MAGIC)?;
        writer.write_u8(VERSION)?;
        writer.write_u32::<LittleEndian>(self.n_coefficients as u32)?;
        writer.write_u32::<LittleEndian>(self.n_frames as u32)?;
        for value in &self.data {
            writer.write_f32::<LittleEndian>(*value)?;
        }
        Ok(())
    }

    /// Decode a matrix written by [`FeatureMatrix::write_to`].
    ///
    /// Truncated input, a wrong magic and an unknown version all surface as
    /// `InvalidData`/`UnexpectedEof` so the cache can treat them as misses.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Self::read_checked(reader, None, u64::MAX)
    }

    /// Like [`FeatureMatrix::read_from`], but rejects the header before any values
    /// are read when it names a different coefficient count than `expected_coefficients`
    /// or claims more value bytes than `payload_limit`.
    pub fn read_checked<R: Read>(
        reader: &mut R,
        expected_coefficients: Option<usize>,
        payload_limit: u64,
    ) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported version {}", version),
            ));
        }
        let n_coefficients = reader.read_u32::<LittleEndian>()? as usize;
        let n_frames = reader.read_u32::<LittleEndian>()? as usize;

        if let Some(expected) = expected_coefficients {
            if n_coefficients != expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} coefficients, expected {}", n_coefficients, expected),
                ));
            }
        }
        let len = n_coefficients
            .checked_mul(n_frames)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "shape overflow"))?;
        let payload = (len as u64)
            .checked_mul(4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "shape overflow"))?;
        if payload > payload_limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("header claims {} value bytes, only {} present", payload, payload_limit),
            ));
        }

        // grow with what is actually read, never with what the header claims
        let mut data = Vec::with_capacity(len.min(READ_CHUNK));
        let mut chunk = vec![0f32; len.min(READ_CHUNK)];
        while data.len() < len {
            let n = (len - data.len()).min(READ_CHUNK);
            reader.read_f32_into::<LittleEndian>(&mut chunk[..n])?;
            data.extend_from_slice(&chunk[..n]);
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "trailing bytes"));
        }

        Ok(Self {
            n_coefficients,
            n_frames,
            data,
        })
    }
}

/// A fixed-width slice of a [`FeatureMatrix`], one training or inference example.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    n_coefficients: usize,
    width: usize,
    data: Vec<f32>,
}

impl Segment {
    pub fn n_coefficients(&self) -> usize {
        self.n_coefficients
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_coefficients, self.width)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(rows: usize, cols: usize) -> FeatureMatrix {
        let data = (0..rows * cols).map(|v| v as f32).collect();
        FeatureMatrix::new(rows, cols, data).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(FeatureMatrix::new(2, 3, vec![0.0; 5]).is_none());
    }

    #[test]
    fn test_slice_frames_takes_columns() {
        let matrix = ramp(2, 5);
        let segment = matrix.slice_frames(1, 3);
        assert_eq!(segment.shape(), (2, 3));
        assert_eq!(segment.data(), &[1.0, 2.0, 3.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_codec_detects_truncation() {
        let matrix = ramp(13, 4);
        let mut bytes = Vec::new();
        matrix.write_to(&mut bytes).unwrap();

        let decoded = FeatureMatrix::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, matrix);

        let truncated = &bytes[..bytes.len() - 3];
        assert!(FeatureMatrix::read_from(&mut &truncated[..]).is_err());

        let mut garbage = bytes.clone();
        garbage[0] = b'X';
        assert!(FeatureMatrix::read_from(&mut garbage.as_slice()).is_err());
    }

    fn huge_header() -> Vec<u8> {
        let mut bytes = b"MFCC\x01".to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes
    }

    #[test]
    fn test_huge_header_is_rejected_without_allocating() {
        let bytes = huge_header();

        let err = FeatureMatrix::read_checked(&mut bytes.as_slice(), None, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = FeatureMatrix::read_checked(&mut bytes.as_slice(), Some(13), u64::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // unbounded reads grow with the data actually present and hit EOF
        let err = FeatureMatrix::read_from(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_exact_payload_limit_is_accepted() {
        let matrix = ramp(13, 4);
        let mut bytes = Vec::new();
        matrix.write_to(&mut bytes).unwrap();

        let payload = bytes.len() as u64 - HEADER_LEN;
        let decoded =
            FeatureMatrix::read_checked(&mut bytes.as_slice(), Some(13), payload).unwrap();
        assert_eq!(decoded, matrix);
        assert!(FeatureMatrix::read_checked(&mut bytes.as_slice(), Some(13), payload - 1).is_err());
    }

    #[test]
    fn test_non_finite_values_are_not_encoded() {
        let mut data = vec![0.0; 6];
        data[4] = f32::NAN;
        let matrix = FeatureMatrix::new(2, 3, data).unwrap();
        let mut bytes = Vec::new();
        assert_eq!(
            matrix.write_to(&mut bytes).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
