//! # Feature Cache
//!
//! A write-through, content-addressed store of MFCC matrices on disk.
//!
//! ## Read-or-create
//! [`FeatureCache::get_or_compute`] opens the artifact directly. There is no
//! separate existence check that could go stale between the check and the read.
//! Anything that does not decode cleanly counts as a miss and is recomputed. That
//! covers a missing file, a truncated or foreign file, and a matrix with the wrong
//! coefficient count.
//!
//! ## Concurrency
//! Writers produce a uniquely named temp file in the target directory and rename it
//! into place. Readers see either the old complete file or the new complete file.
//! Two workers racing on the same key may both compute. Both renames succeed and the
//! last one wins with an identical value.
//!
//! ## Failure behaviour
//! - a failed computation writes nothing, so the next call retries from scratch
//! - a failed write surfaces `cache_write_error` and leaves any previous entry intact

use crate::audio::WaveformLoader;
use crate::config::{AppConfig, CacheKeying};
use crate::error::PipelineError;
use crate::features::matrix::HEADER_LEN;
use crate::features::{FeatureMatrix, MfccExtractor};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const ARTIFACT_EXTENSION: &str = "mfcc";

/// Produces a feature matrix for one audio source on a cache miss.
pub trait FeatureComputer: Send + Sync {
    fn compute(&self, source: &Path) -> Result<FeatureMatrix, PipelineError>;
}

/// Decode, resample and extract MFCCs.
#[derive(Debug)]
pub struct AudioFeatureComputer {
    loader: WaveformLoader,
    extractor: MfccExtractor,
}

impl AudioFeatureComputer {
    pub fn new(loader: WaveformLoader, extractor: MfccExtractor) -> Self {
        Self { loader, extractor }
    }
}

impl FeatureComputer for AudioFeatureComputer {
    fn compute(&self, source: &Path) -> Result<FeatureMatrix, PipelineError> {
        let waveform = self.loader.load(source)?;
        Ok(self.extractor.extract(&waveform))
    }
}

#[derive(Clone)]
pub struct FeatureCache {
    computer: Arc<dyn FeatureComputer>,
    root: Option<PathBuf>,
    keying: CacheKeying,
    n_coefficients: usize,
}

impl FeatureCache {
    /// `root = None` stores each artifact next to its source.
    pub fn new(
        computer: Arc<dyn FeatureComputer>,
        root: Option<PathBuf>,
        keying: CacheKeying,
        n_coefficients: usize,
    ) -> Self {
        Self {
            computer,
            root,
            keying,
            n_coefficients,
        }
    }

    /// Cache backed by the standard loader and extractor for `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let computer = AudioFeatureComputer::new(
            WaveformLoader::new(config.features.sample_rate),
            MfccExtractor::new(config.features.clone()),
        );
        Self::new(
            Arc::new(computer),
            config.pipeline.cache_dir.clone(),
            config.pipeline.cache_keying,
            config.features.n_mfcc,
        )
    }

    /// Where the artifact for `source` lives.
    ///
    /// | layout    | keying    | artifact                         |
    /// |-----------|-----------|----------------------------------|
    /// | alongside | path      | `<source>.mfcc`                  |
    /// | alongside | content   | `<source dir>/<sha256>.mfcc`     |
    /// | root      | path      | `<root>/<sha256(path)>.mfcc`     |
    /// | root      | content   | `<root>/<sha256(bytes)>.mfcc`    |
    pub fn artifact_path(&self, source: &Path) -> Result<PathBuf, PipelineError> {
        match (&self.root, self.keying) {
            (None, CacheKeying::Path) => {
                let mut name = source.as_os_str().to_os_string();
                name.push(".");
                name.push(ARTIFACT_EXTENSION);
                Ok(PathBuf::from(name))
            }
            (None, CacheKeying::Content) => {
                let dir = source.parent().unwrap_or_else(|| Path::new("."));
                Ok(dir.join(artifact_name(&content_digest(source)?)))
            }
            (Some(root), CacheKeying::Path) => {
                let key = source.to_string_lossy();
                Ok(root.join(artifact_name(&hex_digest(key.as_bytes()))))
            }
            (Some(root), CacheKeying::Content) => {
                Ok(root.join(artifact_name(&content_digest(source)?)))
            }
        }
    }

    /// Return the cached matrix for `source`, computing and persisting it on a miss.
    pub fn get_or_compute(&self, source: &Path) -> Result<FeatureMatrix, PipelineError> {
        let artifact = self.artifact_path(source)?;

        if let Some(matrix) = self.read_artifact(&artifact) {
            debug!(source = %source.display(), "feature cache hit");
            return Ok(matrix);
        }

        debug!(source = %source.display(), "feature cache miss");
        let matrix = self.computer.compute(source)?;
        persist(&artifact, &matrix)?;
        Ok(matrix)
    }

    fn read_artifact(&self, artifact: &Path) -> Option<FeatureMatrix> {
        let file = match File::open(artifact) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(artifact = %artifact.display(), error = %e, "unreadable cache entry, recomputing");
                return None;
            }
        };

        // the header is checked against the real file size before any value is read
        let payload_limit = match file.metadata() {
            Ok(meta) => meta.len().saturating_sub(HEADER_LEN),
            Err(e) => {
                warn!(artifact = %artifact.display(), error = %e, "unreadable cache entry, recomputing");
                return None;
            }
        };

        match FeatureMatrix::read_checked(
            &mut BufReader::new(file),
            Some(self.n_coefficients),
            payload_limit,
        ) {
            Ok(matrix) => Some(matrix),
            Err(e) => {
                warn!(
                    artifact = %artifact.display(),
                    expected_coefficients = self.n_coefficients,
                    error = %e,
                    "corrupt or mismatched cache entry, recomputing"
                );
                None
            }
        }
    }
}

fn persist(artifact: &Path, matrix: &FeatureMatrix) -> Result<(), PipelineError> {
    let cache_write = |source: std::io::Error| PipelineError::CacheWrite {
        path: artifact.to_path_buf(),
        source,
    };

    let dir = artifact
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(cache_write)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(cache_write)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        matrix.write_to(&mut writer).map_err(cache_write)?;
        writer.flush().map_err(cache_write)?;
    }
    tmp.persist(artifact).map_err(|e| cache_write(e.error))?;
    Ok(())
}

fn artifact_name(key: &str) -> String {
    format!("{}.{}", key, ARTIFACT_EXTENSION)
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn content_digest(source: &Path) -> Result<String, PipelineError> {
    let mut file = File::open(source).map_err(|e| PipelineError::io(source, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| PipelineError::io(source, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}
