//! # Speaker Metadata
//!
//! Reads the speaker table scraped from the accent archive, selects the speakers a
//! training run uses, and splits them into train and test sets.
//!
//! The CSV is consumed as a flat table keyed by `language_num` (e.g. `english12`),
//! which is also the audio file stem. Unknown columns are ignored.

use crate::config::DatasetConfig;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeakerRecord {
    pub language_num: String,
    pub native_language: String,
    #[serde(default)]
    pub birth_place: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub length_of_english_residence: Option<f64>,
}

pub fn load(path: &Path) -> Result<Vec<SpeakerRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening metadata {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: SpeakerRecord =
            row.with_context(|| format!("parsing metadata {}", path.display()))?;
        records.push(record);
    }
    info!(path = %path.display(), speakers = records.len(), "loaded speaker metadata");
    Ok(records)
}

/// Which speakers take part in a training run.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub languages: Vec<String>,
    pub target_language: String,
    /// Non-target speakers must have a known residence below this many years.
    pub max_residence_years: Option<f64>,
}

impl MetadataFilter {
    pub fn from_config(config: &DatasetConfig) -> Self {
        Self {
            languages: config.languages.clone(),
            target_language: config.target_language.clone(),
            max_residence_years: config.max_residence_years,
        }
    }

    pub fn accepts(&self, record: &SpeakerRecord) -> bool {
        if !self.languages.iter().any(|l| l == &record.native_language) {
            return false;
        }
        if record.native_language == self.target_language {
            return true;
        }
        match self.max_residence_years {
            Some(max) => record
                .length_of_english_residence
                .map(|years| years < max)
                .unwrap_or(false),
            None => true,
        }
    }

    pub fn apply(&self, records: Vec<SpeakerRecord>) -> Vec<SpeakerRecord> {
        let before = records.len();
        let kept: Vec<SpeakerRecord> = records.into_iter().filter(|r| self.accepts(r)).collect();
        debug!(before, after = kept.len(), "filtered speakers");
        kept
    }
}

/// Shuffle with a fixed seed, then put `ceil(n × test_size)` records in the test set.
pub fn split(
    records: &[SpeakerRecord],
    test_size: f64,
    seed: u64,
) -> (Vec<SpeakerRecord>, Vec<SpeakerRecord>) {
    let mut order: Vec<usize> = (0..records.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_test = ((records.len() as f64) * test_size).ceil() as usize;
    let n_test = n_test.min(records.len());
    let test = order[..n_test].iter().map(|&i| records[i].clone()).collect();
    let train = order[n_test..].iter().map(|&i| records[i].clone()).collect();
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, language: &str, residence: Option<f64>) -> SpeakerRecord {
        SpeakerRecord {
            language_num: id.to_string(),
            native_language: language.to_string(),
            birth_place: None,
            sex: None,
            age: None,
            length_of_english_residence: residence,
        }
    }

    #[test]
    fn test_load_ignores_extra_columns_and_bad_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bio.csv");
        std::fs::write(
            &path,
            "href,language_num,sex,birth_place,native_language,length_of_english_residence\n\
             /x,english1,male,usa,english,\n\
             /y,arabic3,female,egypt,arabic,2.5\n\
             /z,mandarin7,male,china,mandarin,unknown\n",
        )
        .unwrap();

        let records = load(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].length_of_english_residence, Some(2.5));
        assert_eq!(records[2].length_of_english_residence, None);
        assert_eq!(records[0].sex.as_deref(), Some("male"));
    }

    #[test]
    fn test_filter_by_language_and_residence() {
        let filter = MetadataFilter::from_config(&DatasetConfig::default());
        assert!(filter.accepts(&record("english1", "english", None)));
        assert!(filter.accepts(&record("arabic1", "arabic", Some(3.0))));
        assert!(!filter.accepts(&record("arabic2", "arabic", Some(10.0))));
        assert!(!filter.accepts(&record("mandarin1", "mandarin", None)));
        assert!(!filter.accepts(&record("french1", "french", Some(1.0))));
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let records: Vec<SpeakerRecord> = (0..10)
            .map(|i| record(&format!("english{}", i), "english", None))
            .collect();

        let (train_a, test_a) = split(&records, 0.2, 1234);
        let (train_b, test_b) = split(&records, 0.2, 1234);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a.len(), 2);
        assert_eq!(train_a.len(), 8);
        assert!(test_a.iter().all(|t| !train_a.contains(t)));
    }
}
