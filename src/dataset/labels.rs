//! # Label Sets
//!
//! The closed set of classes a model predicts, persisted as TOML next to model
//! weights (`<model_id>.labels.toml`) and prepared training arrays (`labels.toml`).
//!
//! ```toml
//! scheme = "binary"
//! classes = ["english", "other"]
//! ```

use crate::config::LabelScheme;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    pub scheme: LabelScheme,
    pub classes: Vec<String>,
}

impl LabelSet {
    /// Target language is class 0, everything else is class 1.
    pub fn binary(target: &str) -> Self {
        Self {
            scheme: LabelScheme::Binary,
            classes: vec![target.to_string(), "other".to_string()],
        }
    }

    /// One class per distinct value, indexed in sorted order.
    pub fn from_observed<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut classes: Vec<String> = values.into_iter().map(str::to_string).collect();
        classes.sort();
        classes.dedup();
        Self {
            scheme: LabelScheme::SourceLanguage,
            classes,
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class index for a source language, `None` when it is outside the set.
    pub fn label_for(&self, language: &str) -> Option<u32> {
        match self.scheme {
            LabelScheme::Binary => {
                let target = self.classes.first()?;
                Some(if language == target { 0 } else { 1 })
            }
            LabelScheme::SourceLanguage => self
                .classes
                .iter()
                .position(|c| c == language)
                .map(|i| i as u32),
        }
    }

    pub fn name(&self, class: u32) -> Option<&str> {
        self.classes.get(class as usize).map(String::as_str)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading label set {}", path.display()))?;
        let labels: LabelSet = toml::from_str(&text)
            .with_context(|| format!("parsing label set {}", path.display()))?;
        if labels.is_empty() {
            anyhow::bail!("label set {} has no classes", path.display());
        }
        Ok(labels)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
