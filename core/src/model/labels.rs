use std::path::Path;
use super::RawLabel;
use crate::{Result, SentinelError};

pub const BENIGN_LABEL: &str = "BENIGN";
pub const MALICIOUS_LABEL: &str = "MALICIOUS";

/// Maps raw model output to a class name.
pub trait LabelDecoder: Send + Sync {
    fn decode(&self, raw: RawLabel) -> Result<String>;

    /// Raw labels `0..class_count()` decode successfully.
    fn class_count(&self) -> usize;

    /// True for the built-in two-class mapping used when no encoder artifact exists.
    fn is_binary(&self) -> bool {
        false
    }
}

/// Class names indexed by raw label, as saved from the fitted encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            return Err(SentinelError::ArtifactLoad("Label encoder has no classes".to_string()));
        }
        Ok(Self { classes })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::ArtifactLoad(format!("Cannot read label encoder {}: {}", path.display(), e))
        })?;
        let classes: Vec<String> = serde_json::from_str(&content).map_err(|e| {
            SentinelError::ArtifactLoad(format!("Malformed label encoder {}: {}", path.display(), e))
        })?;
        Self::new(classes)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

impl LabelDecoder for LabelEncoder {
    fn decode(&self, raw: RawLabel) -> Result<String> {
        self.classes
            .get(raw as usize)
            .cloned()
            .ok_or_else(|| SentinelError::Prediction(format!(
                "Label {} is outside the encoder's {} classes",
                raw,
                self.classes.len()
            )))
    }

    fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryLabels;

impl LabelDecoder for BinaryLabels {
    fn decode(&self, raw: RawLabel) -> Result<String> {
        match raw {
            0 => Ok(BENIGN_LABEL.to_string()),
            1 => Ok(MALICIOUS_LABEL.to_string()),
            other => Err(SentinelError::Prediction(format!("Binary model produced label {}", other))),
        }
    }

    fn class_count(&self) -> usize {
        2
    }

    fn is_binary(&self) -> bool {
        true
    }
}
