use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Artifact load error: {0}")]
    ArtifactLoad(String),

    #[error("Packet capture error: {0}")]
    Capture(String),

    #[error("Insufficient data: captured {captured} packet(s), at least 2 are required")]
    InsufficientData { captured: usize },

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Coarse category of a failure, reported to whoever renders scan outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ArtifactLoad,
    Capture,
    InsufficientData,
    Prediction,
    Configuration,
}

impl FailureKind {
    pub fn operator_hint(&self) -> &'static str {
        match self {
            FailureKind::ArtifactLoad => "check the model, label encoder and feature schema files",
            FailureKind::Capture => "check the interface name and capture privileges",
            FailureKind::InsufficientData => "capture more traffic and scan again",
            FailureKind::Prediction => "check that the feature schema matches the model",
            FailureKind::Configuration => "check the configuration file and command line flags",
        }
    }
}

impl SentinelError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SentinelError::ArtifactLoad(_) => FailureKind::ArtifactLoad,
            SentinelError::Capture(_) => FailureKind::Capture,
            SentinelError::InsufficientData { .. } => FailureKind::InsufficientData,
            SentinelError::Prediction(_) => FailureKind::Prediction,
            SentinelError::Io(_)
            | SentinelError::Config(_)
            | SentinelError::InvalidConfig(_)
            | SentinelError::Parse(_) => {
                FailureKind::Configuration
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
