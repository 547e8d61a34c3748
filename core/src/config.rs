use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::{Result, SentinelError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
}

/// How the capture window is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStrategy {
    /// Buffer silently for the whole window, then hand back everything at once.
    /// The window cannot be cut short once started.
    BlockThenDrain,
    /// Hand each packet over as it arrives and stop as soon as the deadline passes.
    Streaming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub interface: String,
    pub window_secs: u64,
    pub max_packets: Option<usize>,
    pub strategy: CaptureStrategy,
    pub read_timeout_ms: u64,
    pub promiscuous: bool,
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub schema_path: PathBuf,
    /// Absent for binary models; raw labels 0/1 are then decoded as BENIGN/MALICIOUS.
    pub label_encoder_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub results_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            model: ModelConfig {
                model_path: PathBuf::from("multi_class_model.onnx"),
                schema_path: PathBuf::from("top_20_features.json"),
                label_encoder_path: Some(PathBuf::from("label_encoder.json")),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            output: OutputConfig { results_dir: None },
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            window_secs: 15,
            max_packets: None,
            strategy: CaptureStrategy::Streaming,
            read_timeout_ms: 250,
            promiscuous: true,
            buffer_size: 1024 * 1024,
        }
    }
}

impl CaptureConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.window_secs == 0 {
            return Err(SentinelError::InvalidConfig("capture window must be at least one second".to_string()));
        }
        if self.capture.interface.trim().is_empty() {
            return Err(SentinelError::InvalidConfig("capture interface must not be empty".to_string()));
        }
        if self.capture.max_packets == Some(0) {
            return Err(SentinelError::InvalidConfig("max_packets must be greater than zero".to_string()));
        }
        if self.capture.read_timeout_ms == 0 {
            return Err(SentinelError::InvalidConfig("read_timeout_ms must be greater than zero".to_string()));
        }
        Ok(())
    }
}
