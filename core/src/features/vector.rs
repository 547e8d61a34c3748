use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use super::accumulator::FlowStatistics;
use crate::{Result, SentinelError};

pub const MAX_PACKET_LENGTH: &str = "Max Packet Length";
pub const PACKET_LENGTH_VARIANCE: &str = "Packet Length Variance";
pub const AVERAGE_PACKET_SIZE: &str = "Average Packet Size";
pub const SUBFLOW_FWD_BYTES: &str = "Subflow Fwd Bytes";
pub const TOTAL_LENGTH_FWD_PACKETS: &str = "Total Length of Fwd Packets";
pub const DESTINATION_PORT: &str = "Destination Port";

/// Ordered feature names the model was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(SentinelError::ArtifactLoad("Feature schema is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(SentinelError::ArtifactLoad(format!(
                    "Feature schema lists '{}' more than once",
                    name
                )));
            }
        }
        Ok(Self { names })
    }

    /// Reads a JSON array of feature names.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::ArtifactLoad(format!("Cannot read feature schema {}: {}", path.display(), e))
        })?;
        let names: Vec<String> = serde_json::from_str(&content).map_err(|e| {
            SentinelError::ArtifactLoad(format!("Malformed feature schema {}: {}", path.display(), e))
        })?;
        Self::new(names)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Value of a schema feature derivable from whole-window statistics.
///
/// Only forward-direction aggregates are instrumented; every other feature
/// (backward direction, header lengths, timing) has no derivation here.
fn derive(name: &str, stats: &FlowStatistics) -> Option<f64> {
    match name {
        MAX_PACKET_LENGTH => Some(stats.max_length()),
        PACKET_LENGTH_VARIANCE => Some(stats.variance()),
        AVERAGE_PACKET_SIZE => Some(stats.mean_length()),
        SUBFLOW_FWD_BYTES | TOTAL_LENGTH_FWD_PACKETS => Some(stats.sum_length()),
        DESTINATION_PORT => stats.first_transport().map(|t| t.destination_port as f64),
        _ => None,
    }
}

fn or_zero(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFeature {
    pub name: String,
    pub value: f64,
}

/// One model input row, aligned 1:1 with a [`FeatureSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn build(schema: &FeatureSchema, stats: &FlowStatistics) -> Self {
        let values = schema
            .names()
            .iter()
            .map(|name| or_zero(derive(name, stats).unwrap_or(0.0)))
            .collect();
        Self { values }
    }

    /// Builds a vector from a recorded feature set. Missing or null entries become 0.0.
    pub fn from_record(schema: &FeatureSchema, record: &HashMap<String, Option<f64>>) -> Self {
        for name in record.keys() {
            if !schema.contains(name) {
                log::warn!("Ignoring feature '{}' which the schema does not list", name);
            }
        }
        let values = schema
            .names()
            .iter()
            .map(|name| or_zero(record.get(name).copied().flatten().unwrap_or(0.0)))
            .collect();
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, schema: &FeatureSchema, name: &str) -> Option<f64> {
        schema
            .names()
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }

    pub fn named(&self, schema: &FeatureSchema) -> Vec<NamedFeature> {
        schema
            .names()
            .iter()
            .zip(&self.values)
            .map(|(name, &value)| NamedFeature {
                name: name.clone(),
                value,
            })
            .collect()
    }
}
