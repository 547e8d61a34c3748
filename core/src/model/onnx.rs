//! ONNX Runtime classifier.
//!
//! Expects a scikit-learn classifier exported with skl2onnx and
//! `options={"zipmap": False}`: one float input of shape `[N, n_features]`,
//! an int64 label output and a float `[N, n_classes]` probability output.
//! Training labels are the label encoder's indices, so raw labels run `0..n_classes`.

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use super::{Classifier, RawLabel};
use crate::{Result, SentinelError};

const LABEL_OUTPUT: &str = "output_label";
const PROBABILITY_OUTPUT: &str = "output_probability";

pub struct OnnxModel {
    session: Mutex<Session>,
    label_output: String,
    probability_output: String,
    n_features: usize,
    classes: Vec<RawLabel>,
}

/// Picks the label and probability outputs, by skl2onnx name when present,
/// otherwise by position.
fn select_outputs(names: &[String]) -> std::result::Result<(String, String), String> {
    let by_name = |wanted: &str| names.iter().find(|n| n.as_str() == wanted).cloned();
    match (by_name(LABEL_OUTPUT), by_name(PROBABILITY_OUTPUT)) {
        (Some(label), Some(proba)) => Ok((label, proba)),
        _ if names.len() >= 2 => Ok((names[0].clone(), names[1].clone())),
        _ => Err(format!(
            "model exposes {} output(s), a label and a probability output are required",
            names.len()
        )),
    }
}

impl OnnxModel {
    /// Loads the model and runs one all-zero row through it, so a width
    /// mismatch or an unsupported output layout fails here rather than mid-scan.
    pub fn from_file(path: &Path, n_features: usize) -> Result<Self> {
        log::info!("Loading ONNX model from: {}", path.display());

        if !path.exists() {
            return Err(SentinelError::ArtifactLoad(format!("Model not found: {}", path.display())));
        }

        let session = Session::builder()
            .map_err(|e| SentinelError::ArtifactLoad(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SentinelError::ArtifactLoad(format!("Failed to set optimization: {}", e)))?
            .commit_from_file(path)
            .map_err(|e| SentinelError::ArtifactLoad(format!("Failed to load model {}: {}", path.display(), e)))?;

        let names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let (label_output, probability_output) =
            select_outputs(&names).map_err(SentinelError::ArtifactLoad)?;

        let mut model = Self {
            session: Mutex::new(session),
            label_output,
            probability_output,
            n_features,
            classes: Vec::new(),
        };

        let (_, proba) = model.infer(&vec![0.0; n_features]).map_err(|e| {
            SentinelError::ArtifactLoad(format!(
                "Model rejected a {}-feature row ({}); was it exported with zipmap disabled?",
                n_features, e
            ))
        })?;
        if proba.is_empty() {
            return Err(SentinelError::ArtifactLoad("Model reports no classes".to_string()));
        }
        model.classes = (0..proba.len() as RawLabel).collect();

        log::info!(
            "ONNX model loaded successfully: {} features, {} classes",
            n_features,
            model.classes.len()
        );
        Ok(model)
    }

    fn infer(&self, features: &[f64]) -> std::result::Result<(i64, Vec<f64>), String> {
        let row: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let input_array = Array2::<f32>::from_shape_vec((1, row.len()), row)
            .map_err(|e| format!("Array error: {}", e))?;
        let input_tensor = Value::from_array(input_array).map_err(|e| format!("Tensor error: {}", e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| format!("Inference failed: {}", e))?;

        let label = outputs
            .get(&self.label_output)
            .ok_or_else(|| format!("No output named {}", self.label_output))?
            .try_extract_tensor::<i64>()
            .map_err(|e| format!("Label extract error: {}", e))?
            .1
            .first()
            .copied()
            .ok_or_else(|| "Empty label output".to_string())?;

        let proba = outputs
            .get(&self.probability_output)
            .ok_or_else(|| format!("No output named {}", self.probability_output))?
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Probability extract error: {}", e))?
            .1
            .iter()
            .map(|&p| p as f64)
            .collect();

        Ok((label, proba))
    }
}

impl Classifier for OnnxModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn classes(&self) -> &[RawLabel] {
        &self.classes
    }

    fn predict(&self, features: &[f64]) -> Result<RawLabel> {
        self.predict_with_proba(features).map(|(label, _)| label)
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Option<Vec<f64>>> {
        self.predict_with_proba(features).map(|(_, proba)| proba)
    }

    fn predict_with_proba(&self, features: &[f64]) -> Result<(RawLabel, Option<Vec<f64>>)> {
        let (label, proba) = self.infer(features).map_err(SentinelError::Prediction)?;
        let label = RawLabel::try_from(label)
            .map_err(|_| SentinelError::Prediction(format!("Model produced label {}", label)))?;
        Ok((label, Some(proba)))
    }
}
