pub mod labels;
pub mod onnx;

use serde::{Deserialize, Serialize};
use crate::config::ModelConfig;
use crate::features::{FeatureSchema, FeatureVector};
use crate::{Result, SentinelError};

pub use labels::{BinaryLabels, LabelDecoder, LabelEncoder, BENIGN_LABEL, MALICIOUS_LABEL};
pub use onnx::OnnxModel;

/// Class identifier as emitted by a model, before decoding.
pub type RawLabel = u32;

/// A pretrained model, opaque beyond prediction.
pub trait Classifier: Send + Sync {
    fn n_features(&self) -> usize;

    /// Raw labels the model can emit, in the order `predict_proba` reports them.
    fn classes(&self) -> &[RawLabel];

    fn predict(&self, features: &[f64]) -> Result<RawLabel>;

    /// Per-class probabilities, or `None` for models without probability output.
    fn predict_proba(&self, _features: &[f64]) -> Result<Option<Vec<f64>>> {
        Ok(None)
    }

    /// Label and probabilities together. Override when one inference yields both.
    fn predict_with_proba(&self, features: &[f64]) -> Result<(RawLabel, Option<Vec<f64>>)> {
        Ok((self.predict(features)?, self.predict_proba(features)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub raw_label: RawLabel,
    pub decoded_name: String,
    pub confidence: Option<f64>,
    /// Decoded through the built-in BENIGN/MALICIOUS mapping.
    pub binary: bool,
}

pub struct ClassifierAdapter {
    model: Box<dyn Classifier>,
    decoder: Box<dyn LabelDecoder>,
}

impl ClassifierAdapter {
    pub fn new(model: Box<dyn Classifier>, decoder: Option<Box<dyn LabelDecoder>>) -> Self {
        let decoder: Box<dyn LabelDecoder> = match decoder {
            Some(decoder) => decoder,
            None => Box::new(BinaryLabels),
        };
        Self { model, decoder }
    }

    pub fn n_features(&self) -> usize {
        self.model.n_features()
    }

    pub fn is_binary(&self) -> bool {
        self.decoder.is_binary()
    }

    /// Every raw label the model can emit must decode to a class name.
    fn check_label_coverage(&self) -> Result<()> {
        let limit = self.decoder.class_count();
        match self.model.classes().iter().find(|&&raw| raw as usize >= limit) {
            None => Ok(()),
            Some(raw) if self.decoder.is_binary() => Err(SentinelError::ArtifactLoad(format!(
                "Model emits label {} out of {} classes but no label encoder is configured; \
                 only binary models (labels 0 and 1) can run without one",
                raw,
                self.model.classes().len()
            ))),
            Some(raw) => Err(SentinelError::ArtifactLoad(format!(
                "Model emits label {} but the label encoder only names {} classes",
                raw, limit
            ))),
        }
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<Prediction> {
        if vector.len() != self.model.n_features() {
            return Err(SentinelError::Prediction(format!(
                "Feature vector has {} values, model expects {}",
                vector.len(),
                self.model.n_features()
            )));
        }

        let (raw_label, proba) = self.model.predict_with_proba(vector.values())?;
        let decoded_name = self.decoder.decode(raw_label)?;

        let confidence = match proba {
            Some(proba) => self
                .model
                .classes()
                .iter()
                .position(|&c| c == raw_label)
                .and_then(|i| proba.get(i).copied()),
            None => None,
        };

        log::debug!("Model predicted {} ({}) confidence {:?}", raw_label, decoded_name, confidence);

        Ok(Prediction {
            raw_label,
            decoded_name,
            confidence,
            binary: self.decoder.is_binary(),
        })
    }
}

/// Everything loaded from disk once at startup and shared read-only afterwards.
pub struct Artifacts {
    pub schema: FeatureSchema,
    pub classifier: ClassifierAdapter,
}

impl Artifacts {
    pub fn new(schema: FeatureSchema, classifier: ClassifierAdapter) -> Result<Self> {
        if schema.len() != classifier.n_features() {
            return Err(SentinelError::ArtifactLoad(format!(
                "Feature schema lists {} features but the model expects {}",
                schema.len(),
                classifier.n_features()
            )));
        }
        classifier.check_label_coverage()?;
        Ok(Self { schema, classifier })
    }

    pub fn load(config: &ModelConfig) -> Result<Self> {
        let schema = FeatureSchema::from_file(&config.schema_path)?;
        log::info!("Model will use these {} features", schema.len());

        let decoder: Option<Box<dyn LabelDecoder>> = match &config.label_encoder_path {
            Some(path) => Some(Box::new(LabelEncoder::from_file(path)?)),
            None => {
                log::info!("No label encoder configured, using binary BENIGN/MALICIOUS labels");
                None
            }
        };

        let model = OnnxModel::from_file(&config.model_path, schema.len())?;

        Self::new(schema, ClassifierAdapter::new(Box::new(model), decoder))
    }
}
