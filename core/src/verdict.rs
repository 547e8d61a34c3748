use serde::{Deserialize, Serialize};
use crate::model::{Prediction, BENIGN_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Benign,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub severity: Severity,
    pub attack_type: Option<String>,
    pub confidence: Option<f64>,
}

impl Verdict {
    pub fn is_alert(&self) -> bool {
        self.severity == Severity::Alert
    }
}

/// Every decoded name is either the benign sentinel or an attack type.
pub fn interpret(prediction: &Prediction) -> Verdict {
    let benign = prediction.decoded_name == BENIGN_LABEL || (prediction.binary && prediction.raw_label == 0);

    if benign {
        Verdict {
            severity: Severity::Benign,
            attack_type: None,
            confidence: prediction.confidence,
        }
    } else {
        Verdict {
            severity: Severity::Alert,
            attack_type: Some(prediction.decoded_name.clone()),
            confidence: prediction.confidence,
        }
    }
}
