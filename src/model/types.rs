use serde::Serialize;
use serde_json::Value;

use crate::{
    disease_info::DiseaseCatalog,
    error::ServiceError,
    labels::{self, NUM_CLASSES},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub pest_name: String,
    pub confidence: f64,
    pub affected_crop: String,
    pub class_index: usize,
    pub disease_info: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
}

impl Prediction {
    /// Arg-max over the model output, mapped onto the label set and catalog.
    pub fn from_scores(scores: &[f32], catalog: &DiseaseCatalog) -> Result<Self, ServiceError> {
        if scores.len() != NUM_CLASSES {
            return Err(ServiceError::Inference(format!(
                "model produced {} scores, expected {NUM_CLASSES}",
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ServiceError::Inference(
                "model produced non-finite scores".into(),
            ));
        }

        let distribution = to_distribution(scores);
        let (class_index, max) = distribution
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f64::MIN), |best, (idx, value)| {
                if value > best.1 { (idx, value) } else { best }
            });

        let label = labels::LABELS[class_index];
        Ok(Prediction {
            pest_name: label.to_string(),
            confidence: round_percent(max),
            affected_crop: labels::affected_crop(label),
            class_index,
            disease_info: catalog.record(class_index),
        })
    }
}

// Models exported without a final softmax emit logits.
fn to_distribution(scores: &[f32]) -> Vec<f64> {
    let values: Vec<f64> = scores.iter().map(|&s| f64::from(s)).collect();
    let in_unit_range = values.iter().all(|v| (0.0..=1.0).contains(v));
    let sum: f64 = values.iter().sum();
    if in_unit_range && (sum - 1.0).abs() <= 1e-3 {
        return values;
    }

    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn round_percent(probability: f64) -> f64 {
    let percent = (probability * 100.0).clamp(0.0, 100.0);
    (percent * 100.0).round() / 100.0
}
