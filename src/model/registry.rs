use std::sync::Arc;

use image::{DynamicImage, imageops::FilterType};
use serde::Serialize;
use tokio::task;
use tracing::{error, info};

use crate::{
    config::AppConfig,
    disease_info::DiseaseCatalog,
    error::ServiceError,
    model::{ModelMetadata, Prediction, loader::{self, Classifier}},
    preprocess::{self, TensorLayout},
};

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model_loaded: bool,
    pub loading_error: Option<String>,
}

/// Startup-loaded state shared by every request.
pub struct ModelRegistry {
    classifier: Option<Arc<dyn Classifier>>,
    loading_error: Option<String>,
    catalog: Arc<DiseaseCatalog>,
    image_size: u32,
    layout: TensorLayout,
}

impl ModelRegistry {
    /// Never fails: a missing or broken model is recorded, not fatal.
    pub fn initialize(config: &AppConfig) -> Self {
        let catalog = DiseaseCatalog::load_or_empty(&config.disease_info_path);
        let (classifier, loading_error) = match loader::load_classifier(config) {
            Ok(classifier) => {
                info!(model = %classifier.metadata().name, "model loaded");
                (Some(classifier), None)
            }
            Err(err) => {
                error!(%err, "model failed to load, predictions are disabled");
                (None, Some(err.to_string()))
            }
        };

        Self {
            classifier,
            loading_error,
            catalog: Arc::new(catalog),
            image_size: config.image_size,
            layout: config.tensor_layout,
        }
    }

    pub fn with_classifier(
        classifier: Option<Arc<dyn Classifier>>,
        loading_error: Option<String>,
        catalog: DiseaseCatalog,
        config: &AppConfig,
    ) -> Self {
        Self {
            classifier,
            loading_error,
            catalog: Arc::new(catalog),
            image_size: config.image_size,
            layout: config.tensor_layout,
        }
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            model_loaded: self.classifier.is_some(),
            loading_error: self.loading_error.clone(),
        }
    }

    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.classifier.as_ref().map(|c| c.metadata())
    }

    pub fn catalog(&self) -> &DiseaseCatalog {
        &self.catalog
    }

    /// Runs one forward pass; `filter` is the resampling used to reach the
    /// model's input size.
    pub async fn predict(
        &self,
        image: DynamicImage,
        filter: FilterType,
    ) -> Result<Prediction, ServiceError> {
        let classifier = self
            .classifier
            .clone()
            .ok_or(ServiceError::ModelUnavailable)?;
        let catalog = self.catalog.clone();
        let size = self.image_size;
        let layout = self.layout;

        task::spawn_blocking(move || {
            let input = preprocess::preprocess(&image, size, layout, filter);
            let scores = classifier.forward(&input)?;
            Prediction::from_scores(&scores, &catalog)
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{labels::NUM_CLASSES, preprocess::ImageTensor};

    struct FixedScores(usize);

    impl Classifier for FixedScores {
        fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>, ServiceError> {
            assert_eq!(input.shape, [1, 160, 160, 3]);
            let mut scores = vec![0.0; NUM_CLASSES];
            scores[self.0] = 1.0;
            Ok(scores)
        }

        fn metadata(&self) -> ModelMetadata {
            ModelMetadata {
                name: "fixed".into(),
                path: "memory".into(),
                size_bytes: 0,
            }
        }
    }

    fn leaf() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([40, 160, 60])))
    }

    #[tokio::test]
    async fn predicts_through_the_classifier() {
        let registry = ModelRegistry::with_classifier(
            Some(Arc::new(FixedScores(21))),
            None,
            DiseaseCatalog::default(),
            &AppConfig::default(),
        );
        let prediction = registry.predict(leaf(), preprocess::UPLOAD_FILTER).await.unwrap();
        assert_eq!(prediction.class_index, 21);
        assert_eq!(prediction.pest_name, "Potato___Late_blight");
        assert_eq!(prediction.confidence, 100.0);
    }

    #[tokio::test]
    async fn prediction_without_model_fails_gracefully() {
        let registry = ModelRegistry::with_classifier(
            None,
            Some("'models' directory not found".into()),
            DiseaseCatalog::default(),
            &AppConfig::default(),
        );
        let err = registry.predict(leaf(), preprocess::UPLOAD_FILTER).await.unwrap_err();
        assert!(matches!(err, ServiceError::ModelUnavailable));
        assert!(!registry.status().model_loaded);
    }

    #[test]
    fn initialize_records_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            models_dir: dir.path().join("models"),
            disease_info_path: dir.path().join("plant_disease.json"),
            ..AppConfig::default()
        };
        let registry = ModelRegistry::initialize(&config);
        let status = registry.status();
        assert!(!status.model_loaded);
        assert!(status.loading_error.unwrap().contains("directory not found"));
        assert!(registry.metadata().is_none());
    }
}
