use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{config::AppConfig, error::ServiceError, model::ModelMetadata, preprocess::ImageTensor};

pub const MODEL_EXTENSIONS: [&str; 3] = ["pt", "ts", "torchscript"];

/// A loaded model that maps one image tensor to per-class scores.
pub trait Classifier: Send + Sync {
    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>, ServiceError>;

    fn metadata(&self) -> ModelMetadata;
}

/// First model artifact in `dir`, by file name.
pub fn discover_model_artifact(dir: &Path) -> Result<PathBuf, ServiceError> {
    if !dir.is_dir() {
        return Err(ServiceError::Other(format!(
            "'{}' directory not found",
            dir.display()
        )));
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_model_extension(path))
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        ServiceError::Other(format!(
            "No .pt, .ts or .torchscript files found in {} directory",
            dir.display()
        ))
    })
}

fn has_model_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MODEL_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

pub fn resolve_model_path(config: &AppConfig) -> Result<PathBuf, ServiceError> {
    match &config.model_path {
        Some(path) if path.is_file() => Ok(path.clone()),
        Some(path) => Err(ServiceError::Other(format!(
            "model artifact missing: {}",
            path.display()
        ))),
        None => discover_model_artifact(&config.models_dir),
    }
}

pub fn load_classifier(config: &AppConfig) -> Result<Arc<dyn Classifier>, ServiceError> {
    let path = resolve_model_path(config)?;
    tracing::info!(path = %path.display(), "found model artifact");
    load_from_path(&path, config)
}

#[cfg(feature = "tch-backend")]
fn load_from_path(path: &Path, config: &AppConfig) -> Result<Arc<dyn Classifier>, ServiceError> {
    let model = tch_backend::TorchScriptClassifier::load(path, config.device)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "tch-backend"))]
fn load_from_path(path: &Path, _config: &AppConfig) -> Result<Arc<dyn Classifier>, ServiceError> {
    Err(ServiceError::Other(format!(
        "cannot load {}: built without the tch-backend feature",
        path.display()
    )))
}

#[cfg(feature = "tch-backend")]
mod tch_backend {
    use std::{fs, path::Path};

    use parking_lot::Mutex;
    use tch::{Device, IValue, Kind, Tensor, no_grad};

    use super::Classifier;
    use crate::{error::ServiceError, model::ModelMetadata, preprocess::ImageTensor};

    pub struct TorchScriptClassifier {
        metadata: ModelMetadata,
        device: Device,
        module: Mutex<tch::CModule>,
    }

    impl TorchScriptClassifier {
        pub fn load(path: &Path, device: Device) -> Result<Self, ServiceError> {
            let size_bytes = fs::metadata(path)?.len();
            let mut module = tch::CModule::load_on_device(path, device)
                .map_err(|e| ServiceError::Inference(e.to_string()))?;
            module.set_eval();

            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("model")
                .to_string();

            Ok(Self {
                metadata: ModelMetadata {
                    name,
                    path: path.display().to_string(),
                    size_bytes,
                },
                device,
                module: Mutex::new(module),
            })
        }
    }

    impl Classifier for TorchScriptClassifier {
        fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>, ServiceError> {
            no_grad(|| {
                let tensor = Tensor::from_slice(&input.data)
                    .reshape(input.shape)
                    .to_device(self.device);

                let output = self
                    .module
                    .lock()
                    .forward_is(&[IValue::Tensor(tensor)])
                    .map_err(|e| ServiceError::Inference(e.to_string()))?;

                // Traced exports return either the scores or a tuple led by them.
                let scores = match output {
                    IValue::Tensor(t) => t,
                    IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                        IValue::Tensor(t) => t.shallow_clone(),
                        _ => {
                            return Err(ServiceError::Inference(
                                "expected tensor as first tuple element".into(),
                            ));
                        }
                    },
                    _ => {
                        return Err(ServiceError::Inference(
                            "unexpected model output format".into(),
                        ));
                    }
                };

                let flat = scores
                    .to_device(Device::Cpu)
                    .to_kind(Kind::Float)
                    .flatten(0, -1);
                Vec::<f32>::try_from(&flat).map_err(|e| ServiceError::Inference(e.to_string()))
            })
        }

        fn metadata(&self) -> ModelMetadata {
            self.metadata.clone()
        }
    }
}
