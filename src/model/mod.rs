mod loader;
mod registry;
mod types;

pub use loader::{Classifier, MODEL_EXTENSIONS, discover_model_artifact, load_classifier};
pub use registry::{ModelRegistry, ModelStatus};
pub use types::{ModelMetadata, Prediction};
