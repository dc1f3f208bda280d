pub mod config;
pub mod disease_info;
pub mod error;
pub mod labels;
pub mod model;
pub mod preprocess;
pub mod server;

pub use config::AppConfig;
pub use disease_info::DiseaseCatalog;
pub use error::ServiceError;
pub use model::{Classifier, ModelRegistry, Prediction};
pub use server::build_router;
