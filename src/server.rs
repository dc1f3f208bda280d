use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{self, DefaultBodyLimit, FromRequest, Multipart, State},
    http::{StatusCode, header},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{fs, task};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, error, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{
    config::AppConfig,
    error::ServiceError,
    labels::{LABELS, NUM_CLASSES},
    model::{ModelMetadata, ModelRegistry, ModelStatus, Prediction},
    preprocess,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    model: ModelStatus,
    classes: usize,
}

#[derive(Serialize)]
struct ClassesResponse {
    classes: &'static [&'static str],
    total: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiseaseInfoResponse {
    class_name: &'static str,
    class_index: usize,
    disease_info: Value,
}

#[derive(Serialize)]
struct DebugResponse {
    cwd: String,
    model: Option<ModelMetadata>,
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest {
    image_base64: Option<String>,
}

#[derive(Serialize)]
struct PredictResponse {
    success: bool,
    prediction: Prediction,
    timestamp: String,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let uploads = ServeDir::new(&config.upload_dir);
    let body_limit = config.max_upload_bytes;
    let state = AppState { config, registry };

    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/debug", get(debug_files))
        .route("/api/classes", get(classes))
        .route("/api/disease-info/:index", get(disease_info))
        .route("/api/predict", post(predict))
        .nest_service("/uploadimages", uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn index() -> Json<Value> {
    Json(json!({
        "message": "Plant Disease Detection API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "predict": "/api/predict",
            "classes": "/api/classes",
            "disease_info": "/api/disease-info/<class_index>",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model: state.registry.status(),
        classes: NUM_CLASSES,
    })
}

async fn debug_files(State(state): State<AppState>) -> Result<Json<DebugResponse>, ServiceError> {
    let cwd = std::env::current_dir()?;
    let root = cwd.clone();
    let files = task::spawn_blocking(move || list_files(&root))
        .await
        .map_err(|err| ServiceError::Other(format!("file listing failed: {err}")))?;

    Ok(Json(DebugResponse {
        cwd: cwd.display().to_string(),
        model: state.registry.metadata(),
        files,
    }))
}

fn list_files(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name == "target" || name == ".git")
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            Path::new(".").join(relative).display().to_string()
        })
        .collect()
}

async fn classes() -> Json<ClassesResponse> {
    Json(ClassesResponse {
        classes: &LABELS,
        total: NUM_CLASSES,
    })
}

async fn disease_info(
    State(state): State<AppState>,
    extract::Path(raw_index): extract::Path<String>,
) -> Result<Json<DiseaseInfoResponse>, ServiceError> {
    let class_index = raw_index
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|idx| usize::try_from(idx).ok())
        .filter(|idx| *idx < NUM_CLASSES)
        .ok_or_else(|| ServiceError::BadRequest("Invalid class index".into()))?;

    Ok(Json(DiseaseInfoResponse {
        class_name: LABELS[class_index],
        class_index,
        disease_info: state.registry.catalog().record(class_index),
    }))
}

async fn predict(
    State(state): State<AppState>,
    request: extract::Request,
) -> Result<Json<PredictResponse>, ServiceError> {
    let prediction = predict_request(&state, request)
        .await
        .map_err(into_predict_error)?;

    Ok(Json(PredictResponse {
        success: true,
        prediction,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

async fn predict_request(
    state: &AppState,
    request: extract::Request,
) -> Result<Prediction, ServiceError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
        predict_multipart(state, multipart).await
    } else {
        let body = Bytes::from_request(request, state)
            .await
            .map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
        predict_base64(state, &body).await
    }
}

fn rejected(status: StatusCode, reason: String) -> ServiceError {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ServiceError::PayloadTooLarge(reason),
        status if status.is_client_error() => ServiceError::BadRequest(reason),
        _ => ServiceError::Other(reason),
    }
}

async fn predict_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Prediction, ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| rejected(err.status(), err.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(ServiceError::BadRequest("No image selected".into()));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| rejected(err.status(), err.body_text()))?;
        return predict_upload(state, &file_name, &bytes).await;
    }

    Err(ServiceError::BadRequest("No image provided".into()))
}

async fn predict_upload(
    state: &AppState,
    file_name: &str,
    bytes: &[u8],
) -> Result<Prediction, ServiceError> {
    let temp_path = temp_upload_path(&state.config.upload_dir, file_name);
    fs::write(&temp_path, bytes).await?;

    let path = temp_path.clone();
    let loaded = task::spawn_blocking(move || preprocess::load_image(&path)).await;
    remove_temp_file(&temp_path).await;

    let image = loaded.map_err(|err| ServiceError::Other(format!("image task failed: {err}")))??;
    state.registry.predict(image, preprocess::UPLOAD_FILTER).await
}

async fn predict_base64(state: &AppState, body: &[u8]) -> Result<Prediction, ServiceError> {
    let request: PredictRequest = serde_json::from_slice(body)
        .map_err(|_| ServiceError::BadRequest("No image provided".into()))?;
    let encoded = request
        .image_base64
        .ok_or_else(|| ServiceError::BadRequest("No image provided".into()))?;

    let image = task::spawn_blocking(move || decode_base64_image(&encoded))
        .await
        .map_err(|err| ServiceError::Other(format!("image task failed: {err}")))??;
    state.registry.predict(image, preprocess::INLINE_FILTER).await
}

/// Accepts bare base64 or a `data:image/...;base64,` URL, line-wrapped or not.
pub fn decode_base64_image(raw: &str) -> Result<DynamicImage, ServiceError> {
    let payload = if raw.starts_with("data:image") {
        raw.split_once(',').map(|(_, data)| data).unwrap_or_default()
    } else {
        raw
    };
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD
        .decode(&payload)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid base64 image: {e}")))?;
    image::load_from_memory(&bytes)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid base64 image: {e}")))
}

pub fn temp_upload_path(upload_dir: &Path, file_name: &str) -> PathBuf {
    let safe_name: String = Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    upload_dir.join(format!("temp_{}_{}", Uuid::new_v4().simple(), safe_name))
}

async fn remove_temp_file(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        debug!(path = %path.display(), %err, "could not remove temporary upload");
    }
}

// Inference failures are reported uniformly; the cause only goes to the log.
fn into_predict_error(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::BadRequest(_)
        | ServiceError::InvalidImage(_)
        | ServiceError::PayloadTooLarge(_) => err,
        ServiceError::ModelUnavailable => {
            warn!("prediction requested but no model is loaded");
            ServiceError::Other("Prediction failed".into())
        }
        ServiceError::Inference(reason) => {
            error!(%reason, "prediction error");
            ServiceError::Other("Prediction failed".into())
        }
        other => {
            error!(err = %other, "predict request failed");
            ServiceError::Other(format!("Internal server error: {other}"))
        }
    }
}
