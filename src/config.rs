use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::preprocess::TensorLayout;

pub const DEFAULT_PORT: u16 = 7860;
pub const DEFAULT_IMAGE_SIZE: u32 = 160;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub models_dir: PathBuf,
    pub model_path: Option<PathBuf>,
    pub disease_info_path: PathBuf,
    pub upload_dir: PathBuf,
    pub image_size: u32,
    pub tensor_layout: TensorLayout,
    pub max_upload_bytes: usize,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            models_dir: PathBuf::from("models"),
            model_path: None,
            disease_info_path: PathBuf::from("plant_disease.json"),
            upload_dir: PathBuf::from("uploadimages"),
            image_size: DEFAULT_IMAGE_SIZE,
            tensor_layout: TensorLayout::Nhwc,
            max_upload_bytes: 16 * 1024 * 1024,
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let host: IpAddr = env::var("HOST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = SocketAddr::new(host, port);

        let models_dir = env::var("MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.models_dir);
        let model_path = env::var("MODEL_PATH").ok().map(PathBuf::from);
        let disease_info_path = env::var("DISEASE_INFO_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.disease_info_path);
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);

        let image_size = env::var("IMAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|size: &u32| *size > 0)
            .unwrap_or(DEFAULT_IMAGE_SIZE);
        let tensor_layout = env::var("TENSOR_LAYOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.tensor_layout);
        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_upload_bytes);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            models_dir,
            model_path,
            disease_info_path,
            upload_dir,
            image_size,
            tensor_layout,
            max_upload_bytes,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA not available, falling back to cpu");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
