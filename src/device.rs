//! # Device Selection
//!
//! Picks the compute device the classifier runs on. GPU preferences fall back to the
//! CPU when the device cannot be opened.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached result of automatic detection.
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    /// Falls back to CPU if CUDA is unavailable.
    Cuda,
    /// Falls back to CPU if Metal is unavailable.
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::metal_device().unwrap_or(Device::Cpu),
        }
    }

    pub fn get_best_device() -> Device {
        BEST_DEVICE
            .get_or_init(|| {
                if let Some(device) = Self::cuda_device() {
                    info!("Selected CUDA GPU for inference");
                    return device;
                }
                if let Some(device) = Self::metal_device() {
                    info!("Selected Metal GPU for inference");
                    return device;
                }
                info!("Using CPU for inference");
                Device::Cpu
            })
            .clone()
    }

    fn cuda_device() -> Option<Device> {
        Device::new_cuda(0)
            .map_err(|e| debug!("CUDA not available: {}", e))
            .ok()
    }

    fn metal_device() -> Option<Device> {
        Device::new_metal(0)
            .map_err(|e| debug!("Metal not available: {}", e))
            .ok()
    }

    pub fn describe(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }
}

/// Parse a configured preference, falling back to automatic detection.
pub fn create_device_from_string(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => DeviceManager::get_device(preference),
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", device_str);
            DeviceManager::get_best_device()
        }
    }
}
