//! # Device Detection and Selection
//!
//! Picks the compute device the speech model is loaded on. Hardware
//! acceleration is used when the binary was built with it and a device is
//! present. Everything else falls back to the CPU, with a warning when the
//! operator asked for a specific accelerator.

use candle_core::Device;
use serde::Serialize;
use tracing::{debug, info, warn};

/// `models.device` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// First accelerator found, else CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            other => Err(format!(
                "'{}' is not a device (expected auto, cpu, cuda or metal)",
                other
            )),
        }
    }
}

/// Coarse classification reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Accelerated,
    Cpu,
}

impl DeviceKind {
    pub fn of(device: &Device) -> Self {
        if device.is_cpu() {
            DeviceKind::Cpu
        } else {
            DeviceKind::Accelerated
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeviceKind::Accelerated => "accelerated",
            DeviceKind::Cpu => "cpu",
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Accelerator {
    Cuda,
    Metal,
}

impl Accelerator {
    /// Detection order for `auto`.
    const SEARCH_ORDER: [Accelerator; 2] = [Accelerator::Cuda, Accelerator::Metal];

    fn name(self) -> &'static str {
        match self {
            Accelerator::Cuda => "CUDA",
            Accelerator::Metal => "Metal",
        }
    }

    /// Ordinal 0 of this accelerator, if the build and the machine both have it.
    fn detect(self) -> Option<Device> {
        let device = match self {
            Accelerator::Cuda => Device::new_cuda(0),
            Accelerator::Metal => Device::new_metal(0),
        };
        match device {
            Ok(device) => {
                debug!(accelerator = self.name(), "Accelerator available");
                Some(device)
            }
            Err(e) => {
                debug!(accelerator = self.name(), error = %e, "Accelerator not available");
                None
            }
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    /// Resolve a preference to a concrete device. Never fails: the CPU is
    /// always there.
    pub fn get_device(preference: DevicePreference) -> Device {
        let device = match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Auto => Accelerator::SEARCH_ORDER
                .iter()
                .find_map(|accelerator| accelerator.detect())
                .unwrap_or(Device::Cpu),
            DevicePreference::Cuda => Self::forced(Accelerator::Cuda),
            DevicePreference::Metal => Self::forced(Accelerator::Metal),
        };

        info!(
            preference = ?preference,
            device = %Self::get_device_info(&device),
            "Selected compute device for speech inference"
        );
        device
    }

    fn forced(accelerator: Accelerator) -> Device {
        accelerator.detect().unwrap_or_else(|| {
            warn!(
                accelerator = accelerator.name(),
                "Requested accelerator is unavailable, falling back to CPU"
            );
            Device::Cpu
        })
    }

    /// Human-readable device name for logs and the health endpoint.
    pub fn get_device_info(device: &Device) -> String {
        match device {
            Device::Cpu => "CPU".to_string(),
            Device::Cuda(_) => "CUDA GPU".to_string(),
            Device::Metal(_) => "Metal GPU (Apple Silicon)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!(" CPU ".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("mps".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().unwrap_err().contains("tpu"));
    }

    #[test]
    fn test_cpu_preference_is_cpu() {
        let device = DeviceManager::get_device(DevicePreference::Cpu);
        assert!(device.is_cpu());
        assert_eq!(DeviceKind::of(&device), DeviceKind::Cpu);
        assert_eq!(DeviceKind::of(&device).to_string(), "cpu");
        assert_eq!(DeviceManager::get_device_info(&device), "CPU");
    }

    #[test]
    fn test_device_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(DeviceKind::Accelerated).unwrap(), "accelerated");
    }
}
