//! Device description and selection.

use std::fmt;
use std::str::FromStr;

use crate::config::QueueConfig;
use crate::error::{Result, TileKernelError};

/// Which device a queue should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceSelector {
    /// Best available device.
    #[default]
    Default,
    /// A CPU device.
    Cpu,
    /// A GPU device.
    Gpu,
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Default => write!(f, "default"),
            DeviceSelector::Cpu => write!(f, "cpu"),
            DeviceSelector::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = TileKernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "auto" => Ok(DeviceSelector::Default),
            "cpu" | "host" => Ok(DeviceSelector::Cpu),
            "gpu" => Ok(DeviceSelector::Gpu),
            other => Err(TileKernelError::config(format!(
                "unknown device selector '{}'",
                other
            ))),
        }
    }
}

/// Kind of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Host processor.
    Cpu,
    /// Graphics processor.
    Gpu,
}

/// Properties of a compute device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Device kind.
    pub device_type: DeviceType,
    /// Number of parallel compute units.
    pub compute_units: usize,
    /// Largest work-group the device accepts.
    pub max_work_group_size: usize,
    /// Local memory per work-group in bytes.
    pub local_memory_bytes: usize,
}

impl DeviceInfo {
    /// Describe the host CPU as configured by `config`.
    pub fn host(config: &QueueConfig) -> Self {
        let compute_units = if config.worker_threads > 0 {
            config.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };

        Self {
            name: format!(
                "Host CPU ({} {}, {} compute units)",
                std::env::consts::ARCH,
                std::env::consts::OS,
                compute_units
            ),
            device_type: DeviceType::Cpu,
            compute_units,
            max_work_group_size: config.max_work_group_size,
            local_memory_bytes: config.local_memory_bytes,
        }
    }

    /// Check if this device satisfies a selector.
    pub fn matches(&self, selector: DeviceSelector) -> bool {
        match selector {
            DeviceSelector::Default => true,
            DeviceSelector::Cpu => self.device_type == DeviceType::Cpu,
            DeviceSelector::Gpu => self.device_type == DeviceType::Gpu,
        }
    }
}

/// Devices visible to this process.
pub fn available_devices(config: &QueueConfig) -> Vec<DeviceInfo> {
    vec![DeviceInfo::host(config)]
}

/// Pick the first device matching the configured selector.
pub fn select_device(config: &QueueConfig) -> Result<DeviceInfo> {
    available_devices(config)
        .into_iter()
        .find(|d| d.matches(config.selector))
        .ok_or_else(|| TileKernelError::NoDevice(config.selector.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selects_host() {
        let device = select_device(&QueueConfig::default()).unwrap();
        assert_eq!(device.device_type, DeviceType::Cpu);
        assert!(device.name.starts_with("Host CPU"));
        assert_eq!(device.max_work_group_size, 1024);
    }

    #[test]
    fn test_gpu_selector_fails() {
        let config = QueueConfig::new().with_selector(DeviceSelector::Gpu);
        assert_eq!(
            select_device(&config),
            Err(TileKernelError::NoDevice("gpu".to_string()))
        );
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!("GPU".parse::<DeviceSelector>().unwrap(), DeviceSelector::Gpu);
        assert_eq!("host".parse::<DeviceSelector>().unwrap(), DeviceSelector::Cpu);
        assert!("fpga".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn test_worker_threads_sets_compute_units() {
        let config = QueueConfig::new().with_worker_threads(3);
        assert_eq!(DeviceInfo::host(&config).compute_units, 3);
    }
}
