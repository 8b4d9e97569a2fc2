use std::fmt;

use serde::Serialize;

/// Configured compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
}

impl DeviceSpec {
    pub fn parse(raw: &str) -> DeviceSpec {
        let lower = raw.trim().to_lowercase();
        if lower.starts_with("cuda") || lower.starts_with("gpu") {
            let idx = lower
                .split(':')
                .nth(1)
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(0);
            DeviceSpec::Cuda(idx)
        } else {
            DeviceSpec::Cpu
        }
    }

    #[cfg(feature = "tch-backend")]
    pub fn to_tch(self) -> tch::Device {
        match self {
            DeviceSpec::Cpu => tch::Device::Cpu,
            DeviceSpec::Cuda(idx) => tch::Device::Cuda(idx),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => f.write_str("cpu"),
            DeviceSpec::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device: String,
    pub accelerator_available: bool,
    pub total_bytes: u64,
}

/// The memory-bearing device models are loaded onto.
pub trait Accelerator: Send + Sync {
    fn device(&self) -> DeviceSpec;

    fn is_available(&self) -> bool;

    fn total_bytes(&self) -> u64;

    /// Ask the runtime to hand freed memory back after an eviction.
    fn reclaim(&self);

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            device: self.device().to_string(),
            accelerator_available: self.is_available(),
            total_bytes: self.total_bytes(),
        }
    }
}

pub struct DeviceAccelerator {
    device: DeviceSpec,
    total_bytes: u64,
}

impl DeviceAccelerator {
    /// A CUDA request degrades to CPU when no CUDA runtime can be found.
    /// Builds without libtorch cannot probe, so there a configured memory
    /// size stands in for the probe.
    pub fn new(requested: DeviceSpec, total_bytes: u64) -> Self {
        let device = match requested {
            DeviceSpec::Cuda(_) if !cuda_present(total_bytes) => {
                tracing::warn!(
                    %requested,
                    total_bytes,
                    "CUDA not available, falling back to cpu"
                );
                DeviceSpec::Cpu
            }
            other => other,
        };
        Self {
            device,
            total_bytes,
        }
    }

    pub fn cpu() -> Self {
        Self {
            device: DeviceSpec::Cpu,
            total_bytes: 0,
        }
    }
}

impl Accelerator for DeviceAccelerator {
    fn device(&self) -> DeviceSpec {
        self.device
    }

    fn is_available(&self) -> bool {
        self.device != DeviceSpec::Cpu
    }

    fn total_bytes(&self) -> u64 {
        if self.is_available() { self.total_bytes } else { 0 }
    }

    fn reclaim(&self) {
        #[cfg(feature = "tch-backend")]
        if let DeviceSpec::Cuda(idx) = self.device {
            tch::Cuda::synchronize(idx as i64);
        }
        tracing::debug!(device = %self.device, "accelerator memory reclaimed");
    }
}

#[cfg(feature = "tch-backend")]
fn cuda_present(_configured_bytes: u64) -> bool {
    tch::Cuda::is_available()
}

#[cfg(not(feature = "tch-backend"))]
fn cuda_present(configured_bytes: u64) -> bool {
    configured_bytes > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_strings() {
        assert_eq!(DeviceSpec::parse("cpu"), DeviceSpec::Cpu);
        assert_eq!(DeviceSpec::parse("CUDA"), DeviceSpec::Cuda(0));
        assert_eq!(DeviceSpec::parse("cuda:2"), DeviceSpec::Cuda(2));
        assert_eq!(DeviceSpec::parse("cuda:x"), DeviceSpec::Cuda(0));
        assert_eq!(DeviceSpec::parse("metal"), DeviceSpec::Cpu);
    }

    #[test]
    fn cpu_reports_no_memory() {
        let cpu = DeviceAccelerator::new(DeviceSpec::Cpu, 24 << 30);
        assert!(!cpu.is_available());
        assert_eq!(cpu.total_bytes(), 0);
        assert_eq!(cpu.info().device, "cpu");
    }

    #[cfg(not(feature = "tch-backend"))]
    #[test]
    fn unprobed_cuda_needs_configured_memory() {
        let unsized_gpu = DeviceAccelerator::new(DeviceSpec::Cuda(0), 0);
        assert_eq!(unsized_gpu.device(), DeviceSpec::Cpu);
        assert!(!unsized_gpu.info().accelerator_available);

        let sized_gpu = DeviceAccelerator::new(DeviceSpec::Cuda(1), 24 << 30);
        assert_eq!(sized_gpu.device(), DeviceSpec::Cuda(1));
        assert!(sized_gpu.is_available());
        assert_eq!(sized_gpu.total_bytes(), 24 << 30);
    }
}
