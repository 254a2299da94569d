//! Device placement for local models.
//!
//! Local checkpoints run inside their inference server, which owns the
//! device. The gateway resolves the configured placement once so it can be
//! logged and reported next to the model.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

/// Where a local model runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
    /// Accelerated device if one is visible, else CPU.
    #[default]
    Auto,
    Cpu,
    /// CUDA GPU with the given ordinal.
    Cuda(usize),
}

impl Device {
    /// Resolve `Auto` against the host. Explicit placements are returned as is.
    pub fn resolve(self) -> Device {
        match self {
            Device::Auto if cuda_visible() => Device::Cuda(0),
            Device::Auto => Device::Cpu,
            other => other,
        }
    }
}

/// A GPU is usable when the driver exposes a device node and
/// `CUDA_VISIBLE_DEVICES` does not hide every device.
fn cuda_visible() -> bool {
    let hidden = std::env::var("CUDA_VISIBLE_DEVICES")
        .map(|v| v.trim().is_empty() || v.trim() == "-1")
        .unwrap_or(false);
    !hidden && Path::new("/dev/nvidia0").exists()
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid device {0:?}: expected auto, cpu, cuda or cuda:N")]
pub struct InvalidDevice(String);

impl FromStr for Device {
    type Err = InvalidDevice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| InvalidDevice(other.to_string())),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(n) => write!(f, "cuda:{n}"),
        }
    }
}
