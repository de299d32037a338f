//! Device identities exposed by backends.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Cpu,
    Wasm,
    WebGpu,
}

impl Platform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Wasm => "wasm",
            Self::WebGpu => "webgpu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub platform: Platform,
    pub host_id: u32,
}

#[cfg(test)]
mod tests {
    use super::{DeviceId, Platform};

    #[test]
    fn device_id_display() {
        assert_eq!(DeviceId(0).to_string(), "device0");
        assert_eq!(DeviceId(3).to_string(), "device3");
    }

    #[test]
    fn platform_names_are_stable() {
        assert_eq!(Platform::Cpu.as_str(), "cpu");
        assert_eq!(Platform::Wasm.as_str(), "wasm");
        assert_eq!(Platform::WebGpu.as_str(), "webgpu");
    }
}
