//! Per-service configuration, loaded from JSON files at startup.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire::DeviceKind;

/// Network location of a peer service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAddr {
    pub host: String,
    pub port: u16,
}

impl ServiceAddr {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ServiceAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Short-term scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPolicy {
    /// Run to completion or block; the quantum is not enforced.
    #[serde(rename = "FIFO")]
    Fifo,
    /// Round robin with a fixed quantum per dispatch.
    #[serde(rename = "RR")]
    RoundRobin,
    /// Virtual round robin: processes coming back from a blocking syscall
    /// with quantum left are served first, keeping their remainder.
    #[serde(rename = "VRR")]
    VirtualRoundRobin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    pub port: u16,
    /// Total physical memory in bytes.
    pub memory_size: u32,
    /// Frame/page size in bytes. Must divide `memory_size`.
    pub page_size: u32,
    /// Directory holding the pseudocode files processes are created from.
    pub instructions_path: PathBuf,
    /// Simulated access latency applied before every reply.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpuConfig {
    pub port: u16,
    pub memory: ServiceAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    pub port: u16,
    pub memory: ServiceAddr,
    pub cpu: ServiceAddr,
    pub policy: SchedulingPolicy,
    /// Instructions per dispatch under RR/VRR.
    pub quantum: u32,
    /// Max processes admitted into READY+EXEC at once.
    pub multiprogramming: usize,
    /// Resource names, parallel to `resource_instances`.
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub resource_instances: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    pub port: u16,
    /// Name processes address this device by.
    pub name: String,
    pub kind: DeviceKind,
    /// Wall-clock milliseconds per work unit (GEN_SLEEP).
    #[serde(default)]
    pub unit_work_ms: u64,
    /// Host the kernel should dial back; defaults to loopback.
    #[serde(default = "default_host")]
    pub host: String,
    pub kernel: ServiceAddr,
    pub memory: ServiceAddr,
}

fn default_host() -> String {
    Ipv4Addr::LOCALHOST.to_string()
}

/// Load a service config from a JSON file.
pub fn load<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_config_parses() {
        let cfg: KernelConfig = serde_json::from_str(
            r#"{
                "port": 8001,
                "memory": {"host": "127.0.0.1", "port": 8002},
                "cpu": {"host": "127.0.0.1", "port": 8003},
                "policy": "VRR",
                "quantum": 3,
                "multiprogramming": 4,
                "resources": ["disk"],
                "resource_instances": [2]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.policy, SchedulingPolicy::VirtualRoundRobin);
        assert_eq!(cfg.memory.base_url(), "http://127.0.0.1:8002");
    }
}
