//! CPU topology discovery and model
//!
//! This module is responsible for:
//! - Reading the socket / core / thread layout of the machine
//! - Answering which logical CPUs share L1/L2 or last-level cache

pub mod cpu_info;
pub mod discovery;

pub use cpu_info::{CpuInfo, LogicalCpu};
pub use discovery::{DiscoveryOptions, ProcfsSource, TopologySource};

use crate::error::Result;

/// Get the CPU topology of the current system
pub fn detect_cpu_topology() -> Result<CpuInfo> {
    CpuInfo::detect()
}

/// Get the CPU topology using explicit procfs/sysfs paths
pub fn detect_cpu_topology_with(options: DiscoveryOptions) -> Result<CpuInfo> {
    CpuInfo::detect_with(&ProcfsSource::new(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_cpu_topology() {
        let cpu_info = detect_cpu_topology().unwrap();
        println!("Detected {} logical cores", cpu_info.logical_cores());
        assert!(cpu_info.logical_cores() > 0);
    }

    #[test]
    fn test_detect_with_missing_cpuinfo_fails() {
        let options = DiscoveryOptions {
            cpuinfo_path: "/nonexistent/cpuinfo".into(),
            ..DiscoveryOptions::default()
        };
        assert!(detect_cpu_topology_with(options).is_err());
    }
}
