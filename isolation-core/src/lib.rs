//! Isolation Core - CPU topology discovery and cache-aware core selection
//!
//! This library places workloads for performance-isolation experiments. It models which
//! logical CPUs share L1/L2 and last-level cache, and selects CPU sets that honour a
//! [`SharingPolicy`].
//!
//! ```no_run
//! use isolation_core::{CpuInfo, CpuSet, SharingPolicy};
//!
//! let topology = CpuInfo::detect()?;
//! let mut cpus = CpuSet::new();
//! cpus.select(&topology, topology.physical_cores(), SharingPolicy::ShareLLCButNotL1L2)?;
//! println!("taskset -c {cpus}");
//! # Ok::<(), isolation_core::Error>(())
//! ```

/// Error types
pub mod error;

/// CPU topology discovery and model
pub mod topology;

/// Ordered sets of logical CPUs
pub mod cpuset;

/// Cache-sharing aware CPU selection
pub mod select;

pub use cpuset::CpuSet;
pub use error::{Error, Result};
pub use select::{select_cpus, select_cpus_excluding, SharingPolicy};
pub use topology::{CpuInfo, LogicalCpu};
