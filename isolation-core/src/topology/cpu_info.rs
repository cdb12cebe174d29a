//! CPU topology model
//!
//! This module holds the socket / physical core / hardware thread layout of a machine and
//! answers which logical CPUs share which cache level.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
#[cfg(target_os = "linux")]
use crate::topology::discovery::ProcfsSource;
use crate::topology::discovery::{self, TopologySource};

/// A single schedulable hardware thread and where it lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalCpu {
    /// Logical CPU identifier as the OS numbers it
    pub id: usize,
    /// Dense physical core index, `0..physical_cores`
    pub core: usize,
    /// Dense socket index, `0..sockets`
    pub socket: usize,
}

impl LogicalCpu {
    /// Create a new logical CPU entry
    pub fn new(id: usize, core: usize, socket: usize) -> Self {
        Self { id, core, socket }
    }
}

/// CPU topology: sockets, physical cores and hardware threads.
///
/// Built once by discovery (or from explicit data in tests) and read-only afterwards.
/// Core and socket indices are dense and start at zero. Cache sharing is derived from them:
/// threads of one physical core share L1/L2, cores of one socket share the last-level cache.
///
/// The [`Default`] value is the zero model with no CPUs, which is also what a failed
/// [`CpuInfo::discover`] leaves behind.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CpuInfo {
    /// Number of physical CPU packages
    sockets: usize,
    /// Number of physical cores across all sockets
    physical_cores: usize,
    /// Logical CPUs in (socket, core, id) order
    cpus: Vec<LogicalCpu>,
}

impl fmt::Debug for CpuInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuInfo")
            .field("sockets", &self.sockets)
            .field("physical_cores", &self.physical_cores)
            .field("logical_cores", &self.logical_cores())
            .finish()
    }
}

impl CpuInfo {
    /// Discover the topology of the current machine with default options
    pub fn detect() -> Result<Self> {
        let mut info = Self::default();
        info.discover()?;
        Ok(info)
    }

    /// Discover the topology from an explicit source
    pub fn detect_with(source: &dyn TopologySource) -> Result<Self> {
        let mut info = Self::default();
        info.discover_from(source)?;
        Ok(info)
    }

    /// Re-read the hardware and overwrite this model.
    ///
    /// On failure the model is reset to the zero state.
    pub fn discover(&mut self) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            self.discover_from(&ProcfsSource::default())?;
            if self.physical_cores != num_cpus::get_physical() {
                debug!(
                    physical_cores = self.physical_cores,
                    num_cpus_physical = num_cpus::get_physical(),
                    "physical core count differs from num_cpus"
                );
            }
            Ok(())
        }

        #[cfg(not(target_os = "linux"))]
        {
            *self = Self::flat(num_cpus::get_physical(), num_cpus::get());
            Ok(())
        }
    }

    /// Re-read the given source and overwrite this model.
    ///
    /// On failure the model is reset to the zero state.
    pub fn discover_from(&mut self, source: &dyn TopologySource) -> Result<()> {
        match discovery::read_logical_cpus(source).and_then(Self::from_cpus) {
            Ok(info) => {
                debug!(
                    sockets = info.sockets,
                    physical_cores = info.physical_cores,
                    logical_cores = info.logical_cores(),
                    "discovered CPU topology"
                );
                *self = info;
                Ok(())
            }
            Err(err) => {
                *self = Self::default();
                Err(err)
            }
        }
    }

    /// Build a model from explicit logical CPU placements.
    ///
    /// Core and socket indices must be dense from zero, logical ids unique, and every core
    /// must belong to exactly one socket.
    pub fn from_cpus(mut cpus: Vec<LogicalCpu>) -> Result<Self> {
        if cpus.is_empty() {
            return Err(Error::discovery("no logical CPUs found"));
        }

        let mut ids = BTreeSet::new();
        let mut core_socket: BTreeMap<usize, usize> = BTreeMap::new();
        let mut sockets = BTreeSet::new();

        for cpu in &cpus {
            if !ids.insert(cpu.id) {
                return Err(Error::discovery(format!("logical CPU {} listed twice", cpu.id)));
            }
            sockets.insert(cpu.socket);
            match core_socket.insert(cpu.core, cpu.socket) {
                Some(other) if other != cpu.socket => {
                    return Err(Error::discovery(format!(
                        "physical core {} spans sockets {} and {}",
                        cpu.core, other, cpu.socket
                    )));
                }
                _ => {}
            }
        }

        let physical_cores = core_socket.len();
        if let Some((&core, _)) = core_socket.iter().find(|&(&core, _)| core >= physical_cores) {
            return Err(Error::discovery(format!(
                "logical CPU claims physical core {core} outside 0..{physical_cores}"
            )));
        }
        if let Some(&socket) = sockets.iter().find(|&&socket| socket >= sockets.len()) {
            return Err(Error::discovery(format!(
                "logical CPU claims socket {socket} outside 0..{}",
                sockets.len()
            )));
        }

        cpus.sort_by_key(|cpu| (cpu.socket, cpu.core, cpu.id));

        Ok(Self {
            sockets: sockets.len(),
            physical_cores,
            cpus,
        })
    }

    /// Build a regular topology numbered the way Linux numbers Intel hosts.
    ///
    /// Thread `t` of global core `c` gets logical id `t * physical_cores + c`, so the first
    /// `physical_cores` ids are one thread per core. Any zero argument yields the zero model.
    pub fn synthetic(sockets: usize, cores_per_socket: usize, threads_per_core: usize) -> Self {
        let physical_cores = sockets * cores_per_socket;
        let mut cpus = Vec::with_capacity(physical_cores * threads_per_core);

        for socket in 0..sockets {
            for local_core in 0..cores_per_socket {
                let core = socket * cores_per_socket + local_core;
                for thread in 0..threads_per_core {
                    cpus.push(LogicalCpu::new(thread * physical_cores + core, core, socket));
                }
            }
        }

        Self::from_cpus(cpus).unwrap_or_default()
    }

    /// Single socket where logical CPUs are spread over `physical` cores round-robin
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    pub(crate) fn flat(physical: usize, logical: usize) -> Self {
        let physical = physical.clamp(1, logical.max(1));
        let cpus = (0..logical)
            .map(|id| LogicalCpu::new(id, id % physical, 0))
            .collect();
        Self::from_cpus(cpus).unwrap_or_default()
    }

    /// Number of physical CPU packages
    pub fn sockets(&self) -> usize {
        self.sockets
    }

    /// Number of physical cores across all sockets
    pub fn physical_cores(&self) -> usize {
        self.physical_cores
    }

    /// Number of schedulable hardware threads
    pub fn logical_cores(&self) -> usize {
        self.cpus.len()
    }

    /// Whether this is the zero model
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// All logical CPUs in ascending (socket, core, thread) order
    pub fn cpus(&self) -> &[LogicalCpu] {
        &self.cpus
    }

    /// All logical CPU identifiers
    pub fn all_cpus(&self) -> CpuSet {
        self.cpus.iter().map(|cpu| cpu.id).collect()
    }

    /// Logical CPUs of one socket, in (core, thread) order
    pub fn cpus_of_socket(&self, socket: usize) -> impl Iterator<Item = &LogicalCpu> + '_ {
        self.cpus.iter().filter(move |cpu| cpu.socket == socket)
    }

    /// Hardware threads of one physical core
    pub fn cpus_of_core(&self, core: usize) -> impl Iterator<Item = &LogicalCpu> + '_ {
        self.cpus.iter().filter(move |cpu| cpu.core == core)
    }

    fn lookup(&self, id: usize) -> Option<&LogicalCpu> {
        self.cpus.iter().find(|cpu| cpu.id == id)
    }

    /// Physical core owning the given logical CPU
    pub fn core_of(&self, id: usize) -> Option<usize> {
        self.lookup(id).map(|cpu| cpu.core)
    }

    /// Socket owning the given logical CPU
    pub fn socket_of(&self, id: usize) -> Option<usize> {
        self.lookup(id).map(|cpu| cpu.socket)
    }

    /// Logical CPUs sharing L1/L2 with `id` (its hyperthread siblings), excluding itself
    pub fn siblings_l1l2(&self, id: usize) -> CpuSet {
        match self.core_of(id) {
            Some(core) => self
                .cpus_of_core(core)
                .map(|cpu| cpu.id)
                .filter(|&other| other != id)
                .collect(),
            None => CpuSet::new(),
        }
    }

    /// Logical CPUs sharing the last-level cache with `id` (same socket), excluding itself
    pub fn siblings_llc(&self, id: usize) -> CpuSet {
        match self.socket_of(id) {
            Some(socket) => self
                .cpus_of_socket(socket)
                .map(|cpu| cpu.id)
                .filter(|&other| other != id)
                .collect(),
            None => CpuSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_info_detect() {
        let info = CpuInfo::detect().unwrap();
        println!("Detected CPU info: {:?}", info);

        assert!(info.logical_cores() > 0);
        assert!(info.sockets() > 0);
        assert!(info.physical_cores() >= info.sockets());
        assert!(info.logical_cores() >= info.physical_cores());
    }

    #[test]
    fn test_synthetic_counts() {
        let info = CpuInfo::synthetic(2, 4, 2);
        assert_eq!(info.sockets(), 2);
        assert_eq!(info.physical_cores(), 8);
        assert_eq!(info.logical_cores(), 16);
        assert!(!info.is_empty());
    }

    #[test]
    fn test_synthetic_numbering() {
        let info = CpuInfo::synthetic(2, 4, 2);

        // Second thread of core 0 is numbered after all first threads
        assert_eq!(info.core_of(0), Some(0));
        assert_eq!(info.core_of(8), Some(0));
        assert_eq!(info.core_of(5), Some(5));
        assert_eq!(info.socket_of(3), Some(0));
        assert_eq!(info.socket_of(4), Some(1));
        assert_eq!(info.socket_of(15), Some(1));
        assert_eq!(info.core_of(16), None);

        let order: Vec<usize> = info.cpus().iter().take(4).map(|cpu| cpu.id).collect();
        assert_eq!(order, vec![0, 8, 1, 9]);
    }

    #[test]
    fn test_synthetic_with_zero_dimension_is_empty() {
        assert!(CpuInfo::synthetic(0, 4, 2).is_empty());
        assert!(CpuInfo::synthetic(2, 0, 2).is_empty());
        assert!(CpuInfo::synthetic(2, 4, 0).is_empty());
        assert_eq!(CpuInfo::synthetic(2, 4, 0), CpuInfo::default());
    }

    #[test]
    fn test_siblings() {
        let info = CpuInfo::synthetic(2, 4, 2);

        assert_eq!(info.siblings_l1l2(1).to_vec(), vec![9]);
        assert_eq!(info.siblings_llc(1).to_vec(), vec![0, 2, 3, 8, 9, 10, 11]);
        assert!(info.siblings_l1l2(42).is_empty());

        for cpu in info.cpus() {
            let l1l2 = info.siblings_l1l2(cpu.id);
            let llc = info.siblings_llc(cpu.id);
            assert!(!l1l2.contains(cpu.id));
            assert_eq!(l1l2.difference(&llc), CpuSet::new());
        }
    }

    #[test]
    fn test_siblings_without_hyperthreading() {
        let info = CpuInfo::synthetic(1, 4, 1);
        assert_eq!(info.physical_cores(), info.logical_cores());
        assert!(info.siblings_l1l2(2).is_empty());
        assert_eq!(info.siblings_llc(2).len(), 3);
    }

    #[test]
    fn test_from_cpus_sorts_by_socket_core_thread() {
        let info = CpuInfo::from_cpus(vec![
            LogicalCpu::new(3, 1, 1),
            LogicalCpu::new(0, 0, 0),
            LogicalCpu::new(1, 1, 1),
            LogicalCpu::new(2, 0, 0),
        ])
        .unwrap();

        let order: Vec<usize> = info.cpus().iter().map(|cpu| cpu.id).collect();
        assert_eq!(order, vec![0, 2, 1, 3]);
        assert_eq!(info.all_cpus().to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_from_cpus_rejects_inconsistent_input() {
        let cases = vec![
            vec![],
            // Duplicate logical id
            vec![LogicalCpu::new(0, 0, 0), LogicalCpu::new(0, 1, 0)],
            // Core index outside the declared range
            vec![LogicalCpu::new(0, 0, 0), LogicalCpu::new(1, 5, 0)],
            // Socket index outside the declared range
            vec![LogicalCpu::new(0, 0, 0), LogicalCpu::new(1, 1, 3)],
            // Core on two sockets
            vec![LogicalCpu::new(0, 0, 0), LogicalCpu::new(1, 0, 1), LogicalCpu::new(2, 1, 1)],
        ];

        for cpus in cases {
            let result = CpuInfo::from_cpus(cpus.clone());
            assert!(
                matches!(result, Err(Error::DiscoveryFailure { .. })),
                "expected {cpus:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_flat_layout() {
        let info = CpuInfo::flat(2, 4);
        assert_eq!(info.sockets(), 1);
        assert_eq!(info.physical_cores(), 2);
        assert_eq!(info.logical_cores(), 4);
        assert_eq!(info.siblings_l1l2(0).to_vec(), vec![2]);

        let clamped = CpuInfo::flat(0, 3);
        assert_eq!(clamped.physical_cores(), 1);
    }
}
