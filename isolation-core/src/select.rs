//! Cache-sharing aware CPU selection
//!
//! Picks logical CPUs from a [`CpuInfo`] so that the chosen CPUs share exactly the cache levels
//! a [`SharingPolicy`] permits. Selection is greedy over the topology's natural
//! (socket, core, thread) order, which makes it deterministic and spreads the choice over
//! distinct cores and sockets before reusing shared resources.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use crate::topology::{CpuInfo, LogicalCpu};

/// Which cache levels the selected CPUs may share with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingPolicy {
    /// No shared cache at all: every CPU on a different socket
    ShareNone,

    /// Shared last-level cache is fine, but no two CPUs on the same physical core
    ShareLLCButNotL1L2,

    /// Hyperthread siblings are allowed, so CPUs may share L1/L2
    ShareL1L2,
}

impl SharingPolicy {
    /// Every policy, from most to least isolated
    pub const ALL: [SharingPolicy; 3] = [
        SharingPolicy::ShareNone,
        SharingPolicy::ShareLLCButNotL1L2,
        SharingPolicy::ShareL1L2,
    ];

    /// Canonical name of the policy
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShareNone => "ShareNone",
            Self::ShareLLCButNotL1L2 => "ShareLLCButNotL1L2",
            Self::ShareL1L2 => "ShareL1L2",
        }
    }

    /// Most CPUs this policy can ever select on the given topology
    pub fn capacity(&self, topology: &CpuInfo) -> usize {
        match self {
            Self::ShareNone => topology.sockets(),
            Self::ShareLLCButNotL1L2 => topology.physical_cores(),
            Self::ShareL1L2 => topology.logical_cores(),
        }
    }
}

impl fmt::Display for SharingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for SharingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidRequest {
                reason: format!("unknown sharing policy '{s}'"),
            })
    }
}

/// Resources already claimed during one selection walk
#[derive(Default)]
struct Claimed {
    sockets: BTreeSet<usize>,
    cores: BTreeSet<usize>,
}

impl Claimed {
    fn admits(&self, cpu: &LogicalCpu, policy: SharingPolicy) -> bool {
        match policy {
            SharingPolicy::ShareNone => !self.sockets.contains(&cpu.socket),
            SharingPolicy::ShareLLCButNotL1L2 => !self.cores.contains(&cpu.core),
            // Logical ids are unique in the topology, so nothing to skip
            SharingPolicy::ShareL1L2 => true,
        }
    }

    fn claim(&mut self, cpu: &LogicalCpu) {
        self.sockets.insert(cpu.socket);
        self.cores.insert(cpu.core);
    }
}

/// Select `count` CPUs satisfying `policy`.
///
/// Fails with [`Error::InvalidRequest`] for `count == 0` and with
/// [`Error::InsufficientTopology`] when the topology cannot provide `count` CPUs under the
/// policy. The result is the same for the same `(topology, count, policy)`.
pub fn select_cpus(topology: &CpuInfo, count: usize, policy: SharingPolicy) -> Result<CpuSet> {
    select_cpus_excluding(topology, count, policy, &CpuSet::new())
}

/// Like [`select_cpus`], but never picks a CPU in `exclude`.
///
/// Use this to place a second workload next to one that already owns some CPUs. The policy
/// only constrains CPUs within the new selection; sharing with excluded CPUs is not checked.
pub fn select_cpus_excluding(
    topology: &CpuInfo,
    count: usize,
    policy: SharingPolicy,
    exclude: &CpuSet,
) -> Result<CpuSet> {
    if count == 0 {
        return Err(Error::InvalidRequest {
            reason: "at least one CPU must be requested".to_string(),
        });
    }

    let mut claimed = Claimed::default();
    let mut selected = CpuSet::new();

    for cpu in topology.cpus() {
        if exclude.contains(cpu.id) || !claimed.admits(cpu, policy) {
            continue;
        }

        claimed.claim(cpu);
        selected.insert(cpu.id);

        if selected.len() == count {
            debug!(%policy, count, cpus = %selected, "selected CPUs");
            return Ok(selected);
        }
    }

    // The walk admits every CPU the policy allows, so what it found is the ceiling
    Err(Error::InsufficientTopology {
        requested: count,
        available: selected.len(),
        policy,
    })
}
