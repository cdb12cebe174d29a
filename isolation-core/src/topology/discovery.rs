//! Hardware topology discovery
//!
//! Reads `/proc/cpuinfo` (and the online CPU list from sysfs) and turns it into logical CPU
//! placements. The source is a trait so tests can feed synthetic text.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use crate::topology::cpu_info::LogicalCpu;

/// Default location of the processor description file.
pub const DEFAULT_CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Default location of the online CPU list.
pub const DEFAULT_ONLINE_PATH: &str = "/sys/devices/system/cpu/online";

/// Where discovery reads the hardware description from.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Path to the `/proc/cpuinfo` style file.
    pub cpuinfo_path: PathBuf,

    /// Path to the cpulist of online CPUs. A missing file means every listed CPU is online.
    pub online_path: PathBuf,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            cpuinfo_path: PathBuf::from(DEFAULT_CPUINFO_PATH),
            online_path: PathBuf::from(DEFAULT_ONLINE_PATH),
        }
    }
}

/// Supplier of raw hardware topology text.
///
/// Reads are synchronous; the data comes from virtual filesystems that never touch storage.
pub trait TopologySource: fmt::Debug {
    /// Contents of `/proc/cpuinfo`: blank-line separated blocks of `key : value` lines.
    fn cpuinfo(&self) -> io::Result<String>;

    /// Cpulist of online CPUs, or `None` if the platform does not expose one.
    fn online_cpus(&self) -> io::Result<Option<String>>;
}

/// Reads topology from procfs and sysfs.
#[derive(Debug, Clone, Default)]
pub struct ProcfsSource {
    options: DiscoveryOptions,
}

impl ProcfsSource {
    /// Create a source reading the given paths
    pub fn new(options: DiscoveryOptions) -> Self {
        Self { options }
    }
}

impl TopologySource for ProcfsSource {
    fn cpuinfo(&self) -> io::Result<String> {
        fs::read_to_string(&self.options.cpuinfo_path)
    }

    fn online_cpus(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.options.online_path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One `/proc/cpuinfo` block, reduced to the keys topology cares about
#[derive(Debug, Default)]
struct CpuinfoBlock {
    processor: Option<usize>,
    physical_id: Option<usize>,
    core_id: Option<usize>,
    cpu_cores: Option<usize>,
    siblings: Option<usize>,
}

impl CpuinfoBlock {
    fn has_topology(&self) -> bool {
        self.physical_id.is_some() || self.core_id.is_some()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let slot = match key {
            "processor" => &mut self.processor,
            "physical id" => &mut self.physical_id,
            "core id" => &mut self.core_id,
            "cpu cores" => &mut self.cpu_cores,
            "siblings" => &mut self.siblings,
            _ => return Ok(()),
        };

        let parsed = value.parse::<usize>().map_err(|e| {
            Error::discovery(format!("cpuinfo key '{key}' has non-numeric value '{value}': {e}"))
        })?;
        *slot = Some(parsed);
        Ok(())
    }
}

fn parse_blocks(cpuinfo: &str) -> Result<Vec<CpuinfoBlock>> {
    let mut blocks = Vec::new();
    let mut current = CpuinfoBlock::default();
    let mut in_block = false;

    for line in cpuinfo.lines() {
        if line.trim().is_empty() {
            if in_block {
                blocks.push(std::mem::take(&mut current));
                in_block = false;
            }
            continue;
        }

        in_block = true;
        if let Some((key, value)) = line.split_once(':') {
            current.set(key.trim(), value.trim())?;
        }
    }

    if in_block {
        blocks.push(current);
    }

    Ok(blocks)
}

/// Read the source and produce validated logical CPU placements with dense core and socket
/// indices.
pub(crate) fn read_logical_cpus(source: &dyn TopologySource) -> Result<Vec<LogicalCpu>> {
    let cpuinfo = source
        .cpuinfo()
        .map_err(|e| Error::discovery_io("cannot read cpuinfo", e))?;
    let online = source
        .online_cpus()
        .map_err(|e| Error::discovery_io("cannot read online CPU list", e))?
        .map(|list| CpuSet::parse_cpulist(&list))
        .transpose()
        .map_err(|e| Error::discovery(format!("malformed online CPU list: {e}")))?;

    parse_cpuinfo(&cpuinfo, online.as_ref())
}

/// Turn `/proc/cpuinfo` text into logical CPU placements.
///
/// Physical cores are identified by `(physical id, core id)`. Sockets and cores are renumbered
/// densely in ascending order of those raw ids. When `online` is given, other processors are
/// dropped.
pub fn parse_cpuinfo(cpuinfo: &str, online: Option<&CpuSet>) -> Result<Vec<LogicalCpu>> {
    let mut blocks = Vec::new();
    let mut offline = 0usize;
    for block in parse_blocks(cpuinfo)? {
        let processor = block.processor;
        match processor {
            Some(id) if online.map_or(true, |set| set.contains(id)) => blocks.push(block),
            Some(_) => offline += 1,
            None if block.has_topology() => {
                return Err(Error::discovery(
                    "cpuinfo block carries topology keys but no processor id",
                ));
            }
            // Summary blocks such as "Hardware" on ARM
            None => {}
        }
    }

    if blocks.is_empty() {
        return Err(Error::discovery("cpuinfo lists no processors"));
    }

    let mut seen = BTreeSet::new();
    if let Some(id) = blocks.iter().filter_map(|b| b.processor).find(|&id| !seen.insert(id)) {
        return Err(Error::discovery(format!("processor {id} listed twice in cpuinfo")));
    }

    let with_topology = blocks.iter().filter(|b| b.has_topology()).count();
    if with_topology == 0 {
        warn!(
            processors = blocks.len(),
            "cpuinfo has no socket/core ids, assuming one socket without hyperthreading"
        );
        return Ok(flat_layout(&blocks));
    }
    if with_topology != blocks.len() {
        return Err(Error::discovery("only some cpuinfo blocks carry socket/core ids"));
    }

    let mut placements = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let (Some(id), Some(package), Some(core)) =
            (block.processor, block.physical_id, block.core_id)
        else {
            return Err(Error::discovery(format!(
                "processor {} has only one of 'physical id' and 'core id'",
                block.processor.unwrap_or_default()
            )));
        };
        placements.push((id, package, core));
    }

    let socket_index: BTreeMap<usize, usize> = placements
        .iter()
        .map(|&(_, package, _)| package)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(index, package)| (package, index))
        .collect();
    let core_index: BTreeMap<(usize, usize), usize> = placements
        .iter()
        .map(|&(_, package, core)| (package, core))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(index, key)| (key, index))
        .collect();

    if offline == 0 {
        check_declared_counts(&blocks)?;
    }

    let cpus: Vec<LogicalCpu> = placements
        .iter()
        .map(|&(id, package, core)| {
            LogicalCpu::new(id, core_index[&(package, core)], socket_index[&package])
        })
        .collect();

    debug!(
        processors = cpus.len(),
        sockets = socket_index.len(),
        cores = core_index.len(),
        "parsed cpuinfo"
    );

    Ok(cpus)
}

/// Compare what each socket declares (`cpu cores`, `siblings`) with what was listed.
///
/// Only meaningful when no processor was dropped as offline.
fn check_declared_counts(blocks: &[CpuinfoBlock]) -> Result<()> {
    let mut cores_per_package: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    let mut threads_per_package: BTreeMap<usize, usize> = BTreeMap::new();

    for block in blocks {
        if let (Some(package), Some(core)) = (block.physical_id, block.core_id) {
            cores_per_package.entry(package).or_default().insert(core);
            *threads_per_package.entry(package).or_default() += 1;
        }
    }

    for block in blocks {
        let Some(package) = block.physical_id else {
            continue;
        };

        if let Some(declared) = block.cpu_cores {
            let listed = cores_per_package.get(&package).map_or(0, BTreeSet::len);
            if listed != declared {
                return Err(Error::discovery(format!(
                    "socket {package} declares {declared} cores but lists {listed}"
                )));
            }
        }

        if let Some(declared) = block.siblings {
            let listed = threads_per_package.get(&package).copied().unwrap_or_default();
            if listed != declared {
                return Err(Error::discovery(format!(
                    "socket {package} declares {declared} threads but lists {listed}"
                )));
            }
        }
    }

    Ok(())
}

fn flat_layout(blocks: &[CpuinfoBlock]) -> Vec<LogicalCpu> {
    let mut ids: Vec<usize> = blocks.iter().filter_map(|b| b.processor).collect();
    ids.sort_unstable();
    ids.into_iter()
        .enumerate()
        .map(|(core, id)| LogicalCpu::new(id, core, 0))
        .collect()
}
