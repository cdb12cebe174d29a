use anyhow::{Context, Result};
use isolation_core::{select_cpus, select_cpus_excluding, CpuInfo, SharingPolicy};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let topology = CpuInfo::detect().context("Failed to discover CPU topology")?;
    println!("{:?}", topology);

    // Most isolated placement first, then a best-effort neighbour on what is left
    for policy in SharingPolicy::ALL {
        let count = policy.capacity(&topology);
        let cpus = select_cpus(&topology, count, policy)
            .with_context(|| format!("Failed to select {count} CPUs under {policy}"))?;
        println!("{policy:<20} max {count:>3}: {cpus}");
    }

    let hp = select_cpus(&topology, 1, SharingPolicy::ShareLLCButNotL1L2)
        .context("Failed to place the high-priority workload")?;
    match select_cpus_excluding(&topology, 1, SharingPolicy::ShareL1L2, &hp) {
        Ok(be) => println!("\nhigh priority: {hp}\nbest effort:   {be}"),
        Err(e) => println!("\nhigh priority: {hp}\nno room for a best-effort workload: {e}"),
    }

    // Asking for one core too many is reported, not retried
    let too_many = topology.physical_cores() + 1;
    if let Err(e) = select_cpus(&topology, too_many, SharingPolicy::ShareLLCButNotL1L2) {
        println!("\n{e}");
    }

    Ok(())
}
