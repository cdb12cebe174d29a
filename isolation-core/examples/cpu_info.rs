use anyhow::{Context, Result};
use isolation_core::topology;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Detect CPU topology
    let cpu_info = topology::detect_cpu_topology().context("Failed to detect CPU topology")?;
    println!("Detected {} sockets", cpu_info.sockets());
    println!("Detected {} physical cores", cpu_info.physical_cores());
    println!("Detected {} logical cores", cpu_info.logical_cores());

    for socket in 0..cpu_info.sockets() {
        println!("\nSocket {}:", socket);
        let mut cores: Vec<usize> = cpu_info.cpus_of_socket(socket).map(|cpu| cpu.core).collect();
        cores.dedup();
        for core in cores {
            let threads: Vec<usize> = cpu_info.cpus_of_core(core).map(|cpu| cpu.id).collect();
            println!("  Core {:>3}: threads {:?}", core, threads);
        }
    }

    if let Some(first) = cpu_info.cpus().first() {
        println!("\nCPU {} shares L1/L2 with {{{}}}", first.id, cpu_info.siblings_l1l2(first.id));
        println!("CPU {} shares LLC with {{{}}}", first.id, cpu_info.siblings_llc(first.id));
    }

    Ok(())
}
