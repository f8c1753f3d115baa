//! Verify and time the ring allreduce across in-process ranks.
//!
//! Every rank fills its buffer with 1.0 and checks that each element of the
//! result equals the world size. Rank 0 reports the mean time per call for
//! each buffer size.
//!
//! ```bash
//! cargo run --release --example verify_allreduce -- cpu
//! cargo run --release --example verify_allreduce -- sim --full
//! cargo run --release --features cuda --example verify_allreduce -- gpu
//! ```
//!
//! `RINGREDUCE_WORLD_SIZE` sets the number of ranks (default 4).

use ringreduce::harness::{default_plan, quick_plan, verify_allreduce};
use ringreduce::{
    AcceleratorRuntime, CollectiveConfig, Collectives, DeviceContext, Group, RingError,
    SimulatedAccelerator,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: verify_allreduce (cpu|sim|gpu) [--full]";

#[tokio::main]
async fn main() -> ringreduce::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(mode) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let full = args.iter().any(|a| a == "--full");

    let world_size: u32 = match std::env::var("RINGREDUCE_WORLD_SIZE") {
        Ok(v) => v
            .parse()
            .map_err(|_| RingError::Config(format!("invalid RINGREDUCE_WORLD_SIZE {v:?}")))?,
        Err(_) => 4,
    };

    let contexts: Vec<DeviceContext> = match mode.as_str() {
        "cpu" => (0..world_size).map(|_| DeviceContext::host()).collect(),
        "sim" => {
            let rt: Arc<dyn AcceleratorRuntime> = SimulatedAccelerator::new(world_size);
            (0..world_size)
                .map(|rank| DeviceContext::accelerator(Arc::clone(&rt), rank))
                .collect::<ringreduce::Result<_>>()?
        }
        "gpu" => gpu_contexts(world_size)?,
        other => {
            eprintln!("unknown mode {other:?}\n{USAGE}");
            std::process::exit(1);
        }
    };

    let plan = if full { default_plan() } else { quick_plan() };
    let config = CollectiveConfig::from_env();
    let groups = Group::bootstrap_local(world_size);

    let mut handles = Vec::new();
    for (group, ctx) in groups.into_iter().zip(contexts) {
        let coll = Collectives::init(group, ctx, config.clone())?;
        let plan = plan.clone();
        handles.push(tokio::spawn(async move {
            let reports = verify_allreduce(&coll, &plan, 1.0f32).await?;
            ringreduce::Result::Ok((coll.rank(), reports))
        }));
    }

    for h in handles {
        let (rank, reports) = h
            .await
            .map_err(|e| RingError::Config(format!("rank task panicked: {e}")))??;
        if rank == 0 {
            for report in reports {
                println!("{report}");
            }
        }
    }
    Ok(())
}

/// One context per rank, spread round-robin over the visible GPUs.
#[cfg(feature = "cuda")]
fn gpu_contexts(world_size: u32) -> ringreduce::Result<Vec<DeviceContext>> {
    let rt: Arc<dyn AcceleratorRuntime> = ringreduce::CudaRuntime::new()?;
    let count = rt.device_count()?;
    if count == 0 {
        return Err(RingError::Config("no CUDA devices visible".into()));
    }
    (0..world_size)
        .map(|rank| DeviceContext::accelerator(Arc::clone(&rt), rank % count))
        .collect()
}

#[cfg(not(feature = "cuda"))]
fn gpu_contexts(_world_size: u32) -> ringreduce::Result<Vec<DeviceContext>> {
    Err(RingError::Config(
        "gpu mode requires building with `--features cuda`".into(),
    ))
}
