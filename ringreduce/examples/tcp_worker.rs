//! One rank of a multi-process allreduce over TCP.
//!
//! Start one process per rank with the same peer list:
//!
//! ```bash
//! export RINGREDUCE_PEERS=127.0.0.1:7100,127.0.0.1:7101,127.0.0.1:7102
//! RINGREDUCE_RANK=0 cargo run --example tcp_worker &
//! RINGREDUCE_RANK=1 cargo run --example tcp_worker &
//! RINGREDUCE_RANK=2 cargo run --example tcp_worker
//! ```
//!
//! Pass `gpu:N` (with `--features cuda`) to run on an accelerator.

use ringreduce::harness::{quick_plan, verify_allreduce};
use ringreduce::{
    AcceleratorRuntime, CollectiveConfig, Collectives, DeviceSelector, Group, TcpGroupConfig,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ringreduce::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let selector: DeviceSelector = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DeviceSelector::Host,
    };

    let cfg = TcpGroupConfig::from_env()?;
    let group = Group::bootstrap_tcp(&cfg).await?;
    let coll = Collectives::init_with_selector(
        Arc::clone(&group),
        selector,
        runtime(selector)?,
        CollectiveConfig::from_env(),
    )?;

    let reports = verify_allreduce(&coll, &quick_plan(), 1.0f32).await?;
    if coll.rank() == 0 {
        for report in &reports {
            println!("{report}");
        }
    }
    println!("rank {}: {:?}", coll.rank(), coll.stats());

    coll.shutdown();
    group.shutdown().await
}

#[cfg(feature = "cuda")]
fn runtime(selector: DeviceSelector) -> ringreduce::Result<Option<Arc<dyn AcceleratorRuntime>>> {
    match selector {
        DeviceSelector::Host => Ok(None),
        DeviceSelector::Accelerator(_) => {
            let rt: Arc<dyn AcceleratorRuntime> = ringreduce::CudaRuntime::new()?;
            Ok(Some(rt))
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn runtime(_selector: DeviceSelector) -> ringreduce::Result<Option<Arc<dyn AcceleratorRuntime>>> {
    Ok(None)
}
