use crate::config::TcpGroupConfig;
use crate::error::{Result, RingError};
use crate::transport::{LocalTransport, TcpTransport, Transport};
use crate::types::Rank;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One rank's membership in a fixed-size process group.
///
/// Wraps the messaging substrate and tracks whether a
/// [`Collectives`](crate::Collectives) instance is currently attached, so a
/// second initialization on the same endpoint is refused until the first is
/// shut down.
pub struct Group {
    transport: Arc<dyn Transport>,
    attached: AtomicBool,
}

impl Group {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            attached: AtomicBool::new(false),
        })
    }

    /// Bootstrap `world_size` in-process endpoints connected by channels.
    ///
    /// Convenience for tests and single-process runs where every rank is a
    /// tokio task.
    pub fn bootstrap_local(world_size: u32) -> Vec<Arc<Group>> {
        tracing::info!(world_size, "bootstrapping local group");
        LocalTransport::mesh(world_size)
            .into_iter()
            .map(|t| Group::new(t))
            .collect()
    }

    /// Join a TCP group as `cfg.rank`. Returns once connections to every
    /// other rank are established.
    pub async fn bootstrap_tcp(cfg: &TcpGroupConfig) -> Result<Arc<Group>> {
        tracing::info!(rank = cfg.rank, world_size = cfg.world_size, "joining tcp group");
        let transport = TcpTransport::connect(cfg).await?;
        Ok(Group::new(Arc::new(transport)))
    }

    /// Bootstrap `world_size` TCP endpoints on loopback in this process.
    pub async fn bootstrap_tcp_local(world_size: u32) -> Result<Vec<Arc<Group>>> {
        tracing::info!(world_size, "bootstrapping loopback tcp group");
        Ok(TcpTransport::bootstrap_local(world_size)
            .await?
            .into_iter()
            .map(|t| Group::new(Arc::new(t)))
            .collect())
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn world_size(&self) -> u32 {
        self.transport.world_size()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Next rank clockwise around the ring.
    pub fn next(&self) -> Rank {
        (self.rank() + 1) % self.world_size()
    }

    /// Previous rank around the ring.
    pub fn prev(&self) -> Rank {
        (self.rank() + self.world_size() - 1) % self.world_size()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self) -> Result<()> {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RingError::AlreadyInitialized { rank: self.rank() })
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Close the substrate. No collective may run on this group afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(rank = self.rank(), "group shutdown");
        self.transport.shutdown().await
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .field("attached", &self.is_attached())
            .finish()
    }
}
