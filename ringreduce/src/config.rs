//! Runtime-configurable parameters for ringreduce.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `RINGREDUCE_`) or by constructing the structs directly.

use crate::error::{Result, RingError};
use crate::types::Rank;
use std::net::SocketAddr;
use std::time::Duration;

/// Tuning parameters for the collectives.
#[derive(Debug, Clone)]
pub struct CollectiveConfig {
    /// Timeout for each individual send/recv within a round. A peer that
    /// stalls longer surfaces as a communication failure instead of a hang.
    pub collective_timeout: Duration,

    /// Number of host staging buffers pre-allocated at initialization.
    pub staging_pool_buffers: usize,

    /// Nominal capacity of each staging buffer.
    pub staging_buffer_bytes: usize,

    /// Reject segments whose sender declared a different total length or
    /// element type than ours.
    pub verify_lengths: bool,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            staging_pool_buffers: 8,
            staging_buffer_bytes: 4 * 1024 * 1024, // 4 MiB
            verify_lengths: true,
        }
    }
}

impl CollectiveConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `RINGREDUCE_COLLECTIVE_TIMEOUT_MS`
    /// - `RINGREDUCE_STAGING_POOL_BUFFERS`
    /// - `RINGREDUCE_STAGING_BUFFER_BYTES`
    /// - `RINGREDUCE_VERIFY_LENGTHS` (`0`/`false` disables)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("RINGREDUCE_COLLECTIVE_TIMEOUT_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            cfg.collective_timeout = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("RINGREDUCE_STAGING_POOL_BUFFERS")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.staging_pool_buffers = n;
        }
        if let Ok(v) = std::env::var("RINGREDUCE_STAGING_BUFFER_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.staging_buffer_bytes = n;
        }
        if let Ok(v) = std::env::var("RINGREDUCE_VERIFY_LENGTHS") {
            cfg.verify_lengths = !matches!(v.trim(), "0" | "false" | "no" | "off");
        }

        cfg
    }

    /// Builder-style timeout override.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.collective_timeout = timeout;
        self
    }
}

/// Addresses and identity for a TCP-connected group.
#[derive(Debug, Clone)]
pub struct TcpGroupConfig {
    pub rank: Rank,
    pub world_size: u32,
    /// Listen address of every rank, indexed by rank.
    pub peers: Vec<SocketAddr>,
    /// How long to keep retrying connections to lower-ranked peers that are
    /// not listening yet.
    pub connect_timeout: Duration,
}

impl TcpGroupConfig {
    pub fn new(rank: Rank, peers: Vec<SocketAddr>) -> Self {
        Self {
            rank,
            world_size: peers.len() as u32,
            peers,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Load from the environment.
    ///
    /// Required: `RINGREDUCE_RANK`, `RINGREDUCE_PEERS` (comma-separated
    /// `host:port` list in rank order). Optional: `RINGREDUCE_WORLD_SIZE`
    /// (must match the peer count), `RINGREDUCE_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let rank = required_env("RINGREDUCE_RANK")?
            .parse::<Rank>()
            .map_err(|e| RingError::Config(format!("RINGREDUCE_RANK: {e}")))?;
        let peers = parse_peers(&required_env("RINGREDUCE_PEERS")?)?;
        let mut cfg = Self::new(rank, peers);

        if let Ok(v) = std::env::var("RINGREDUCE_WORLD_SIZE") {
            cfg.world_size = v
                .parse::<u32>()
                .map_err(|e| RingError::Config(format!("RINGREDUCE_WORLD_SIZE: {e}")))?;
        }
        if let Ok(v) = std::env::var("RINGREDUCE_CONNECT_TIMEOUT_SECS")
            && let Ok(s) = v.parse::<u64>()
        {
            cfg.connect_timeout = Duration::from_secs(s);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(RingError::Config("world size must be at least 1".into()));
        }
        if self.peers.len() != self.world_size as usize {
            return Err(RingError::Config(format!(
                "world size is {} but {} peer address(es) were given",
                self.world_size,
                self.peers.len()
            )));
        }
        if self.rank >= self.world_size {
            return Err(RingError::InvalidRank {
                rank: self.rank,
                world_size: self.world_size,
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| RingError::Config(format!("{name} is not set")))
}

/// Parse a comma-separated list of socket addresses.
pub fn parse_peers(list: &str) -> Result<Vec<SocketAddr>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .map_err(|e| RingError::Config(format!("invalid peer address {s:?}: {e}")))
        })
        .collect()
}
