use super::Transport;
use crate::error::{Result, RingError};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, mpsc};

/// Messages buffered per ordered pair of ranks before senders wait.
const CHANNEL_CAPACITY: usize = 64;

/// In-process transport: a full mesh of bounded channels, one per ordered
/// pair of ranks.
pub struct LocalTransport {
    rank: Rank,
    world_size: u32,
    /// Outgoing channel per destination rank. `None` after shutdown.
    senders: StdMutex<Vec<Option<mpsc::Sender<Vec<u8>>>>>,
    /// Incoming channel per source rank.
    receivers: Vec<Mutex<mpsc::Receiver<Vec<u8>>>>,
}

impl LocalTransport {
    /// Build `world_size` connected endpoints, indexed by rank.
    pub fn mesh(world_size: u32) -> Vec<Arc<LocalTransport>> {
        let n = world_size as usize;
        // txs[src][dst], rxs[dst][src]
        let mut txs: Vec<Vec<Option<mpsc::Sender<Vec<u8>>>>> = vec![Vec::with_capacity(n); n];
        let mut rxs: Vec<Vec<Option<mpsc::Receiver<Vec<u8>>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        for (src, row) in txs.iter_mut().enumerate() {
            for dst_rxs in rxs.iter_mut() {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                row.push(Some(tx));
                dst_rxs[src] = Some(rx);
            }
        }

        txs.into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (senders, receivers))| {
                Arc::new(LocalTransport {
                    rank: rank as Rank,
                    world_size,
                    senders: StdMutex::new(senders),
                    receivers: receivers
                        .into_iter()
                        .flatten()
                        .map(Mutex::new)
                        .collect(),
                })
            })
            .collect()
    }

    fn check_peer(&self, peer: Rank) -> Result<()> {
        if peer >= self.world_size {
            return Err(RingError::InvalidRank {
                rank: peer,
                world_size: self.world_size,
            });
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(&'a self, dest: Rank, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_peer(dest)?;
            let tx = {
                let senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
                senders[dest as usize].clone()
            };
            let tx = tx.ok_or_else(|| {
                RingError::transport(format!("rank {} has shut down its transport", self.rank))
            })?;
            tx.send(data.to_vec())
                .await
                .map_err(|_| RingError::PeerDisconnected { rank: dest })
        })
    }

    fn recv<'a>(&'a self, src: Rank) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.check_peer(src)?;
            self.receivers[src as usize]
                .lock()
                .await
                .recv()
                .await
                .ok_or(RingError::PeerDisconnected { rank: src })
        })
    }

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            {
                let mut senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
                senders.iter_mut().for_each(|tx| *tx = None);
            }
            for rx in &self.receivers {
                rx.lock().await.close();
            }
            tracing::debug!(rank = self.rank, "local transport shut down");
            Ok(())
        })
    }
}
