use super::Transport;
use crate::config::TcpGroupConfig;
use crate::error::{Result, RingError};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Maximum frame size accepted from a peer (4 GiB).
const MAX_TCP_FRAME_SIZE: usize = 4 * 1024 * 1024 * 1024;

/// Handshake magic, `b"RRDC"` read as a little-endian u32.
const HANDSHAKE_MAGIC: u32 = u32::from_le_bytes(*b"RRDC");

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// How long `shutdown` waits for queued frames to drain.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames queued per peer before `send` waits.
const OUTBOX_CAPACITY: usize = 16;

/// A frame handed to a peer's writer task, with the slot for its outcome.
struct Outgoing {
    frame: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Writer side of a link. Both are taken on shutdown.
struct Writer {
    outbox: Option<mpsc::Sender<Outgoing>>,
    task: Option<JoinHandle<()>>,
}

/// One established connection to a peer.
///
/// The stream's write half is owned by a task, so a frame is either written
/// whole or not at all even if the `send` that queued it is dropped.
struct PeerLink {
    writer: StdMutex<Writer>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    recv_handle: JoinHandle<()>,
}

impl PeerLink {
    fn from_stream(stream: TcpStream, peer: Rank) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(64);
        let (outbox, queued) = mpsc::channel(OUTBOX_CAPACITY);
        let recv_handle = tokio::spawn(recv_loop(reader, tx, peer));
        let send_handle = tokio::spawn(send_loop(writer, queued, peer));
        Self {
            writer: StdMutex::new(Writer {
                outbox: Some(outbox),
                task: Some(send_handle),
            }),
            rx: Mutex::new(rx),
            recv_handle,
        }
    }

    fn outbox(&self) -> Option<mpsc::Sender<Outgoing>> {
        self.writer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .outbox
            .clone()
    }
}

/// Transport over a full mesh of TCP connections.
///
/// Frames are `[len: u64 LE][payload]`. A background task per peer reads
/// frames and routes them into that peer's channel, so receives from
/// different peers never block each other. Another task per peer owns the
/// write half, which keeps `send` cancel-safe.
pub struct TcpTransport {
    rank: Rank,
    world_size: u32,
    /// Indexed by peer rank; `None` at our own rank.
    links: Vec<Option<PeerLink>>,
}

impl TcpTransport {
    /// Bind our listen address and connect to every other rank.
    pub async fn connect(cfg: &TcpGroupConfig) -> Result<Self> {
        cfg.validate()?;
        let (listener, _) = tcp_listen(cfg.peers[cfg.rank as usize]).await?;
        Self::connect_with_listener(cfg, listener).await
    }

    /// Build a full mesh of `world_size` endpoints on loopback, for tests and
    /// single-host runs.
    pub async fn bootstrap_local(world_size: u32) -> Result<Vec<TcpTransport>> {
        let mut listeners = Vec::with_capacity(world_size as usize);
        let mut addrs = Vec::with_capacity(world_size as usize);
        for _ in 0..world_size {
            let (listener, addr) = tcp_listen(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
            listeners.push(listener);
            addrs.push(addr);
        }

        let futs = listeners.into_iter().enumerate().map(|(rank, listener)| {
            let cfg = TcpGroupConfig::new(rank as Rank, addrs.clone());
            async move { Self::connect_with_listener(&cfg, listener).await }
        });
        futures::future::try_join_all(futs).await
    }

    /// Lower ranks accept, higher ranks connect. Each connection opens with
    /// a handshake naming the connecting rank.
    async fn connect_with_listener(cfg: &TcpGroupConfig, listener: TcpListener) -> Result<Self> {
        let rank = cfg.rank;
        let world = cfg.world_size;

        let accept_peers = async {
            let mut accepted = Vec::new();
            for _ in rank + 1..world {
                let (mut stream, addr) = listener
                    .accept()
                    .await
                    .map_err(|e| RingError::transport_with_source("tcp accept", e))?;
                stream
                    .set_nodelay(true)
                    .map_err(|e| RingError::transport_with_source("tcp set_nodelay", e))?;
                let peer = read_handshake(&mut stream, world).await?;
                if peer <= rank {
                    return Err(RingError::transport(format!(
                        "rank {peer} at {addr} connected to rank {rank}; only higher ranks connect"
                    )));
                }
                tracing::debug!(rank, peer, %addr, "accepted peer connection");
                accepted.push((peer, stream));
            }
            Ok::<_, RingError>(accepted)
        };
        let accept_all = async {
            tokio::time::timeout(cfg.connect_timeout, accept_peers)
                .await
                .unwrap_or_else(|_| {
                    Err(RingError::transport(format!(
                        "rank {rank} timed out after {}s waiting for higher ranks to connect",
                        cfg.connect_timeout.as_secs_f64()
                    )))
                })
        };

        let connect_all = async {
            let mut connected = Vec::new();
            for peer in 0..rank {
                let mut stream =
                    connect_with_retry(cfg.peers[peer as usize], cfg.connect_timeout).await?;
                write_handshake(&mut stream, rank, world).await?;
                tracing::debug!(rank, peer, "connected to peer");
                connected.push((peer, stream));
            }
            Ok::<_, RingError>(connected)
        };

        let (accepted, connected) = tokio::try_join!(accept_all, connect_all)?;

        let mut links: Vec<Option<PeerLink>> = (0..world).map(|_| None).collect();
        for (peer, stream) in accepted.into_iter().chain(connected) {
            let slot = &mut links[peer as usize];
            if slot.is_some() {
                return Err(RingError::transport(format!(
                    "duplicate connection from rank {peer}"
                )));
            }
            *slot = Some(PeerLink::from_stream(stream, peer));
        }

        tracing::info!(rank, world, "tcp mesh established");
        Ok(Self {
            rank,
            world_size: world,
            links,
        })
    }

    fn link(&self, peer: Rank) -> Result<&PeerLink> {
        self.links
            .get(peer as usize)
            .and_then(Option::as_ref)
            .ok_or(RingError::InvalidRank {
                rank: peer,
                world_size: self.world_size,
            })
    }

    /// Queue a frame for `dest` and wait until it is on the wire.
    async fn write_frame(&self, dest: Rank, data: &[u8]) -> Result<()> {
        let outbox = self.link(dest)?.outbox().ok_or_else(|| {
            RingError::transport(format!("rank {} has shut down its transport", self.rank))
        })?;
        let (done, written) = oneshot::channel();
        outbox
            .send(Outgoing {
                frame: data.to_vec(),
                done,
            })
            .await
            .map_err(|_| RingError::PeerDisconnected { rank: dest })?;
        drop(outbox);
        written
            .await
            .map_err(|_| RingError::PeerDisconnected { rank: dest })?
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(&'a self, dest: Rank, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_frame(dest, data))
    }

    fn recv<'a>(&'a self, src: Rank) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.link(src)?
                .rx
                .lock()
                .await
                .recv()
                .await
                .ok_or(RingError::PeerDisconnected { rank: src })
        })
    }

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for link in self.links.iter().flatten() {
                // Closing the outbox lets the writer flush queued frames and
                // shut the stream down.
                let task = {
                    let mut writer = link.writer.lock().unwrap_or_else(|p| p.into_inner());
                    writer.outbox = None;
                    writer.task.take()
                };
                if let Some(mut task) = task
                    && tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, &mut task).await.is_err()
                {
                    tracing::warn!(rank = self.rank, "tcp writer did not drain, aborting");
                    task.abort();
                }
                link.recv_handle.abort();
            }
            tracing::info!(rank = self.rank, "tcp transport shut down");
            Ok(())
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for link in self.links.iter().flatten() {
            link.recv_handle.abort();
            let writer = link.writer.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(task) = &writer.task {
                task.abort();
            }
        }
    }
}

/// Background loop: write queued frames to one peer, `[len: u64 LE][payload]`.
async fn send_loop(
    mut writer: WriteHalf<TcpStream>,
    mut queued: mpsc::Receiver<Outgoing>,
    peer: Rank,
) {
    while let Some(Outgoing { frame, done }) = queued.recv().await {
        let result = write_frame_to(&mut writer, &frame).await;
        let failed = result.is_err();
        // The sender may have given up waiting; the frame is written either way.
        let _ = done.send(result);
        if failed {
            tracing::debug!(peer, "tcp send loop ended after a write error");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(peer, "tcp shutdown: {e}");
    }
}

async fn write_frame_to(writer: &mut WriteHalf<TcpStream>, frame: &[u8]) -> Result<()> {
    writer
        .write_all(&(frame.len() as u64).to_le_bytes())
        .await
        .map_err(|e| RingError::transport_with_source("tcp write len", e))?;
    writer
        .write_all(frame)
        .await
        .map_err(|e| RingError::transport_with_source("tcp write payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| RingError::transport_with_source("tcp flush", e))
}

/// Background loop: read frames from one peer into its channel.
async fn recv_loop(
    mut reader: ReadHalf<TcpStream>,
    tx: mpsc::Sender<Vec<u8>>,
    peer: Rank,
) {
    let mut len_buf = [0u8; 8];
    loop {
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            tracing::debug!(peer, "tcp recv loop ended: {e}");
            return;
        }
        let len = u64::from_le_bytes(len_buf) as usize;

        if len > MAX_TCP_FRAME_SIZE {
            tracing::warn!(peer, len, "tcp: frame too large, closing connection");
            return;
        }

        let mut payload = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::debug!(peer, "tcp recv loop ended reading payload: {e}");
            return;
        }
        if tx.send(payload).await.is_err() {
            return;
        }
    }
}

async fn tcp_listen(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::debug!(%local, "tcp listening");
    Ok((listener, local))
}

/// Connect, retrying while the peer is not yet listening.
async fn connect_with_retry(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| RingError::transport_with_source("tcp set_nodelay", e))?;
                return Ok(stream);
            }
            Err(e) if tokio::time::Instant::now() + CONNECT_RETRY_INTERVAL < deadline => {
                tracing::trace!(%addr, "tcp connect retry: {e}");
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(e) => {
                return Err(RingError::transport_with_source(
                    format!("tcp connect to {addr} timed out after {}s", timeout.as_secs()),
                    e,
                ));
            }
        }
    }
}

async fn write_handshake(stream: &mut TcpStream, rank: Rank, world: u32) -> Result<()> {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&rank.to_le_bytes());
    buf[8..12].copy_from_slice(&world.to_le_bytes());
    stream
        .write_all(&buf)
        .await
        .map_err(|e| RingError::transport_with_source("tcp handshake write", e))
}

async fn read_handshake(stream: &mut TcpStream, world: u32) -> Result<Rank> {
    let mut buf = [0u8; 12];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| RingError::transport_with_source("tcp handshake read", e))?;
    let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
    if word(0) != HANDSHAKE_MAGIC {
        return Err(RingError::DecodeFailed("bad tcp handshake magic".into()));
    }
    let (peer, peer_world) = (word(4), word(8));
    if peer_world != world {
        return Err(RingError::Config(format!(
            "rank {peer} believes the world size is {peer_world}, expected {world}"
        )));
    }
    if peer >= world {
        return Err(RingError::InvalidRank {
            rank: peer,
            world_size: world,
        });
    }
    Ok(peer)
}
