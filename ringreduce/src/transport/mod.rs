//! Point-to-point messaging between the members of a group.
//!
//! The collectives only need ordered, reliable, per-peer byte messages. Two
//! implementations ship with the crate:
//! - [`LocalTransport`]: in-process channel mesh, one endpoint per task.
//! - [`TcpTransport`]: full mesh of TCP connections, one endpoint per process.

pub mod local;
pub mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

use crate::error::Result;
use crate::types::Rank;
use futures::future::BoxFuture;

/// Messaging substrate for one rank of a group.
///
/// Messages between a given pair of ranks are delivered in send order.
/// Both directions must be cancel-safe. Dropping a `recv` future must not
/// lose a message, and dropping a `send` future must deliver the message
/// whole or not at all.
pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;

    fn world_size(&self) -> u32;

    /// Send one message to `dest`.
    fn send<'a>(&'a self, dest: Rank, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Receive the next message from `src`.
    fn recv<'a>(&'a self, src: Rank) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Close all links. Peers observe `PeerDisconnected` on their next receive
    /// from this rank.
    fn shutdown<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}
