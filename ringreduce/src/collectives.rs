//! Public entry point: collective state bound to one group endpoint.

use crate::collective::{self, Exchange, RingCall};
use crate::config::CollectiveConfig;
use crate::device::stage::{DeviceStage, HostStage};
use crate::device::{AcceleratorRuntime, DeviceBuffer, DeviceContext};
use crate::error::{Result, RingError};
use crate::group::Group;
use crate::memory::{Buffer, StagingPool};
use crate::partition::SegmentLayout;
use crate::reduce::Element;
use crate::types::{DeviceSelector, Location, Rank};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Counters since initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectiveStats {
    /// Collective calls started (including single-rank shortcuts).
    pub calls: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Mutable state, touched by at most one call at a time.
struct CollectiveState {
    staging: Arc<StagingPool>,
    /// Incremented by every collective call on every rank, so all ranks agree
    /// on it even after a failed call.
    call_seq: u64,
    /// Frames a faster neighbour sent for a call we have not started yet.
    early: VecDeque<Vec<u8>>,
}

#[derive(Clone, Copy)]
enum RingOp {
    Allreduce,
    ReduceScatter,
    Allgather,
}

impl RingOp {
    fn name(self) -> &'static str {
        match self {
            RingOp::Allreduce => "allreduce",
            RingOp::ReduceScatter => "reduce_scatter",
            RingOp::Allgather => "allgather",
        }
    }
}

/// Ring collectives for one rank of a [`Group`].
///
/// Created by [`Collectives::init`], which selects the device once and
/// allocates the staging pool reused by every call. Only one instance may be
/// attached to a group endpoint at a time; drop it or call
/// [`shutdown`](Self::shutdown) before initializing again.
///
/// Calls on one instance are serialized by an async mutex. Every rank of the
/// group must issue the same sequence of collective calls with equal element
/// types and lengths.
pub struct Collectives {
    group: Arc<Group>,
    config: CollectiveConfig,
    device: DeviceContext,
    state: Mutex<CollectiveState>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Collectives {
    /// Attach collective state to `group` for the given device.
    pub fn init(group: Arc<Group>, device: DeviceContext, config: CollectiveConfig) -> Result<Self> {
        group.attach()?;
        let staging = StagingPool::new(config.staging_pool_buffers, config.staging_buffer_bytes);
        tracing::info!(
            rank = group.rank(),
            world = group.world_size(),
            device = ?device,
            "collectives initialized"
        );
        Ok(Self {
            group,
            config,
            device,
            state: Mutex::new(CollectiveState {
                staging,
                call_seq: 0,
                early: VecDeque::new(),
            }),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Resolve `selector` against `runtime` and initialize.
    ///
    /// Fails with a configuration error if an accelerator is requested that
    /// the runtime cannot provide.
    pub fn init_with_selector(
        group: Arc<Group>,
        selector: DeviceSelector,
        runtime: Option<Arc<dyn AcceleratorRuntime>>,
        config: CollectiveConfig,
    ) -> Result<Self> {
        let device = DeviceContext::from_selector(selector, runtime)?;
        Self::init(group, device, config)
    }

    pub fn rank(&self) -> Rank {
        self.group.rank()
    }

    pub fn world_size(&self) -> u32 {
        self.group.world_size()
    }

    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn config(&self) -> &CollectiveConfig {
        &self.config
    }

    pub fn stats(&self) -> CollectiveStats {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        CollectiveStats {
            calls: completed + failed,
            completed,
            failed,
        }
    }

    /// Release the collective state and detach from the group.
    pub fn shutdown(self) {
        tracing::info!(rank = self.rank(), stats = ?self.stats(), "collectives shut down");
        drop(self);
    }

    // ── allreduce ────────────────────────────────────────────────────

    /// Sum `input` element-wise across every rank of the group.
    ///
    /// Returns a newly allocated buffer in the same location as `input`;
    /// `input` is never modified. Host buffers are accepted under any device
    /// context. Device buffers must live on the device chosen at
    /// initialization.
    ///
    /// Any failure aborts the call and releases the partial output. The
    /// collective state stays valid for later calls.
    pub async fn ring_allreduce<T: Element>(&self, input: &Buffer<T>) -> Result<Buffer<T>> {
        let len = input.len();
        self.run(RingOp::Allreduce, len, SegmentLayout::new(len, self.world()), || {
            self.check_location(input.location())?;
            input.duplicate()
        })
        .await
    }

    /// Host-slice convenience for [`ring_allreduce`](Self::ring_allreduce).
    pub async fn ring_allreduce_host<T: Element>(&self, input: &[T]) -> Result<Vec<T>> {
        let len = input.len();
        let out = self
            .run(RingOp::Allreduce, len, SegmentLayout::new(len, self.world()), || {
                Ok(Buffer::Host(input.to_vec()))
            })
            .await?;
        Ok(out.into_host().unwrap_or_default())
    }

    /// Device-buffer convenience for [`ring_allreduce`](Self::ring_allreduce).
    pub async fn ring_allreduce_device<T: Element>(
        &self,
        input: &DeviceBuffer<T>,
    ) -> Result<DeviceBuffer<T>> {
        let len = input.len();
        let out = self
            .run(RingOp::Allreduce, len, SegmentLayout::new(len, self.world()), || {
                self.check_location(Location::Device(input.device()))?;
                input.duplicate().map(Buffer::Device)
            })
            .await?;
        out.into_device()
            .ok_or_else(|| RingError::device("allreduce of a device buffer produced host output"))
    }

    // ── reduce-scatter / allgather ───────────────────────────────────

    /// Sum `input` across ranks and return only this rank's segment of the
    /// result.
    ///
    /// Segments follow the allreduce partition: the first `len % world`
    /// ranks receive one extra element.
    pub async fn ring_reduce_scatter<T: Element>(&self, input: &Buffer<T>) -> Result<Buffer<T>> {
        let len = input.len();
        let layout = SegmentLayout::new(len, self.world());
        let own = layout.segment(self.rank() as usize);
        let full = self
            .run(RingOp::ReduceScatter, len, layout, || {
                self.check_location(input.location())?;
                input.duplicate()
            })
            .await?;
        match full {
            Buffer::Host(v) => Ok(Buffer::Host(v[own.range()].to_vec())),
            Buffer::Device(d) => {
                let mut bytes = vec![0u8; own.len * T::SIZE];
                d.read_bytes(own.offset, &mut bytes)?;
                let mut out = DeviceBuffer::alloc(Arc::clone(d.runtime()), d.device(), own.len)?;
                out.write_bytes(0, &bytes)?;
                Ok(Buffer::Device(out))
            }
        }
    }

    /// Concatenate every rank's `input` in rank order.
    ///
    /// All ranks must contribute the same number of elements.
    pub async fn ring_allgather<T: Element>(&self, input: &Buffer<T>) -> Result<Buffer<T>> {
        let len = input.len();
        let world = self.world();
        let layout = SegmentLayout::uniform(len, world);
        let own = layout.segment(self.rank() as usize);
        self.run(RingOp::Allgather, len * world, layout, || {
            self.check_location(input.location())?;
            match input {
                Buffer::Host(v) => {
                    let mut out = vec![T::default(); len * world];
                    out[own.range()].copy_from_slice(v);
                    Ok(Buffer::Host(out))
                }
                Buffer::Device(d) => {
                    let mut out = DeviceBuffer::alloc(Arc::clone(d.runtime()), d.device(), len * world)?;
                    let mut bytes = vec![0u8; d.byte_len()];
                    d.read_bytes(0, &mut bytes)?;
                    out.write_bytes(own.offset, &bytes)?;
                    Ok(Buffer::Device(out))
                }
            }
        })
        .await
    }

    // ── shared driver ────────────────────────────────────────────────

    fn world(&self) -> usize {
        self.group.world_size() as usize
    }

    fn check_location(&self, location: Location) -> Result<()> {
        if location != Location::Host && location != self.device.location() {
            return Err(RingError::DeviceMismatch {
                expected: self.device.location(),
                actual: location,
            });
        }
        Ok(())
    }

    /// Take the call lock, allocate the output with `prepare`, and run `op`
    /// over it.
    ///
    /// The call sequence number is consumed before `prepare` runs so that a
    /// rank failing local validation stays in step with its peers.
    async fn run<T: Element>(
        &self,
        op: RingOp,
        total_len: usize,
        layout: SegmentLayout,
        prepare: impl FnOnce() -> Result<Buffer<T>>,
    ) -> Result<Buffer<T>> {
        let mut state = self.state.lock().await;
        state.call_seq += 1;
        let call_seq = state.call_seq;
        let rank = self.rank();
        let world = self.world_size();

        tracing::debug!(
            rank,
            world,
            call = call_seq,
            operation = op.name(),
            count = total_len,
            dtype = %T::DTYPE,
            "collective start"
        );

        let result = async {
            let mut output = prepare()?;
            if world > 1 {
                self.execute(&mut state, op, call_seq, total_len, layout, &mut output)
                    .await?;
            }
            Ok(output)
        }
        .await;

        match &result {
            Ok(_) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(rank, call = call_seq, operation = op.name(), "collective done");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    rank,
                    call = call_seq,
                    operation = op.name(),
                    error = %e,
                    "collective failed"
                );
            }
        }
        result
    }

    async fn execute<T: Element>(
        &self,
        state: &mut CollectiveState,
        op: RingOp,
        call_seq: u64,
        total_len: usize,
        layout: SegmentLayout,
        output: &mut Buffer<T>,
    ) -> Result<()> {
        let scratch_bytes = layout.max_len() * T::SIZE;
        let CollectiveState { staging, early, .. } = state;
        let mut call = RingCall {
            exchange: Exchange {
                group: &self.group,
                operation: op.name(),
                timeout: self.config.collective_timeout,
                call_seq,
                total_len: total_len as u64,
                dtype: T::DTYPE,
                verify_lengths: self.config.verify_lengths,
            },
            pool: staging,
            early,
            layout,
        };

        match output {
            Buffer::Host(data) => {
                let mut stage = HostStage::new(data.as_mut_slice());
                dispatch(op, &mut call, &mut stage).await
            }
            Buffer::Device(buf) => {
                let scratch = call.pool.checkout(scratch_bytes);
                let mut stage = DeviceStage::new(buf, scratch);
                dispatch(op, &mut call, &mut stage).await
            }
        }
    }
}

async fn dispatch<T: Element, S: crate::device::stage::SegmentStage<T>>(
    op: RingOp,
    call: &mut RingCall<'_>,
    stage: &mut S,
) -> Result<()> {
    match op {
        RingOp::Allreduce => collective::ring_allreduce::<T, S>(call, stage).await,
        RingOp::ReduceScatter => collective::ring_reduce_scatter::<T, S>(call, stage).await,
        RingOp::Allgather => collective::ring_allgather::<T, S>(call, stage).await,
    }
}

impl Drop for Collectives {
    fn drop(&mut self) {
        self.group.detach();
    }
}

impl std::fmt::Debug for Collectives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collectives")
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .field("device", &self.device)
            .field("stats", &self.stats())
            .finish()
    }
}
