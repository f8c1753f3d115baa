use futures::future::BoxFuture;
use ringreduce::{
    CollectiveConfig, Collectives, DeviceContext, Group, LocalTransport, Rank, Transport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

/// Run a collective operation across N in-process ranks on host memory.
/// Keeps every rank alive until all tasks complete.
pub async fn run_collective<F, Fut>(world_size: u32, f: F)
where
    F: Fn(Arc<Collectives>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    run_on_groups(
        Group::bootstrap_local(world_size),
        |_| DeviceContext::host(),
        CollectiveConfig::default(),
        f,
    )
    .await;
}

/// Initialize collectives on each group endpoint with the device returned by
/// `device(rank)`, then run `f` on every rank concurrently.
pub async fn run_on_groups<D, F, Fut>(
    groups: Vec<Arc<Group>>,
    device: D,
    config: CollectiveConfig,
    f: F,
) where
    D: Fn(Rank) -> DeviceContext,
    F: Fn(Arc<Collectives>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let colls: Vec<Arc<Collectives>> = groups
        .into_iter()
        .map(|g| {
            let ctx = device(g.rank());
            Arc::new(Collectives::init(g, ctx, config.clone()).unwrap())
        })
        .collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for c in &colls {
        let c = Arc::clone(c);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(c).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

/// Transport wrapper that records the size of every frame sent.
pub struct CountingTransport {
    inner: Arc<dyn Transport>,
    sent: StdMutex<Vec<usize>>,
    received: AtomicUsize,
}

impl CountingTransport {
    /// Wrap every endpoint of an in-process mesh.
    pub fn mesh(world_size: u32) -> Vec<Arc<CountingTransport>> {
        LocalTransport::mesh(world_size)
            .into_iter()
            .map(|t| {
                Arc::new(CountingTransport {
                    inner: t,
                    sent: StdMutex::new(Vec::new()),
                    received: AtomicUsize::new(0),
                })
            })
            .collect()
    }

    /// Byte length of each frame sent so far, in order.
    pub fn sent_frames(&self) -> Vec<usize> {
        self.sent.lock().unwrap().clone()
    }

    pub fn received_frames(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn world_size(&self) -> u32 {
        self.inner.world_size()
    }

    fn send<'a>(&'a self, dest: Rank, data: &'a [u8]) -> BoxFuture<'a, ringreduce::Result<()>> {
        self.sent.lock().unwrap().push(data.len());
        self.inner.send(dest, data)
    }

    fn recv<'a>(&'a self, src: Rank) -> BoxFuture<'a, ringreduce::Result<Vec<u8>>> {
        Box::pin(async move {
            let frame = self.inner.recv(src).await?;
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(frame)
        })
    }

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, ringreduce::Result<()>> {
        self.inner.shutdown()
    }
}
