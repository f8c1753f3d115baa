use ringreduce::harness::{quick_plan, verify_allreduce};
use ringreduce::{
    Buffer, CollectiveConfig, DeviceBuffer, DeviceContext, Group, Location, SimulatedAccelerator,
};

use super::helpers::run_on_groups;

/// One simulated device per rank, all on a shared runtime.
async fn run_on_simulated<F, Fut>(world_size: u32, rt: std::sync::Arc<SimulatedAccelerator>, f: F)
where
    F: Fn(std::sync::Arc<ringreduce::Collectives>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    run_on_groups(
        Group::bootstrap_local(world_size),
        move |rank| DeviceContext::accelerator(rt.clone(), rank).unwrap(),
        CollectiveConfig::default(),
        f,
    )
    .await;
}

#[tokio::test]
async fn test_device_allreduce_uneven() {
    let rt = SimulatedAccelerator::new(3);
    run_on_simulated(3, rt.clone(), |coll| async move {
        let rank = coll.rank();
        let data: Vec<f32> = (0..1001).map(|i| (i % 17) as f32 + rank as f32).collect();
        let input = coll.device().upload(&data).unwrap();
        assert_eq!(input.location(), Location::Device(rank));

        let out = coll.ring_allreduce(&input).await.unwrap();
        assert_eq!(out.location(), Location::Device(rank));

        // Rank offsets: 0 + 1 + 2 = 3
        let expected: Vec<f32> = (0..1001).map(|i| 3.0 * (i % 17) as f32 + 3.0).collect();
        assert_eq!(out.to_host().unwrap(), expected, "rank {rank}");
        assert_eq!(input.to_host().unwrap(), data);
    })
    .await;

    let stats = rt.copy_stats();
    assert!(stats.device_to_host > 0);
    assert!(stats.host_to_device > 0);
    assert_eq!(rt.live_allocations(), 0);
}

#[tokio::test]
async fn test_device_allreduce_typed_entry_point() {
    let rt = SimulatedAccelerator::new(2);
    run_on_simulated(2, rt.clone(), |coll| async move {
        let input = coll.device().filled(64, 5i64).unwrap().into_device().unwrap();
        let out: DeviceBuffer<i64> = coll.ring_allreduce_device(&input).await.unwrap();
        assert_eq!(out.device(), coll.rank());
        assert_ne!(out.as_ptr(), input.as_ptr());
        assert_eq!(out.to_host().unwrap(), vec![10; 64]);
    })
    .await;
    assert_eq!(rt.live_allocations(), 0);
}

/// Host buffers are still accepted when the context selected an accelerator.
#[tokio::test]
async fn test_host_buffer_under_device_context() {
    let rt = SimulatedAccelerator::new(2);
    run_on_simulated(2, rt, |coll| async move {
        let out = coll.ring_allreduce(&Buffer::from(vec![1u32; 5])).await.unwrap();
        assert_eq!(out.location(), Location::Host);
        assert_eq!(out.to_host().unwrap(), vec![2; 5]);
    })
    .await;
}

#[tokio::test]
async fn test_device_reduce_scatter_and_allgather() {
    let rt = SimulatedAccelerator::new(3);
    run_on_simulated(3, rt.clone(), |coll| async move {
        let rank = coll.rank();
        let input = coll.device().filled(10, 2i32).unwrap();
        let seg = coll.ring_reduce_scatter(&input).await.unwrap();
        assert_eq!(seg.location(), Location::Device(rank));
        assert_eq!(seg.to_host().unwrap(), vec![6; [4, 3, 3][rank as usize]]);

        let mine = coll.device().upload(&[rank as i32]).unwrap();
        let all = coll.ring_allgather(&mine).await.unwrap();
        assert_eq!(all.to_host().unwrap(), vec![0, 1, 2]);
    })
    .await;
    assert_eq!(rt.live_allocations(), 0);
}

#[tokio::test]
async fn test_device_harness_quick_plan() {
    let rt = SimulatedAccelerator::new(4);
    run_on_simulated(4, rt.clone(), |coll| async move {
        verify_allreduce(&coll, &quick_plan(), 1.0f32).await.unwrap();
    })
    .await;
    assert_eq!(rt.live_allocations(), 0);
}
