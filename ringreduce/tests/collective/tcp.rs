use ringreduce::harness::{quick_plan, verify_allreduce};
use ringreduce::{Buffer, CollectiveConfig, DeviceContext, Group};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use super::helpers::run_on_groups;

#[tokio::test]
async fn test_tcp_allreduce_loopback() {
    let groups = Group::bootstrap_tcp_local(3).await.unwrap();
    run_on_groups(
        groups,
        |_| DeviceContext::host(),
        CollectiveConfig::default(),
        |coll| async move {
            let rank = coll.rank();
            let data: Vec<f32> = (0..100_000).map(|i| (i % 5) as f32 * (rank + 1) as f32).collect();
            let out = coll.ring_allreduce_host(&data).await.unwrap();
            let expected: Vec<f32> = (0..100_000).map(|i| (i % 5) as f32 * 6.0).collect();
            assert_eq!(out, expected, "rank {rank}");
        },
    )
    .await;
}

#[tokio::test]
async fn test_tcp_mixed_operations() {
    let groups = Group::bootstrap_tcp_local(4).await.unwrap();
    run_on_groups(
        groups,
        |_| DeviceContext::host(),
        CollectiveConfig::default(),
        |coll| async move {
            let rank = coll.rank();
            verify_allreduce(&coll, &quick_plan(), 2.0f64).await.unwrap();

            let all = coll.ring_allgather(&Buffer::from(vec![rank as u64])).await.unwrap();
            assert_eq!(all.to_host().unwrap(), vec![0, 1, 2, 3]);

            let seg = coll
                .ring_reduce_scatter(&Buffer::from(vec![1i32; 6]))
                .await
                .unwrap();
            assert_eq!(seg.to_host().unwrap(), vec![4; [2, 2, 1, 1][rank as usize]]);
        },
    )
    .await;
}

/// A large frame abandoned mid-write by a timed-out call must not corrupt the
/// link for the calls that follow.
#[tokio::test]
async fn test_tcp_link_survives_interrupted_send() {
    let groups = Group::bootstrap_tcp_local(2).await.unwrap();
    let config = CollectiveConfig::default().with_timeout(Duration::from_millis(10));
    let barrier = Arc::new(Barrier::new(2));

    run_on_groups(groups, |_| DeviceContext::host(), config, move |coll| {
        let barrier = Arc::clone(&barrier);
        async move {
            let rank = coll.rank();

            // Rank 1 arrives late, so rank 0 gives up while its 32 MiB
            // segment is still being written.
            if rank == 1 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            let big = vec![1.0f32; 16 * 1024 * 1024];
            assert!(coll.ring_allreduce_host(&big).await.is_err(), "rank {rank}");
            drop(big);

            barrier.wait().await;
            tokio::time::sleep(Duration::from_millis(500)).await;

            for call in 0..5 {
                barrier.wait().await;
                let out = coll.ring_allreduce_host(&[1.0f32; 4]).await;
                assert_eq!(out.unwrap(), vec![2.0; 4], "rank {rank} call {call}");
            }
            assert_eq!(coll.stats().completed, 5);
        }
    })
    .await;
}
