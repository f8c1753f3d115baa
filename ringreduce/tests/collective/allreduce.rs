use ringreduce::harness::{quick_plan, verify_allreduce};
use ringreduce::protocol::HEADER_SIZE;
use ringreduce::{Buffer, CollectiveConfig, DeviceContext, Group, RingError};
use std::sync::Arc;
use std::time::Duration;

use super::helpers::{CountingTransport, run_collective, run_on_groups};

#[tokio::test]
async fn test_allreduce_4_ranks_constant() {
    run_collective(4, |coll| async move {
        let rank = coll.rank();
        let out = coll.ring_allreduce_host(&vec![1.0f32; 1024]).await.unwrap();
        assert_eq!(out, vec![4.0f32; 1024], "rank {rank} allreduce failed");
    })
    .await;
}

/// 10 elements over 3 ranks: segments of 4, 3 and 3.
#[tokio::test]
async fn test_allreduce_3_ranks_uneven() {
    run_collective(3, |coll| async move {
        let rank = coll.rank();
        let data: Vec<f32> = (0..10).map(|i| (i * (rank + 1)) as f32).collect();
        let out = coll.ring_allreduce_host(&data).await.unwrap();

        // Rank multipliers: 1 + 2 + 3 = 6
        let expected: Vec<f32> = (0..10).map(|i| (i * 6) as f32).collect();
        assert_eq!(out, expected, "rank {rank} uneven allreduce failed");
    })
    .await;
}

/// Fewer elements than ranks leaves some segments empty.
#[tokio::test]
async fn test_allreduce_fewer_elements_than_ranks() {
    run_collective(4, |coll| async move {
        let rank = coll.rank();
        let out = coll.ring_allreduce_host(&[rank as i32, 1]).await.unwrap();
        assert_eq!(out, vec![6, 4], "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_empty() {
    run_collective(3, |coll| async move {
        let out = coll.ring_allreduce_host::<f64>(&[]).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(coll.stats().completed, 1);
    })
    .await;
}

/// An empty buffer still runs all `2 (n - 1)` rounds, each a header-only frame.
#[tokio::test]
async fn test_allreduce_empty_runs_every_round() {
    let world = 4;
    let transports = CountingTransport::mesh(world);
    let groups = transports
        .iter()
        .map(|t| Group::new(Arc::clone(t) as Arc<dyn ringreduce::Transport>))
        .collect();
    run_on_groups(
        groups,
        |_| DeviceContext::host(),
        CollectiveConfig::default(),
        |coll| async move {
            assert!(coll.ring_allreduce_host::<i32>(&[]).await.unwrap().is_empty());
        },
    )
    .await;

    let rounds = 2 * (world as usize - 1);
    for t in &transports {
        assert_eq!(t.sent_frames(), vec![HEADER_SIZE; rounds]);
        assert_eq!(t.received_frames(), rounds);
    }
}

/// A single rank never touches the substrate.
#[tokio::test]
async fn test_allreduce_single_rank_sends_nothing() {
    let transports = CountingTransport::mesh(1);
    let group = Group::new(Arc::clone(&transports[0]) as Arc<dyn ringreduce::Transport>);
    run_on_groups(
        vec![group],
        |_| DeviceContext::host(),
        CollectiveConfig::default(),
        |coll| async move {
            let out = coll.ring_allreduce_host(&[1.5f32, 2.5]).await.unwrap();
            assert_eq!(out, vec![1.5, 2.5]);
            let out = coll.ring_reduce_scatter(&Buffer::from(vec![3u32])).await.unwrap();
            assert_eq!(out.to_host().unwrap(), vec![3]);
        },
    )
    .await;

    assert!(transports[0].sent_frames().is_empty());
    assert_eq!(transports[0].received_frames(), 0);
}

/// Each round moves one segment: 10 f64 over 2 ranks is 5 elements per frame.
#[tokio::test]
async fn test_allreduce_frame_sizes_follow_segments() {
    let transports = CountingTransport::mesh(2);
    let groups = transports
        .iter()
        .map(|t| Group::new(Arc::clone(t) as Arc<dyn ringreduce::Transport>))
        .collect();
    run_on_groups(
        groups,
        |_| DeviceContext::host(),
        CollectiveConfig::default(),
        |coll| async move {
            let out = coll.ring_allreduce_host(&[1.0f64; 10]).await.unwrap();
            assert_eq!(out, vec![2.0; 10]);
        },
    )
    .await;

    for t in &transports {
        assert_eq!(t.sent_frames(), vec![HEADER_SIZE + 5 * 8; 2]);
    }
}

#[tokio::test]
async fn test_allreduce_single_rank() {
    run_collective(1, |coll| async move {
        let out = coll.ring_allreduce_host(&[3u64, 5, 7]).await.unwrap();
        assert_eq!(out, vec![3, 5, 7]);
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_input_untouched() {
    run_collective(2, |coll| async move {
        let input = Buffer::from(vec![2.5f64; 9]);
        let out = coll.ring_allreduce(&input).await.unwrap();
        assert_eq!(out.to_host().unwrap(), vec![5.0; 9]);
        assert_eq!(input.as_host().unwrap(), &[2.5; 9]);
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_repeated_calls() {
    run_collective(3, |coll| async move {
        let rank = coll.rank();
        for iter in 0..5u32 {
            let len = 7 + iter as usize * 13;
            let data = vec![(rank + iter) as i64; len];
            let out = coll.ring_allreduce_host(&data).await.unwrap();
            // 0 + 1 + 2 + 3 * iter
            let expected = (3 + 3 * iter) as i64;
            assert_eq!(out, vec![expected; len], "rank {rank} iteration {iter}");
        }
        assert_eq!(coll.stats().completed, 5);
        assert_eq!(coll.stats().failed, 0);
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_integer_types() {
    run_collective(4, |coll| async move {
        let rank = coll.rank();
        let out = coll.ring_allreduce_host(&[rank, 10, u32::MAX / 8]).await.unwrap();
        assert_eq!(out, vec![6, 40, (u32::MAX / 8) * 4]);

        let out = coll.ring_allreduce_host(&[-(rank as i64) * 1_000_000_000_000]).await.unwrap();
        assert_eq!(out, vec![-6_000_000_000_000]);

        // Integer sums wrap.
        let out = coll.ring_allreduce_host(&[i32::MAX]).await.unwrap();
        assert_eq!(out, vec![i32::MAX.wrapping_mul(4)]);
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_large_buffer() {
    run_collective(4, |coll| async move {
        let len = 1_000_003;
        let out = coll.ring_allreduce_host(&vec![0.5f32; len]).await.unwrap();
        assert_eq!(out.len(), len);
        assert!(out.iter().all(|&v| v == 2.0));
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_length_mismatch_is_precondition_violation() {
    let config = CollectiveConfig::default().with_timeout(Duration::from_millis(500));
    run_on_groups(
        Group::bootstrap_local(3),
        |_| DeviceContext::host(),
        config,
        |coll| async move {
            let rank = coll.rank();
            let len = if rank == 0 { 8 } else { 10 };
            let err = coll.ring_allreduce_host(&vec![1.0f32; len]).await.unwrap_err();
            // Ranks 0 and 1 receive from a peer with a different length; rank 2
            // only notices that rank 1 stopped sending.
            match rank {
                0 | 1 => assert!(
                    matches!(err, RingError::PreconditionViolation { .. }),
                    "rank {rank} got {err:?}"
                ),
                _ => assert!(err.is_communication_failure(), "rank {rank} got {err:?}"),
            }
            assert_eq!(coll.stats().failed, 1);
        },
    )
    .await;
}

#[tokio::test]
async fn test_allreduce_dtype_mismatch_is_precondition_violation() {
    let config = CollectiveConfig::default().with_timeout(Duration::from_millis(500));
    run_on_groups(
        Group::bootstrap_local(2),
        |_| DeviceContext::host(),
        config,
        |coll| async move {
            let err = if coll.rank() == 0 {
                coll.ring_allreduce_host(&[1.0f32; 4]).await.unwrap_err()
            } else {
                coll.ring_allreduce_host(&[1i32; 4]).await.unwrap_err()
            };
            assert!(
                matches!(err, RingError::PreconditionViolation { .. }),
                "rank {} got {err:?}",
                coll.rank()
            );
        },
    )
    .await;
}

#[tokio::test]
async fn test_harness_quick_plan() {
    run_collective(3, |coll| async move {
        let plan = quick_plan();
        let reports = verify_allreduce(&coll, &plan, 1.0f32).await.unwrap();
        assert_eq!(reports.len(), plan.len());
        for (report, row) in reports.iter().zip(&plan) {
            assert_eq!(report.size, row.size);
            assert!(report.seconds_per_iteration >= 0.0);
        }
    })
    .await;
}

/// Fixed ring order makes float results bit-identical across calls.
#[tokio::test]
async fn test_allreduce_reproducible_floats() {
    run_collective(5, |coll| async move {
        let rank = coll.rank();
        let data: Vec<f32> = (0..257).map(|i| 0.1 * i as f32 / (rank + 3) as f32).collect();
        let first = coll.ring_allreduce_host(&data).await.unwrap();
        let second = coll.ring_allreduce_host(&data).await.unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second), "rank {rank}");
    })
    .await;
}
