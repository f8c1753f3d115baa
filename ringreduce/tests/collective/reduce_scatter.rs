use ringreduce::{Buffer, SegmentLayout};

use super::helpers::run_collective;

/// 10 elements over 3 ranks: rank 0 keeps 4 elements, ranks 1 and 2 keep 3.
#[tokio::test]
async fn test_reduce_scatter_uneven_segments() {
    run_collective(3, |coll| async move {
        let rank = coll.rank();
        let data: Vec<i32> = (0..10).map(|i| i * (rank as i32 + 1)).collect();
        let out = coll.ring_reduce_scatter(&Buffer::from(data)).await.unwrap();

        let seg = SegmentLayout::new(10, 3).segment(rank as usize);
        let expected: Vec<i32> = seg.range().map(|i| i as i32 * 6).collect();
        assert_eq!(out.to_host().unwrap(), expected, "rank {rank}");
        assert_eq!(out.len(), [4, 3, 3][rank as usize]);
    })
    .await;
}

#[tokio::test]
async fn test_reduce_scatter_then_allreduce() {
    run_collective(4, |coll| async move {
        let rank = coll.rank();
        let out = coll
            .ring_reduce_scatter(&Buffer::from(vec![1.0f64; 8]))
            .await
            .unwrap();
        assert_eq!(out.to_host().unwrap(), vec![4.0; 2], "rank {rank}");

        // The call sequence stays aligned across operation kinds.
        let out = coll.ring_allreduce_host(&[rank as f64]).await.unwrap();
        assert_eq!(out, vec![6.0]);
    })
    .await;
}

#[tokio::test]
async fn test_reduce_scatter_single_rank() {
    run_collective(1, |coll| async move {
        let out = coll.ring_reduce_scatter(&Buffer::from(vec![9u64, 8])).await.unwrap();
        assert_eq!(out.to_host().unwrap(), vec![9, 8]);
    })
    .await;
}
