use ringreduce::Buffer;

use super::helpers::run_collective;

#[tokio::test]
async fn test_allgather_rank_order() {
    run_collective(3, |coll| async move {
        let rank = coll.rank();
        let mine = vec![rank * 10, rank * 10 + 1];
        let out = coll.ring_allgather(&Buffer::from(mine)).await.unwrap();
        assert_eq!(out.to_host().unwrap(), vec![0u32, 1, 10, 11, 20, 21], "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_allgather_empty_contribution() {
    run_collective(4, |coll| async move {
        let out = coll.ring_allgather(&Buffer::<f32>::from(vec![])).await.unwrap();
        assert!(out.is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_allgather_4_ranks_f64() {
    run_collective(4, |coll| async move {
        let rank = coll.rank() as f64;
        let out = coll
            .ring_allgather(&Buffer::from(vec![rank; 3]))
            .await
            .unwrap()
            .to_host()
            .unwrap();
        let expected: Vec<f64> = (0..4).flat_map(|r| [r as f64; 3]).collect();
        assert_eq!(out, expected);
    })
    .await;
}
