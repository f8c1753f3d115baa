use super::ring::RingCall;
use crate::device::stage::SegmentStage;
use crate::error::Result;
use crate::reduce::Element;
use crate::types::Phase;

/// Ring allreduce: in-place sum across all ranks.
///
/// Algorithm:
/// 1. Reduce-scatter: N-1 rounds. Each rank sends one segment to the next
///    rank and receives one from the previous rank, adding it into its own.
///    Afterwards rank `k` holds the fully reduced segment `k`.
/// 2. All-gather: N-1 rounds. The reduced segments travel once more around
///    the ring and are copied into place.
///
/// After completion the stage's data equals the element-wise sum of every
/// rank's original data. Each rank moves `2 (N-1) / N` of the buffer in each
/// direction regardless of N.
pub(crate) async fn ring_allreduce<T: Element, S: SegmentStage<T>>(
    call: &mut RingCall<'_>,
    stage: &mut S,
) -> Result<()> {
    let world = call.world();
    if world <= 1 {
        return Ok(());
    }
    let first = super::helpers::behind(call.rank(), world, 1);
    let carry = call.load::<T, S>(stage, first)?;
    let carry = call.run_phase::<T, S>(stage, Phase::ReduceScatter, carry).await?;
    let carry = call.run_phase::<T, S>(stage, Phase::AllGather, carry).await?;
    RingCall::finish::<T, S>(stage, carry)
}
