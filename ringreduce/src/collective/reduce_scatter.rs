use super::ring::RingCall;
use crate::device::stage::SegmentStage;
use crate::error::Result;
use crate::reduce::Element;
use crate::types::Phase;

/// Ring reduce-scatter: reduce across all ranks, each rank keeps a different
/// segment.
///
/// Runs only the first phase of the allreduce. After completion, segment
/// `rank` of the stage's data (per the call's layout) holds the sum of that
/// segment from all ranks; other segments hold partial sums.
pub(crate) async fn ring_reduce_scatter<T: Element, S: SegmentStage<T>>(
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
    RingCall::finish::<T, S>(stage, carry)
}
