use super::ring::RingCall;
use crate::device::stage::SegmentStage;
use crate::error::Result;
use crate::reduce::Element;
use crate::types::Phase;

/// Ring allgather: each rank contributes one segment, result is all
/// contributions in rank order.
///
/// The stage's data must already hold this rank's contribution at segment
/// `rank`. Uses N-1 rounds where each rank forwards the latest received
/// segment to its successor.
pub(crate) async fn ring_allgather<T: Element, S: SegmentStage<T>>(
    call: &mut RingCall<'_>,
    stage: &mut S,
) -> Result<()> {
    let world = call.world();
    if world <= 1 {
        return Ok(());
    }
    let carry = call.load::<T, S>(stage, call.rank())?;
    let carry = call.run_phase::<T, S>(stage, Phase::AllGather, carry).await?;
    RingCall::finish::<T, S>(stage, carry)
}
