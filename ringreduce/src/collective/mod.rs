mod allgather;
mod allreduce;
mod helpers;
mod reduce_scatter;
mod ring;

pub(crate) use allgather::ring_allgather;
pub(crate) use allreduce::ring_allreduce;
pub(crate) use helpers::Exchange;
pub(crate) use reduce_scatter::ring_reduce_scatter;
pub(crate) use ring::RingCall;
