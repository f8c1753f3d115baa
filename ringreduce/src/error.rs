use crate::types::{Location, Phase, Rank};

pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("collectives already initialized for rank {rank}; shut them down first")]
    AlreadyInitialized { rank: Rank },

    #[error(
        "{operation} failed at rank {rank} ({phase} round {round}, peer {peer}): {reason}"
    )]
    CommunicationFailed {
        operation: &'static str,
        phase: Phase,
        round: u32,
        peer: Rank,
        rank: Rank,
        reason: String,
    },

    #[error("precondition violated (peer {peer}): {reason}")]
    PreconditionViolation { peer: Rank, reason: String },

    #[error("protocol error from rank {peer}: {reason}")]
    Protocol { peer: Rank, reason: String },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("buffer lives on {actual} but collectives were initialized for {expected}")]
    DeviceMismatch { expected: Location, actual: Location },

    #[error("device error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error(
        "verification failed for count {count}: element {index} is {actual}, expected {expected}"
    )]
    Verification {
        count: usize,
        index: usize,
        expected: f64,
        actual: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RingError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `Device` error with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Device` error with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Device {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for failures of the send/receive choreography itself.
    pub fn is_communication_failure(&self) -> bool {
        matches!(self, Self::CommunicationFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communication_failed_display() {
        let e = RingError::CommunicationFailed {
            operation: "allreduce",
            phase: Phase::ReduceScatter,
            round: 2,
            peer: 3,
            rank: 2,
            reason: "connection reset".into(),
        };
        assert_eq!(
            e.to_string(),
            "allreduce failed at rank 2 (reduce-scatter round 2, peer 3): connection reset"
        );
        assert!(e.is_communication_failure());
    }

    #[test]
    fn test_device_mismatch_display() {
        let e = RingError::DeviceMismatch {
            expected: Location::Host,
            actual: Location::Device(1),
        };
        assert_eq!(
            e.to_string(),
            "buffer lives on device 1 but collectives were initialized for host"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let err: RingError = io_err.into();
        assert!(err.to_string().contains("port busy"));
        assert!(!err.is_communication_failure());
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error;

        let io_err = std::io::Error::other("bus error");
        let e = RingError::device_with_source("cuMemcpyDtoH failed", io_err);
        assert!(e.source().is_some());
        assert!(RingError::device("oom").source().is_none());
    }

    #[test]
    fn test_all_variants_display() {
        let errors: Vec<RingError> = vec![
            RingError::Config("no such device".into()),
            RingError::AlreadyInitialized { rank: 0 },
            RingError::PreconditionViolation {
                peer: 1,
                reason: "length 8 != 16".into(),
            },
            RingError::Protocol {
                peer: 1,
                reason: "unexpected round".into(),
            },
            RingError::BufferSizeMismatch {
                expected: 100,
                actual: 50,
            },
            RingError::transport("conn reset"),
            RingError::device("oom"),
            RingError::DecodeFailed("short header".into()),
            RingError::PeerDisconnected { rank: 1 },
            RingError::InvalidRank {
                rank: 5,
                world_size: 4,
            },
            RingError::Verification {
                count: 32,
                index: 3,
                expected: 4.0,
                actual: 3.0,
            },
        ];
        for e in &errors {
            assert!(!e.to_string().is_empty(), "empty display for {e:?}");
        }
    }
}
