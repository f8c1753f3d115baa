use crate::error::{Result, RingError};

/// Rank of a participant in a group (0-indexed).
pub type Rank = u32;

/// Ordinal of an accelerator device.
pub type DeviceId = u32;

/// Element types supported by the ring collectives.
///
/// The tag travels in every segment header so that ranks disagreeing on the
/// element type fail fast instead of reinterpreting each other's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    I32 = 2,
    I64 = 3,
    U32 = 4,
    U64 = 5,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DataType::F32),
            1 => Some(DataType::F64),
            2 => Some(DataType::I32),
            3 => Some(DataType::I64),
            4 => Some(DataType::U32),
            5 => Some(DataType::U64),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The two halves of a ring allreduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Each rank ends up owning one fully reduced segment.
    ReduceScatter = 0,
    /// Each rank collects every other rank's reduced segment.
    AllGather = 1,
}

impl Phase {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Phase::ReduceScatter),
            1 => Some(Phase::AllGather),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::ReduceScatter => f.write_str("reduce-scatter"),
            Phase::AllGather => f.write_str("all-gather"),
        }
    }
}

/// Where a buffer's elements live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Host,
    Device(DeviceId),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Host => f.write_str("host"),
            Location::Device(id) => write!(f, "device {id}"),
        }
    }
}

/// Which memory the collectives operate on, chosen once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceSelector {
    /// Host memory only, no staging.
    #[default]
    Host,
    /// Buffers may live on the given accelerator.
    Accelerator(DeviceId),
}

impl std::str::FromStr for DeviceSelector {
    type Err = RingError;

    /// Accepts `cpu`, `host`, `none`, `gpu`, `gpu:N`, `cuda:N`, or a bare ordinal.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" | "host" | "none" => return Ok(DeviceSelector::Host),
            "gpu" | "cuda" => return Ok(DeviceSelector::Accelerator(0)),
            _ => {}
        }
        let ordinal = s
            .strip_prefix("gpu:")
            .or_else(|| s.strip_prefix("cuda:"))
            .unwrap_or(&s);
        ordinal
            .parse::<DeviceId>()
            .map(DeviceSelector::Accelerator)
            .map_err(|_| RingError::Config(format!("unrecognized device selector {s:?}")))
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Host => f.write_str("host"),
            DeviceSelector::Accelerator(id) => write!(f, "gpu:{id}"),
        }
    }
}
