//! Fatal heap errors
//!
//! Every error here ends the offending core: the heap never retries after a
//! failed collection and never hands out a partially-initialized object.

use crate::objects::CoroutineState;
use std::fmt;

pub type Result<T> = std::result::Result<T, HeapError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NurseryExhausted { requested: usize, available: usize },
    OldGenerationExhausted { requested: usize, capacity: usize },
    UpdateListOverflow { capacity: usize },
    AttributeNotFound { global_id: u32 },
    MethodNotFound { global_id: u32 },
    InvalidLayout { reason: String },
    InvalidHandle { address: usize },
    CoroutineState { expected: &'static str, found: CoroutineState },
    CoroutineNotFound { slot: usize },
    InvalidConfig { field: &'static str, reason: String },
    CoreHalted,
    IndexOutOfBounds { index: usize, length: usize },
}

impl ErrorKind {
    /// Stable numeric code, also returned across the C ABI
    pub fn code(&self) -> i32 {
        match self {
            Self::NurseryExhausted { .. } => 1,
            Self::OldGenerationExhausted { .. } => 2,
            Self::UpdateListOverflow { .. } => 3,
            Self::AttributeNotFound { .. } => 4,
            Self::MethodNotFound { .. } => 5,
            Self::InvalidLayout { .. } => 6,
            Self::InvalidHandle { .. } => 7,
            Self::CoroutineState { .. } => 8,
            Self::CoroutineNotFound { .. } => 9,
            Self::InvalidConfig { .. } => 10,
            Self::CoreHalted => 11,
            Self::IndexOutOfBounds { .. } => 12,
        }
    }

    pub fn invalid_layout(reason: impl Into<String>) -> Self {
        Self::InvalidLayout { reason: reason.into() }
    }

    /// Out of memory in either generation
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::NurseryExhausted { .. } | Self::OldGenerationExhausted { .. } | Self::UpdateListOverflow { .. }
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NurseryExhausted { requested, available } => {
                write!(f, "Nursery exhausted: requested {} bytes, {} available after collection", requested, available)
            }
            Self::OldGenerationExhausted { requested, capacity } => {
                write!(f, "Old generation exhausted: cannot place {} bytes (capacity {})", requested, capacity)
            }
            Self::UpdateListOverflow { capacity } => {
                write!(f, "Update list overflow: more than {} survivors", capacity)
            }
            Self::AttributeNotFound { global_id } => {
                write!(f, "Attribute not found: global id {}", global_id)
            }
            Self::MethodNotFound { global_id } => {
                write!(f, "Method not found: global id {}", global_id)
            }
            Self::InvalidLayout { reason } => {
                write!(f, "Invalid layout: {}", reason)
            }
            Self::InvalidHandle { address } => {
                write!(f, "Invalid object handle: {:#x}", address)
            }
            Self::CoroutineState { expected, found } => {
                write!(f, "Coroutine is {}, expected {}", found, expected)
            }
            Self::CoroutineNotFound { slot } => {
                write!(f, "Coroutine frame slot {} is empty", slot)
            }
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid config '{}': {}", field, reason)
            }
            Self::CoreHalted => {
                write!(f, "Core halted after a fatal error")
            }
            Self::IndexOutOfBounds { index, length } => {
                write!(f, "Index {} out of bounds for length {}", index, length)
            }
        }
    }
}

/// Error raised by a heap, tagged with the core that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapError {
    pub kind: ErrorKind,
    pub core: Option<u32>,
}

impl HeapError {
    pub fn new(kind: ErrorKind, core: u32) -> Self {
        Self { kind, core: Some(core) }
    }

    /// Error not tied to any core (configuration loading)
    pub fn detached(kind: ErrorKind) -> Self {
        Self { kind, core: None }
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core {
            Some(core) => write!(f, "core {}: [E{:03}] {}", core, self.code(), self.kind),
            None => write!(f, "[E{:03}] {}", self.code(), self.kind),
        }
    }
}

impl std::error::Error for HeapError {}

impl From<ErrorKind> for HeapError {
    fn from(kind: ErrorKind) -> Self {
        Self::detached(kind)
    }
}
