//! Error types for addresser.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving a member-function pointer.
///
/// A member pointer whose encoding belongs to a different ABI family is
/// *not* reliably detected; only structurally impossible values (misaligned
/// vtable offsets, adjustments pointing past the probe object) surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("member pointer value 0x{ptr:X} does not denote a virtual method")]
    NotVirtual { ptr: usize },

    #[error("vtable offset 0x{offset:X} is not a multiple of the pointer size")]
    MisalignedVtableOffset { offset: usize },

    #[error("vtable slot {slot} exceeds probe capacity ({capacity} slots)")]
    SlotOutOfRange { slot: usize, capacity: usize },

    #[error("this-adjustment {thunk} lands outside the probe object ({limit} bytes)")]
    ThunkOutOfRange { thunk: isize, limit: usize },

    #[error("owning class is abstract and cannot be instantiated")]
    AbstractClass,

    #[error("failed to read memory at 0x{addr:X} (size: {size})")]
    MemoryReadFailed { addr: usize, size: usize },

    #[error("null vtable pointer in sub-object at 0x{addr:X}")]
    NullVtable { addr: usize },

    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    #[error("invalid class layout: {0}")]
    InvalidLayout(#[from] std::alloc::LayoutError),
}
