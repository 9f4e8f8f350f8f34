//! # addresser
//!
//! Resolves C++ member-function-pointer values to absolute code addresses
//! at runtime.
//!
//! ## Overview
//!
//! Hooking and interop layers often hold nothing but a compiler-generated
//! member-pointer value for the code they need to redirect or call — no
//! symbols, no source. For a non-virtual method the bits already are the
//! address. For a virtual method they select a vtable slot, so this crate:
//!
//! 1. Dispatches the pointer against a synthetic multiply-inherited probe
//!    object whose vtable slots report which slot was hit and how far the
//!    receiver was adjusted
//! 2. Fabricates an instance of the owning class by copy-constructing from
//!    a zero-filled buffer, which heals the vtable pointer(s)
//! 3. Reads the slot out of the fabricated instance's vtable, unwrapping
//!    an import-table jump stub if the platform uses them
//!
//! Abstract owning classes are never instantiated and report as
//! unresolvable.
//!
//! ## ABI assumptions
//!
//! The whole technique assumes the canonical (vtable-index,
//! this-adjustment) member-pointer encoding; which variant applies is
//! captured in an [`AbiProfile`]. A pointer produced under a different
//! encoding family is **not detected** and resolves to silently wrong
//! addresses. That is an accepted limitation of the technique, not a
//! recoverable error.

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod abi;
pub mod class;
pub mod error;
pub mod instance;
pub mod memory;
pub mod probe;
pub mod resolver;

pub use abi::{AbiProfile, MemberFnPtr, MemberKind, VirtualDiscriminator};
pub use class::{ClassDescriptor, CopyConstructor};
pub use error::{Error, Result};
pub use instance::SyntheticInstance;
pub use probe::{VirtualMetadataProbe, VirtualMethodMetadata};
pub use resolver::{Address, Addresser};
