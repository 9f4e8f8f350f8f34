//! Member-pointer bit patterns and the ABI profiles that interpret them.
//!
//! A C++ pointer-to-member-function is an opaque, compiler-defined value.
//! The mainstream encoding family stores two words: a function word that
//! either holds a code address directly (non-virtual) or a vtable byte
//! offset (virtual), and a this-adjustment applied to the receiver before
//! the call. *Where* the virtual/non-virtual discriminator bit lives varies
//! between platforms, so that detail is factored into an [`AbiProfile`]
//! instead of being assumed at every call site.
//!
//! Nothing in this module dereferences memory; it is pure bit arithmetic
//! and deliberately lives outside the crate's unsafe boundary.

use std::fmt;

/// Pointer size in bytes; vtable slots are this wide.
pub const WORD: usize = std::mem::size_of::<usize>();

/// An opaque member-function-pointer value.
///
/// This is the two-word bit pattern as produced by the target compiler,
/// captured through an interop shim or constructed from parts. It is never
/// dereferenced directly, only reinterpreted through an [`AbiProfile`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(C)]
pub struct MemberFnPtr {
    ptr: usize,
    adj: isize,
}

impl MemberFnPtr {
    /// Build a member pointer from its raw function and adjustment words.
    pub const fn from_parts(ptr: usize, adj: isize) -> Self {
        Self { ptr, adj }
    }

    /// Wrap the address of a free or non-virtual function.
    pub const fn from_fn_address(address: usize) -> Self {
        Self::from_parts(address, 0)
    }

    /// The raw function word.
    pub const fn ptr(self) -> usize {
        self.ptr
    }

    /// The raw adjustment word.
    pub const fn adj(self) -> isize {
        self.adj
    }
}

impl fmt::LowerHex for MemberFnPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/{:#x}", self.ptr, self.adj)
    }
}

/// What a member pointer denotes once interpreted under a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    /// A non-virtual method or free function: the bits are a code address.
    Direct {
        address: usize,
        /// This-adjustment in bytes (non-zero for methods inherited from a
        /// non-primary base).
        adjustment: isize,
    },
    /// A virtual method: the bits select a vtable slot.
    Virtual {
        /// Byte offset of the slot within the vtable.
        vtable_offset: usize,
        /// This-adjustment in bytes, applied before the vtable is read.
        adjustment: isize,
    },
}

/// Where the virtual discriminator bit lives in the two-word encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualDiscriminator {
    /// Low bit of the function word. An odd function word means
    /// "vtable byte offset + 1"; even means a direct code address.
    /// Works because code is never byte-aligned.
    FunctionWord,
    /// Low bit of the adjustment word, which is stored doubled. Used where
    /// code addresses may legitimately be odd (interworking thumb bits).
    AdjustmentWord,
}

/// A swappable description of one member-pointer encoding.
///
/// The resolution algorithm only ever consults a profile, so the
/// assumptions baked into a particular compiler's codegen stay in one
/// place. A pointer produced under a *different* encoding family is not
/// detectable; interpreting it gives silently wrong answers. That risk is
/// inherent to the technique.
#[derive(Clone, Debug)]
pub struct AbiProfile {
    pub name: &'static str,
    pub discriminator: VirtualDiscriminator,
    /// Whether resolved virtual entries may be import-table jump stubs that
    /// must be followed to reach the function body.
    pub unwrap_jump_stubs: bool,
}

impl AbiProfile {
    /// The canonical (vtable-index, this-adjustment) encoding used by the
    /// x86-family System V / Windows toolchains this crate targets.
    pub const fn canonical() -> Self {
        Self {
            name: "canonical",
            discriminator: VirtualDiscriminator::FunctionWord,
            // Cross-module virtual calls on Windows can route through the
            // import address table.
            unwrap_jump_stubs: cfg!(target_os = "windows"),
        }
    }

    /// The ARM-family variant: discriminator in the adjustment word.
    pub const fn arm() -> Self {
        Self {
            name: "arm",
            discriminator: VirtualDiscriminator::AdjustmentWord,
            unwrap_jump_stubs: false,
        }
    }

    /// Interpret a member pointer's bits under this profile.
    pub fn classify(&self, func: MemberFnPtr) -> MemberKind {
        match self.discriminator {
            VirtualDiscriminator::FunctionWord => {
                if func.ptr & 1 == 1 {
                    MemberKind::Virtual {
                        vtable_offset: func.ptr - 1,
                        adjustment: func.adj,
                    }
                } else {
                    MemberKind::Direct {
                        address: func.ptr,
                        adjustment: func.adj,
                    }
                }
            }
            VirtualDiscriminator::AdjustmentWord => {
                if func.adj & 1 == 1 {
                    MemberKind::Virtual {
                        vtable_offset: func.ptr,
                        adjustment: func.adj >> 1,
                    }
                } else {
                    MemberKind::Direct {
                        address: func.ptr,
                        adjustment: func.adj >> 1,
                    }
                }
            }
        }
    }

    /// Encode a virtual method reference from a slot index (pointer-size
    /// units) and a this-adjustment in bytes. Interop shims and tests use
    /// this to fabricate the value the target compiler would emit.
    pub fn encode_virtual(&self, slot: usize, adjustment: isize) -> MemberFnPtr {
        let vtable_offset = slot * WORD;
        match self.discriminator {
            VirtualDiscriminator::FunctionWord => {
                MemberFnPtr::from_parts(vtable_offset + 1, adjustment)
            }
            VirtualDiscriminator::AdjustmentWord => {
                MemberFnPtr::from_parts(vtable_offset, (adjustment << 1) | 1)
            }
        }
    }

    /// Encode a non-virtual method or free-function reference.
    pub fn encode_direct(&self, address: usize, adjustment: isize) -> MemberFnPtr {
        match self.discriminator {
            VirtualDiscriminator::FunctionWord => {
                debug_assert!(address & 1 == 0, "code addresses are never odd here");
                MemberFnPtr::from_parts(address, adjustment)
            }
            VirtualDiscriminator::AdjustmentWord => {
                MemberFnPtr::from_parts(address, adjustment << 1)
            }
        }
    }
}

impl Default for AbiProfile {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_classifies_direct() {
        let p = AbiProfile::canonical();
        let f = MemberFnPtr::from_fn_address(0x1000);
        assert_eq!(
            p.classify(f),
            MemberKind::Direct {
                address: 0x1000,
                adjustment: 0
            }
        );
    }

    #[test]
    fn canonical_classifies_virtual() {
        let p = AbiProfile::canonical();
        let f = p.encode_virtual(3, WORD as isize);
        assert_eq!(
            p.classify(f),
            MemberKind::Virtual {
                vtable_offset: 3 * WORD,
                adjustment: WORD as isize
            }
        );
    }

    #[test]
    fn arm_discriminator_lives_in_adjustment() {
        let p = AbiProfile::arm();
        let v = p.encode_virtual(2, 8);
        assert_eq!(
            p.classify(v),
            MemberKind::Virtual {
                vtable_offset: 2 * WORD,
                adjustment: 8
            }
        );

        // An odd code address must not be mistaken for a virtual slot.
        let d = p.encode_direct(0x1001, 4);
        assert_eq!(
            p.classify(d),
            MemberKind::Direct {
                address: 0x1001,
                adjustment: 4
            }
        );
    }

    #[test]
    fn encode_round_trips() {
        for profile in [AbiProfile::canonical(), AbiProfile::arm()] {
            let f = profile.encode_virtual(7, 16);
            match profile.classify(f) {
                MemberKind::Virtual {
                    vtable_offset,
                    adjustment,
                } => {
                    assert_eq!(vtable_offset, 7 * WORD);
                    assert_eq!(adjustment, 16);
                }
                other => panic!("expected virtual, got {other:?}"),
            }
        }
    }
}
