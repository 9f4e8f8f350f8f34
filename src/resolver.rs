//! Member-pointer to code-address resolution.
//!
//! [`Addresser`] turns an opaque member-function-pointer value into the
//! absolute address of the function's first instruction:
//!
//! ```text
//! non-virtual:  the bits already are the address
//! virtual:      [[synthetic_instance + thunk] + slot * word]
//! ```
//!
//! where `(slot, thunk)` come from the shared
//! [`VirtualMetadataProbe`](crate::probe::VirtualMetadataProbe) and the
//! synthetic instance exists only to supply correctly-installed vtable
//! pointers. On Windows the entry read out of a vtable may still be an
//! import-table jump stub; those are unwrapped to the function body.

use tracing::debug;

use crate::abi::{AbiProfile, MemberFnPtr, MemberKind, WORD};
use crate::class::ClassDescriptor;
use crate::error::{Error, Result};
use crate::instance::SyntheticInstance;
use crate::memory;
use crate::probe::VirtualMetadataProbe;

/// An absolute code address.
pub type Address = usize;

/// Resolves member-function pointers under a fixed ABI profile.
#[derive(Clone, Debug, Default)]
pub struct Addresser {
    profile: AbiProfile,
}

impl Addresser {
    pub fn new(profile: AbiProfile) -> Self {
        Self { profile }
    }

    /// An addresser for the canonical encoding of the host toolchain.
    pub fn canonical() -> Self {
        Self::new(AbiProfile::canonical())
    }

    pub fn profile(&self) -> &AbiProfile {
        &self.profile
    }

    /// Resolve a non-virtual member pointer or a plain function pointer.
    ///
    /// Pure bit reinterpretation: no allocation, no probing.
    pub fn resolve_non_virtual(&self, func: MemberFnPtr) -> Address {
        debug!("resolving non-virtual member pointer {:x}", func);
        let address = func.ptr();
        debug!("resolved address {:#x}", address);
        address
    }

    /// Resolve a virtual member pointer against its owning class.
    ///
    /// Returns `Ok(None)` when the owning class is abstract: pure-virtual
    /// slots are not safely reachable through a complete object, so no
    /// instantiation is attempted. Errors cover the structurally detectable
    /// failure modes; a pointer from a foreign ABI family is not one of
    /// them and resolves to garbage.
    pub fn resolve_virtual(
        &self,
        func: MemberFnPtr,
        class: &ClassDescriptor,
    ) -> Result<Option<Address>> {
        debug!("resolving virtual member pointer {:x}", func);

        if class.is_abstract() {
            debug!("owning class is abstract, unresolvable");
            return Ok(None);
        }

        let instance = SyntheticInstance::materialize(class)?;
        let meta = VirtualMetadataProbe::shared().metadata_of(func, &self.profile)?;

        // [[this + thunk] + slot * word] is the entry we want.
        let subobject = instance.addr().wrapping_add_signed(meta.thunk);
        let vtable = unsafe { memory::read_word(subobject)? };
        if vtable == 0 {
            return Err(Error::NullVtable { addr: subobject });
        }
        let mut address = unsafe { memory::read_word(vtable + meta.slot * WORD)? };

        if self.profile.unwrap_jump_stubs {
            if let Some(body) = unwrap_jump_stub(address) {
                address = body;
            }
        }

        debug!("resolved address {:#x}", address);
        Ok(Some(address))
    }

    /// Adjust a candidate `this` pointer to the sub-object expected by the
    /// method `func` denotes.
    ///
    /// Needed when manually binding a receiver to a method declared in a
    /// non-primary base of a multiply-inherited class.
    pub fn adjust_this(&self, func: MemberFnPtr, this: *mut u8) -> Result<*mut u8> {
        match self.profile.classify(func) {
            MemberKind::Virtual { .. } => {
                let meta = VirtualMetadataProbe::shared().metadata_of(func, &self.profile)?;
                Ok(this.wrapping_offset(meta.thunk))
            }
            // Non-virtual pointers carry their adjustment in the encoding
            // itself; no probe dispatch required.
            MemberKind::Direct { adjustment, .. } => Ok(this.wrapping_offset(adjustment)),
        }
    }
}

/// Follow a memory-indirect `jmp` stub to the function body it targets.
///
/// Returns `None` when the bytes at `address` are anything else, including
/// unreadable memory or a register-based jump (a real function body doing
/// its own dispatch).
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) fn unwrap_jump_stub(address: Address) -> Option<Address> {
    use iced_x86::{Decoder, DecoderOptions, Mnemonic, OpKind, Register};

    let mut code = [0u8; 16];
    unsafe { memory::read_bytes(address, &mut code).ok()? };

    let bitness = if cfg!(target_arch = "x86_64") { 64 } else { 32 };
    let mut decoder = Decoder::with_ip(bitness, &code, address as u64, DecoderOptions::NONE);
    let instr = decoder.decode();

    if instr.is_invalid()
        || instr.mnemonic() != Mnemonic::Jmp
        || instr.op0_kind() != OpKind::Memory
        || instr.memory_index() != Register::None
    {
        return None;
    }

    // Only `jmp [disp32]` / `jmp [rip+disp32]` qualify as import stubs.
    let slot = match instr.memory_base() {
        Register::RIP => instr.ip_rel_memory_address(),
        Register::None => instr.memory_displacement64(),
        _ => return None,
    };

    unsafe { memory::read_word(slot as usize).ok() }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub(crate) fn unwrap_jump_stub(_address: Address) -> Option<Address> {
    None
}
