//! The differential vtable probe.
//!
//! Given a virtual member pointer belonging to some unrelated class, we
//! need the (slot, this-adjustment) pair it encodes without invoking the
//! real method. The trick, inherited from the classic C++ formulation, is
//! to dispatch the pointer against a *synthetic* object instead: a fixed
//! two-sub-object region shaped like a multiply-inherited instance, where
//! every vtable slot points at a function that reports which slot was hit
//! and how far the receiver was adjusted.
//!
//! Under the canonical encoding the (slot, adjustment) pair is independent
//! of the declaring class, so dispatching against the probe exercises the
//! identical call path a real instance would, and the invoked reporter can
//! measure both numbers: the slot index is baked into it at monomorphization
//! time, and the adjustment falls out of comparing its receiver address
//! against the probe's base address.
//!
//! The probe region is built once per process, lazily, and never mutated
//! afterwards. It is the only process-wide state in this crate.

use std::sync::OnceLock;

use crate::abi::{AbiProfile, MemberFnPtr, MemberKind, WORD};
use crate::error::{Error, Result};

/// Number of vtable slots the probe can observe. Member pointers selecting
/// a slot at or beyond this are rejected rather than dispatched.
pub const PROBE_SLOTS: usize = 64;

/// What a virtual member pointer encodes, as measured by a probe dispatch.
///
/// Freshly heap-allocated per query and owned by the requesting call frame;
/// never cached or shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualMethodMetadata {
    /// Vtable slot index, in pointer-size units.
    pub slot: usize,
    /// This-adjustment in bytes, applied to reach the declaring base
    /// sub-object of a multiply-inherited object.
    pub thunk: isize,
}

type ReportFn = extern "C" fn(*const u8) -> *mut VirtualMethodMetadata;

/// One vtable entry of the probe. `SLOT` is its own position in the table;
/// the adjustment is whatever displacement the dispatch applied to land
/// `this` away from the probe's base.
extern "C" fn report_slot<const SLOT: usize>(this: *const u8) -> *mut VirtualMethodMetadata {
    let base = VirtualMetadataProbe::shared().base_addr();
    Box::into_raw(Box::new(VirtualMethodMetadata {
        slot: SLOT,
        thunk: this as isize - base as isize,
    }))
}

macro_rules! reporter_table {
    ($($slot:literal)*) => {
        [$(report_slot::<$slot> as ReportFn,)*]
    };
}

/// The probe's vtable: every slot reports its own index. Both sub-objects
/// share it, since the adjustment is measured from the receiver address
/// rather than baked into the table.
static REPORTERS: [ReportFn; PROBE_SLOTS] = reporter_table!(
     0  1  2  3  4  5  6  7  8  9 10 11 12 13 14 15
    16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
    32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47
    48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63
);

/// Memory image of the synthetic multiply-inherited object: two base
/// sub-objects, each contributing exactly one vtable pointer. A dispatch
/// with adjustment 0 lands on the leading sub-object, one with adjustment
/// [`WORD`] on the trailing one. Anything further would read past the
/// object, which is why [`VirtualMetadataProbe::metadata_of`] bounds the
/// adjustment first.
#[repr(C)]
#[allow(dead_code)] // fields are read through the dispatch casts, not by name
struct ProbeRegion {
    lead_vptr: *const ReportFn,
    trail_vptr: *const ReportFn,
}

/// The process-wide probe instance.
///
/// Constructed exactly once on first use and read-only afterwards, so
/// concurrent queries need no locking.
pub struct VirtualMetadataProbe {
    region: Box<ProbeRegion>,
}

// The region holds pointers into an immutable static table and is never
// written after construction.
unsafe impl Send for VirtualMetadataProbe {}
unsafe impl Sync for VirtualMetadataProbe {}

static SHARED: OnceLock<VirtualMetadataProbe> = OnceLock::new();

impl VirtualMetadataProbe {
    /// The shared probe, constructing it on first use.
    pub fn shared() -> &'static Self {
        SHARED.get_or_init(|| Self {
            region: Box::new(ProbeRegion {
                lead_vptr: REPORTERS.as_ptr(),
                trail_vptr: REPORTERS.as_ptr(),
            }),
        })
    }

    fn base_addr(&self) -> usize {
        &*self.region as *const ProbeRegion as usize
    }

    /// Measure the (slot, thunk) pair encoded by a virtual member pointer.
    ///
    /// The pointer is reinterpreted under `profile` and dispatched against
    /// the shared probe region exactly the way the compiler would dispatch
    /// it against a real instance: adjust the receiver, load the vtable
    /// pointer stored at its start, index the slot, call through it. The
    /// reporter that answers returns freshly-owned metadata.
    pub fn metadata_of(
        &self,
        func: MemberFnPtr,
        profile: &AbiProfile,
    ) -> Result<Box<VirtualMethodMetadata>> {
        let (vtable_offset, adjustment) = match profile.classify(func) {
            MemberKind::Virtual {
                vtable_offset,
                adjustment,
            } => (vtable_offset, adjustment),
            MemberKind::Direct { address, .. } => return Err(Error::NotVirtual { ptr: address }),
        };

        if vtable_offset % WORD != 0 {
            return Err(Error::MisalignedVtableOffset {
                offset: vtable_offset,
            });
        }
        let slot = vtable_offset / WORD;
        if slot >= PROBE_SLOTS {
            return Err(Error::SlotOutOfRange {
                slot,
                capacity: PROBE_SLOTS,
            });
        }
        // The region only has vtable pointers at its two sub-object
        // offsets; an adjustment past the trailing one cannot be dispatched.
        if adjustment != 0 && adjustment != WORD as isize {
            return Err(Error::ThunkOutOfRange {
                thunk: adjustment,
                limit: std::mem::size_of::<ProbeRegion>(),
            });
        }

        let this = (self.base_addr() as isize + adjustment) as *const u8;
        let raw = unsafe {
            let vptr = *(this as *const *const ReportFn);
            let entry = *vptr.add(slot);
            entry(this)
        };

        // Ownership of the reporter's allocation passes to the caller.
        Ok(unsafe { Box::from_raw(raw) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_slot_and_zero_thunk() {
        let profile = AbiProfile::canonical();
        let meta = VirtualMetadataProbe::shared()
            .metadata_of(profile.encode_virtual(3, 0), &profile)
            .unwrap();
        assert_eq!(meta.slot, 3);
        assert_eq!(meta.thunk, 0);
    }

    #[test]
    fn measures_trailing_sub_object_thunk() {
        let profile = AbiProfile::canonical();
        let meta = VirtualMetadataProbe::shared()
            .metadata_of(profile.encode_virtual(5, WORD as isize), &profile)
            .unwrap();
        assert_eq!(meta.slot, 5);
        assert_eq!(meta.thunk, WORD as isize);
    }

    #[test]
    fn rejects_non_virtual_pointers() {
        let profile = AbiProfile::canonical();
        let func = MemberFnPtr::from_fn_address(0x4000);
        assert!(matches!(
            VirtualMetadataProbe::shared().metadata_of(func, &profile),
            Err(Error::NotVirtual { ptr: 0x4000 })
        ));
    }

    #[test]
    fn rejects_slot_beyond_capacity() {
        let profile = AbiProfile::canonical();
        let func = profile.encode_virtual(PROBE_SLOTS, 0);
        assert!(matches!(
            VirtualMetadataProbe::shared().metadata_of(func, &profile),
            Err(Error::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_adjustment_past_the_region() {
        let profile = AbiProfile::canonical();
        let func = profile.encode_virtual(0, 4 * WORD as isize);
        assert!(matches!(
            VirtualMetadataProbe::shared().metadata_of(func, &profile),
            Err(Error::ThunkOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_misaligned_vtable_offset() {
        let profile = AbiProfile::canonical();
        // Odd function word with an offset that is not a slot boundary.
        let func = MemberFnPtr::from_parts(3, 0);
        assert!(matches!(
            VirtualMetadataProbe::shared().metadata_of(func, &profile),
            Err(Error::MisalignedVtableOffset { offset: 2 })
        ));
    }

    #[test]
    fn shared_instance_is_stable() {
        // Compare as integers; a raw pointer cannot cross the thread join.
        let a = VirtualMetadataProbe::shared() as *const _ as usize;
        let b = std::thread::spawn(|| VirtualMetadataProbe::shared() as *const _ as usize)
            .join()
            .unwrap();
        assert_eq!(a, b);
    }
}
