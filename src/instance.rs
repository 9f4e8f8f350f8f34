//! Synthetic instances grown from uninitialized memory.
//!
//! Virtual resolution needs a live polymorphic object of the owning class,
//! and there is no legitimate way to get one. So we fabricate it: a
//! zero-filled donor buffer the size of the class is reinterpreted as an
//! instance and handed to the class's copy constructor, which builds a
//! genuine heap instance from it. Vtables are per-class static data, so the
//! copy constructor installs the *correct* vtable pointer(s) into the new
//! instance's header no matter that the donor's were garbage — the one part
//! of the object resolution cares about comes out valid.
//!
//! Everything else about the instance is semantically invalid, which is why
//! it is torn down by raw deallocation: running the class destructor on it
//! could fire arbitrary side effects.
//!
//! This module is the crate's aliasing escape hatch; the slot and thunk
//! arithmetic around it stays in safe code.

use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::class::ClassDescriptor;
use crate::error::{Error, Result};

/// A heap instance copy-constructed from a zeroed donor buffer.
///
/// Lives strictly within one resolution call; dropping it releases the
/// allocation without running any destructor.
pub struct SyntheticInstance {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl SyntheticInstance {
    /// Fabricate an instance of the described class.
    ///
    /// Fails with [`Error::AbstractClass`] if the descriptor has no copy
    /// constructor; callers that want "unresolvable" rather than an error
    /// check [`ClassDescriptor::is_abstract`] first.
    pub fn materialize(class: &ClassDescriptor) -> Result<Self> {
        let ctor = class.copy_constructor().ok_or(Error::AbstractClass)?;
        let layout = Layout::from_size_align(class.size().max(1), class.align().max(1))?;

        unsafe {
            // The donor: zeroed bytes masquerading as an instance. Never a
            // real object, never escapes this function.
            let donor = alloc_zeroed(layout);
            if donor.is_null() {
                return Err(Error::AllocationFailed { size: layout.size() });
            }

            let instance = alloc(layout);
            if instance.is_null() {
                dealloc(donor, layout);
                return Err(Error::AllocationFailed { size: layout.size() });
            }

            // Contract taken at ClassDescriptor::new: this installs the
            // class vtable pointer(s) at the instance header.
            ctor(instance, donor);
            dealloc(donor, layout);

            Ok(Self {
                ptr: NonNull::new_unchecked(instance),
                layout,
            })
        }
    }

    /// Base address of the instance.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for SyntheticInstance {
    fn drop(&mut self) {
        // Raw deallocation only; the class destructor must not run on a
        // semantically invalid object.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::WORD;

    const MARKER: usize = 0x7E57_AB1E;

    extern "C" fn marker_copy(dst: *mut u8, src: *const u8) {
        unsafe {
            (dst as *mut usize).write(MARKER);
            // Echo the donor header so the test can observe it arrived
            // zeroed.
            (dst.add(WORD) as *mut usize).write((src as *const usize).read());
        }
    }

    #[test]
    fn copy_constructs_from_zeroed_donor() {
        let class = unsafe { ClassDescriptor::new(4 * WORD, WORD, marker_copy) };
        let instance = SyntheticInstance::materialize(&class).unwrap();
        let header = unsafe { (instance.addr() as *const usize).read() };
        let donor_header = unsafe { ((instance.addr() + WORD) as *const usize).read() };
        assert_eq!(header, MARKER);
        assert_eq!(donor_header, 0);
    }

    #[test]
    fn abstract_class_cannot_materialize() {
        let class = ClassDescriptor::abstract_class(2 * WORD, WORD);
        assert!(matches!(
            SyntheticInstance::materialize(&class),
            Err(Error::AbstractClass)
        ));
    }

    #[test]
    fn zero_sized_class_still_allocates() {
        extern "C" fn empty_copy(_dst: *mut u8, _src: *const u8) {}
        let class = unsafe { ClassDescriptor::new(0, 1, empty_copy) };
        let instance = SyntheticInstance::materialize(&class).unwrap();
        assert_ne!(instance.addr(), 0);
    }
}
