//! Descriptions of foreign class layouts.
//!
//! Rust cannot see a C++ class definition, so the owning class of a member
//! pointer is described by the three facts resolution actually needs: its
//! size, its alignment, and its compiler-generated copy constructor. In
//! interop use the constructor is exported through a shim next to the
//! member pointers themselves; an abstract class simply has none.

/// A copy constructor as exported by an interop shim: construct an instance
/// at `dst` from the object at `src`.
///
/// Calling one is only sound if `dst` and `src` both span the class's full
/// size; the crate invokes it exclusively through
/// [`SyntheticInstance::materialize`](crate::instance::SyntheticInstance::materialize).
pub type CopyConstructor = unsafe extern "C" fn(dst: *mut u8, src: *const u8);

/// Layout description of the class that owns a member pointer.
#[derive(Clone, Copy, Debug)]
pub struct ClassDescriptor {
    size: usize,
    align: usize,
    copy_constructor: Option<CopyConstructor>,
}

impl ClassDescriptor {
    /// Describe a concrete (instantiable) class.
    ///
    /// # Safety
    ///
    /// `copy_constructor` must, given a readable source spanning `size`
    /// bytes, produce a valid polymorphic object of this class at the
    /// destination — in particular it must install the class's vtable
    /// pointer(s) regardless of what the source holds. The compiler's own
    /// copy constructor satisfies this.
    pub const unsafe fn new(size: usize, align: usize, copy_constructor: CopyConstructor) -> Self {
        Self {
            size,
            align,
            copy_constructor: Some(copy_constructor),
        }
    }

    /// Describe an abstract class. Never instantiated, so no constructor
    /// is needed and no safety obligation arises.
    pub const fn abstract_class(size: usize, align: usize) -> Self {
        Self {
            size,
            align,
            copy_constructor: None,
        }
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub const fn align(&self) -> usize {
        self.align
    }

    pub const fn is_abstract(&self) -> bool {
        self.copy_constructor.is_none()
    }

    pub const fn copy_constructor(&self) -> Option<CopyConstructor> {
        self.copy_constructor
    }
}
