//! Raw memory access primitives.
//!
//! Every read of an address outside Rust's ownership model funnels through
//! this module. On Windows the reads are vetted against the page map first
//! (resolved vtables and import stubs live in foreign modules); elsewhere
//! only structural checks apply and the caller's contract does the rest.

use crate::abi::WORD;
use crate::error::{Error, Result};

#[cfg(target_os = "windows")]
use windows::Win32::{
    System::Diagnostics::Debug::ReadProcessMemory,
    System::Memory::{
        VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE_READ,
        PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS, PAGE_READONLY,
        PAGE_READWRITE, PAGE_WRITECOPY,
    },
    System::Threading::GetCurrentProcess,
};

/// Read one pointer-sized word from `addr`.
///
/// # Safety
///
/// `addr` must point into a live allocation holding at least one word.
/// Null and misaligned addresses are rejected; on Windows the page
/// protection is checked as well, but on other platforms a stale address
/// still faults.
pub unsafe fn read_word(addr: usize) -> Result<usize> {
    if addr == 0 || addr % WORD != 0 {
        return Err(Error::MemoryReadFailed { addr, size: WORD });
    }
    if !is_memory_readable(addr as *const u8, WORD) {
        return Err(Error::MemoryReadFailed { addr, size: WORD });
    }
    Ok(unsafe { (addr as *const usize).read() })
}

/// Read `dst.len()` bytes starting at `addr`.
///
/// # Safety
///
/// Same contract as [`read_word`], minus the alignment requirement.
pub unsafe fn read_bytes(addr: usize, dst: &mut [u8]) -> Result<()> {
    if dst.is_empty() {
        return Ok(());
    }
    if addr == 0 || !is_memory_readable(addr as *const u8, dst.len()) {
        return Err(Error::MemoryReadFailed {
            addr,
            size: dst.len(),
        });
    }

    #[cfg(target_os = "windows")]
    {
        if !read_process_memory(addr as *const u8, dst) {
            return Err(Error::MemoryReadFailed {
                addr,
                size: dst.len(),
            });
        }
        Ok(())
    }

    #[cfg(not(target_os = "windows"))]
    {
        unsafe { std::ptr::copy_nonoverlapping(addr as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
}

/// Copy memory via `ReadProcessMemory` so a bad page reports failure
/// instead of faulting.
#[cfg(target_os = "windows")]
fn read_process_memory(src: *const u8, dst: &mut [u8]) -> bool {
    let mut bytes_read: usize = 0;

    unsafe {
        ReadProcessMemory(
            GetCurrentProcess(),
            src as *const _,
            dst.as_mut_ptr() as *mut _,
            dst.len(),
            Some(&mut bytes_read),
        )
        .is_ok()
            && bytes_read == dst.len()
    }
}

/// Probe a single byte of memory to verify it's actually readable.
///
/// Catches cases where VirtualQuery reports memory as readable but it
/// faults anyway (Wine edge cases, guard pages set after the query).
#[cfg(target_os = "windows")]
fn probe_memory_byte(addr: *const u8) -> bool {
    let mut buf = [0u8; 1];
    read_process_memory(addr, &mut buf)
}

/// Check if a memory range is committed and readable.
#[cfg(target_os = "windows")]
pub fn is_memory_readable(addr: *const u8, size: usize) -> bool {
    if size == 0 {
        return true;
    }

    let mut mbi = MEMORY_BASIC_INFORMATION::default();
    let result = unsafe {
        VirtualQuery(
            Some(addr as *const _),
            &mut mbi,
            std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };

    if result == 0 {
        return false;
    }

    const VALID_PROTECT: u32 = PAGE_READONLY.0
        | PAGE_READWRITE.0
        | PAGE_EXECUTE_READ.0
        | PAGE_EXECUTE_READWRITE.0
        | PAGE_WRITECOPY.0
        | PAGE_EXECUTE_WRITECOPY.0;

    if mbi.State != MEM_COMMIT {
        return false;
    }
    if (mbi.Protect.0 & VALID_PROTECT) == 0 {
        return false;
    }
    if (mbi.Protect.0 & (PAGE_GUARD.0 | PAGE_NOACCESS.0)) != 0 {
        return false;
    }

    // Check bounds against the queried region.
    let src_addr = addr as usize;
    let region_end = mbi.BaseAddress as usize + mbi.RegionSize;
    if src_addr + size > region_end {
        return false;
    }

    probe_memory_byte(addr)
}

/// No page map to consult here; null was already rejected and the caller's
/// safety contract covers the rest.
#[cfg(not(target_os = "windows"))]
pub fn is_memory_readable(addr: *const u8, _size: usize) -> bool {
    !addr.is_null()
}
