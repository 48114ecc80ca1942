//! Reserving, committing and releasing the virtual memory behind the code heap.
//!
//! The code heap reserves its whole range up front without backing it, then commits
//! page-aligned pieces from the low end as it grows.

use crate::util::Address;
use libc::{PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::{Error, Result};

/// The protection a committed range ended up with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodeProtection {
    /// Readable, writable and executable.
    ReadWriteExec,
    /// Readable and writable only. Used when the OS refuses executable mappings.
    ReadWrite,
}

impl CodeProtection {
    fn into_native(self) -> libc::c_int {
        match self {
            CodeProtection::ReadWriteExec => PROT_READ | PROT_WRITE | PROT_EXEC,
            CodeProtection::ReadWrite => PROT_READ | PROT_WRITE,
        }
    }
}

/// Reserve `size` bytes of address space without committing memory. The OS picks the
/// address. Accessing the range before [`commit`] faults.
pub fn reserve(size: usize) -> Result<Address> {
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), size, PROT_NONE, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        Err(Error::last_os_error())
    } else {
        Ok(Address::from_mut_ptr(ptr))
    }
}

/// Commit a page-aligned range of a reservation.
///
/// With `exec` set, the range is made executable. If the OS refuses executable memory
/// (for example under a W^X policy) the range is committed read-write instead and the
/// returned protection says so.
pub fn commit(start: Address, size: usize, exec: bool) -> Result<CodeProtection> {
    if exec {
        match mprotect(start, size, CodeProtection::ReadWriteExec) {
            Ok(()) => return Ok(CodeProtection::ReadWriteExec),
            Err(e) if is_permission_error(&e) => {
                warn!(
                    "Executable commit of {} bytes at {} refused ({}). Falling back to read-write.",
                    size, start, e
                );
            }
            Err(e) => return Err(e),
        }
    }
    mprotect(start, size, CodeProtection::ReadWrite)?;
    Ok(CodeProtection::ReadWrite)
}

/// Release a whole reservation.
pub fn release(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Set a memory region to zero.
pub fn zero(start: Address, len: usize) {
    unsafe {
        std::ptr::write_bytes::<u8>(start.to_mut_ptr(), 0, len);
    }
}

/// Make freshly written instructions in `[start, start + size)` visible to instruction
/// fetch on all cores.
///
/// This is the only place the crate deals with instruction/data cache coherence. x86-64
/// keeps the caches coherent, so only a fence is needed there.
#[cfg(target_arch = "aarch64")]
pub fn flush_icache(start: Address, size: usize) {
    use std::arch::asm;
    if size == 0 {
        return;
    }
    let ctr: u64;
    unsafe {
        asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
    }
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);
    let end = start + size;

    let mut addr = start.align_down(dline);
    while addr < end {
        unsafe {
            asm!("dc cvau, {}", in(reg) addr.as_usize(), options(nostack, preserves_flags));
        }
        addr += dline;
    }
    unsafe {
        asm!("dsb ish", options(nostack, preserves_flags));
    }
    let mut addr = start.align_down(iline);
    while addr < end {
        unsafe {
            asm!("ic ivau, {}", in(reg) addr.as_usize(), options(nostack, preserves_flags));
        }
        addr += iline;
    }
    unsafe {
        asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }
}

/// Make freshly written instructions in `[start, start + size)` visible to instruction
/// fetch on all cores.
///
/// This is the only place the crate deals with instruction/data cache coherence. x86-64
/// keeps the caches coherent, so only a fence is needed there.
#[cfg(not(target_arch = "aarch64"))]
pub fn flush_icache(_start: Address, _size: usize) {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

fn mprotect(start: Address, size: usize, prot: CodeProtection) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot.into_native()) },
        0,
    )
}

fn is_permission_error(e: &Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EACCES) | Some(libc::EPERM))
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;

    #[test]
    fn test_reserve_commit_release() {
        let start = reserve(4 * BYTES_IN_PAGE).unwrap();
        assert!(start.is_aligned_to(BYTES_IN_PAGE));
        let prot = commit(start, BYTES_IN_PAGE, true).unwrap();
        assert!(prot == CodeProtection::ReadWriteExec || prot == CodeProtection::ReadWrite);
        unsafe {
            start.store::<usize>(42);
            assert_eq!(start.load::<usize>(), 42);
        }
        zero(start, BYTES_IN_PAGE);
        assert_eq!(unsafe { start.load::<usize>() }, 0);
        flush_icache(start, BYTES_IN_PAGE);
        assert!(release(start, 4 * BYTES_IN_PAGE).is_ok());
    }

    #[test]
    fn test_commit_read_write() {
        let start = reserve(BYTES_IN_PAGE).unwrap();
        assert_eq!(
            commit(start, BYTES_IN_PAGE, false).unwrap(),
            CodeProtection::ReadWrite
        );
        assert!(release(start, BYTES_IN_PAGE).is_ok());
    }
}
