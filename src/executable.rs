//! Executable memory for JIT output.
//!
//! This is the only place that touches page permissions. Installing code
//! always follows the same order, which is what W^X platforms require:
//!
//! 1. map a fresh page-rounded region read+write
//! 2. copy the machine code in
//! 3. flip the region to read+execute, dropping write
//! 4. synchronize the instruction cache over the region
//!
//! The region is unmapped when dropped.
use std::io;
use std::ptr::NonNull;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("cannot install an empty code buffer")]
    Empty,

    #[error("mmap failed: {0}")]
    Map(io::Error),

    #[error("mprotect(PROT_READ|PROT_EXEC) failed: {0}")]
    Protect(io::Error),

    #[error("executable memory is not supported on this platform")]
    Unsupported,
}

/// A mapped, read+execute region holding machine code.
#[derive(Debug)]
pub struct ExecutableRegion {
    ptr: NonNull<u8>,
    // Mapped length, a multiple of the page size.
    len: usize,
    code_len: usize,
}

impl ExecutableRegion {
    /// Copies `code` into fresh executable memory.
    pub fn install(code: &[u8]) -> Result<Self, MemoryError> {
        if code.is_empty() {
            return Err(MemoryError::Empty);
        }
        let len = round_to_page(code.len(), page_size());
        let ptr = sys::map_read_write(len)?;
        // SAFETY: the mapping is `len >= code.len()` bytes long, writable and
        // freshly created, so it can't overlap `code`.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.as_ptr(), code.len());
        }
        let region = Self {
            ptr,
            len,
            code_len: code.len(),
        };
        // On failure `region` is dropped and unmapped.
        sys::protect_read_exec(region.ptr, region.len)?;
        sys::synchronize_icache(region.ptr, region.code_len);
        log::debug!(
            "installed {} bytes of machine code at {:p} ({} mapped)",
            region.code_len,
            region.ptr,
            region.len
        );
        Ok(region)
    }

    /// Address of the first instruction.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Length of the machine code, not of the mapping.
    pub fn code_len(&self) -> usize {
        self.code_len
    }
}

impl Drop for ExecutableRegion {
    fn drop(&mut self) {
        sys::unmap(self.ptr, self.len);
    }
}

fn round_to_page(size: usize, page: usize) -> usize {
    size.div_ceil(page) * page
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

#[cfg(unix)]
mod sys {
    use std::io;
    use std::ptr::NonNull;

    use super::MemoryError;

    pub fn map_read_write(len: usize) -> Result<NonNull<u8>, MemoryError> {
        // SAFETY: anonymous private mapping, no file descriptor involved.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::Map(io::Error::last_os_error()));
        }
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| MemoryError::Map(io::Error::last_os_error()))
    }

    pub fn protect_read_exec(ptr: NonNull<u8>, len: usize) -> Result<(), MemoryError> {
        // SAFETY: `ptr..ptr+len` is a live mapping created by `map_read_write`.
        let rc = unsafe {
            libc::mprotect(ptr.as_ptr().cast(), len, libc::PROT_READ | libc::PROT_EXEC)
        };
        if rc != 0 {
            return Err(MemoryError::Protect(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn unmap(ptr: NonNull<u8>, len: usize) {
        // SAFETY: called once, from `Drop`, on the mapping we own.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
        if rc != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }

    #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
    pub fn synchronize_icache(ptr: NonNull<u8>, len: usize) {
        extern "C" {
            fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
        }
        // SAFETY: the range lies within our mapping.
        unsafe { sys_icache_invalidate(ptr.as_ptr().cast(), len) };
    }

    #[cfg(all(target_arch = "aarch64", not(target_os = "macos")))]
    pub fn synchronize_icache(ptr: NonNull<u8>, len: usize) {
        extern "C" {
            fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
        }
        // SAFETY: the range lies within our mapping.
        unsafe {
            let begin = ptr.as_ptr();
            __clear_cache(begin.cast(), begin.add(len).cast());
        }
    }

    /// x86 keeps instruction fetch coherent with data writes; only the
    /// compiler must not sink the copy past the call into the region.
    #[cfg(not(target_arch = "aarch64"))]
    pub fn synchronize_icache(_ptr: NonNull<u8>, _len: usize) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(not(unix))]
mod sys {
    use std::ptr::NonNull;

    use super::MemoryError;

    pub fn map_read_write(_len: usize) -> Result<NonNull<u8>, MemoryError> {
        Err(MemoryError::Unsupported)
    }

    pub fn protect_read_exec(_ptr: NonNull<u8>, _len: usize) -> Result<(), MemoryError> {
        Err(MemoryError::Unsupported)
    }

    pub fn unmap(_ptr: NonNull<u8>, _len: usize) {}

    pub fn synchronize_icache(_ptr: NonNull<u8>, _len: usize) {}
}
