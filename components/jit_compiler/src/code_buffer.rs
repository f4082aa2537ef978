//! Executable memory for generated code.
//!
//! Pages are mapped writable, filled, then flipped to read+execute. The
//! buffer owns the mapping; dropping it unmaps the pages, which is how the
//! collector reclaims code for dead functions.

use core_types::EngineError;

/// Signature of a compiled function: `(invocation, register file base) →
/// boxed result`. The sentinel `Value::EMPTY` reports a pending error.
pub type JitEntry = unsafe extern "C" fn(*mut crate::stubs::JitInvocation, *mut u64) -> u64;

/// An owned span of executable memory.
pub struct ExecutableCode {
    ptr: *mut u8,
    len: usize,
}

impl std::fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(unix)]
impl ExecutableCode {
    /// Map the code bytes into an executable page span.
    pub fn map(code: &[u8]) -> Result<ExecutableCode, EngineError> {
        if code.is_empty() {
            return Err(EngineError::Internal("empty code buffer".into()));
        }
        let page = 4096usize;
        let len = code.len().div_ceil(page) * page;
        // SAFETY: fresh anonymous private mapping, written before being
        // made executable, unmapped exactly once in Drop.
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(EngineError::OutOfMemory);
            }
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
            if libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(ptr, len);
                return Err(EngineError::Internal("mprotect failed".into()));
            }
            Ok(ExecutableCode {
                ptr: ptr as *mut u8,
                len,
            })
        }
    }

    /// Entry point of the mapped code.
    ///
    /// # Safety
    ///
    /// The mapped bytes must be a complete function following the JIT
    /// calling convention.
    pub unsafe fn entry(&self) -> JitEntry {
        std::mem::transmute::<*mut u8, JitEntry>(self.ptr)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(not(unix))]
impl ExecutableCode {
    pub fn map(_code: &[u8]) -> Result<ExecutableCode, EngineError> {
        Err(EngineError::JitUnavailable)
    }

    pub unsafe fn entry(&self) -> JitEntry {
        unreachable!("no executable mappings on this platform")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        true
    }
}

#[cfg(unix)]
impl Drop for ExecutableCode {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from the mmap in `map`.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}
