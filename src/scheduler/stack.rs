// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::ptr;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A coroutine stack: a usable region on top of an inaccessible guard page, so
/// an overflow faults instead of silently corrupting a neighbor. The buffer
/// never moves once created and is released on drop.
pub struct CoroutineStack {
    /// Base of the allocation (the guard region starts here).
    base: *mut u8,
    /// Total allocation size (guard plus usable).
    alloc_size: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CoroutineStack {
    /// Allocates a stack with `stack_size` usable bytes, rounded up to whole
    /// pages and clamped to the crate minimum.
    pub fn new(stack_size: usize) -> Result<Self, Fail> {
        let page_size: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let stack_size: usize = stack_size.max(limits::MIN_STACK_SIZE);
        let stack_size: usize = (stack_size + page_size - 1) & !(page_size - 1);
        let guard_size: usize = limits::STACK_GUARD_SIZE.max(page_size);
        let alloc_size: usize = guard_size + stack_size;

        let base: *mut libc::c_void = unsafe {
            libc::mmap(
                ptr::null_mut(),
                alloc_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            let cause: String = format!("failed to map coroutine stack (size={:?})", alloc_size);
            error!("new(): {}", cause);
            return Err(Fail::last_os_error(&cause));
        }

        // Make the bottom of the allocation inaccessible.
        if unsafe { libc::mprotect(base, guard_size, libc::PROT_NONE) } != 0 {
            let cause: String = format!("failed to protect stack guard page (size={:?})", guard_size);
            error!("new(): {}", cause);
            unsafe { libc::munmap(base, alloc_size) };
            return Err(Fail::last_os_error(&cause));
        }

        Ok(Self {
            base: base as *mut u8,
            alloc_size,
        })
    }

    /// Base of the usable region (first byte above the guard).
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.add(self.alloc_size - self.size()) }
    }

    /// One byte past the usable region. Stacks grow downward on every
    /// supported target, so execution starts just below this address.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.alloc_size) }
    }

    /// Number of usable bytes.
    pub fn size(&self) -> usize {
        let page_size: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        self.alloc_size - limits::STACK_GUARD_SIZE.max(page_size)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for CoroutineStack {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.base as *mut libc::c_void, self.alloc_size) } != 0 {
            warn!("drop(): failed to unmap coroutine stack (base={:?})", self.base);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
