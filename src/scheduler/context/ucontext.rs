// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! User-context back-end. `makecontext` only forwards `int`-sized arguments,
//! so the entry function and its argument ride into the new context as four
//! 32-bit halves that a small glue function reassembles.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::EntryPoint;
use crate::{
    runtime::fail::Fail,
    scheduler::stack::CoroutineStack,
};
use ::std::{
    mem,
    ptr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A saved execution context. Boxed because the kernel-written register save
/// area must keep its address across swaps.
pub struct ContextFrame {
    ucp: Box<libc::ucontext_t>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs on the new stack; reassembles the entry function and argument from
/// the halves smuggled through `makecontext`.
extern "C" fn bounce(entry_lo: libc::c_uint, entry_hi: libc::c_uint, arg_lo: libc::c_uint, arg_hi: libc::c_uint) {
    let entry: usize = ((entry_hi as usize) << 32) | (entry_lo as usize);
    let arg: usize = ((arg_hi as usize) << 32) | (arg_lo as usize);
    let entry: EntryPoint = unsafe { mem::transmute::<usize, EntryPoint>(entry) };
    entry(arg as *mut u8);
    unreachable!("context entry function returned");
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ContextFrame {
    /// An empty frame, filled by the first swap out of it.
    pub fn root() -> Self {
        Self {
            ucp: Box::new(unsafe { mem::zeroed() }),
        }
    }

    /// Prepares a context such that the first swap to it begins executing
    /// `entry(arg)` on the given stack.
    pub fn prepare(stack: &CoroutineStack, entry: EntryPoint, arg: *mut u8) -> Result<Self, Fail> {
        let mut ucp: Box<libc::ucontext_t> = Box::new(unsafe { mem::zeroed() });
        if unsafe { libc::getcontext(&mut *ucp) } != 0 {
            let cause: String = "failed to capture template context".to_string();
            error!("prepare(): {}", cause);
            return Err(Fail::last_os_error(&cause));
        }

        ucp.uc_stack.ss_sp = stack.bottom() as *mut libc::c_void;
        ucp.uc_stack.ss_size = stack.size();
        ucp.uc_stack.ss_flags = 0;
        ucp.uc_link = ptr::null_mut();

        let glue: extern "C" fn() = unsafe {
            mem::transmute::<extern "C" fn(libc::c_uint, libc::c_uint, libc::c_uint, libc::c_uint), extern "C" fn()>(
                bounce,
            )
        };
        let entry_raw: usize = entry as usize;
        let arg_raw: usize = arg as usize;
        unsafe {
            libc::makecontext(
                &mut *ucp,
                glue,
                4,
                entry_raw as libc::c_uint,
                (entry_raw >> 32) as libc::c_uint,
                arg_raw as libc::c_uint,
                (arg_raw >> 32) as libc::c_uint,
            )
        };

        Ok(Self { ucp })
    }

    /// Saves the current execution state into `from` and resumes `to` at the
    /// point it last saved. Control comes back here when some other context
    /// swaps to `from`.
    ///
    /// # Safety
    ///
    /// Both pointers must reference live frames, and `to` must hold either a
    /// prepared entry or a previously saved state.
    pub unsafe fn swap(from: *mut ContextFrame, to: *const ContextFrame) {
        let from_ucp: *mut libc::ucontext_t = &mut *(*from).ucp;
        let to_ucp: *const libc::ucontext_t = &*(*to).ucp;
        if libc::swapcontext(from_ucp, to_ucp) != 0 {
            // The only documented failure is a hopelessly corrupt target.
            panic!("swapcontext failed: {:?}", Fail::last_os_error("cannot swap execution contexts"));
        }
    }
}
