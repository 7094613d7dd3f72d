// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Hand-written context switch. Saves exactly the callee-saved register set
//! of the platform ABI plus the stack pointer and a resume address; the first
//! entry into a fresh context goes through a boot thunk that installs the
//! entry argument and terminates the frame chain so unwinders stop cleanly.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::EntryPoint;
use crate::{
    runtime::fail::Fail,
    scheduler::stack::CoroutineStack,
};
use ::std::arch::global_asm;

//======================================================================================================================
// Constants
//======================================================================================================================

#[cfg(target_arch = "x86_64")]
const NUM_REGS: usize = 8;

#[cfg(target_arch = "aarch64")]
const NUM_REGS: usize = 21;

// Slot indices in the saved register array.
#[cfg(target_arch = "x86_64")]
mod slot {
    pub const RSP: usize = 0;
    pub const R12: usize = 3; // boot thunk: entry argument
    pub const R13: usize = 4; // boot thunk: entry function
    pub const RIP: usize = 7;
}

#[cfg(target_arch = "aarch64")]
mod slot {
    pub const SP: usize = 0;
    pub const X19: usize = 1; // boot thunk: entry argument
    pub const X20: usize = 2; // boot thunk: entry function
    pub const X30: usize = 12; // resume address
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// A saved execution context: the ABI's callee-saved registers, the stack
/// pointer and the resume address.
#[repr(C)]
pub struct ContextFrame {
    regs: [u64; NUM_REGS],
}

//======================================================================================================================
// Assembly
//======================================================================================================================

// Register array layout: rsp, rbp, rbx, r12, r13, r14, r15, rip.
#[cfg(target_arch = "x86_64")]
global_asm!(
    r#"
    .globl __catwalk_ctx_swap
    .globl __catwalk_ctx_boot
__catwalk_ctx_swap:
    mov [rdi + 0x00], rsp
    mov [rdi + 0x08], rbp
    mov [rdi + 0x10], rbx
    mov [rdi + 0x18], r12
    mov [rdi + 0x20], r13
    mov [rdi + 0x28], r14
    mov [rdi + 0x30], r15
    lea rax, [rip + 2f]
    mov [rdi + 0x38], rax
    mov rsp, [rsi + 0x00]
    mov rbp, [rsi + 0x08]
    mov rbx, [rsi + 0x10]
    mov r12, [rsi + 0x18]
    mov r13, [rsi + 0x20]
    mov r14, [rsi + 0x28]
    mov r15, [rsi + 0x30]
    mov rax, [rsi + 0x38]
    jmp rax
2:
    ret
__catwalk_ctx_boot:
    mov rdi, r12
    xor ebp, ebp
    push 0
    jmp r13
"#
);

// Register array layout: sp, x19-x28, x29, x30, d8-d15.
#[cfg(target_arch = "aarch64")]
global_asm!(
    r#"
    .globl __catwalk_ctx_swap
    .globl __catwalk_ctx_boot
__catwalk_ctx_swap:
    mov x9, sp
    str x9, [x0, #0x00]
    stp x19, x20, [x0, #0x08]
    stp x21, x22, [x0, #0x18]
    stp x23, x24, [x0, #0x28]
    stp x25, x26, [x0, #0x38]
    stp x27, x28, [x0, #0x48]
    stp x29, x30, [x0, #0x58]
    stp d8, d9, [x0, #0x68]
    stp d10, d11, [x0, #0x78]
    stp d12, d13, [x0, #0x88]
    stp d14, d15, [x0, #0x98]
    ldr x9, [x1, #0x00]
    mov sp, x9
    ldp x19, x20, [x1, #0x08]
    ldp x21, x22, [x1, #0x18]
    ldp x23, x24, [x1, #0x28]
    ldp x25, x26, [x1, #0x38]
    ldp x27, x28, [x1, #0x48]
    ldp x29, x30, [x1, #0x58]
    ldp d8, d9, [x1, #0x68]
    ldp d10, d11, [x1, #0x78]
    ldp d12, d13, [x1, #0x88]
    ldp d14, d15, [x1, #0x98]
    ret
__catwalk_ctx_boot:
    mov x0, x19
    mov x29, xzr
    mov x30, xzr
    br x20
"#
);

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("the raw-context back-end supports only x86_64 and aarch64");

extern "C" {
    fn __catwalk_ctx_swap(from: *mut ContextFrame, to: *const ContextFrame);
    fn __catwalk_ctx_boot();
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ContextFrame {
    /// An empty frame, filled by the first swap out of it.
    pub fn root() -> Self {
        Self { regs: [0; NUM_REGS] }
    }

    /// Prepares a context such that the first swap to it enters the boot
    /// thunk, which calls `entry(arg)` on the given stack.
    pub fn prepare(stack: &CoroutineStack, entry: EntryPoint, arg: *mut u8) -> Result<Self, Fail> {
        let mut regs: [u64; NUM_REGS] = [0; NUM_REGS];
        // The ABI requires 16-byte stack alignment at a function boundary;
        // the x86_64 boot thunk pushes a null return address on top.
        let top: u64 = stack.top() as u64 & !0xf;

        #[cfg(target_arch = "x86_64")]
        {
            regs[slot::RSP] = top;
            regs[slot::R12] = arg as u64;
            regs[slot::R13] = entry as usize as u64;
            regs[slot::RIP] = __catwalk_ctx_boot as usize as u64;
        }

        #[cfg(target_arch = "aarch64")]
        {
            regs[slot::SP] = top;
            regs[slot::X19] = arg as u64;
            regs[slot::X20] = entry as usize as u64;
            regs[slot::X30] = __catwalk_ctx_boot as usize as u64;
        }

        Ok(Self { regs })
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
        __catwalk_ctx_swap(from, to);
    }
}
