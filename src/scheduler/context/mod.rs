// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The context-switch capability: create an execution context bound to an
//! entry function and a caller-supplied stack, and swap execution between two
//! saved contexts. Two back-ends exist because some instrumentation tooling
//! refuses nonlocal jumps that land on a different stack: the default uses
//! the OS user-context facility, which such tooling understands, while the
//! `raw-context` feature switches to a hand-written register switch. Nothing
//! outside this module may reference context internals.

//======================================================================================================================
// Exports
//======================================================================================================================

#[cfg(not(feature = "raw-context"))]
mod ucontext;
#[cfg(not(feature = "raw-context"))]
pub use self::ucontext::ContextFrame;

#[cfg(feature = "raw-context")]
mod sysv;
#[cfg(feature = "raw-context")]
pub use self::sysv::ContextFrame;

//======================================================================================================================
// Types
//======================================================================================================================

/// First function executed on a fresh context. It must never return; a
/// context that is done must swap away forever instead.
pub type EntryPoint = extern "C" fn(arg: *mut u8);

//======================================================================================================================
// Unit Tests
//======================================================================================================================
