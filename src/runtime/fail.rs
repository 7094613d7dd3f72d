// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Failures carry the errno of the syscall that refused us plus a cause
//! naming what was being attempted. Everything fallible in this crate is a
//! thin layer over descriptors and mappings, so every failure bottoms out in
//! errno space: coroutine construction (stack mapping, wakeup event
//! creation), per-wait timer arming, and the readiness poll itself.

//==============================================================================
// Imports
//==============================================================================

use ::libc::c_int;
use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// A scheduler or coroutine operation that could not be carried out.
#[derive(Clone)]
pub struct Fail {
    /// Error code, in errno space.
    pub errno: c_int,
    /// What was being attempted.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Fail {
    /// Creates a failure with an explicit error code. Used where the code is
    /// already in hand, e.g. when the readiness poll reports one.
    pub fn new(errno: c_int, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// Creates a failure out of the calling thread's last OS error. Call it
    /// right after a syscall has signaled failure through its return value,
    /// before anything else can clobber errno.
    pub fn last_os_error(cause: &str) -> Self {
        let errno: c_int = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
        Self {
            errno,
            cause: cause.to_string(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Renders the cause together with the OS's own description of the code,
/// e.g. `failed to map coroutine stack (size=36864): Cannot allocate memory
/// (errno 12)`.
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (errno {})",
            self.cause,
            io::Error::from_raw_os_error(self.errno),
            self.errno
        )
    }
}

impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl error::Error for Fail {}
