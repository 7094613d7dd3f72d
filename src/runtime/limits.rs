// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Constants
//==============================================================================

/// Default usable stack size for a coroutine (32 KiB).
pub const DEFAULT_STACK_SIZE: usize = 32 * 1024;

/// Smallest usable stack size we accept. The user-context back-end pushes a
/// signal frame on resume, so anything below this is asking for an overflow.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Size of the inaccessible guard region mapped below every coroutine stack.
pub const STACK_GUARD_SIZE: usize = 4 * 1024;
