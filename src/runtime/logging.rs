// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Logging rides the `log` facade with `flexi_logger` as the sink, so the
//! scheduler's tracing (registration, resumption, removal, stop requests)
//! can be switched on from the environment without recompiling, e.g.
//! `RUST_LOG=trace` to watch every tick's decision.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guards [initialize] so only its first caller starts a logger.
static LOGGING_INIT: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging from the environment. Safe to call from every entry
/// point and every test; only the first call acts.
///
/// A failure to start the logger is reported on stderr and otherwise
/// ignored: the usual cause is an embedder that already installed its own
/// `log` backend, and losing trace output is not worth unwinding the
/// embedder's process over.
pub fn initialize() {
    LOGGING_INIT.call_once(|| {
        if let Err(e) = Logger::try_with_env().and_then(|logger| logger.start()) {
            eprintln!("catwalk: logging not started: {}", e);
        }
    });
}
