// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Catwalk is a cooperative, single-threaded coroutine scheduler: coroutines
//! walk the runway one at a time. Every coroutine owns a private stack and
//! suspends itself at well-defined points (yield, wait, sleep, call); the
//! scheduler multiplexes all pending waits into one readiness poll and
//! resumes exactly one runnable coroutine per tick.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[cfg(not(target_os = "linux"))]
compile_error!("catwalk requires Linux (eventfd, timerfd and user contexts)");

#[macro_use]
extern crate log;

mod collections;

pub mod runtime;

pub mod scheduler;

pub use crate::{
    runtime::fail::Fail,
    scheduler::{
        Coroutine,
        CoroutineFunction,
        CoroutineOptions,
        CoroutineState,
        Generator,
        GeneratorFunction,
        PollState,
        SharedCoroutine,
        SharedGenerator,
        SharedScheduler,
        WeakScheduler,
    },
};
