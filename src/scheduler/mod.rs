// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

mod context;
mod coroutine;
mod event;
mod generator;
#[allow(clippy::module_inception)]
mod scheduler;
mod stack;

pub use self::{
    coroutine::{
        Coroutine,
        CoroutineFunction,
        CoroutineOptions,
        CoroutineState,
        DescribeCallback,
        SharedCoroutine,
    },
    generator::{
        Generator,
        GeneratorFunction,
        SharedGenerator,
    },
    scheduler::{
        CompletionCallback,
        PollState,
        Scheduler,
        SharedScheduler,
        WeakScheduler,
    },
};
