// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A generator is a coroutine that produces values for a calling coroutine.
//! The caller transfers control with [Coroutine::call]; the generator runs
//! until it executes [Generator::yield_value], which copies the value into a
//! cell borrowed from the caller's frame and transfers control straight back.
//! The scheduler is bypassed in both directions, so a consumer sees the next
//! value in bounded time no matter what else is scheduled. The typed state
//! lives entirely in this wrapper; the scheduler only ever sees the untyped
//! coroutine underneath.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        SharedObject,
    },
    scheduler::{
        coroutine::{
            Coroutine,
            CoroutineFunction,
            CoroutineOptions,
            SharedCoroutine,
        },
        scheduler::SharedScheduler,
    },
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
    },
    ptr::{
        self,
        NonNull,
    },
};

//======================================================================================================================
// Types
//======================================================================================================================

/// The body of a generator. It receives the generator it runs on, through
/// which it yields values to its caller.
pub type GeneratorFunction<T> = Box<dyn FnOnce(&mut Generator<T>)>;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A value-producing coroutine.
pub struct Generator<T> {
    /// The untyped coroutine this generator runs on. Filled in right after
    /// registration; always present afterwards.
    coroutine: Option<SharedCoroutine>,
    /// The body, consumed on first resume.
    function: Option<GeneratorFunction<T>>,
    /// Output cell borrowed from the caller's frame; null outside a call.
    result: *mut T,
}

/// Shared handle to a generator. The embedder must keep it alive for as long
/// as the underlying coroutine is registered with the scheduler.
pub struct SharedGenerator<T>(SharedObject<Generator<T>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: 'static> SharedGenerator<T> {
    /// Creates a generator and registers its coroutine with `scheduler`.
    /// Generators never autostart: the first call starts them.
    pub fn new(scheduler: &mut SharedScheduler, function: GeneratorFunction<T>) -> Result<Self, Fail> {
        Self::with_options(scheduler, function, CoroutineOptions::default())
    }

    /// Creates a generator with custom options. `options.autostart` is
    /// ignored and forced off.
    pub fn with_options(
        scheduler: &mut SharedScheduler,
        function: GeneratorFunction<T>,
        mut options: CoroutineOptions,
    ) -> Result<Self, Fail> {
        let mut generator: SharedGenerator<T> = SharedGenerator(SharedObject::new(Generator {
            coroutine: None,
            function: Some(function),
            result: ptr::null_mut(),
        }));

        // The embedder keeps the wrapper alive while the coroutine is
        // registered, so the interior address stays valid for the body.
        let generator_ptr: *mut Generator<T> = generator.0.raw_mut();
        let body: CoroutineFunction = Box::new(move |_coroutine: &mut Coroutine| {
            let generator: &mut Generator<T> = unsafe { &mut *generator_ptr };
            let function: GeneratorFunction<T> = generator.function.take().expect("generator body already consumed");
            function(generator);
        });

        options.autostart = false;
        let coroutine: SharedCoroutine = SharedCoroutine::with_options(scheduler, body, options)?;
        generator.coroutine = Some(coroutine);
        Ok(generator)
    }

    /// Hands out a handle to the underlying coroutine, e.g. for removing it
    /// from the scheduler once the generator is spent.
    pub fn coroutine(&self) -> SharedCoroutine {
        self.coroutine_ref().clone()
    }
}

impl<T> Generator<T> {
    /// Suspends the generator and transports `value` to the caller of the
    /// call this generator is currently serving. Outside a call window the
    /// value is dropped.
    pub fn yield_value(&mut self, value: T) {
        if !self.result.is_null() {
            // The cell lives in the caller's call() frame, which stays
            // suspended until this transfer returns control to it.
            unsafe { *self.result = value };
        }
        self.coroutine_mut().yield_to_caller();
    }

    /// Checks whether the generator can still produce values.
    pub fn is_alive(&self) -> bool {
        self.coroutine_ref().is_alive()
    }

    pub fn id(&self) -> u32 {
        self.coroutine_ref().id()
    }

    pub fn name(&self) -> &str {
        self.coroutine_ref().name()
    }

    /// The coroutine this generator runs on, for waits and sleeps inside the
    /// generator body.
    pub fn as_coroutine(&mut self) -> &mut Coroutine {
        self.coroutine_mut()
    }

    fn coroutine_ref(&self) -> &SharedCoroutine {
        self.coroutine.as_ref().expect("generator not fully constructed")
    }

    fn coroutine_mut(&mut self) -> &mut Coroutine {
        self.coroutine.as_mut().expect("generator not fully constructed").deref_mut()
    }
}

impl Coroutine {
    /// Transfers control to `generator` until it yields a value or its body
    /// returns. Returns the yielded value, or `T::default()` when the
    /// generator terminated without yielding; callers that need to tell the
    /// two apart check [Generator::is_alive] afterwards.
    pub fn call<T: Default>(&mut self, generator: &mut SharedGenerator<T>) -> T {
        let mut result: T = T::default();
        let generator: &mut Generator<T> = generator.deref_mut();
        generator.result = &mut result;
        let callee: &mut Coroutine = generator.coroutine_mut();
        callee.set_caller(NonNull::from(&mut *self));
        self.call_coroutine(callee);

        // The cell is only valid for the duration of this call.
        generator.result = ptr::null_mut();
        result
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Clone for SharedGenerator<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for SharedGenerator<T> {
    type Target = Generator<T>;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl<T> DerefMut for SharedGenerator<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
