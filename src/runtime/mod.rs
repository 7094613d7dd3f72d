// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod fail;
pub mod limits;
pub mod logging;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    convert::{
        AsMut,
        AsRef,
    },
    ops::{
        Deref,
        DerefMut,
    },
    rc::{
        Rc,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The SharedObject wraps an object that is handed out to several single-threaded holders: the embedder keeps a handle
/// to every coroutine it creates, the scheduler keeps one per registered coroutine, and a generator's caller slot
/// keeps one for the duration of a call.
pub struct SharedObject<T: ?Sized>(Rc<T>);

/// Non-owning companion to [SharedObject]: back-references go through this so
/// that two objects pointing at each other do not keep each other alive.
pub struct WeakObject<T: ?Sized>(Weak<T>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }

    /// Returns the address of the interior object. The address is stable for the lifetime of the last handle, so it
    /// may be parked in a prepared execution context and revived when that context first runs.
    pub(crate) fn raw_mut(&mut self) -> *mut T {
        Rc::as_ptr(&self.0) as *mut T
    }

    /// Hands out a non-owning handle to the interior object.
    pub(crate) fn downgrade(&self) -> WeakObject<T> {
        WeakObject(Rc::downgrade(&self.0))
    }
}

impl<T> WeakObject<T> {
    /// Recovers an owning handle; None once every owning handle is gone.
    pub(crate) fn upgrade(&self) -> Option<SharedObject<T>> {
        self.0.upgrade().map(SharedObject)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Dereferences a shared object for use.
impl<T: ?Sized> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a mutable reference to a shared object for use. This breaks Rust's ownership model because it allows
/// more than one mutable dereference of a shared object at a time. Catwalk requires this because the embedder, the
/// scheduler and a suspended caller all hold handles to the same coroutine; however, the scheduler also ensures that
/// only one coroutine runs at a time, and every other holder touches the object only while that coroutine is
/// suspended. Due to this design, Rust's static borrow checker cannot prove memory safety and we have chosen not to
/// pay for the dynamic borrow checker. Shared objects should be used judiciously with the understanding that the
/// object may be mutated whenever the holder suspends.
impl<T: ?Sized> DerefMut for SharedObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

/// Returns a reference to the interior object.
impl<T: ?Sized> AsRef<T> for SharedObject<T> {
    fn as_ref(&self) -> &T {
        self.0.as_ref()
    }
}

/// Returns a mutable reference to the interior object. Same contract as [DerefMut].
impl<T: ?Sized> AsMut<T> for SharedObject<T> {
    fn as_mut(&mut self) -> &mut T {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T: ?Sized> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
