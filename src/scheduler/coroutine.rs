// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A coroutine is one cooperative task: a body function running on a private
//! stack, suspending itself at yield, wait, sleep and call points. The
//! scheduler resumes it by swapping into its saved context; the coroutine
//! gives control back by swapping out again. Nothing here is thread-safe:
//! a coroutine belongs to the thread that owns its scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        limits,
        SharedObject,
    },
    scheduler::{
        context::ContextFrame,
        event::{
            EventFd,
            WaitTimer,
        },
        scheduler::{
            PollState,
            SharedScheduler,
            WeakScheduler,
        },
        stack::CoroutineStack,
    },
};
use ::std::{
    any::Any,
    ops::{
        Deref,
        DerefMut,
    },
    os::fd::RawFd,
    ptr::NonNull,
    rc::Rc,
};

//======================================================================================================================
// Types
//======================================================================================================================

/// The body of a coroutine. It receives the coroutine it runs on, through
/// which it yields, waits and calls generators.
pub type CoroutineFunction = Box<dyn FnOnce(&mut Coroutine)>;

/// Produces a custom one-line description of a coroutine.
pub type DescribeCallback = Box<dyn Fn() -> String>;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Lifecycle of a coroutine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoroutineState {
    /// Created but not yet started.
    New,
    /// Start requested; the wakeup event is armed.
    Ready,
    /// Currently executing. At most one coroutine is in this state.
    Running,
    /// Voluntarily suspended; resumed when its wakeup event fires.
    Yielded,
    /// Suspended on a descriptor set, possibly with a timeout.
    Waiting,
    /// The body returned or called exit. Terminal.
    Dead,
}

/// Construction-time knobs for a coroutine.
pub struct CoroutineOptions {
    /// Debug label; a default of `co-<id>` is filled in when absent.
    pub name: Option<String>,
    /// Whether the coroutine is scheduled immediately. Generators force this off.
    pub autostart: bool,
    /// Usable stack size in bytes.
    pub stack_size: usize,
    /// Opaque user payload; shared, never interpreted.
    pub user_data: Option<Rc<dyn Any>>,
}

/// One cooperative task.
pub struct Coroutine {
    /// Back-reference to the scheduler. Non-owning: the embedder's handles
    /// keep the scheduler alive, never a registered coroutine.
    scheduler: WeakScheduler,
    /// Unique id, allocated at registration and released at removal.
    id: u32,
    /// Debug label; never used for correctness.
    name: String,
    /// The body, consumed on first resume.
    function: Option<CoroutineFunction>,
    state: CoroutineState,
    /// Private stack. Never moves once created.
    stack: CoroutineStack,
    /// Saved execution state: where a resume continues, and where a suspend saves.
    resume_ctx: ContextFrame,
    /// Wakeup event, armed whenever this coroutine should be scheduled.
    event: EventFd,
    /// Descriptors awaited while in [CoroutineState::Waiting].
    wait_fds: Vec<libc::pollfd>,
    /// Descriptor of the in-flight wait timer; the timer itself lives in the
    /// frame of the wait that created it.
    wait_timer_fd: Option<RawFd>,
    /// Value delivered by the next resume: the descriptor that fired, or -1.
    wait_result: i32,
    /// The coroutine suspended inside a call to this one. Valid only while
    /// that call is on the stack.
    caller: Option<NonNull<Coroutine>>,
    /// Cleared once the first resume has happened.
    first_resume: bool,
    /// Set once the scheduler has observed this coroutine dead and fired the
    /// completion callback for it.
    reaped: bool,
    /// Scheduler tick of the last scheduler-driven resume.
    last_tick: u64,
    /// Opaque user payload.
    user_data: Option<Rc<dyn Any>>,
    /// Custom describe hook.
    describe_callback: Option<DescribeCallback>,
}

/// Shared handle to a coroutine. The embedder keeps one from creation until
/// after the completion callback; the scheduler keeps one per registered
/// coroutine.
pub struct SharedCoroutine(SharedObject<Coroutine>);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// First code executed on a fresh coroutine stack: run the body, then hand
/// control back forever.
extern "C" fn invoke_coroutine(arg: *mut u8) {
    let coroutine: &mut Coroutine = unsafe { &mut *(arg as *mut Coroutine) };
    coroutine.invoke_function();
    coroutine.finish();
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedCoroutine {
    /// Creates a coroutine with default options and registers it with `scheduler`.
    pub fn new(scheduler: &mut SharedScheduler, function: CoroutineFunction) -> Result<Self, Fail> {
        Self::with_options(scheduler, function, CoroutineOptions::default())
    }

    /// Creates a coroutine and registers it with `scheduler`. With
    /// `options.autostart` the coroutine is made ready immediately and runs
    /// on the next scheduler tick.
    pub fn with_options(
        scheduler: &mut SharedScheduler,
        function: CoroutineFunction,
        options: CoroutineOptions,
    ) -> Result<Self, Fail> {
        let stack: CoroutineStack = CoroutineStack::new(options.stack_size)?;
        let event: EventFd = EventFd::new()?;
        let coroutine: Coroutine = Coroutine {
            scheduler: scheduler.downgrade(),
            id: 0,
            name: options.name.unwrap_or_default(),
            function: Some(function),
            state: CoroutineState::New,
            stack,
            resume_ctx: ContextFrame::root(),
            event,
            wait_fds: Vec::new(),
            wait_timer_fd: None,
            wait_result: -1,
            caller: None,
            first_resume: true,
            reaped: false,
            last_tick: 0,
            user_data: options.user_data,
            describe_callback: None,
        };

        let mut handle: SharedCoroutine = SharedCoroutine(SharedObject::new(coroutine));
        let id: u32 = scheduler.register(handle.clone());
        handle.id = id;
        if handle.name.is_empty() {
            handle.name = format!("co-{}", id);
        }

        // The interior address is stable inside the shared object, so it can
        // ride into the prepared context and come back out in the trampoline.
        let arg: *mut u8 = handle.0.raw_mut() as *mut u8;
        match ContextFrame::prepare(&handle.stack, invoke_coroutine, arg) {
            Ok(prepared) => handle.resume_ctx = prepared,
            Err(e) => {
                scheduler.remove_coroutine(&handle);
                return Err(e);
            },
        }

        trace!("created coroutine {} (id={:?})", handle.name, id);
        if options.autostart {
            handle.start();
        }
        Ok(handle)
    }

    /// Contributes this coroutine's descriptors to the union poll set: the
    /// wakeup event always, and the awaited descriptors while waiting.
    pub(crate) fn add_poll_fds(&self, state: &mut PollState) {
        state.push(self.event.fd(), libc::POLLIN, Some(self.clone()));
        if self.state == CoroutineState::Waiting {
            for pollfd in self.wait_fds.iter() {
                state.push(pollfd.fd, pollfd.events, Some(self.clone()));
            }
        }
    }
}

impl Coroutine {
    /// Makes the coroutine ready and arms its wakeup event so the scheduler
    /// picks it up on the next tick. Idempotent for a coroutine that is
    /// already underway.
    pub fn start(&mut self) {
        match self.state {
            CoroutineState::New => {
                trace!("starting coroutine {}", self.name);
                self.state = CoroutineState::Ready;
                self.event.signal();
            },
            CoroutineState::Dead => panic!("cannot start dead coroutine {}", self.name),
            _ => (),
        }
    }

    /// Gives up the processor until the next scheduler tick that picks this
    /// coroutine again.
    pub fn yield_now(&mut self) {
        assert_eq!(self.state, CoroutineState::Running, "yield from a coroutine that is not running");
        self.state = CoroutineState::Yielded;
        self.event.signal();
        self.suspend();
    }

    /// Waits for `fd` to become ready for the events in `events`. A
    /// `timeout_ns` of zero waits indefinitely. Returns the descriptor that
    /// ended the wait, or -1 on timeout.
    pub fn wait(&mut self, fd: RawFd, events: i16, timeout_ns: u64) -> i32 {
        let pollfd: libc::pollfd = libc::pollfd { fd, events, revents: 0 };
        self.wait_many(&[pollfd], timeout_ns)
    }

    /// Single-pollfd variant of [Self::wait_many].
    pub fn wait_pollfd(&mut self, pollfd: libc::pollfd, timeout_ns: u64) -> i32 {
        self.wait_many(&[pollfd], timeout_ns)
    }

    /// Waits for any descriptor in `fds`. A descriptor listed twice is
    /// awaited once with the union of the requested events. Returns the
    /// descriptor that ended the wait, or -1 on timeout.
    pub fn wait_many(&mut self, fds: &[libc::pollfd], timeout_ns: u64) -> i32 {
        assert_eq!(self.state, CoroutineState::Running, "wait from a coroutine that is not running");
        self.state = CoroutineState::Waiting;
        self.wait_fds.clear();
        for request in fds {
            match self.wait_fds.iter().position(|pollfd| pollfd.fd == request.fd) {
                Some(index) => self.wait_fds[index].events |= request.events,
                None => self.wait_fds.push(libc::pollfd {
                    fd: request.fd,
                    events: request.events,
                    revents: 0,
                }),
            }
        }

        // The timer lives in this frame: it is closed when the wait returns,
        // no matter how the wait ended.
        let _timer: Option<WaitTimer> = if timeout_ns > 0 {
            let timer: WaitTimer = match WaitTimer::new(timeout_ns) {
                Ok(timer) => timer,
                // Losing the timer would silently turn a bounded wait into an
                // unbounded one.
                Err(e) => panic!("cannot create wait timer: {:?}", e),
            };
            self.wait_fds.push(libc::pollfd {
                fd: timer.fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            self.wait_timer_fd = Some(timer.fd());
            Some(timer)
        } else {
            None
        };

        self.suspend();
        self.wait_timer_fd = None;
        self.wait_result
    }

    /// Sleeps for `timeout_ns` nanoseconds.
    pub fn nanosleep(&mut self, timeout_ns: u64) {
        self.wait_many(&[], timeout_ns);
    }

    /// Sleeps for `msecs` milliseconds.
    pub fn millisleep(&mut self, msecs: u64) {
        self.nanosleep(msecs * 1_000_000);
    }

    /// Sleeps for `secs` seconds.
    pub fn sleep(&mut self, secs: u64) {
        self.nanosleep(secs * 1_000_000_000);
    }

    /// Terminates the coroutine from within its own body.
    pub fn exit(&mut self) -> ! {
        assert_eq!(self.state, CoroutineState::Running, "exit from a coroutine that is not running");
        self.finish()
    }

    /// Checks whether the coroutine has not yet terminated.
    pub fn is_alive(&self) -> bool {
        self.state != CoroutineState::Dead
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn state(&self) -> CoroutineState {
        self.state
    }

    /// Scheduler tick of the last scheduler-driven resume. Monotone per coroutine.
    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    /// An owning handle to the scheduler this coroutine is registered with.
    /// Panics once the scheduler has been dropped.
    pub fn scheduler(&self) -> SharedScheduler {
        self.scheduler
            .upgrade()
            .expect("scheduler was dropped while its coroutine is in use")
    }

    pub fn user_data(&self) -> Option<Rc<dyn Any>> {
        self.user_data.clone()
    }

    pub fn set_user_data(&mut self, user_data: Option<Rc<dyn Any>>) {
        self.user_data = user_data;
    }

    pub fn set_describe_callback(&mut self, callback: DescribeCallback) {
        self.describe_callback = Some(callback);
    }

    /// One-line description of this coroutine, from the custom hook if one is
    /// installed.
    pub fn describe(&self) -> String {
        match &self.describe_callback {
            Some(callback) => callback(),
            None => format!(
                "coroutine {} (id={:?}) state={:?} last_tick={:?}",
                self.name, self.id, self.state, self.last_tick
            ),
        }
    }

    /// Logs the description of this coroutine.
    pub fn show(&self) {
        info!("{}", self.describe());
    }

    /// Resumes this coroutine with the descriptor that made it runnable.
    /// Runs on the scheduler's context; returns when the coroutine suspends
    /// or terminates.
    pub(crate) fn resume(&mut self, triggering_fd: RawFd) {
        debug_assert!(
            matches!(
                self.state,
                CoroutineState::Ready | CoroutineState::Yielded | CoroutineState::Waiting
            ),
            "resuming coroutine {} in state {:?}",
            self.name,
            self.state
        );
        self.end_of_wait(triggering_fd);
        self.state = CoroutineState::Running;
        let from: *mut ContextFrame = {
            let mut scheduler: SharedScheduler = self.scheduler();
            self.last_tick = scheduler.tick_count();
            scheduler.yield_context()
        };
        if self.first_resume {
            self.first_resume = false;
            trace!("first resume of coroutine {}", self.name);
        }
        let to: *const ContextFrame = &self.resume_ctx;
        unsafe { ContextFrame::swap(from, to) };
    }

    /// Transfers control into `callee` directly, bypassing the scheduler, and
    /// returns when the callee yields back or terminates. This is the caller
    /// half of the generator protocol.
    pub(crate) fn call_coroutine(&mut self, callee: &mut Coroutine) {
        assert_eq!(self.state, CoroutineState::Running, "call from a coroutine that is not running");
        assert!(
            matches!(
                callee.state,
                CoroutineState::New | CoroutineState::Ready | CoroutineState::Yielded
            ),
            "calling coroutine {} in state {:?}",
            callee.name,
            callee.state
        );
        if callee.state == CoroutineState::New {
            callee.start();
        }
        // The transfer bypasses the poll, so consume the wakeup the callee
        // had armed for the scheduler.
        callee.event.drain();
        callee.first_resume = false;

        // Suspended inside the call; only the callee can resume us.
        self.state = CoroutineState::Waiting;
        callee.state = CoroutineState::Running;
        let from: *mut ContextFrame = &mut self.resume_ctx;
        let to: *const ContextFrame = &callee.resume_ctx;
        unsafe { ContextFrame::swap(from, to) };
        self.state = CoroutineState::Running;
    }

    /// Suspends after producing a value: arms the wakeup event for the next
    /// resumption, then transfers control back to the pending caller, or to
    /// the scheduler when there is none. This is the callee half of the
    /// generator protocol.
    pub(crate) fn yield_to_caller(&mut self) {
        assert_eq!(self.state, CoroutineState::Running, "yield from a coroutine that is not running");
        self.state = CoroutineState::Yielded;
        self.event.signal();
        let from: *mut ContextFrame = &mut self.resume_ctx;
        match self.caller.take() {
            Some(caller) => {
                // The caller sits suspended inside call() further down this
                // control path, so its frame outlives the swap.
                let to: *const ContextFrame = unsafe { &(*caller.as_ptr()).resume_ctx };
                unsafe { ContextFrame::swap(from, to) };
            },
            None => {
                // The owning handle is released before the swap: this frame
                // stays parked until the next resumption and must not pin
                // the scheduler in the meantime.
                let to: *const ContextFrame = self.scheduler().yield_context();
                unsafe { ContextFrame::swap(from, to) };
            },
        }
    }

    /// Installs the caller slot for the duration of one call.
    pub(crate) fn set_caller(&mut self, caller: NonNull<Coroutine>) {
        debug_assert!(self.caller.is_none(), "coroutine {} is already being called", self.name);
        self.caller = Some(caller);
    }

    /// Whether the completion callback has already fired for this coroutine.
    pub(crate) fn reaped(&self) -> bool {
        self.reaped
    }

    pub(crate) fn set_reaped(&mut self) {
        self.reaped = true;
    }

    /// Runs the body. Executes on the coroutine's own stack.
    fn invoke_function(&mut self) {
        let function: CoroutineFunction = self.function.take().expect("coroutine body already consumed");
        function(self);
    }

    /// Terminal transition: mark dead and give control back to whoever is
    /// waiting on this coroutine, forever.
    fn finish(&mut self) -> ! {
        self.state = CoroutineState::Dead;
        trace!("coroutine {} finished", self.name);
        let from: *mut ContextFrame = &mut self.resume_ctx;
        match self.caller.take() {
            Some(caller) => {
                let to: *const ContextFrame = unsafe { &(*caller.as_ptr()).resume_ctx };
                unsafe { ContextFrame::swap(from, to) };
            },
            None => {
                // The owning handle is released before the final swap; the
                // scheduler outlives it because this resume runs under its
                // event loop.
                let to: *const ContextFrame = self.scheduler().yield_context();
                unsafe { ContextFrame::swap(from, to) };
            },
        }
        unreachable!("dead coroutine {} was resumed", self.name)
    }

    /// Saves this coroutine and hands control to the scheduler. Returns when
    /// the scheduler resumes this coroutine.
    fn suspend(&mut self) {
        // The swap target is read out up front: a suspended frame never
        // unwinds on drop, so it must not sit on an owning scheduler handle.
        let to: *const ContextFrame = self.scheduler().yield_context();
        let from: *mut ContextFrame = &mut self.resume_ctx;
        unsafe { ContextFrame::swap(from, to) };
    }

    /// Post-wait bookkeeping, shared by every resume path: translate the
    /// triggering descriptor into the wait result, clear the wakeup event if
    /// that is what fired, and retire the awaited set.
    fn end_of_wait(&mut self, triggering_fd: RawFd) {
        self.wait_result = match self.wait_timer_fd {
            Some(timer_fd) if timer_fd == triggering_fd => -1,
            _ => triggering_fd,
        };
        if triggering_fd == self.event.fd() {
            self.event.drain();
        }
        self.wait_fds.clear();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for CoroutineOptions {
    fn default() -> Self {
        Self {
            name: None,
            autostart: true,
            stack_size: limits::DEFAULT_STACK_SIZE,
            user_data: None,
        }
    }
}

impl Clone for SharedCoroutine {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for SharedCoroutine {
    type Target = Coroutine;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedCoroutine {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        if matches!(
            self.state,
            CoroutineState::Yielded | CoroutineState::Waiting | CoroutineState::Running
        ) {
            trace!("dropping suspended coroutine {}", self.name);
        }
    }
}
