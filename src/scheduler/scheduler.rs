// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The scheduler owns every registered coroutine and drives the event loop:
//! build the union of all pending waits, poll once, resume one runnable
//! coroutine, repeat. Hosts with their own poll loop use the embedding pair
//! [SharedScheduler::get_poll_state] / [SharedScheduler::process_poll]
//! instead of [SharedScheduler::run]; the scheduler then never blocks.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::id_set::IdSet,
    runtime::{
        fail::Fail,
        SharedObject,
        WeakObject,
    },
    scheduler::{
        context::ContextFrame,
        coroutine::{
            CoroutineState,
            SharedCoroutine,
        },
        event::EventFd,
    },
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
    },
    os::fd::RawFd,
};

//======================================================================================================================
// Types
//======================================================================================================================

/// Invoked once for every coroutine the scheduler sees reach its terminal
/// state. The usual embedder move is to remove the coroutine here.
pub type CompletionCallback = Box<dyn FnMut(&mut SharedCoroutine)>;

//======================================================================================================================
// Structures
//======================================================================================================================

/// The union poll set for one scheduler tick: every descriptor some live
/// coroutine waits on, plus the scheduler's interrupt descriptor. A parallel
/// vector maps each slot back to the coroutine that contributed it, so
/// readiness can be attributed to an owner.
#[derive(Default)]
pub struct PollState {
    pollfds: Vec<libc::pollfd>,
    owners: Vec<Option<SharedCoroutine>>,
}

/// The scheduler proper.
pub struct Scheduler {
    /// Registered coroutines, in registration order. The order roots the
    /// round-robin fairness scan.
    coroutines: Vec<SharedCoroutine>,
    /// Allocated coroutine ids.
    ids: IdSet,
    /// The scheduler's own saved context: where a suspending coroutine swaps to.
    yield_ctx: ContextFrame,
    /// Keeps [SharedScheduler::run] looping.
    running: bool,
    /// Signaled by [SharedScheduler::stop] to break out of the poll.
    interrupt: EventFd,
    /// Incremented once per scheduler iteration.
    tick_count: u64,
    /// Id of the coroutine resumed most recently; roots the fairness scan.
    last_resumed_id: Option<u32>,
    /// Invoked for every coroutine that reaches its terminal state.
    completion_callback: Option<CompletionCallback>,
}

/// Shared handle to a scheduler. The embedder's handles are what keep the
/// scheduler alive; everything pointing back at it holds a [WeakScheduler].
pub struct SharedScheduler(SharedObject<Scheduler>);

/// Non-owning handle to a scheduler. Coroutines keep their back-reference
/// through this, and completion callbacks should capture one instead of a
/// [SharedScheduler], so that dropping the embedder's handles really does
/// free the scheduler together with every coroutine still registered.
pub struct WeakScheduler(WeakObject<Scheduler>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PollState {
    pub(crate) fn push(&mut self, fd: RawFd, events: i16, owner: Option<SharedCoroutine>) {
        self.pollfds.push(libc::pollfd { fd, events, revents: 0 });
        self.owners.push(owner);
    }

    fn clear(&mut self) {
        self.pollfds.clear();
        self.owners.clear();
    }

    fn owner(&self, index: usize) -> Option<&SharedCoroutine> {
        self.owners[index].as_ref()
    }

    pub fn pollfds(&self) -> &[libc::pollfd] {
        &self.pollfds
    }

    /// The poll slots, for the host to hand to its own readiness primitive.
    pub fn pollfds_mut(&mut self) -> &mut [libc::pollfd] {
        &mut self.pollfds
    }

    pub fn len(&self) -> usize {
        self.pollfds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollfds.is_empty()
    }
}

impl SharedScheduler {
    /// Creates a scheduler with no registered coroutines.
    pub fn new() -> Result<Self, Fail> {
        let interrupt: EventFd = EventFd::new()?;
        Ok(Self(SharedObject::new(Scheduler {
            coroutines: Vec::new(),
            ids: IdSet::default(),
            yield_ctx: ContextFrame::root(),
            running: false,
            interrupt,
            tick_count: 0,
            last_resumed_id: None,
            completion_callback: None,
        })))
    }

    /// Runs the event loop until every registered coroutine has terminated or
    /// [Self::stop] is called. Surfaces persistent poll failures.
    pub fn run(&mut self) -> Result<(), Fail> {
        trace!("run(): scheduler starting");
        self.running = true;
        let mut poll_state: PollState = PollState::default();
        while self.running {
            if !self.has_live_coroutines() {
                trace!("run(): no live coroutines left");
                break;
            }
            self.get_poll_state(&mut poll_state);
            Self::poll_readiness(&mut poll_state)?;
            self.process_poll(&poll_state);
        }
        self.running = false;
        trace!("run(): scheduler stopped");
        Ok(())
    }

    /// Requests the event loop to stop after the current tick. Running
    /// coroutines are left as they are. Safe to call from inside a coroutine.
    pub fn stop(&self) {
        trace!("stop(): interrupting the scheduler");
        self.interrupt.signal();
    }

    /// Starts one scheduler iteration: stamps a new tick and populates
    /// `state` with the union poll set. The embedding host passes `state` to
    /// its own readiness primitive, then hands the result to
    /// [Self::process_poll].
    pub fn get_poll_state(&mut self, state: &mut PollState) {
        self.tick_count += 1;
        state.clear();
        state.push(self.interrupt.fd(), libc::POLLIN, None);
        for coroutine in self.coroutines.iter() {
            if coroutine.state() != CoroutineState::Dead {
                coroutine.add_poll_fds(state);
            }
        }
    }

    /// Finishes one scheduler iteration against a polled `state`: resumes at
    /// most one runnable coroutine, reaps the dead, and honors a pending stop
    /// request. Never blocks.
    pub fn process_poll(&mut self, state: &PollState) {
        if let Some((mut coroutine, fd)) = self.choose_runnable(state) {
            self.last_resumed_id = Some(coroutine.id());
            coroutine.resume(fd);
        }
        self.reap_dead();
        if self.interrupt.drain() {
            trace!("process_poll(): stop requested");
            self.running = false;
        }
    }

    /// Transitions a non-autostarted coroutine to ready.
    pub fn start_coroutine(&mut self, coroutine: &mut SharedCoroutine) {
        coroutine.start();
    }

    /// Unregisters `coroutine` and releases its id. The embedder typically
    /// does this from the completion callback.
    pub fn remove_coroutine(&mut self, coroutine: &SharedCoroutine) {
        let id: u32 = coroutine.id();
        match self.coroutines.iter().position(|candidate| candidate.id() == id) {
            Some(position) => {
                trace!("remove_coroutine(): removing coroutine {} (id={:?})", coroutine.name(), id);
                self.coroutines.remove(position);
                self.ids.free(id);
            },
            None => warn!("remove_coroutine(): coroutine (id={:?}) is not registered", id),
        }
    }

    /// Installs the callback invoked for every coroutine that terminates.
    /// A callback that needs the scheduler should capture a [WeakScheduler]:
    /// a strong handle stored inside the scheduler would keep it alive
    /// against the embedder's will.
    pub fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.completion_callback = Some(callback);
    }

    /// Hands out a non-owning handle to this scheduler.
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(self.0.downgrade())
    }

    /// Logs the state of every registered coroutine.
    pub fn show(&self) {
        info!(
            "scheduler: tick={:?} coroutines={:?} running={:?}",
            self.tick_count,
            self.coroutines.len(),
            self.running
        );
        for coroutine in self.coroutines.iter() {
            coroutine.show();
        }
    }

    /// Collects the description of every registered coroutine.
    pub fn all_coroutine_strings(&self) -> Vec<String> {
        self.coroutines.iter().map(|coroutine| coroutine.describe()).collect()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of registered coroutines, dead or alive.
    pub fn num_coroutines(&self) -> usize {
        self.coroutines.len()
    }

    /// Number of allocated coroutine ids.
    pub fn ids_in_use(&self) -> usize {
        self.ids.len()
    }

    /// Registers a freshly built coroutine and hands it an id.
    pub(crate) fn register(&mut self, coroutine: SharedCoroutine) -> u32 {
        let id: u32 = self.ids.alloc();
        trace!("register(): registering coroutine (id={:?})", id);
        self.coroutines.push(coroutine);
        id
    }

    /// The scheduler's saved context, for coroutines to swap to on suspension.
    pub(crate) fn yield_context(&mut self) -> *mut ContextFrame {
        &mut self.yield_ctx
    }

    /// Blocks in the readiness primitive until some slot is ready, retrying
    /// on spurious signals. The only timeouts in the system are per-wait
    /// timer descriptors, so the poll itself has none.
    fn poll_readiness(state: &mut PollState) -> Result<usize, Fail> {
        loop {
            let nready: libc::c_int =
                unsafe { libc::poll(state.pollfds.as_mut_ptr(), state.pollfds.len() as libc::nfds_t, -1) };
            if nready >= 0 {
                return Ok(nready as usize);
            }
            let errno: libc::c_int = unsafe { *libc::__errno_location() };
            if errno == libc::EINTR {
                continue;
            }
            let cause: String = format!("readiness poll failed (errno={:?})", errno);
            error!("poll_readiness(): {}", cause);
            return Err(Fail::new(errno, &cause));
        }
    }

    /// Picks the coroutine to resume, and which of its descriptors to report.
    /// Among coroutines with a ready descriptor, the scan is round-robin
    /// rooted just after the last resumed coroutine, in registration order,
    /// so a persistently ready coroutine cannot starve later registrants.
    fn choose_runnable(&self, state: &PollState) -> Option<(SharedCoroutine, RawFd)> {
        // First ready descriptor per owner, in poll-set order; the scan order
        // makes the reported descriptor deterministic.
        let mut ready: Vec<(u32, RawFd)> = Vec::new();
        for (index, pollfd) in state.pollfds.iter().enumerate() {
            if pollfd.revents == 0 {
                continue;
            }
            if let Some(owner) = state.owner(index) {
                if !ready.iter().any(|(id, _)| *id == owner.id()) {
                    ready.push((owner.id(), pollfd.fd));
                }
            }
        }
        if ready.is_empty() || self.coroutines.is_empty() {
            return None;
        }

        let count: usize = self.coroutines.len();
        let root: usize = match self
            .last_resumed_id
            .and_then(|id| self.coroutines.iter().position(|candidate| candidate.id() == id))
        {
            Some(position) => (position + 1) % count,
            None => 0,
        };
        for offset in 0..count {
            let coroutine: &SharedCoroutine = &self.coroutines[(root + offset) % count];
            if !matches!(
                coroutine.state(),
                CoroutineState::Ready | CoroutineState::Yielded | CoroutineState::Waiting
            ) {
                continue;
            }
            if let Some((_, fd)) = ready.iter().find(|(id, _)| *id == coroutine.id()) {
                return Some((coroutine.clone(), *fd));
            }
        }
        None
    }

    /// Fires the completion callback once for every coroutine newly observed
    /// dead. Rescans from scratch after each callback because the callback is
    /// allowed to unregister coroutines.
    fn reap_dead(&mut self) {
        loop {
            let mut dead: SharedCoroutine = match self
                .coroutines
                .iter()
                .find(|coroutine| coroutine.state() == CoroutineState::Dead && !coroutine.reaped())
            {
                Some(coroutine) => coroutine.clone(),
                None => break,
            };
            dead.set_reaped();
            trace!("reap_dead(): coroutine {} completed", dead.name());
            if let Some(callback) = self.completion_callback.as_mut() {
                callback(&mut dead);
            }
        }
    }

    fn has_live_coroutines(&self) -> bool {
        self.coroutines
            .iter()
            .any(|coroutine| coroutine.state() != CoroutineState::Dead)
    }
}

impl WeakScheduler {
    /// Recovers an owning handle; None once every owning handle is gone.
    pub fn upgrade(&self) -> Option<SharedScheduler> {
        self.0.upgrade().map(SharedScheduler)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Clone for SharedScheduler {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
