// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::catwalk::{
    runtime::logging,
    Coroutine,
    CoroutineState,
    PollState,
    SharedCoroutine,
    SharedScheduler,
    WeakScheduler,
};
use ::std::{
    cell::RefCell,
    collections::HashSet,
    rc::Rc,
};

//==============================================================================
// scenario_stop()
//==============================================================================

/// Tests that a stop issued from inside a coroutine makes the run loop
/// return, leaving the other coroutines suspended but alive.
#[test]
fn scenario_stop() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    let mut loopers: Vec<SharedCoroutine> = Vec::new();
    let loop_counts: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(vec![0; 3]));
    for index in 0..3 {
        let counts: Rc<RefCell<Vec<u64>>> = loop_counts.clone();
        let looper: SharedCoroutine = match SharedCoroutine::new(
            &mut scheduler,
            Box::new(move |coroutine: &mut Coroutine| loop {
                counts.borrow_mut()[index] += 1;
                coroutine.yield_now();
            }),
        ) {
            Ok(coroutine) => coroutine,
            Err(e) => anyhow::bail!("failed to create looper: {:?}", e),
        };
        loopers.push(looper);
    }

    let _stopper: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(|coroutine: &mut Coroutine| {
            // Let every looper run at least once before pulling the plug.
            coroutine.yield_now();
            coroutine.scheduler().stop();
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create stopper: {:?}", e),
    };

    if let Err(e) = scheduler.run() {
        anyhow::bail!("scheduler failed: {:?}", e);
    }

    // The loopers were not torn down: still suspended in their yield loops.
    for looper in loopers.iter() {
        assert!(looper.is_alive());
        assert_eq!(looper.state(), CoroutineState::Yielded);
    }
    for count in loop_counts.borrow().iter() {
        assert!(*count >= 1);
    }
    assert!(!scheduler.is_running());

    Ok(())
}

//==============================================================================
// scenario_completion_callbacks()
//==============================================================================

/// Tests that the completion callback fires exactly once per coroutine, with
/// distinct ids, and that removing the dead from the callback drains the
/// scheduler's id set.
#[test]
fn scenario_completion_callbacks() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    const NUM_COROUTINES: usize = 100;
    let completed: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

    let seen: Rc<RefCell<Vec<u32>>> = completed.clone();
    // A weak handle: the callback lives inside the scheduler, so a strong
    // one would keep the scheduler alive against the embedder's will.
    let reaper: WeakScheduler = scheduler.downgrade();
    scheduler.set_completion_callback(Box::new(move |coroutine: &mut SharedCoroutine| {
        seen.borrow_mut().push(coroutine.id());
        if let Some(mut scheduler) = reaper.upgrade() {
            scheduler.remove_coroutine(coroutine);
        }
    }));

    let mut handles: Vec<SharedCoroutine> = Vec::new();
    for _ in 0..NUM_COROUTINES {
        let handle: SharedCoroutine =
            match SharedCoroutine::new(&mut scheduler, Box::new(|_coroutine: &mut Coroutine| {})) {
                Ok(coroutine) => coroutine,
                Err(e) => anyhow::bail!("failed to create coroutine: {:?}", e),
            };
        handles.push(handle);
    }

    if let Err(e) = scheduler.run() {
        anyhow::bail!("scheduler failed: {:?}", e);
    }

    let completed: std::cell::Ref<Vec<u32>> = completed.borrow();
    assert_eq!(completed.len(), NUM_COROUTINES);
    let distinct: HashSet<u32> = completed.iter().copied().collect();
    assert_eq!(distinct.len(), NUM_COROUTINES);
    assert_eq!(scheduler.num_coroutines(), 0);
    assert_eq!(scheduler.ids_in_use(), 0);

    Ok(())
}

//==============================================================================
// scenario_tick_monotonicity()
//==============================================================================

/// Tests that a coroutine's last-tick observations never go backwards and
/// advance across suspensions.
#[test]
fn scenario_tick_monotonicity() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    let ticks: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
    let observed: Rc<RefCell<Vec<u64>>> = ticks.clone();
    let _observer: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            for _ in 0..5 {
                observed.borrow_mut().push(coroutine.last_tick());
                coroutine.yield_now();
            }
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create observer: {:?}", e),
    };

    // A second always-ready coroutine keeps the tick counter moving between
    // the observer's resumes.
    let _spinner: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(|coroutine: &mut Coroutine| {
            for _ in 0..5 {
                coroutine.yield_now();
            }
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create spinner: {:?}", e),
    };

    if let Err(e) = scheduler.run() {
        anyhow::bail!("scheduler failed: {:?}", e);
    }

    let ticks: std::cell::Ref<Vec<u64>> = ticks.borrow();
    assert_eq!(ticks.len(), 5);
    for window in ticks.windows(2) {
        assert!(window[0] < window[1]);
    }

    Ok(())
}

//==============================================================================
// scenario_exit()
//==============================================================================

/// Tests that an explicit exit terminates the coroutine at that point.
#[test]
fn scenario_exit() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    let reached: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
    let marker: Rc<RefCell<bool>> = reached.clone();
    let quitter: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            *marker.borrow_mut() = true;
            coroutine.exit();
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create quitter: {:?}", e),
    };

    if let Err(e) = scheduler.run() {
        anyhow::bail!("scheduler failed: {:?}", e);
    }

    assert!(*reached.borrow());
    assert!(!quitter.is_alive());
    assert_eq!(quitter.state(), CoroutineState::Dead);

    Ok(())
}

//==============================================================================
// scenario_embedded_poll()
//==============================================================================

/// Tests the embedding interface: the host owns the poll loop and the
/// scheduler never blocks.
#[test]
fn scenario_embedded_poll() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    let progress: Rc<RefCell<u64>> = Rc::new(RefCell::new(0));
    let mut workers: Vec<SharedCoroutine> = Vec::new();
    for _ in 0..2 {
        let counter: Rc<RefCell<u64>> = progress.clone();
        let worker: SharedCoroutine = match SharedCoroutine::new(
            &mut scheduler,
            Box::new(move |coroutine: &mut Coroutine| {
                for _ in 0..10 {
                    *counter.borrow_mut() += 1;
                    coroutine.yield_now();
                }
            }),
        ) {
            Ok(coroutine) => coroutine,
            Err(e) => anyhow::bail!("failed to create worker: {:?}", e),
        };
        workers.push(worker);
    }

    // The host's own poll loop.
    let mut state: PollState = PollState::default();
    while workers.iter().any(|worker| worker.is_alive()) {
        scheduler.get_poll_state(&mut state);
        let pollfds: &mut [libc::pollfd] = state.pollfds_mut();
        let nready: libc::c_int = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, 1000) };
        if nready < 0 {
            anyhow::bail!("poll failed");
        }
        scheduler.process_poll(&state);
    }

    assert_eq!(*progress.borrow(), 20);

    Ok(())
}
