// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::catwalk::{
    runtime::logging,
    Coroutine,
    SharedCoroutine,
    SharedScheduler,
};
use ::std::{
    cell::RefCell,
    os::fd::RawFd,
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Constants
//==============================================================================

/// How long the writer sleeps before making the pipe readable.
const WRITER_DELAY_MS: u64 = 10;

/// Timeout for the wait that is expected to expire (5 ms).
const EXPIRING_TIMEOUT_NS: u64 = 5_000_000;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Creates a pipe, returning (read end, write end).
fn make_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        anyhow::bail!("failed to create pipe");
    }
    Ok((fds[0], fds[1]))
}

fn close_pipe(read_fd: RawFd, write_fd: RawFd) {
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

//==============================================================================
// scenario_fd_readiness()
//==============================================================================

/// Tests that a wait on a pipe wakes up with the pipe's descriptor once a
/// delayed writer makes it readable, and not before.
#[test]
fn scenario_fd_readiness() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };
    let (read_fd, write_fd): (RawFd, RawFd) = make_pipe()?;
    let wait_result: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));

    let result: Rc<RefCell<Option<i32>>> = wait_result.clone();
    let reader: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            let fd: i32 = coroutine.wait(read_fd, libc::POLLIN, 0);
            *result.borrow_mut() = Some(fd);
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create reader: {:?}", e),
    };

    let writer: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            coroutine.millisleep(WRITER_DELAY_MS);
            let byte: u8 = b'x';
            let nwritten: isize = unsafe { libc::write(write_fd, &byte as *const u8 as *const libc::c_void, 1) };
            assert_eq!(nwritten, 1);
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create writer: {:?}", e),
    };

    let start: Instant = Instant::now();
    if let Err(e) = scheduler.run() {
        close_pipe(read_fd, write_fd);
        anyhow::bail!("scheduler failed: {:?}", e);
    }
    let elapsed: Duration = start.elapsed();
    close_pipe(read_fd, write_fd);

    assert!(!reader.is_alive());
    assert!(!writer.is_alive());
    assert_eq!(*wait_result.borrow(), Some(read_fd));
    assert!(elapsed >= Duration::from_millis(WRITER_DELAY_MS));

    Ok(())
}

//==============================================================================
// scenario_wait_timeout()
//==============================================================================

/// Tests that a wait on a descriptor that never becomes ready returns the
/// timeout sentinel, and no earlier than the requested deadline.
#[test]
fn scenario_wait_timeout() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    // The write end stays open and silent, so the read end never fires.
    let (read_fd, write_fd): (RawFd, RawFd) = make_pipe()?;
    let wait_result: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));

    let result: Rc<RefCell<Option<i32>>> = wait_result.clone();
    let waiter: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            let fd: i32 = coroutine.wait(read_fd, libc::POLLIN, EXPIRING_TIMEOUT_NS);
            *result.borrow_mut() = Some(fd);
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create waiter: {:?}", e),
    };

    let start: Instant = Instant::now();
    if let Err(e) = scheduler.run() {
        close_pipe(read_fd, write_fd);
        anyhow::bail!("scheduler failed: {:?}", e);
    }
    let elapsed: Duration = start.elapsed();
    close_pipe(read_fd, write_fd);

    assert!(!waiter.is_alive());
    assert_eq!(*wait_result.borrow(), Some(-1));
    assert!(elapsed >= Duration::from_nanos(EXPIRING_TIMEOUT_NS));

    Ok(())
}

//==============================================================================
// scenario_wait_many()
//==============================================================================

/// Tests that a wait over several descriptors reports the one that actually
/// fired.
#[test]
fn scenario_wait_many() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };
    let (first_read, first_write): (RawFd, RawFd) = make_pipe()?;
    let (second_read, second_write): (RawFd, RawFd) = make_pipe()?;
    let wait_result: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));

    let result: Rc<RefCell<Option<i32>>> = wait_result.clone();
    let _waiter: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            let fds: [libc::pollfd; 2] = [
                libc::pollfd {
                    fd: first_read,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: second_read,
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let fd: i32 = coroutine.wait_many(&fds, 0);
            *result.borrow_mut() = Some(fd);
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create waiter: {:?}", e),
    };

    let _writer: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            coroutine.millisleep(1);
            let byte: u8 = b'y';
            let nwritten: isize = unsafe { libc::write(second_write, &byte as *const u8 as *const libc::c_void, 1) };
            assert_eq!(nwritten, 1);
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create writer: {:?}", e),
    };

    if let Err(e) = scheduler.run() {
        close_pipe(first_read, first_write);
        close_pipe(second_read, second_write);
        anyhow::bail!("scheduler failed: {:?}", e);
    }
    close_pipe(first_read, first_write);
    close_pipe(second_read, second_write);

    assert_eq!(*wait_result.borrow(), Some(second_read));

    Ok(())
}

//==============================================================================
// scenario_nanosleep_is_bounded_below()
//==============================================================================

/// Tests that sleeps last at least as long as requested.
#[test]
fn scenario_nanosleep_is_bounded_below() -> Result<()> {
    logging::initialize();
    let mut scheduler: SharedScheduler = match SharedScheduler::new() {
        Ok(scheduler) => scheduler,
        Err(e) => anyhow::bail!("failed to create scheduler: {:?}", e),
    };

    const SLEEP_NS: u64 = 2_000_000;
    let _sleeper: SharedCoroutine = match SharedCoroutine::new(
        &mut scheduler,
        Box::new(move |coroutine: &mut Coroutine| {
            coroutine.nanosleep(SLEEP_NS);
        }),
    ) {
        Ok(coroutine) => coroutine,
        Err(e) => anyhow::bail!("failed to create sleeper: {:?}", e),
    };

    let start: Instant = Instant::now();
    if let Err(e) = scheduler.run() {
        anyhow::bail!("scheduler failed: {:?}", e);
    }
    assert!(start.elapsed() >= Duration::from_nanos(SLEEP_NS));

    Ok(())
}
