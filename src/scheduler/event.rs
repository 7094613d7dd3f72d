// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wakeup primitives: an auto-resettable event descriptor per coroutine (and
//! one for the scheduler's interrupt), and a one-shot timer descriptor per
//! bounded wait. Both are plain readable file descriptors so they multiplex
//! into the same readiness poll as user descriptors.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    mem,
    os::fd::RawFd,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// An eventfd-backed signal: a write of one makes the descriptor readable,
/// a drain resets it.
pub struct EventFd {
    fd: RawFd,
}

/// A one-shot monotonic timer descriptor that becomes readable after the
/// requested duration. Owned by a single wait invocation and closed on drop,
/// however that wait completes.
pub struct WaitTimer {
    fd: RawFd,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl EventFd {
    pub fn new() -> Result<Self, Fail> {
        match unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) } {
            fd if fd >= 0 => Ok(Self { fd }),
            _ => {
                let cause: String = "failed to create event descriptor".to_string();
                error!("new(): {}", cause);
                Err(Fail::last_os_error(&cause))
            },
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Makes the descriptor readable to the next poll. Signaling an
    /// already-signaled event is a no-op.
    pub fn signal(&self) {
        let one: u64 = 1;
        let nwritten: isize =
            unsafe { libc::write(self.fd, &one as *const u64 as *const libc::c_void, mem::size_of::<u64>()) };
        if nwritten < 0 {
            let errno: libc::c_int = unsafe { *libc::__errno_location() };
            // EAGAIN means the counter is saturated, which still reads as signaled.
            if errno != libc::EAGAIN {
                warn!("signal(): failed to signal event (fd={:?}, errno={:?})", self.fd, errno);
            }
        }
    }

    /// Clears the signal. Returns true if the event was signaled.
    pub fn drain(&self) -> bool {
        let mut counter: u64 = 0;
        let nread: isize =
            unsafe { libc::read(self.fd, &mut counter as *mut u64 as *mut libc::c_void, mem::size_of::<u64>()) };
        if nread >= 0 {
            return true;
        }
        let errno: libc::c_int = unsafe { *libc::__errno_location() };
        if errno != libc::EAGAIN {
            warn!("drain(): failed to drain event (fd={:?}, errno={:?})", self.fd, errno);
        }
        false
    }
}

impl WaitTimer {
    /// Creates a timer that fires once, `timeout_ns` nanoseconds from now.
    pub fn new(timeout_ns: u64) -> Result<Self, Fail> {
        let fd: RawFd =
            match unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) } {
                fd if fd >= 0 => fd,
                _ => {
                    let cause: String = "failed to create timer descriptor".to_string();
                    error!("new(): {}", cause);
                    return Err(Fail::last_os_error(&cause));
                },
            };

        // A zero it_value disarms the timer, so clamp to one nanosecond.
        let timeout_ns: u64 = timeout_ns.max(1);
        let spec: libc::itimerspec = libc::itimerspec {
            it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
            it_value: libc::timespec {
                tv_sec: (timeout_ns / 1_000_000_000) as libc::time_t,
                tv_nsec: (timeout_ns % 1_000_000_000) as libc::c_long,
            },
        };
        if unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) } != 0 {
            let cause: String = format!("failed to arm timer descriptor (timeout_ns={:?})", timeout_ns);
            error!("new(): {}", cause);
            unsafe { libc::close(fd) };
            return Err(Fail::last_os_error(&cause));
        }

        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl Drop for WaitTimer {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        EventFd,
        WaitTimer,
    };

    /// Tests that an event reads as signaled exactly once per signal.
    #[test]
    fn event_signal_and_drain() {
        let event: EventFd = EventFd::new().expect("eventfd failed");
        assert!(!event.drain());
        event.signal();
        assert!(event.drain());
        assert!(!event.drain());
    }

    /// Tests that repeated signals collapse into one readable state.
    #[test]
    fn event_signal_is_idempotent() {
        let event: EventFd = EventFd::new().expect("eventfd failed");
        event.signal();
        event.signal();
        assert!(event.drain());
        assert!(!event.drain());
    }

    /// Tests that a timer becomes readable after its deadline.
    #[test]
    fn timer_fires() {
        let timer: WaitTimer = WaitTimer::new(1_000_000).expect("timerfd failed");
        let mut pollfd: libc::pollfd = libc::pollfd {
            fd: timer.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let nready: libc::c_int = unsafe { libc::poll(&mut pollfd, 1, 1000) };
        assert_eq!(nready, 1);
        assert!(pollfd.revents & libc::POLLIN != 0);
    }
}
