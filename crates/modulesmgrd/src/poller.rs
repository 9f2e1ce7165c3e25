//! Edge-event multiplexer over attribute handles.
//!
//! The kernel signals a changed attribute file with `POLLPRI | POLLERR`.
//! The notification is edge triggered: it fires once per change and is
//! only re-armed after the file has been read in full. A freshly opened
//! attribute counts as "changed", so every handle must be read once
//! before the first wait or that wait returns immediately with a stale
//! edge.

use std::collections::BTreeSet;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};

use crate::error::Result;

/// Readiness set of attribute handles.
pub trait EventMultiplexer: Send {
    /// Starts watching `fd` for priority/error edges.
    fn register(&mut self, fd: RawFd) -> Result<()>;

    /// Stops watching `fd`. Must be called before the handle is closed.
    fn unregister(&mut self, fd: RawFd);

    /// Waits up to `timeout` and returns the handles with a pending edge.
    fn wait(&mut self, timeout: Duration) -> Result<Vec<RawFd>>;

    /// Number of watched handles.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `poll(2)` based multiplexer.
#[derive(Debug, Default)]
pub struct PollMultiplexer {
    fds: BTreeSet<RawFd>,
}

impl PollMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn events() -> PollFlags {
        PollFlags::POLLPRI | PollFlags::POLLERR
    }
}

impl EventMultiplexer for PollMultiplexer {
    fn register(&mut self, fd: RawFd) -> Result<()> {
        if self.fds.insert(fd) {
            debug!(fd, "Registered attribute handle");
        }
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) {
        if self.fds.remove(&fd) {
            debug!(fd, "Unregistered attribute handle");
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<RawFd>> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        let mut pollfds: Vec<PollFd<'_>> = self
            .fds
            .iter()
            .map(|fd| {
                // SAFETY: the engine unregisters every handle before closing
                // it, so each registered fd stays open for this call.
                let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
                PollFd::new(borrowed, Self::events())
            })
            .collect();

        match poll(&mut pollfds, PollTimeout::from(millis)) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        let mut ready = Vec::new();
        for (fd, pollfd) in self.fds.iter().zip(pollfds.iter()) {
            let Some(revents) = pollfd.revents() else {
                continue;
            };
            if revents.contains(PollFlags::POLLNVAL) {
                warn!(fd, "Polled attribute handle is no longer valid");
                continue;
            }
            if revents.intersects(Self::events()) {
                ready.push(*fd);
            }
        }
        Ok(ready)
    }

    fn len(&self) -> usize {
        self.fds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::time::Instant;

    #[test]
    fn test_register_is_idempotent() {
        let file = tempfile::tempfile().unwrap();
        let mut poller = PollMultiplexer::new();

        poller.register(file.as_raw_fd()).unwrap();
        poller.register(file.as_raw_fd()).unwrap();
        assert_eq!(poller.len(), 1);

        poller.unregister(file.as_raw_fd());
        assert!(poller.is_empty());
    }

    #[test]
    fn test_regular_file_has_no_priority_edge() {
        let file = tempfile::tempfile().unwrap();
        let mut poller = PollMultiplexer::new();
        poller.register(file.as_raw_fd()).unwrap();

        let started = Instant::now();
        let ready = poller.wait(Duration::from_millis(20)).unwrap();
        assert!(ready.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wait_without_handles_times_out() {
        let mut poller = PollMultiplexer::new();
        assert!(poller.wait(Duration::from_millis(5)).unwrap().is_empty());
    }
}
