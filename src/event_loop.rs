//! Async event driver
//!
//! Waits for the DRM node to become readable and hands every batch of
//! events to the backend's dispatcher. Dispatch itself stays synchronous;
//! the loop only decides when to call it.

use crate::backend::PpBackend;
use crate::error::{Error, Result};

use std::future::Future;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Borrowed event descriptor; the backend keeps ownership
struct EventFd(RawFd);

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Dispatch device events until `shutdown` resolves.
///
/// Returns the number of IPP completions delivered.
pub async fn run<B, F>(backend: &mut B, shutdown: F) -> Result<usize>
where
    B: PpBackend,
    F: Future<Output = ()>,
{
    let fd = backend.event_fd().ok_or_else(|| {
        Error::NotImplemented("event loop needs a pollable device descriptor".into())
    })?;
    let async_fd = AsyncFd::with_interest(EventFd(fd), Interest::READABLE)?;
    tokio::pin!(shutdown);

    // Events queued before registration would not wake us
    let mut delivered = backend.handle_events()?;
    tracing::debug!("event loop started on fd {}", fd);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!("event loop stopping after {} completions", delivered);
                return Ok(delivered);
            }
            guard = async_fd.readable() => {
                let mut guard = guard?;
                let n = backend.handle_events()?;
                tracing::trace!("dispatched {} IPP completions", n);
                delivered += n;
                guard.clear_ready();
            }
        }
    }
}
