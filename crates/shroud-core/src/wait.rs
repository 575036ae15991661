//! Synchronous waits over the non-blocking channel.
//!
//! A single condition is signaled whenever plaintext is appended to the
//! decrypted-read buffer or one direction stops blocking on the other. Each
//! wait blocks at most once; a wake-up only means "try again", so callers
//! re-check readiness by retrying their read.

use crate::channel::SslChannel;
use crate::engine::ProtocolEngine;
use crate::error::{Error, Result};
use crate::transport::Transport;
use parking_lot::{Condvar, MutexGuard};
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub(crate) struct WaitGateway {
    condvar: Condvar,
}

impl WaitGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block once on the condition. Returns `true` if the timeout elapsed.
    pub(crate) fn wait_once<G>(
        &self,
        guard: &mut MutexGuard<'_, G>,
        timeout: Option<Duration>,
    ) -> bool {
        match timeout {
            Some(timeout) => self.condvar.wait_for(guard, timeout).timed_out(),
            None => {
                self.condvar.wait(guard);
                false
            }
        }
    }

    pub(crate) fn notify(&self) {
        self.condvar.notify_all();
    }
}

impl<E: ProtocolEngine, T: Transport> SslChannel<E, T> {
    /// Block until the channel may be readable.
    ///
    /// Returns immediately if decrypted plaintext is already buffered.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if [`interrupt_waiters`](Self::interrupt_waiters)
    /// was called while waiting.
    pub fn await_readable(&self) -> Result<()> {
        self.wait_readable(None)
    }

    /// Block until the channel may be readable or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if [`interrupt_waiters`](Self::interrupt_waiters)
    /// was called while waiting.
    pub fn await_readable_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_readable(Some(timeout))
    }

    /// Block until the channel may be writable.
    ///
    /// While a write is waiting on handshake input this waits for the
    /// transport to become readable instead.
    ///
    /// # Errors
    ///
    /// Transport wait failures; an interrupted transport wait is reported as
    /// [`Error::Interrupted`].
    pub fn await_writable(&self) -> Result<()> {
        self.wait_writable(None)
    }

    /// Block until the channel may be writable or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Same as [`await_writable`](Self::await_writable).
    pub fn await_writable_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_writable(Some(timeout))
    }

    /// Wake every thread blocked in `await_readable*` with [`Error::Interrupted`].
    pub fn interrupt_waiters(&self) {
        {
            let mut state = self.inner.state.lock();
            state.interrupts = state.interrupts.wrapping_add(1);
        }
        debug!(channel = %self.inner.label, "interrupting waiters");
        self.inner.gateway.notify();
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !state.read.is_empty() || state.closed {
            return Ok(());
        }
        let epoch = state.interrupts;
        if state.flags.needs_wrap {
            inner.transport.resume_writes();
        } else {
            inner.transport.resume_reads();
        }
        let timed_out = inner.gateway.wait_once(&mut state, timeout);
        if state.interrupts != epoch {
            return Err(Error::Interrupted);
        }
        trace!(channel = %inner.label, timed_out, "readability wait returned");
        Ok(())
    }

    fn wait_writable(&self, timeout: Option<Duration>) -> Result<()> {
        let needs_unwrap = self.inner.state.lock().flags.needs_unwrap;
        let waited = if needs_unwrap {
            self.inner.transport.await_readable(timeout)
        } else {
            self.inner.transport.await_writable(timeout)
        };
        waited.map_err(|err| match err.kind() {
            io::ErrorKind::Interrupted => Error::Interrupted,
            _ => Error::Io(err),
        })
    }
}
