//! In-memory duplex pipe transport.
//!
//! [`MemoryTransport::pair`] creates two connected endpoints. Each direction is
//! a bounded byte queue: writes accept only as much as fits (and report
//! `WouldBlock` when full), reads take what is queued (and report `WouldBlock`
//! when empty, or end-of-stream once the writer shut down).
//!
//! Readiness interest is one-shot: `resume_reads` arms a single notification,
//! delivered as soon as the endpoint is readable (immediately if it already
//! is). Listeners always run on the executor, never on the caller's thread.

use crate::error::{TransportError, TransportResult};
use crate::stats::TransportStats;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use shroud_core::listener::Executor;
use shroud_core::transport::{ReadinessListener, Transport};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Memory transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Bytes each direction can hold before writes block
    pub capacity: usize,
    /// Address reported by the first endpoint
    pub first_label: String,
    /// Address reported by the second endpoint
    pub second_label: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024,
            first_label: String::from("mem:0"),
            second_label: String::from("mem:1"),
        }
    }
}

impl MemoryConfig {
    /// Set the per-direction capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidConfig` for a zero capacity or
    /// identical endpoint labels.
    pub fn validate(&self) -> TransportResult<()> {
        if self.capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "capacity must be non-zero".into(),
            ));
        }
        if self.first_label == self.second_label {
            return Err(TransportError::InvalidConfig(format!(
                "endpoint labels must differ, both are {:?}",
                self.first_label
            )));
        }
        Ok(())
    }
}

/// Address of a memory endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryAddr(String);

impl MemoryAddr {
    /// Address as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bytes flowing towards one endpoint
#[derive(Default)]
struct Pipe {
    queue: VecDeque<u8>,
    /// The writing side will send nothing more
    finished: bool,
}

#[derive(Default)]
struct Endpoint {
    open: bool,
    reads_shut: bool,
    writes_shut: bool,
    read_armed: bool,
    write_armed: bool,
    read_listener: Option<ReadinessListener>,
    write_listener: Option<ReadinessListener>,
    close_listener: Option<ReadinessListener>,
    stats: TransportStats,
}

struct LinkState {
    /// `pipes[i]` carries bytes towards endpoint `i`
    pipes: [Pipe; 2],
    ends: [Endpoint; 2],
}

impl LinkState {
    fn readable(&self, side: usize) -> bool {
        let end = &self.ends[side];
        let pipe = &self.pipes[side];
        !end.open || end.reads_shut || pipe.finished || !pipe.queue.is_empty()
    }

    fn writable(&self, side: usize, capacity: usize) -> bool {
        let end = &self.ends[side];
        let peer = &self.ends[1 - side];
        // A write that would fail is also "ready": it reports the failure
        !end.open || end.writes_shut || !peer.open || self.pipes[1 - side].queue.len() < capacity
    }

    /// Disarm satisfied interest and collect the listeners to dispatch
    fn take_ready(&mut self, capacity: usize) -> Vec<ReadinessListener> {
        let mut ready = Vec::new();
        for side in 0..2 {
            if self.ends[side].read_armed && self.readable(side) {
                self.ends[side].read_armed = false;
                if let Some(listener) = self.ends[side].read_listener.clone() {
                    self.ends[side].stats.record_event();
                    ready.push(listener);
                }
            }
            if self.ends[side].write_armed && self.writable(side, capacity) {
                self.ends[side].write_armed = false;
                if let Some(listener) = self.ends[side].write_listener.clone() {
                    self.ends[side].stats.record_event();
                    ready.push(listener);
                }
            }
        }
        ready
    }
}

struct Link {
    state: Mutex<LinkState>,
    changed: Condvar,
    capacity: usize,
    addrs: [MemoryAddr; 2],
    executor: Arc<dyn Executor>,
}

impl Link {
    /// Wake blocked awaits and dispatch listeners whose interest is now met.
    fn publish(&self, mut state: parking_lot::MutexGuard<'_, LinkState>) {
        let ready = state.take_ready(self.capacity);
        drop(state);
        self.changed.notify_all();
        for listener in ready {
            self.executor.execute(Box::new(move || listener()));
        }
    }
}

/// One endpoint of an in-memory duplex pipe.
pub struct MemoryTransport {
    link: Arc<Link>,
    side: usize,
}

impl MemoryTransport {
    /// Create a connected pair of endpoints.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidConfig` if the configuration is invalid.
    pub fn pair(
        config: MemoryConfig,
        executor: Arc<dyn Executor>,
    ) -> TransportResult<(MemoryTransport, MemoryTransport)> {
        config.validate()?;
        let end = || Endpoint {
            open: true,
            ..Endpoint::default()
        };
        let link = Arc::new(Link {
            state: Mutex::new(LinkState {
                pipes: [Pipe::default(), Pipe::default()],
                ends: [end(), end()],
            }),
            changed: Condvar::new(),
            capacity: config.capacity,
            addrs: [MemoryAddr(config.first_label), MemoryAddr(config.second_label)],
            executor,
        });
        debug!(
            first = %link.addrs[0],
            second = %link.addrs[1],
            capacity = link.capacity,
            "memory pipe created"
        );
        let first = MemoryTransport {
            link: Arc::clone(&link),
            side: 0,
        };
        let second = MemoryTransport { link, side: 1 };
        Ok((first, second))
    }

    /// Traffic statistics for this endpoint
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.link.state.lock().ends[self.side].stats.clone()
    }

    /// Bytes queued towards this endpoint and not yet read
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.link.state.lock().pipes[self.side].queue.len()
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    fn await_until(
        &self,
        timeout: Option<Duration>,
        ready: impl Fn(&LinkState) -> bool,
    ) -> io::Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.link.state.lock();
        while !ready(&state) {
            match deadline {
                Some(deadline) => {
                    if self.link.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.link.changed.wait(&mut state),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("addr", &self.link.addrs[self.side])
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    type Addr = MemoryAddr;

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.link.state.lock();
        let end = &state.ends[self.side];
        if !end.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if end.reads_shut {
            return Ok(0);
        }
        let pipe = &mut state.pipes[self.side];
        if pipe.queue.is_empty() {
            if pipe.finished {
                return Ok(0);
            }
            state.ends[self.side].stats.record_blocked_read();
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(pipe.queue.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.queue.drain(..n)) {
            *slot = byte;
        }
        state.ends[self.side].stats.record_recv(n);
        trace!(addr = %self.link.addrs[self.side], bytes = n, "memory read");
        // The peer may now have room to write
        self.link.publish(state);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.link.state.lock();
        let end = &state.ends[self.side];
        if !end.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if end.writes_shut || !state.ends[self.peer()].open {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let peer = self.peer();
        let space = self.link.capacity - state.pipes[peer].queue.len();
        if space == 0 {
            state.ends[self.side].stats.record_blocked_write();
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = space.min(buf.len());
        state.pipes[peer].queue.extend(&buf[..n]);
        state.ends[self.side].stats.record_send(n);
        trace!(addr = %self.link.addrs[self.side], bytes = n, "memory write");
        self.link.publish(state);
        Ok(n)
    }

    fn shutdown_reads(&self) -> io::Result<()> {
        let mut state = self.link.state.lock();
        let pipe = &mut state.pipes[self.side];
        pipe.queue.clear();
        state.ends[self.side].reads_shut = true;
        debug!(addr = %self.link.addrs[self.side], "memory reads shut down");
        self.link.publish(state);
        Ok(())
    }

    fn shutdown_writes(&self) -> io::Result<()> {
        let mut state = self.link.state.lock();
        state.ends[self.side].writes_shut = true;
        let peer = self.peer();
        state.pipes[peer].finished = true;
        debug!(addr = %self.link.addrs[self.side], "memory writes shut down");
        self.link.publish(state);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.link.state.lock();
        if !state.ends[self.side].open {
            return Ok(());
        }
        let peer = self.peer();
        let end = &mut state.ends[self.side];
        end.open = false;
        end.read_armed = false;
        end.write_armed = false;
        let close_listener = end.close_listener.take();
        state.pipes[self.side].queue.clear();
        state.pipes[peer].finished = true;
        debug!(addr = %self.link.addrs[self.side], "memory endpoint closed");
        self.link.publish(state);
        if let Some(listener) = close_listener {
            self.link.executor.execute(Box::new(move || listener()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.link.state.lock().ends[self.side].open
    }

    fn set_read_listener(&self, listener: Option<ReadinessListener>) {
        self.link.state.lock().ends[self.side].read_listener = listener;
    }

    fn set_write_listener(&self, listener: Option<ReadinessListener>) {
        self.link.state.lock().ends[self.side].write_listener = listener;
    }

    fn set_close_listener(&self, listener: Option<ReadinessListener>) {
        self.link.state.lock().ends[self.side].close_listener = listener;
    }

    fn resume_reads(&self) {
        let mut state = self.link.state.lock();
        if state.ends[self.side].open {
            state.ends[self.side].read_armed = true;
        }
        self.link.publish(state);
    }

    fn suspend_reads(&self) {
        self.link.state.lock().ends[self.side].read_armed = false;
    }

    fn resume_writes(&self) {
        let mut state = self.link.state.lock();
        if state.ends[self.side].open {
            state.ends[self.side].write_armed = true;
        }
        self.link.publish(state);
    }

    fn suspend_writes(&self) {
        self.link.state.lock().ends[self.side].write_armed = false;
    }

    fn await_readable(&self, timeout: Option<Duration>) -> io::Result<()> {
        let side = self.side;
        self.await_until(timeout, |state| state.readable(side))
    }

    fn await_writable(&self, timeout: Option<Duration>) -> io::Result<()> {
        let side = self.side;
        let capacity = self.link.capacity;
        self.await_until(timeout, |state| state.writable(side, capacity))
    }

    fn local_addr(&self) -> io::Result<MemoryAddr> {
        Ok(self.link.addrs[self.side].clone())
    }

    fn peer_addr(&self) -> io::Result<MemoryAddr> {
        Ok(self.link.addrs[self.peer()].clone())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // Closing a memory endpoint cannot fail
        let _ = self.close();
    }
}
