//! The secured channel: a plaintext byte stream layered over a raw transport.

use crate::config::ChannelConfig;
use crate::driver::{Duplex, UnwrapOutcome, UnwrapPurpose, WrapOutcome, WrapPurpose};
use crate::engine::{ProtocolEngine, SessionInfo};
use crate::error::{Error, Result};
use crate::listener::{Executor, ListenerSlot};
use crate::readiness::{CouplingFlags, Dispatch};
use crate::transport::Transport;
use crate::wait::WaitGateway;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, IoSlice, IoSliceMut};
use std::sync::{Arc, Weak};
use tracing::{debug, trace_span, warn};

/// Outcome of a non-blocking read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Bytes moved to or from the caller's buffers
    Transferred(usize),
    /// Nothing can move until the transport is ready; see
    /// [`SslChannel::coupling`] for which direction is awaited
    WouldBlock,
    /// The inbound direction is finished. A write reports this when the peer
    /// closed while the handshake still needed its input.
    Eof,
}

impl Progress {
    /// Bytes transferred, or `None` for would-block and end of stream
    #[must_use]
    pub fn transferred(self) -> Option<usize> {
        match self {
            Self::Transferred(n) => Some(n),
            Self::WouldBlock | Self::Eof => None,
        }
    }

    /// Check if the call would have blocked
    #[must_use]
    pub fn is_would_block(self) -> bool {
        self == Self::WouldBlock
    }
}

pub(crate) struct Inner<E, T> {
    pub(crate) transport: T,
    pub(crate) state: Mutex<Duplex<E>>,
    pub(crate) gateway: WaitGateway,
    pub(crate) label: String,
    executor: Arc<dyn Executor>,
    read_listener: ListenerSlot<SslChannel<E, T>>,
    write_listener: ListenerSlot<SslChannel<E, T>>,
    close_listener: ListenerSlot<SslChannel<E, T>>,
}

#[derive(Debug, Clone, Copy)]
enum ListenerKind {
    Read,
    Write,
    Close,
}

/// Secured full-duplex channel.
///
/// All reads, writes and engine calls are serialized by one lock; any thread
/// may use the channel concurrently. Nothing here blocks except the
/// `await_*` family. Cloning yields another handle to the same channel.
///
/// # Examples
///
/// ```no_run
/// use shroud_core::{Progress, SslChannel};
/// # use shroud_core::{ProtocolEngine, Transport};
/// # fn demo<E: ProtocolEngine, T: Transport>(channel: SslChannel<E, T>) -> shroud_core::Result<()> {
/// let mut buf = [0u8; 1024];
/// loop {
///     match channel.read(&mut buf)? {
///         Progress::Transferred(n) => println!("got {n} bytes"),
///         Progress::WouldBlock => channel.await_readable()?,
///         Progress::Eof => break,
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SslChannel<E, T> {
    pub(crate) inner: Arc<Inner<E, T>>,
}

impl<E, T> Clone for SslChannel<E, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, T> fmt::Debug for SslChannel<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslChannel")
            .field("label", &self.inner.label)
            .finish_non_exhaustive()
    }
}

impl<E: ProtocolEngine, T: Transport> SslChannel<E, T> {
    /// Create a channel with the default configuration
    pub fn new(transport: T, engine: E, executor: Arc<dyn Executor>) -> Self {
        Self::with_config(transport, engine, executor, ChannelConfig::default())
    }

    /// Create a channel.
    ///
    /// Installs this channel's listeners on the transport, replacing any that
    /// were there. `executor` runs every user listener.
    pub fn with_config(
        transport: T,
        engine: E,
        executor: Arc<dyn Executor>,
        config: ChannelConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            state: Mutex::new(Duplex::new(engine, &config)),
            gateway: WaitGateway::new(),
            label: config.label,
            executor,
            read_listener: ListenerSlot::new(),
            write_listener: ListenerSlot::new(),
            close_listener: ListenerSlot::new(),
        });
        Self::install_transport_listeners(&inner);
        debug!(channel = %inner.label, "channel created");
        Self { inner }
    }

    fn install_transport_listeners(inner: &Arc<Inner<E, T>>) {
        let weak = Arc::downgrade(inner);
        inner.transport.set_read_listener(Some(Arc::new(move || {
            if let Some(channel) = Self::upgrade(&weak) {
                channel.handle_transport_readable();
            }
        })));
        let weak = Arc::downgrade(inner);
        inner.transport.set_write_listener(Some(Arc::new(move || {
            if let Some(channel) = Self::upgrade(&weak) {
                channel.handle_transport_writable();
            }
        })));
        let weak = Arc::downgrade(inner);
        inner.transport.set_close_listener(Some(Arc::new(move || {
            if let Some(channel) = Self::upgrade(&weak) {
                channel.handle_transport_closed();
            }
        })));
    }

    fn upgrade(weak: &Weak<Inner<E, T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn handle_transport_readable(&self) {
        let dispatch = self.inner.state.lock().on_transport_readable();
        self.dispatch(dispatch);
    }

    fn handle_transport_writable(&self) {
        let dispatch = self.inner.state.lock().on_transport_writable();
        self.dispatch(dispatch);
    }

    fn handle_transport_closed(&self) {
        if let Err(err) = self.close() {
            debug!(
                channel = %self.inner.label,
                error = %err,
                "close after transport close failed"
            );
        }
        self.schedule(ListenerKind::Close);
    }

    fn dispatch(&self, dispatch: Dispatch) {
        if dispatch.wake {
            self.inner.gateway.notify();
        }
        if dispatch.read {
            self.schedule(ListenerKind::Read);
        }
        if dispatch.write {
            self.schedule(ListenerKind::Write);
        }
    }

    fn schedule(&self, kind: ListenerKind) {
        let channel = self.clone();
        self.inner.executor.execute(Box::new(move || {
            let slot = match kind {
                ListenerKind::Read => &channel.inner.read_listener,
                ListenerKind::Write => &channel.inner.write_listener,
                ListenerKind::Close => &channel.inner.close_listener,
            };
            slot.invoke(&channel);
        }));
    }

    /// Read decrypted plaintext into `dst`.
    ///
    /// # Errors
    ///
    /// Transport failures, engine errors (including a truncated inbound
    /// stream), and [`Error::Protocol`] if the engine misbehaves.
    pub fn read(&self, dst: &mut [u8]) -> Result<Progress> {
        self.read_into(&mut [dst])
    }

    /// Scatter decrypted plaintext across `bufs`, filling each in order.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> Result<Progress> {
        let mut dsts: Vec<&mut [u8]> = bufs.iter_mut().map(|buf| &mut **buf).collect();
        self.read_into(&mut dsts)
    }

    fn read_into(&self, dsts: &mut [&mut [u8]]) -> Result<Progress> {
        let _span = trace_span!("read", channel = %self.inner.label).entered();
        let (outcome, dispatch) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(Progress::Eof);
            }
            let outcome = state.drive_unwrap(&self.inner.transport, dsts, UnwrapPurpose::Read);
            (outcome, state.take_pending())
        };
        self.dispatch(dispatch);
        Ok(match outcome? {
            UnwrapOutcome::Data(n) => Progress::Transferred(n),
            UnwrapOutcome::ReadBlocked | UnwrapOutcome::WriteBlocked => Progress::WouldBlock,
            UnwrapOutcome::Eof => Progress::Eof,
            UnwrapOutcome::Progress | UnwrapOutcome::Idle => Progress::Transferred(0),
        })
    }

    /// Encrypt plaintext from `src`.
    ///
    /// At most one engine-sized chunk is consumed per call. The resulting
    /// ciphertext may stay buffered until the next write or [`flush`](Self::flush).
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] once the outbound direction is finished, plus the
    /// failures listed for [`read`](Self::read).
    pub fn write(&self, src: &[u8]) -> Result<Progress> {
        self.write_from(&[src])
    }

    /// Gather plaintext from `bufs`, in order.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> Result<Progress> {
        let srcs: Vec<&[u8]> = bufs.iter().map(|buf| &**buf).collect();
        self.write_from(&srcs)
    }

    fn write_from(&self, srcs: &[&[u8]]) -> Result<Progress> {
        let _span = trace_span!("write", channel = %self.inner.label).entered();
        let (outcome, dispatch) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            let outcome = state.drive_wrap(&self.inner.transport, srcs, WrapPurpose::Write);
            (outcome, state.take_pending())
        };
        self.dispatch(dispatch);
        match outcome? {
            WrapOutcome::Consumed(n) => Ok(Progress::Transferred(n)),
            WrapOutcome::Flushed(_) => Ok(Progress::Transferred(0)),
            WrapOutcome::WriteBlocked | WrapOutcome::ReadBlocked => Ok(Progress::WouldBlock),
            WrapOutcome::InboundClosed => Ok(Progress::Eof),
            WrapOutcome::Closed => Err(Error::Closed),
        }
    }

    /// Drain buffered ciphertext and complete any pending outbound handshake
    /// step. Returns `true` once everything is flushed.
    ///
    /// After [`shutdown_writes`](Self::shutdown_writes), keep calling this
    /// until it returns `true`: that is when the closure notification has been
    /// written and transport writes are shut down.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`close`](Self::close), plus the failures listed
    /// for [`read`](Self::read).
    pub fn flush(&self) -> Result<bool> {
        let _span = trace_span!("flush", channel = %self.inner.label).entered();
        let (outcome, dispatch) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            let outcome = state.drive_wrap(&self.inner.transport, &[], WrapPurpose::Flush);
            (outcome, state.take_pending())
        };
        self.dispatch(dispatch);
        Ok(match outcome? {
            WrapOutcome::WriteBlocked | WrapOutcome::ReadBlocked => false,
            WrapOutcome::Flushed(_)
            | WrapOutcome::Consumed(_)
            | WrapOutcome::Closed
            | WrapOutcome::InboundClosed => true,
        })
    }

    /// Close the channel and its transport.
    ///
    /// The engine's outbound and inbound directions are closed without any
    /// further record exchange; use [`shutdown_writes`](Self::shutdown_writes)
    /// and [`flush`](Self::flush) first for an orderly shutdown.
    ///
    /// Closing an already closed channel does nothing.
    ///
    /// # Errors
    ///
    /// The inbound closure failure (truncation) or the transport close failure.
    /// If both fail, [`Error::CloseFailed`] carries the transport failure with
    /// the inbound failure as its source.
    pub fn close(&self) -> Result<()> {
        let (inbound, transport) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.engine.close_outbound();
            let inbound = state.engine.close_inbound();
            let transport = self.inner.transport.close();
            state.release_buffers();
            state.closed = true;
            (inbound, transport)
        };
        self.inner.gateway.notify();
        debug!(channel = %self.inner.label, "channel closed");

        match (inbound, transport) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(inbound), Ok(())) => Err(Error::Engine(inbound)),
            (Ok(()), Err(transport)) => Err(Error::Io(transport)),
            (Err(inbound), Err(transport)) => {
                warn!(
                    channel = %self.inner.label,
                    %inbound,
                    %transport,
                    "both halves of close failed"
                );
                Err(Error::CloseFailed { transport, inbound })
            }
        }
    }

    /// Stop reading: shuts down transport reads and closes the engine's
    /// inbound direction.
    ///
    /// # Errors
    ///
    /// The transport shutdown failure, or the engine's inbound closure failure
    /// if no closure notification was received.
    pub fn shutdown_reads(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.transport.shutdown_reads()?;
        state.engine.close_inbound()?;
        debug!(channel = %self.inner.label, "reads shut down");
        Ok(())
    }

    /// Begin an orderly outbound shutdown. Call [`flush`](Self::flush) until
    /// it returns `true` to send the closure notification.
    pub fn shutdown_writes(&self) {
        self.inner.state.lock().engine.close_outbound();
        debug!(channel = %self.inner.label, "writes shutting down");
    }

    /// Start (or restart) the handshake. Records move on the next read,
    /// write or flush.
    ///
    /// # Errors
    ///
    /// The engine's refusal to start a handshake.
    pub fn start_handshake(&self) -> Result<()> {
        self.inner.state.lock().engine.begin_handshake()?;
        debug!(channel = %self.inner.label, "handshake started");
        Ok(())
    }

    /// Check if the transport is still open
    pub fn is_open(&self) -> bool {
        self.inner.transport.is_open()
    }

    /// Session parameters reported by the engine
    pub fn session(&self) -> SessionInfo {
        self.inner.state.lock().engine.session()
    }

    /// Local transport address
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub fn local_addr(&self) -> Result<T::Addr> {
        Ok(self.inner.transport.local_addr()?)
    }

    /// Peer transport address
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub fn peer_addr(&self) -> Result<T::Addr> {
        Ok(self.inner.transport.peer_addr()?)
    }

    /// Snapshot of the cross-direction coupling flags
    pub fn coupling(&self) -> CouplingFlags {
        self.inner.state.lock().flags
    }

    /// Label from the channel configuration
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Read listener slot
    pub fn read_setter(&self) -> &ListenerSlot<Self> {
        &self.inner.read_listener
    }

    /// Write listener slot
    pub fn write_setter(&self) -> &ListenerSlot<Self> {
        &self.inner.write_listener
    }

    /// Close listener slot
    pub fn close_setter(&self) -> &ListenerSlot<Self> {
        &self.inner.close_listener
    }

    /// Request one read-readiness notification.
    ///
    /// If plaintext is already buffered the read listener is scheduled right
    /// away; otherwise the transport is armed for whichever direction the
    /// read path is waiting on.
    pub fn resume_reads(&self) {
        let dispatch = self.inner.state.lock().resume_reads(&self.inner.transport);
        self.dispatch(dispatch);
    }

    /// Withdraw read interest
    pub fn suspend_reads(&self) {
        self.inner.state.lock().interest.reads = false;
    }

    /// Request one write-readiness notification, arming whichever transport
    /// direction the write path is waiting on.
    pub fn resume_writes(&self) {
        self.inner.state.lock().resume_writes(&self.inner.transport);
    }

    /// Withdraw write interest
    pub fn suspend_writes(&self) {
        self.inner.state.lock().interest.writes = false;
    }
}

impl<E: ProtocolEngine, T: Transport> io::Read for &SslChannel<E, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_progress(SslChannel::read(self, buf)?)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        read_progress(SslChannel::read_vectored(self, bufs)?)
    }
}

impl<E: ProtocolEngine, T: Transport> io::Write for &SslChannel<E, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_progress(SslChannel::write(self, buf)?, buf.is_empty())
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let empty = bufs.iter().all(|buf| buf.is_empty());
        write_progress(SslChannel::write_vectored(self, bufs)?, empty)
    }

    fn flush(&mut self) -> io::Result<()> {
        if SslChannel::flush(self)? {
            Ok(())
        } else {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }
}

impl<E: ProtocolEngine, T: Transport> io::Read for SslChannel<E, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<E: ProtocolEngine, T: Transport> io::Write for SslChannel<E, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}

fn read_progress(progress: Progress) -> io::Result<usize> {
    match progress {
        Progress::Transferred(n) => Ok(n),
        Progress::Eof => Ok(0),
        Progress::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
    }
}

fn write_progress(progress: Progress, empty: bool) -> io::Result<usize> {
    match progress {
        // Zero would read as a failed write to `write_all`; report it as not ready
        Progress::Transferred(0) if !empty => Err(io::ErrorKind::WouldBlock.into()),
        Progress::Transferred(n) => Ok(n),
        Progress::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
        Progress::Eof => Err(io::ErrorKind::UnexpectedEof.into()),
    }
}
