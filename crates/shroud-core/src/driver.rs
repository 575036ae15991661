//! Duplex driver: the wrap loop and the unwrap loop.
//!
//! Every read or write attempt drives the engine until it either makes the
//! requested progress, or hits a transport condition that cannot be resolved
//! without blocking. A single handshake round can need interleaved reads and
//! writes, so each loop can call the other:
//!
//! ```text
//!   drive_wrap(Write | Flush) ──NEED_UNWRAP──▶ drive_unwrap(Handshake)
//!   drive_unwrap(Read)        ──NEED_WRAP────▶ drive_wrap(Handshake)
//! ```
//!
//! The `Handshake` purpose never recurses back: when a nested call sees the
//! engine ask for the opposite direction it returns to its caller, so nesting is
//! at most one level deep. Every loop iteration either moves bytes, grows a
//! buffer, runs a delegated task, or returns; an iteration with no state change
//! is reported as a [`ProtocolViolation`] rather than retried. That includes a
//! delegated task followed by another request for one with nothing consumed.
//!
//! All of this runs with the channel lock held.

use crate::buffer::{BufferKind, ByteBuf};
use crate::config::ChannelConfig;
use crate::engine::{EngineResult, EngineStatus, HandshakeStatus, ProtocolEngine};
use crate::error::{Error, Operation, ProtocolViolation, Result};
use crate::readiness::{CouplingFlags, UserInterest};
use crate::transport::{ReadStatus, Transport, read_nonblocking, write_nonblocking};
use tracing::{debug, trace};

/// Why the wrap loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WrapPurpose {
    /// Caller plaintext must be consumed; returns after one engine-sized chunk
    Write,
    /// Drain the send buffer and any pending outbound handshake step
    Flush,
    /// Push out a handshake message the unwrap loop is waiting on
    Handshake,
}

/// How a wrap loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WrapOutcome {
    /// Plaintext bytes consumed from the caller's sources
    Consumed(usize),
    /// Send buffer empty and nothing left to produce; carries bytes produced
    Flushed(usize),
    /// The transport accepted nothing
    WriteBlocked,
    /// The engine needs input the transport does not have yet
    ReadBlocked,
    /// The outbound direction is finished
    Closed,
    /// The inbound direction finished while the engine was waiting on it
    InboundClosed,
}

/// Why the unwrap loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnwrapPurpose {
    /// Deliver plaintext to the caller
    Read,
    /// Feed input to a handshake the wrap loop is waiting on
    Handshake,
}

/// How an unwrap loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnwrapOutcome {
    /// Plaintext bytes delivered to the caller's destinations
    Data(usize),
    /// The engine advanced (handshake only)
    Progress,
    /// The engine is no longer waiting on input but nothing moved (handshake only)
    Idle,
    /// No ciphertext available from the transport
    ReadBlocked,
    /// A handshake message could not be flushed
    WriteBlocked,
    /// The inbound direction is finished
    Eof,
}

/// All state guarded by the channel lock.
pub(crate) struct Duplex<E> {
    pub(crate) engine: E,
    pub(crate) receive: ByteBuf,
    pub(crate) send: ByteBuf,
    pub(crate) read: ByteBuf,
    pub(crate) flags: CouplingFlags,
    pub(crate) interest: UserInterest,
    /// Waiters should be signaled once the lock is released
    pub(crate) wake_waiters: bool,
    /// Plaintext was buffered outside a read call
    pub(crate) read_event: bool,
    /// Bumped by `interrupt_waiters`
    pub(crate) interrupts: u64,
    pub(crate) closed: bool,
}

impl<E: ProtocolEngine> Duplex<E> {
    pub(crate) fn new(engine: E, config: &ChannelConfig) -> Self {
        Self {
            engine,
            receive: ByteBuf::with_capacity(BufferKind::Receive, config.receive_capacity),
            send: ByteBuf::with_capacity(BufferKind::Send, config.send_capacity),
            read: ByteBuf::with_capacity(BufferKind::Read, config.read_capacity),
            flags: CouplingFlags::default(),
            interest: UserInterest::default(),
            wake_waiters: false,
            read_event: false,
            interrupts: 0,
            closed: false,
        }
    }

    pub(crate) fn set_needs_wrap(&mut self, value: bool) {
        if self.flags.needs_wrap != value {
            debug!(needs_wrap = value, "read direction coupling changed");
            if !value {
                self.wake_waiters = true;
            }
            self.flags.needs_wrap = value;
        }
    }

    pub(crate) fn set_needs_unwrap(&mut self, value: bool) {
        if self.flags.needs_unwrap != value {
            debug!(needs_unwrap = value, "write direction coupling changed");
            if !value {
                self.wake_waiters = true;
            }
            self.flags.needs_unwrap = value;
        }
    }

    pub(crate) fn release_buffers(&mut self) {
        self.receive.release();
        self.send.release();
        self.read.release();
    }

    /// Drive plaintext (or pending handshake output) into the send buffer and
    /// out to the transport.
    pub(crate) fn drive_wrap<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        srcs: &[&[u8]],
        purpose: WrapPurpose,
    ) -> Result<WrapOutcome> {
        let mut produced_total = 0;
        // The previous unwrap sub-call changed nothing; a repeat is a violation
        let mut unwrap_stalled = false;
        // The previous iteration ran a delegated task
        let mut task_ran = false;

        loop {
            if !self.send.is_empty() {
                let written = write_nonblocking(transport, self.send.readable())?;
                if written == 0 {
                    trace!(pending = self.send.len(), "transport refused ciphertext");
                    return Ok(WrapOutcome::WriteBlocked);
                }
                self.send.consume(written);
            }

            let result = self.engine.wrap(srcs, self.send.spare_mut())?;
            self.send.commit(result.produced);
            produced_total += result.produced;
            trace_result(Operation::Wrap, &result);
            let after_task = std::mem::take(&mut task_ran);

            match result.status {
                EngineStatus::BufferOverflow => {
                    if self.send.is_empty() {
                        let required = self.engine.required_ciphertext_buffer_size();
                        self.send.grow_to(required)?;
                    }
                    // Otherwise the next iteration flushes before retrying
                }
                EngineStatus::BufferUnderflow => {
                    // Wrap sources have no minimum size: nothing more to produce
                    if purpose == WrapPurpose::Write {
                        return Ok(WrapOutcome::Consumed(result.consumed));
                    }
                    if self.send.is_empty() {
                        return Ok(WrapOutcome::Flushed(produced_total));
                    }
                }
                EngineStatus::Closed => {
                    if purpose == WrapPurpose::Write {
                        return Ok(WrapOutcome::Closed);
                    }
                    if self.send.is_empty() {
                        transport.shutdown_writes()?;
                        debug!("outbound closed, transport writes shut down");
                        return Ok(WrapOutcome::Closed);
                    }
                    // Flush the closure notification first
                }
                EngineStatus::Ok => {
                    if result.consumed > 0 {
                        self.set_needs_unwrap(false);
                        return Ok(WrapOutcome::Consumed(result.consumed));
                    }
                    if result.produced > 0 {
                        unwrap_stalled = false;
                        continue;
                    }
                    match result.handshake {
                        HandshakeStatus::NeedTask => {
                            if after_task {
                                // The task changed nothing the engine can see
                                return Err(unexpected(Operation::Wrap, &result));
                            }
                            debug!("running delegated task for wrap");
                            self.engine.run_delegated_task()?;
                            task_ran = true;
                        }
                        HandshakeStatus::NeedUnwrap => {
                            if !self.send.is_empty() {
                                // The peer cannot answer until our half is out
                                continue;
                            }
                            if purpose == WrapPurpose::Handshake {
                                return Ok(WrapOutcome::Flushed(produced_total));
                            }
                            if unwrap_stalled {
                                return Err(unexpected(Operation::Wrap, &result));
                            }
                            match self.drive_unwrap(transport, &mut [], UnwrapPurpose::Handshake)? {
                                UnwrapOutcome::Progress => {
                                    self.set_needs_unwrap(false);
                                }
                                UnwrapOutcome::Idle => {
                                    unwrap_stalled = true;
                                }
                                UnwrapOutcome::ReadBlocked => {
                                    self.set_needs_unwrap(true);
                                    return Ok(WrapOutcome::ReadBlocked);
                                }
                                UnwrapOutcome::Eof => {
                                    return Ok(WrapOutcome::InboundClosed);
                                }
                                UnwrapOutcome::Data(_) | UnwrapOutcome::WriteBlocked => {
                                    unwrap_stalled = true;
                                }
                            }
                        }
                        HandshakeStatus::NeedWrap => {
                            // Asked to wrap, wrapped, and nothing came out
                            return Err(unexpected(Operation::Wrap, &result));
                        }
                        HandshakeStatus::NotHandshaking | HandshakeStatus::Finished => {
                            if purpose == WrapPurpose::Write {
                                return Ok(WrapOutcome::Consumed(0));
                            }
                            if self.send.is_empty() {
                                return Ok(WrapOutcome::Flushed(produced_total));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Drive ciphertext from the transport through the engine into the
    /// caller's destinations, spilling any excess into the decrypted-read buffer.
    pub(crate) fn drive_unwrap<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        dsts: &mut [&mut [u8]],
        purpose: UnwrapPurpose,
    ) -> Result<UnwrapOutcome> {
        if purpose == UnwrapPurpose::Read && !self.read.is_empty() {
            return Ok(UnwrapOutcome::Data(self.read.drain_into(dsts)));
        }

        let user_capacity: usize = match purpose {
            UnwrapPurpose::Read => dsts.iter().map(|dst| dst.len()).sum(),
            UnwrapPurpose::Handshake => 0,
        };
        // Handshake purpose: whether anything changed since entry
        let mut advanced = false;
        // The previous wrap sub-call produced nothing; a repeat is a violation
        let mut wrap_stalled = false;
        // The previous iteration ran a delegated task
        let mut task_ran = false;

        loop {
            let result = {
                let mut targets: Vec<&mut [u8]> = Vec::with_capacity(dsts.len() + 1);
                if purpose == UnwrapPurpose::Read {
                    targets.extend(dsts.iter_mut().map(|dst| &mut **dst));
                }
                targets.push(self.read.spare_mut());
                self.engine.unwrap(self.receive.readable(), &mut targets)?
            };
            self.receive.consume(result.consumed);
            trace_result(Operation::Unwrap, &result);
            let after_task = std::mem::take(&mut task_ran);

            let delivered = result.produced.min(user_capacity);
            let spilled = result.produced - delivered;
            if spilled > 0 {
                self.read.commit(spilled);
                self.wake_waiters = true;
                if purpose == UnwrapPurpose::Handshake {
                    self.read_event = true;
                }
            }
            if result.consumed > 0 {
                advanced = true;
                wrap_stalled = false;
            }

            match result.status {
                EngineStatus::BufferOverflow => {
                    let required = self.engine.required_plaintext_buffer_size();
                    if !self.read.is_empty() {
                        // Undelivered plaintext pins the buffer at its size
                        return Err(Error::Protocol(ProtocolViolation::BufferTooSmall {
                            buffer: BufferKind::Read,
                            capacity: self.read.capacity(),
                            required,
                        }));
                    }
                    self.read.grow_to(required)?;
                }
                EngineStatus::BufferUnderflow => {
                    if self.receive.is_full() {
                        // Full yet still too short for one record
                        let required = self.engine.required_ciphertext_buffer_size();
                        self.receive.grow_to(required)?;
                        continue;
                    }
                    self.receive.compact();
                    match read_nonblocking(transport, self.receive.spare_mut())? {
                        ReadStatus::Data(n) => {
                            self.receive.commit(n);
                            trace!(bytes = n, "received ciphertext");
                        }
                        ReadStatus::WouldBlock => return Ok(UnwrapOutcome::ReadBlocked),
                        ReadStatus::Eof => {
                            if self.engine.is_inbound_done() {
                                return Ok(UnwrapOutcome::Eof);
                            }
                            debug!("transport end of stream, closing inbound");
                            // Closing may itself unblock the engine, so retry
                            self.engine.close_inbound()?;
                        }
                    }
                }
                EngineStatus::Closed => {
                    if purpose == UnwrapPurpose::Read {
                        self.set_needs_unwrap(false);
                    }
                    debug!("inbound closed");
                    return Ok(UnwrapOutcome::Eof);
                }
                EngineStatus::Ok => {
                    if purpose == UnwrapPurpose::Read {
                        self.set_needs_unwrap(false);
                    }
                    if result.produced > 0 {
                        return Ok(match purpose {
                            UnwrapPurpose::Read => UnwrapOutcome::Data(delivered),
                            UnwrapPurpose::Handshake => UnwrapOutcome::Progress,
                        });
                    }
                    match (purpose, result.handshake) {
                        (_, HandshakeStatus::NeedTask) => {
                            if after_task && result.consumed == 0 {
                                return Err(unexpected(Operation::Unwrap, &result));
                            }
                            debug!("running delegated task for unwrap");
                            self.engine.run_delegated_task()?;
                            task_ran = true;
                            advanced = true;
                        }
                        (UnwrapPurpose::Handshake, HandshakeStatus::NeedUnwrap) => {
                            if result.consumed == 0 {
                                return Err(unexpected(Operation::Unwrap, &result));
                            }
                        }
                        (UnwrapPurpose::Handshake, _) => {
                            return Ok(if advanced {
                                UnwrapOutcome::Progress
                            } else {
                                UnwrapOutcome::Idle
                            });
                        }
                        (UnwrapPurpose::Read, HandshakeStatus::NeedWrap) => {
                            if wrap_stalled {
                                return Err(unexpected(Operation::Unwrap, &result));
                            }
                            match self.drive_wrap(transport, &[], WrapPurpose::Handshake)? {
                                WrapOutcome::Flushed(produced) => {
                                    self.set_needs_wrap(false);
                                    wrap_stalled = produced == 0;
                                }
                                WrapOutcome::WriteBlocked => {
                                    self.set_needs_wrap(true);
                                    return Ok(UnwrapOutcome::WriteBlocked);
                                }
                                WrapOutcome::Closed
                                | WrapOutcome::Consumed(_)
                                | WrapOutcome::ReadBlocked
                                | WrapOutcome::InboundClosed => {
                                    self.set_needs_wrap(false);
                                    wrap_stalled = true;
                                }
                            }
                        }
                        (UnwrapPurpose::Read, _) => {
                            // A consumed record with no plaintext still counts
                            if result.consumed == 0 {
                                return Err(unexpected(Operation::Unwrap, &result));
                            }
                        }
                    }
                }
            }
        }
    }
}

fn trace_result(operation: Operation, result: &EngineResult) {
    trace!(
        %operation,
        status = ?result.status,
        handshake = ?result.handshake,
        consumed = result.consumed,
        produced = result.produced,
        "engine call"
    );
}

fn unexpected(operation: Operation, result: &EngineResult) -> Error {
    Error::Protocol(ProtocolViolation::UnexpectedResult {
        operation,
        status: result.status,
        handshake: result.handshake,
    })
}
