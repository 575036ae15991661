//! Raw transport contract.
//!
//! The channel sits on top of a connection-oriented, non-blocking byte stream.
//! This trait is everything the driver needs from it. Reads and writes follow
//! the standard non-blocking conventions: `Ok(0)` from `read` is end-of-stream
//! and [`io::ErrorKind::WouldBlock`] means "no progress possible right now".
//!
//! Readiness is reported through listeners. Interest is one-shot from the
//! channel's point of view: after `resume_reads`, the transport invokes the read
//! listener at least once when reading may make progress, and the channel calls
//! `resume_reads` again whenever it wants another notification.

use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked by the transport when a readiness or close event occurs.
///
/// Transports must not invoke listeners inline from inside their own `read` or
/// `write` calls.
pub type ReadinessListener = Arc<dyn Fn() + Send + Sync>;

/// Non-blocking, connection-oriented byte-stream transport.
pub trait Transport: Send + Sync + 'static {
    /// Address type reported by `local_addr` and `peer_addr`
    type Addr: Debug + Clone + Send + Sync;

    /// Read into `buf` without blocking.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if no data is available; any other error is a transport failure.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf` without blocking; returns the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if no space is available; any other error is a transport failure.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Stop reading; subsequent reads report end-of-stream
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the shutdown fails.
    fn shutdown_reads(&self) -> io::Result<()>;

    /// Stop writing; the peer observes end-of-stream once buffered data drains
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the shutdown fails.
    fn shutdown_writes(&self) -> io::Result<()>;

    /// Close both directions and release resources
    ///
    /// # Errors
    ///
    /// Returns an I/O error if closing fails.
    fn close(&self) -> io::Result<()>;

    /// Check if the transport is still open
    fn is_open(&self) -> bool;

    /// Install (or clear) the read-readiness listener
    fn set_read_listener(&self, listener: Option<ReadinessListener>);

    /// Install (or clear) the write-readiness listener
    fn set_write_listener(&self, listener: Option<ReadinessListener>);

    /// Install (or clear) the close listener
    fn set_close_listener(&self, listener: Option<ReadinessListener>);

    /// Request a read-readiness notification
    fn resume_reads(&self);

    /// Withdraw read interest
    fn suspend_reads(&self);

    /// Request a write-readiness notification
    fn resume_writes(&self);

    /// Withdraw write interest
    fn suspend_writes(&self);

    /// Block until the transport is readable, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if waiting fails or is interrupted.
    fn await_readable(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Block until the transport is writable, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if waiting fails or is interrupted.
    fn await_writable(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Local address
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be determined.
    fn local_addr(&self) -> io::Result<Self::Addr>;

    /// Peer address
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be determined.
    fn peer_addr(&self) -> io::Result<Self::Addr>;
}

/// Single non-blocking write with `WouldBlock` folded into a zero count.
pub(crate) fn write_nonblocking<T: Transport + ?Sized>(
    transport: &T,
    buf: &[u8],
) -> io::Result<usize> {
    match transport.write(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Result of a single non-blocking transport read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Some bytes arrived
    Data(usize),
    /// Nothing available now
    WouldBlock,
    /// End of stream
    Eof,
}

pub(crate) fn read_nonblocking<T: Transport + ?Sized>(
    transport: &T,
    buf: &mut [u8],
) -> io::Result<ReadStatus> {
    match transport.read(buf) {
        Ok(0) => Ok(ReadStatus::Eof),
        Ok(n) => Ok(ReadStatus::Data(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadStatus::WouldBlock),
        Err(e) => Err(e),
    }
}
