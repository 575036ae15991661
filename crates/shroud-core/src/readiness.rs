//! Readiness coordination between the transport and the channel's user.
//!
//! The transport reports readiness per direction, but what the user can do in
//! a direction depends on the coupling flags: a read that needs a handshake
//! message written first makes progress when the transport becomes *writable*,
//! and vice versa. The handlers here route each transport event to the user
//! listener whose next call will actually advance.
//!
//! User interest is one-shot, like the transport's: a listener is scheduled at
//! most once per `resume_*` call.

use crate::driver::Duplex;
use crate::engine::ProtocolEngine;
use crate::transport::Transport;
use tracing::trace;

/// Cross-direction dependencies left behind by the last read or write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CouplingFlags {
    /// The read direction cannot progress until a wrap is flushed
    pub needs_wrap: bool,
    /// The write direction cannot progress until new input is unwrapped
    pub needs_unwrap: bool,
}

/// Whether the user wants read and write notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserInterest {
    /// Read listener armed
    pub reads: bool,
    /// Write listener armed
    pub writes: bool,
}

/// Work to perform once the channel lock is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[must_use]
pub(crate) struct Dispatch {
    /// Schedule the user read listener
    pub(crate) read: bool,
    /// Schedule the user write listener
    pub(crate) write: bool,
    /// Signal synchronous waiters
    pub(crate) wake: bool,
}

impl Dispatch {
    pub(crate) fn is_empty(&self) -> bool {
        !(self.read || self.write || self.wake)
    }

    fn merge(self, other: Dispatch) -> Dispatch {
        Dispatch {
            read: self.read || other.read,
            write: self.write || other.write,
            wake: self.wake || other.wake,
        }
    }
}

impl<E: ProtocolEngine> Duplex<E> {
    /// The transport became writable.
    pub(crate) fn on_transport_writable(&mut self) -> Dispatch {
        let mut dispatch = Dispatch {
            wake: self.flags.needs_wrap,
            ..Dispatch::default()
        };
        if self.interest.writes && !self.flags.needs_unwrap {
            self.interest.writes = false;
            dispatch.write = true;
        }
        if self.interest.reads && self.flags.needs_wrap {
            // The user's next read performs the pending wrap
            self.interest.reads = false;
            dispatch.read = true;
        }
        trace!(?dispatch, flags = ?self.flags, "transport writable");
        dispatch.merge(self.take_pending())
    }

    /// The transport became readable.
    pub(crate) fn on_transport_readable(&mut self) -> Dispatch {
        let mut dispatch = Dispatch::default();
        if !self.flags.needs_wrap {
            dispatch.wake = true;
            if self.interest.reads {
                self.interest.reads = false;
                dispatch.read = true;
            }
        }
        if self.interest.writes && self.flags.needs_unwrap {
            // The user's next write performs the pending unwrap
            self.interest.writes = false;
            dispatch.write = true;
        }
        trace!(?dispatch, flags = ?self.flags, "transport readable");
        dispatch.merge(self.take_pending())
    }

    /// Register read interest, arming whichever transport direction the read
    /// path is actually waiting on.
    pub(crate) fn resume_reads<T: Transport + ?Sized>(&mut self, transport: &T) -> Dispatch {
        if !self.read.is_empty() {
            return Dispatch {
                read: true,
                ..Dispatch::default()
            };
        }
        if self.flags.needs_wrap {
            transport.resume_writes();
        } else {
            transport.resume_reads();
        }
        self.interest.reads = true;
        Dispatch::default()
    }

    /// Register write interest, arming whichever transport direction the
    /// write path is actually waiting on.
    pub(crate) fn resume_writes<T: Transport + ?Sized>(&mut self, transport: &T) {
        if self.flags.needs_unwrap {
            transport.resume_reads();
        } else {
            transport.resume_writes();
        }
        self.interest.writes = true;
    }

    /// Collect the notifications recorded by the driver during the last call.
    pub(crate) fn take_pending(&mut self) -> Dispatch {
        let mut dispatch = Dispatch {
            wake: std::mem::take(&mut self.wake_waiters),
            ..Dispatch::default()
        };
        if std::mem::take(&mut self.read_event) && self.interest.reads {
            self.interest.reads = false;
            dispatch.read = true;
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::testkit::{ScriptedEngine, ScriptedTransport};

    fn duplex() -> Duplex<ScriptedEngine> {
        Duplex::new(ScriptedEngine::new(64, 32), &ChannelConfig::default())
    }

    #[test]
    fn test_writable_with_read_blocked_on_wrap_fires_read_listener() {
        let mut duplex = duplex();
        duplex.flags.needs_wrap = true;
        duplex.interest.reads = true;

        let dispatch = duplex.on_transport_writable();
        assert!(dispatch.read);
        assert!(dispatch.wake);
        assert!(!dispatch.write);
        assert!(!duplex.interest.reads, "interest is one-shot");

        let again = duplex.on_transport_writable();
        assert!(!again.read);
    }

    #[test]
    fn test_writable_does_not_fire_write_listener_when_write_needs_input() {
        let mut duplex = duplex();
        duplex.flags.needs_unwrap = true;
        duplex.interest.writes = true;

        let dispatch = duplex.on_transport_writable();
        assert!(dispatch.is_empty());
        assert!(duplex.interest.writes);

        let dispatch = duplex.on_transport_readable();
        assert!(dispatch.write);
        assert!(!duplex.interest.writes);
    }

    #[test]
    fn test_readable_without_coupling() {
        let mut duplex = duplex();
        duplex.interest.reads = true;
        duplex.interest.writes = true;

        let dispatch = duplex.on_transport_readable();
        assert!(dispatch.read);
        assert!(dispatch.wake);
        assert!(!dispatch.write);
    }

    #[test]
    fn test_readable_while_read_needs_wrap_is_ignored() {
        let mut duplex = duplex();
        duplex.flags.needs_wrap = true;
        duplex.interest.reads = true;

        let dispatch = duplex.on_transport_readable();
        assert!(dispatch.is_empty());
        assert!(duplex.interest.reads);
    }

    #[test]
    fn test_resume_arms_the_coupled_direction() {
        let transport = ScriptedTransport::new();
        let mut duplex = duplex();

        duplex.flags.needs_wrap = true;
        assert!(duplex.resume_reads(&transport).is_empty());
        assert!(transport.writes_resumed());
        assert!(!transport.reads_resumed());
        assert!(duplex.interest.reads);

        duplex.flags.needs_unwrap = true;
        duplex.resume_writes(&transport);
        assert!(transport.reads_resumed());
        assert!(duplex.interest.writes);
    }

    #[test]
    fn test_resume_reads_with_buffered_plaintext_dispatches_immediately() {
        let transport = ScriptedTransport::new();
        let mut duplex = duplex();
        duplex.read.grow_to(8).unwrap();
        duplex.read.spare_mut()[..2].copy_from_slice(b"hi");
        duplex.read.commit(2);

        let dispatch = duplex.resume_reads(&transport);
        assert!(dispatch.read);
        assert!(!transport.reads_resumed());
        assert!(!duplex.interest.reads);
    }

    #[test]
    fn test_take_pending_consumes_driver_flags() {
        let mut duplex = duplex();
        duplex.wake_waiters = true;
        duplex.read_event = true;
        duplex.interest.reads = true;

        let dispatch = duplex.take_pending();
        assert!(dispatch.wake);
        assert!(dispatch.read);
        assert!(duplex.take_pending().is_empty());
    }
}
