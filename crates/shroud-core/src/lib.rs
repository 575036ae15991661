//! # SHROUD Core
//!
//! Non-blocking, event-driven record-layer driver for SHROUD (Secure
//! Handshake and Record Over Unreliable Duplex) channels.
//!
//! A [`SslChannel`] presents a plaintext byte stream over a raw non-blocking
//! [`Transport`], delegating all cryptography to a [`ProtocolEngine`]. The core
//! owns only the plumbing:
//! - Buffer discipline (receive, send and decrypted-read buffers)
//! - The wrap and unwrap loops, which drive each other during a handshake
//! - Readiness coupling between the read and write directions
//! - Synchronous waits over the asynchronous driver
//! - Orderly and forced shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SslChannel                                │
//! │   read / write / flush / close, listeners, await_*              │
//! ├────────────────────────────┬────────────────────────────────────┤
//! │      unwrap loop           │           wrap loop                │
//! │  receive ─▶ engine ─▶ read │   caller ─▶ engine ─▶ send         │
//! │            ◀── NEED_WRAP / NEED_UNWRAP ──▶                      │
//! ├────────────────────────────┴────────────────────────────────────┤
//! │                        Transport                                 │
//! │   (non-blocking byte stream with readiness listeners)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod channel;
pub mod config;
mod driver;
pub mod engine;
pub mod error;
pub mod listener;
pub mod readiness;
pub mod transport;
mod wait;

#[cfg(test)]
mod testkit;

pub use buffer::{BufferKind, ByteBuf};
pub use channel::{Progress, SslChannel};
pub use config::ChannelConfig;
pub use engine::{EngineResult, EngineStatus, HandshakeStatus, ProtocolEngine, SessionInfo};
pub use error::{EngineError, Error, Operation, ProtocolViolation, Result};
pub use listener::{ChannelListener, Executor, ListenerSlot, Task};
pub use readiness::{CouplingFlags, UserInterest};
pub use transport::{ReadinessListener, Transport};
