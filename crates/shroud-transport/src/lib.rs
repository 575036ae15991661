//! # SHROUD Transport
//!
//! Transport collaborators for SHROUD channels.
//!
//! This crate provides:
//! - [`MemoryTransport`]: a bounded, non-blocking in-process duplex pipe that
//!   implements [`shroud_core::Transport`], with readiness listeners dispatched
//!   through an executor
//! - Per-endpoint traffic statistics
//!
//! The memory pipe models the behaviours the channel must cope with on a real
//! socket: backpressure when the peer is not reading, would-block reads,
//! half-close in either direction, and close events.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod stats;

pub use error::{TransportError, TransportResult};
pub use memory::{MemoryAddr, MemoryConfig, MemoryTransport};
pub use stats::TransportStats;
