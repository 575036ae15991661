//! # SHROUD Seal
//!
//! Reference [`ProtocolEngine`](shroud_core::ProtocolEngine) for SHROUD
//! channels.
//!
//! This crate provides:
//! - An ephemeral X25519 handshake with keyed-BLAKE3 finished verification
//! - `XChaCha20-Poly1305` record protection with counter-derived nonces
//! - Protected closure notification and truncation detection
//!
//! The handshake deliberately exercises every status a record-layer driver
//! has to cope with: the client wraps first, each side has to wait on the
//! other, key agreement runs as a delegated task, and the server sends two
//! messages back to back.
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm |
//! |----------|-----------|
//! | Key Exchange | X25519 (ephemeral) |
//! | AEAD | XChaCha20-Poly1305 |
//! | KDF | BLAKE3 `derive_key` |
//! | Finished MAC | keyed BLAKE3 |
//!
//! ## Record Format
//!
//! ```text
//! ┌──────────────┬───────────────┬──────────────────────────────┐
//! │ content (1B) │ length (2B BE)│ body (length bytes)          │
//! └──────────────┴───────────────┴──────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod engine;
pub mod error;
mod keys;
pub mod record;

pub use config::{Role, SealConfig};
pub use engine::SealEngine;
pub use error::SealError;
pub use record::{ContentType, RecordHeader};

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size
pub const TAG_SIZE: usize = 16;

/// Finished MAC size
pub const MAC_SIZE: usize = 32;
