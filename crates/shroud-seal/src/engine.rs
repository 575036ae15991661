//! The seal engine.
//!
//! # Handshake
//!
//! ```text
//! Client                                   Server
//!   SendHello ──── hello(pub_c) ────────▶   AwaitHello
//!   AwaitHello                              DeriveKeys   (task)
//!               ◀─── hello(pub_s) ───────   SendHello
//!   DeriveKeys  (task)
//!               ◀─── finished(mac_s) ────   SendFinished
//!   AwaitFinished                           AwaitFinished
//!   SendFinished ─── finished(mac_c) ────▶
//!   Established                             Established
//! ```
//!
//! Finished messages are the first protected records in each direction.
//! Alerts are protected once the sender has sent its finished message.

use crate::config::{Role, SealConfig};
use crate::error::SealError;
use crate::keys::{Ephemeral, HandshakeKeys, transcript_hash};
use crate::record::{
    ALERT_CLOSE_NOTIFY, ALERT_WARNING, ContentType, FINISHED_LEN, HEADER_SIZE, HELLO_LEN,
    MSG_FINISHED, MSG_HELLO, Record, RecordHeader, parse_record,
};
use crate::{TAG_SIZE, X25519_PUBLIC_KEY_SIZE};
use rand_core::{CryptoRng, OsRng, RngCore};
use shroud_core::{
    EngineError, EngineResult, EngineStatus, HandshakeStatus, ProtocolEngine, SessionInfo,
};
use std::fmt;
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

const PROTOCOL: &str = "SHROUD-SEAL/1";
const CIPHER_SUITE: &str = "X25519_XCHACHA20POLY1305_BLAKE3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SendHello,
    AwaitHello,
    DeriveKeys,
    SendFinished,
    AwaitFinished,
    Established,
}

impl Phase {
    fn status(self) -> HandshakeStatus {
        match self {
            Self::SendHello | Self::SendFinished => HandshakeStatus::NeedWrap,
            Self::AwaitHello | Self::AwaitFinished => HandshakeStatus::NeedUnwrap,
            Self::DeriveKeys => HandshakeStatus::NeedTask,
            Self::Established => HandshakeStatus::NotHandshaking,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::SendHello => "sending hello",
            Self::AwaitHello => "awaiting hello",
            Self::DeriveKeys => "deriving keys",
            Self::SendFinished => "sending finished",
            Self::AwaitFinished => "awaiting finished",
            Self::Established => "established",
        }
    }
}

/// Reference protocol engine.
///
/// One engine protects one connection. The handshake starts implicitly on the
/// first `wrap` (client) or `unwrap` (server).
pub struct SealEngine {
    config: SealConfig,
    phase: Phase,
    ephemeral: Ephemeral,
    peer_public: Option<[u8; X25519_PUBLIC_KEY_SIZE]>,
    keys: Option<HandshakeKeys>,
    /// Our records are protected (our finished has been sent)
    write_protected: bool,
    /// Peer records are protected (the peer's finished has been verified)
    read_protected: bool,
    close_pending: bool,
    close_notify_received: bool,
    inbound_done: bool,
    outbound_done: bool,
    failed: bool,
    /// Decryption workspace, wiped after every record
    scratch: Vec<u8>,
}

impl SealEngine {
    /// Create an engine with an OS-seeded ephemeral key.
    ///
    /// # Errors
    ///
    /// Returns `SealError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: SealConfig) -> Result<Self, SealError> {
        Self::with_rng(config, &mut OsRng)
    }

    /// Create an engine drawing its ephemeral key from `rng`.
    ///
    /// # Errors
    ///
    /// Returns `SealError::InvalidConfig` if the configuration is invalid.
    pub fn with_rng<R: RngCore + CryptoRng>(
        config: SealConfig,
        rng: &mut R,
    ) -> Result<Self, SealError> {
        config.validate()?;
        let phase = match config.role {
            Role::Client => Phase::SendHello,
            Role::Server => Phase::AwaitHello,
        };
        Ok(Self {
            config,
            phase,
            ephemeral: Ephemeral::generate(rng),
            peer_public: None,
            keys: None,
            write_protected: false,
            read_protected: false,
            close_pending: false,
            close_notify_received: false,
            inbound_done: false,
            outbound_done: false,
            failed: false,
            scratch: Vec::new(),
        })
    }

    /// Handshake role
    #[must_use]
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Check if the handshake has completed
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.phase == Phase::Established
    }

    /// Check if a fatal error closed the engine
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Check if the peer closed with a closure notification
    #[must_use]
    pub fn received_close_notify(&self) -> bool {
        self.close_notify_received
    }

    fn result(&self, status: EngineStatus, consumed: usize, produced: usize) -> EngineResult {
        EngineResult::new(status, self.handshake_status(), consumed, produced)
    }

    fn advance(&mut self, next: Phase) {
        debug!(role = ?self.config.role, from = self.phase.name(), to = next.name(), "handshake");
        self.phase = next;
    }

    /// A fatal error closes both directions; later calls report `Closed`.
    fn fail(&mut self, err: &SealError) {
        warn!(role = ?self.config.role, phase = self.phase.name(), error = %err, "seal failure");
        self.failed = true;
        self.inbound_done = true;
        self.outbound_done = true;
        self.close_pending = false;
        self.keys = None;
        self.scratch.zeroize();
    }

    fn unexpected(&self, content: ContentType) -> SealError {
        SealError::UnexpectedRecord {
            content: content.name(),
            phase: self.phase.name(),
        }
    }

    /// Write one record into `dst`, protecting the body if `protect` is set.
    ///
    /// The body is gathered from `parts`. Returns `None` if `dst` is too small.
    fn emit(
        &mut self,
        content_type: ContentType,
        parts: &[&[u8]],
        body_len: usize,
        protect: bool,
        dst: &mut [u8],
    ) -> Result<Option<usize>, SealError> {
        let wire_body = body_len + if protect { TAG_SIZE } else { 0 };
        let total = HEADER_SIZE + wire_body;
        if dst.len() < total {
            return Ok(None);
        }
        let length = u16::try_from(wire_body).map_err(|_| SealError::RecordTooLarge {
            length: wire_body,
            max: usize::from(u16::MAX),
        })?;
        let header = RecordHeader::new(content_type, length).encode();
        let (head, rest) = dst.split_at_mut(HEADER_SIZE);
        head.copy_from_slice(&header);

        let mut filled = 0;
        for part in parts {
            let take = part.len().min(body_len - filled);
            rest[filled..filled + take].copy_from_slice(&part[..take]);
            filled += take;
            if filled == body_len {
                break;
            }
        }

        if protect {
            let keys = self.keys.as_mut().ok_or(SealError::EncryptionFailed)?;
            let (body, tail) = rest.split_at_mut(body_len);
            let tag = keys.write.seal(&header, body)?;
            tail[..TAG_SIZE].copy_from_slice(&tag);
        }
        Ok(Some(total))
    }

    fn wrap_record(&mut self, srcs: &[&[u8]], dst: &mut [u8]) -> Result<EngineResult, SealError> {
        if self.outbound_done {
            return Ok(self.result(EngineStatus::Closed, 0, 0));
        }

        if self.close_pending {
            let alert = [ALERT_WARNING, ALERT_CLOSE_NOTIFY];
            let protect = self.write_protected;
            let Some(produced) =
                self.emit(ContentType::Alert, &[&alert], alert.len(), protect, dst)?
            else {
                return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
            };
            self.close_pending = false;
            self.outbound_done = true;
            debug!(role = ?self.config.role, protected = protect, "close_notify sent");
            return Ok(self.result(EngineStatus::Closed, 0, produced));
        }

        match self.phase {
            Phase::SendHello => {
                let public = self.ephemeral.public_bytes();
                let Some(produced) = self.emit(
                    ContentType::Handshake,
                    &[&[MSG_HELLO], &public],
                    HELLO_LEN,
                    false,
                    dst,
                )?
                else {
                    return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
                };
                self.advance(match self.config.role {
                    Role::Client => Phase::AwaitHello,
                    Role::Server => Phase::SendFinished,
                });
                Ok(self.result(EngineStatus::Ok, 0, produced))
            }
            Phase::SendFinished => {
                let mac = match &self.keys {
                    Some(keys) => *keys.local_mac(),
                    None => return Err(SealError::EncryptionFailed),
                };
                let Some(produced) = self.emit(
                    ContentType::Handshake,
                    &[&[MSG_FINISHED], &mac],
                    FINISHED_LEN,
                    true,
                    dst,
                )?
                else {
                    return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
                };
                self.write_protected = true;
                match self.config.role {
                    Role::Client => {
                        self.advance(Phase::Established);
                        Ok(EngineResult::new(
                            EngineStatus::Ok,
                            HandshakeStatus::Finished,
                            0,
                            produced,
                        ))
                    }
                    Role::Server => {
                        self.advance(Phase::AwaitFinished);
                        Ok(self.result(EngineStatus::Ok, 0, produced))
                    }
                }
            }
            Phase::Established => {
                let available: usize = srcs.iter().map(|src| src.len()).sum();
                if available == 0 {
                    return Ok(self.result(EngineStatus::Ok, 0, 0));
                }
                let fragment = available.min(self.config.max_fragment);
                let Some(produced) =
                    self.emit(ContentType::ApplicationData, srcs, fragment, true, dst)?
                else {
                    return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
                };
                trace!(fragment, produced, "application record sealed");
                Ok(self.result(EngineStatus::Ok, fragment, produced))
            }
            Phase::AwaitHello | Phase::DeriveKeys | Phase::AwaitFinished => {
                Ok(self.result(EngineStatus::Ok, 0, 0))
            }
        }
    }

    fn unwrap_record(
        &mut self,
        src: &[u8],
        dsts: &mut [&mut [u8]],
    ) -> Result<EngineResult, SealError> {
        if self.inbound_done {
            return Ok(self.result(EngineStatus::Closed, 0, 0));
        }
        if matches!(
            self.phase,
            Phase::SendHello | Phase::SendFinished | Phase::DeriveKeys
        ) {
            return Ok(self.result(EngineStatus::Ok, 0, 0));
        }

        let Some(record) = parse_record(src, self.config.max_body())? else {
            return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0));
        };
        let consumed = record.wire_len();

        match (record.header.content_type, self.phase) {
            (ContentType::Alert, _) => self.receive_alert(&record),
            (ContentType::Handshake, Phase::AwaitHello) => {
                let body = record.body;
                if body.len() != HELLO_LEN || body[0] != MSG_HELLO {
                    return Err(SealError::MalformedRecord("bad hello".into()));
                }
                let mut public = [0u8; X25519_PUBLIC_KEY_SIZE];
                public.copy_from_slice(&body[1..]);
                self.peer_public = Some(public);
                self.advance(Phase::DeriveKeys);
                Ok(self.result(EngineStatus::Ok, consumed, 0))
            }
            (ContentType::Handshake, Phase::AwaitFinished) => {
                self.open_into_scratch(&record)?;
                let verified = if self.scratch.len() != FINISHED_LEN
                    || self.scratch[0] != MSG_FINISHED
                {
                    Err(SealError::MalformedRecord("bad finished".into()))
                } else {
                    match &self.keys {
                        Some(keys) => keys.verify_peer_mac(&self.scratch[1..]),
                        None => Err(SealError::FinishedMismatch),
                    }
                };
                self.scratch.zeroize();
                verified?;
                self.read_protected = true;
                match self.config.role {
                    Role::Client => {
                        self.advance(Phase::SendFinished);
                        Ok(self.result(EngineStatus::Ok, consumed, 0))
                    }
                    Role::Server => {
                        self.advance(Phase::Established);
                        Ok(EngineResult::new(
                            EngineStatus::Ok,
                            HandshakeStatus::Finished,
                            consumed,
                            0,
                        ))
                    }
                }
            }
            (ContentType::ApplicationData, Phase::Established) => {
                let plaintext_len = record.body.len().saturating_sub(TAG_SIZE);
                let capacity: usize = dsts.iter().map(|dst| dst.len()).sum();
                if capacity < plaintext_len {
                    return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
                }
                self.open_into_scratch(&record)?;
                let produced = scatter(&self.scratch, dsts);
                self.scratch.zeroize();
                trace!(consumed, produced, "application record opened");
                Ok(self.result(EngineStatus::Ok, consumed, produced))
            }
            (content, _) => Err(self.unexpected(content)),
        }
    }

    fn receive_alert(&mut self, record: &Record<'_>) -> Result<EngineResult, SealError> {
        let consumed = record.wire_len();
        let alert = if self.read_protected {
            self.open_into_scratch(record)?;
            let alert = <[u8; 2]>::try_from(&self.scratch[..]);
            self.scratch.zeroize();
            alert
        } else {
            <[u8; 2]>::try_from(record.body)
        }
        .map_err(|_| SealError::MalformedRecord("bad alert".into()))?;

        match alert {
            [ALERT_WARNING, ALERT_CLOSE_NOTIFY] => {
                debug!(role = ?self.config.role, "close_notify received");
                self.close_notify_received = true;
                self.inbound_done = true;
                Ok(self.result(EngineStatus::Closed, consumed, 0))
            }
            [_, description] => Err(SealError::PeerAlert(description)),
        }
    }

    /// Decrypt a protected body into the scratch buffer.
    fn open_into_scratch(&mut self, record: &Record<'_>) -> Result<(), SealError> {
        let Some(split) = record.body.len().checked_sub(TAG_SIZE) else {
            return Err(SealError::DecryptionFailed);
        };
        let (ciphertext, tag) = record.body.split_at(split);
        let keys = self.keys.as_mut().ok_or(SealError::DecryptionFailed)?;
        self.scratch.clear();
        self.scratch.extend_from_slice(ciphertext);
        keys.read.open(record.header_bytes, &mut self.scratch, tag)
    }

    fn derive_keys(&mut self) -> Result<(), SealError> {
        let peer = self.peer_public.take().ok_or(SealError::InvalidPublicKey)?;
        let shared = self.ephemeral.agree(&peer)?;
        let local = self.ephemeral.public_bytes();
        let transcript = match self.config.role {
            Role::Client => transcript_hash(&local, &peer),
            Role::Server => transcript_hash(&peer, &local),
        };
        self.keys = Some(HandshakeKeys::derive(self.config.role, &shared, &transcript));
        self.advance(match self.config.role {
            Role::Client => Phase::AwaitFinished,
            Role::Server => Phase::SendHello,
        });
        Ok(())
    }
}

impl ProtocolEngine for SealEngine {
    fn wrap(&mut self, srcs: &[&[u8]], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        self.wrap_record(srcs, dst).map_err(|err| {
            self.fail(&err);
            err.into()
        })
    }

    fn unwrap(
        &mut self,
        src: &[u8],
        dsts: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        self.unwrap_record(src, dsts).map_err(|err| {
            self.fail(&err);
            err.into()
        })
    }

    fn run_delegated_task(&mut self) -> Result<(), EngineError> {
        if self.phase != Phase::DeriveKeys {
            trace!(phase = self.phase.name(), "no delegated task pending");
            return Ok(());
        }
        self.derive_keys().map_err(|err| {
            self.fail(&err);
            err.into()
        })
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.failed {
            HandshakeStatus::NotHandshaking
        } else {
            self.phase.status()
        }
    }

    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.phase == Phase::Established {
            return Err(SealError::Renegotiation.into());
        }
        Ok(())
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        if self.inbound_done {
            return Ok(());
        }
        self.inbound_done = true;
        if self.config.require_close_notify && !self.close_notify_received {
            return Err(SealError::Truncated.into());
        }
        Ok(())
    }

    fn close_outbound(&mut self) {
        if !self.outbound_done {
            self.close_pending = true;
        }
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }

    fn session(&self) -> SessionInfo {
        SessionInfo {
            protocol: PROTOCOL.to_string(),
            cipher_suite: CIPHER_SUITE.to_string(),
            packet_buffer_size: self.config.packet_size(),
            application_buffer_size: self.config.max_fragment,
        }
    }
}

impl fmt::Debug for SealEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealEngine")
            .field("role", &self.config.role)
            .field("phase", &self.phase)
            .field("inbound_done", &self.inbound_done)
            .field("outbound_done", &self.outbound_done)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Copy `src` across `dsts` in order, returning the bytes written.
fn scatter(src: &[u8], dsts: &mut [&mut [u8]]) -> usize {
    let mut written = 0;
    for dst in dsts.iter_mut() {
        if written == src.len() {
            break;
        }
        let take = dst.len().min(src.len() - written);
        dst[..take].copy_from_slice(&src[written..written + take]);
        written += take;
    }
    written
}
