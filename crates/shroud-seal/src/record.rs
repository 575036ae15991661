//! Record framing.
//!
//! Every unit on the wire is a record: a three byte header followed by the
//! body. The header doubles as the AEAD associated data for protected bodies,
//! so a record cannot be replayed under a different content type or length.

use crate::error::SealError;
use crate::{MAC_SIZE, X25519_PUBLIC_KEY_SIZE};

/// Record header size
pub const HEADER_SIZE: usize = 3;

/// Largest plaintext fragment a record may carry
pub const MAX_FRAGMENT: usize = 16384;

/// Handshake message: hello carrying an ephemeral public key
pub(crate) const MSG_HELLO: u8 = 1;

/// Handshake message: finished carrying the transcript MAC
pub(crate) const MSG_FINISHED: u8 = 20;

/// Hello body: message type and public key
pub(crate) const HELLO_LEN: usize = 1 + X25519_PUBLIC_KEY_SIZE;

/// Finished body before protection: message type and MAC
pub(crate) const FINISHED_LEN: usize = 1 + MAC_SIZE;

/// Largest handshake body before protection
pub(crate) const MAX_HANDSHAKE_BODY: usize = if HELLO_LEN > FINISHED_LEN {
    HELLO_LEN
} else {
    FINISHED_LEN
};

/// Alert level for a closure notification
pub(crate) const ALERT_WARNING: u8 = 1;

/// Alert description for a closure notification
pub(crate) const ALERT_CLOSE_NOTIFY: u8 = 0;

/// Record content types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    /// Closure notification or fatal alert
    Alert = 21,
    /// Hello and finished messages
    Handshake = 22,
    /// Protected application data
    ApplicationData = 23,
}

impl ContentType {
    /// Human-readable name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Handshake => "handshake",
            Self::ApplicationData => "application data",
        }
    }
}

impl TryFrom<u8> for ContentType {
    type Error = SealError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            21 => Ok(Self::Alert),
            22 => Ok(Self::Handshake),
            23 => Ok(Self::ApplicationData),
            other => Err(SealError::UnknownContentType(other)),
        }
    }
}

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Content type
    pub content_type: ContentType,
    /// Body length in bytes
    pub length: u16,
}

impl RecordHeader {
    /// Create a header
    #[must_use]
    pub fn new(content_type: ContentType, length: u16) -> Self {
        Self {
            content_type,
            length,
        }
    }

    /// Encode to wire format
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let [hi, lo] = self.length.to_be_bytes();
        [self.content_type as u8, hi, lo]
    }

    /// Decode the header at the front of `src`.
    ///
    /// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
    ///
    /// # Errors
    ///
    /// Returns `SealError::UnknownContentType` for an unrecognized type byte.
    pub fn decode(src: &[u8]) -> Result<Option<Self>, SealError> {
        let Some(bytes) = src.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let content_type = ContentType::try_from(bytes[0])?;
        let length = u16::from_be_bytes([bytes[1], bytes[2]]);
        Ok(Some(Self::new(content_type, length)))
    }

    /// Total record size including the header
    #[must_use]
    pub fn record_len(&self) -> usize {
        HEADER_SIZE + usize::from(self.length)
    }
}

/// A complete record borrowed from an input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Decoded header
    pub header: RecordHeader,
    /// Raw header bytes (associated data for protected bodies)
    pub header_bytes: &'a [u8],
    /// Body bytes
    pub body: &'a [u8],
}

impl Record<'_> {
    /// Bytes the record occupies in the input
    #[must_use]
    pub fn wire_len(&self) -> usize {
        self.header.record_len()
    }
}

/// Split the first complete record off `src`.
///
/// Returns `Ok(None)` until `src` holds the whole record.
///
/// # Errors
///
/// Returns `SealError::UnknownContentType` or `SealError::RecordTooLarge`
/// as soon as the header alone proves the record invalid.
pub fn parse_record(src: &[u8], max_body: usize) -> Result<Option<Record<'_>>, SealError> {
    let Some(header) = RecordHeader::decode(src)? else {
        return Ok(None);
    };
    let length = usize::from(header.length);
    if length > max_body {
        return Err(SealError::RecordTooLarge {
            length,
            max: max_body,
        });
    }
    let Some(record) = src.get(..header.record_len()) else {
        return Ok(None);
    };
    let (header_bytes, body) = record.split_at(HEADER_SIZE);
    Ok(Some(Record {
        header,
        header_bytes,
        body,
    }))
}
