//! Growable byte buffers with an explicit compact discipline.
//!
//! Each channel owns three [`ByteBuf`]s:
//!
//! - **receive**: ciphertext read from the transport, not yet consumed by the engine
//! - **send**: ciphertext produced by the engine, not yet written to the transport
//! - **decrypted-read**: plaintext the caller had no room for on a previous read
//!
//! A buffer tracks a readable window `head..tail` and an appendable window
//! `tail..capacity`. Consuming from the front advances `head`; appending at the
//! back advances `tail`. [`ByteBuf::compact`] is the transition that moves the
//! readable bytes to offset 0 so the whole remainder becomes appendable. When the
//! last readable byte is consumed both indices reset to 0, so an empty buffer is
//! always fully appendable.
//!
//! Buffers start with zero capacity and only ever grow. Growth is driven by the
//! engine's advertised sizes; a request to grow a buffer that already meets the
//! requirement means the engine is misbehaving and fails with
//! [`ProtocolViolation::BufferTooSmall`] instead of looping.

use crate::error::ProtocolViolation;
use std::fmt;

/// Identifies one of the channel's buffers in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Ciphertext staging area for unwrap
    Receive,
    /// Ciphertext target area for wrap
    Send,
    /// Plaintext overflow area for reads
    Read,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive => f.write_str("receive"),
            Self::Send => f.write_str("send"),
            Self::Read => f.write_str("decrypted-read"),
        }
    }
}

/// Growable byte buffer with a readable window and an appendable window.
pub struct ByteBuf {
    kind: BufferKind,
    storage: Vec<u8>,
    head: usize,
    tail: usize,
}

impl ByteBuf {
    /// Create an empty, zero-capacity buffer
    #[must_use]
    pub const fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            storage: Vec::new(),
            head: 0,
            tail: 0,
        }
    }

    /// Create a buffer with an initial capacity
    #[must_use]
    pub fn with_capacity(kind: BufferKind, capacity: usize) -> Self {
        Self {
            kind,
            storage: vec![0; capacity],
            head: 0,
            tail: 0,
        }
    }

    /// Which buffer this is
    #[must_use]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Total capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of readable bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    /// Check if there is nothing to read
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Check if the readable window covers the entire capacity.
    ///
    /// A zero-capacity buffer is both empty and full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.head == 0 && self.tail == self.storage.len()
    }

    /// Readable bytes
    #[must_use]
    pub fn readable(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    /// Appendable space
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.tail..]
    }

    /// Number of appendable bytes without compacting
    #[must_use]
    pub fn spare_len(&self) -> usize {
        self.storage.len() - self.tail
    }

    /// Readable window and appendable space at once
    pub fn split_mut(&mut self) -> (&[u8], &mut [u8]) {
        let (front, back) = self.storage.split_at_mut(self.tail);
        (&front[self.head..], back)
    }

    /// Mark `n` bytes of the appendable space as written
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.spare_len(), "commit past capacity");
        self.tail = (self.tail + n).min(self.storage.len());
    }

    /// Drop `n` bytes from the front of the readable window
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consume past readable window");
        self.head = (self.head + n).min(self.tail);
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Move readable bytes to offset 0, maximizing appendable space
    pub fn compact(&mut self) {
        if self.head > 0 {
            self.storage.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }
    }

    /// Grow to exactly `required` bytes, preserving unread content.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::BufferTooSmall`] if the capacity already
    /// meets `required`: growing again would not change anything.
    pub fn grow_to(&mut self, required: usize) -> Result<(), ProtocolViolation> {
        let capacity = self.storage.len();
        if capacity >= required {
            return Err(ProtocolViolation::BufferTooSmall {
                buffer: self.kind,
                capacity,
                required,
            });
        }

        let mut storage = vec![0; required];
        let len = self.len();
        storage[..len].copy_from_slice(self.readable());
        self.storage = storage;
        self.head = 0;
        self.tail = len;

        tracing::debug!(buffer = %self.kind, from = capacity, to = required, "grew buffer");
        Ok(())
    }

    /// Copy readable bytes into `dsts` in order, filling each before the next.
    ///
    /// Returns the number of bytes delivered.
    pub fn drain_into(&mut self, dsts: &mut [&mut [u8]]) -> usize {
        let mut delivered = 0;
        for dst in dsts.iter_mut() {
            if self.is_empty() {
                break;
            }
            let n = dst.len().min(self.len());
            dst[..n].copy_from_slice(&self.storage[self.head..self.head + n]);
            self.consume(n);
            delivered += n;
        }
        delivered
    }

    /// Discard content and free the storage
    pub fn release(&mut self) {
        self.storage = Vec::new();
        self.head = 0;
        self.tail = 0;
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("head", &self.head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filled(kind: BufferKind, capacity: usize, data: &[u8]) -> ByteBuf {
        let mut buf = ByteBuf::with_capacity(kind, capacity);
        buf.spare_mut()[..data.len()].copy_from_slice(data);
        buf.commit(data.len());
        buf
    }

    #[test]
    fn test_new_buffer_is_empty_and_full() {
        let buf = ByteBuf::new(BufferKind::Receive);
        assert!(buf.is_empty());
        assert!(buf.is_full());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn test_commit_and_consume() {
        let mut buf = filled(BufferKind::Receive, 8, b"abcde");
        assert_eq!(buf.readable(), b"abcde");
        assert_eq!(buf.spare_len(), 3);

        buf.consume(2);
        assert_eq!(buf.readable(), b"cde");
        assert!(!buf.is_full());

        buf.consume(3);
        assert!(buf.is_empty());
        assert_eq!(buf.spare_len(), 8, "empty buffer resets to fully appendable");
    }

    #[test]
    fn test_compact_moves_readable_to_front() {
        let mut buf = filled(BufferKind::Receive, 6, b"abcdef");
        buf.consume(4);
        assert_eq!(buf.spare_len(), 0);

        buf.compact();
        assert_eq!(buf.readable(), b"ef");
        assert_eq!(buf.spare_len(), 4);
    }

    #[test]
    fn test_grow_preserves_unread_content() {
        let mut buf = filled(BufferKind::Receive, 4, b"wxyz");
        buf.consume(1);
        buf.grow_to(16).unwrap();
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.readable(), b"xyz");
        assert_eq!(buf.spare_len(), 13);
    }

    #[test]
    fn test_grow_at_required_size_is_violation() {
        let mut buf = ByteBuf::with_capacity(BufferKind::Send, 32);
        let err = buf.grow_to(32).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::BufferTooSmall {
                buffer: BufferKind::Send,
                capacity: 32,
                required: 32,
            }
        );
        assert_eq!(buf.capacity(), 32);
    }

    #[test]
    fn test_drain_into_scatters_in_order() {
        let mut buf = filled(BufferKind::Read, 8, b"abcdefg");
        let mut a = [0u8; 3];
        let mut b = [0u8; 2];
        let delivered = buf.drain_into(&mut [&mut a[..], &mut b[..]]);
        assert_eq!(delivered, 5);
        assert_eq!(&a, b"abc");
        assert_eq!(&b, b"de");
        assert_eq!(buf.readable(), b"fg");
    }

    #[test]
    fn test_release_frees_storage() {
        let mut buf = filled(BufferKind::Send, 8, b"abc");
        buf.release();
        assert_eq!(buf.capacity(), 0);
        assert!(buf.is_empty());
    }

    proptest! {
        /// Capacity never shrinks, and growth stops at the advertised requirement
        #[test]
        fn growth_is_monotonic_and_bounded(
            requests in prop::collection::vec(0usize..4096, 1..32),
        ) {
            let mut buf = ByteBuf::new(BufferKind::Receive);
            for required in requests {
                let before = buf.capacity();
                match buf.grow_to(required) {
                    Ok(()) => {
                        prop_assert!(before < required);
                        prop_assert_eq!(buf.capacity(), required);
                    }
                    Err(ProtocolViolation::BufferTooSmall { capacity, .. }) => {
                        prop_assert!(before >= required);
                        prop_assert_eq!(capacity, before);
                        prop_assert_eq!(buf.capacity(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }
        }

        /// Readable content survives any interleaving of compaction and growth
        #[test]
        fn content_survives_compact_and_grow(
            data in prop::collection::vec(any::<u8>(), 1..64),
            consumed in 0usize..64,
            extra in 1usize..128,
        ) {
            let mut buf = filled(BufferKind::Receive, data.len(), &data);
            let consumed = consumed.min(data.len());
            buf.consume(consumed);
            buf.compact();
            let _ = buf.grow_to(data.len() + extra);
            prop_assert_eq!(buf.readable(), &data[consumed..]);
        }
    }
}
