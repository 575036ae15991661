//! Fuzz target for the buffer discipline
//!
//! Applies arbitrary commit/consume/compact/grow sequences and checks the
//! readable window never exceeds capacity.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shroud_core::{BufferKind, ByteBuf};

#[derive(Debug, Arbitrary)]
enum Op {
    Commit(u16),
    Consume(u16),
    Compact,
    GrowTo(u16),
    Drain(u8),
}

fuzz_target!(|ops: Vec<Op>| {
    let mut buf = ByteBuf::new(BufferKind::Receive);
    for op in ops {
        match op {
            Op::Commit(n) => {
                let n = usize::from(n).min(buf.spare_len());
                buf.spare_mut()[..n].fill(0xA5);
                buf.commit(n);
            }
            Op::Consume(n) => buf.consume(usize::from(n).min(buf.len())),
            Op::Compact => buf.compact(),
            Op::GrowTo(n) => {
                let _ = buf.grow_to(usize::from(n));
            }
            Op::Drain(n) => {
                let mut out = vec![0u8; usize::from(n)];
                buf.drain_into(&mut [&mut out[..]]);
            }
        }
        assert!(buf.len() <= buf.capacity());
        assert!(buf.readable().iter().all(|&b| b == 0xA5));
    }
});
