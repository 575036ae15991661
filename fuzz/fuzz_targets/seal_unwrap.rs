//! Fuzz target for the seal engine's inbound path
//!
//! Feeds arbitrary ciphertext to a server engine (awaiting a hello) and to a
//! client engine mid-handshake. Errors are expected; panics are not.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_core::{EngineStatus, ProtocolEngine};
use shroud_seal::{SealConfig, SealEngine};

fn feed(engine: &mut SealEngine, mut data: &[u8]) {
    let mut out = vec![0u8; 16384];
    while !data.is_empty() {
        match engine.unwrap(data, &mut [&mut out[..]]) {
            Ok(result) if result.status == EngineStatus::Ok && result.consumed > 0 => {
                data = &data[result.consumed..];
                let _ = engine.run_delegated_task();
            }
            _ => break,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(mut server) = SealEngine::new(SealConfig::server()) {
        feed(&mut server, data);
    }

    if let Ok(mut client) = SealEngine::new(SealConfig::client()) {
        let mut hello = vec![0u8; 64];
        if client.wrap(&[], &mut hello).is_ok() {
            feed(&mut client, data);
        }
    }
});
