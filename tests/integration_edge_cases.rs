//! Failure paths: truncation, misconfigured peers, use after close.

use shroud_core::{Error, Progress};
use shroud_integration_tests::{
    QueueExecutor, connect, connect_with, finish_writes, pattern, read_to_eof,
};
use shroud_seal::{SealConfig, SealError};
use shroud_transport::MemoryConfig;

const PIPE: usize = 64 * 1024;

fn seal_error(err: &Error) -> &SealError {
    match err {
        Error::Engine(engine) => engine
            .get_ref()
            .downcast_ref::<SealError>()
            .expect("seal engine error"),
        other => panic!("expected an engine error, got {other}"),
    }
}

#[test]
fn test_truncated_stream_is_reported_once() {
    let executor = QueueExecutor::new();
    let pair = connect(executor, PIPE);
    pair.complete_handshake();
    assert_eq!(pair.client_to_server(b"partial"), b"partial");

    // Forced close: no closure notification, and none was received either
    let err = pair.client.close().unwrap_err();
    assert!(matches!(seal_error(&err), SealError::Truncated));

    let err = pair.server.read(&mut [0u8; 64]).unwrap_err();
    assert!(err.is_engine());
    assert!(matches!(seal_error(&err), SealError::Truncated));

    // The engine's inbound side is now done: plain end of stream from here on
    assert_eq!(pair.server.read(&mut [0u8; 64]).unwrap(), Progress::Eof);
}

#[test]
fn test_missing_close_notify_tolerated_when_configured() {
    let executor = QueueExecutor::new();
    let pair = connect_with(
        executor,
        MemoryConfig::default(),
        SealConfig::client().with_require_close_notify(false),
        SealConfig::server(),
    );
    pair.complete_handshake();

    let _ = pair.server.close();
    assert!(read_to_eof(&pair.client).is_empty());
}

#[test]
fn test_operations_after_close() {
    let executor = QueueExecutor::new();
    let pair = connect(executor, PIPE);
    pair.complete_handshake();
    finish_writes(&pair.client);
    finish_writes(&pair.server);
    assert!(read_to_eof(&pair.client).is_empty());
    pair.client.close().unwrap();

    assert_eq!(pair.client.read(&mut [0u8; 8]).unwrap(), Progress::Eof);
    assert!(matches!(pair.client.write(b"late"), Err(Error::Closed)));
    assert!(matches!(pair.client.flush(), Err(Error::Closed)));
    // Closing again does nothing
    pair.client.close().unwrap();
}

#[test]
fn test_write_after_half_close_fails() {
    let executor = QueueExecutor::new();
    let pair = connect(executor, PIPE);
    pair.complete_handshake();

    finish_writes(&pair.client);
    assert!(matches!(pair.client.write(b"late"), Err(Error::Closed)));
    // Flush keeps reporting completion
    assert!(pair.client.flush().unwrap());
}

#[test]
fn test_close_during_handshake_sends_plain_notification() {
    let executor = QueueExecutor::new();
    let pair = connect(executor, PIPE);

    // The hello goes out, then the client gives up before any reply
    assert!(!pair.client.flush().unwrap());
    finish_writes(&pair.client);

    let mut buf = [0u8; 16];
    let mut saw_eof = false;
    for _ in 0..16 {
        match pair.server.read(&mut buf).unwrap() {
            Progress::Eof => {
                saw_eof = true;
                break;
            }
            Progress::WouldBlock | Progress::Transferred(_) => {}
        }
    }
    assert!(saw_eof);
}

#[test]
fn test_oversized_record_fails_peer_engine() {
    let executor = QueueExecutor::new();
    let pair = connect_with(
        executor,
        MemoryConfig::default(),
        SealConfig::client(),
        SealConfig::server().with_max_fragment(4),
    );
    // Handshake records fit even the smallest fragment size
    pair.complete_handshake();

    let data = pattern(100);
    assert_eq!(pair.client.write(&data).unwrap(), Progress::Transferred(100));
    assert!(pair.client.flush().unwrap());

    let err = pair.server.read(&mut [0u8; 128]).unwrap_err();
    assert!(matches!(
        seal_error(&err),
        SealError::RecordTooLarge { length: 116, max: 49 }
    ));
}

#[test]
fn test_renegotiation_refused_after_handshake() {
    let executor = QueueExecutor::new();
    let pair = connect(executor, PIPE);
    pair.client.start_handshake().unwrap();
    pair.complete_handshake();

    let err = pair.client.start_handshake().unwrap_err();
    assert!(matches!(seal_error(&err), SealError::Renegotiation));
    // The session stays usable
    assert_eq!(pair.client_to_server(b"still here"), b"still here");
}

#[test]
fn test_shutdown_reads_without_notification() {
    let executor = QueueExecutor::new();
    let pair = connect(executor, PIPE);
    pair.complete_handshake();

    let err = pair.server.shutdown_reads().unwrap_err();
    assert!(matches!(seal_error(&err), SealError::Truncated));
    assert_eq!(pair.server.read(&mut [0u8; 8]).unwrap(), Progress::Eof);
}
