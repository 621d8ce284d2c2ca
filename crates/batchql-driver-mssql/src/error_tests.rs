//! Tests for tiberius error mapping

use crate::error::map_error;
use batchql_core::DriverError;
use tiberius::error::Error;

#[test]
fn test_io_error_keeps_kind() {
    let err = map_error(Error::Io {
        kind: std::io::ErrorKind::ConnectionReset,
        message: "reset by peer".to_string(),
    });
    match err {
        DriverError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::ConnectionReset),
        other => panic!("expected Io, got {:?}", other),
    }
}

#[test]
fn test_routing_is_a_connection_error() {
    let err = map_error(Error::Routing {
        host: "node7.example".to_string(),
        port: 11000,
    });
    assert!(matches!(err, DriverError::Connection(ref msg) if msg.contains("node7.example:11000")));
    assert!(err.breaks_connection());
}

#[test]
fn test_protocol_error_is_other() {
    let err = map_error(Error::Protocol("unexpected token".into()));
    assert!(matches!(err, DriverError::Other(ref msg) if msg.contains("unexpected token")));
}
