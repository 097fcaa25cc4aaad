//! Integration tests for the bridge against a fake guest agent over TCP.
//!
//! # Running
//!
//! ```bash
//! cargo test --test bridge_integration -- --nocapture
//! ```

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{start_bridge, wait_until, Guest, TEST_TIMEOUT};
use guestlink::bridge::{BridgeError, READ_TIMEOUT};
use guestlink::protocol::commands::{
    GUEST_POWER, GUEST_SHUTDOWN, GUEST_UUID, HOST_SN, HOST_VERSION, UPDATE_DEADLINE, VM_VERSION,
};
use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

const VM_VERSION_JSON: &str =
    r#"{"id":"Virtualization","name":"Virtual Machine Manager","timestamp":1679863686,"version":"2.6.1-12139"}"#;

/// Test: write sends a request that needs no response and returns at once.
#[tokio::test]
async fn test_write_is_fire_and_forget() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    timeout(TEST_TIMEOUT, bridge.write(GUEST_POWER))
        .await
        .expect("write should not wait for a reply")
        .expect("write should succeed");

    let (header, payload) = guest.recv().await;
    assert_eq!(header.command_id, GUEST_POWER);
    assert!(header.is_request);
    assert!(!header.is_response);
    assert!(!header.needs_response);
    assert_eq!(header.sub_command, 1);
    assert_eq!(header.peer_id, bridge.identity().peer_id());
    assert_eq!(payload, "");
    assert_eq!(bridge.waiting_for(), 0);
}

/// Test: read returns the payload of the matching response.
#[tokio::test]
async fn test_read_returns_matching_response() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };

    let (header, _) = guest.recv().await;
    assert_eq!(header.command_id, VM_VERSION);
    assert!(header.is_request);
    assert!(header.needs_response);
    assert_eq!(bridge.waiting_for(), VM_VERSION);

    guest.respond(&header, VM_VERSION_JSON).await;

    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    assert_eq!(result, Ok(Some(VM_VERSION_JSON.to_string())));
    assert_eq!(bridge.waiting_for(), 0);
}

/// Test: read with no guest connected fails at once.
#[tokio::test]
async fn test_read_without_connection() {
    let (bridge, _addr) = start_bridge(READ_TIMEOUT).await;

    let result = timeout(TEST_TIMEOUT, bridge.read(GUEST_UUID)).await.unwrap();
    assert_eq!(result, Err(BridgeError::NotConnected));
}

/// Test: an empty shutdown response is a success with no data.
#[tokio::test]
async fn test_shutdown_response_without_payload() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(GUEST_SHUTDOWN).await })
    };

    let (header, _) = guest.recv().await;
    assert_eq!(header.command_id, GUEST_SHUTDOWN);
    guest.respond(&header, "").await;

    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    assert_eq!(result, Ok(None));
}

/// Test: an empty payload for any other command is an error.
#[tokio::test]
async fn test_empty_response_is_no_data() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };

    let (header, _) = guest.recv().await;
    guest.respond(&header, "").await;

    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    assert_eq!(result, Err(BridgeError::NoData));
}

/// Test: a read that never gets its response times out and clears the wait.
#[tokio::test]
async fn test_read_timeout_clears_wait() {
    let read_timeout = Duration::from_millis(300);
    let (bridge, addr) = start_bridge(read_timeout).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let started = Instant::now();
    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };
    let (header, _) = guest.recv().await;

    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    let elapsed = started.elapsed();
    assert_eq!(result, Err(BridgeError::Timeout));
    assert!(elapsed >= read_timeout, "timed out too early: {:?}", elapsed);
    assert!(elapsed < read_timeout + Duration::from_secs(2), "timed out too late: {:?}", elapsed);
    assert_eq!(bridge.waiting_for(), 0);

    // A late response must not complete anything.
    guest.respond(&header, VM_VERSION_JSON).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.waiting_for(), 0);

    // The connection is still usable afterwards.
    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(HOST_VERSION).await })
    };
    let (header, _) = guest.recv().await;
    assert_eq!(header.command_id, HOST_VERSION);
    guest.respond(&header, r#"{"buildnumber":1,"smallfixnumber":0}"#).await;

    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    assert_eq!(
        result,
        Ok(Some(r#"{"buildnumber":1,"smallfixnumber":0}"#.to_string()))
    );
}

/// Test: a response for another command does not satisfy or break the wait.
#[tokio::test]
async fn test_unrelated_response_is_ignored() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };
    let (header, _) = guest.recv().await;

    guest.respond_to(HOST_VERSION, r#"{"wrong":true}"#).await;
    guest.respond_to(0, "sentinel").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.waiting_for(), VM_VERSION);
    assert!(!reader.is_finished());

    guest.respond(&header, VM_VERSION_JSON).await;
    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    assert_eq!(result, Ok(Some(VM_VERSION_JSON.to_string())));
}

/// Test: concurrent reads are serialized; the second frame goes out only
/// after the first transaction completes.
#[tokio::test]
async fn test_concurrent_reads_are_serialized() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let first = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };
    let (first_header, _) = guest.recv().await;
    assert_eq!(first_header.command_id, VM_VERSION);

    let second = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(HOST_VERSION).await })
    };

    // The second read is blocked on the transaction lock.
    guest.expect_silence(Duration::from_millis(200)).await;
    assert_eq!(bridge.waiting_for(), VM_VERSION);

    guest.respond(&first_header, VM_VERSION_JSON).await;
    let (second_header, _) = guest.recv().await;
    assert_eq!(second_header.command_id, HOST_VERSION);
    guest.respond(&second_header, r#"{"buildnumber":2}"#).await;

    let first = timeout(TEST_TIMEOUT, first).await.unwrap().unwrap();
    let second = timeout(TEST_TIMEOUT, second).await.unwrap().unwrap();
    assert_eq!(first, Ok(Some(VM_VERSION_JSON.to_string())));
    assert_eq!(second, Ok(Some(r#"{"buildnumber":2}"#.to_string())));
}

/// Test: a write waits for an in-flight read to finish.
#[tokio::test]
async fn test_write_waits_for_pending_read() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };
    let (read_header, _) = guest.recv().await;

    let writer = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.write(GUEST_POWER).await })
    };
    guest.expect_silence(Duration::from_millis(200)).await;

    guest.respond(&read_header, VM_VERSION_JSON).await;
    let (write_header, _) = guest.recv().await;
    assert_eq!(write_header.command_id, GUEST_POWER);

    assert!(timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap().is_ok());
    assert_eq!(timeout(TEST_TIMEOUT, writer).await.unwrap().unwrap(), Ok(()));
}

/// Test: guest requests that need a response are answered from the table.
#[tokio::test]
async fn test_guest_request_is_answered() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    guest.request(HOST_SN, true).await;
    let (header, payload) = guest.recv().await;
    assert_eq!(header.command_id, HOST_SN);
    assert!(header.is_response);
    assert!(!header.is_request);
    assert_eq!(header.peer_id, [0x42; 16]);
    assert_eq!(payload, "0000000000000");
    assert_eq!(header.response_length as usize, payload.len());

    guest.request(UPDATE_DEADLINE, true).await;
    let (header, payload) = guest.recv().await;
    assert_eq!(header.command_id, UPDATE_DEADLINE);
    assert_eq!(payload, i64::MAX.to_string());
}

/// Test: requests without need-response and unknown commands get no reply.
#[tokio::test]
async fn test_no_reply_for_unknown_or_unneeded() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    guest.request(HOST_SN, false).await;
    guest.request(99, true).await;
    guest.request(UPDATE_DEADLINE, true).await;

    // The first frame back answers the last request.
    let (header, _) = guest.recv().await;
    assert_eq!(header.command_id, UPDATE_DEADLINE);
    guest.expect_silence(Duration::from_millis(100)).await;
}

/// Test: answering a UUID query triggers the helper hook exactly once.
#[tokio::test]
async fn test_uuid_query_fires_hook_once() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;
    assert!(!bridge.hook().has_fired());

    guest.request(GUEST_UUID, true).await;
    let (_, payload) = guest.recv().await;
    assert_eq!(payload, bridge.identity().guest_uuid().to_string());
    assert!(bridge.hook().has_fired());

    guest.request(GUEST_UUID, true).await;
    let (_, again) = guest.recv().await;
    assert_eq!(again, payload);
}

/// Test: a new connection supersedes the old one for outbound frames.
#[tokio::test]
async fn test_new_connection_replaces_current() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut old = Guest::connect(&bridge, addr).await;
    let first_id = bridge.connection_id();
    let mut new = Guest::connect(&bridge, addr).await;
    assert_ne!(bridge.connection_id(), first_id);

    bridge.write(GUEST_POWER).await.expect("write should succeed");
    let (header, _) = new.recv().await;
    assert_eq!(header.command_id, GUEST_POWER);
    old.expect_silence(Duration::from_millis(100)).await;

    // The superseded connection still answers its own requests.
    old.request(HOST_SN, true).await;
    let (header, _) = old.recv().await;
    assert_eq!(header.command_id, HOST_SN);

    // Its exit does not drop the current connection.
    let current = bridge.connection_id();
    drop(old);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bridge.connection_id(), current);
}

/// Test: a short frame followed by EOF tears the connection down.
#[tokio::test]
async fn test_short_frame_closes_connection() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    guest.stream.write_all(&[1u8; 100]).await.unwrap();
    guest.stream.shutdown().await.unwrap();
    wait_until(&bridge, |b| !b.is_connected()).await;

    assert_eq!(bridge.write(GUEST_POWER).await, Err(BridgeError::NotConnected));
}

/// Test: losing the connection ends a pending read without waiting for the timeout.
#[tokio::test]
async fn test_connection_loss_ends_pending_read() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let mut guest = Guest::connect(&bridge, addr).await;

    let reader = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.read(VM_VERSION).await })
    };
    let _ = guest.recv().await;
    drop(guest);

    let result = timeout(TEST_TIMEOUT, reader).await.unwrap().unwrap();
    assert_eq!(result, Err(BridgeError::ConnectionLost));
    assert_eq!(bridge.waiting_for(), 0);
}

/// Test: shutdown stops accepting and closes open connections.
#[tokio::test]
async fn test_shutdown_closes_connections() {
    let (bridge, addr) = start_bridge(READ_TIMEOUT).await;
    let _guest = Guest::connect(&bridge, addr).await;

    bridge.shutdown();
    wait_until(&bridge, |b| !b.is_connected()).await;
}
