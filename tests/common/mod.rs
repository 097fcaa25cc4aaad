//! Shared helpers: a bridge on an ephemeral port and a fake guest agent.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use guestlink::bridge::{self, Bridge, HookLauncher};
use guestlink::config::Profile;
use guestlink::protocol::{decode, encode, FrameHeader, FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Test timeout to prevent hanging tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a bridge accepting guest connections on 127.0.0.1.
pub async fn start_bridge(read_timeout: Duration) -> (Arc<Bridge>, SocketAddr) {
    let bridge = Arc::new(
        Bridge::new(Profile::default(), HookLauncher::disabled()).with_timeout(read_timeout),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(bridge::serve(Arc::clone(&bridge), listener));
    (bridge, addr)
}

/// Wait until `check` holds for the bridge.
pub async fn wait_until(bridge: &Bridge, check: impl Fn(&Bridge) -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !check(bridge) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

/// Fake guest agent end of the TCP connection.
pub struct Guest {
    pub stream: TcpStream,
}

impl Guest {
    /// Connect and wait until the bridge has made this connection current.
    pub async fn connect(bridge: &Bridge, addr: SocketAddr) -> Self {
        let before = bridge.connection_id();
        let stream = TcpStream::connect(addr).await.unwrap();
        wait_until(bridge, |b| {
            b.connection_id().is_some() && b.connection_id() != before
        })
        .await;
        Self { stream }
    }

    /// Read the next frame sent by the bridge.
    pub async fn recv(&mut self) -> (FrameHeader, String) {
        timeout(TEST_TIMEOUT, self.try_recv())
            .await
            .expect("No frame from bridge in time")
    }

    /// Read the next frame, however long it takes.
    pub async fn try_recv(&mut self) -> (FrameHeader, String) {
        let mut buf = vec![0u8; FRAME_SIZE];
        self.stream.read_exact(&mut buf).await.unwrap();
        let (header, payload) = decode(&buf).unwrap();
        (header, String::from_utf8_lossy(payload).into_owned())
    }

    /// Assert the bridge sends nothing for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        let mut buf = vec![0u8; FRAME_SIZE];
        let result = timeout(quiet, self.stream.read_exact(&mut buf)).await;
        assert!(result.is_err(), "Unexpected frame from bridge");
    }

    /// Answer `request` with a response frame carrying `payload`.
    pub async fn respond(&mut self, request: &FrameHeader, payload: &str) {
        self.respond_to(request.command_id, payload).await;
    }

    /// Send a response frame for `command_id`, solicited or not.
    pub async fn respond_to(&mut self, command_id: u32, payload: &str) {
        let header = FrameHeader::request(command_id, false, [0; 16]).reply(payload.len());
        self.send(&header, payload).await;
    }

    /// Send a guest-originated request.
    pub async fn request(&mut self, command_id: u32, needs_response: bool) {
        let header = FrameHeader::request(command_id, needs_response, [0x42; 16]);
        self.send(&header, "").await;
    }

    pub async fn send(&mut self, header: &FrameHeader, payload: &str) {
        let frame = encode(header, payload.as_bytes()).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }
}
