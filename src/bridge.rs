//! Protocol bridge between HTTP callers and the guest connection.
//!
//! A [`Bridge`] owns all shared protocol state: the current connection, the
//! pending wait, the transaction lock and the one-shot hook. It is shared
//! behind an `Arc` by the accept loop, every read loop and the HTTP layer.
//!
//! # Transactions
//!
//! - `read` - send a request that needs a response, then wait up to 15s
//!   for the response frame carrying the same command id
//! - `write` - send a request that needs no response, return immediately
//!
//! Both take the transaction lock, so reads never interleave and a write
//! cannot slip between a read's registration and its frame emission.
//! Replies to guest-originated requests are sent from the read loop and do
//! not take the transaction lock.

pub mod connection;
pub mod correlation;
mod hook;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, Profile};
use crate::identity::Identity;
use crate::protocol::commands::{self, CommandContext, GUEST_SHUTDOWN};
use crate::protocol::{decode, encode, FrameHeader};

pub use connection::{run_connection, serve, Connection};
use connection::ConnectionSlot;
use correlation::{PendingWait, WaitError};
pub use hook::HookLauncher;

/// How long a read waits for its response.
pub const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// User-visible bridge failures.
///
/// The `Display` text is what HTTP callers see as `message`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid command ID")]
    InvalidCommand,

    #[error("No active guest connection")]
    NotConnected,

    #[error("Failed to send command")]
    Send,

    #[error("Received no response")]
    Timeout,

    #[error("Guest connection lost")]
    ConnectionLost,

    #[error("Received response for a different command")]
    Mismatch,

    #[error("Received no data")]
    NoData,
}

/// Shared protocol state for one guest.
pub struct Bridge {
    profile: Profile,
    identity: Identity,
    pub(crate) connections: ConnectionSlot,
    pub(crate) pending: PendingWait,
    transaction: tokio::sync::Mutex<()>,
    hook: HookLauncher,
    timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Bridge {
    pub fn new(profile: Profile, hook: HookLauncher) -> Self {
        let identity = Identity::new(&profile);
        let (shutdown, _) = watch::channel(false);

        Self {
            profile,
            identity,
            connections: ConnectionSlot::default(),
            pending: PendingWait::new(),
            transaction: tokio::sync::Mutex::new(()),
            hook,
            timeout: READ_TIMEOUT,
            shutdown,
        }
    }

    /// Bridge for the binary: profile from `config`, hook beside the executable.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.profile.clone(),
            HookLauncher::beside_executable(&config.hook),
        )
    }

    /// Override the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn hook(&self) -> &HookLauncher {
        &self.hook
    }

    pub fn is_connected(&self) -> bool {
        self.connections.current().is_some()
    }

    /// Generation id of the current connection, if any.
    pub fn connection_id(&self) -> Option<u64> {
        self.connections.current().map(|conn| conn.id())
    }

    /// Command id the bridge is waiting on, 0 when idle.
    pub fn waiting_for(&self) -> u32 {
        self.pending.waiting_for()
    }

    /// Ask every loop owned by this bridge to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once `shutdown` has been called.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Send `command_id` and wait for the guest's response.
    ///
    /// Returns the response payload, or `None` for the shutdown command,
    /// whose response is expected to carry nothing.
    ///
    /// # Errors
    ///
    /// - `InvalidCommand` for command id 0
    /// - `NotConnected` when no guest is connected; nothing is sent
    /// - `Send` when writing the frame fails
    /// - `Timeout` when no matching response arrives in time
    /// - `ConnectionLost` when the connection drops while waiting
    /// - `NoData` when the response payload is empty
    pub async fn read(&self, command_id: u32) -> Result<Option<String>, BridgeError> {
        if command_id == 0 {
            return Err(BridgeError::InvalidCommand);
        }

        let _transaction = self.transaction.lock().await;
        let connection = self.connections.current().ok_or(BridgeError::NotConnected)?;

        info!("Reading command: {} ({})", command_id, commands::label(command_id));
        let mut wait = self.pending.register(command_id, connection.id());
        self.send_request(&connection, command_id, true).await?;

        let delivery = match wait.wait(self.timeout).await {
            Ok(delivery) => delivery,
            Err(WaitError::Timeout) => {
                warn!(
                    "Timed out reading command {} from guest after {:?}",
                    command_id, self.timeout
                );
                return Err(BridgeError::Timeout);
            }
            Err(WaitError::Cancelled) => return Err(BridgeError::ConnectionLost),
        };
        drop(wait);

        if delivery.command_id != command_id {
            return Err(BridgeError::Mismatch);
        }
        if command_id == GUEST_SHUTDOWN {
            return Ok(None);
        }
        if delivery.payload.is_empty() {
            warn!("Received no data for command {}", command_id);
            return Err(BridgeError::NoData);
        }
        Ok(Some(delivery.payload))
    }

    /// Send `command_id` without waiting for any reply.
    ///
    /// # Errors
    ///
    /// `InvalidCommand`, `NotConnected` or `Send`, as for `read`.
    pub async fn write(&self, command_id: u32) -> Result<(), BridgeError> {
        if command_id == 0 {
            return Err(BridgeError::InvalidCommand);
        }

        let _transaction = self.transaction.lock().await;
        let connection = self.connections.current().ok_or(BridgeError::NotConnected)?;

        info!("Sending command: {} ({})", command_id, commands::label(command_id));
        self.send_request(&connection, command_id, false).await
    }

    async fn send_request(
        &self,
        connection: &Connection,
        command_id: u32,
        needs_response: bool,
    ) -> Result<(), BridgeError> {
        let header = FrameHeader::request(command_id, needs_response, self.identity.peer_id());
        let frame = encode(&header, &[]).map_err(|_| BridgeError::Send)?;

        connection.send(&frame).await.map_err(|e| {
            warn!(
                "Failed sending command {} to {}: {}",
                command_id,
                connection.peer(),
                e
            );
            BridgeError::Send
        })
    }

    /// Handle one inbound frame read from `connection`.
    pub(crate) async fn handle_frame(&self, connection: &Connection, buf: &[u8]) {
        let (header, raw) = match decode(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Error on decode: {}", e);
                return;
            }
        };
        let payload = payload_text(raw);

        debug!(
            "Command: {} ({}) request={} response={} need_response={}",
            header.command_id,
            commands::label(header.command_id),
            header.is_request,
            header.is_response,
            header.needs_response
        );
        if !payload.is_empty() {
            debug!("Info: {}", payload);
        }

        if header.is_request {
            self.answer_request(connection, &header).await;
        } else if header.is_response {
            let waiting_for = self.pending.waiting_for();
            if self.pending.deliver(header.command_id, payload) {
                debug!("Delivered response for command {}", header.command_id);
            } else {
                debug!(
                    "Unsolicited response for command {} (waiting for {})",
                    header.command_id, waiting_for
                );
            }
        } else {
            debug!("Ignoring frame without request or response flag");
        }
    }

    async fn answer_request(&self, connection: &Connection, header: &FrameHeader) {
        let ctx = CommandContext {
            profile: &self.profile,
            identity: &self.identity,
        };
        let Some(reply) = commands::dispatch(header.command_id, &ctx) else {
            warn!("No handler for command {}", header.command_id);
            return;
        };

        if commands::is_uuid_command(header.command_id) && self.hook.fire_once() {
            debug!("Helper script triggered by command {}", header.command_id);
        }

        if !header.needs_response {
            return;
        }

        debug!("Response data: {}", reply);
        let frame = match encode(&header.reply(reply.len()), reply.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot answer command {}: {}", header.command_id, e);
                return;
            }
        };
        if let Err(e) = connection.send(&frame).await {
            warn!(
                "Failed answering command {} to {}: {}",
                header.command_id,
                connection.peer(),
                e
            );
        }
    }
}

/// Text of a payload with NUL padding removed.
fn payload_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace('\0', "")
}
