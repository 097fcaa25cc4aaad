//! guestlink library
//!
//! Host side of the fixed-frame guest agent control protocol, plus the HTTP
//! facade that lets external callers read from and write to the guest:
//!
//! - `protocol` - 4096-byte frame codec and the command table
//! - `bridge` - connection management, request/response correlation
//! - `http` - axum router exposing `/read` and `/write`
//! - `identity` - deterministic guest/cluster UUIDs
//! - `config` - command-line and environment configuration
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use guestlink::bridge::{self, Bridge, HookLauncher};
//! use guestlink::config::Profile;
//!
//! let bridge = Arc::new(Bridge::new(Profile::default(), HookLauncher::disabled()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:12345").await?;
//! tokio::spawn(bridge::serve(Arc::clone(&bridge), listener));
//!
//! let version = bridge.read(8).await?;
//! ```

pub mod bridge;
pub mod config;
pub mod http;
pub mod identity;
pub mod protocol;
