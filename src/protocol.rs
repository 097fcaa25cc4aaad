//! Wire protocol spoken with the guest agent.
//!
//! The guest agent keeps one long-lived TCP connection open to the host
//! side. Both directions exchange fixed-size frames:
//!
//! ```text
//! ┌─────────────────┐        TCP, 4096-byte frames        ┌─────────────────┐
//! │   guestlink     │  ◄──────────────────────────────►   │   guest agent   │
//! │ (Bridge + HTTP) │    64-byte header + NUL-padded      │                 │
//! └─────────────────┘          text payload               └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - `frame` - encoding/decoding of the 4096-byte frame
//! - `commands` - command ids, labels and reply payloads

pub mod commands;
mod frame;

pub use commands::{CommandContext, CommandSpec, COMMANDS};
pub use frame::{decode, encode, FrameError, FrameHeader, FRAME_SIZE, HEADER_SIZE, MAX_PAYLOAD};
