//! Guest and cluster identity values.
//!
//! Both UUIDs are content-addressed: SHA-256 over a fixed prefix followed by
//! the configured serial number, truncated to 16 bytes and stamped as a
//! version 8 (custom) UUID. An explicit UUID from the profile wins over
//! derivation. Values are computed on first use and cached for the lifetime
//! of the `Identity`.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Profile;

/// Prefix hashed in front of the guest serial number.
pub const GUEST_PREFIX: &str = "guestlink:guest:";

/// Prefix hashed in front of the host serial number.
pub const CLUSTER_PREFIX: &str = "guestlink:cluster:";

/// Derive a UUID from `prefix || serial`.
pub fn derive_uuid(prefix: &str, serial: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(serial.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    // Version 8, RFC 4122 variant.
    bytes[6] = (bytes[6] & 0x0f) | 0x80;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Lazily computed guest and cluster UUIDs for one profile.
#[derive(Debug)]
pub struct Identity {
    guest_sn: String,
    host_sn: String,
    guest: OnceLock<Uuid>,
    cluster: OnceLock<Uuid>,
}

impl Identity {
    pub fn new(profile: &Profile) -> Self {
        let guest = OnceLock::new();
        if let Some(uuid) = profile.guest_uuid {
            let _ = guest.set(uuid);
        }
        let cluster = OnceLock::new();
        if let Some(uuid) = profile.cluster_uuid {
            let _ = cluster.set(uuid);
        }

        Self {
            guest_sn: profile.guest_sn.to_uppercase(),
            host_sn: profile.host_sn.to_uppercase(),
            guest,
            cluster,
        }
    }

    /// Guest UUID, derived from the guest serial on first call.
    pub fn guest_uuid(&self) -> Uuid {
        *self
            .guest
            .get_or_init(|| derive_uuid(GUEST_PREFIX, &self.guest_sn))
    }

    /// Cluster UUID, derived from the host serial on first call.
    pub fn cluster_uuid(&self) -> Uuid {
        *self
            .cluster
            .get_or_init(|| derive_uuid(CLUSTER_PREFIX, &self.host_sn))
    }

    /// Guest UUID bytes as carried in the frame header.
    pub fn peer_id(&self) -> [u8; 16] {
        *self.guest_uuid().as_bytes()
    }
}
