//! Process configuration.
//!
//! Every value can come from a command-line flag or a `GUESTLINK_*`
//! environment variable. Network addresses live on [`Config`]; the values
//! reported to the guest live on the flattened [`Profile`].

use std::path::PathBuf;

use clap::{Args, Parser};
use uuid::Uuid;

/// Default file name of the helper script run beside the executable.
pub const DEFAULT_HOOK_NAME: &str = "guestlink-hook";

/// Top-level configuration for the `guestlink` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "guestlink")]
#[command(about = "Host-side bridge for the guest agent control protocol")]
#[command(version)]
pub struct Config {
    /// Listen address for guest agent connections.
    #[arg(long, env = "GUESTLINK_ADDR", default_value = "0.0.0.0:12345")]
    pub addr: String,

    /// Listen address for the HTTP API.
    #[arg(long, env = "GUESTLINK_API", default_value = "0.0.0.0:2210")]
    pub api: String,

    /// File name of the helper script run once on the first UUID query.
    ///
    /// Resolved relative to the directory holding the executable.
    #[arg(long, env = "GUESTLINK_HOOK", default_value = DEFAULT_HOOK_NAME)]
    pub hook: PathBuf,

    #[command(flatten)]
    pub profile: Profile,
}

/// Identity and version values reported to the guest.
#[derive(Debug, Clone, Args)]
pub struct Profile {
    /// Number of CPU cores.
    #[arg(long, env = "GUESTLINK_CPU", default_value_t = 1)]
    pub cpu: u32,

    /// VM timestamp.
    #[arg(long, env = "GUESTLINK_TS", default_value_t = 1_679_863_686)]
    pub ts: i64,

    /// VM version.
    #[arg(long = "version-string", env = "GUESTLINK_VM_VERSION", default_value = "2.6.1-12139")]
    pub vm_version: String,

    /// Fix number of the host.
    #[arg(long, env = "GUESTLINK_FIX_NUMBER", default_value_t = 0)]
    pub fix_number: u32,

    /// Build number of the host.
    #[arg(long, env = "GUESTLINK_BUILD", default_value_t = 42962)]
    pub build: u32,

    /// Host model name.
    #[arg(long, env = "GUESTLINK_MODEL", default_value = "Virtualhost")]
    pub model: String,

    /// Host MAC address.
    #[arg(long, env = "GUESTLINK_MAC", default_value = "02:11:32:AA:BB:CC")]
    pub mac: String,

    /// Host serial number (13 characters).
    #[arg(long, env = "GUESTLINK_HOST_SN", default_value = "0000000000000")]
    pub host_sn: String,

    /// Guest serial number (13 characters).
    #[arg(long, env = "GUESTLINK_GUEST_SN", default_value = "0000000000000")]
    pub guest_sn: String,

    /// CPU architecture string.
    #[arg(long, env = "GUESTLINK_CPU_ARCH", default_value = "QEMU, Virtual CPU, X86_64")]
    pub cpu_arch: String,

    /// Explicit guest UUID. Derived from the guest serial when absent.
    #[arg(long, env = "GUESTLINK_GUEST_UUID")]
    pub guest_uuid: Option<Uuid>,

    /// Explicit cluster UUID. Derived from the host serial when absent.
    #[arg(long, env = "GUESTLINK_CLUSTER_UUID")]
    pub cluster_uuid: Option<Uuid>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            cpu: 1,
            ts: 1_679_863_686,
            vm_version: "2.6.1-12139".to_string(),
            fix_number: 0,
            build: 42962,
            model: "Virtualhost".to_string(),
            mac: "02:11:32:AA:BB:CC".to_string(),
            host_sn: "0000000000000".to_string(),
            guest_sn: "0000000000000".to_string(),
            cpu_arch: "QEMU, Virtual CPU, X86_64".to_string(),
            guest_uuid: None,
            cluster_uuid: None,
        }
    }
}
