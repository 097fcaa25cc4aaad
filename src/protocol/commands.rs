//! Command table.
//!
//! Maps a command id to its label and, for commands the guest may ask the
//! host about, to a handler producing the reply payload. Handlers are pure
//! functions of the configured [`Profile`] and [`Identity`].

use serde_json::json;

use crate::config::Profile;
use crate::identity::Identity;

pub const GUEST_INFO: u32 = 2;
pub const GUEST_POWER: u32 = 3;
pub const HOST_VERSION: u32 = 4;
pub const GUEST_SN: u32 = 5;
pub const GUEST_SHUTDOWN: u32 = 6;
pub const GUEST_CPU_INFO: u32 = 7;
pub const VM_VERSION: u32 = 8;
pub const HOST_VERSION_INFO: u32 = 9;
pub const GET_GUEST_INFO: u32 = 10;
pub const GUEST_UUID: u32 = 11;
pub const CLUSTER_UUID: u32 = 12;
pub const HOST_SN: u32 = 13;
pub const HOST_MAC: u32 = 14;
pub const HOST_MODEL: u32 = 15;
pub const UPDATE_DEADLINE: u32 = 16;
pub const GUEST_TIMESTAMP: u32 = 17;

/// Values a handler may draw from.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub profile: &'a Profile,
    pub identity: &'a Identity,
}

/// Reply payload producer.
pub type Handler = fn(&CommandContext<'_>) -> String;

/// One row of the command table.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub id: u32,
    pub label: &'static str,
    /// `None` for commands whose reply carries no payload.
    pub handler: Option<Handler>,
}

/// Every command this side knows about.
pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec { id: GUEST_INFO, label: "Guest info", handler: None },
    CommandSpec { id: GUEST_POWER, label: "Guest power", handler: None },
    CommandSpec { id: HOST_VERSION, label: "Host version", handler: Some(host_version) },
    CommandSpec { id: GUEST_SN, label: "Guest SN", handler: Some(guest_sn) },
    CommandSpec { id: GUEST_SHUTDOWN, label: "Guest shutdown", handler: None },
    CommandSpec { id: GUEST_CPU_INFO, label: "Guest CPU info", handler: Some(cpu_info) },
    CommandSpec { id: VM_VERSION, label: "VM version", handler: Some(vm_version) },
    CommandSpec { id: HOST_VERSION_INFO, label: "Host version info", handler: None },
    CommandSpec { id: GET_GUEST_INFO, label: "Get guest info", handler: None },
    CommandSpec { id: GUEST_UUID, label: "Guest UUID", handler: Some(guest_uuid) },
    CommandSpec { id: CLUSTER_UUID, label: "Cluster UUID", handler: Some(cluster_uuid) },
    CommandSpec { id: HOST_SN, label: "Host SN", handler: Some(host_sn) },
    CommandSpec { id: HOST_MAC, label: "Host MAC", handler: Some(host_mac) },
    CommandSpec { id: HOST_MODEL, label: "Host model", handler: Some(host_model) },
    CommandSpec { id: UPDATE_DEADLINE, label: "Update deadline", handler: Some(deadline) },
    CommandSpec { id: GUEST_TIMESTAMP, label: "Guest timestamp", handler: None },
];

/// Find the table entry for `id`.
pub fn lookup(id: u32) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.id == id)
}

/// Human label for `id`, `"Unknown"` when not in the table.
pub fn label(id: u32) -> &'static str {
    lookup(id).map_or("Unknown", |spec| spec.label)
}

/// Whether answering `id` discloses one of the identity UUIDs.
pub fn is_uuid_command(id: u32) -> bool {
    matches!(id, GUEST_UUID | CLUSTER_UUID)
}

/// Reply payload for `id`.
///
/// Returns `None` for ids missing from the table, `Some("")` for known
/// commands without a payload.
pub fn dispatch(id: u32, ctx: &CommandContext<'_>) -> Option<String> {
    let spec = lookup(id)?;
    Some(spec.handler.map(|handler| handler(ctx)).unwrap_or_default())
}

fn host_version(ctx: &CommandContext<'_>) -> String {
    json!({
        "buildnumber": ctx.profile.build,
        "smallfixnumber": ctx.profile.fix_number,
    })
    .to_string()
}

fn guest_sn(ctx: &CommandContext<'_>) -> String {
    ctx.profile.guest_sn.to_uppercase()
}

fn cpu_info(ctx: &CommandContext<'_>) -> String {
    json!({
        "cpuinfo": format!("{}, {}", ctx.profile.cpu_arch, ctx.profile.cpu),
        "vcpu_num": ctx.profile.cpu,
    })
    .to_string()
}

fn vm_version(ctx: &CommandContext<'_>) -> String {
    json!({
        "id": "Virtualization",
        "name": "Virtual Machine Manager",
        "timestamp": ctx.profile.ts,
        "version": ctx.profile.vm_version,
    })
    .to_string()
}

fn guest_uuid(ctx: &CommandContext<'_>) -> String {
    ctx.identity.guest_uuid().to_string()
}

fn cluster_uuid(ctx: &CommandContext<'_>) -> String {
    ctx.identity.cluster_uuid().to_string()
}

fn host_sn(ctx: &CommandContext<'_>) -> String {
    ctx.profile.host_sn.to_uppercase()
}

fn host_mac(ctx: &CommandContext<'_>) -> String {
    ctx.profile.mac.to_lowercase().replace('-', ":")
}

fn host_model(ctx: &CommandContext<'_>) -> String {
    ctx.profile.model.clone()
}

fn deadline(_ctx: &CommandContext<'_>) -> String {
    i64::MAX.to_string()
}
