//! Process and network metadata for fleet registration and heartbeats.

use std::net::{IpAddr, ToSocketAddrs, UdpSocket};

use serde::Serialize;
use serde_json::{json, Value};

use tollgate_contracts::config::{local_hostname, ClientConfig, SDK_VERSION};

/// At most this many command-line arguments are reported.
pub const MAX_ARGV: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    pub argv: Vec<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub hostname: String,
    pub fqdn: Option<String>,
    pub ip: Option<String>,
}

impl ProcessInfo {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            ppid: parent_pid(),
            argv: std::env::args().take(MAX_ARGV).collect(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok()
                .filter(|u| !u.is_empty()),
        }
    }
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

impl NetworkInfo {
    pub fn current() -> Self {
        let hostname = local_hostname();
        let fqdn = hostname.contains('.').then(|| hostname.clone());
        let ip = resolve_host(&hostname).or_else(outbound_ip).map(|ip| ip.to_string());
        Self { hostname, fqdn, ip }
    }
}

/// First non-loopback address the host name resolves to.
fn resolve_host(hostname: &str) -> Option<IpAddr> {
    (hostname, 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(|ip| !ip.is_loopback())
}

/// Local address of the default route. Connecting a UDP socket sends nothing.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Body of `POST /fleet/{id}/heartbeat`.
pub fn heartbeat_payload(process: &ProcessInfo, network: &NetworkInfo) -> Value {
    json!({
        "process_info": process,
        "network_info": network,
    })
}

/// Body of `POST /fleet/register`.
pub fn registration_payload(config: &ClientConfig, process: &ProcessInfo, network: &NetworkInfo) -> Value {
    let mut body = json!({
        "name": config.agent_name,
        "discovery_method": "sdk",
        "sdk_version": SDK_VERSION,
        "hostname": network.hostname,
        "process_info": process,
        "network_info": network,
    });
    if let Some(framework) = &config.agent_type {
        body["framework"] = Value::String(framework.clone());
    }
    if let Some(environment) = &config.environment {
        body["environment"] = Value::String(environment.clone());
    }
    body
}
