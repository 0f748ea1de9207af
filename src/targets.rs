//! Expansion of the scan input (hosts, endpoints, CIDR blocks or a file of them)
//! into dial targets.
//!
//! CIDR policy: IPv4 blocks up to /30 skip the network and broadcast addresses,
//! /31 and /32 yield every address, IPv6 blocks yield every address.
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use ipnet::IpNet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::InputError;
use crate::types::DialTarget;

/// One classified input item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputItem {
    /// Already `host:port`; dialed verbatim, the port list is ignored.
    Endpoint(String),
    /// CIDR block, combined with every port.
    Network(IpNet),
    /// Bare host or IP, combined with every port.
    Host(String),
}

impl InputItem {
    pub fn classify(item: &str) -> Result<Self, InputError> {
        if has_port(item) {
            return Ok(InputItem::Endpoint(item.to_string()));
        }
        if item.contains('/') {
            let net = item
                .parse::<IpNet>()
                .map_err(|source| InputError::InvalidCidr {
                    item: item.to_string(),
                    source,
                })?;
            return Ok(InputItem::Network(net));
        }
        Ok(InputItem::Host(item.to_string()))
    }

    /// Dial targets for this item, produced lazily.
    pub fn targets<'a>(
        &'a self,
        ports: &'a [u16],
    ) -> Box<dyn Iterator<Item = DialTarget> + Send + 'a> {
        match self {
            InputItem::Endpoint(s) => Box::new(std::iter::once(DialTarget::new(s.as_str()))),
            InputItem::Network(net) => Box::new(
                net.hosts()
                    .flat_map(move |ip| ports.iter().map(move |&p| join_ip(ip, p))),
            ),
            InputItem::Host(h) => Box::new(ports.iter().map(move |&p| join_host(h, p))),
        }
    }
}

/// Validated scan input: every item is classified before the first dial.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    items: Vec<InputItem>,
    ports: Vec<u16>,
}

impl TargetSpec {
    /// Build from the raw input string. If `input` names an existing file each
    /// line is one item, otherwise the string is split on commas.
    pub fn parse(input: &str, ports: &[u16]) -> Result<Self, InputError> {
        let path = Path::new(input);
        let items = if path.is_file() {
            info!(path = %path.display(), "reading targets from file");
            let content = fs::read_to_string(path).map_err(|source| InputError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
            Self::classify_all(content.lines())?
        } else {
            Self::classify_all(input.split(','))?
        };
        Self::from_items(items, ports)
    }

    pub fn from_items(items: Vec<InputItem>, ports: &[u16]) -> Result<Self, InputError> {
        if ports.is_empty() {
            return Err(InputError::Ports("port list is empty".into()));
        }
        if items.is_empty() {
            return Err(InputError::Empty);
        }
        Ok(Self {
            items,
            ports: ports.to_vec(),
        })
    }

    fn classify_all<'a>(raw: impl Iterator<Item = &'a str>) -> Result<Vec<InputItem>, InputError> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(InputItem::classify)
            .collect()
    }

    pub fn items(&self) -> &[InputItem] {
        &self.items
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn targets(&self) -> impl Iterator<Item = DialTarget> + Send + '_ {
        self.items
            .iter()
            .flat_map(move |item| item.targets(&self.ports))
    }

    /// Push every target into `intake`, one at a time, so workers start before
    /// expansion finishes. Stops early if `cancel` fires or the intake is closed.
    /// Returns the number of targets pushed.
    pub async fn feed(&self, intake: &mpsc::Sender<DialTarget>, cancel: &CancellationToken) -> u64 {
        let mut pushed = 0u64;
        for target in self.targets() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(pushed, "target feed cancelled");
                    break;
                }
                res = intake.send(target) => {
                    if res.is_err() {
                        debug!(pushed, "intake closed before feed finished");
                        break;
                    }
                    pushed += 1;
                }
            }
        }
        pushed
    }
}

fn has_port(item: &str) -> bool {
    if item.parse::<SocketAddr>().is_ok() {
        return true;
    }
    // Bare IPv6 literals contain colons but no port.
    if item.parse::<IpAddr>().is_ok() {
        return false;
    }
    match item.rsplit_once(':') {
        Some((host, _)) => !host.contains(':'),
        None => false,
    }
}

fn join_ip(ip: IpAddr, port: u16) -> DialTarget {
    DialTarget::new(SocketAddr::new(ip, port).to_string())
}

fn join_host(host: &str, port: u16) -> DialTarget {
    match host.parse::<IpAddr>() {
        Ok(ip) => join_ip(ip, port),
        Err(_) => DialTarget::new(format!("{host}:{port}")),
    }
}
