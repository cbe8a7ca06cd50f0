use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::trace;

/// Where to look for the client's address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IpLookup {
    /// Peer address of the TCP connection
    RemoteAddr,
    /// `X-Forwarded-For` header, read from the right
    XForwardedFor,
    /// `X-Real-IP` header
    XRealIp,
    /// Any other header carrying a single address
    Header(String),
}

/// Default lookup order: connection address, then forwarding headers
pub fn default_ip_lookups() -> Vec<IpLookup> {
    vec![IpLookup::RemoteAddr, IpLookup::XForwardedFor, IpLookup::XRealIp]
}

/// Resolves the client key for a request from an ordered list of lookups
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    lookups: Vec<IpLookup>,
    /// Position in `X-Forwarded-For` counted from the last entry
    forwarded_for_index: usize,
}

impl Default for ClientIpResolver {
    fn default() -> Self {
        Self::new(default_ip_lookups(), 0)
    }
}

impl ClientIpResolver {
    pub fn new(lookups: Vec<IpLookup>, forwarded_for_index: usize) -> Self {
        Self {
            lookups,
            forwarded_for_index,
        }
    }

    /// First non-empty address produced by the lookups, in order
    pub fn resolve(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Option<String> {
        self.lookups.iter().find_map(|lookup| {
            let found = match lookup {
                IpLookup::RemoteAddr => remote_addr.map(|addr| addr.ip().to_string()),
                IpLookup::XForwardedFor => {
                    header_value(headers, "x-forwarded-for").and_then(|value| {
                        value
                            .rsplit(',')
                            .nth(self.forwarded_for_index)
                            .map(|hop| hop.trim().to_string())
                    })
                }
                IpLookup::XRealIp => header_value(headers, "x-real-ip").map(|v| v.trim().to_string()),
                IpLookup::Header(name) => header_value(headers, name).map(|v| v.trim().to_string()),
            };

            let found = found.filter(|ip| !ip.is_empty());
            if let Some(ip) = &found {
                trace!(lookup = ?lookup, ip = %ip, "Resolved client address");
            }
            found
        })
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
