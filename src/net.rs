use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::error::Error;

/// Default Modbus TCP port (unencrypted)
pub const SERVER_DEFAULT_PORT: &str = "502";
/// Port reserved for Modbus TCP over TLS
pub const SECURE_SERVER_DEFAULT_PORT: &str = "802";

/// IP protocol version restriction applied during endpoint resolution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpVersion {
    /// accept both IPv4 and IPv6 endpoints
    #[default]
    Any,
    /// IPv4 endpoints only
    V4,
    /// IPv6 endpoints only
    V6,
}

/// Whether resolved endpoints are used to connect or to bind and listen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointUsage {
    /// client side: connect to the resolved endpoints
    ActiveOpen,
    /// server side: bind and listen on the resolved endpoints
    PassiveOpen,
}

/// Socket address of a Modbus TCP node in human readable form
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointAddr {
    /// IP address or name of the host
    pub host: String,
    /// port number of the service
    pub service: String,
}

impl EndpointAddr {
    pub(crate) fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            service: addr.port().to_string(),
        }
    }
}

impl std::fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]:{}", self.host, self.service)
    }
}

fn matches_ip_version(addr: &SocketAddr, ip_version: IpVersion) -> bool {
    match ip_version {
        IpVersion::Any => true,
        IpVersion::V4 => addr.is_ipv4(),
        IpVersion::V6 => addr.is_ipv6(),
    }
}

fn wildcard_endpoints(port: u16, ip_version: IpVersion) -> Vec<SocketAddr> {
    match ip_version {
        IpVersion::Any => vec![
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        ],
        IpVersion::V4 => vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)],
        IpVersion::V6 => vec![SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)],
    }
}

/// Resolve a (host, service) pair into an ordered list of socket endpoints.
///
/// The list preserves resolver order and is deduplicated by address equality
/// since the platform resolver may return duplicate results. A `None` host
/// resolves to the wildcard addresses for a passive open.
pub(crate) fn resolve_endpoint(
    host: Option<&str>,
    service: &str,
    ip_version: IpVersion,
    usage: EndpointUsage,
) -> Result<Vec<SocketAddr>, Error> {
    let port: u16 = service.parse().map_err(|_| Error::AddrResolution)?;

    let resolved: Vec<SocketAddr> = match host {
        None => match usage {
            EndpointUsage::PassiveOpen => wildcard_endpoints(port, ip_version),
            EndpointUsage::ActiveOpen => return Err(Error::AddrResolution),
        },
        Some(host) => (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::AddrResolution)?
            .collect(),
    };

    let mut endpoints: Vec<SocketAddr> = Vec::with_capacity(resolved.len());
    for addr in resolved {
        if matches_ip_version(&addr, ip_version) && !endpoints.contains(&addr) {
            endpoints.push(addr);
        }
    }

    if endpoints.is_empty() {
        return Err(Error::AddrResolution);
    }
    Ok(endpoints)
}
