use local_ip_address::list_afinet_netifas;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use str0m::{net::Protocol, Candidate};
use systemstat::{Platform, System};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::BrokerError;

/// Installs the `fmt` subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn is_shareable(v: &Ipv4Addr) -> bool {
    !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() && !v.is_unspecified()
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Asks `local-ip-address` for the interface list first and falls back to
/// `systemstat` when that fails. Loopback, link-local and broadcast addresses
/// are skipped.
pub fn select_host_address() -> Option<IpAddr> {
    if let Ok(interfaces) = list_afinet_netifas() {
        for (name, ip) in interfaces {
            if let IpAddr::V4(v) = ip {
                if is_shareable(&v) {
                    debug!("Selected interface {} / {}", name, v);
                    return Some(ip);
                }
            }
        }
    }

    let system = System::new();
    let networks = match system.networks() {
        Ok(n) => n,
        Err(e) => {
            warn!("Listing network interfaces failed: {}", e);
            return None;
        }
    };

    for net in networks.values() {
        for n in &net.addrs {
            if let systemstat::IpAddr::V4(v) = n.addr {
                if is_shareable(&v) {
                    return Some(IpAddr::V4(v));
                }
            }
        }
    }

    None
}

/// Binds the media socket to `bind` or, when unset, to the selected host
/// address on a random port.
pub fn bind_socket(bind: Option<IpAddr>) -> Result<UdpSocket, BrokerError> {
    let ip = match bind {
        Some(ip) => ip,
        None => select_host_address().ok_or(BrokerError::NoHostAddress)?,
    };
    let socket = UdpSocket::bind(SocketAddr::new(ip, 0))?;
    info!("Bound UDP port: {}", socket.local_addr()?);
    Ok(socket)
}

/// Host candidates for `socket`.
///
/// A socket bound to a concrete address yields exactly that address. A
/// wildcard bind advertises every routable IPv4 interface on the same port.
pub fn host_candidates(socket: &UdpSocket) -> Result<Vec<Candidate>, BrokerError> {
    let local = socket.local_addr()?;

    let addrs: Vec<SocketAddr> = if local.ip().is_unspecified() {
        list_afinet_netifas()
            .map(|interfaces| {
                interfaces
                    .into_iter()
                    .filter_map(|(name, ip)| match ip {
                        IpAddr::V4(v) if is_shareable(&v) => {
                            info!("iface: {} / {:?}", name, ip);
                            Some(SocketAddr::new(ip, local.port()))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    } else {
        vec![local]
    };

    let candidates = addrs
        .into_iter()
        .filter_map(|addr| match Candidate::host(addr, Protocol::Udp) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Skipping host candidate {}: {:?}", addr, e);
                None
            }
        })
        .collect();

    Ok(candidates)
}
