//! Server-reflexive candidate discovery
//!
//! Sends an RFC 5389 Binding request from the broker's media socket to every
//! `stun:` ICE server and turns the mapped address of each answer into a
//! server-reflexive candidate. Only the plain binding transaction is spoken,
//! TURN allocation is not.

use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use str0m::{net::Protocol, Candidate};
use tracing::{debug, info, warn};

use crate::{bus::IceServer, error::StunError};

const MAGIC_COOKIE: u32 = 0x2112_A442;
const HEADER_LEN: usize = 20;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const BINDING_ERROR: u16 = 0x0111;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const DEFAULT_PORT: u16 = 3478;

pub type TransactionId = [u8; 12];

/// Gathers one server-reflexive candidate per reachable STUN server.
///
/// Servers that fail are logged and skipped. Duplicate mapped addresses
/// collapse to one candidate.
pub fn reflexive_candidates(
    socket: &UdpSocket,
    servers: &[IceServer],
    timeout: Duration,
) -> Vec<Candidate> {
    let Ok(base) = socket.local_addr() else {
        return vec![];
    };

    let mut mapped: Vec<SocketAddr> = vec![];

    for url in servers.iter().flat_map(|s| s.urls.iter()) {
        let server = match parse_stun_url(url) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                debug!("Skipping non-STUN ICE server {}", url);
                continue;
            }
            Err(e) => {
                warn!("Skipping ICE server {}: {}", url, e);
                continue;
            }
        };

        match binding_request(socket, server, timeout) {
            Ok(addr) => {
                info!("STUN {} mapped {} to {}", url, base, addr);
                if !mapped.contains(&addr) {
                    mapped.push(addr);
                }
            }
            Err(e) => warn!("STUN binding via {} failed: {}", url, e),
        }
    }

    // Reset to blocking reads for the drive loop.
    if let Err(e) = socket.set_read_timeout(None) {
        warn!("Resetting socket read timeout failed: {}", e);
    }

    mapped
        .into_iter()
        .filter(|addr| *addr != base)
        .filter_map(
            |addr| match Candidate::server_reflexive(addr, base, Protocol::Udp) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Skipping reflexive candidate {}: {:?}", addr, e);
                    None
                }
            },
        )
        .collect()
}

/// Resolves a `stun:host[:port]` url. Returns `Ok(None)` for other schemes
/// (`turn:`, `turns:`, `stuns:`), which this client does not speak.
pub fn parse_stun_url(url: &str) -> Result<Option<SocketAddr>, StunError> {
    let Some(rest) = url.strip_prefix("stun:") else {
        return Ok(None);
    };
    // Drop any `?transport=` query.
    let hostport = rest.split('?').next().unwrap_or_default();
    if hostport.is_empty() {
        return Err(StunError::InvalidUrl(url.to_string()));
    }

    let (host, port) = split_host_port(hostport)
        .ok_or_else(|| StunError::InvalidUrl(url.to_string()))?;

    (host, port)
        .to_socket_addrs()
        .map_err(|_| StunError::Unresolvable(hostport.to_string()))?
        .find(|a| a.is_ipv4())
        .map(Some)
        .ok_or_else(|| StunError::Unresolvable(hostport.to_string()))
}

fn split_host_port(hostport: &str) -> Option<(&str, u16)> {
    // Bracketed IPv6 literal.
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return None,
        };
        return Some((host, port));
    }

    match hostport.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host, port.parse().ok()?)),
        Some(_) => None,
        None => Some((hostport, DEFAULT_PORT)),
    }
}

/// Runs one binding transaction and returns the mapped address.
pub fn binding_request(
    socket: &UdpSocket,
    server: SocketAddr,
    timeout: Duration,
) -> Result<SocketAddr, StunError> {
    let txn = new_transaction_id();
    socket.send_to(&encode_binding_request(&txn), server)?;

    let deadline = Instant::now() + timeout;
    let mut buf = vec![0; 1500];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StunError::Timeout);
        }
        socket.set_read_timeout(Some(remaining))?;

        let (n, source) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => return Err(StunError::Timeout),
                _ => return Err(e.into()),
            },
        };

        if source != server {
            debug!("Ignoring {} bytes from {} during STUN binding", n, source);
            continue;
        }

        match parse_binding_response(&buf[..n], &txn) {
            // A stale answer to an earlier transaction.
            Err(StunError::TransactionMismatch) => continue,
            other => return other,
        }
    }
}

fn new_transaction_id() -> TransactionId {
    let mut txn = [0; 12];
    txn.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..12]);
    txn
}

pub fn encode_binding_request(txn: &TransactionId) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_LEN);
    msg.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    msg.extend_from_slice(txn);
    msg
}

/// Validates a binding response for `txn` and extracts the mapped address,
/// preferring `XOR-MAPPED-ADDRESS` over `MAPPED-ADDRESS`.
pub fn parse_binding_response(buf: &[u8], txn: &TransactionId) -> Result<SocketAddr, StunError> {
    if buf.len() < HEADER_LEN {
        return Err(StunError::Truncated);
    }

    let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if cookie != MAGIC_COOKIE {
        return Err(StunError::BadCookie);
    }
    if &buf[8..20] != txn {
        return Err(StunError::TransactionMismatch);
    }
    match msg_type {
        BINDING_SUCCESS => {}
        BINDING_ERROR => return Err(StunError::ErrorResponse),
        other => return Err(StunError::UnexpectedType(other)),
    }
    if buf.len() < HEADER_LEN + length {
        return Err(StunError::Truncated);
    }

    let mut attrs = &buf[HEADER_LEN..HEADER_LEN + length];
    let mut mapped = None;

    while attrs.len() >= 4 {
        let attr_type = u16::from_be_bytes([attrs[0], attrs[1]]);
        let attr_len = u16::from_be_bytes([attrs[2], attrs[3]]) as usize;
        let padded = (attr_len + 3) & !3;
        if attrs.len() < 4 + attr_len {
            return Err(StunError::Truncated);
        }
        let value = &attrs[4..4 + attr_len];

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, Some(txn)),
            ATTR_MAPPED_ADDRESS if mapped.is_none() => mapped = Some(decode_address(value, None)?),
            _ => {}
        }

        attrs = &attrs[(4 + padded).min(attrs.len())..];
    }

    mapped.ok_or(StunError::NoMappedAddress)
}

/// Decodes a (XOR-)MAPPED-ADDRESS value. `xor` carries the transaction id
/// when the value is obfuscated.
fn decode_address(value: &[u8], xor: Option<&TransactionId>) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::Truncated);
    }
    let family = value[1];
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    let cookie = MAGIC_COOKIE.to_be_bytes();

    if xor.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match family {
        0x01 => {
            let raw: [u8; 4] = value
                .get(4..8)
                .and_then(|s| s.try_into().ok())
                .ok_or(StunError::Truncated)?;
            let mut octets = raw;
            if xor.is_some() {
                for (o, c) in octets.iter_mut().zip(cookie.iter()) {
                    *o ^= c;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 => {
            let raw: [u8; 16] = value
                .get(4..20)
                .and_then(|s| s.try_into().ok())
                .ok_or(StunError::Truncated)?;
            let mut octets = raw;
            if let Some(txn) = xor {
                let key = cookie.iter().chain(txn.iter());
                for (o, k) in octets.iter_mut().zip(key) {
                    *o ^= k;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(StunError::UnsupportedFamily(other)),
    };

    Ok(SocketAddr::new(ip, port))
}
