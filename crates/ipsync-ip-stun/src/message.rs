//! Minimal STUN (RFC 5389) codec
//!
//! Only what a binding request needs: encode a request, decode a success
//! response, and pull the reflexive address out of it.

use ipsync_core::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const HEADER_LEN: usize = 20;
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_SUCCESS: u16 = 0x0101;
pub const BINDING_ERROR: u16 = 0x0111;

pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
pub const ATTR_ERROR_CODE: u16 = 0x0009;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_V4: u8 = 0x01;
const FAMILY_V6: u8 = 0x02;

pub type TransactionId = [u8; 12];

/// A fresh random transaction ID
pub fn new_transaction_id() -> TransactionId {
    rand::random()
}

/// Binding request with no attributes
pub fn encode_binding_request(transaction_id: &TransactionId) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // message length stays 0
    buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf[8..20].copy_from_slice(transaction_id);
    buf
}

/// Transaction ID of a datagram, if it is long enough to carry one
pub fn transaction_id_of(datagram: &[u8]) -> Option<&[u8]> {
    datagram.get(8..HEADER_LEN)
}

/// Decode a binding response and return the reflexive address
///
/// XOR-MAPPED-ADDRESS wins over MAPPED-ADDRESS when both are present.
pub fn decode_binding_response(
    datagram: &[u8],
    transaction_id: &TransactionId,
) -> Result<SocketAddr> {
    if datagram.len() < HEADER_LEN {
        return Err(Error::protocol(format!(
            "STUN response too short: {} bytes",
            datagram.len()
        )));
    }

    let message_type = u16::from_be_bytes([datagram[0], datagram[1]]);
    let length = usize::from(u16::from_be_bytes([datagram[2], datagram[3]]));
    let cookie = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);

    if cookie != MAGIC_COOKIE {
        return Err(Error::protocol(format!("bad STUN magic cookie {cookie:#010x}")));
    }
    if &datagram[8..HEADER_LEN] != transaction_id {
        return Err(Error::protocol("STUN transaction ID mismatch"));
    }
    if HEADER_LEN + length > datagram.len() {
        return Err(Error::protocol(format!(
            "STUN message length {length} exceeds datagram"
        )));
    }

    let body = &datagram[HEADER_LEN..HEADER_LEN + length];

    match message_type {
        BINDING_SUCCESS => {}
        BINDING_ERROR => {
            let detail = attributes(body)
                .find(|(kind, _)| *kind == ATTR_ERROR_CODE)
                .map(|(_, value)| describe_error_code(value))
                .unwrap_or_else(|| "no error code".to_string());
            return Err(Error::upstream(format!("STUN binding error: {detail}")));
        }
        other => {
            return Err(Error::protocol(format!(
                "unexpected STUN message type {other:#06x}"
            )));
        }
    }

    let mut mapped = None;
    for (kind, value) in attributes(body) {
        match kind {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, Some(transaction_id)),
            ATTR_MAPPED_ADDRESS if mapped.is_none() => mapped = Some(value),
            _ => {}
        }
    }

    match mapped {
        Some(value) => decode_address(value, None),
        None => Err(Error::no_address("STUN response carries no mapped address")),
    }
}

/// Iterate `(type, value)` pairs; stops at the first truncated attribute
fn attributes(body: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut rest = body;
    std::iter::from_fn(move || {
        let current: &[u8] = rest;
        if current.len() < 4 {
            return None;
        }
        let kind = u16::from_be_bytes([current[0], current[1]]);
        let len = usize::from(u16::from_be_bytes([current[2], current[3]]));
        let value = current.get(4..4 + len)?;
        let padded = (len + 3) & !3;
        rest = current.get(4 + padded..).unwrap_or(&[]);
        Some((kind, value))
    })
}

fn decode_address(value: &[u8], xor_with: Option<&TransactionId>) -> Result<SocketAddr> {
    if value.len() < 4 {
        return Err(Error::protocol("STUN address attribute too short"));
    }

    let family = value[1];
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    let raw = &value[4..];

    let cookie = MAGIC_COOKIE.to_be_bytes();
    if xor_with.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match family {
        FAMILY_V4 => {
            let mut octets: [u8; 4] = raw
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| Error::protocol("truncated IPv4 mapped address"))?;
            if xor_with.is_some() {
                for (byte, mask) in octets.iter_mut().zip(cookie) {
                    *byte ^= mask;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_V6 => {
            let mut octets: [u8; 16] = raw
                .get(..16)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| Error::protocol("truncated IPv6 mapped address"))?;
            if let Some(transaction_id) = xor_with {
                let mask = cookie.iter().chain(transaction_id.iter());
                for (byte, mask) in octets.iter_mut().zip(mask) {
                    *byte ^= mask;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(Error::protocol(format!(
                "unknown STUN address family {other:#04x}"
            )));
        }
    };

    Ok(SocketAddr::new(ip, port))
}

fn describe_error_code(value: &[u8]) -> String {
    if value.len() < 4 {
        return "malformed error code".to_string();
    }
    let code = u16::from(value[2] & 0x07) * 100 + u16::from(value[3]);
    let reason = String::from_utf8_lossy(&value[4..]);
    format!("{code} {}", reason.trim())
}
