// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Addresses arrive as CIDR strings (`10.0.0.5/24`); endpoints are keyed by the bare address.

use std::net::IpAddr;

use crate::ParseError;

/// Extract the host address from a CIDR string. The prefix length, if any, is dropped and not
/// validated beyond being present after the `/`.
///
/// # Errors
///
/// [`ParseError::MissingAddress`] on an empty string, [`ParseError::InvalidAddress`] if the part
/// before the `/` is not an IPv4 or IPv6 address.
pub fn address_from_cidr(cidr: &str) -> Result<IpAddr, ParseError> {
    let cidr = cidr.trim();
    if cidr.is_empty() {
        return Err(ParseError::MissingAddress);
    }
    let host = cidr.split_once('/').map_or(cidr, |(host, _)| host);
    host.parse::<IpAddr>()
        .map_err(|_| ParseError::InvalidAddress(cidr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn strips_prefix_length() {
        assert_eq!(
            address_from_cidr("10.0.0.5/24"),
            Ok(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
        );
        assert_eq!(
            address_from_cidr("192.168.1.10/32"),
            Ok(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
        );
        assert_eq!(
            address_from_cidr("10.10.10.1"),
            Ok(IpAddr::V4(Ipv4Addr::new(10, 10, 10, 1)))
        );
        assert!(address_from_cidr("fd00::5/64").unwrap().is_ipv6());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(address_from_cidr(""), Err(ParseError::MissingAddress));
        assert_eq!(
            address_from_cidr("10.0.0/24"),
            Err(ParseError::InvalidAddress("10.0.0/24".to_string()))
        );
    }
}
