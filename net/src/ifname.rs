// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Host interface names encode the dataplane port in their suffix: `<prefix>_<port>`.

use crate::ParseError;

/// Delimiter between the interface prefix and its port number.
pub const PORT_DELIMITER: char = '_';

/// Derive the dataplane port id from a host interface name of the form `<prefix>_<port>`.
///
/// The suffix after the last delimiter is the port, so `veth_2` is port 2 and `host_ns_0` is
/// port 0.
///
/// # Errors
///
/// [`ParseError::MissingPortSuffix`] if there is no delimiter, [`ParseError::InvalidPortSuffix`]
/// if what follows it is not an unsigned 32-bit number.
pub fn port_from_ifname(ifname: &str) -> Result<u32, ParseError> {
    let (_, suffix) = ifname
        .rsplit_once(PORT_DELIMITER)
        .ok_or_else(|| ParseError::MissingPortSuffix(ifname.to_string()))?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidPortSuffix(ifname.to_string()));
    }
    suffix
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidPortSuffix(ifname.to_string()))
}
