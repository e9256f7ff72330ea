// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![forbid(unsafe_code)] // Validation logic should always be strictly safe
#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! Value types shared by the infra manager crates: MAC addresses, the kind of interface an
//! endpoint sits behind, and the parsers for the loosely-typed strings the orchestration layer
//! hands us (CIDR addresses and `<prefix>_<port>` interface names).

pub mod addr;
pub mod ifname;
pub mod kind;
pub mod mac;

pub use addr::address_from_cidr;
pub use ifname::port_from_ifname;
pub use kind::InterfaceKind;
pub use mac::Mac;

use thiserror::Error;

/// Errors produced while parsing request fields.
///
/// Any of these rejects a request before the record store or the dataplane is consulted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The string is not a MAC address in `xx:xx:xx:xx:xx:xx` form.
    #[error("invalid mac address '{0}'")]
    InvalidMac(String),
    /// The string is not an IP address, with or without a prefix length.
    #[error("invalid ip address '{0}'")]
    InvalidAddress(String),
    /// The request carried no address at all.
    #[error("missing ip address")]
    MissingAddress,
    /// The interface name has no `_` delimiter.
    #[error("interface name '{0}' has no '_<port>' suffix")]
    MissingPortSuffix(String),
    /// The suffix after the delimiter is not an unsigned number.
    #[error("interface name '{0}' has a non-numeric port suffix")]
    InvalidPortSuffix(String),
}
