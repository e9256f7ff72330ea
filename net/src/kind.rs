// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface kinds.

use std::fmt::Display;

/// Which side of the node an endpoint faces. The dataplane programmer picks the rule set from
/// this; it is never persisted with the endpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// A pod-facing interface, provisioned through `CreateNetwork`.
    Endpoint,
    /// A host-network-facing interface, provisioned through `SetupHostInterface`.
    Host,
}

impl Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceKind::Endpoint => write!(f, "ENDPOINT"),
            InterfaceKind::Host => write!(f, "HOST"),
        }
    }
}
