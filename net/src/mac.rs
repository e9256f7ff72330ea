// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mac address type and logic.

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::ParseError;

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]`. It serializes as its canonical
/// lower-case, colon separated string so that persisted records stay human readable.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mac(pub [u8; 6]);

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

impl TryFrom<&str> for Mac {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        const MAX_OCTETS: usize = 6;
        let invalid = || ParseError::InvalidMac(value.to_string());
        let octets_parsed =
            value
                .split(':')
                .try_fold(ArrayVec::<_, MAX_OCTETS>::new(), |mut acc, octet_str| {
                    if octet_str.len() != 2 || !octet_str.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(invalid());
                    }
                    let parsed = u8::from_str_radix(octet_str, 16).map_err(|_| invalid())?;
                    acc.try_push(parsed).map_err(|_| invalid())?;
                    Ok(acc)
                })?;

        let octets = octets_parsed.into_inner().map_err(|_| invalid())?;
        Ok(Mac(octets))
    }
}

impl TryFrom<String> for Mac {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Mac::try_from(value.as_str())
    }
}

impl FromStr for Mac {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mac::try_from(s)
    }
}

impl From<Mac> for String {
    fn from(value: Mac) -> Self {
        value.to_string()
    }
}

impl Mac {
    /// The zero `Mac`.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Returns true iff the binary representation of the [`Mac`] is exclusively zeros.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Mac::ZERO
    }

    /// The octets, in network order, as the dataplane expects them in match fields.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}
