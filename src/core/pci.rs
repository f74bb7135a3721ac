// PCI address handling for hotplug-passthru
//
// Host-advertised passthrough devices are identified by their full
// domain:bus:slot.function address, e.g. "0000:44:00.0".

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Error;

const PCI_ADDRESS_PATTERN: &str = r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]$";

/// A syntactically valid PCI address, kept as the user typed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciAddress(String);

impl PciAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an address reported by the endpoint
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl FromStr for PciAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN
            .get_or_init(|| Regex::new(PCI_ADDRESS_PATTERN).expect("PCI address pattern compiles"));

        let s = s.trim();
        if re.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidPciAddress(s.to_string()))
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
