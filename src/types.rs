//! Shared identity types used across the secure virtual resources.

use alloc::string::String;
use core::fmt;

use crate::{error::Error, Result};

/// A 128-bit device or subject identifier.
///
/// The wildcard subject is the identifier whose first byte is `*` and whose
/// remaining bytes are zero, matching its single-character wire
/// representation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// The all-zero identifier, used as the "unset" sentinel.
    pub const NIL: Uuid = Uuid([0; 16]);

    /// The wildcard subject identifier.
    pub const WILDCARD: Uuid = Uuid([
        b'*', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]);

    /// Constructs a `Uuid` from its raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Uuid {
        Uuid(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns whether this is the all-zero identifier.
    pub fn is_nil(&self) -> bool {
        *self == Uuid::NIL
    }

    /// Returns whether this is the wildcard subject.
    pub fn is_wildcard(&self) -> bool {
        *self == Uuid::WILDCARD
    }

    /// Parses the hyphenated string representation, or the wildcard `*`.
    pub fn parse(s: &str) -> Result<Uuid> {
        if s == "*" {
            return Ok(Uuid::WILDCARD);
        }
        // Accept the canonical 8-4-4-4-12 form only
        let bytes = s.as_bytes();
        if bytes.len() != 36 {
            return Err(Error::InvalidParam);
        }
        let mut out = [0; 16];
        let mut nibbles = 0;
        for (i, &b) in bytes.iter().enumerate() {
            match i {
                8 | 13 | 18 | 23 => {
                    if b != b'-' {
                        return Err(Error::InvalidParam);
                    }
                }
                _ => {
                    let v = hex_value(b).ok_or(Error::InvalidParam)?;
                    out[nibbles / 2] = (out[nibbles / 2] << 4) | v;
                    nibbles += 1;
                }
            }
        }

        Ok(Uuid(out))
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_wildcard() {
            return write!(f, "*");
        }
        for (i, b) in self.0.iter().enumerate() {
            if let 4 | 6 | 8 | 10 = i {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", b)?;
        }

        Ok(())
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// A role identifier, an id string with an optional authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub authority: Option<String>,
}

/// The ownership transfer methods whose labels feed pairwise key
/// derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oxm {
    JustWorks,
    RandomPin,
    ManufacturerCert,
}

impl Oxm {
    /// Returns the label string mixed into owner key derivation.
    pub fn label(&self) -> &'static str {
        match self {
            Oxm::JustWorks => "oic.sec.doxm.jw",
            Oxm::RandomPin => "oic.sec.doxm.rdp",
            Oxm::ManufacturerCert => "oic.sec.doxm.mfgcert",
        }
    }
}

/// The slice of the device ownership record this subsystem needs.
///
/// The full `/oic/sec/doxm` resource lives outside this crate; owner key
/// derivation and the unowned-device revert path only consume the identity
/// fields below.
#[derive(Debug, Clone)]
pub struct Doxm {
    pub device_id: Uuid,
    pub owner: Uuid,
    pub owned: bool,
    pub oxm: Oxm,
}

impl Doxm {
    /// Constructs the record for a factory-fresh, unowned device.
    pub fn unowned(device_id: Uuid, oxm: Oxm) -> Doxm {
        Doxm {
            device_id,
            owner: Uuid::NIL,
            owned: false,
            oxm,
        }
    }

    /// Reverts the ownership fields to their initial, unowned values.
    pub fn restore_to_init(&mut self) {
        self.owner = Uuid::NIL;
        self.owned = false;
    }
}
