//! The tagged byte-buffer model backing credential key material.

use alloc::vec::Vec;
use core::fmt;
use zeroize::Zeroize;

use crate::{error::Error, Result};

/// The serialization format of a key or certificate buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Base64,
    Der,
    Pem,
}

impl Encoding {
    /// Returns the wire representation of the encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Raw => "oic.sec.encoding.raw",
            Encoding::Base64 => "oic.sec.encoding.base64",
            Encoding::Der => "oic.sec.encoding.der",
            Encoding::Pem => "oic.sec.encoding.pem",
        }
    }

    /// Parses the wire representation of the encoding.
    pub fn parse(s: &str) -> Result<Encoding> {
        match s {
            "oic.sec.encoding.raw" => Ok(Encoding::Raw),
            "oic.sec.encoding.base64" => Ok(Encoding::Base64),
            "oic.sec.encoding.der" => Ok(Encoding::Der),
            "oic.sec.encoding.pem" => Ok(Encoding::Pem),
            _ => Err(Error::SchemaViolation),
        }
    }

    /// Returns whether the buffer content is binary on the wire, as opposed
    /// to a text string.
    pub fn is_binary(&self) -> bool {
        matches!(self, Encoding::Raw | Encoding::Der)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A byte buffer tagged with its encoding.
///
/// The buffer is wiped on drop, whether it holds private key material or
/// public certificate data.
#[derive(Clone, PartialEq, Eq)]
pub struct SecKey {
    data: Vec<u8>,
    encoding: Encoding,
}

impl SecKey {
    /// Constructs a new `SecKey` owning the given bytes.
    pub fn new(data: Vec<u8>, encoding: Encoding) -> SecKey {
        SecKey { data, encoding }
    }

    /// Returns the buffer contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the encoding tag.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns the buffer length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replaces the buffer contents, wiping the previous ones.
    pub fn replace(&mut self, data: Vec<u8>, encoding: Encoding) {
        self.data.zeroize();
        self.data = data;
        self.encoding = encoding;
    }
}

impl Drop for SecKey {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for SecKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Don't leak key material into logs
        f.debug_struct("SecKey")
            .field("len", &self.data.len())
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// A `SecKey` carrying a revocation status, used for optional
/// certificate-chain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecOpt {
    pub key: SecKey,
    pub revoked: bool,
}

impl SecOpt {
    /// Constructs a new, non-revoked `SecOpt`.
    pub fn new(data: Vec<u8>, encoding: Encoding) -> SecOpt {
        SecOpt {
            key: SecKey::new(data, encoding),
            revoked: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_strings() {
        assert_eq!("oic.sec.encoding.raw", Encoding::Raw.as_str());
        assert_eq!("oic.sec.encoding.base64", Encoding::Base64.as_str());
        assert_eq!("oic.sec.encoding.der", Encoding::Der.as_str());
        assert_eq!("oic.sec.encoding.pem", Encoding::Pem.as_str());

        for encoding in
            [Encoding::Raw, Encoding::Base64, Encoding::Der, Encoding::Pem]
        {
            assert_eq!(encoding, Encoding::parse(encoding.as_str()).unwrap());
        }
        assert!(Encoding::parse("oic.sec.encoding.jwk").is_err());
    }

    #[test]
    fn binary_vs_text() {
        assert!(Encoding::Raw.is_binary());
        assert!(Encoding::Der.is_binary());
        assert!(!Encoding::Base64.is_binary());
        assert!(!Encoding::Pem.is_binary());
    }

    #[test]
    fn replace_key() {
        let mut key = SecKey::new(vec![1, 2, 3], Encoding::Raw);
        key.replace(b"AQID".to_vec(), Encoding::Base64);
        assert_eq!(b"AQID", key.data());
        assert_eq!(Encoding::Base64, key.encoding());
    }

    #[test]
    fn equality() {
        let a = SecKey::new(vec![1, 2, 3], Encoding::Raw);
        let b = SecKey::new(vec![1, 2, 3], Encoding::Raw);
        let c = SecKey::new(vec![1, 2, 3], Encoding::Der);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
