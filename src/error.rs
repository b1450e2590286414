//! The errors of the crate.

use core::fmt;
#[cfg(feature = "std")]
use std::error;

use crate::cbor;

/// The catch-all error type for this crate.
// TODO: Derive PartialEq as soon as cbor does for its error type
#[derive(Debug)]
pub enum Error {
    /// Malformed caller input, such as an empty payload or a zero
    /// credential id.
    InvalidParam,
    /// A lookup found nothing to return or delete.
    NotFound,
    /// The device onboarding state does not allow the requested state
    /// transition.
    Forbidden,
    /// The operation is not allowed in the current device onboarding state.
    NotAcceptable,
    /// The payload decoded as CBOR but its shape is invalid for the target
    /// schema version.
    SchemaViolation,
    /// Wraps errors from the `cbor` module.
    Cbor(cbor::CborError),
    /// Wraps errors from `hkdf`.
    Hkdf(hkdf::InvalidLength),
    /// Persistence or other internal failure that may leave the secure
    /// virtual resources in an unstable state.
    Internal,
}

impl From<cbor::CborError> for Error {
    fn from(e: cbor::CborError) -> Error {
        Error::Cbor(e)
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(e: hkdf::InvalidLength) -> Error {
        Error::Hkdf(e)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(_: base64::DecodeError) -> Error {
        Error::InvalidParam
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidParam => write!(f, "Invalid parameter"),
            Error::NotFound => write!(f, "No matching entry"),
            Error::Forbidden => {
                write!(f, "Device onboarding state transition not allowed")
            }
            Error::NotAcceptable => {
                write!(f, "Operation not allowed in current onboarding state")
            }
            Error::SchemaViolation => {
                write!(f, "Payload shape invalid for schema version")
            }
            Error::Cbor(e) => e.fmt(f),
            Error::Hkdf(e) => e.fmt(f),
            Error::Internal => write!(f, "Internal error"),
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Cbor(e) => Some(e),
            Error::Hkdf(e) => Some(e),
            // Other errors that don't wrap a source
            _ => None,
        }
    }
}
