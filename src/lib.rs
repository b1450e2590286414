//! An implementation of the
//! [OCF](https://openconnectivity.org/developer/specifications/)
//! security virtual resource subsystem, intended for constrained devices.
//!
//! It covers the device onboarding state machine (`pstat`), the access
//! control list (`acl`/`acl2`) and the credential store (`cred`),
//! including their CBOR wire representations, the per-property access
//! matrix gating mutations by onboarding state, and the owner PSK
//! derivation performed during ownership transfer. The CoAP transport,
//! the (D)TLS handshake and persistent storage live outside this crate,
//! behind the request boundary in [`device`] and the [`store::SvrStore`]
//! trait.
//!
//! ## Security
//! This should **not currently be used in production code**, use at your
//! own risk.

#![no_std]
#[macro_use]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod cbor;

pub mod acl;
pub mod cred;
pub mod device;
pub mod dos;
pub mod error;
pub mod pstat;
pub mod query;
pub mod seckey;
pub mod store;
pub mod types;

pub use error::Error;

/// The result type for this crate.
pub type Result<T> = core::result::Result<T, Error>;
