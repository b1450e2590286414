//! Helpful functionality around the `serde_cbor` crate.

use alloc::vec::Vec;
use core::{cmp, result};
use serde::Serialize;
use serde_cbor::{de, ser::Write, Serializer};

mod error;
pub use error::CborError;

/// The result type for the `cbor` module.
pub type Result<T> = core::result::Result<T, CborError>;

/// Implements the `Write` trait from `serde_cbor` using a `Vec<u8>`.
///
/// It allocates when necessary, so encoding never runs out of buffer space
/// and never needs a retry with a larger allocation, unlike `SliceWrite`.
struct VecWrite {
    vec: Vec<u8>,
}

impl VecWrite {
    /// Constructs a new `VecWrite` based on a 128 byte `Vec<u8>`.
    pub fn new() -> VecWrite {
        VecWrite::with_capacity(128)
    }

    /// Constructs a new `VecWrite` based on a `Vec<u8>` of specified capacity.
    pub fn with_capacity(capacity: usize) -> VecWrite {
        VecWrite {
            vec: Vec::with_capacity(capacity),
        }
    }

    /// Returns the vector, consuming the writer.
    pub fn into_vec(self) -> Vec<u8> {
        self.vec
    }
}

impl Write for VecWrite {
    type Error = serde_cbor::Error;

    fn write_all(&mut self, buf: &[u8]) -> result::Result<(), Self::Error> {
        if self.vec.capacity() - self.vec.len() < buf.len() {
            // Allocate to make sure we have either at least 128 bytes free
            // space, or if what we're trying to insert is larger than that,
            // make room for it and 8 additional bytes (for later inserts).
            self.vec.reserve(cmp::max(128, buf.len() + 8));
        }
        // Copy buffer elements into our vector
        self.vec.extend_from_slice(buf);

        Ok(())
    }
}

/// Serializes an object into CBOR.
pub fn encode(object: impl Serialize) -> Result<Vec<u8>> {
    // Initialize a writer and serializer relying on it
    let writer = VecWrite::new();
    let mut serializer = Serializer::new(writer);
    // Attempt serialization
    object.serialize(&mut serializer)?;

    Ok(serializer.into_inner().into_vec())
}

/// Deserializes a CBOR encoded object.
pub fn decode<'a, T>(bytes: &'a mut [u8]) -> Result<T>
where
    T: serde::Deserialize<'a>,
{
    Ok(de::from_mut_slice(bytes)?)
}
