//! The persistent storage boundary for secure virtual resource payloads.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};

use crate::{error::Error, Result};

/// Storage name of the credential payload.
pub const CRED_NAME: &str = "cred";
/// Storage name of the access control list payload.
pub const ACL_NAME: &str = "acl";
/// Storage name of the provisioning status payload.
pub const PSTAT_NAME: &str = "pstat";

/// A named-blob store holding the persisted CBOR payload of each secure
/// virtual resource.
///
/// Writes are blocking call-and-return; persistence is always the last step
/// of a mutating request, so the in-memory state can only ever be ahead of
/// the store between a mutation and its persist call.
pub trait SvrStore {
    /// Returns the persisted payload under the given name, if any.
    fn get(&self, name: &str) -> Option<Vec<u8>>;

    /// Persists the payload under the given name.
    fn put(&mut self, name: &str, payload: &[u8]) -> Result<()>;

    /// Removes every persisted secure virtual resource payload.
    fn reset(&mut self) -> Result<()>;
}

/// An in-memory `SvrStore`.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: BTreeMap<String, Vec<u8>>,
    fail_puts: bool,
}

impl MemStore {
    /// Constructs an empty store.
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Makes every subsequent `put` fail, to exercise persistence error
    /// paths.
    pub fn set_fail_puts(&mut self, fail: bool) {
        self.fail_puts = fail;
    }
}

impl SvrStore for MemStore {
    fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }

    fn put(&mut self, name: &str, payload: &[u8]) -> Result<()> {
        if self.fail_puts {
            return Err(Error::Internal);
        }
        self.entries.insert(name.to_string(), payload.to_vec());

        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.entries.clear();

        Ok(())
    }
}
