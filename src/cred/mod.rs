//! The credential (`cred`) resource manager.

use alloc::{string::String, vec::Vec};
use hkdf::Hkdf;
use log::{debug, info, warn};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    dos::{svr_read_only, DosState},
    error::Error,
    seckey::{Encoding, SecKey, SecOpt},
    store::{SvrStore, CRED_NAME},
    types::{Doxm, Role, Uuid},
    Result,
};

pub(crate) mod codec;
pub mod pem;

/// Usage tag of the single preconfigured-PIN credential.
pub const PRECONFIG_PIN_USAGE: &str = "oic.sec.cred.usage.preconfpin";
/// Usage tag of trusted CA certificates.
pub const TRUST_CA_USAGE: &str = "oic.sec.cred.usage.trustca";
/// Usage tag of the device's own certificate.
pub const CERT_USAGE: &str = "oic.sec.cred.usage.cert";
/// Usage tag of manufacturer trust anchors.
pub const MFG_TRUST_CA_USAGE: &str = "oic.sec.cred.usage.mfgtrustca";
/// Usage tag of the manufacturer certificate.
pub const MFG_CERT_USAGE: &str = "oic.sec.cred.usage.mfgcert";

/// Length of derived pairwise keys.
pub const PSK_LEN: usize = 16;

/// The credential types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredType {
    NoSecurityMode = 0,
    SymmetricPairwise = 1,
    SymmetricGroup = 2,
    Asymmetric = 4,
    SignedAsymmetric = 8,
    Pin = 16,
    AsymmetricEncryption = 32,
}

impl CredType {
    /// Parses the wire integer of the credential type.
    pub fn parse(value: i64) -> Result<CredType> {
        match value {
            0 => Ok(CredType::NoSecurityMode),
            1 => Ok(CredType::SymmetricPairwise),
            2 => Ok(CredType::SymmetricGroup),
            4 => Ok(CredType::Asymmetric),
            8 => Ok(CredType::SignedAsymmetric),
            16 => Ok(CredType::Pin),
            32 => Ok(CredType::AsymmetricEncryption),
            _ => Err(Error::SchemaViolation),
        }
    }
}

/// A single credential record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Unique, non-zero id within the device. Zero marks a record whose id
    /// has not been assigned yet.
    pub id: u16,
    pub subject: Uuid,
    pub role: Option<Role>,
    pub credtype: CredType,
    pub public: Option<SecKey>,
    pub private: Option<SecKey>,
    pub optional: Option<SecOpt>,
    pub usage: Option<String>,
    pub period: Option<String>,
    pub eowner: Option<Uuid>,
}

impl Credential {
    /// Constructs a credential with the given key material, for
    /// self-provisioning flows. The id is assigned by the manager on add.
    pub fn generate(
        subject: Uuid,
        credtype: CredType,
        public: Option<SecKey>,
        private: Option<SecKey>,
        eowner: Option<Uuid>,
    ) -> Credential {
        Credential {
            id: 0,
            subject,
            role: None,
            credtype,
            public,
            private,
            optional: None,
            usage: None,
            period: None,
            eowner,
        }
    }

    /// Returns whether the record satisfies the field-presence rules of
    /// its credential type.
    pub fn is_valid(&self) -> bool {
        if self.id == 0 || self.subject.is_nil() {
            return false;
        }

        match self.credtype {
            CredType::SymmetricPairwise
            | CredType::SymmetricGroup
            | CredType::Pin => match &self.private {
                Some(key) => {
                    !key.is_empty()
                        && matches!(
                            key.encoding(),
                            Encoding::Raw | Encoding::Base64
                        )
                }
                None => false,
            },
            CredType::Asymmetric => match &self.public {
                Some(key) => !key.is_empty(),
                None => false,
            },
            CredType::SignedAsymmetric => {
                let has_public =
                    self.public.as_ref().map_or(false, |key| !key.is_empty());
                let has_optional = self
                    .optional
                    .as_ref()
                    .map_or(false, |opt| !opt.key.is_empty());
                has_public || has_optional
            }
            CredType::AsymmetricEncryption => match &self.private {
                Some(key) => !key.is_empty(),
                None => false,
            },
            CredType::NoSecurityMode => false,
        }
    }

    /// Returns whether this is the all-empty sentinel record.
    pub fn is_empty(&self) -> bool {
        self.id == 0
            && self.subject.is_nil()
            && self.role.is_none()
            && self.credtype == CredType::NoSecurityMode
            && self.public.is_none()
            && self.private.is_none()
            && self.optional.is_none()
            && self.usage.is_none()
    }
}

/// Derives the pairwise pre-shared key used during ownership transfer.
///
/// Implementations stand in for the transport-layer key exporter; the
/// inputs bind the key to the session peer, the ownership transfer method
/// and both party identities.
pub trait PskDeriver {
    fn derive(
        &self,
        peer: &str,
        label: &[u8],
        owner: &Uuid,
        device: &Uuid,
    ) -> Result<[u8; PSK_LEN]>;
}

/// A `PskDeriver` expanding a session master secret with HKDF-SHA256.
pub struct HkdfPskDeriver {
    master_secret: Vec<u8>,
}

impl HkdfPskDeriver {
    /// Constructs a deriver around the session master secret.
    pub fn new(master_secret: Vec<u8>) -> HkdfPskDeriver {
        HkdfPskDeriver { master_secret }
    }
}

impl Drop for HkdfPskDeriver {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl PskDeriver for HkdfPskDeriver {
    fn derive(
        &self,
        peer: &str,
        label: &[u8],
        owner: &Uuid,
        device: &Uuid,
    ) -> Result<[u8; PSK_LEN]> {
        // This is the extract step, resulting in the pseudorandom key (PRK)
        let h =
            Hkdf::<Sha256>::new(Some(peer.as_bytes()), &self.master_secret);
        // Expand the PRK with the method label and both identities
        let mut info =
            Vec::with_capacity(label.len() + 2 * owner.as_bytes().len());
        info.extend_from_slice(label);
        info.extend_from_slice(owner.as_bytes());
        info.extend_from_slice(device.as_bytes());
        let mut okm = [0; PSK_LEN];
        h.expand(&info, &mut okm)?;

        Ok(okm)
    }
}

/// Derives the owner PSK and writes it into the received credential's
/// private-data field, honoring the encoding the credential declares.
///
/// Returns whether the resulting credential matches the expected owner,
/// i.e. its subject is the device owner and it is a symmetric pairwise
/// key. The raw key buffer is wiped before returning on every path.
///
/// # Arguments
/// * `cred` - The credential received during ownership transfer.
/// * `peer` - The session peer address.
/// * `doxm` - The device's ownership record.
/// * `deriver` - The pairwise key derivation collaborator.
pub fn fill_owner_psk(
    cred: &mut Credential,
    peer: &str,
    doxm: &Doxm,
    deriver: &dyn PskDeriver,
) -> Result<bool> {
    fill_psk(cred, peer, doxm, &doxm.owner, deriver)?;
    info!("owner PSK written into received credential");

    Ok(cred.subject == doxm.owner
        && cred.credtype == CredType::SymmetricPairwise)
}

/// Derives a sub-owner PSK into the received credential's private-data
/// field, like `fill_owner_psk` but bound to the sub-owner identity.
pub fn fill_sub_owner_psk(
    cred: &mut Credential,
    peer: &str,
    doxm: &Doxm,
    sub_owner: &Uuid,
    deriver: &dyn PskDeriver,
) -> Result<bool> {
    fill_psk(cred, peer, doxm, sub_owner, deriver)?;
    info!("sub-owner PSK written into received credential");

    Ok(cred.subject == *sub_owner
        && cred.credtype == CredType::SymmetricPairwise)
}

fn fill_psk(
    cred: &mut Credential,
    peer: &str,
    doxm: &Doxm,
    key_owner: &Uuid,
    deriver: &dyn PskDeriver,
) -> Result<()> {
    let label = doxm.oxm.label();
    let mut psk = deriver.derive(
        peer,
        label.as_bytes(),
        key_owner,
        &doxm.device_id,
    )?;

    let result = match cred.private.as_mut() {
        Some(key) if key.encoding() == Encoding::Raw => {
            key.replace(psk.to_vec(), Encoding::Raw);
            Ok(())
        }
        Some(key) if key.encoding() == Encoding::Base64 => {
            key.replace(base64::encode(&psk).into_bytes(), Encoding::Base64);
            Ok(())
        }
        Some(key) => {
            warn!("unusable private-data encoding {}", key.encoding());
            Err(Error::SchemaViolation)
        }
        None => {
            warn!("received credential carries no private-data field");
            Err(Error::InvalidParam)
        }
    };
    psk.zeroize();

    result
}

/// Owns the device's credential list and its resource owner.
pub struct CredManager {
    creds: Vec<Credential>,
    rowner: Uuid,
}

impl CredManager {
    /// Loads the persisted credential list, dropping entries that fail
    /// validation. Starts empty if nothing usable is persisted.
    pub fn init(store: &dyn SvrStore) -> CredManager {
        let (mut creds, rowner) = match store.get(CRED_NAME) {
            Some(mut payload) => match codec::from_payload(&mut payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("persisted creds unusable ({}), starting empty", e);
                    (Vec::new(), None)
                }
            },
            None => (Vec::new(), None),
        };
        let before = creds.len();
        creds.retain(Credential::is_valid);
        if creds.len() < before {
            warn!("dropped {} invalid persisted creds", before - creds.len());
        }

        CredManager {
            creds,
            rowner: rowner.unwrap_or(Uuid::NIL),
        }
    }

    /// Returns the live credential list.
    pub fn creds(&self) -> &[Credential] {
        &self.creds
    }

    /// Returns the resource owner.
    pub fn rowner(&self) -> &Uuid {
        &self.rowner
    }

    /// Replaces the resource owner without persisting; the next persist
    /// call writes it out.
    pub fn set_rowner(&mut self, rowner: Uuid) {
        self.rowner = rowner;
    }

    /// Adds a credential to the list and persists it.
    ///
    /// A zero id is replaced with the lowest free one. A non-zero id is
    /// authoritative and evicts any record it collides with, except for
    /// the single preconfigured-PIN credential, where the incoming id is
    /// discarded and the existing record is updated in place. The list is
    /// read-only while the device is in the RESET or RFNOP state.
    pub fn add(
        &mut self,
        mut cred: Credential,
        rowner: Option<Uuid>,
        state: DosState,
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        if svr_read_only(state) {
            warn!("cred resource is read-only in {:?}", state);
            return Err(Error::NotAcceptable);
        }

        // Devices hold at most one preconfigured-PIN credential; a new one
        // is an update to the existing record, whatever id it carries
        if cred.usage.as_deref() == Some(PRECONFIG_PIN_USAGE) {
            if let Some(existing) = self
                .creds
                .iter_mut()
                .find(|c| c.usage.as_deref() == Some(PRECONFIG_PIN_USAGE))
            {
                cred.id = existing.id;
                *existing = cred;
                return self.persist(store);
            }
        }

        if cred.id != 0 {
            self.creds.retain(|c| c.id != cred.id);
        } else {
            cred.id = self.next_id()?;
        }
        debug!("adding credential {}", cred.id);
        self.creds.push(cred);

        if let Some(owner) = rowner {
            if !owner.is_nil() {
                self.rowner = owner;
            }
        }

        self.persist(store)
    }

    /// Removes every credential with the given subject.
    pub fn remove(
        &mut self,
        subject: &Uuid,
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        let before = self.creds.len();
        self.creds.retain(|c| c.subject != *subject);
        if self.creds.len() == before {
            return Err(Error::NotFound);
        }

        self.persist(store)
    }

    /// Removes the credential with the given id. Zero is not a valid id.
    pub fn remove_by_id(
        &mut self,
        id: u16,
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        if id == 0 {
            return Err(Error::InvalidParam);
        }

        self.remove_by_ids(&[id], store)
    }

    /// Removes every credential whose id is in the given list.
    pub fn remove_by_ids(
        &mut self,
        ids: &[u16],
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        let before = self.creds.len();
        self.creds.retain(|c| !ids.contains(&c.id));
        if self.creds.len() == before {
            return Err(Error::NotFound);
        }

        self.persist(store)
    }

    /// Removes every credential.
    pub fn remove_all(&mut self, store: &mut dyn SvrStore) -> Result<()> {
        self.creds.clear();

        self.persist(store)
    }

    /// Returns the first credential with the given subject.
    pub fn lookup(&self, subject: &Uuid) -> Option<&Credential> {
        self.creds.iter().find(|c| c.subject == *subject)
    }

    /// Returns a copy of the credential with the given id.
    pub fn lookup_by_id(&self, id: u16) -> Option<Credential> {
        self.creds.iter().find(|c| c.id == id).cloned()
    }

    /// Returns the lowest unused credential id.
    fn next_id(&self) -> Result<u16> {
        let mut ids: Vec<u16> = self.creds.iter().map(|c| c.id).collect();
        ids.sort_unstable();

        let mut next = 1u16;
        for id in ids {
            if id == next {
                if next == u16::MAX {
                    return Err(Error::Internal);
                }
                next += 1;
            } else if id > next {
                break;
            }
        }

        Ok(next)
    }

    /// Returns the CBOR representation of the list. With `secure` set,
    /// private key material is omitted.
    pub fn to_payload(&self, secure: bool) -> Result<Vec<u8>> {
        codec::to_payload(&self.creds, &self.rowner, secure)
    }

    /// Persists the full list, private key material included.
    pub fn persist(&self, store: &mut dyn SvrStore) -> Result<()> {
        let payload = self.to_payload(false)?;
        store.put(CRED_NAME, &payload)
    }

    /// Returns the concatenated, non-revoked CA certificates matching a
    /// usage tag, in the desired encoding (PEM or DER).
    pub fn ca_certs(
        &self,
        usage: &str,
        desired: Encoding,
    ) -> Result<Vec<u8>> {
        if !matches!(desired, Encoding::Pem | Encoding::Der) {
            return Err(Error::InvalidParam);
        }

        let mut out = Vec::new();
        for cred in self.creds.iter().filter(|c| {
            c.credtype == CredType::SignedAsymmetric
                && c.usage.as_deref() == Some(usage)
                && !c.optional.as_ref().map_or(false, |opt| opt.revoked)
        }) {
            let public = match &cred.public {
                Some(key) => key,
                None => continue,
            };
            match (public.encoding(), desired) {
                (Encoding::Pem, Encoding::Pem)
                | (Encoding::Base64, Encoding::Pem) => {
                    append_pem(&mut out, public.data());
                }
                (Encoding::Der, Encoding::Pem) => {
                    append_pem(&mut out, &pem::cert_der_to_pem(public.data()));
                }
                (Encoding::Der, Encoding::Der) => {
                    out.extend_from_slice(public.data());
                }
                (Encoding::Pem, Encoding::Der)
                | (Encoding::Base64, Encoding::Der) => {
                    out.extend_from_slice(&pem::cert_pem_to_der(
                        public.data(),
                    )?);
                }
                _ => {
                    warn!("skipping CA cert with unusable encoding");
                    continue;
                }
            }
        }

        if out.is_empty() {
            debug!("no CA certs for usage {}", usage);
            return Err(Error::NotFound);
        }

        Ok(out)
    }

    /// Returns the device's own certificate chain matching a usage tag,
    /// as concatenated PEM.
    pub fn own_cert_pem(&self, usage: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for cred in self.creds.iter().filter(|c| {
            c.credtype == CredType::SignedAsymmetric
                && c.usage.as_deref() == Some(usage)
        }) {
            let public = match &cred.public {
                Some(key) => key,
                None => continue,
            };
            match public.encoding() {
                Encoding::Der | Encoding::Raw => {
                    append_pem(&mut out, &pem::cert_der_to_pem(public.data()));
                }
                Encoding::Pem | Encoding::Base64 => {
                    append_pem(&mut out, public.data());
                }
            }
        }

        if out.is_empty() {
            debug!("no own cert for usage {}", usage);
            return Err(Error::NotFound);
        }

        Ok(out)
    }

    /// Returns the first private key matching a usage tag, as DER.
    pub fn private_key_der(&self, usage: &str) -> Result<Vec<u8>> {
        for cred in self.creds.iter().filter(|c| {
            matches!(
                c.credtype,
                CredType::SignedAsymmetric | CredType::Asymmetric
            ) && c.usage.as_deref() == Some(usage)
        }) {
            let private = match &cred.private {
                Some(key) if !key.is_empty() => key,
                _ => continue,
            };
            match private.encoding() {
                Encoding::Der | Encoding::Raw => {
                    return Ok(private.data().to_vec());
                }
                Encoding::Pem => {
                    return pem::key_pem_to_der(private.data());
                }
                Encoding::Base64 => {
                    warn!("key for {} has unusable encoding", usage);
                }
            }
        }

        Err(Error::NotFound)
    }
}

/// Appends a PEM block, keeping a line break between blocks.
fn append_pem(out: &mut Vec<u8>, pem: &[u8]) {
    if let Some(&last) = out.last() {
        if last != b'\n' {
            out.push(b'\n');
        }
    }
    out.extend_from_slice(pem);
}

#[cfg(test)]
mod tests {
    use crate::{store::MemStore, types::Oxm};

    use super::*;

    const OWNER: Uuid = Uuid::from_bytes([0x42; 16]);
    const DEVICE: Uuid = Uuid::from_bytes([0x43; 16]);

    fn psk_cred(id: u16, subject: Uuid) -> Credential {
        Credential {
            id,
            subject,
            role: None,
            credtype: CredType::SymmetricPairwise,
            public: None,
            private: Some(SecKey::new(vec![0x01; 16], Encoding::Raw)),
            optional: None,
            usage: None,
            period: None,
            eowner: None,
        }
    }

    struct FixedDeriver;

    impl PskDeriver for FixedDeriver {
        fn derive(
            &self,
            _peer: &str,
            _label: &[u8],
            _owner: &Uuid,
            _device: &Uuid,
        ) -> Result<[u8; PSK_LEN]> {
            Ok([0xA5; PSK_LEN])
        }
    }

    struct FailingDeriver;

    impl PskDeriver for FailingDeriver {
        fn derive(
            &self,
            _peer: &str,
            _label: &[u8],
            _owner: &Uuid,
            _device: &Uuid,
        ) -> Result<[u8; PSK_LEN]> {
            Err(Error::Internal)
        }
    }

    #[test]
    fn id_assignment_fills_gap() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        manager
            .add(psk_cred(1, OWNER), None, state, &mut store)
            .unwrap();
        manager
            .add(psk_cred(3, OWNER), None, state, &mut store)
            .unwrap();
        manager
            .add(psk_cred(0, DEVICE), None, state, &mut store)
            .unwrap();

        let mut ids: Vec<u16> =
            manager.creds().iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(vec![1, 2, 3], ids);
    }

    #[test]
    fn ids_stay_unique_and_nonzero() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfpro;

        for _ in 0..4 {
            manager
                .add(psk_cred(0, OWNER), None, state, &mut store)
                .unwrap();
        }
        manager.remove_by_id(2, &mut store).unwrap();
        manager
            .add(psk_cred(0, DEVICE), None, state, &mut store)
            .unwrap();
        manager
            .add(psk_cred(0, DEVICE), None, state, &mut store)
            .unwrap();

        let mut ids: Vec<u16> =
            manager.creds().iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(manager.creds().len(), ids.len());
        assert!(ids.iter().all(|&id| id != 0));
    }

    #[test]
    fn explicit_id_evicts_collision() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        manager
            .add(psk_cred(5, OWNER), None, state, &mut store)
            .unwrap();
        manager
            .add(psk_cred(5, DEVICE), None, state, &mut store)
            .unwrap();

        assert_eq!(1, manager.creds().len());
        assert_eq!(DEVICE, manager.creds()[0].subject);
    }

    #[test]
    fn preconfig_pin_updates_in_place() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        let mut pin = psk_cred(0, OWNER);
        pin.credtype = CredType::Pin;
        pin.usage = Some(String::from(PRECONFIG_PIN_USAGE));
        manager.add(pin.clone(), None, state, &mut store).unwrap();
        let assigned = manager.creds()[0].id;

        // The incoming id is discarded in favor of the existing one
        let mut update = pin;
        update.id = 9;
        update.private =
            Some(SecKey::new(vec![0x77; 16], Encoding::Raw));
        manager.add(update, None, state, &mut store).unwrap();

        assert_eq!(1, manager.creds().len());
        assert_eq!(assigned, manager.creds()[0].id);
        assert_eq!(
            &[0x77; 16][..],
            manager.creds()[0].private.as_ref().unwrap().data()
        );
    }

    #[test]
    fn read_only_states_reject_add() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);

        for &state in &[DosState::Reset, DosState::Rfnop] {
            assert!(matches!(
                manager.add(psk_cred(0, OWNER), None, state, &mut store),
                Err(Error::NotAcceptable)
            ));
        }
        assert!(manager.creds().is_empty());
        assert_eq!(None, store.get(CRED_NAME));
    }

    #[test]
    fn rowner_update_on_add() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        manager
            .add(psk_cred(0, OWNER), Some(Uuid::NIL), state, &mut store)
            .unwrap();
        assert!(manager.rowner().is_nil());

        manager
            .add(psk_cred(0, DEVICE), Some(OWNER), state, &mut store)
            .unwrap();
        assert_eq!(&OWNER, manager.rowner());
    }

    #[test]
    fn remove_by_subject() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        manager
            .add(psk_cred(0, OWNER), None, state, &mut store)
            .unwrap();
        manager
            .add(psk_cred(0, OWNER), None, state, &mut store)
            .unwrap();
        manager
            .add(psk_cred(0, DEVICE), None, state, &mut store)
            .unwrap();

        manager.remove(&OWNER, &mut store).unwrap();
        assert_eq!(1, manager.creds().len());
        assert!(matches!(
            manager.remove(&OWNER, &mut store),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn remove_by_id_rejects_zero() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);

        assert!(matches!(
            manager.remove_by_id(0, &mut store),
            Err(Error::InvalidParam)
        ));
    }

    #[test]
    fn persistence_roundtrip() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        manager
            .add(psk_cred(0, OWNER), Some(OWNER), state, &mut store)
            .unwrap();

        let reloaded = CredManager::init(&store);
        assert_eq!(manager.creds(), reloaded.creds());
        assert_eq!(manager.rowner(), reloaded.rowner());
    }

    #[test]
    fn persistence_failure_keeps_memory_state() {
        // Unlike the ACL remove-all, credential removal does not roll the
        // in-memory list back when the persist fails; the store and the
        // list intentionally diverge until the next successful persist.
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfotm;

        manager
            .add(psk_cred(0, OWNER), None, state, &mut store)
            .unwrap();

        store.set_fail_puts(true);
        assert!(manager.remove(&OWNER, &mut store).is_err());
        assert!(manager.creds().is_empty());
        assert!(store.get(CRED_NAME).is_some());
    }

    #[test]
    fn owner_psk_raw() {
        let doxm = Doxm {
            device_id: DEVICE,
            owner: OWNER,
            owned: false,
            oxm: Oxm::JustWorks,
        };
        let mut cred = psk_cred(0, OWNER);
        cred.private = Some(SecKey::new(Vec::new(), Encoding::Raw));

        let matches =
            fill_owner_psk(&mut cred, "coaps://[ff02::1]:5684", &doxm, &FixedDeriver)
                .unwrap();
        assert!(matches);
        assert_eq!(
            &[0xA5; PSK_LEN][..],
            cred.private.as_ref().unwrap().data()
        );
    }

    #[test]
    fn owner_psk_base64() {
        let doxm = Doxm {
            device_id: DEVICE,
            owner: OWNER,
            owned: false,
            oxm: Oxm::RandomPin,
        };
        let mut cred = psk_cred(0, OWNER);
        cred.private = Some(SecKey::new(Vec::new(), Encoding::Base64));

        fill_owner_psk(&mut cred, "peer", &doxm, &FixedDeriver).unwrap();
        let stored = cred.private.as_ref().unwrap();
        assert_eq!(Encoding::Base64, stored.encoding());
        assert_eq!(
            [0xA5; PSK_LEN].to_vec(),
            base64::decode(stored.data()).unwrap()
        );
    }

    #[test]
    fn owner_psk_subject_mismatch() {
        let doxm = Doxm {
            device_id: DEVICE,
            owner: OWNER,
            owned: false,
            oxm: Oxm::JustWorks,
        };
        // Subject differs from the owner, so the check must fail even
        // though derivation succeeds
        let mut cred = psk_cred(0, DEVICE);

        let matches =
            fill_owner_psk(&mut cred, "peer", &doxm, &FixedDeriver).unwrap();
        assert!(!matches);
    }

    #[test]
    fn owner_psk_failure_leaves_credential() {
        let doxm = Doxm {
            device_id: DEVICE,
            owner: OWNER,
            owned: false,
            oxm: Oxm::JustWorks,
        };
        let mut cred = psk_cred(0, OWNER);

        assert!(
            fill_owner_psk(&mut cred, "peer", &doxm, &FailingDeriver).is_err()
        );
        assert_eq!(
            &[0x01; 16][..],
            cred.private.as_ref().unwrap().data()
        );
    }

    #[test]
    fn sub_owner_psk() {
        let sub_owner = Uuid::from_bytes([0x44; 16]);
        let doxm = Doxm {
            device_id: DEVICE,
            owner: OWNER,
            owned: true,
            oxm: Oxm::JustWorks,
        };
        let mut cred = psk_cred(0, sub_owner);
        cred.eowner = Some(sub_owner);

        let matches = fill_sub_owner_psk(
            &mut cred,
            "peer",
            &doxm,
            &sub_owner,
            &FixedDeriver,
        )
        .unwrap();
        assert!(matches);
    }

    #[test]
    fn hkdf_deriver_is_deterministic() {
        let deriver = HkdfPskDeriver::new(vec![0x99; 32]);
        let a = deriver
            .derive("peer", b"oic.sec.doxm.jw", &OWNER, &DEVICE)
            .unwrap();
        let b = deriver
            .derive("peer", b"oic.sec.doxm.jw", &OWNER, &DEVICE)
            .unwrap();
        let c = deriver
            .derive("other", b"oic.sec.doxm.jw", &OWNER, &DEVICE)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cert_extraction() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfpro;
        let der = [0x30, 0x82, 0x01, 0x02, 0x03];

        let mut ca = Credential::generate(
            DEVICE,
            CredType::SignedAsymmetric,
            Some(SecKey::new(der.to_vec(), Encoding::Der)),
            None,
            None,
        );
        ca.usage = Some(String::from(TRUST_CA_USAGE));
        manager.add(ca, None, state, &mut store).unwrap();

        // DER comes back verbatim
        assert_eq!(
            der.to_vec(),
            manager.ca_certs(TRUST_CA_USAGE, Encoding::Der).unwrap()
        );
        // PEM is armored and converts back
        let pem_out =
            manager.ca_certs(TRUST_CA_USAGE, Encoding::Pem).unwrap();
        assert_eq!(der.to_vec(), pem::cert_pem_to_der(&pem_out).unwrap());

        assert!(matches!(
            manager.ca_certs(MFG_TRUST_CA_USAGE, Encoding::Pem),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            manager.ca_certs(TRUST_CA_USAGE, Encoding::Raw),
            Err(Error::InvalidParam)
        ));
    }

    #[test]
    fn revoked_ca_is_skipped() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfpro;

        let mut ca = Credential::generate(
            DEVICE,
            CredType::SignedAsymmetric,
            Some(SecKey::new(vec![0x30, 0x01], Encoding::Der)),
            None,
            None,
        );
        ca.usage = Some(String::from(TRUST_CA_USAGE));
        ca.optional = Some(SecOpt {
            key: SecKey::new(Vec::new(), Encoding::Der),
            revoked: true,
        });
        manager.add(ca, None, state, &mut store).unwrap();

        assert!(matches!(
            manager.ca_certs(TRUST_CA_USAGE, Encoding::Der),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn private_key_extraction() {
        let mut store = MemStore::new();
        let mut manager = CredManager::init(&store);
        let state = DosState::Rfpro;
        let key_der = [0x02; 32];

        let mut own = Credential::generate(
            DEVICE,
            CredType::SignedAsymmetric,
            Some(SecKey::new(vec![0x30, 0x01], Encoding::Der)),
            Some(SecKey::new(key_der.to_vec(), Encoding::Der)),
            None,
        );
        own.usage = Some(String::from(CERT_USAGE));
        manager.add(own, None, state, &mut store).unwrap();

        assert_eq!(
            key_der.to_vec(),
            manager.private_key_der(CERT_USAGE).unwrap()
        );
        assert!(manager.own_cert_pem(CERT_USAGE).is_ok());
        assert!(matches!(
            manager.private_key_der(MFG_CERT_USAGE),
            Err(Error::NotFound)
        ));
    }
}
