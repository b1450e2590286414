//! The access control list (`acl`/`acl2`) resource manager.

use alloc::{string::String, vec, vec::Vec};
use bitflags::bitflags;
use log::{debug, info, warn};

use crate::{
    error::Error,
    store::{SvrStore, ACL_NAME},
    types::{Role, Uuid},
    Result,
};

pub(crate) mod codec;

pub use codec::AclVersion;

/// URI of the resource directory.
const RES_URI: &str = "/oic/res";
/// URI of the device resource.
const DEVICE_URI: &str = "/oic/d";
/// URI of the platform resource.
const PLATFORM_URI: &str = "/oic/p";
/// URI of the ownership transfer resource.
const DOXM_URI: &str = "/oic/sec/doxm";
/// URI of the roles resource.
const ROLES_URI: &str = "/oic/sec/roles";

bitflags! {
    /// The CRUDN permission bitmask of an access control entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permission: u16 {
        const CREATE = 0x01;
        const READ = 0x02;
        const WRITE = 0x04;
        const DELETE = 0x08;
        const NOTIFY = 0x10;
    }
}

/// The resource wildcard markers of ACL v2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wildcard {
    /// No wildcard, the entry names its resource explicitly.
    None,
    /// All discoverable resources.
    AllDiscoverable,
    /// All non-discoverable resources.
    AllNonDiscoverable,
    /// All resources.
    All,
}

/// The connection-type subjects of ACL v2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conntype {
    /// Peers over an authenticated, encrypted connection.
    AuthCrypt,
    /// Anonymous peers over a clear connection.
    AnonClear,
}

/// The subject of an access control entry. Exactly one variant applies
/// per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AceSubject {
    Uuid(Uuid),
    Role(Role),
    Conn(Conntype),
}

/// A resource reference within an access control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AceResource {
    pub href: Option<String>,
    pub rel: Option<String>,
    pub types: Vec<String>,
    pub interfaces: Vec<String>,
    pub wildcard: Wildcard,
}

impl AceResource {
    /// Constructs a plain href reference.
    pub fn from_href(href: &str) -> AceResource {
        AceResource {
            href: Some(String::from(href)),
            rel: None,
            types: Vec::new(),
            interfaces: Vec::new(),
            wildcard: Wildcard::None,
        }
    }

    /// Structural equality for duplicate detection: href plus the
    /// unordered type and interface sets.
    fn is_same(&self, other: &AceResource) -> bool {
        match (&self.href, &other.href) {
            (Some(a), Some(b)) => {
                a == b
                    && is_same_string_set(&self.types, &other.types)
                    && is_same_string_set(
                        &self.interfaces,
                        &other.interfaces,
                    )
            }
            // Resources without an href never match
            _ => false,
        }
    }
}

/// A validity period with optional recurrence rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    pub period: String,
    pub recurrences: Vec<String>,
}

/// A single access control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    /// Unique id within the ACL. Zero marks an entry whose id has not
    /// been assigned yet.
    pub aceid: u16,
    pub subject: AceSubject,
    pub resources: Vec<AceResource>,
    pub permission: Permission,
    pub validities: Vec<Validity>,
    pub eowner: Option<Uuid>,
}

impl Ace {
    /// Structural equality for duplicate detection. The id is identity,
    /// not structure, and takes no part in the comparison.
    pub fn is_same(&self, other: &Ace) -> bool {
        self.subject == other.subject
            && self.permission == other.permission
            && self.eowner == other.eowner
            && is_same_resource_set(&self.resources, &other.resources)
            && is_same_validity_set(&self.validities, &other.validities)
    }
}

/// The access control list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub aces: Vec<Ace>,
    pub rowner: Uuid,
}

fn is_same_string_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len()
        && a.iter().all(|s| b.iter().any(|other| s == other))
}

fn is_same_resource_set(a: &[AceResource], b: &[AceResource]) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }

    a.iter()
        .all(|rsrc| b.iter().any(|other| rsrc.is_same(other)))
        && a.len() == b.len()
}

fn is_same_validity_set(a: &[Validity], b: &[Validity]) -> bool {
    a.len() == b.len()
        && a.iter().all(|val| {
            b.iter().any(|other| {
                val.period == other.period
                    && is_same_string_set(
                        &val.recurrences,
                        &other.recurrences,
                    )
            })
        })
}

/// Returns the bootstrap ACL of a factory-fresh device: read access to
/// the discovery resources for anonymous and authenticated peers, plus
/// the ownership transfer entries that make taking ownership possible.
pub fn default_acl(device_id: &Uuid) -> Acl {
    let discovery = vec![
        AceResource::from_href(RES_URI),
        AceResource::from_href(DEVICE_URI),
        AceResource::from_href(PLATFORM_URI),
    ];

    let aces = vec![
        Ace {
            aceid: 1,
            subject: AceSubject::Conn(Conntype::AnonClear),
            resources: discovery.clone(),
            permission: Permission::READ,
            validities: Vec::new(),
            eowner: None,
        },
        Ace {
            aceid: 2,
            subject: AceSubject::Conn(Conntype::AuthCrypt),
            resources: discovery,
            permission: Permission::READ,
            validities: Vec::new(),
            eowner: None,
        },
        Ace {
            aceid: 3,
            subject: AceSubject::Conn(Conntype::AnonClear),
            resources: vec![AceResource::from_href(DOXM_URI)],
            permission: Permission::READ
                | Permission::WRITE
                | Permission::DELETE,
            validities: Vec::new(),
            eowner: None,
        },
        Ace {
            aceid: 4,
            subject: AceSubject::Conn(Conntype::AuthCrypt),
            resources: vec![
                AceResource::from_href(DOXM_URI),
                AceResource::from_href(ROLES_URI),
            ],
            permission: Permission::READ
                | Permission::WRITE
                | Permission::DELETE,
            validities: Vec::new(),
            eowner: None,
        },
    ];

    Acl {
        aces,
        rowner: *device_id,
    }
}

/// Owns the device's access control list.
pub struct AclManager {
    acl: Acl,
}

impl AclManager {
    /// Loads the persisted ACL, falling back to the bootstrap one so a
    /// factory-fresh device can undergo ownership transfer.
    pub fn init(store: &dyn SvrStore, device_id: &Uuid) -> AclManager {
        let acl = match store.get(ACL_NAME) {
            Some(mut payload) => match codec::decode(&mut payload) {
                Ok(acl) => acl,
                Err(e) => {
                    warn!("persisted ACL unusable ({}), using default", e);
                    default_acl(device_id)
                }
            },
            None => default_acl(device_id),
        };

        AclManager { acl }
    }

    /// Returns the current ACL.
    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    /// Merges a decoded ACL into the current one and persists once.
    ///
    /// Entries structurally identical to an existing one are dropped;
    /// genuinely new entries are prepended, receiving a fresh id if they
    /// carry none. The incoming resource owner is adopted.
    pub fn install(
        &mut self,
        new: Acl,
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        for mut ace in new.aces {
            if self.acl.aces.iter().any(|existing| existing.is_same(&ace)) {
                debug!("dropping duplicate ACE");
                continue;
            }
            if ace.aceid == 0 {
                ace.aceid = self.next_ace_id();
            }
            self.acl.aces.insert(0, ace);
        }
        self.acl.rowner = new.rowner;

        self.persist(store)
    }

    /// Adds a single entry, with the same duplicate handling as
    /// `install`.
    pub fn add(&mut self, ace: Ace, store: &mut dyn SvrStore) -> Result<()> {
        let rowner = self.acl.rowner;
        self.install(
            Acl {
                aces: vec![ace],
                rowner,
            },
            store,
        )
    }

    /// Removes entries of the given UUID subject.
    ///
    /// Without an href every matching entry is removed. With an href only
    /// the matching resource reference is removed from each entry, and an
    /// entry disappears once its resource list runs empty. The wildcard
    /// subject is rejected, so this path cannot mass-delete.
    ///
    /// # Arguments
    /// * `subject` - The UUID subject whose entries are affected.
    /// * `href` - The single resource reference to remove, if any.
    /// * `store` - The persistence collaborator.
    pub fn remove(
        &mut self,
        subject: &Uuid,
        href: Option<&str>,
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        if subject.is_wildcard() {
            return Err(Error::InvalidParam);
        }

        let mut removed = false;
        match href {
            None => {
                let before = self.acl.aces.len();
                self.acl
                    .aces
                    .retain(|ace| !subject_matches(&ace.subject, subject));
                removed = self.acl.aces.len() != before;
            }
            Some(href) => {
                for ace in self
                    .acl
                    .aces
                    .iter_mut()
                    .filter(|ace| subject_matches(&ace.subject, subject))
                {
                    let before = ace.resources.len();
                    ace.resources
                        .retain(|rsrc| rsrc.href.as_deref() != Some(href));
                    removed |= ace.resources.len() != before;
                }
                if removed {
                    // Entries whose resource list ran empty go as a whole
                    self.acl.aces.retain(|ace| {
                        !(subject_matches(&ace.subject, subject)
                            && ace.resources.is_empty())
                    });
                }
            }
        }
        if !removed {
            return Err(Error::NotFound);
        }

        self.persist(store)
    }

    /// Removes every entry, with a compensating rollback.
    ///
    /// The ACL is backed up before clearing; if persisting the empty list
    /// fails, the backup is restored in memory and re-persisted on a
    /// best-effort basis, and the original persistence error is reported.
    pub fn remove_all(&mut self, store: &mut dyn SvrStore) -> Result<()> {
        let backup = codec::encode(&self.acl, AclVersion::V2)?;

        self.acl.aces.clear();
        if let Err(e) = self.persist(store) {
            warn!("persisting empty ACL failed, restoring backup");
            let mut payload = backup.clone();
            match codec::decode(&mut payload) {
                Ok(original) => {
                    self.acl = original;
                    if store.put(ACL_NAME, &backup).is_err() {
                        warn!("re-persisting ACL backup failed");
                    }
                }
                Err(_) => return Err(Error::Internal),
            }
            return Err(e);
        }

        info!("all ACEs removed");

        Ok(())
    }

    /// Returns the entries matching a UUID subject.
    pub fn aces_for_subject<'a>(
        &'a self,
        subject: &'a Uuid,
    ) -> impl Iterator<Item = &'a Ace> {
        self.acl
            .aces
            .iter()
            .filter(move |ace| ace.subject == AceSubject::Uuid(*subject))
    }

    /// Returns the entries matching any of the given roles.
    pub fn aces_for_roles<'a>(
        &'a self,
        roles: &'a [Role],
    ) -> impl Iterator<Item = &'a Ace> {
        self.acl.aces.iter().filter(move |ace| match &ace.subject {
            AceSubject::Role(role) => roles.contains(role),
            _ => false,
        })
    }

    /// Returns the entries matching a connection type.
    pub fn aces_for_conntype(
        &self,
        conntype: Conntype,
    ) -> impl Iterator<Item = &Ace> {
        self.acl
            .aces
            .iter()
            .filter(move |ace| ace.subject == AceSubject::Conn(conntype))
    }

    /// Returns the CBOR representation of the ACL in the given schema
    /// version.
    pub fn to_payload(&self, version: AclVersion) -> Result<Vec<u8>> {
        codec::encode(&self.acl, version)
    }

    /// Persists the ACL in its v2 representation.
    pub fn persist(&self, store: &mut dyn SvrStore) -> Result<()> {
        let payload = codec::encode(&self.acl, AclVersion::V2)?;
        store.put(ACL_NAME, &payload)
    }

    /// Returns the lowest unused entry id.
    fn next_ace_id(&self) -> u16 {
        let mut id = 1;
        while self.acl.aces.iter().any(|ace| ace.aceid == id) {
            id += 1;
        }

        id
    }
}

fn subject_matches(subject: &AceSubject, uuid: &Uuid) -> bool {
    matches!(subject, AceSubject::Uuid(s) if s == uuid)
}
