//! The request-handler boundary of the secure virtual resources.
//!
//! The transport layer is expected to serialize inbound requests to a
//! single dispatch point and call the entity handler of the addressed
//! resource; everything below that boundary is synchronous and
//! single-threaded.

use alloc::vec::Vec;
use log::{debug, warn};

use crate::{
    acl::{codec as acl_codec, AclManager, AclVersion},
    cred::{
        codec as cred_codec, fill_owner_psk, fill_sub_owner_psk,
        CredManager, CredType, Credential, PskDeriver,
    },
    dos::svr_read_only,
    error::Error,
    pstat::{codec as pstat_codec, PstatManager, UpdateOutcome},
    query,
    store::SvrStore,
    types::{Doxm, Uuid},
    Result,
};

/// The request methods the entity handlers process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// The response statuses of the entity handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Changed,
    Deleted,
    BadRequest,
    NotAcceptable,
    NotFound,
    InternalError,
    Error,
}

impl Status {
    fn from_error(e: &Error) -> Status {
        match e {
            Error::InvalidParam | Error::SchemaViolation => {
                Status::BadRequest
            }
            Error::NotFound => Status::NotFound,
            Error::Forbidden | Error::NotAcceptable => Status::NotAcceptable,
            Error::Cbor(_) => Status::Error,
            Error::Hkdf(_) | Error::Internal => Status::InternalError,
        }
    }
}

/// An inbound request, already stripped down to the parts this subsystem
/// consumes.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    /// The query string, if the request carried one.
    pub query: Option<&'a str>,
    pub payload: &'a [u8],
    /// The session peer address, input to pairwise key derivation.
    pub peer: &'a str,
    /// The transport message id, used to suppress duplicate deliveries.
    pub message_id: u16,
}

/// The outcome of a request: a status and, for GET, a payload.
#[derive(Debug)]
pub struct Response {
    pub status: Status,
    pub payload: Option<Vec<u8>>,
}

impl Response {
    fn with_status(status: Status) -> Response {
        Response {
            status,
            payload: None,
        }
    }

    fn from_result(result: Result<()>, success: Status) -> Response {
        match result {
            Ok(()) => Response::with_status(success),
            Err(e) => Response::with_status(Status::from_error(&e)),
        }
    }
}

/// A device's secure virtual resources and the collaborators they need.
///
/// This owns the credential list, the access control list and the
/// provisioning status record for one device, replacing the process-wide
/// singletons of other stacks. Construction loads all three from the
/// store; teardown is plain drop, which wipes key material.
pub struct Device<S: SvrStore, D: PskDeriver> {
    store: S,
    deriver: D,
    doxm: Doxm,
    pstat: PstatManager,
    creds: CredManager,
    acl: AclManager,
    prev_pstat_msg: Option<u16>,
}

impl<S: SvrStore, D: PskDeriver> Device<S, D> {
    /// Loads every secure virtual resource from the store, falling back
    /// to the documented defaults where nothing usable is persisted.
    pub fn new(store: S, deriver: D, doxm: Doxm) -> Device<S, D> {
        let pstat = PstatManager::init(&store);
        let creds = CredManager::init(&store);
        let acl = AclManager::init(&store, &doxm.device_id);

        Device {
            store,
            deriver,
            doxm,
            pstat,
            creds,
            acl,
            prev_pstat_msg: None,
        }
    }

    /// Returns the ownership record.
    pub fn doxm(&self) -> &Doxm {
        &self.doxm
    }

    /// Returns the ownership record for the external ownership transfer
    /// flow to update.
    pub fn doxm_mut(&mut self) -> &mut Doxm {
        &mut self.doxm
    }

    /// Returns the provisioning status manager.
    pub fn pstat(&self) -> &PstatManager {
        &self.pstat
    }

    /// Returns the credential manager.
    pub fn creds(&self) -> &CredManager {
        &self.creds
    }

    /// Returns the access control list manager.
    pub fn acl(&self) -> &AclManager {
        &self.acl
    }

    /// Completes a self-initiated ownership transfer on the provisioning
    /// status record.
    pub fn set_self_ownership(&mut self, new_owner: &Uuid) -> Result<()> {
        self.pstat.set_self_ownership(new_owner, &mut self.store)
    }

    /// The entity handler of `/oic/sec/pstat`.
    pub fn pstat_handler(&mut self, request: &Request) -> Response {
        match request.method {
            Method::Get => {
                if !interface_query_ok(request.query) {
                    return Response::with_status(Status::Error);
                }
                // A device always has at least the default record
                Response {
                    status: Status::Ok,
                    payload: self.pstat.to_payload().ok(),
                }
            }
            Method::Post => self.pstat_post(request),
            _ => Response::with_status(Status::Error),
        }
    }

    fn pstat_post(&mut self, request: &Request) -> Response {
        let duplicate = self.prev_pstat_msg == Some(request.message_id);
        let result = (|| {
            let mut payload = request.payload.to_vec();
            let update = pstat_codec::from_payload(&mut payload)?;
            self.pstat.update(&update, &mut self.store)
        })();

        match result {
            Ok(UpdateOutcome::StorageReset) => {
                // The response goes out before anything else happens; the
                // caller is expected to restart provisioning afterwards
                Response::with_status(Status::Ok)
            }
            Ok(UpdateOutcome::Applied) => {
                self.prev_pstat_msg = Some(request.message_id);
                Response::with_status(Status::Ok)
            }
            Err(e) => {
                let status = Status::from_error(&e);
                // A failed request against an unowned device may have
                // interrupted ownership transfer; put both records back
                if !self.doxm.owned && !duplicate {
                    warn!("pstat update failed on unowned device, reverting");
                    self.doxm.restore_to_init();
                    self.pstat.restore_to_init(&mut self.store);
                }
                Response::with_status(status)
            }
        }
    }

    /// The entity handler of `/oic/sec/cred`.
    pub fn cred_handler(&mut self, request: &Request) -> Response {
        match request.method {
            Method::Get => Response {
                status: Status::Ok,
                // Private key material stays on the device
                payload: self.creds.to_payload(true).ok(),
            },
            Method::Post | Method::Put => self.cred_post(request),
            Method::Delete => self.cred_delete(request),
        }
    }

    fn cred_post(&mut self, request: &Request) -> Response {
        let state = self.pstat.dos().state;
        if svr_read_only(state) {
            warn!("cred resource is read-only in {:?}", state);
            return Response::with_status(Status::NotAcceptable);
        }

        let mut payload = request.payload.to_vec();
        let (creds, rowner) = match cred_codec::from_payload(&mut payload) {
            Ok(decoded) => decoded,
            Err(e) => return Response::with_status(Status::from_error(&e)),
        };

        let mut added: Vec<Uuid> = Vec::new();
        for cred in creds {
            match self.handle_new_credential(cred, request.peer) {
                Ok(Some(subject)) => added.push(subject),
                Ok(None) => (),
                Err(e) => {
                    // Take back the credentials added so far, so a
                    // half-applied batch never survives
                    warn!("credential batch failed, removing earlier adds");
                    for subject in added {
                        let _ = self.creds.remove(&subject, &mut self.store);
                    }
                    return Response::with_status(Status::from_error(&e));
                }
            }
        }

        if let Some(owner) = rowner {
            if !owner.is_nil() {
                self.creds.set_rowner(owner);
            }
        }

        Response::with_status(Status::Changed)
    }

    /// Applies one received credential, deriving the owner or sub-owner
    /// PSK when the credential belongs to an ownership transfer in
    /// progress. Returns the subject of an actually added credential.
    fn handle_new_credential(
        &mut self,
        mut cred: Credential,
        peer: &str,
    ) -> Result<Option<Uuid>> {
        let state = self.pstat.dos().state;

        let owner_transfer = cred.credtype != CredType::NoSecurityMode
            && !self.doxm.owned
            && !self.doxm.owner.is_nil()
            && cred.subject == self.doxm.owner;
        if owner_transfer {
            if cred.credtype != CredType::SymmetricPairwise {
                warn!("unexpected owner credential type {:?}", cred.credtype);
                return Err(Error::SchemaViolation);
            }
            if !fill_owner_psk(&mut cred, peer, &self.doxm, &self.deriver)? {
                warn!("received owner credential failed verification");
                return Err(Error::SchemaViolation);
            }
            // Any stale credential for this subject goes first
            let subject = cred.subject;
            let _ = self.creds.remove(&subject, &mut self.store);
            self.creds.add(cred, None, state, &mut self.store)?;
            return Ok(Some(subject));
        }

        let sub_owner_transfer = self.doxm.owned
            && cred.credtype == CredType::SymmetricPairwise
            && cred.eowner.is_some()
            && Some(cred.subject) == cred.eowner;
        if sub_owner_transfer {
            let sub_owner = cred.subject;
            if !fill_sub_owner_psk(
                &mut cred,
                peer,
                &self.doxm,
                &sub_owner,
                &self.deriver,
            )? {
                warn!("received sub-owner credential failed verification");
                return Err(Error::SchemaViolation);
            }
            let _ = self.creds.remove(&sub_owner, &mut self.store);
            self.creds.add(cred, None, state, &mut self.store)?;
            return Ok(Some(sub_owner));
        }

        if cred.is_empty() {
            // The empty sentinel only refreshes the persisted list
            self.creds.persist(&mut self.store)?;
            return Ok(None);
        }

        let subject = cred.subject;
        self.creds.add(cred, None, state, &mut self.store)?;

        Ok(Some(subject))
    }

    fn cred_delete(&mut self, request: &Request) -> Response {
        let query = match request.query {
            Some(query) => query,
            None => return Response::with_status(Status::Error),
        };

        if let Some(ids) = query::find(query, "credid") {
            let ids: Vec<u16> = ids
                .split(',')
                .filter_map(|token| token.trim().parse().ok())
                .collect();
            debug!("deleting credentials {:?}", ids);
            return Response::from_result(
                self.creds.remove_by_ids(&ids, &mut self.store),
                Status::Deleted,
            );
        }
        if let Some(subject) = query::find(query, "subjectuuid") {
            return match Uuid::parse(subject) {
                Ok(subject) => Response::from_result(
                    self.creds.remove(&subject, &mut self.store),
                    Status::Deleted,
                ),
                Err(e) => Response::with_status(Status::from_error(&e)),
            };
        }

        debug!("no selector in query, deleting all credentials");
        Response::from_result(
            self.creds.remove_all(&mut self.store),
            Status::Deleted,
        )
    }

    /// The entity handler of `/oic/sec/acl`, the v1 representation.
    pub fn acl_handler(&mut self, request: &Request) -> Response {
        self.acl_request(request, AclVersion::V1)
    }

    /// The entity handler of `/oic/sec/acl2`, the v2 representation.
    pub fn acl2_handler(&mut self, request: &Request) -> Response {
        self.acl_request(request, AclVersion::V2)
    }

    fn acl_request(
        &mut self,
        request: &Request,
        version: AclVersion,
    ) -> Response {
        match request.method {
            Method::Get => match self.acl.to_payload(version) {
                Ok(payload) => Response {
                    status: Status::Ok,
                    payload: Some(payload),
                },
                // Role and conntype entries have no v1 shape
                Err(_) => Response::with_status(Status::InternalError),
            },
            Method::Post => self.acl_post(request),
            Method::Delete => self.acl_delete(request),
            _ => Response::with_status(Status::Error),
        }
    }

    fn acl_post(&mut self, request: &Request) -> Response {
        let state = self.pstat.dos().state;
        if svr_read_only(state) {
            warn!("acl resource is read-only in {:?}", state);
            return Response::with_status(Status::NotAcceptable);
        }

        let mut payload = request.payload.to_vec();
        // Legacy v1 payloads are not accepted by an OCF 1.0 device
        match acl_codec::probe(&mut payload) {
            Ok(AclVersion::V2) => (),
            Ok(AclVersion::V1) => {
                warn!("rejecting POST of a v1 ACL payload");
                return Response::with_status(Status::NotAcceptable);
            }
            Err(e) => return Response::with_status(Status::from_error(&e)),
        }

        let result = (|| {
            let new = acl_codec::decode(&mut payload)?;
            self.acl.install(new, &mut self.store)
        })();

        Response::from_result(result, Status::Changed)
    }

    fn acl_delete(&mut self, request: &Request) -> Response {
        let query = match request.query {
            Some(query) => query,
            None => return Response::with_status(Status::Error),
        };

        if let Some(subject) = query::find(query, "subjectuuid") {
            let subject = match Uuid::parse(subject) {
                Ok(subject) => subject,
                Err(e) => {
                    return Response::with_status(Status::from_error(&e))
                }
            };
            let href = query::find(query, "resources")
                .filter(|href| !href.is_empty());
            return Response::from_result(
                self.acl.remove(&subject, href, &mut self.store),
                Status::Deleted,
            );
        }

        debug!("no subject in query, deleting all ACEs");
        Response::from_result(
            self.acl.remove_all(&mut self.store),
            Status::Deleted,
        )
    }
}

/// Returns whether an `if` query, when present, selects the baseline
/// interface.
fn interface_query_ok(query: Option<&str>) -> bool {
    match query {
        Some(query) => match query::find(query, "if") {
            Some(interface) => interface == "oic.if.baseline",
            None => true,
        },
        None => true,
    }
}
