//! CBOR wire representations of the access control list.
//!
//! Version 1 nests its entries under an `aclist.aces` map and only knows
//! UUID subjects; version 2 is a flat `aclist2` array with UUID, role and
//! connection-type subjects plus per-resource wildcards. Both versions
//! share the resource and validity sub-shapes.

use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use serde::{de::IgnoredAny, Deserialize, Serialize};

use crate::{
    cbor,
    error::Error,
    types::{Role, Uuid},
    Result,
};

use super::{
    Ace, AceResource, AceSubject, Acl, Conntype, Permission, Validity,
    Wildcard,
};

/// Resource type of the v1 ACL resource.
const RESOURCE_TYPE_V1: &str = "oic.r.acl";
/// Resource type of the v2 ACL resource.
const RESOURCE_TYPE_V2: &str = "oic.r.acl2";
/// The baseline interface.
const INTERFACE: &str = "oic.if.baseline";

const WC_ALL: &str = "*";
const WC_DISCOVERABLE: &str = "+";
const WC_NON_DISCOVERABLE: &str = "-";

const CONN_AUTH_CRYPT: &str = "auth-crypt";
const CONN_ANON_CLEAR: &str = "anon-clear";

/// The ACL schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclVersion {
    V1,
    V2,
}

#[derive(Serialize, Deserialize)]
struct ResourceWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    rel: Option<String>,
    #[serde(rename = "rt", skip_serializing_if = "Option::is_none", default)]
    types: Option<Vec<String>>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none", default)]
    interfaces: Option<Vec<String>>,
    #[serde(rename = "wc", skip_serializing_if = "Option::is_none", default)]
    wildcard: Option<String>,
}

impl ResourceWire {
    fn from_resource(rsrc: &AceResource, version: AclVersion) -> ResourceWire {
        let wildcard = match (version, rsrc.wildcard) {
            // v1 has no wildcard notion
            (AclVersion::V1, _) | (_, Wildcard::None) => None,
            (_, Wildcard::All) => Some(String::from(WC_ALL)),
            (_, Wildcard::AllDiscoverable) => {
                Some(String::from(WC_DISCOVERABLE))
            }
            (_, Wildcard::AllNonDiscoverable) => {
                Some(String::from(WC_NON_DISCOVERABLE))
            }
        };

        ResourceWire {
            href: rsrc.href.clone(),
            rel: rsrc.rel.clone(),
            types: if rsrc.types.is_empty() {
                None
            } else {
                Some(rsrc.types.clone())
            },
            interfaces: if rsrc.interfaces.is_empty() {
                None
            } else {
                Some(rsrc.interfaces.clone())
            },
            wildcard,
        }
    }

    fn into_resource(self) -> AceResource {
        let mut wildcard = match self.wildcard.as_deref() {
            Some(WC_ALL) => Wildcard::All,
            Some(WC_DISCOVERABLE) => Wildcard::AllDiscoverable,
            Some(WC_NON_DISCOVERABLE) => Wildcard::AllNonDiscoverable,
            _ => Wildcard::None,
        };
        // Pre-OCF payloads spell the all-resources wildcard as an href
        let href = match self.href {
            Some(href) if href == WC_ALL => {
                wildcard = Wildcard::All;
                None
            }
            href => href,
        };

        AceResource {
            href,
            rel: self.rel,
            types: self.types.unwrap_or_default(),
            interfaces: self.interfaces.unwrap_or_default(),
            wildcard,
        }
    }
}

/// A validity on the wire is a `[period, [recurrences]]` pair.
#[derive(Serialize, Deserialize)]
struct ValidityWire(String, Vec<String>);

fn validities_to_wire(validities: &[Validity]) -> Option<Vec<ValidityWire>> {
    if validities.is_empty() {
        return None;
    }
    Some(
        validities
            .iter()
            .map(|val| {
                ValidityWire(val.period.clone(), val.recurrences.clone())
            })
            .collect(),
    )
}

fn validities_from_wire(wire: Option<Vec<ValidityWire>>) -> Vec<Validity> {
    wire.unwrap_or_default()
        .into_iter()
        .map(|ValidityWire(period, recurrences)| Validity {
            period,
            recurrences,
        })
        .collect()
}

/// A v1 subject should be a plain UUID string; the map forms are caught
/// to report a schema violation instead of silently downgrading them.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SubjectV1Wire {
    Id(String),
    Role {
        role: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        authority: Option<String>,
    },
    Conn { conntype: String },
}

#[derive(Serialize, Deserialize)]
struct AceV1Wire {
    subjectuuid: Option<SubjectV1Wire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    resources: Option<Vec<ResourceWire>>,
    permission: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    validity: Option<Vec<ValidityWire>>,
}

#[derive(Serialize, Deserialize)]
struct AclistWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    aces: Option<Vec<AceV1Wire>>,
}

#[derive(Serialize, Deserialize)]
struct AclV1Wire {
    aclist: AclistWire,
    #[serde(
        rename = "rowneruuid",
        skip_serializing_if = "Option::is_none",
        default
    )]
    rowner: Option<String>,
    #[serde(rename = "rt", skip_serializing_if = "Option::is_none", default)]
    resource_type: Option<Vec<String>>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none", default)]
    interfaces: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SubjectV2Wire {
    Id { uuid: String },
    Role {
        role: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        authority: Option<String>,
    },
    Conn { conntype: String },
}

#[derive(Serialize, Deserialize)]
struct AceV2Wire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    aceid: Option<u16>,
    subject: Option<SubjectV2Wire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    resources: Option<Vec<ResourceWire>>,
    permission: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    validity: Option<Vec<ValidityWire>>,
    #[serde(
        rename = "eowneruuid",
        skip_serializing_if = "Option::is_none",
        default
    )]
    eowner: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct AclV2Wire {
    aclist2: Vec<AceV2Wire>,
    #[serde(
        rename = "rowneruuid",
        skip_serializing_if = "Option::is_none",
        default
    )]
    rowner: Option<String>,
    #[serde(rename = "rt", skip_serializing_if = "Option::is_none", default)]
    resource_type: Option<Vec<String>>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none", default)]
    interfaces: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ProbeWire {
    #[serde(default)]
    aclist: Option<IgnoredAny>,
    #[serde(default)]
    aclist2: Option<IgnoredAny>,
}

/// Sniffs which schema version a payload uses, without decoding the
/// entries themselves.
pub fn probe(payload: &mut [u8]) -> Result<AclVersion> {
    if payload.is_empty() {
        return Err(Error::InvalidParam);
    }
    let wire: ProbeWire = cbor::decode(payload)?;

    if wire.aclist2.is_some() {
        Ok(AclVersion::V2)
    } else if wire.aclist.is_some() {
        Ok(AclVersion::V1)
    } else {
        Err(Error::SchemaViolation)
    }
}

/// Serializes the ACL in the given schema version.
///
/// Role and connection-type subjects have no v1 representation and fail
/// with a schema violation rather than being dropped; the wildcard UUID
/// subject in turn has no v2 representation.
pub fn encode(acl: &Acl, version: AclVersion) -> Result<Vec<u8>> {
    match version {
        AclVersion::V1 => {
            let mut aces = Vec::with_capacity(acl.aces.len());
            for ace in &acl.aces {
                aces.push(ace_to_v1(ace)?);
            }
            let wire = AclV1Wire {
                aclist: AclistWire { aces: Some(aces) },
                rowner: Some(acl.rowner.to_string()),
                resource_type: Some(vec![String::from(RESOURCE_TYPE_V1)]),
                interfaces: Some(vec![String::from(INTERFACE)]),
            };
            Ok(cbor::encode(&wire)?)
        }
        AclVersion::V2 => {
            let mut aces = Vec::with_capacity(acl.aces.len());
            for ace in &acl.aces {
                aces.push(ace_to_v2(ace)?);
            }
            let wire = AclV2Wire {
                aclist2: aces,
                rowner: Some(acl.rowner.to_string()),
                resource_type: Some(vec![String::from(RESOURCE_TYPE_V2)]),
                interfaces: Some(vec![String::from(INTERFACE)]),
            };
            Ok(cbor::encode(&wire)?)
        }
    }
}

/// Deserializes an ACL payload of either schema version.
///
/// Any structural failure discards the whole ACL under construction.
pub fn decode(payload: &mut [u8]) -> Result<Acl> {
    // The probe only reads, so the buffer stays intact for the real pass
    let version = probe(payload)?;
    match version {
        AclVersion::V1 => {
            let wire: AclV1Wire = cbor::decode(payload)?;
            let mut aces = Vec::new();
            for entry in wire.aclist.aces.unwrap_or_default() {
                aces.push(ace_from_v1(entry)?);
            }
            Ok(Acl {
                aces,
                rowner: rowner_from_wire(wire.rowner)?,
            })
        }
        AclVersion::V2 => {
            let wire: AclV2Wire = cbor::decode(payload)?;
            let mut aces = Vec::new();
            for entry in wire.aclist2 {
                aces.push(ace_from_v2(entry)?);
            }
            Ok(Acl {
                aces,
                rowner: rowner_from_wire(wire.rowner)?,
            })
        }
    }
}

fn rowner_from_wire(rowner: Option<String>) -> Result<Uuid> {
    match rowner {
        Some(s) => Uuid::parse(&s),
        None => Ok(Uuid::NIL),
    }
}

fn ace_to_v1(ace: &Ace) -> Result<AceV1Wire> {
    let subject = match &ace.subject {
        AceSubject::Uuid(uuid) => SubjectV1Wire::Id(uuid.to_string()),
        AceSubject::Role(_) | AceSubject::Conn(_) => {
            return Err(Error::SchemaViolation);
        }
    };

    Ok(AceV1Wire {
        subjectuuid: Some(subject),
        resources: Some(
            ace.resources
                .iter()
                .map(|rsrc| {
                    ResourceWire::from_resource(rsrc, AclVersion::V1)
                })
                .collect(),
        ),
        permission: Some(ace.permission.bits()),
        validity: validities_to_wire(&ace.validities),
    })
}

fn ace_from_v1(wire: AceV1Wire) -> Result<Ace> {
    let subject = match wire.subjectuuid {
        Some(SubjectV1Wire::Id(s)) => AceSubject::Uuid(Uuid::parse(&s)?),
        // A role or conntype subject cannot appear in a v1 ACL
        Some(_) | None => return Err(Error::SchemaViolation),
    };

    Ok(Ace {
        aceid: 0,
        subject,
        resources: wire
            .resources
            .unwrap_or_default()
            .into_iter()
            .map(ResourceWire::into_resource)
            .collect(),
        permission: Permission::from_bits_truncate(
            wire.permission.unwrap_or(0),
        ),
        validities: validities_from_wire(wire.validity),
        eowner: None,
    })
}

fn ace_to_v2(ace: &Ace) -> Result<AceV2Wire> {
    let subject = match &ace.subject {
        AceSubject::Uuid(uuid) => {
            if uuid.is_wildcard() {
                // The v2 schema expresses wildcards as conntype subjects
                return Err(Error::SchemaViolation);
            }
            SubjectV2Wire::Id {
                uuid: uuid.to_string(),
            }
        }
        AceSubject::Role(role) => SubjectV2Wire::Role {
            role: role.id.clone(),
            authority: role.authority.clone(),
        },
        AceSubject::Conn(conntype) => SubjectV2Wire::Conn {
            conntype: String::from(match conntype {
                Conntype::AuthCrypt => CONN_AUTH_CRYPT,
                Conntype::AnonClear => CONN_ANON_CLEAR,
            }),
        },
    };

    Ok(AceV2Wire {
        aceid: Some(ace.aceid),
        subject: Some(subject),
        resources: Some(
            ace.resources
                .iter()
                .map(|rsrc| {
                    ResourceWire::from_resource(rsrc, AclVersion::V2)
                })
                .collect(),
        ),
        permission: Some(ace.permission.bits()),
        validity: validities_to_wire(&ace.validities),
        eowner: ace.eowner.map(|uuid| uuid.to_string()),
    })
}

fn ace_from_v2(wire: AceV2Wire) -> Result<Ace> {
    let subject = match wire.subject {
        Some(SubjectV2Wire::Id { uuid }) => {
            AceSubject::Uuid(Uuid::parse(&uuid)?)
        }
        Some(SubjectV2Wire::Role { role, authority }) => {
            AceSubject::Role(Role {
                id: role,
                authority,
            })
        }
        Some(SubjectV2Wire::Conn { conntype }) => {
            AceSubject::Conn(match conntype.as_str() {
                CONN_AUTH_CRYPT => Conntype::AuthCrypt,
                CONN_ANON_CLEAR => Conntype::AnonClear,
                _ => return Err(Error::SchemaViolation),
            })
        }
        None => return Err(Error::SchemaViolation),
    };
    let eowner = match wire.eowner {
        Some(s) => Some(Uuid::parse(&s)?),
        None => None,
    };

    Ok(Ace {
        aceid: wire.aceid.unwrap_or(0),
        subject,
        resources: wire
            .resources
            .unwrap_or_default()
            .into_iter()
            .map(ResourceWire::into_resource)
            .collect(),
        permission: Permission::from_bits_truncate(
            wire.permission.unwrap_or(0),
        ),
        validities: validities_from_wire(wire.validity),
        eowner,
    })
}
