//! CBOR wire representation of the credential list.

use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::{
    cbor,
    error::Error,
    seckey::{Encoding, SecKey, SecOpt},
    types::{Role, Uuid},
    Result,
};

use super::{CredType, Credential};

/// Resource type of the credential resource.
const RESOURCE_TYPE: &str = "oic.r.cred";
/// The baseline interface.
const INTERFACE: &str = "oic.if.baseline";

/// Key material is a byte string for the binary encodings and a text
/// string for the textual ones.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DataWire {
    Text(String),
    Bytes(ByteBuf),
}

#[derive(Serialize, Deserialize)]
struct KeyWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    data: Option<DataWire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    revstat: Option<bool>,
}

impl KeyWire {
    fn from_key(key: &SecKey, revoked: Option<bool>) -> KeyWire {
        let data = if key.encoding().is_binary() {
            DataWire::Bytes(ByteBuf::from(key.data().to_vec()))
        } else {
            match String::from_utf8(key.data().to_vec()) {
                Ok(text) => DataWire::Text(text),
                // Text-encoded data that isn't UTF-8 goes out raw
                Err(e) => DataWire::Bytes(ByteBuf::from(e.into_bytes())),
            }
        };

        KeyWire {
            encoding: Some(key.encoding().as_str().to_string()),
            data: Some(data),
            revstat: revoked,
        }
    }

    fn into_key(self) -> Result<SecKey> {
        let encoding = match self.encoding {
            Some(s) => Encoding::parse(&s)?,
            None => Encoding::Raw,
        };
        let data = match self.data {
            Some(DataWire::Bytes(bytes)) => bytes.into_vec(),
            Some(DataWire::Text(text)) => text.into_bytes(),
            None => Vec::new(),
        };

        Ok(SecKey::new(data, encoding))
    }
}

#[derive(Serialize, Deserialize)]
struct RoleWire {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    authority: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CredWire {
    #[serde(rename = "credid", skip_serializing_if = "Option::is_none", default)]
    id: Option<u16>,
    #[serde(rename = "subjectuuid")]
    subject: Option<String>,
    #[serde(
        rename = "roleid",
        skip_serializing_if = "Option::is_none",
        default
    )]
    role: Option<RoleWire>,
    #[serde(rename = "credtype")]
    credtype: Option<i64>,
    #[serde(
        rename = "publicdata",
        skip_serializing_if = "Option::is_none",
        default
    )]
    public: Option<KeyWire>,
    #[serde(
        rename = "privatedata",
        skip_serializing_if = "Option::is_none",
        default
    )]
    private: Option<KeyWire>,
    #[serde(
        rename = "optionaldata",
        skip_serializing_if = "Option::is_none",
        default
    )]
    optional: Option<KeyWire>,
    #[serde(
        rename = "credusage",
        skip_serializing_if = "Option::is_none",
        default
    )]
    usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    period: Option<String>,
    #[serde(
        rename = "eowneruuid",
        skip_serializing_if = "Option::is_none",
        default
    )]
    eowner: Option<String>,
}

impl CredWire {
    fn from_cred(cred: &Credential, secure: bool) -> CredWire {
        CredWire {
            id: Some(cred.id),
            subject: Some(cred.subject.to_string()),
            role: cred.role.as_ref().map(|role| RoleWire {
                role: role.id.clone(),
                authority: role.authority.clone(),
            }),
            credtype: Some(cred.credtype as i64),
            public: cred.public.as_ref().map(|key| KeyWire::from_key(key, None)),
            // Private key material never leaves the device in a secure
            // payload
            private: if secure {
                None
            } else {
                cred.private
                    .as_ref()
                    .map(|key| KeyWire::from_key(key, None))
            },
            optional: cred
                .optional
                .as_ref()
                .map(|opt| KeyWire::from_key(&opt.key, Some(opt.revoked))),
            usage: cred.usage.clone(),
            period: cred.period.clone(),
            eowner: cred.eowner.map(|uuid| uuid.to_string()),
        }
    }

    fn into_cred(self) -> Result<Credential> {
        let subject = match self.subject {
            Some(s) => Uuid::parse(&s)?,
            None => return Err(Error::SchemaViolation),
        };
        let credtype = CredType::parse(self.credtype.unwrap_or(0))?;
        let optional = match self.optional {
            Some(wire) => {
                let revoked = wire.revstat.unwrap_or(false);
                Some(SecOpt {
                    key: wire.into_key()?,
                    revoked,
                })
            }
            None => None,
        };
        let eowner = match self.eowner {
            Some(s) => Some(Uuid::parse(&s)?),
            None => None,
        };

        Ok(Credential {
            id: self.id.unwrap_or(0),
            subject,
            role: self.role.map(|wire| Role {
                id: wire.role,
                authority: wire.authority,
            }),
            credtype,
            public: self.public.map(KeyWire::into_key).transpose()?,
            private: self.private.map(KeyWire::into_key).transpose()?,
            optional,
            usage: self.usage,
            period: self.period,
            eowner,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CredsWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    creds: Option<Vec<CredWire>>,
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

/// Serializes the credential list.
///
/// With `secure` set, private key material is omitted from the payload;
/// the full form is reserved for the persistent storage round-trip.
pub fn to_payload(
    creds: &[Credential],
    rowner: &Uuid,
    secure: bool,
) -> Result<Vec<u8>> {
    let wire = CredsWire {
        creds: if creds.is_empty() {
            None
        } else {
            Some(
                creds
                    .iter()
                    .map(|cred| CredWire::from_cred(cred, secure))
                    .collect(),
            )
        },
        rowner: if creds.is_empty() {
            None
        } else {
            Some(rowner.to_string())
        },
        resource_type: Some(vec![String::from(RESOURCE_TYPE)]),
        interfaces: Some(vec![String::from(INTERFACE)]),
    };

    Ok(cbor::encode(&wire)?)
}

/// Deserializes a credential list payload.
///
/// Any malformed entry aborts the whole decode; a partially decoded list
/// is never returned.
pub fn from_payload(
    payload: &mut [u8],
) -> Result<(Vec<Credential>, Option<Uuid>)> {
    if payload.is_empty() {
        return Err(Error::InvalidParam);
    }
    let wire: CredsWire = cbor::decode(payload)?;

    let mut creds = Vec::new();
    for entry in wire.creds.unwrap_or_default() {
        creds.push(entry.into_cred()?);
    }
    let rowner = match wire.rowner {
        Some(s) => Some(Uuid::parse(&s)?),
        None => None,
    };

    Ok((creds, rowner))
}
