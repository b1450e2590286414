//! CBOR wire representation of the provisioning status record.

use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use serde::{Deserialize, Serialize};

use crate::{
    cbor,
    dos::{Dos, DosState},
    error::Error,
    types::Uuid,
    Result,
};

use super::{
    is_property_read_only, Dpm, OperationMode, Pstat, PstatProperty,
};

/// Resource type of the provisioning status resource.
const RESOURCE_TYPE: &str = "oic.r.pstat";
/// The baseline interface.
const INTERFACE: &str = "oic.if.baseline";

/// A partial provisioning status record as received in a POST payload.
///
/// Absent properties inherit the current value of the stored record;
/// tracking presence is what allows the read-only check to reject exactly
/// the properties a client actually tried to write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PstatUpdate {
    pub dos: Option<Dos>,
    pub isop: Option<bool>,
    pub cm: Option<Dpm>,
    pub tm: Option<Dpm>,
    pub om: Option<OperationMode>,
    pub sm: Option<Vec<OperationMode>>,
    pub rowner: Option<Uuid>,
}

impl PstatUpdate {
    /// Returns whether any property present in the update is read-only in
    /// the given onboarding state.
    pub fn violates_read_only(&self, state: DosState) -> bool {
        let present = [
            (self.dos.is_some(), PstatProperty::Dos),
            (self.isop.is_some(), PstatProperty::Isop),
            (self.cm.is_some(), PstatProperty::Cm),
            (self.tm.is_some(), PstatProperty::Tm),
            (self.om.is_some(), PstatProperty::Om),
            (self.sm.is_some(), PstatProperty::Sm),
            (self.rowner.is_some(), PstatProperty::Rowner),
        ];

        present
            .iter()
            .any(|&(set, property)| set && is_property_read_only(property, state))
    }

    /// Returns the record resulting from applying the update on top of a
    /// base record, used when rebuilding state from storage.
    pub fn apply_to(&self, base: &Pstat) -> Pstat {
        Pstat {
            dos: self.dos.unwrap_or(base.dos),
            isop: self.isop.unwrap_or(base.isop),
            cm: self.cm.unwrap_or(base.cm),
            tm: self.tm.unwrap_or(base.tm),
            om: self.om.unwrap_or(base.om),
            sm: self.sm.clone().unwrap_or_else(|| base.sm.clone()),
            rowner: self.rowner.unwrap_or(base.rowner),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DosWire {
    s: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    p: Option<bool>,
}

/// The supported-modes property is a single integer on the wire, but some
/// peers send the OCF array form.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SmWire {
    Single(i64),
    List(Vec<i64>),
}

#[derive(Serialize, Deserialize)]
struct PstatWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    dos: Option<DosWire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    isop: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    cm: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tm: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    om: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    sm: Option<SmWire>,
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

/// Serializes the full record, including the mandatory `rt`/`if`
/// properties.
pub fn to_payload(pstat: &Pstat) -> Result<Vec<u8>> {
    let wire = PstatWire {
        dos: Some(DosWire {
            s: pstat.dos.state as i64,
            p: Some(pstat.dos.pending),
        }),
        isop: Some(pstat.isop),
        cm: Some(pstat.cm.bits()),
        tm: Some(pstat.tm.bits()),
        om: Some(pstat.om as i64),
        sm: Some(SmWire::Single(
            pstat.sm.first().copied().unwrap_or(pstat.om) as i64,
        )),
        rowner: Some(pstat.rowner.to_string()),
        resource_type: Some(vec![String::from(RESOURCE_TYPE)]),
        interfaces: Some(vec![String::from(INTERFACE)]),
    };

    Ok(cbor::encode(&wire)?)
}

/// Serializes only the properties present in a partial record, the shape
/// clients POST.
pub fn update_to_payload(update: &PstatUpdate) -> Result<Vec<u8>> {
    let wire = PstatWire {
        dos: update.dos.map(|dos| DosWire {
            s: dos.state as i64,
            p: Some(dos.pending),
        }),
        isop: update.isop,
        cm: update.cm.map(|cm| cm.bits()),
        tm: update.tm.map(|tm| tm.bits()),
        om: update.om.map(|om| om as i64),
        sm: update
            .sm
            .as_ref()
            .and_then(|sm| sm.first())
            .map(|&mode| SmWire::Single(mode as i64)),
        rowner: update.rowner.map(|rowner| rowner.to_string()),
        resource_type: None,
        interfaces: None,
    };

    Ok(cbor::encode(&wire)?)
}

/// Deserializes a full or partial record.
pub fn from_payload(payload: &mut [u8]) -> Result<PstatUpdate> {
    if payload.is_empty() {
        return Err(Error::InvalidParam);
    }
    let wire: PstatWire = cbor::decode(payload)?;

    let dos = match wire.dos {
        Some(d) => Some(Dos {
            state: DosState::parse(d.s)?,
            pending: d.p.unwrap_or(false),
        }),
        None => None,
    };
    let om = match wire.om {
        Some(value) => Some(OperationMode::parse(value)?),
        None => None,
    };
    let sm = match wire.sm {
        Some(SmWire::Single(value)) => {
            Some(vec![OperationMode::parse(value)?])
        }
        Some(SmWire::List(values)) => {
            let mut modes = Vec::with_capacity(values.len());
            for value in values {
                modes.push(OperationMode::parse(value)?);
            }
            Some(modes)
        }
        None => None,
    };
    let rowner = match wire.rowner {
        Some(s) => Some(Uuid::parse(&s)?),
        None => None,
    };

    Ok(PstatUpdate {
        dos,
        isop: wire.isop,
        cm: wire.cm.map(Dpm::from_bits_truncate),
        tm: wire.tm.map(Dpm::from_bits_truncate),
        om,
        sm,
        rowner,
    })
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn full_roundtrip() {
        let pstat = Pstat {
            dos: Dos::new(DosState::Rfpro),
            isop: true,
            cm: Dpm::empty(),
            tm: Dpm::PROVISION_CREDENTIALS,
            om: OperationMode::SingleServiceClientDriven,
            sm: vec![OperationMode::SingleServiceClientDriven],
            rowner: Uuid::from_bytes([0xAB; 16]),
        };

        let mut payload = to_payload(&pstat).unwrap();
        let update = from_payload(&mut payload).unwrap();
        assert_eq!(pstat, update.apply_to(&Pstat::default()));
    }

    #[test]
    fn partial_payload() {
        // Only a dos change
        let wire = PstatWire {
            dos: Some(DosWire { s: 2, p: None }),
            isop: None,
            cm: None,
            tm: None,
            om: None,
            sm: None,
            rowner: None,
            resource_type: None,
            interfaces: None,
        };
        let mut payload = cbor::encode(&wire).unwrap();

        let update = from_payload(&mut payload).unwrap();
        assert_eq!(Some(Dos::new(DosState::Rfpro)), update.dos);
        assert_eq!(None, update.om);
        assert_eq!(None, update.rowner);

        // Absent fields inherit from the base
        let merged = update.apply_to(&Pstat::default());
        assert_eq!(DosState::Rfpro, merged.dos.state);
        assert!(merged.cm.contains(Dpm::TAKE_OWNER));
    }

    #[test]
    fn sm_list_form() {
        let wire = PstatWire {
            dos: None,
            isop: None,
            cm: None,
            tm: None,
            om: None,
            sm: Some(SmWire::List(vec![4, 2])),
            rowner: None,
            resource_type: None,
            interfaces: None,
        };
        let mut payload = cbor::encode(&wire).unwrap();

        let update = from_payload(&mut payload).unwrap();
        assert_eq!(
            Some(vec![
                OperationMode::SingleServiceClientDriven,
                OperationMode::SingleServiceServerDriven
            ]),
            update.sm
        );
    }

    #[test]
    fn partial_encode_roundtrip() {
        let update = PstatUpdate {
            dos: Some(Dos::new(DosState::Rfpro)),
            rowner: Some(Uuid::from_bytes([0x0F; 16])),
            ..PstatUpdate::default()
        };

        let mut payload = update_to_payload(&update).unwrap();
        assert_eq!(update, from_payload(&mut payload).unwrap());
    }

    #[test]
    fn invalid_state_value() {
        let wire = PstatWire {
            dos: Some(DosWire { s: 9, p: Some(false) }),
            isop: None,
            cm: None,
            tm: None,
            om: None,
            sm: None,
            rowner: None,
            resource_type: None,
            interfaces: None,
        };
        let mut payload = cbor::encode(&wire).unwrap();

        assert!(matches!(
            from_payload(&mut payload),
            Err(Error::SchemaViolation)
        ));
    }

    #[test]
    fn empty_payload() {
        assert!(matches!(
            from_payload(&mut []),
            Err(Error::InvalidParam)
        ));
    }

    #[test]
    fn read_only_detection() {
        let update = PstatUpdate {
            rowner: Some(Uuid::from_bytes([1; 16])),
            ..PstatUpdate::default()
        };
        assert!(!update.violates_read_only(DosState::Rfotm));
        assert!(update.violates_read_only(DosState::Rfpro));

        let update = PstatUpdate {
            dos: Some(Dos::new(DosState::Rfotm)),
            ..PstatUpdate::default()
        };
        assert!(!update.violates_read_only(DosState::Rfnop));
        assert!(update.violates_read_only(DosState::Reset));
    }

    #[test]
    fn rowner_string_form() {
        let pstat = Pstat {
            rowner: Uuid::parse("61646d69-6e44-6576-6963-655555494430")
                .unwrap(),
            ..Pstat::default()
        };
        let mut payload = to_payload(&pstat).unwrap();
        let update = from_payload(&mut payload).unwrap();
        assert_eq!(
            "61646d69-6e44-6576-6963-655555494430",
            update.rowner.unwrap().to_string()
        );
    }
}
