//! The provisioning status (`pstat`) resource manager.

use alloc::{vec, vec::Vec};
use bitflags::bitflags;
use log::{debug, info, warn};

use crate::{
    dos::{Dos, DosState, STATE_COUNT},
    error::Error,
    store::{SvrStore, PSTAT_NAME},
    types::Uuid,
    Result,
};

pub(crate) mod codec;

pub use codec::PstatUpdate;

bitflags! {
    /// The device provisioning mode bitmask, used for both the currently
    /// pending (`cm`) and target (`tm`) operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dpm: u16 {
        const RESET = 0x01;
        const TAKE_OWNER = 0x02;
        const BOOTSTRAP_SERVICE = 0x04;
        const SECURITY_MANAGEMENT_SERVICES = 0x08;
        const PROVISION_CREDENTIALS = 0x10;
        const PROVISION_ACLS = 0x20;
        const VERIFY_SOFTWARE_VERSION = 0x40;
        const UPDATE_SOFTWARE = 0x80;
    }
}

/// The device provisioning operation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    MultipleServiceServerDriven = 0x1,
    SingleServiceServerDriven = 0x2,
    SingleServiceClientDriven = 0x4,
}

impl OperationMode {
    /// Parses the wire integer of the mode.
    pub fn parse(value: i64) -> Result<OperationMode> {
        match value {
            0x1 => Ok(OperationMode::MultipleServiceServerDriven),
            0x2 => Ok(OperationMode::SingleServiceServerDriven),
            0x4 => Ok(OperationMode::SingleServiceClientDriven),
            _ => Err(Error::SchemaViolation),
        }
    }
}

/// The properties of the provisioning status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PstatProperty {
    Dos = 0,
    Isop = 1,
    Cm = 2,
    Tm = 3,
    Om = 4,
    Sm = 5,
    Rowner = 6,
}

/// Number of provisioning status properties.
pub const PROPERTY_COUNT: usize = 7;

/// Access modes of each property by onboarding state. `true` marks the
/// property read-only in that state.
#[rustfmt::skip]
static READ_ONLY: [[bool; STATE_COUNT]; PROPERTY_COUNT] = [
    // RESET  RFOTM  RFPRO  RFNOP  SRESET
    [true,  false, false, false, false], // dos
    [true,  true,  true,  true,  true ], // isop
    [true,  true,  true,  true,  true ], // cm
    [true,  false, false, false, false], // tm
    [true,  false, false, false, false], // om
    [true,  true,  true,  true,  true ], // sm
    [true,  false, true,  true,  false], // rowneruuid
];

/// Returns whether the property is read-only in the given onboarding
/// state.
pub fn is_property_read_only(
    property: PstatProperty,
    state: DosState,
) -> bool {
    READ_ONLY[property as usize][state as usize]
}

/// The provisioning status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pstat {
    pub dos: Dos,
    pub isop: bool,
    pub cm: Dpm,
    pub tm: Dpm,
    pub om: OperationMode,
    pub sm: Vec<OperationMode>,
    pub rowner: Uuid,
}

impl Default for Pstat {
    /// The factory-fresh record: ready for ownership transfer, not
    /// operational, with the take-owner operation pending.
    fn default() -> Pstat {
        Pstat {
            dos: Dos::new(DosState::Rfotm),
            isop: false,
            cm: Dpm::TAKE_OWNER,
            tm: Dpm::empty(),
            om: OperationMode::SingleServiceClientDriven,
            sm: vec![OperationMode::SingleServiceClientDriven],
            rowner: Uuid::NIL,
        }
    }
}

/// The result of applying a provisioning status update.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update was applied and persisted.
    Applied,
    /// The update requested a device reset; secure storage has been
    /// cleared and no response payload should follow.
    StorageReset,
}

/// Owns the device's provisioning status record.
pub struct PstatManager {
    pstat: Pstat,
}

impl PstatManager {
    /// Loads the persisted record, falling back to the default one so a
    /// corrupted or absent database still allows provisioning to start
    /// over.
    pub fn init(store: &dyn SvrStore) -> PstatManager {
        let pstat = match store.get(PSTAT_NAME) {
            Some(mut payload) => match codec::from_payload(&mut payload) {
                Ok(update) => update.apply_to(&Pstat::default()),
                Err(e) => {
                    warn!("persisted pstat unusable ({}), using default", e);
                    Pstat::default()
                }
            },
            None => Pstat::default(),
        };

        PstatManager { pstat }
    }

    /// Returns the current record.
    pub fn pstat(&self) -> &Pstat {
        &self.pstat
    }

    /// Returns the current onboarding state record.
    pub fn dos(&self) -> Dos {
        self.pstat.dos
    }

    /// Returns the full CBOR representation of the record.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        codec::to_payload(&self.pstat)
    }

    /// Applies a decoded POST update.
    ///
    /// The whole update is rejected before any field is applied if it
    /// carries a property that is read-only in the current state, if its
    /// operation mode is unsupported, or if the onboarding state gate
    /// refuses the requested transition. Only the onboarding state, the
    /// operation mode and the resource owner are ever applied; the
    /// remaining properties of the stored record are controlled by the
    /// device, not by clients.
    pub fn update(
        &mut self,
        update: &PstatUpdate,
        store: &mut dyn SvrStore,
    ) -> Result<UpdateOutcome> {
        if update.violates_read_only(self.pstat.dos.state) {
            warn!("pstat update carries read-only properties");
            return Err(Error::NotAcceptable);
        }

        // The operation mode, explicit or inherited, has to be supported
        let om = update.om.unwrap_or(self.pstat.om);
        if !self.pstat.sm.contains(&om) {
            warn!("operation mode {:?} not supported", om);
            return Err(Error::InvalidParam);
        }

        // A target-mode bit flipping 0 -> 1 starts the corresponding
        // process, whose capability bit is cleared until it completes
        let tm = update.tm.unwrap_or(self.pstat.tm);
        let mut cm = update.cm.unwrap_or(self.pstat.cm);
        if !self.pstat.tm.contains(Dpm::VERIFY_SOFTWARE_VERSION)
            && tm.contains(Dpm::VERIFY_SOFTWARE_VERSION)
        {
            info!("software version validation initiated");
            cm.remove(Dpm::VERIFY_SOFTWARE_VERSION);
        }
        if !self.pstat.tm.contains(Dpm::UPDATE_SOFTWARE)
            && tm.contains(Dpm::UPDATE_SOFTWARE)
        {
            info!("software update initiated");
            cm.remove(Dpm::UPDATE_SOFTWARE);
        }

        if let Some(dos) = update.dos {
            if dos.state != self.pstat.dos.state {
                self.pstat.dos.set_state(dos.state)?;
                debug!("onboarding state changed to {:?}", dos.state);
            }
        }

        self.pstat.om = om;
        if let Some(rowner) = update.rowner {
            self.pstat.rowner = rowner;
        }

        if cm.contains(Dpm::RESET) {
            info!("device reset requested, clearing secure storage");
            store.reset()?;
            return Ok(UpdateOutcome::StorageReset);
        }

        self.persist(store)?;

        Ok(UpdateOutcome::Applied)
    }

    /// Reverts the record to its initial, pre-ownership-transfer values
    /// and persists it.
    pub fn restore_to_init(&mut self, store: &mut dyn SvrStore) {
        info!("reverting pstat to its initial state");
        self.pstat.dos = Dos::new(DosState::Rfotm);
        self.pstat.cm |= Dpm::TAKE_OWNER;
        self.pstat.tm.remove(Dpm::TAKE_OWNER);
        self.pstat.om = OperationMode::SingleServiceClientDriven;
        if let Some(first) = self.pstat.sm.first_mut() {
            *first = OperationMode::SingleServiceClientDriven;
        }

        if self.persist(store).is_err() {
            warn!("failed to persist reverted pstat");
        }
    }

    /// Completes a self-initiated ownership transfer: clears the pending
    /// take-owner operation, marks the device operational and adopts the
    /// new resource owner.
    pub fn set_self_ownership(
        &mut self,
        new_owner: &Uuid,
        store: &mut dyn SvrStore,
    ) -> Result<()> {
        if self.pstat.isop || !self.pstat.cm.contains(Dpm::TAKE_OWNER) {
            warn!("pstat is not ready for ownership transfer");
            return Err(Error::NotAcceptable);
        }

        self.pstat.cm.remove(Dpm::TAKE_OWNER);
        self.pstat.isop = true;
        self.pstat.rowner = *new_owner;

        self.persist(store)
    }

    /// Persists the current record.
    pub fn persist(&self, store: &mut dyn SvrStore) -> Result<()> {
        let payload = codec::to_payload(&self.pstat)?;
        store.put(PSTAT_NAME, &payload)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::MemStore;

    use super::*;

    #[test]
    fn fresh_device_defaults() {
        let store = MemStore::new();
        let manager = PstatManager::init(&store);

        assert_eq!(DosState::Rfotm, manager.pstat().dos.state);
        assert!(!manager.pstat().isop);
        assert!(manager.pstat().cm.contains(Dpm::TAKE_OWNER));
    }

    #[test]
    fn access_matrix() {
        // isop, cm and sm are never writable
        for &state in &[
            DosState::Reset,
            DosState::Rfotm,
            DosState::Rfpro,
            DosState::Rfnop,
            DosState::Sreset,
        ] {
            assert!(is_property_read_only(PstatProperty::Isop, state));
            assert!(is_property_read_only(PstatProperty::Cm, state));
            assert!(is_property_read_only(PstatProperty::Sm, state));
            // Nothing is writable in RESET
            assert_eq!(
                state == DosState::Reset,
                is_property_read_only(PstatProperty::Dos, state)
            );
        }

        // rowneruuid is only writable while being (re)onboarded
        assert!(!is_property_read_only(
            PstatProperty::Rowner,
            DosState::Rfotm
        ));
        assert!(!is_property_read_only(
            PstatProperty::Rowner,
            DosState::Sreset
        ));
        assert!(is_property_read_only(
            PstatProperty::Rowner,
            DosState::Rfpro
        ));
        assert!(is_property_read_only(
            PstatProperty::Rowner,
            DosState::Rfnop
        ));
    }

    #[test]
    fn rejected_update_leaves_record() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);
        let before = manager.pstat().clone();

        // isop is read-only in every state
        let update = PstatUpdate {
            isop: Some(true),
            ..PstatUpdate::default()
        };
        assert!(matches!(
            manager.update(&update, &mut store),
            Err(Error::NotAcceptable)
        ));
        assert_eq!(before, *manager.pstat());
        assert_eq!(None, store.get(PSTAT_NAME));
    }

    #[test]
    fn unsupported_operation_mode() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);

        let update = PstatUpdate {
            om: Some(OperationMode::SingleServiceServerDriven),
            ..PstatUpdate::default()
        };
        assert!(matches!(
            manager.update(&update, &mut store),
            Err(Error::InvalidParam)
        ));
    }

    #[test]
    fn forbidden_transition_applies_nothing() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);
        let owner = Uuid::from_bytes([7; 16]);

        // Rfotm -> Rfnop is not a valid transition, so neither the state
        // nor the accompanying rowner change may be applied
        let update = PstatUpdate {
            dos: Some(Dos::new(DosState::Rfnop)),
            rowner: Some(owner),
            ..PstatUpdate::default()
        };
        assert!(matches!(
            manager.update(&update, &mut store),
            Err(Error::Forbidden)
        ));
        assert_eq!(DosState::Rfotm, manager.pstat().dos.state);
        assert!(manager.pstat().rowner.is_nil());
    }

    #[test]
    fn applied_update_persists() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);
        let owner = Uuid::from_bytes([7; 16]);

        let update = PstatUpdate {
            dos: Some(Dos::new(DosState::Rfpro)),
            rowner: Some(owner),
            ..PstatUpdate::default()
        };
        assert_eq!(
            UpdateOutcome::Applied,
            manager.update(&update, &mut store).unwrap()
        );
        assert_eq!(DosState::Rfpro, manager.pstat().dos.state);
        assert_eq!(owner, manager.pstat().rowner);

        // A fresh manager sees the persisted record
        let reloaded = PstatManager::init(&store);
        assert_eq!(manager.pstat(), reloaded.pstat());
    }

    #[test]
    fn software_process_initiation_clears_capability() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);
        // Pretend a verification capability is pending
        manager.pstat.cm |= Dpm::VERIFY_SOFTWARE_VERSION;
        manager.pstat.cm |= Dpm::RESET;

        let update = PstatUpdate {
            tm: Some(Dpm::VERIFY_SOFTWARE_VERSION),
            ..PstatUpdate::default()
        };
        // tm is writable in RFOTM, and the inherited cm RESET bit now
        // triggers the storage wipe
        store.put(PSTAT_NAME, &[0]).unwrap();
        assert_eq!(
            UpdateOutcome::StorageReset,
            manager.update(&update, &mut store).unwrap()
        );
        assert_eq!(None, store.get(PSTAT_NAME));
    }

    #[test]
    fn restore_to_init() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);
        manager.pstat.dos = Dos::new(DosState::Rfpro);
        manager.pstat.cm = Dpm::empty();
        manager.pstat.tm = Dpm::TAKE_OWNER;

        manager.restore_to_init(&mut store);
        assert_eq!(DosState::Rfotm, manager.pstat().dos.state);
        assert!(manager.pstat().cm.contains(Dpm::TAKE_OWNER));
        assert!(!manager.pstat().tm.contains(Dpm::TAKE_OWNER));
        assert!(store.get(PSTAT_NAME).is_some());
    }

    #[test]
    fn self_ownership() {
        let mut store = MemStore::new();
        let mut manager = PstatManager::init(&store);
        let owner = Uuid::from_bytes([9; 16]);

        manager.set_self_ownership(&owner, &mut store).unwrap();
        assert!(manager.pstat().isop);
        assert!(!manager.pstat().cm.contains(Dpm::TAKE_OWNER));
        assert_eq!(owner, manager.pstat().rowner);

        // A second attempt is rejected
        assert!(manager.set_self_ownership(&owner, &mut store).is_err());
    }
}
