//! The device onboarding state gate.
//!
//! Every mutating operation on the credential, access control and
//! provisioning status resources consults this module before applying a
//! change. The gate only validates that a requested target state is
//! reachable from the current one; the provisioning status POST handler is
//! responsible for having satisfied the preconditions of the target state
//! beforehand.

use log::warn;

use crate::{error::Error, Result};

/// The device onboarding states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosState {
    /// Device reset to manufacturer defaults.
    Reset = 0,
    /// Ready for ownership transfer.
    Rfotm = 1,
    /// Ready for provisioning.
    Rfpro = 2,
    /// Ready for normal operation.
    Rfnop = 3,
    /// Soft reset.
    Sreset = 4,
}

/// Number of device onboarding states.
pub const STATE_COUNT: usize = 5;

impl DosState {
    /// Parses the wire integer of the state.
    pub fn parse(value: i64) -> Result<DosState> {
        match value {
            0 => Ok(DosState::Reset),
            1 => Ok(DosState::Rfotm),
            2 => Ok(DosState::Rfpro),
            3 => Ok(DosState::Rfnop),
            4 => Ok(DosState::Sreset),
            _ => Err(Error::SchemaViolation),
        }
    }
}

/// The device onboarding state record, a state plus a pending marker that
/// is set while a transition is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dos {
    pub state: DosState,
    pub pending: bool,
}

impl Dos {
    /// Constructs a non-pending record in the given state.
    pub fn new(state: DosState) -> Dos {
        Dos {
            state,
            pending: false,
        }
    }

    /// Moves to the given state if the transition is allowed.
    ///
    /// On rejection the record is left untouched. A transition attempted
    /// while another one is still pending reports an internal error, since
    /// that means the resources backing the previous transition may be in
    /// an unstable state.
    pub fn set_state(&mut self, state: DosState) -> Result<()> {
        if self.pending {
            warn!("state change to {:?} while another is pending", state);
            return Err(Error::Internal);
        }
        if !is_transition_allowed(self.state, state) {
            warn!(
                "state change {:?} -> {:?} not allowed",
                self.state, state
            );
            return Err(Error::Forbidden);
        }

        self.pending = true;
        self.state = state;
        self.pending = false;

        Ok(())
    }
}

impl Default for Dos {
    fn default() -> Dos {
        Dos::new(DosState::Rfotm)
    }
}

/// Returns whether the onboarding state machine permits moving from one
/// state to another.
pub fn is_transition_allowed(from: DosState, to: DosState) -> bool {
    match to {
        // A reset can be requested at any time
        DosState::Reset => true,
        DosState::Rfotm => DosState::Reset == from,
        DosState::Rfpro => matches!(
            from,
            DosState::Rfotm | DosState::Rfnop | DosState::Sreset
        ),
        DosState::Rfnop => DosState::Rfpro == from,
        DosState::Sreset => {
            matches!(from, DosState::Rfpro | DosState::Rfnop)
        }
    }
}

/// Returns whether the credential and access control resources are
/// entirely read-only in the given state, regardless of their per-property
/// access modes.
pub fn svr_read_only(state: DosState) -> bool {
    matches!(state, DosState::Reset | DosState::Rfnop)
}
