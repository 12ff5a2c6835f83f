//! Transfer FSM State Definitions
//!
//! State IDs are stored as SMALLINT in `transfer_journal_tb`.

use std::fmt;

/// Transfer FSM States
///
/// Terminal states: COMMITTED (40), REJECTED (-10).
/// CRITICAL_INCONSISTENCY (-99) is a quarantine: never retried, never
/// overwritten, waits for an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferState {
    /// Claimed in the idempotency journal, nothing checked yet
    Received = 0,

    /// IBAN shape checks
    Validating = 5,

    /// IBAN lookup, self-transfer and amount checks
    Resolving = 10,

    /// Reading both accounts and checking sufficiency
    CheckingFunds = 15,

    /// Debit in progress (persist-before-call)
    MutatingDebit = 20,

    /// Debit applied, credit in progress - funds are IN-FLIGHT
    MutatingCredit = 30,

    /// Terminal: both legs applied
    Committed = 40,

    /// Terminal: nothing applied, or the debit was refunded
    Rejected = -10,

    /// Refunding the debited account
    Compensating = -20,

    /// Refund exhausted its retries with the debit still applied
    CriticalInconsistency = -99,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Rejected)
    }

    /// Debit may have been applied; the transfer must not be released
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferState::MutatingDebit
                | TransferState::MutatingCredit
                | TransferState::Compensating
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferState::Received),
            5 => Some(TransferState::Validating),
            10 => Some(TransferState::Resolving),
            15 => Some(TransferState::CheckingFunds),
            20 => Some(TransferState::MutatingDebit),
            30 => Some(TransferState::MutatingCredit),
            40 => Some(TransferState::Committed),
            -10 => Some(TransferState::Rejected),
            -20 => Some(TransferState::Compensating),
            -99 => Some(TransferState::CriticalInconsistency),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Received => "RECEIVED",
            TransferState::Validating => "VALIDATING",
            TransferState::Resolving => "RESOLVING",
            TransferState::CheckingFunds => "CHECKING_FUNDS",
            TransferState::MutatingDebit => "MUTATING_DEBIT",
            TransferState::MutatingCredit => "MUTATING_CREDIT",
            TransferState::Committed => "COMMITTED",
            TransferState::Rejected => "REJECTED",
            TransferState::Compensating => "COMPENSATING",
            TransferState::CriticalInconsistency => "CRITICAL_INCONSISTENCY",
        }
    }

    /// Legal FSM edges.
    ///
    /// `MutatingDebit -> CheckingFunds` is the conflict-retry loop: the debit
    /// lost its version race and the accounts are read again.
    /// `Compensating -> Committed` happens when the refund finds the credit
    /// slot already taken by a credit whose reply was lost.
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (*self, next),
            (Received, Validating)
                | (Validating, Resolving)
                | (Validating, Rejected)
                | (Resolving, CheckingFunds)
                | (Resolving, Rejected)
                | (CheckingFunds, MutatingDebit)
                | (CheckingFunds, Rejected)
                | (MutatingDebit, CheckingFunds)
                | (MutatingDebit, MutatingCredit)
                | (MutatingDebit, Rejected)
                | (MutatingCredit, Committed)
                | (MutatingCredit, Compensating)
                | (Compensating, Rejected)
                | (Compensating, Committed)
                | (Compensating, CriticalInconsistency)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransferState; 10] = [
        TransferState::Received,
        TransferState::Validating,
        TransferState::Resolving,
        TransferState::CheckingFunds,
        TransferState::MutatingDebit,
        TransferState::MutatingCredit,
        TransferState::Committed,
        TransferState::Rejected,
        TransferState::Compensating,
        TransferState::CriticalInconsistency,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Committed.is_terminal());
        assert!(TransferState::Rejected.is_terminal());

        assert!(!TransferState::CriticalInconsistency.is_terminal());
        assert!(!TransferState::Compensating.is_terminal());
        assert!(!TransferState::MutatingCredit.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
        for to in ALL {
            assert!(!TransferState::CriticalInconsistency.can_transition_to(to));
        }
    }

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            TransferState::Received,
            TransferState::Validating,
            TransferState::Resolving,
            TransferState::CheckingFunds,
            TransferState::MutatingDebit,
            TransferState::MutatingCredit,
            TransferState::Committed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_compensation_never_retries_credit() {
        assert!(!TransferState::Compensating.can_transition_to(TransferState::MutatingCredit));
        assert!(!TransferState::Compensating.can_transition_to(TransferState::MutatingDebit));
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            assert_eq!(TransferState::from_id(state.id()), Some(state));
        }
        assert!(TransferState::from_id(999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferState::Received.to_string(), "RECEIVED");
        assert_eq!(
            TransferState::CriticalInconsistency.to_string(),
            "CRITICAL_INCONSISTENCY"
        );
    }
}
