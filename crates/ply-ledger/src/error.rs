use thiserror::Error;

use crate::address::Address;
use crate::ledger::Amount;

/// Every variant means the whole operation was rejected and no state changed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Caller does not hold the role the operation requires.
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: Address, action: &'static str },

    #[error("insufficient balance in {account}: have {balance}, need {requested}")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        requested: Amount,
    },

    /// The debit would leave less than the reserved amount behind.
    #[error("transfer would leave {remaining} in {account}, below its reserve of {reserve}")]
    ReserveViolation {
        account: Address,
        reserve: Amount,
        remaining: Amount,
    },

    #[error("allowance of {spender} over {owner} is {allowance}, need {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: Amount,
        requested: Amount,
    },

    #[error("cannot recall {requested} from {account}: only {reserve} reserved")]
    ReserveExceedsRecall {
        account: Address,
        reserve: Amount,
        requested: Amount,
    },

    #[error("batch already applied")]
    DuplicateBatch,

    #[error("batch rejected at invocation {index}: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("invalid ledger config: {0}")]
    InvalidConfig(String),

    #[error("{max_tokens} tokens with {decimals} decimals overflow the supply type")]
    SupplyOverflow { max_tokens: Amount, decimals: u8 },

    #[error("snapshot state root does not match its contents")]
    SnapshotRootMismatch,

    #[error("balances sum to {actual}, total supply is {expected}")]
    ConservationViolated { expected: u128, actual: u128 },
}

impl LedgerError {
    /// True for both balance and reserve failures, for callers that treat
    /// them as one undistinguished rejection.
    pub fn is_balance_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientBalance { .. } | LedgerError::ReserveViolation { .. }
        )
    }

    /// Unwraps batch failures down to the invocation error that caused them.
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::BatchFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
