use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::ledger::Amount;

/// Observable outcome of a successful ledger operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    ReserveSet {
        account: Address,
        amount: Amount,
    },
    Recalled {
        account: Address,
        amount: Amount,
    },
    OwnerChanged {
        previous: Address,
        current: Address,
    },
    AdminChanged {
        previous: Address,
        current: Address,
    },
    VaultChanged {
        previous: Address,
        current: Address,
    },
}
