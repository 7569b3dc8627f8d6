use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::address::Address;
use crate::error::LedgerError;
use crate::ledger::{Amount, Ledger};

/// Every mutating ledger operation, minus the caller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerCall {
    Transfer {
        to: Address,
        amount: Amount,
    },
    TransferFrom {
        owner: Address,
        to: Address,
        amount: Amount,
    },
    Approve {
        spender: Address,
        amount: Amount,
    },
    SetReserve {
        account: Address,
        amount: Amount,
    },
    Recall {
        account: Address,
        amount: Amount,
    },
    SetOwner {
        new_owner: Address,
    },
    SetAdmin {
        new_admin: Address,
    },
    SetVault {
        new_vault: Address,
    },
}

/// A call together with the identity the host environment vouches for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    pub caller: Address,
    #[serde(flatten)]
    pub call: LedgerCall,
}

impl LedgerCall {
    fn tag(&self) -> u8 {
        match self {
            LedgerCall::Transfer { .. } => 0,
            LedgerCall::TransferFrom { .. } => 1,
            LedgerCall::Approve { .. } => 2,
            LedgerCall::SetReserve { .. } => 3,
            LedgerCall::Recall { .. } => 4,
            LedgerCall::SetOwner { .. } => 5,
            LedgerCall::SetAdmin { .. } => 6,
            LedgerCall::SetVault { .. } => 7,
        }
    }
}

impl Invocation {
    pub fn new(caller: Address, call: LedgerCall) -> Self {
        Self { caller, call }
    }

    /// Fixed-width encoding: caller, op tag, then the operands in field order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 3 * 20 + 8);
        out.extend_from_slice(self.caller.as_bytes());
        out.push(self.call.tag());
        match &self.call {
            LedgerCall::Transfer { to, amount } => {
                out.extend_from_slice(to.as_bytes());
                out.extend_from_slice(&amount.to_le_bytes());
            }
            LedgerCall::TransferFrom { owner, to, amount } => {
                out.extend_from_slice(owner.as_bytes());
                out.extend_from_slice(to.as_bytes());
                out.extend_from_slice(&amount.to_le_bytes());
            }
            LedgerCall::Approve {
                spender: party,
                amount,
            }
            | LedgerCall::SetReserve {
                account: party,
                amount,
            }
            | LedgerCall::Recall {
                account: party,
                amount,
            } => {
                out.extend_from_slice(party.as_bytes());
                out.extend_from_slice(&amount.to_le_bytes());
            }
            LedgerCall::SetOwner { new_owner: holder }
            | LedgerCall::SetAdmin { new_admin: holder }
            | LedgerCall::SetVault { new_vault: holder } => {
                out.extend_from_slice(holder.as_bytes());
            }
        }
        out
    }
}

/// Deterministic id for a batch: SHA-256 over the count and the canonical
/// bytes of each invocation.
pub fn batch_id(invocations: &[Invocation]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"batch");
    hasher.update((invocations.len() as u64).to_le_bytes());
    for invocation in invocations {
        hasher.update(invocation.canonical_bytes());
    }
    hasher.finalize().into()
}

impl Ledger {
    pub fn execute(&mut self, invocation: &Invocation) -> Result<(), LedgerError> {
        let caller = invocation.caller;
        match invocation.call {
            LedgerCall::Transfer { to, amount } => self.transfer(caller, to, amount),
            LedgerCall::TransferFrom { owner, to, amount } => {
                self.transfer_from(caller, owner, to, amount)
            }
            LedgerCall::Approve { spender, amount } => self.approve(caller, spender, amount),
            LedgerCall::SetReserve { account, amount } => self.set_reserve(caller, account, amount),
            LedgerCall::Recall { account, amount } => self.recall(caller, account, amount),
            LedgerCall::SetOwner { new_owner } => self.set_owner(caller, new_owner),
            LedgerCall::SetAdmin { new_admin } => self.set_admin(caller, new_admin),
            LedgerCall::SetVault { new_vault } => self.set_vault(caller, new_vault),
        }
    }

    /// Applies `invocations` all-or-nothing. On failure neither state nor
    /// events from the batch survive.
    ///
    /// Only the balances, allowances and roles are staged; the event log and
    /// the applied-batch set stay outside the staged copy.
    pub fn apply_batch(
        &mut self,
        invocations: &[Invocation],
        batch_id: [u8; 32],
        timestamp: u64,
    ) -> Result<(), LedgerError> {
        if self.applied_batches.contains(&batch_id) {
            return Err(LedgerError::DuplicateBatch);
        }

        let events = std::mem::take(&mut self.events);
        let applied = std::mem::take(&mut self.applied_batches);
        let mut staged = self.clone();
        self.events = events;
        self.applied_batches = applied;

        for (index, invocation) in invocations.iter().enumerate() {
            staged
                .execute(invocation)
                .map_err(|source| LedgerError::BatchFailed {
                    index,
                    source: Box::new(source),
                })?;
        }

        self.roles = staged.roles;
        self.accounts = staged.accounts;
        self.allowances = staged.allowances;
        self.events.append(&mut staged.events);
        self.applied_batches.insert(batch_id);
        self.meta.height += 1;
        self.meta.timestamp = timestamp;
        self.meta.last_batch = Some(batch_id);
        info!(
            height = self.meta.height,
            batch = %hex::encode(batch_id),
            invocations = invocations.len(),
            "batch committed"
        );
        Ok(())
    }
}
