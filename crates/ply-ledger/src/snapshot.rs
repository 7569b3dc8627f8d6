use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::ledger::{AccountBalance, Amount, Ledger, LedgerMeta, Roles};

/// Serializable view of a ledger, committed to by `state_root`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub config: LedgerConfig,
    pub meta: LedgerMeta,
    pub roles: Roles,
    pub total_supply: Amount,
    pub accounts: BTreeMap<Address, AccountBalance>,
    pub allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    #[serde(with = "serde_digest")]
    pub state_root: [u8; 32],
}

impl Ledger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        let accounts = live_accounts(&self.accounts);
        LedgerSnapshot {
            config: self.config.clone(),
            meta: self.meta.clone(),
            roles: self.roles,
            total_supply: self.total_supply,
            state_root: compute_state_root(
                &self.config,
                &self.meta,
                &self.roles,
                &accounts,
                &self.allowances,
            ),
            accounts,
            allowances: self.allowances.clone(),
        }
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(
            &self.config,
            &self.meta,
            &self.roles,
            &live_accounts(&self.accounts),
            &self.allowances,
        )
    }

    /// Rebuilds a ledger from a snapshot, refusing one whose root or supply
    /// does not add up. The event log starts empty.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let accounts = live_accounts(&snapshot.accounts);
        let allowances: BTreeMap<Address, BTreeMap<Address, Amount>> = snapshot
            .allowances
            .into_iter()
            .map(|(owner, spenders)| {
                let spenders: BTreeMap<_, _> =
                    spenders.into_iter().filter(|(_, amount)| *amount > 0).collect();
                (owner, spenders)
            })
            .filter(|(_, spenders)| !spenders.is_empty())
            .collect();

        let root = compute_state_root(
            &snapshot.config,
            &snapshot.meta,
            &snapshot.roles,
            &accounts,
            &allowances,
        );
        if root != snapshot.state_root {
            return Err(LedgerError::SnapshotRootMismatch);
        }

        let mut ledger = Ledger::new(snapshot.config)?;
        if ledger.total_supply != snapshot.total_supply {
            return Err(LedgerError::ConservationViolated {
                expected: u128::from(ledger.total_supply),
                actual: u128::from(snapshot.total_supply),
            });
        }
        ledger.roles = snapshot.roles;
        ledger.accounts = accounts;
        ledger.allowances = allowances;
        ledger.applied_batches = snapshot.meta.last_batch.into_iter().collect::<BTreeSet<_>>();
        ledger.meta = snapshot.meta;
        ledger.check_conservation()?;
        Ok(ledger)
    }
}

fn live_accounts(
    accounts: &BTreeMap<Address, AccountBalance>,
) -> BTreeMap<Address, AccountBalance> {
    accounts
        .iter()
        .filter(|(_, account)| **account != AccountBalance::default())
        .map(|(address, account)| (*address, *account))
        .collect()
}

fn compute_state_root(
    config: &LedgerConfig,
    meta: &LedgerMeta,
    roles: &Roles,
    accounts: &BTreeMap<Address, AccountBalance>,
    allowances: &BTreeMap<Address, BTreeMap<Address, Amount>>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    // strings are length-prefixed so adjacent fields cannot run together
    let mut hasher = Sha256::new();
    hasher.update(b"config");
    for text in [&config.symbol, &config.name] {
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.update([config.decimals]);
    hasher.update(config.max_tokens.to_le_bytes());
    hasher.update(config.owner.as_bytes());
    hasher.update(config.admin.as_bytes());
    hasher.update(config.vault.as_bytes());
    leaves.push(hasher.finalize().into());

    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update(meta.height.to_le_bytes());
    hasher.update(meta.timestamp.to_le_bytes());
    match &meta.last_batch {
        Some(batch) => {
            hasher.update([1u8]);
            hasher.update(batch);
        }
        None => hasher.update([0u8]),
    }
    leaves.push(hasher.finalize().into());

    for (tag, holder) in [
        (&b"owner"[..], roles.owner),
        (&b"admin"[..], roles.admin),
        (&b"vault"[..], roles.vault),
    ] {
        let mut hasher = Sha256::new();
        hasher.update(b"role");
        hasher.update(tag);
        hasher.update(holder.as_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (address, account) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(address.as_bytes());
        hasher.update(account.balance.to_le_bytes());
        hasher.update(account.reserve.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, spenders) in allowances {
        for (spender, amount) in spenders {
            let mut hasher = Sha256::new();
            hasher.update(b"allowance");
            hasher.update(owner.as_bytes());
            hasher.update(spender.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"ply-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

pub(crate) mod serde_digest {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(encoded.trim(), &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}

pub(crate) mod serde_digest_opt {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(digest) => serializer.serialize_some(&hex::encode(digest)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let mut out = [0u8; 32];
        hex::decode_to_slice(encoded.trim(), &mut out).map_err(D::Error::custom)?;
        Ok(Some(out))
    }
}
