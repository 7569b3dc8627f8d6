use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::events::LedgerEvent;

pub type Amount = u64;

/// The three privileged role slots.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Vault,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub balance: Amount,
    /// Part of `balance` that outgoing transfers may not touch.
    pub reserve: Amount,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roles {
    pub owner: Address,
    pub admin: Address,
    pub vault: Address,
}

impl Roles {
    pub fn holder(&self, role: Role) -> Address {
        match role {
            Role::Owner => self.owner,
            Role::Admin => self.admin,
            Role::Vault => self.vault,
        }
    }

    pub fn holds(&self, account: &Address, role: Role) -> bool {
        self.holder(role) == *account
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerMeta {
    pub height: u64,
    pub timestamp: u64,
    #[serde(default, with = "crate::snapshot::serde_digest_opt")]
    pub last_batch: Option<[u8; 32]>,
}

/// The PlayCoin ledger state machine.
///
/// Every mutating operation takes the caller explicitly, runs all of its
/// checks before touching state, and appends its events only after the state
/// change is complete. A rejected operation leaves the ledger untouched.
#[derive(Clone, Debug)]
pub struct Ledger {
    pub(crate) config: LedgerConfig,
    pub(crate) one_token_unit: Amount,
    pub(crate) total_supply: Amount,
    pub(crate) roles: Roles,
    pub(crate) accounts: BTreeMap<Address, AccountBalance>,
    pub(crate) allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    pub(crate) meta: LedgerMeta,
    pub(crate) applied_batches: BTreeSet<[u8; 32]>,
    pub(crate) events: Vec<LedgerEvent>,
}

impl Ledger {
    /// Builds a ledger from genesis parameters, crediting the whole supply to
    /// the vault.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let one_token_unit = config.one_token_unit()?;
        let total_supply = config.total_supply()?;
        let roles = Roles {
            owner: config.owner,
            admin: config.admin,
            vault: config.vault,
        };
        let mut accounts = BTreeMap::new();
        accounts.insert(
            roles.vault,
            AccountBalance {
                balance: total_supply,
                reserve: 0,
            },
        );
        info!(
            symbol = %config.symbol,
            total_supply,
            vault = %roles.vault,
            "ledger initialized"
        );
        Ok(Self {
            config,
            one_token_unit,
            total_supply,
            roles,
            accounts,
            allowances: BTreeMap::new(),
            meta: LedgerMeta::default(),
            applied_batches: BTreeSet::new(),
            events: Vec::new(),
        })
    }

    //==================== queries ====================//

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.account(account).balance
    }

    pub fn reserve_of(&self, account: &Address) -> Amount {
        self.account(account).reserve
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn owner(&self) -> Address {
        self.roles.owner
    }

    pub fn admin(&self) -> Address {
        self.roles.admin
    }

    pub fn vault(&self) -> Address {
        self.roles.vault
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn decimals(&self) -> u8 {
        self.config.decimals
    }

    pub fn max_number_of_tokens(&self) -> Amount {
        self.config.max_tokens
    }

    /// Smallest units per whole token.
    pub fn one_token_unit(&self) -> Amount {
        self.one_token_unit
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn meta(&self) -> &LedgerMeta {
        &self.meta
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &AccountBalance)> {
        self.accounts.iter()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sum of all balances, widened so a corrupted state cannot overflow it.
    pub fn balance_sum(&self) -> u128 {
        self.accounts
            .values()
            .map(|account| u128::from(account.balance))
            .sum()
    }

    pub fn check_conservation(&self) -> Result<(), LedgerError> {
        let actual = self.balance_sum();
        let expected = u128::from(self.total_supply);
        if actual != expected {
            return Err(LedgerError::ConservationViolated { expected, actual });
        }
        Ok(())
    }

    //==================== balance & allowance ====================//

    pub fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), LedgerError> {
        self.ensure_spendable(&from, &to, amount)?;
        self.move_balance(from, to, amount);
        self.events.push(LedgerEvent::Transfer { from, to, amount });
        debug!(%from, %to, amount, "transfer applied");
        Ok(())
    }

    pub fn transfer_from(
        &mut self,
        spender: Address,
        owner: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let allowance = self.allowance(&owner, &spender);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner,
                spender,
                allowance,
                requested: amount,
            });
        }
        self.ensure_spendable(&owner, &to, amount)?;

        self.set_allowance(owner, spender, allowance - amount);
        self.move_balance(owner, to, amount);
        self.events.push(LedgerEvent::Transfer {
            from: owner,
            to,
            amount,
        });
        debug!(%spender, %owner, %to, amount, "delegated transfer applied");
        Ok(())
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: Amount) -> Result<(), LedgerError> {
        self.set_allowance(owner, spender, amount);
        self.events.push(LedgerEvent::Approval {
            owner,
            spender,
            amount,
        });
        debug!(%owner, %spender, amount, "allowance set");
        Ok(())
    }

    //==================== reserve ====================//

    pub fn set_reserve(&mut self, caller: Address, account: Address, amount: Amount) -> Result<(), LedgerError> {
        self.authorize(&caller, &[Role::Admin], "set reserve")?;
        let entry = self.accounts.entry(account).or_default();
        entry.reserve = amount;
        self.events.push(LedgerEvent::ReserveSet { account, amount });
        debug!(%account, amount, "reserve set");
        Ok(())
    }

    /// Moves up to the reserved amount of `account` back into the vault and
    /// releases the same amount of reserve.
    pub fn recall(&mut self, caller: Address, account: Address, amount: Amount) -> Result<(), LedgerError> {
        self.authorize(&caller, &[Role::Admin], "recall")?;
        let current = self.account(&account);
        if current.reserve < amount {
            return Err(LedgerError::ReserveExceedsRecall {
                account,
                reserve: current.reserve,
                requested: amount,
            });
        }
        if current.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account,
                balance: current.balance,
                requested: amount,
            });
        }

        let vault = self.roles.vault;
        self.accounts.entry(account).or_default().reserve -= amount;
        self.move_balance(account, vault, amount);
        self.events.push(LedgerEvent::Recalled { account, amount });
        self.events.push(LedgerEvent::Transfer {
            from: account,
            to: vault,
            amount,
        });
        debug!(%account, %vault, amount, "reserve recalled");
        Ok(())
    }

    //==================== roles ====================//

    pub fn set_owner(&mut self, caller: Address, new_owner: Address) -> Result<(), LedgerError> {
        self.authorize(&caller, &[Role::Vault], "set owner")?;
        let previous = std::mem::replace(&mut self.roles.owner, new_owner);
        self.events.push(LedgerEvent::OwnerChanged {
            previous,
            current: new_owner,
        });
        info!(%previous, current = %new_owner, "owner changed");
        Ok(())
    }

    pub fn set_admin(&mut self, caller: Address, new_admin: Address) -> Result<(), LedgerError> {
        self.authorize(&caller, &[Role::Owner, Role::Vault], "set admin")?;
        let previous = std::mem::replace(&mut self.roles.admin, new_admin);
        self.events.push(LedgerEvent::AdminChanged {
            previous,
            current: new_admin,
        });
        info!(%previous, current = %new_admin, "admin changed");
        Ok(())
    }

    /// Hands the vault role to `new_vault` together with the whole balance of
    /// the previous vault. The sweep ignores the previous vault's reserve.
    pub fn set_vault(&mut self, caller: Address, new_vault: Address) -> Result<(), LedgerError> {
        self.authorize(&caller, &[Role::Owner], "set vault")?;
        let previous = self.roles.vault;
        let swept = if previous == new_vault {
            0
        } else {
            self.balance_of(&previous)
        };

        self.move_balance(previous, new_vault, swept);
        self.roles.vault = new_vault;

        self.events.push(LedgerEvent::VaultChanged {
            previous,
            current: new_vault,
        });
        if swept > 0 {
            self.events.push(LedgerEvent::Transfer {
                from: previous,
                to: new_vault,
                amount: swept,
            });
        }
        info!(%previous, current = %new_vault, swept, "vault changed");
        Ok(())
    }

    //==================== internals ====================//

    fn account(&self, account: &Address) -> AccountBalance {
        self.accounts.get(account).copied().unwrap_or_default()
    }

    /// Reads the role holders as they are now, never a cached copy.
    fn authorize(&self, caller: &Address, allowed: &[Role], action: &'static str) -> Result<(), LedgerError> {
        if allowed.iter().any(|role| self.roles.holds(caller, *role)) {
            return Ok(());
        }
        warn!(%caller, action, "unauthorized call rejected");
        Err(LedgerError::Unauthorized {
            caller: *caller,
            action,
        })
    }

    /// Balance and reserve guard for outgoing transfers. Zero amounts always
    /// pass; a self-transfer only needs the balance since its net delta is zero.
    fn ensure_spendable(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let account = self.account(from);
        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                balance: account.balance,
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let remaining = account.balance - amount;
        if remaining < account.reserve {
            return Err(LedgerError::ReserveViolation {
                account: *from,
                reserve: account.reserve,
                remaining,
            });
        }
        Ok(())
    }

    /// Unchecked move; callers have already verified `from` holds `amount`.
    /// Credits cannot overflow because balances always sum to the supply.
    fn move_balance(&mut self, from: Address, to: Address, amount: Amount) {
        if amount == 0 || from == to {
            return;
        }
        self.accounts.entry(from).or_default().balance -= amount;
        self.accounts.entry(to).or_default().balance += amount;
    }

    fn set_allowance(&mut self, owner: Address, spender: Address, amount: Amount) {
        if amount == 0 {
            if let Some(spenders) = self.allowances.get_mut(&owner) {
                spenders.remove(&spender);
                if spenders.is_empty() {
                    self.allowances.remove(&owner);
                }
            }
            return;
        }
        self.allowances
            .entry(owner)
            .or_default()
            .insert(spender, amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address::from_bytes([tag; 20])
    }

    const OWNER: u8 = 1;
    const ADMIN: u8 = 2;
    const VAULT: u8 = 3;
    const USER: u8 = 4;
    const OTHER: u8 = 5;

    fn ledger() -> Ledger {
        Ledger::new(LedgerConfig::new(addr(OWNER), addr(ADMIN), addr(VAULT))).unwrap()
    }

    #[test]
    fn genesis_credits_full_supply_to_vault() {
        let ledger = ledger();
        assert_eq!(ledger.total_supply(), 1_000_000_000_000_000_000);
        assert_eq!(ledger.balance_of(&addr(VAULT)), ledger.total_supply());
        assert_eq!(ledger.balance_of(&addr(OWNER)), 0);
        assert_eq!(ledger.balance_of(&addr(ADMIN)), 0);
        assert_eq!(ledger.symbol(), "PLY");
        assert_eq!(ledger.name(), "PlayCoin");
        assert_eq!(ledger.decimals(), 9);
        assert_eq!(ledger.one_token_unit(), 1_000_000_000);
        assert_eq!(ledger.max_number_of_tokens(), 1_000_000_000);
        ledger.check_conservation().unwrap();
    }

    #[test]
    fn views_track_live_roles_and_accounts() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 10).unwrap();
        ledger.set_owner(addr(VAULT), addr(OTHER)).unwrap();

        let roles = ledger.roles();
        assert_eq!(roles.owner, addr(OTHER));
        assert_eq!(roles.admin, addr(ADMIN));
        assert_eq!(roles.vault, addr(VAULT));
        // genesis parameters keep the original holders
        assert_eq!(ledger.config().owner, addr(OWNER));
        assert_eq!(ledger.config().symbol, "PLY");

        let accounts: Vec<_> = ledger
            .accounts()
            .map(|(address, account)| (*address, account.balance))
            .collect();
        assert_eq!(
            accounts,
            vec![
                (addr(VAULT), ledger.total_supply() - 10),
                (addr(USER), 10),
            ]
        );
    }

    #[test]
    fn transfer_moves_balance_and_records_event() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 10).unwrap();
        assert_eq!(ledger.balance_of(&addr(USER)), 10);
        assert_eq!(
            ledger.events().last(),
            Some(&LedgerEvent::Transfer {
                from: addr(VAULT),
                to: addr(USER),
                amount: 10
            })
        );
        ledger.check_conservation().unwrap();
    }

    #[test]
    fn zero_transfer_from_empty_reserved_account_succeeds() {
        let mut ledger = ledger();
        ledger.set_reserve(addr(ADMIN), addr(USER), 5).unwrap();
        ledger.transfer(addr(USER), addr(OTHER), 0).unwrap();
        assert_eq!(ledger.balance_of(&addr(USER)), 0);
        assert_eq!(ledger.balance_of(&addr(OTHER)), 0);
    }

    #[test]
    fn overdraft_is_insufficient_balance() {
        let mut ledger = ledger();
        let err = ledger.transfer(addr(USER), addr(OTHER), 1).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { balance: 0, requested: 1, .. }));
    }

    #[test]
    fn self_transfer_ignores_reserve() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 10).unwrap();
        ledger.set_reserve(addr(ADMIN), addr(USER), 10).unwrap();
        ledger.transfer(addr(USER), addr(USER), 10).unwrap();
        assert_eq!(ledger.balance_of(&addr(USER)), 10);
        let err = ledger.transfer(addr(USER), addr(USER), 11).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn transfer_from_consumes_allowance() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 10).unwrap();
        ledger.approve(addr(USER), addr(OTHER), 6).unwrap();
        ledger.transfer_from(addr(OTHER), addr(USER), addr(OTHER), 4).unwrap();
        assert_eq!(ledger.allowance(&addr(USER), &addr(OTHER)), 2);
        assert_eq!(ledger.balance_of(&addr(OTHER)), 4);

        let err = ledger
            .transfer_from(addr(OTHER), addr(USER), addr(OTHER), 3)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientAllowance { allowance: 2, requested: 3, .. }
        ));
        assert_eq!(ledger.balance_of(&addr(USER)), 6);
    }

    #[test]
    fn failed_delegated_transfer_keeps_allowance() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 2).unwrap();
        ledger.approve(addr(USER), addr(OTHER), 5).unwrap();
        let err = ledger
            .transfer_from(addr(OTHER), addr(USER), addr(OTHER), 3)
            .unwrap_err();
        assert!(err.is_balance_rejection());
        assert_eq!(ledger.allowance(&addr(USER), &addr(OTHER)), 5);
    }

    #[test]
    fn approve_overwrites() {
        let mut ledger = ledger();
        ledger.approve(addr(USER), addr(OTHER), 7).unwrap();
        ledger.approve(addr(USER), addr(OTHER), 3).unwrap();
        assert_eq!(ledger.allowance(&addr(USER), &addr(OTHER)), 3);
        ledger.approve(addr(USER), addr(OTHER), 0).unwrap();
        assert_eq!(ledger.allowance(&addr(USER), &addr(OTHER)), 0);
        assert!(ledger.allowances.is_empty());
    }

    #[test]
    fn reserve_may_exceed_balance() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 3).unwrap();
        ledger.set_reserve(addr(ADMIN), addr(USER), 100).unwrap();
        assert_eq!(ledger.reserve_of(&addr(USER)), 100);
        let err = ledger.transfer(addr(USER), addr(OTHER), 1).unwrap_err();
        assert!(matches!(err, LedgerError::ReserveViolation { reserve: 100, remaining: 2, .. }));
    }

    #[test]
    fn recall_checks_reserve_before_balance() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 1).unwrap();
        let err = ledger.recall(addr(ADMIN), addr(USER), 1).unwrap_err();
        assert!(matches!(err, LedgerError::ReserveExceedsRecall { reserve: 0, .. }));

        ledger.set_reserve(addr(ADMIN), addr(USER), 2).unwrap();
        let err = ledger.recall(addr(ADMIN), addr(USER), 2).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { balance: 1, .. }));
        assert_eq!(ledger.reserve_of(&addr(USER)), 2);
    }

    #[test]
    fn recall_emits_events_after_moving_funds() {
        let mut ledger = ledger();
        ledger.transfer(addr(VAULT), addr(USER), 4).unwrap();
        ledger.set_reserve(addr(ADMIN), addr(USER), 4).unwrap();
        ledger.drain_events();
        ledger.recall(addr(ADMIN), addr(USER), 4).unwrap();
        assert_eq!(
            ledger.drain_events(),
            vec![
                LedgerEvent::Recalled {
                    account: addr(USER),
                    amount: 4
                },
                LedgerEvent::Transfer {
                    from: addr(USER),
                    to: addr(VAULT),
                    amount: 4
                },
            ]
        );
        assert_eq!(ledger.balance_of(&addr(USER)), 0);
        assert_eq!(ledger.reserve_of(&addr(USER)), 0);
    }

    #[test]
    fn role_setters_follow_authorization_table() {
        let mut ledger = ledger();
        assert!(ledger.set_owner(addr(OWNER), addr(USER)).is_err());
        assert!(ledger.set_vault(addr(VAULT), addr(USER)).is_err());
        assert!(ledger.set_admin(addr(ADMIN), addr(USER)).is_err());
        assert!(ledger.set_reserve(addr(OWNER), addr(USER), 1).is_err());
        assert!(ledger.recall(addr(VAULT), addr(USER), 0).is_err());

        ledger.set_admin(addr(OWNER), addr(USER)).unwrap();
        ledger.set_admin(addr(VAULT), addr(OTHER)).unwrap();
        assert_eq!(ledger.admin(), addr(OTHER));
        ledger.set_owner(addr(VAULT), addr(USER)).unwrap();
        assert_eq!(ledger.owner(), addr(USER));
    }

    #[test]
    fn role_change_takes_effect_immediately() {
        let mut ledger = ledger();
        ledger.set_admin(addr(OWNER), addr(USER)).unwrap();
        let err = ledger.set_reserve(addr(ADMIN), addr(OTHER), 1).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { action: "set reserve", .. }));
        ledger.set_reserve(addr(USER), addr(OTHER), 1).unwrap();
    }

    #[test]
    fn set_vault_sweeps_balance_ignoring_reserve() {
        let mut ledger = ledger();
        ledger.set_reserve(addr(ADMIN), addr(VAULT), 1_000).unwrap();
        let before = ledger.balance_of(&addr(VAULT));
        ledger.set_vault(addr(OWNER), addr(OTHER)).unwrap();
        assert_eq!(ledger.vault(), addr(OTHER));
        assert_eq!(ledger.balance_of(&addr(OTHER)), before);
        assert_eq!(ledger.balance_of(&addr(VAULT)), 0);
        ledger.check_conservation().unwrap();
    }

    #[test]
    fn set_vault_to_current_holder_moves_nothing() {
        let mut ledger = ledger();
        let before = ledger.balance_of(&addr(VAULT));
        ledger.set_vault(addr(OWNER), addr(VAULT)).unwrap();
        assert_eq!(ledger.balance_of(&addr(VAULT)), before);
        assert!(!ledger
            .events()
            .iter()
            .any(|e| matches!(e, LedgerEvent::Transfer { .. })));
    }
}
