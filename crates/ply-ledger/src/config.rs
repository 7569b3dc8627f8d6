use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::LedgerError;
use crate::ledger::Amount;

pub const DEFAULT_SYMBOL: &str = "PLY";
pub const DEFAULT_NAME: &str = "PlayCoin";
pub const DEFAULT_DECIMALS: u8 = 9;
pub const DEFAULT_MAX_TOKENS: Amount = 1_000_000_000; // 1B whole tokens

/// Genesis parameters of a ledger.
///
/// Only the three role holders are mandatory in a genesis file; the token
/// constants fall back to the PlayCoin defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Amount,
    pub owner: Address,
    pub admin: Address,
    pub vault: Address,
}

fn default_symbol() -> String {
    DEFAULT_SYMBOL.to_string()
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

fn default_max_tokens() -> Amount {
    DEFAULT_MAX_TOKENS
}

impl LedgerConfig {
    /// PlayCoin defaults with the given role holders.
    pub fn new(owner: Address, admin: Address, vault: Address) -> Self {
        Self {
            symbol: default_symbol(),
            name: default_name(),
            decimals: DEFAULT_DECIMALS,
            max_tokens: DEFAULT_MAX_TOKENS,
            owner,
            admin,
            vault,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, LedgerError> {
        let config: LedgerConfig = serde_json::from_slice(bytes)
            .map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let bytes = fs::read(path).map_err(|e| {
            LedgerError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&bytes)
    }

    /// `10^decimals`, the number of smallest units in one whole token.
    pub fn one_token_unit(&self) -> Result<Amount, LedgerError> {
        (10 as Amount)
            .checked_pow(u32::from(self.decimals))
            .ok_or(LedgerError::SupplyOverflow {
                max_tokens: self.max_tokens,
                decimals: self.decimals,
            })
    }

    pub fn total_supply(&self) -> Result<Amount, LedgerError> {
        self.one_token_unit()?
            .checked_mul(self.max_tokens)
            .ok_or(LedgerError::SupplyOverflow {
                max_tokens: self.max_tokens,
                decimals: self.decimals,
            })
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.symbol.trim().is_empty() {
            return Err(LedgerError::InvalidConfig("symbol must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidConfig("name must not be empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(LedgerError::InvalidConfig("max_tokens must be > 0".into()));
        }
        self.total_supply()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> (Address, Address, Address) {
        (
            Address::from_bytes([1u8; 20]),
            Address::from_bytes([2u8; 20]),
            Address::from_bytes([3u8; 20]),
        )
    }

    #[test]
    fn defaults_give_one_billion_tokens_with_nine_decimals() {
        let (owner, admin, vault) = roles();
        let config = LedgerConfig::new(owner, admin, vault);
        assert_eq!(config.one_token_unit().unwrap(), 1_000_000_000);
        assert_eq!(
            config.total_supply().unwrap(),
            1_000_000_000 * 1_000_000_000
        );
    }

    #[test]
    fn genesis_json_fills_in_defaults() {
        let (owner, admin, vault) = roles();
        let json = format!(r#"{{"owner":"{owner}","admin":"{admin}","vault":"{vault}"}}"#);
        let config = LedgerConfig::from_json(json.as_bytes()).unwrap();
        assert_eq!(config, LedgerConfig::new(owner, admin, vault));
    }

    #[test]
    fn oversized_supply_is_rejected() {
        let (owner, admin, vault) = roles();
        let mut config = LedgerConfig::new(owner, admin, vault);
        config.decimals = 18;
        assert!(matches!(
            config.validate(),
            Err(LedgerError::SupplyOverflow { decimals: 18, .. })
        ));
        config.decimals = 30;
        assert!(config.one_token_unit().is_err());
    }

    #[test]
    fn empty_symbol_and_zero_supply_are_invalid() {
        let (owner, admin, vault) = roles();
        let mut config = LedgerConfig::new(owner, admin, vault);
        config.symbol = " ".into();
        assert!(matches!(config.validate(), Err(LedgerError::InvalidConfig(_))));
        let mut config = LedgerConfig::new(owner, admin, vault);
        config.max_tokens = 0;
        assert!(matches!(config.validate(), Err(LedgerError::InvalidConfig(_))));
    }
}
