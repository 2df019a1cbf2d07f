use std::{collections::BTreeSet, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::ledger::Amount;

pub const LAMPORTS_PER_COIN: Amount = 1_000_000_000;
pub const DEFAULT_MAX_SUBMISSIONS_PER_WALLET: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A token accepted for payment, and where its fees go.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportedToken {
    pub mint: Address,
    pub treasury_token_account: Address,
    pub fee: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgramConfig {
    /// Native-coin fee destination.
    pub treasury: Address,
    pub native_fee: Amount,
    pub supported_tokens: Vec<SupportedToken>,
    pub max_submissions_per_wallet: u32,
    /// Unix timestamp after which no user or record can be created.
    pub submission_deadline: Option<i64>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            treasury: Address::default_treasury(),
            native_fee: LAMPORTS_PER_COIN,
            supported_tokens: Vec::new(),
            max_submissions_per_wallet: DEFAULT_MAX_SUBMISSIONS_PER_WALLET,
            submission_deadline: None,
        }
    }
}

impl ProgramConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_submissions_per_wallet == 0 {
            return Err(ConfigError::Invalid(
                "max_submissions_per_wallet must be at least 1".into(),
            ));
        }
        if self.native_fee == 0 {
            return Err(ConfigError::Invalid("native_fee must be > 0".into()));
        }
        let mut mints = BTreeSet::new();
        for token in &self.supported_tokens {
            if token.fee == 0 {
                return Err(ConfigError::Invalid(format!(
                    "fee for mint {} must be > 0",
                    token.mint
                )));
            }
            if !mints.insert(token.mint) {
                return Err(ConfigError::Invalid(format!(
                    "mint {} listed twice",
                    token.mint
                )));
            }
        }
        Ok(())
    }

    pub fn supported_token(&self, mint: &Address) -> Option<&SupportedToken> {
        self.supported_tokens.iter().find(|token| &token.mint == mint)
    }
}
