//! On-disk workspace used by the CLI: `config.json`, `ledger.json` and
//! hex-encoded signing keys under `keys/`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};

use crate::address::{Address, AddressError};
use crate::config::{ConfigError, ProgramConfig};
use crate::ledger::LedgerState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("invalid key file {0}: expected 64 hex characters")]
    KeyFormat(PathBuf),
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("ledger.json")
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        self.root.join("keys").join(format!("{name}.hex"))
    }

    /// Write a fresh config and an empty ledger. Refuses to clobber an
    /// existing ledger.
    pub fn init(&self, config: &ProgramConfig) -> Result<(), StoreError> {
        let ledger_path = self.ledger_path();
        if ledger_path.exists() {
            return Err(StoreError::AlreadyExists(ledger_path));
        }
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        config.save(&self.config_path())?;
        self.save_ledger(&LedgerState::new())
    }

    pub fn load_config(&self) -> Result<ProgramConfig, StoreError> {
        Ok(ProgramConfig::load(&self.config_path())?)
    }

    pub fn save_config(&self, config: &ProgramConfig) -> Result<(), StoreError> {
        Ok(config.save(&self.config_path())?)
    }

    pub fn load_ledger(&self) -> Result<LedgerState, StoreError> {
        let path = self.ledger_path();
        let bytes = fs::read(&path).map_err(io_err(&path))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write through a temp file so a crash never leaves a torn ledger.
    pub fn save_ledger(&self, ledger: &LedgerState) -> Result<(), StoreError> {
        let path = self.ledger_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(ledger)?).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }

    pub fn generate_key(&self, name: &str) -> Result<SigningKey, StoreError> {
        let path = self.key_path(name);
        if path.exists() {
            return Err(StoreError::AlreadyExists(path));
        }
        let mut sk_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut sk_bytes);
        let key = SigningKey::from_bytes(&sk_bytes);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::write(&path, hex::encode(sk_bytes)).map_err(io_err(&path))?;
        Ok(key)
    }

    pub fn load_key(&self, name: &str) -> Result<SigningKey, StoreError> {
        let path = self.key_path(name);
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        let bytes = hex::decode(text.trim()).map_err(|_| StoreError::KeyFormat(path.clone()))?;
        let sk_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::KeyFormat(path.clone()))?;
        Ok(SigningKey::from_bytes(&sk_bytes))
    }

    /// Resolve a key name from this workspace, or a base58 address.
    pub fn resolve(&self, name_or_address: &str) -> Result<Address, StoreError> {
        if self.key_path(name_or_address).exists() {
            let key = self.load_key(name_or_address)?;
            return Ok(Address::from(key.verifying_key()));
        }
        Ok(name_or_address.parse()?)
    }
}
