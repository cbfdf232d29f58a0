use std::{fs, path::Path};

use crowdfund_core::rent::Rent;
use crowdfund_core::Pubkey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::{Lamports, LAMPORTS_PER_SOL};

/// Seed hashed into the default program id when none is configured.
pub const DEFAULT_PROGRAM_SEED: &[u8] = b"crowdfund-program";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings of the in-memory host. Every field has a default, so a config
/// file only lists what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub program_id: Pubkey,
    pub lamports_per_signature: Lamports,
    pub rent: Rent,
    /// Largest single airdrop the faucet grants.
    pub faucet_limit: Lamports,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
            lamports_per_signature: 5_000,
            rent: Rent::default(),
            faucet_limit: 10 * LAMPORTS_PER_SOL,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

pub fn default_program_id() -> Pubkey {
    Pubkey::new_from_array(Sha256::digest(DEFAULT_PROGRAM_SEED).into())
}
