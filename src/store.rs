//! Contract persistence.
//!
//! One canonical JSON file per consumer/provider pair, written under a
//! configured root directory. The save strategy is an explicit configuration
//! option, never inferred from file existence.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::contract::{Contract, Interaction};
use crate::error::{ContractError, ContractResult};

/// How `save` treats an existing contract file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStrategy {
    /// Replace the file contents entirely
    #[default]
    Overwrite,
    /// Union interactions by description; the newest version of a duplicate
    /// description wins, everything else is preserved
    MergeAppend,
}

/// Contract store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for contract files
    pub root_dir: PathBuf,
    /// Save strategy
    pub strategy: SaveStrategy,
}

impl StoreConfig {
    /// Create a config with the default overwrite strategy.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            strategy: SaveStrategy::default(),
        }
    }

    /// Select a save strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: SaveStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Reads and writes contract documents at a configured location.
#[derive(Debug, Clone)]
pub struct ContractStore {
    config: StoreConfig,
}

impl ContractStore {
    /// Create a store.
    #[must_use]
    pub const fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Deterministic file path for a consumer/provider pair.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Config`] when a participant name would escape
    /// the root directory.
    pub fn contract_path(&self, consumer: &str, provider: &str) -> ContractResult<PathBuf> {
        validate_file_name_part(consumer)?;
        validate_file_name_part(provider)?;
        Ok(self
            .config
            .root_dir
            .join(format!("{consumer}-{provider}.json")))
    }

    /// Persist a contract.
    ///
    /// With [`SaveStrategy::MergeAppend`], previously recorded interactions
    /// are kept unless their description collides with a new one; a merge
    /// against an unparseable existing file fails rather than clobbering it.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Io`] on filesystem failures and
    /// [`ContractError::Parse`] when merging onto a corrupt document.
    #[instrument(skip(self, contract), fields(consumer = %contract.consumer.name, provider = %contract.provider.name))]
    pub fn save(&self, contract: &Contract) -> ContractResult<()> {
        contract.validate()?;
        let path = self.contract_path(&contract.consumer.name, &contract.provider.name)?;

        let merged;
        let to_write = match self.config.strategy {
            SaveStrategy::Overwrite => contract,
            SaveStrategy::MergeAppend if path.exists() => {
                let existing = read_contract(&path)?;
                merged = merge(existing, contract.clone());
                &merged
            }
            SaveStrategy::MergeAppend => contract,
        };

        fs::create_dir_all(&self.config.root_dir)?;
        fs::write(&path, to_write.to_json()?)?;
        info!(
            path = %path.display(),
            interactions = to_write.interactions.len(),
            strategy = ?self.config.strategy,
            "Contract saved"
        );
        Ok(())
    }

    /// Load the contract for a consumer/provider pair.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Parse`] for missing or unparseable documents;
    /// an empty contract is never fabricated.
    #[instrument(skip(self))]
    pub fn load(&self, consumer: &str, provider: &str) -> ContractResult<Contract> {
        let path = self.contract_path(consumer, provider)?;
        if !path.exists() {
            return Err(ContractError::parse(format!(
                "no contract file at {}",
                path.display()
            )));
        }
        let contract = read_contract(&path)?;
        debug!(
            path = %path.display(),
            interactions = contract.interactions.len(),
            "Contract loaded"
        );
        Ok(contract)
    }
}

/// Participant names become path components of the contract file; separators
/// and relative traversal are rejected rather than escaping `root_dir`.
fn validate_file_name_part(name: &str) -> ContractResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(ContractError::config(format!(
            "participant name not usable as a file name: {name:?}"
        )));
    }
    Ok(())
}

fn read_contract(path: &Path) -> ContractResult<Contract> {
    let data = fs::read(path)?;
    Contract::from_json(&data)
        .map_err(|e| ContractError::parse(format!("{}: {e}", path.display())))
}

/// Union interactions by description: existing document order is preserved,
/// collisions take the newly recorded version, and interactions new to the
/// document are appended in their recorded order.
fn merge(existing: Contract, new: Contract) -> Contract {
    let mut interactions: Vec<Interaction> = existing
        .interactions
        .into_iter()
        .map(|old| {
            new.interactions
                .iter()
                .find(|fresh| fresh.description == old.description)
                .cloned()
                .unwrap_or(old)
        })
        .collect();
    for fresh in new.interactions {
        if !interactions.iter().any(|i| i.description == fresh.description) {
            interactions.push(fresh);
        }
    }
    Contract {
        consumer: new.consumer,
        provider: new.provider,
        interactions,
    }
}
