//! Local convenience cache of the provider key values. The backend is the
//! source of truth; this file only pre-populates the form between runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Error, Result};

use super::CredentialSet;

const CACHE_FILE: &str = "credentials.json";

pub struct CredentialCache {
    path: PathBuf,
}

impl CredentialCache {
    pub fn new(storage_path: impl AsRef<Path>) -> Self {
        Self {
            path: storage_path.as_ref().join(CACHE_FILE),
        }
    }

    pub fn load(&self) -> Result<CredentialSet, Error> {
        let raw = fs::read_to_string(&self.path)?;
        let keys: CredentialSet = serde_json::from_str(&raw)?;
        Ok(keys.normalized())
    }

    pub fn store(&self, keys: &CredentialSet) -> Result<(), Error> {
        fs::write(&self.path, serde_json::to_string_pretty(keys)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), Error> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
