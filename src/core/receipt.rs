use crate::core::config::RequiredDependency;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RECEIPT_FILE_NAME: &str = ".sdk-setup.json";

/// Written next to freshly installed debug libraries.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub source_url: String,
    pub installed_at: DateTime<Utc>,
}

impl InstallReceipt {
    pub fn new(dependency: &RequiredDependency, source_url: &str) -> Self {
        Self {
            name: dependency.name.clone(),
            version: dependency.required_version.clone(),
            source_url: source_url.to_string(),
            installed_at: Utc::now(),
        }
    }

    pub fn path_in(install_dir: &Path) -> PathBuf {
        install_dir.join(RECEIPT_FILE_NAME)
    }

    pub fn save(&self, install_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path_in(install_dir), content)?;
        Ok(())
    }

    /// `Ok(None)` when no receipt has been written yet.
    pub fn load(install_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(install_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}
