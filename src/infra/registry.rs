// ============================================================
// Layer 6 — File-system Model Registry
// ============================================================
// A minimal registry behind the ModelRegistry trait:
//
//   registry/
//     registry.json                 ← index: models → versions
//     avazu_ctr/1/ctr_model_hashing.bin.gz
//     avazu_ctr/2/ctr_model_hashing.bin.gz
//
// A version is created PENDING_REGISTRATION, becomes READY once
// its artifact copy is in place (FAILED_REGISTRATION if the copy
// fails), and carries at most one stage label.
//
// No locking: one writer at a time.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::traits::{ModelRegistry, VersionStatus};
use crate::infra::codec;

pub const INDEX_FILE_NAME: &str = "registry.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: u32,
    pub run_id: String,
    pub source: PathBuf,
    pub stored_at: PathBuf,
    pub status: VersionStatus,
    pub stage: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndex {
    pub models: BTreeMap<String, Vec<ModelVersion>>,
}

pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Cannot create registry dir '{}'", root.display()))?;
        Ok(Self { root })
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    pub fn index(&self) -> Result<RegistryIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(RegistryIndex::default());
        }
        codec::read_json(&path)
    }

    fn save_index(&self, index: &RegistryIndex) -> Result<()> {
        codec::write_json(&self.index_path(), index)
    }

    fn update_version<F>(&self, name: &str, version: u32, f: F) -> Result<()>
    where
        F: FnOnce(&mut ModelVersion),
    {
        let mut index = self.index()?;
        let entry = index
            .models
            .get_mut(name)
            .and_then(|vs| vs.iter_mut().find(|v| v.version == version));
        match entry {
            Some(v) => f(v),
            None => bail!("model '{name}' has no version {version}"),
        }
        self.save_index(&index)
    }
}

impl ModelRegistry for FsRegistry {
    fn ensure_model(&self, name: &str) -> Result<()> {
        let mut index = self.index()?;
        if !index.models.contains_key(name) {
            index.models.insert(name.to_string(), Vec::new());
            self.save_index(&index)?;
            tracing::info!("Registered model '{}' created", name);
        }
        Ok(())
    }

    fn create_version(&self, name: &str, source: &Path, run_id: &str) -> Result<u32> {
        let mut index = self.index()?;
        let versions = index
            .models
            .get_mut(name)
            .with_context(|| format!("model '{name}' is not registered"))?;

        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let file_name = source
            .file_name()
            .with_context(|| format!("'{}' has no file name", source.display()))?;
        let stored_at = self.root.join(name).join(version.to_string()).join(file_name);

        versions.push(ModelVersion {
            version,
            run_id: run_id.to_string(),
            source: source.to_path_buf(),
            stored_at: stored_at.clone(),
            status: VersionStatus::PendingRegistration,
            stage: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        self.save_index(&index)?;

        let copied = stored_at
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::copy(source, &stored_at));

        match copied {
            Ok(_) => {
                self.update_version(name, version, |v| v.status = VersionStatus::Ready)?;
                tracing::info!("Created version {} of '{}'", version, name);
                Ok(version)
            }
            Err(e) => {
                self.update_version(name, version, |v| v.status = VersionStatus::FailedRegistration)?;
                Err(e).with_context(|| {
                    format!("Cannot copy '{}' into the registry", source.display())
                })
            }
        }
    }

    fn version_status(&self, name: &str, version: u32) -> Result<VersionStatus> {
        self.index()?
            .models
            .get(name)
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .map(|v| v.status)
            .with_context(|| format!("model '{name}' has no version {version}"))
    }

    fn transition_stage(&self, name: &str, version: u32, stage: &str) -> Result<()> {
        self.update_version(name, version, |v| v.stage = Some(stage.to_string()))?;
        tracing::info!("'{}' version {} moved to stage {}", name, version, stage);
        Ok(())
    }
}
