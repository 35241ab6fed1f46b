// src/monitor/persistence.rs

//! Durable storage for published config epochs. The epoch is flushed before
//! any action derived from it is externalized, so a restarted monitor never
//! announces an older configuration than one it already acted on.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[async_trait]
pub trait EpochStore: Send + Sync {
    async fn persist(&self, master_name: &str, config_epoch: u64) -> Result<()>;
}

/// Keeps the last published config epoch per master in a small TOML file.
/// Every update rewrites the whole file through a temp-file rename, with an
/// fsync in between.
pub struct FileEpochStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, u64>>,
}

impl FileEpochStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path).await {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// The stored epoch for a master, if any.
    pub async fn get(&self, master_name: &str) -> Option<u64> {
        self.entries.lock().await.get(master_name).copied()
    }
}

#[async_trait]
impl EpochStore for FileEpochStore {
    async fn persist(&self, master_name: &str, config_epoch: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(master_name.to_string()).or_insert(0);
        if config_epoch <= *entry {
            return Ok(());
        }
        *entry = config_epoch;

        let content = toml::to_string(&*entries)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// A store for deployments that accept losing epochs across restarts.
pub struct NullEpochStore;

#[async_trait]
impl EpochStore for NullEpochStore {
    async fn persist(&self, _master_name: &str, _config_epoch: u64) -> Result<()> {
        Ok(())
    }
}
