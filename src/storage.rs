use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::registry::{BanList, CategoryKey, Registry, Subscriber};

#[derive(Debug, Error)]
pub enum Error {
    #[error("file access failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid store content: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk layout of the store.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredData {
    #[serde(deserialize_with = "lists_or_null")]
    pub subscriptions: BTreeMap<String, Vec<Subscriber>>,
    #[serde(default)]
    pub ban_list: BTreeMap<u64, bool>,
}

/// Layout written by older versions: the subscription map without a wrapper.
#[derive(Deserialize)]
struct LegacyData(#[serde(deserialize_with = "lists_or_null")] BTreeMap<String, Vec<Subscriber>>);

/// Older writers store an emptied category as `null`.
fn lists_or_null<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<Subscriber>>, D::Error>
where
    D: Deserializer<'de>,
{
    let lists = BTreeMap::<String, Option<Vec<Subscriber>>>::deserialize(deserializer)?;
    Ok(lists
        .into_iter()
        .map(|(key, list)| (key, list.unwrap_or_default()))
        .collect())
}

impl StoredData {
    pub async fn capture(registry: &Registry, bans: &BanList) -> Self {
        let subscriptions = registry
            .snapshot()
            .await
            .into_iter()
            .map(|(key, list)| (key.to_string(), list))
            .collect();
        let ban_list = bans.snapshot().await.into_iter().map(|id| (id, true)).collect();

        Self {
            subscriptions,
            ban_list,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(data) => Ok(data),
            Err(e) => {
                log::debug!("Store is not in the current format ({e}), trying legacy format");
                let LegacyData(subscriptions) = serde_json::from_slice(bytes)?;
                log::info!("Migrating store from legacy format");
                Ok(Self {
                    subscriptions,
                    ban_list: BTreeMap::new(),
                })
            }
        }
    }

    pub fn into_state(self) -> (Registry, BanList) {
        let entries = self
            .subscriptions
            .into_iter()
            .filter_map(|(key, list)| match key.parse::<CategoryKey>() {
                Ok(key) => Some((key, list)),
                Err(e) => {
                    log::warn!("Skipping stored category: {e}");
                    None
                }
            });
        let registry = Registry::from_entries(entries);

        let bans = BanList::from_ids(
            self.ban_list
                .into_iter()
                .filter_map(|(id, banned)| banned.then_some(id)),
        );

        (registry, bans)
    }
}

#[derive(Clone)]
pub struct Storage {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Default::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` if there is no usable store; the caller starts empty then.
    pub async fn load(&self) -> Option<StoredData> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No store at {}, starting empty", self.path.display());
                return None;
            }
            Err(e) => {
                log::error!("Couldn't read store {}: {e}", self.path.display());
                return None;
            }
        };

        match StoredData::decode(&bytes) {
            Ok(data) => {
                log::info!(
                    "Loaded {} categories and {} bans from {}",
                    data.subscriptions.len(),
                    data.ban_list.len(),
                    self.path.display()
                );
                Some(data)
            }
            Err(e) => {
                log::error!("Ignoring unreadable store {}: {e}", self.path.display());
                None
            }
        }
    }

    async fn try_save(&self, data: &StoredData) -> Result<(), Error> {
        let bytes = serde_json::to_vec(data)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Failures are only logged; the in-memory state stays authoritative.
    pub async fn save(&self, data: &StoredData) {
        match self.try_save(data).await {
            Ok(()) => log::debug!("Saved store to {}", self.path.display()),
            Err(e) => log::error!("Couldn't save store {}: {e}", self.path.display()),
        }
    }
}
