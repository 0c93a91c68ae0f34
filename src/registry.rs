use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, UserId};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: u64,
    pub first_name: String,
}

impl Subscriber {
    pub fn new(id: UserId, first_name: &str) -> Self {
        Self {
            id: id.0,
            first_name: first_name.to_string(),
        }
    }
}

/// A category inside one chat. The category name is always stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryKey {
    chat_id: ChatId,
    category: String,
}

impl CategoryKey {
    pub fn new(chat_id: ChatId, category: &str) -> Self {
        Self {
            chat_id,
            category: category.to_uppercase(),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id.0, self.category)
    }
}

#[derive(Debug, Error)]
#[error("invalid category key: {0:?}")]
pub struct InvalidCategoryKey(String);

impl FromStr for CategoryKey {
    type Err = InvalidCategoryKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCategoryKey(s.to_string());
        let (chat_id, category) = s.split_once(':').ok_or_else(invalid)?;
        let chat_id = chat_id.parse().map_err(|_| invalid())?;
        Ok(Self::new(ChatId(chat_id), category))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
}

type Map = HashMap<CategoryKey, Arc<Mutex<Vec<Subscriber>>>>;

#[derive(Clone, Default)]
pub struct Registry {
    categories: Arc<RwLock<Map>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (CategoryKey, Vec<Subscriber>)>) -> Self {
        let mut lists: HashMap<CategoryKey, Vec<Subscriber>> = HashMap::new();
        for (key, subscribers) in entries {
            let list = lists.entry(key).or_default();
            for sub in subscribers {
                push_unique(list, sub);
            }
        }

        let map = lists
            .into_iter()
            .map(|(key, list)| (key, Arc::new(Mutex::new(list))))
            .collect();

        Self {
            categories: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn join(&self, key: &CategoryKey, subscriber: Subscriber) -> JoinOutcome {
        {
            let categories = self.categories.read().await;
            if let Some(list) = categories.get(key) {
                let mut list = list.lock().await;
                return push_unique(&mut list, subscriber);
            }
        }

        // the category may have been created in between, so go through entry()
        let mut categories = self.categories.write().await;
        let list = categories.entry(key.clone()).or_default();
        let mut list = list.lock().await;
        push_unique(&mut list, subscriber)
    }

    /// Returns whether the user was actually removed.
    pub async fn leave(&self, key: &CategoryKey, user_id: UserId) -> bool {
        let categories = self.categories.read().await;
        let Some(list) = categories.get(key) else {
            return false;
        };

        let mut list = list.lock().await;
        let before = list.len();
        list.retain(|s| s.id != user_id.0);
        list.len() != before
    }

    /// Returns whether the category existed.
    pub async fn clear_category(&self, key: &CategoryKey) -> bool {
        self.categories.write().await.remove(key).is_some()
    }

    pub async fn members(&self, key: &CategoryKey) -> Vec<Subscriber> {
        let categories = self.categories.read().await;
        let members = match categories.get(key) {
            Some(list) => list.lock().await.clone(),
            None => Vec::new(),
        };
        members
    }

    /// All categories of a chat sorted by name, emptied ones included.
    pub async fn list_all(&self, chat_id: ChatId) -> Vec<(String, Vec<Subscriber>)> {
        let categories = self.categories.read().await;
        let mut result = Vec::new();
        for (key, list) in categories.iter() {
            if key.chat_id == chat_id {
                result.push((key.category.clone(), list.lock().await.clone()));
            }
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    pub async fn snapshot(&self) -> Vec<(CategoryKey, Vec<Subscriber>)> {
        let categories = self.categories.read().await;
        let mut result = Vec::with_capacity(categories.len());
        for (key, list) in categories.iter() {
            result.push((key.clone(), list.lock().await.clone()));
        }
        result
    }
}

fn push_unique(list: &mut Vec<Subscriber>, subscriber: Subscriber) -> JoinOutcome {
    if list.iter().any(|s| s.id == subscriber.id) {
        return JoinOutcome::AlreadyMember;
    }
    list.push(subscriber);
    JoinOutcome::Joined
}

/// Users that must not be tagged. Banned users may still join and leave.
#[derive(Clone, Default)]
pub struct BanList {
    users: Arc<RwLock<HashSet<u64>>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            users: Arc::new(RwLock::new(ids.into_iter().collect())),
        }
    }

    pub async fn ban(&self, user_id: UserId) {
        self.users.write().await.insert(user_id.0);
    }

    pub async fn unban(&self, user_id: UserId) {
        self.users.write().await.remove(&user_id.0);
    }

    pub async fn is_banned(&self, user_id: UserId) -> bool {
        self.users.read().await.contains(&user_id.0)
    }

    pub async fn snapshot(&self) -> Vec<u64> {
        let mut ids: Vec<_> = self.users.read().await.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
