//! Persistent user records and the subscription registry built on them.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{domain::UserId, persist};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "username", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub subscriptions: BTreeSet<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub last_news_time: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl UserRecord {
    fn new(display_name: Option<String>) -> Self {
        Self {
            display_name,
            subscriptions: BTreeSet::new(),
            active: true,
            last_news_time: None,
        }
    }
}

/// Read side of the user store that the broadcaster depends on.
pub trait SubscriptionRegistry: Send + Sync {
    fn active_users(&self) -> Vec<UserId>;
    fn subscriptions(&self, user_id: UserId) -> BTreeSet<String>;
    /// Stamp `last_news_time` for users that received a digest.
    fn mark_delivered(&self, users: &[UserId], at: DateTime<Utc>);
}

/// User records keyed by id, persisted write-through as one JSON document.
pub struct UserStore {
    path: PathBuf,
    categories: Vec<String>,
    users: Mutex<BTreeMap<UserId, UserRecord>>,
}

impl UserStore {
    /// Open (or create) the store at `path`. Subscriptions are restricted to `categories`.
    pub fn open(path: impl Into<PathBuf>, categories: Vec<String>) -> Self {
        let path = path.into();
        let users: BTreeMap<UserId, UserRecord> = persist::load_or_default(&path);
        info!(path = %path.display(), users = users.len(), "user store loaded");
        Self {
            path,
            categories,
            users: Mutex::new(users),
        }
    }

    /// Create the user if absent. Returns `true` only when a record was created;
    /// an existing record (display name included) is left untouched.
    pub fn register_user(&self, user_id: UserId, display_name: Option<&str>) -> bool {
        let mut users = self.users.lock();
        if users.contains_key(&user_id) {
            return false;
        }
        users.insert(user_id, UserRecord::new(display_name.map(str::to_string)));
        info!(user_id = user_id.0, "registered user");
        self.flush(&users);
        true
    }

    pub fn user(&self, user_id: UserId) -> Option<UserRecord> {
        self.users.lock().get(&user_id).cloned()
    }

    pub fn subscriptions(&self, user_id: UserId) -> BTreeSet<String> {
        self.users
            .lock()
            .get(&user_id)
            .map(|u| u.subscriptions.clone())
            .unwrap_or_default()
    }

    /// `false` when the user is unknown, already subscribed, or the category is not configured.
    pub fn add_subscription(&self, user_id: UserId, category: &str) -> bool {
        if !self.categories.iter().any(|c| c == category) {
            debug!(user_id = user_id.0, category, "refusing unknown category");
            return false;
        }
        let mut users = self.users.lock();
        let Some(user) = users.get_mut(&user_id) else {
            return false;
        };
        if !user.subscriptions.insert(category.to_string()) {
            return false;
        }
        self.flush(&users);
        true
    }

    /// `false` when the user is unknown or not subscribed.
    pub fn remove_subscription(&self, user_id: UserId, category: &str) -> bool {
        let mut users = self.users.lock();
        let Some(user) = users.get_mut(&user_id) else {
            return false;
        };
        if !user.subscriptions.remove(category) {
            return false;
        }
        self.flush(&users);
        true
    }

    pub fn active_users(&self) -> Vec<UserId> {
        self.users
            .lock()
            .iter()
            .filter(|(_, u)| u.active)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&self, users: &BTreeMap<UserId, UserRecord>) {
        if let Err(e) = persist::save_atomic(&self.path, users) {
            warn!("user store not persisted, keeping in-memory state: {e}");
        }
    }
}

impl SubscriptionRegistry for UserStore {
    fn active_users(&self) -> Vec<UserId> {
        UserStore::active_users(self)
    }

    fn subscriptions(&self, user_id: UserId) -> BTreeSet<String> {
        UserStore::subscriptions(self, user_id)
    }

    fn mark_delivered(&self, delivered: &[UserId], at: DateTime<Utc>) {
        if delivered.is_empty() {
            return;
        }
        let mut users = self.users.lock();
        let mut touched = false;
        for id in delivered {
            if let Some(u) = users.get_mut(id) {
                u.last_news_time = Some(at);
                touched = true;
            }
        }
        if touched {
            self.flush(&users);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<String> {
        vec!["general".into(), "tech".into(), "business".into()]
    }

    fn store(dir: &tempfile::TempDir) -> UserStore {
        UserStore::open(dir.path().join("users.json"), categories())
    }

    #[test]
    fn register_is_create_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        assert!(s.register_user(UserId(1), Some("alice")));
        assert!(s.add_subscription(UserId(1), "tech"));

        assert!(!s.register_user(UserId(1), Some("renamed")));
        let u = s.user(UserId(1)).unwrap();
        assert_eq!(u.display_name.as_deref(), Some("alice"));
        assert!(u.active);
        assert_eq!(u.subscriptions.len(), 1);
    }

    #[test]
    fn add_then_remove_restores_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.register_user(UserId(5), None);
        s.add_subscription(UserId(5), "general");
        let before = s.subscriptions(UserId(5));

        assert!(s.add_subscription(UserId(5), "tech"));
        assert!(!s.add_subscription(UserId(5), "tech"));
        assert!(s.remove_subscription(UserId(5), "tech"));
        assert_eq!(s.subscriptions(UserId(5)), before);

        assert!(!s.remove_subscription(UserId(5), "business"));
        assert_eq!(s.subscriptions(UserId(5)), before);
    }

    #[test]
    fn unknown_user_and_category_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        assert!(!s.add_subscription(UserId(9), "tech"));
        assert!(!s.remove_subscription(UserId(9), "tech"));
        assert!(s.subscriptions(UserId(9)).is_empty());

        s.register_user(UserId(9), None);
        assert!(!s.add_subscription(UserId(9), "sports"));
        assert!(s.subscriptions(UserId(9)).is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = store(&dir);
            s.register_user(UserId(1), Some("a"));
            s.register_user(UserId(2), None);
            s.add_subscription(UserId(1), "tech");
            s.add_subscription(UserId(2), "business");
            s.add_subscription(UserId(2), "general");
        }
        let s = store(&dir);
        assert_eq!(s.active_users(), vec![UserId(1), UserId(2)]);
        assert_eq!(
            s.subscriptions(UserId(2)).into_iter().collect::<Vec<_>>(),
            vec!["business".to_string(), "general".to_string()]
        );
    }

    #[test]
    fn reads_legacy_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"{
  "42": {"username": "bob", "subscriptions": ["tech", "tech"], "active": true, "last_news_time": null},
  "43": {"username": null, "subscriptions": []},
  "44": {"subscriptions": ["general"], "active": false}
}"#,
        )
        .unwrap();

        let s = UserStore::open(&path, categories());
        assert_eq!(s.len(), 3);
        assert_eq!(s.subscriptions(UserId(42)).len(), 1);
        assert_eq!(s.active_users(), vec![UserId(42), UserId(43)]);
    }

    #[test]
    fn mark_delivered_stamps_known_users() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.register_user(UserId(1), None);
        let at = Utc::now();
        SubscriptionRegistry::mark_delivered(&s, &[UserId(1), UserId(2)], at);
        assert_eq!(s.user(UserId(1)).unwrap().last_news_time, Some(at));
        assert!(s.user(UserId(2)).is_none());
    }

    #[test]
    fn unwritable_file_keeps_serving_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();

        let s = UserStore::open(&path, categories());
        assert!(s.register_user(UserId(9), Some("carol")));
        assert!(s.add_subscription(UserId(9), "tech"));
        assert!(s.subscriptions(UserId(9)).contains("tech"));
        assert!(path.is_dir());
    }
}
