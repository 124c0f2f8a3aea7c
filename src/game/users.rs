//! User Table
//!
//! Usernames, plaintext passwords, scores and the questions already asked to
//! each user. Load order is kept: it breaks score ties in the ranking.
//!
//! File format:
//!
//! ```json
//! {
//!     "test":   {"password": "test",   "score": 0,   "questions_asked": []},
//!     "master": {"password": "master", "score": 200, "questions_asked": [2313]}
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{QuestionId, StoreError};
use crate::network::protocol::{DATA_DELIMITER, DELIMITER};

/// One user as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Plaintext password.
    pub password: String,
    /// Current score.
    #[serde(default)]
    pub score: u32,
    /// Questions already asked.
    #[serde(default)]
    pub questions_asked: Vec<QuestionId>,
}

/// A user in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique name.
    pub username: String,
    /// Plaintext password.
    pub password: String,
    /// Current score.
    pub score: u32,
    /// Questions already asked. Only grows.
    pub questions_asked: BTreeSet<QuestionId>,
}

impl User {
    /// New user with a zero score.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            score: 0,
            questions_asked: BTreeSet::new(),
        }
    }

    /// Same user with a score.
    pub fn with_score(mut self, score: u32) -> Self {
        self.score = score;
        self
    }

    /// Reject names and passwords that cannot travel in a frame.
    fn check(&self) -> Result<(), StoreError> {
        let reserved = |s: &str| s.contains(DATA_DELIMITER) || s.contains(DELIMITER);
        let reason = if self.username.is_empty() {
            "empty username"
        } else if reserved(self.username.as_str()) {
            "username contains a reserved delimiter"
        } else if reserved(self.password.as_str()) {
            "password contains a reserved delimiter"
        } else {
            return Ok(());
        };
        Err(StoreError::InvalidUser {
            username: self.username.clone(),
            reason,
        })
    }

    fn from_record(username: String, record: UserRecord) -> Self {
        Self {
            username,
            password: record.password,
            score: record.score,
            questions_asked: record.questions_asked.into_iter().collect(),
        }
    }

    fn to_record(&self) -> UserRecord {
        UserRecord {
            password: self.password.clone(),
            score: self.score,
            questions_asked: self.questions_asked.iter().copied().collect(),
        }
    }
}

/// All users known to the server, in load order.
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Vec<User>,
    index: HashMap<String, usize>,
}

impl UserStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from users in order. A repeated username replaces the earlier entry
    /// and keeps its position.
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for user in users {
            store.insert(user)?;
        }
        Ok(store)
    }

    /// Parse the JSON user file format.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let raw: Map<String, Value> = serde_json::from_str(json)?;
        let mut store = Self::new();
        for (username, value) in raw {
            let record: UserRecord = serde_json::from_value(value)?;
            store.insert(User::from_record(username, record))?;
        }
        Ok(store)
    }

    /// Load the JSON user file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Serialize back to the user file format, in load order.
    pub fn to_json(&self) -> Result<String, StoreError> {
        let mut raw = Map::new();
        for user in &self.users {
            raw.insert(user.username.clone(), serde_json::to_value(user.to_record())?);
        }
        Ok(serde_json::to_string_pretty(&Value::Object(raw))?)
    }

    /// Write the user file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Add or replace a user. Names and passwords may not hold `#` or `|`.
    pub fn insert(&mut self, user: User) -> Result<(), StoreError> {
        user.check()?;
        match self.index.get(&user.username) {
            Some(&i) => self.users[i] = user,
            None => {
                self.index.insert(user.username.clone(), self.users.len());
                self.users.push(user);
            }
        }
        Ok(())
    }

    /// Find a user.
    pub fn lookup(&self, username: &str) -> Option<&User> {
        self.index.get(username).map(|&i| &self.users[i])
    }

    /// Find a user for mutation.
    pub fn lookup_mut(&mut self, username: &str) -> Option<&mut User> {
        match self.index.get(username) {
            Some(&i) => self.users.get_mut(i),
            None => None,
        }
    }

    /// Add to a user's score. Returns the new score, or `None` for an unknown user.
    pub fn persist_score_delta(&mut self, username: &str, delta: u32) -> Option<u32> {
        let user = self.lookup_mut(username)?;
        user.score = user.score.saturating_add(delta);
        Some(user.score)
    }

    /// Users by score, highest first. Equal scores keep load order.
    pub fn ranking(&self) -> Vec<&User> {
        let mut ranked: Vec<&User> = self.users.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    /// Users in load order.
    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True when no users are loaded.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS_JSON: &str = r#"{
        "test": {"password": "test", "score": 0, "questions_asked": []},
        "yossi": {"password": "123", "score": 50, "questions_asked": [2313]},
        "master": {"password": "master", "score": 200}
    }"#;

    #[test]
    fn test_load_valid_json() {
        let store = UserStore::from_json(USERS_JSON).unwrap();
        assert_eq!(store.len(), 3);

        let yossi = store.lookup("yossi").unwrap();
        assert_eq!(yossi.password, "123");
        assert_eq!(yossi.score, 50);
        assert!(yossi.questions_asked.contains(&2313));

        let master = store.lookup("master").unwrap();
        assert!(master.questions_asked.is_empty());
    }

    #[test]
    fn test_load_keeps_file_order() {
        let store = UserStore::from_json(USERS_JSON).unwrap();
        let names: Vec<&str> = store.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["test", "yossi", "master"]);
    }

    #[test]
    fn test_load_invalid_json() {
        assert!(matches!(
            UserStore::from_json("not a valid JSON"),
            Err(StoreError::Json(_))
        ));
        assert!(matches!(
            UserStore::from_json(r#"{"test": {"score": 1}}"#),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn test_load_rejects_reserved_delimiters() {
        let json = r#"{
            "ev|il": {"password": "x", "score": 1},
            "ok": {"password": "y", "score": 0}
        }"#;
        assert!(matches!(
            UserStore::from_json(json),
            Err(StoreError::InvalidUser { ref username, .. }) if username == "ev|il"
        ));
        assert!(matches!(
            UserStore::from_json(r#"{"a#b": {"password": "x"}}"#),
            Err(StoreError::InvalidUser { .. })
        ));
        assert!(matches!(
            UserStore::from_json(r#"{"ok": {"password": "p#w"}}"#),
            Err(StoreError::InvalidUser { .. })
        ));
    }

    #[test]
    fn test_insert_rejects_unsendable_user() {
        let mut store = UserStore::new();
        assert!(store.insert(User::new("", "x")).is_err());
        assert!(store.insert(User::new("pipe|name", "x")).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = UserStore::load("/definitely/not/here/users.json");
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_persist_score_delta() {
        let mut store = UserStore::from_json(USERS_JSON).unwrap();
        assert_eq!(store.persist_score_delta("yossi", 5), Some(55));
        assert_eq!(store.lookup("yossi").unwrap().score, 55);
        assert_eq!(store.persist_score_delta("ghost", 5), None);
    }

    #[test]
    fn test_ranking_is_stable() {
        let store = UserStore::from_users([
            User::new("a", "x").with_score(10),
            User::new("b", "x").with_score(30),
            User::new("c", "x").with_score(10),
            User::new("d", "x").with_score(30),
        ])
        .unwrap();
        let names: Vec<&str> = store.ranking().iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["b", "d", "a", "c"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut store = UserStore::from_users([User::new("a", "1"), User::new("b", "2")]).unwrap();
        store.insert(User::new("a", "changed")).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.iter().next().unwrap().password, "changed");
    }

    #[test]
    fn test_save_roundtrip() {
        let mut store = UserStore::from_json(USERS_JSON).unwrap();
        store.persist_score_delta("test", 5);
        store
            .lookup_mut("test")
            .unwrap()
            .questions_asked
            .insert(4122);

        let path = std::env::temp_dir().join(format!("trivia-users-{}.json", std::process::id()));
        store.save(&path).unwrap();
        let reloaded = UserStore::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let test = reloaded.lookup("test").unwrap();
        assert_eq!(test.score, 5);
        assert!(test.questions_asked.contains(&4122));
        let names: Vec<&str> = reloaded.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["test", "yossi", "master"]);
    }
}
