//! Shared test doubles for the scenario tests below: an in-memory `Catalog`
//! standing in for the real `sqlx`-backed one, and the password hashing the
//! real `ServerList` handler expects its catalog rows to already contain.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use auth_server::catalog::{ActiveServer, Catalog, UserRecord};

pub fn sha256_hex(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());

    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// An in-memory stand-in for `MysqlCatalog`, keyed the same way: by
/// username for users, by a flat list for active servers.
#[derive(Default)]
pub struct FakeCatalog {
    users: Mutex<HashMap<String, UserRecord>>,
    displaynames: Mutex<HashSet<String>>,
    active_servers: Mutex<Vec<ActiveServer>>,
    pub update_calls: Mutex<Vec<(String, String)>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, record: UserRecord) {
        if !record.displayname.is_empty() {
            self.displaynames.lock().unwrap().insert(record.displayname.clone());
        }
        self.users.lock().unwrap().insert(record.username.clone(), record);
    }

    pub fn add_active_server(&self, server: ActiveServer) {
        self.active_servers.lock().unwrap().push(server);
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(username).cloned())
    }

    async fn displayname_taken(&self, name: &str) -> Result<bool> {
        Ok(self.displaynames.lock().unwrap().contains(name))
    }

    async fn update_displayname(&self, username: &str, new: &str) -> Result<()> {
        self.update_calls
            .lock()
            .unwrap()
            .push((username.to_string(), new.to_string()));

        if let Some(record) = self.users.lock().unwrap().get_mut(username) {
            record.displayname = new.to_string();
        }
        self.displaynames.lock().unwrap().insert(new.to_string());

        Ok(())
    }

    async fn list_active_servers(&self) -> Result<Vec<ActiveServer>> {
        Ok(self.active_servers.lock().unwrap().clone())
    }
}
