//! The relational user/server catalog. Treated by the specification as an
//! external collaborator; given a concrete `sqlx`-backed implementation
//! here so the crate builds and tests end-to-end, behind a trait so a fake
//! can stand in for tests.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, Row};

/// A catalog row for one user, matching `original_source`'s six-column
/// shape: `id, username, displayname, password_hash, salt, rights`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub displayname: String,
    pub password_hash: String,
    pub salt: String,
    pub rights: u32,
}

/// One entry from `list_active_servers`, used only to corroborate a
/// GameServerAuth node's claimed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveServer {
    pub node_id: String,
    pub address: String,
    pub port: u16,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn displayname_taken(&self, name: &str) -> Result<bool>;
    async fn update_displayname(&self, username: &str, new: &str) -> Result<()>;
    async fn list_active_servers(&self) -> Result<Vec<ActiveServer>>;
}

/// MySQL-backed catalog, matching the schema the original Python service
/// queried over `aiomysql`.
pub struct MysqlCatalog {
    pool: MySqlPool,
}

impl MysqlCatalog {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for MysqlCatalog {
    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT username, displayname, password_hash, salt, rights \
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // A malformed row (wrong column count / type) is treated as "user
        // not found" rather than propagated, matching the original's
        // defensive schema check.
        let record = (|| -> Result<UserRecord, sqlx::Error> {
            Ok(UserRecord {
                username: row.try_get("username")?,
                displayname: row.try_get("displayname")?,
                password_hash: row.try_get("password_hash")?,
                salt: row.try_get("salt")?,
                rights: row.try_get::<i64, _>("rights")? as u32,
            })
        })();

        match record {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                log::warn!("catalog row for user lookup is malformed: {error}");
                Ok(None)
            }
        }
    }

    async fn displayname_taken(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE displayname = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    async fn update_displayname(&self, username: &str, new: &str) -> Result<()> {
        sqlx::query("UPDATE users SET displayname = ? WHERE username = ?")
            .bind(new)
            .bind(username)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_active_servers(&self) -> Result<Vec<ActiveServer>> {
        let rows = sqlx::query("SELECT node_id, address, port FROM servers WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut servers = Vec::with_capacity(rows.len());
        for row in rows {
            servers.push(ActiveServer {
                node_id: row.try_get("node_id")?,
                address: row.try_get("address")?,
                port: row.try_get::<i64, _>("port")? as u16,
            });
        }

        Ok(servers)
    }
}
