//! SQLite store built on an sqlx connection pool.

use super::{stale_revision, username_taken, CampaignStore, NewCampaignRecord, NewUser, StoreError};
use crate::character::Character;
use crate::context::SessionContext;
use crate::id::{CampaignId, UserId};
use crate::model::{Campaign, CampaignSummary, User};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i64 = 2;

/// Campaign store persisted in SQLite.
///
/// The pool is owned by the store and cloned cheaply; connections are
/// checked out per statement or transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and bring its
    /// schema up to date.
    ///
    /// `sqlite::memory:` gives a private database that lives as long as the
    /// store.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every new connection to an in-memory database is a fresh, empty
        // database, so keep exactly one alive.
        let pool_options = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running any pending migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CampaignStore for SqliteStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let id = UserId::new();
        let created_at = now();

        let result = sqlx::query(
            "INSERT INTO users (id, username, password_hash, is_admin, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(timestamp(created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(username_taken(&user.username));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(user_id = %id, username = %user.username, "user created");
        Ok(User {
            id,
            username: user.username,
            password_hash: user.password_hash,
            is_admin: user.is_admin,
            created_at,
        })
    }

    async fn find_user(&self, id: UserId) -> Result<User, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, is_admin, created_at FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

        user_from_row(&row)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, is_admin, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_campaign(&self, record: NewCampaignRecord) -> Result<Campaign, StoreError> {
        let owner_exists = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(record.owner_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !owner_exists {
            return Err(StoreError::NotFound(format!("user {}", record.owner_id)));
        }

        let id = CampaignId::new();
        let created_at = now();
        let character_info = encode("character", &record.character)?;
        let campaign_info = encode(
            "campaign info",
            &CampaignInfo {
                description: record.description.clone(),
            },
        )?;
        let session_context = encode("session context", &record.context)?;

        sqlx::query(
            "INSERT INTO campaigns \
             (id, user_id, campaign_name, character_info, campaign_info, session_context, revision, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(record.owner_id.to_string())
        .bind(&record.name)
        .bind(character_info)
        .bind(campaign_info)
        .bind(session_context)
        .bind(timestamp(created_at))
        .bind(timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(Campaign {
            id,
            owner_id: record.owner_id,
            name: record.name,
            description: record.description,
            character: record.character,
            context: record.context,
            revision: 0,
            created_at,
            updated_at: created_at,
        })
    }

    async fn load_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, campaign_name, character_info, campaign_info, session_context, \
             revision, created_at, updated_at FROM campaigns WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("campaign {id}")))?;

        campaign_from_row(&row)
    }

    async fn save_context(
        &self,
        id: CampaignId,
        context: &SessionContext,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let json = encode("session context", context)?;
        let expected = to_db_revision(expected_revision)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE campaigns SET session_context = ?, revision = revision + 1, updated_at = ? \
             WHERE id = ? AND revision = ?",
        )
        .bind(json)
        .bind(timestamp(now()))
        .bind(id.to_string())
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM campaigns WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Err(if exists {
                stale_revision(id, expected_revision)
            } else {
                StoreError::NotFound(format!("campaign {id}"))
            });
        }

        tx.commit().await?;
        Ok(expected_revision + 1)
    }

    async fn list_campaigns_for_user(
        &self,
        owner: UserId,
    ) -> Result<Vec<CampaignSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, campaign_name, character_info, session_context, updated_at FROM campaigns \
             WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CampaignSummary, StoreError> {
                let character: Character =
                    decode("character", &row.try_get::<String, _>("character_info")?)?;
                let context = decode_context(&row.try_get::<String, _>("session_context")?)?;
                Ok(CampaignSummary {
                    id: parse_id("campaign id", &row.try_get::<String, _>("id")?)?,
                    name: row.try_get("campaign_name")?,
                    character_name: character.name,
                    turn_count: context.turn_count(),
                    updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
                })
            })
            .collect()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(Serialize, Deserialize)]
struct CampaignInfo {
    #[serde(default)]
    description: String,
}

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: parse_id("user id", &row.try_get::<String, _>("id")?)?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        is_admin: row.try_get("is_admin")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn campaign_from_row(row: &SqliteRow) -> Result<Campaign, StoreError> {
    let info: CampaignInfo = match row.try_get::<Option<String>, _>("campaign_info")? {
        Some(json) => decode("campaign info", &json)?,
        None => CampaignInfo {
            description: String::new(),
        },
    };
    let revision: i64 = row.try_get("revision")?;

    Ok(Campaign {
        id: parse_id("campaign id", &row.try_get::<String, _>("id")?)?,
        owner_id: parse_id("user id", &row.try_get::<String, _>("user_id")?)?,
        name: row.try_get("campaign_name")?,
        description: info.description,
        character: decode("character", &row.try_get::<String, _>("character_info")?)?,
        context: decode_context(&row.try_get::<String, _>("session_context")?)?,
        revision: u64::try_from(revision).map_err(|_| corrupt("revision", revision))?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn decode_context(json: &str) -> Result<SessionContext, StoreError> {
    SessionContext::from_json(json).map_err(|e| corrupt("session context", e))
}

fn encode<T: Serialize>(what: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(format!("cannot encode {what}: {e}")))
}

fn decode<T: for<'de> Deserialize<'de>>(what: &str, json: &str) -> Result<T, StoreError> {
    serde_json::from_str(json).map_err(|e| corrupt(what, e))
}

fn parse_id<T: FromStr>(what: &str, text: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    text.parse().map_err(|e| corrupt(what, e))
}

fn to_db_revision(revision: u64) -> Result<i64, StoreError> {
    i64::try_from(revision).map_err(|_| StoreError::Conflict(format!("revision {revision} is out of range")))
}

fn corrupt(what: &str, reason: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        what: what.to_string(),
        reason: reason.to_string(),
    }
}

/// Current time at the precision it is stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", format!("{text:?}: {e}")))
}

// ============================================================================
// Migrations
// ============================================================================

async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM _migrations")
        .fetch_one(pool)
        .await?;

    if current == 0 {
        let foreign: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'campaigns')",
        )
        .fetch_one(pool)
        .await?;
        if foreign > 0 {
            return Err(StoreError::Backend(
                "database has campaign tables that were not created by this engine; \
                 importing other databases is not supported"
                    .to_string(),
            ));
        }
    }

    if current < SCHEMA_VERSION {
        info!(current, target = SCHEMA_VERSION, "migrating campaign database");
        for version in (current + 1)..=SCHEMA_VERSION {
            run_migration(pool, version).await?;
        }
    } else if current > SCHEMA_VERSION {
        warn!(current, known = SCHEMA_VERSION, "database schema is newer than this build");
    }
    Ok(())
}

async fn run_migration(pool: &SqlitePool, version: i64) -> Result<(), StoreError> {
    let (name, sql) = match version {
        1 => ("initial_schema", MIGRATION_V1),
        2 => ("campaign_revisions", MIGRATION_V2),
        _ => return Ok(()),
    };

    debug!(version, name, "applying migration");
    let mut tx = pool.begin().await?;
    for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement.trim()).execute(&mut *tx).await?;
    }
    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(version)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

const MIGRATION_V1: &str = r#"
CREATE TABLE users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE campaigns (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    campaign_name TEXT NOT NULL,
    character_info TEXT NOT NULL,
    campaign_info TEXT,
    session_context TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_campaigns_user ON campaigns(user_id)
"#;

const MIGRATION_V2: &str = r#"
ALTER TABLE campaigns ADD COLUMN revision INTEGER NOT NULL DEFAULT 0;
ALTER TABLE campaigns ADD COLUMN updated_at TEXT;
UPDATE campaigns SET updated_at = created_at WHERE updated_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_campaigns_user_updated ON campaigns(user_id, updated_at)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = "2024-01-01T10:00:00.000001Z".parse::<DateTime<Utc>>().unwrap();
        let later = "2024-01-01T10:00:00.000010Z".parse::<DateTime<Utc>>().unwrap();
        assert!(timestamp(earlier) < timestamp(later));
        assert_eq!(parse_timestamp(&timestamp(later)).unwrap(), later);
    }

    #[test]
    fn test_parse_timestamp_requires_rfc3339() {
        let at = parse_timestamp("2024-03-05T19:30:00+01:00").unwrap();
        assert_eq!(timestamp(at), "2024-03-05T18:30:00.000000Z");
        assert!(matches!(
            parse_timestamp("2024-03-05 18:30:00"),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(parse_timestamp("yesterday"), Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        run_migrations(store.pool()).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(applied, SCHEMA_VERSION);
    }
}
