//! Persistence for users and campaigns.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::character::Character;
use crate::context::SessionContext;
use crate::id::{CampaignId, UserId};
use crate::model::{Campaign, CampaignSummary, User};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("stored {what} is unreadable: {reason}")]
    Corrupt { what: String, reason: String },

    #[error("database error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// A user row to insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: Option<String>,
    pub is_admin: bool,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: None,
            is_admin: false,
        }
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}

/// A validated campaign row to insert.
#[derive(Debug, Clone)]
pub struct NewCampaignRecord {
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub character: Character,
    pub context: SessionContext,
}

/// Storage backend for users and campaigns.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Fails with `Conflict` when the username is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<User, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Fails with `NotFound` when the owner does not exist.
    async fn create_campaign(&self, record: NewCampaignRecord) -> Result<Campaign, StoreError>;

    async fn load_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError>;

    /// Replace the stored context if the stored revision is still
    /// `expected_revision`. Returns the new revision.
    async fn save_context(
        &self,
        id: CampaignId,
        context: &SessionContext,
        expected_revision: u64,
    ) -> Result<u64, StoreError>;

    /// Most recently updated first.
    async fn list_campaigns_for_user(&self, owner: UserId)
        -> Result<Vec<CampaignSummary>, StoreError>;
}

pub(crate) fn stale_revision(id: CampaignId, expected: u64) -> StoreError {
    StoreError::Conflict(format!(
        "campaign {id} changed since revision {expected}"
    ))
}

pub(crate) fn username_taken(username: &str) -> StoreError {
    StoreError::Conflict(format!("username {username:?} is already taken"))
}
