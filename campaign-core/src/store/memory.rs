//! In-process store for tests and throwaway sessions.

use super::{stale_revision, username_taken, CampaignStore, NewCampaignRecord, NewUser, StoreError};
use crate::context::SessionContext;
use crate::id::{CampaignId, UserId};
use crate::model::{Campaign, CampaignSummary, User};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    // insertion sequence breaks updated_at ties
    campaigns: HashMap<CampaignId, (u64, Campaign)>,
    next_seq: u64,
}

/// Keeps everything in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(username_taken(&user.username));
        }

        let user = User {
            id: UserId::new(),
            username: user.username,
            password_hash: user.password_hash,
            is_admin: user.is_admin,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<User, StoreError> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_campaign(&self, record: NewCampaignRecord) -> Result<Campaign, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&record.owner_id) {
            return Err(StoreError::NotFound(format!("user {}", record.owner_id)));
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: CampaignId::new(),
            owner_id: record.owner_id,
            name: record.name,
            description: record.description,
            character: record.character,
            context: record.context,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.campaigns.insert(campaign.id, (seq, campaign.clone()));
        Ok(campaign)
    }

    async fn load_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        self.tables
            .read()
            .await
            .campaigns
            .get(&id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| StoreError::NotFound(format!("campaign {id}")))
    }

    async fn save_context(
        &self,
        id: CampaignId,
        context: &SessionContext,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let (_, campaign) = tables
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {id}")))?;

        if campaign.revision != expected_revision {
            return Err(stale_revision(id, expected_revision));
        }
        campaign.context = context.clone();
        campaign.revision += 1;
        campaign.updated_at = Utc::now();
        Ok(campaign.revision)
    }

    async fn list_campaigns_for_user(
        &self,
        owner: UserId,
    ) -> Result<Vec<CampaignSummary>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&(u64, Campaign)> = tables
            .campaigns
            .values()
            .filter(|(_, c)| c.owner_id == owner)
            .collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.updated_at.cmp(&a.updated_at).then(seq_b.cmp(seq_a))
        });
        Ok(rows.into_iter().map(|(_, c)| c.summary()).collect())
    }
}
