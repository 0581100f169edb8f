//! Users and campaigns as the engine sees them.

use crate::character::{Character, NewCharacter};
use crate::context::SessionContext;
use crate::id::{CampaignId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Already hashed by whoever registered the user. Never hashed here.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// A persistent play-through: one character and its narrative log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub character: Character,
    pub context: SessionContext,
    /// Bumped on every successful save.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn turn_count(&self) -> usize {
        self.context.turn_count()
    }

    pub fn summary(&self) -> CampaignSummary {
        CampaignSummary {
            id: self.id,
            name: self.name.clone(),
            character_name: self.character.name.clone(),
            turn_count: self.turn_count(),
            updated_at: self.updated_at,
        }
    }
}

/// Listing row for a user's campaigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub id: CampaignId,
    pub name: String,
    pub character_name: String,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Request to start a campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub character: NewCharacter,
}

impl NewCampaign {
    pub fn new(name: impl Into<String>, character: NewCharacter) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            character,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
