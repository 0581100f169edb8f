//! Typed identifiers for users and campaigns.
//!
//! Both are UUID newtypes so a user id can never be passed where a
//! campaign id is expected. They are stored as their hyphenated text form.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID.
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[inline]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[inline]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Unique identifier for a user.
    UserId
);

define_id!(
    /// Unique identifier for a campaign.
    CampaignId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(CampaignId::new(), CampaignId::new());
    }

    #[test]
    fn test_id_parse_and_display() {
        let text = "550e8400-e29b-41d4-a716-446655440000";
        let id: CampaignId = text.parse().unwrap();
        assert_eq!(id.to_string(), text);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn test_id_debug_is_short() {
        let id: UserId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(format!("{id:?}"), "UserId(550e8400)");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = CampaignId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: CampaignId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
