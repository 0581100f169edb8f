//! Player characters.
//!
//! Characters arrive as a loosely filled [`NewCharacter`] draft (the shape a
//! form or JSON payload gives us) and are validated into a typed
//! [`Character`] before they enter the engine. Characters never change after
//! their campaign is created.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Score used for any ability the player leaves unset.
pub const DEFAULT_ABILITY_SCORE: u8 = 10;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 20;
pub const MIN_ABILITY_SCORE: u8 = 1;
pub const MAX_ABILITY_SCORE: u8 = 30;

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::uniform(DEFAULT_ABILITY_SCORE)
    }
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn uniform(score: u8) -> Self {
        Self::new(score, score, score, score, score, score)
    }

    /// Scores paired with their names, in sheet order.
    pub fn named(&self) -> [(&'static str, u8); 6] {
        [
            ("strength", self.strength),
            ("dexterity", self.dexterity),
            ("constitution", self.constitution),
            ("intelligence", self.intelligence),
            ("wisdom", self.wisdom),
            ("charisma", self.charisma),
        ]
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for (ability, score) in self.named() {
            if !(MIN_ABILITY_SCORE..=MAX_ABILITY_SCORE).contains(&score) {
                return Err(ValidationError::AbilityOutOfRange { ability, score });
            }
        }
        Ok(())
    }
}

/// A validated player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub race: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub level: u8,
    #[serde(flatten)]
    pub abilities: AbilityScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl Character {
    /// One-line description, e.g. "Thorin, level 1 Nain Guerrier".
    pub fn summary(&self) -> String {
        format!(
            "{}, level {} {} {}",
            self.name, self.level, self.race, self.class_name
        )
    }
}

/// Unvalidated character input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCharacter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub race: Option<String>,
    #[serde(default, rename = "class")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub strength: Option<u8>,
    #[serde(default)]
    pub dexterity: Option<u8>,
    #[serde(default)]
    pub constitution: Option<u8>,
    #[serde(default)]
    pub intelligence: Option<u8>,
    #[serde(default)]
    pub wisdom: Option<u8>,
    #[serde(default)]
    pub charisma: Option<u8>,
    #[serde(default)]
    pub background: Option<String>,
}

impl NewCharacter {
    /// Start a draft with the three required fields filled in.
    pub fn new(
        name: impl Into<String>,
        race: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            race: Some(race.into()),
            class_name: Some(class_name.into()),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_abilities(mut self, scores: AbilityScores) -> Self {
        self.strength = Some(scores.strength);
        self.dexterity = Some(scores.dexterity);
        self.constitution = Some(scores.constitution);
        self.intelligence = Some(scores.intelligence);
        self.wisdom = Some(scores.wisdom);
        self.charisma = Some(scores.charisma);
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    /// Validate the draft into a [`Character`].
    ///
    /// Text fields are trimmed; a blank background is dropped.
    pub fn build(&self) -> Result<Character, ValidationError> {
        let name = required(&self.name, "name")?;
        let race = required(&self.race, "race")?;
        let class_name = required(&self.class_name, "class")?;

        let level = self.level.unwrap_or(MIN_LEVEL);
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(ValidationError::LevelOutOfRange(level));
        }

        let abilities = AbilityScores {
            strength: self.strength.unwrap_or(DEFAULT_ABILITY_SCORE),
            dexterity: self.dexterity.unwrap_or(DEFAULT_ABILITY_SCORE),
            constitution: self.constitution.unwrap_or(DEFAULT_ABILITY_SCORE),
            intelligence: self.intelligence.unwrap_or(DEFAULT_ABILITY_SCORE),
            wisdom: self.wisdom.unwrap_or(DEFAULT_ABILITY_SCORE),
            charisma: self.charisma.unwrap_or(DEFAULT_ABILITY_SCORE),
        };
        abilities.validate()?;

        let background = self
            .background
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        Ok(Character {
            name,
            race,
            class_name,
            level,
            abilities,
            background,
        })
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::MissingField(field))
}
