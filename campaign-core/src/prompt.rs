//! Prompt construction for the game-master model.
//!
//! Building a prompt is a pure function of the stored context, the player's
//! new input and the configured instructions. Nothing time- or
//! randomness-dependent goes in, so the same campaign state always yields
//! the same request.

use crate::character::Character;
use crate::context::{ContextMessage, Role, SessionContext};

const DM_INSTRUCTIONS: &str = "\
You are the Dungeon Master of a solo tabletop role-playing campaign.
Describe clearly and vividly what happens next after each thing the player says.
Stay consistent with everything that has already happened in this campaign.
Never decide the player character's actions or words for them.
Keep each reply to a few paragraphs and end on a situation the player can act on.";

/// The request handed to a narrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    /// Prior player and narrator messages followed by the new input.
    pub messages: Vec<ContextMessage>,
}

impl Prompt {
    /// Render the prompt as one flat transcript.
    pub fn to_text(&self) -> String {
        let mut text = self.system.clone();
        for message in &self.messages {
            let speaker = match message.role {
                Role::System => "System",
                Role::User => "Player",
                Role::Assistant => "DM",
            };
            text.push_str("\n\n");
            text.push_str(speaker);
            text.push_str(": ");
            text.push_str(&message.content);
        }
        text
    }
}

/// Builds prompts from campaign state.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    instructions: Option<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra instructions appended after the base template.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        let instructions = instructions.into();
        self.instructions = if instructions.trim().is_empty() {
            None
        } else {
            Some(instructions)
        };
        self
    }

    /// Build the prompt for `input` against the context as it stood before
    /// the input was appended. The whole history is included.
    pub fn build(&self, context: &SessionContext, input: &str) -> Prompt {
        let mut system = String::from(DM_INSTRUCTIONS);

        if let Some(ref custom) = self.instructions {
            system.push_str("\n\n## Additional Instructions\n");
            system.push_str(custom);
        }

        for preamble in context.preamble() {
            system.push_str("\n\n");
            system.push_str(&preamble.content);
        }

        let mut messages: Vec<ContextMessage> = context.history().cloned().collect();
        messages.push(ContextMessage::user(input));

        Prompt { system, messages }
    }
}

/// The system preamble stored when a campaign is created.
pub fn campaign_preamble(name: &str, description: &str, character: &Character) -> String {
    let mut text = String::new();

    text.push_str("## Current Campaign: ");
    text.push_str(name);
    text.push('\n');
    if !description.trim().is_empty() {
        text.push_str(description.trim());
        text.push('\n');
    }

    text.push_str("\n## Player Character\n");
    text.push_str(&format!("**Name:** {}\n", character.name));
    text.push_str(&format!("**Race:** {}\n", character.race));
    text.push_str(&format!("**Class:** {}\n", character.class_name));
    text.push_str(&format!("**Level:** {}\n", character.level));

    let a = &character.abilities;
    text.push_str(&format!(
        "**Abilities:** STR {} DEX {} CON {} INT {} WIS {} CHA {}\n",
        a.strength, a.dexterity, a.constitution, a.intelligence, a.wisdom, a.charisma
    ));

    if let Some(ref background) = character.background {
        text.push_str(&format!("**Background:** {background}\n"));
    }

    text.trim_end().to_string()
}
