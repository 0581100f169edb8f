//! Command-line front end for the campaign engine.
//!
//! ```bash
//! campaign new "Curse of the Mine" --character Thorin --race Nain --class Guerrier
//! campaign list
//! campaign say <campaign-id> I search the chest
//! campaign play <campaign-id>
//! ```
//!
//! Settings come from the environment (and a `.env` file if present); see
//! `EngineConfig` for the variables. Without `OPENAI_API_KEY` the player's
//! turns are still recorded but the DM stays silent.

mod play;

use campaign_core::{
    Campaign, CampaignId, CampaignOrchestrator, ChatNarrator, EngineConfig, Narrator,
    NewCampaign, NewCharacter, OfflineNarrator, SqliteStore, User,
};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "campaign")]
#[command(about = "Play text campaigns with an AI game master", long_about = None)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Player whose campaigns are used
    #[arg(long, global = true, default_value = "player")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new campaign
    New {
        /// Campaign name
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Character name
        #[arg(long)]
        character: String,
        #[arg(long)]
        race: String,
        #[arg(long = "class")]
        class_name: String,
        #[arg(long)]
        level: Option<u8>,
        #[arg(long)]
        background: Option<String>,
        #[arg(long = "str")]
        strength: Option<u8>,
        #[arg(long = "dex")]
        dexterity: Option<u8>,
        #[arg(long = "con")]
        constitution: Option<u8>,
        #[arg(long = "int")]
        intelligence: Option<u8>,
        #[arg(long = "wis")]
        wisdom: Option<u8>,
        #[arg(long = "cha")]
        charisma: Option<u8>,
    },
    /// List your campaigns, most recently played first
    List,
    /// Show a campaign and its recent turns
    Show {
        campaign: CampaignId,
        /// Number of turns to show
        #[arg(long)]
        last: Option<usize>,
    },
    /// Play a single turn
    Say {
        campaign: CampaignId,
        #[arg(required = true, trailing_var_arg = true)]
        input: Vec<String>,
    },
    /// Play interactively
    Play { campaign: CampaignId },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = open_engine(cli.database.as_deref()).await?;
    let user = engine.ensure_user(&cli.user).await?;

    match cli.command {
        Command::New {
            name,
            description,
            character,
            race,
            class_name,
            level,
            background,
            strength,
            dexterity,
            constitution,
            intelligence,
            wisdom,
            charisma,
        } => {
            let draft = NewCharacter {
                name: Some(character),
                race: Some(race),
                class_name: Some(class_name),
                level,
                strength,
                dexterity,
                constitution,
                intelligence,
                wisdom,
                charisma,
                background,
            };
            let mut request = NewCampaign::new(name, draft);
            if let Some(description) = description {
                request = request.with_description(description);
            }

            let campaign = engine.create_campaign(user.id, request).await?;
            println!("[CREATED] {} ({})", campaign.name, campaign.id);
            println!("Character: {}", campaign.character.summary());
        }
        Command::List => {
            let campaigns = engine.list_campaigns_for_user(user.id).await?;
            if campaigns.is_empty() {
                println!("No campaigns yet. Start one with `campaign new`.");
            }
            for c in campaigns {
                println!(
                    "{}  {}  ({}, {} turns, last played {})",
                    c.id,
                    c.name,
                    c.character_name,
                    c.turn_count,
                    c.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Show { campaign, last } => {
            let campaign = owned_campaign(&engine, &user, campaign).await?;
            play::print_header(&campaign);
            let turns = engine.recent_turns(campaign.id, last).await?;
            play::print_turns(&turns);
        }
        Command::Say { campaign, input } => {
            let campaign = owned_campaign(&engine, &user, campaign).await?;
            let outcome = engine.submit_turn(campaign.id, &input.join(" ")).await?;
            play::print_outcome(&outcome);
        }
        Command::Play { campaign } => {
            let campaign = owned_campaign(&engine, &user, campaign).await?;
            play::run(&engine, campaign).await?;
        }
    }

    Ok(())
}

async fn open_engine(database: Option<&str>) -> Result<CampaignOrchestrator, Box<dyn Error>> {
    let mut config = EngineConfig::from_env()?;
    if let Some(url) = database {
        config = config.with_database_url(url);
    }

    let store = SqliteStore::connect(&config.database_url).await?;
    let narrator: Arc<dyn Narrator> = if config.has_api_key() {
        Arc::new(ChatNarrator::from_config(&config)?)
    } else {
        warn!("OPENAI_API_KEY not set, turns will be recorded without DM replies");
        Arc::new(OfflineNarrator)
    };

    Ok(CampaignOrchestrator::new(Arc::new(store), narrator).with_config(&config))
}

/// Load a campaign, refusing ones that belong to someone else.
async fn owned_campaign(
    engine: &CampaignOrchestrator,
    user: &User,
    id: CampaignId,
) -> Result<Campaign, Box<dyn Error>> {
    let campaign = engine.get_campaign(id).await?;
    if campaign.owner_id != user.id {
        return Err(format!("campaign {id} belongs to another player").into());
    }
    Ok(campaign)
}
