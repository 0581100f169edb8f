//! Interactive play.
//!
//! A simple line-oriented loop:
//! - Lines starting with `#` are commands (history, status, help, quit)
//! - Anything else is sent to the DM as the player's action

use campaign_core::{Campaign, CampaignError, CampaignOrchestrator, Turn, TurnOutcome};
use std::io::{self, BufRead, Write};

/// Run an interactive session on `campaign` until `#quit` or end of input.
pub async fn run(engine: &CampaignOrchestrator, campaign: Campaign) -> Result<(), CampaignError> {
    print_header(&campaign);
    print_turns(&engine.recent_turns(campaign.id, None).await?);
    print_help();
    println!("Enter your actions (one per line):");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let parts: Vec<&str> = command.split_whitespace().collect();
            match parts.first().copied() {
                Some("quit") | Some("exit") => {
                    println!("Goodbye!");
                    break;
                }
                Some("history") => {
                    let n = match parts.get(1).map(|n| n.parse::<usize>()) {
                        None => None,
                        Some(Ok(n)) => Some(n),
                        Some(Err(_)) => {
                            println!("[ERROR] Usage: #history [n]");
                            continue;
                        }
                    };
                    match engine.recent_turns(campaign.id, n).await {
                        Ok(turns) => print_turns(&turns),
                        Err(e) => println!("[ERROR] {e}"),
                    }
                }
                Some("status") => match engine.get_campaign(campaign.id).await {
                    Ok(current) => {
                        println!("[STATUS]");
                        println!("  Campaign: {}", current.name);
                        println!("  Character: {}", current.character.summary());
                        println!("  Turns: {}", current.turn_count());
                        println!("  Revision: {}", current.revision);
                        println!("  Last played: {}", current.updated_at.format("%Y-%m-%d %H:%M"));
                    }
                    Err(e) => println!("[ERROR] {e}"),
                },
                Some("help") => print_help(),
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            stdout.flush().ok();
            continue;
        }

        print!("[PROCESSING]");
        stdout.flush().ok();

        let result = engine.submit_turn(campaign.id, line).await;

        // Clear the processing indicator
        print!("\r            \r");
        stdout.flush().ok();

        match result {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => println!("[ERROR] {e}"),
        }
    }

    Ok(())
}

pub fn print_header(campaign: &Campaign) {
    println!("=== {} ===", campaign.name);
    if !campaign.description.is_empty() {
        println!("{}", campaign.description);
    }
    println!("Character: {}", campaign.character.summary());
    println!();
}

pub fn print_turns(turns: &[Turn]) {
    for turn in turns {
        if !turn.player.is_empty() {
            println!("> {}", turn.player);
        }
        match turn.dm {
            Some(ref dm) => print_narrative(dm),
            None => println!("(no reply)"),
        }
        println!();
    }
}

pub fn print_outcome(outcome: &TurnOutcome) {
    match (&outcome.dm, &outcome.failure) {
        (Some(dm), _) => {
            println!("[DM]");
            print_narrative(&dm.content);
            println!();
        }
        (None, failure) => {
            println!(
                "[NO REPLY] Your action was recorded, but the DM did not answer: {}",
                failure.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn print_narrative(text: &str) {
    for para in text.split("\n\n") {
        println!("{para}");
    }
}

fn print_help() {
    println!("Commands:");
    println!("  #history [n] - Show the last n turns");
    println!("  #status      - Show campaign status");
    println!("  #help        - Show this help");
    println!("  #quit        - Exit");
    println!("  (anything else is sent as your action)");
    println!();
}
