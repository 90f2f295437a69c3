//! Intents command.

use clap::Args;
use discorator_core::{Intent, Intents};

/// Intents command arguments.
#[derive(Args)]
pub struct IntentsArgs {
    /// Intent names (e.g. guild_messages, Direct_Messages, message-content)
    pub names: Vec<String>,

    /// List every known intent with its bit
    #[arg(short, long)]
    pub list: bool,
}

fn render(intents: Intents) -> String {
    let names: Vec<_> = intents.iter().map(Intent::name).collect();
    format!("{} ({})", intents.bits(), names.join(", "))
}

/// Run the intents command.
pub fn run(args: IntentsArgs) -> anyhow::Result<()> {
    if args.list {
        for intent in Intent::ALL {
            println!("  {:<32} {:>10}", intent.name(), intent.bit());
        }
        return Ok(());
    }

    let intents = if args.names.is_empty() {
        Intents::default()
    } else {
        Intents::from_names(&args.names)?
    };
    println!("{}", render(intents));
    Ok(())
}
